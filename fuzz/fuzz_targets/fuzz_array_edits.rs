#![no_main]

use arbitrary::Arbitrary;
use formtree_core::ControlConfig;
use formtree_runtime::{ControlUpdate, CreateControl, create_control};
use libfuzzer_sys::fuzz_target;
use serde_json::{Value, json};

#[derive(Arbitrary, Debug)]
enum Op {
    Delete(u8),
    Push(u8),
    SetValue(Vec<u8>),
    SetItem(u8, u8),
    Clear,
    Apply,
}

fuzz_target!(|ops: Vec<Op>| {
    let config = ControlConfig::array(ControlConfig::basic().build()).build();
    let handle = create_control(CreateControl::new(config).value(Some(json!([1, 2, 3]))), None);

    for op in ops.iter().take(64) {
        let root = handle.current();
        let Some(array) = root.as_array() else {
            return;
        };
        match op {
            Op::Delete(i) => {
                if let Some(item) = array.item(usize::from(*i)) {
                    item.delete();
                }
            }
            Op::Push(v) => array.push([Some(json!(v))]),
            Op::SetValue(values) => {
                array.set_value(Some(json!(values.iter().take(16).collect::<Vec<_>>())));
            }
            Op::SetItem(i, v) => {
                if let Some(item) = array.item(usize::from(*i)) {
                    item.control().set_value(Some(json!(v)));
                }
            }
            Op::Clear => array.clear(),
            Op::Apply => {
                let _ = handle.apply_update(ControlUpdate::new());
            }
        }
    }

    let root = handle.apply_update(ControlUpdate::new()).unwrap_or_else(|| handle.current());
    let Some(array) = root.as_array() else {
        return;
    };
    // Item controls agree with the array value.
    let values: Vec<Value> = array
        .items()
        .iter()
        .map(|item| item.control().value().cloned().unwrap_or(Value::Null))
        .collect();
    assert_eq!(root.value(), Some(&Value::Array(values)));
});
