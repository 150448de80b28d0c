#![no_main]

use arbitrary::Arbitrary;
use formtree_core::custom_errors::{lookup, split_child};
use formtree_core::{ControlConfig, ControlError, CustomErrorMatcher, FlatError};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Segment {
    Field(u8),
    Index(u8),
    Bracketed(u8),
    Raw(String),
}

impl Segment {
    fn write(&self, path: &mut String) {
        const FIELDS: [&str; 5] = ["user", "tags", "name", "a.b", "x[y]"];
        match self {
            Segment::Field(i) => {
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(FIELDS[usize::from(*i) % FIELDS.len()]);
            }
            Segment::Index(i) => {
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(&(i % 8).to_string());
            }
            Segment::Bracketed(i) => {
                path.push('[');
                path.push_str(&(i % 8).to_string());
                path.push(']');
            }
            Segment::Raw(raw) => path.push_str(raw),
        }
    }
}

fn config() -> ControlConfig {
    ControlConfig::object()
        .field(
            "user",
            ControlConfig::object()
                .field("name", ControlConfig::basic().build())
                .field("a.b", ControlConfig::basic().build())
                .build(),
        )
        .field(
            "tags",
            ControlConfig::array(
                ControlConfig::object()
                    .field("x[y]", ControlConfig::basic().build())
                    .build(),
            )
            .build(),
        )
        .build()
}

fuzz_target!(|paths: Vec<Vec<Segment>>| {
    let config = config();
    let flat: Vec<FlatError> = paths
        .iter()
        .take(16)
        .map(|segments| {
            let mut path = String::new();
            for segment in segments.iter().take(8) {
                segment.write(&mut path);
            }
            FlatError::new(path, ControlError::new("fuzz"))
        })
        .collect();

    for error in &flat {
        let _ = split_child(&config, &error.path);
        let _ = lookup(&config, &error.path);
    }

    let routed = CustomErrorMatcher::new(config.clone()).resolve(&flat);
    assert!(routed.len() <= flat.len());
    for error in &routed {
        // Every routed key path must walk the config tree.
        let mut node = &config;
        for key in &error.path {
            node = node
                .field_config(key)
                .or_else(|| key.parse::<usize>().ok().and(node.item_config()))
                .expect("routed key exists");
        }
    }
});
