//! Form-level operations: scheduling, resets, context, validation type and
//! server error routing.

use formtree::prelude::*;
use formtree::FormError;
use serde_json::{Value, json};

fn signup() -> ControlConfig {
    let required = |message: &str| ControlConfig::basic().no_value_error(ControlError::new(message)).build();
    ControlConfig::object()
        .field("email", required("email required"))
        .field(
            "age",
            ControlConfig::basic()
                .uses_context()
                .validate(|value, context| {
                    let min = context.get("min_age").and_then(Value::as_u64).unwrap_or(0);
                    match value.and_then(Value::as_u64) {
                        Some(age) if age < min => Validation::invalid(ControlError::new("too young")),
                        _ => Validation::valid(),
                    }
                })
                .build(),
        )
        .field(
            "addresses",
            ControlConfig::array(
                ControlConfig::object()
                    .field("street", required("street required"))
                    .field("zip", ControlConfig::basic().build())
                    .build(),
            )
            .build(),
        )
        .build()
}

fn form(value: Value) -> FormRoot {
    FormRoot::new(&signup(), FormOptions::default().value(Some(value)))
}

#[test]
fn errors_stay_hidden_until_touched() {
    let form = form(json!({"age": 20}));
    let control = form.control();
    assert!(control.is_valid());
    assert!(control.field("email").expect("email").error().is_none());

    form.touch();
    let touched = form.flush().expect("new snapshot");
    assert!(!touched.is_valid());
    assert_eq!(
        touched.field("email").and_then(|c| c.error()).map(|e| e.message.as_str()),
        Some("email required")
    );
}

#[test]
fn validation_type_always_shows_errors_up_front() {
    let form = form(json!({"age": 20}));
    form.set_validation_type(ValidationType::Always);
    let control = form.flush().expect("new snapshot");
    assert!(!control.is_valid());
    assert!(!control.is_touched());

    form.set_validation_type(ValidationType::Never);
    let control = form.flush().expect("new snapshot");
    assert!(control.is_valid());
}

#[test]
fn form_context_reaches_validators_that_use_it() {
    let form = form(json!({"email": "a@b.c", "age": 16}));
    form.set_validation_type(ValidationType::Always);
    form.flush();
    assert!(form.control().is_valid());

    form.set_context(json!({"min_age": 18}));
    let control = form.flush().expect("new snapshot");
    assert_eq!(
        control.field("age").and_then(|c| c.error()),
        Some(&ControlError::new("too young"))
    );
}

#[test]
fn reset_without_value_returns_to_the_default() {
    let form = FormRoot::new(
        &signup(),
        FormOptions::default()
            .value(Some(json!({"email": "old@x.y"})))
            .default_value(Some(json!({"email": "old@x.y"}))),
    );
    form.control().field("email").expect("email").set_value(Some(json!("new@x.y")));
    let edited = form.flush().expect("edited");
    assert!(edited.is_dirty());
    assert!(edited.is_touched());

    form.reset(ResetOptions::default());
    let reset = form.flush().expect("reset");
    assert_eq!(reset.value(), Some(&json!({"email": "old@x.y"})));
    assert!(!reset.is_dirty());
    assert!(!reset.is_touched());
}

#[test]
fn reset_can_keep_touched_state() {
    let form = form(json!({"email": "a@b.c"}));
    form.touch();
    form.flush();

    form.reset(ResetOptions {
        value: Some(Some(json!({"email": "z@b.c"}))),
        keep_touched: true,
        ..ResetOptions::default()
    });
    let reset = form.flush().expect("reset");
    assert!(reset.is_touched());
    assert_eq!(reset.default_value(), Some(&json!({"email": "z@b.c"})));
}

#[test]
fn reset_with_only_a_new_default_restores_the_old_default() {
    let form = FormRoot::new(
        &signup(),
        FormOptions::default()
            .value(Some(json!({"email": "cur@x.y"})))
            .default_value(Some(json!({"email": "old@x.y"}))),
    );
    form.reset(ResetOptions {
        default_value: Some(Some(json!({"email": "new@x.y"}))),
        ..ResetOptions::default()
    });
    let reset = form.flush().expect("reset");
    assert_eq!(reset.value(), Some(&json!({"email": "old@x.y"})));
    assert_eq!(reset.default_value(), Some(&json!({"email": "new@x.y"})));
    assert!(reset.is_dirty());
}

#[test]
fn flat_errors_are_routed_through_arrays() {
    let form = form(json!({"addresses": [{"street": "A"}, {"street": "B"}]}));
    form.touch();
    form.apply_flat_errors(&[
        FlatError::new("addresses[1].zip", ControlError::new("unknown zip")),
        FlatError::new("addresses.0.street", ControlError::new("closed")),
        FlatError::new("addresses[7].zip", ControlError::new("out of range")),
        FlatError::new("phone", ControlError::new("no such field")),
    ]);
    let control = form.flush().expect("new snapshot");

    let zip = form.find("addresses[1].zip").expect("zip");
    assert_eq!(zip.error(), Some(&ControlError::new("unknown zip")));
    let street = form.find("addresses[0].street").expect("street");
    assert_eq!(street.error(), Some(&ControlError::new("closed")));
    assert!(!control.is_valid());

    // Editing the field clears its override.
    zip.set_value(Some(json!("0150")));
    form.flush();
    assert!(form.find("addresses[1].zip").expect("zip").error().is_none());
    assert!(form.find("addresses[0].street").expect("street").error().is_some());
}

#[test]
fn first_error_for_a_control_wins() {
    let form = form(json!({"email": "a@b.c"}));
    form.touch();
    form.apply_flat_errors(&[
        FlatError::new("email", ControlError::new("first")),
        FlatError::new("email", ControlError::new("second")),
    ]);
    form.flush();
    assert_eq!(
        form.find("email").expect("email").error(),
        Some(&ControlError::new("first"))
    );
}

#[test]
fn flat_errors_stay_hidden_on_untouched_fields() {
    let form = form(json!({"email": "a@b.c"}));
    form.apply_flat_errors(&[FlatError::new("email", ControlError::new("server"))]);
    form.flush();
    let control = form.control();
    assert!(control.field("email").expect("email").error().is_none());
    assert!(control.is_valid());
}

#[test]
fn find_reports_bad_paths() {
    let form = form(json!({"addresses": [{"street": "A"}]}));
    assert!(matches!(form.find("addresses[3]"), Err(FormError::ItemOutOfRange { index: 3, len: 1, .. })));
    assert!(matches!(form.find("addresses[x]"), Err(FormError::InvalidIndex { .. })));
    assert!(matches!(form.find("nickname"), Err(FormError::UnknownField { .. })));
    assert!(matches!(form.find("email.local"), Err(FormError::NotAContainer { .. })));
    assert!(form.find("").expect("root").ptr_eq(&form.control()));
}

#[test]
fn nested_array_items_are_named_by_path() {
    let form = form(json!({"addresses": [{"street": "A"}, {"street": "B"}]}));
    let street = form.find("addresses[1].street").expect("street");
    assert_eq!(street.name(), "addresses[1].street");
    assert_eq!(street.names().static_name, "addresses[index].street");
}
