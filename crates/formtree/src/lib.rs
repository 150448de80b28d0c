#![forbid(unsafe_code)]

//! Hierarchical, immutable form state.
//!
//! `formtree` models a form as a tree of controls described by a
//! [`ControlConfig`]: leaves ([`BasicControl`]), objects with named fields
//! ([`ObjectControl`]) and arrays of items ([`ArrayControl`]). Every state is
//! an immutable snapshot; changes are recorded on the snapshot and applied in
//! one pass from the root, sharing every unchanged subtree.
//!
//! # Quick start
//!
//! ```
//! use formtree::prelude::*;
//! use serde_json::json;
//!
//! let config = ControlConfig::object()
//!     .field("email", ControlConfig::basic()
//!         .no_value_error(ControlError::new("required"))
//!         .build())
//!     .build();
//! let form = FormRoot::new(&config, FormOptions::default().value(Some(json!({}))));
//!
//! form.control().field("email").unwrap().set_value(Some(json!("a@b.c")));
//! let control = form.flush().unwrap();
//! assert_eq!(control.value(), Some(&json!({"email": "a@b.c"})));
//! assert!(control.is_valid());
//! ```
//!
//! # Crates
//!
//! | Crate | Contents |
//! |-------|----------|
//! | `formtree-core` | Values, configs, names, validation callbacks, error routing |
//! | `formtree-runtime` | Snapshots, reconciliation, validation scheduling |

pub use formtree_core::{
    Clock, Context, ControlConfig, ControlError, ControlKind, ControlNames, CustomError,
    CustomErrorMatcher, FieldValue, FlatError, FormError, LabClock, Result, Validation,
    ValidationType,
};
pub use formtree_runtime::{
    ArrayControl, ArrayItem, BasicControl, ChangeListener, Control, ControlHandle, ControlUpdate,
    CreateControl, FormOptions, FormRoot, ItemId, ItemsUpdate, NodeState, ObjectControl,
    ResetOptions, SetValueOptions, ValidValue, ValidationQueue, Validator, ValidatorState,
    create_control,
};

pub use formtree_core as core;
pub use formtree_runtime as runtime;

/// Everything needed to declare and drive a form.
pub mod prelude {
    pub use crate::{
        ArrayControl, ArrayItem, Control, ControlConfig, ControlError, ControlUpdate, FieldValue,
        FlatError, FormOptions, FormRoot, ObjectControl, ResetOptions, SetValueOptions, Validation,
        ValidationType,
    };
}
