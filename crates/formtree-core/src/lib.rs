#![forbid(unsafe_code)]

//! Core types for formtree: field values, control configuration, names,
//! validation callbacks, error routing and the cancellation context used for
//! debounced and asynchronous validation.
//!
//! Nothing in this crate holds control state; see `formtree-runtime` for
//! the control tree itself.

pub mod config;
pub mod custom_errors;
pub mod cx;
pub mod error;
pub mod names;
pub mod validation;
pub mod value;

pub use config::{ControlConfig, ControlKind};
pub use custom_errors::{CustomError, CustomErrorMatcher, FlatError};
pub use cx::{Clock, Cx, CxController, LabClock};
pub use error::{ControlError, FormError, Result};
pub use names::ControlNames;
pub use validation::{ValidateFn, Validation, ValidationType};
pub use value::{Context, FieldValue};
