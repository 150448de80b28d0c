#![forbid(unsafe_code)]

//! Validation policy and validator callback types.

use std::future::Future;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ControlError;
use crate::value::Context;

/// Policy governing whether a control's validation result is visible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationType {
    /// Always validate.
    Always,
    /// Never validate; errors are hidden.
    Never,
    /// Validate once the control has been touched.
    #[default]
    OnlyTouched,
}

impl ValidationType {
    /// Whether validation is visible for a control with the given touch state.
    #[inline]
    #[must_use]
    pub fn should_validate(self, is_touched: bool) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::OnlyTouched => is_touched,
        }
    }
}

/// Outcome of a validator callback.
pub enum Validation {
    /// Result known synchronously.
    Ready(Option<ControlError>),
    /// Result delivered later; polled by the validation queue.
    Pending(LocalBoxFuture<'static, Option<ControlError>>),
}

impl Validation {
    #[must_use]
    pub fn valid() -> Self {
        Self::Ready(None)
    }

    #[must_use]
    pub fn invalid(error: ControlError) -> Self {
        Self::Ready(Some(error))
    }

    /// Wrap a future producing the validation result.
    #[must_use]
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Option<ControlError>> + 'static,
    {
        Self::Pending(future.boxed_local())
    }

    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

impl From<Option<ControlError>> for Validation {
    fn from(result: Option<ControlError>) -> Self {
        Self::Ready(result)
    }
}

impl std::fmt::Debug for Validation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Validator callback: `(value, context) -> Validation`.
///
/// `context` is `Null` unless the control declares that it uses context.
pub type ValidateFn = Rc<dyn Fn(Option<&Value>, &Context) -> Validation>;

/// Validator that accepts every value.
#[must_use]
pub fn always_valid() -> ValidateFn {
    Rc::new(|_: Option<&Value>, _: &Context| Validation::valid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn visibility_per_type() {
        assert!(ValidationType::Always.should_validate(false));
        assert!(!ValidationType::Never.should_validate(true));
        assert!(!ValidationType::OnlyTouched.should_validate(false));
        assert!(ValidationType::OnlyTouched.should_validate(true));
    }

    #[test]
    fn serde_names_are_camel_case() {
        let json = serde_json::to_value(ValidationType::OnlyTouched).unwrap();
        assert_eq!(json, serde_json::json!("onlyTouched"));
    }

    #[test]
    fn pending_future_resolves() {
        let validation = Validation::pending(async { Some(ControlError::new("taken")) });
        assert!(!validation.is_ready());
        let Validation::Pending(fut) = validation else {
            panic!("expected pending");
        };
        assert_eq!(block_on(fut), Some(ControlError::new("taken")));
    }

    #[test]
    fn always_valid_accepts_anything() {
        let validate = always_valid();
        assert!(matches!(validate(None, &Value::Null), Validation::Ready(None)));
    }
}
