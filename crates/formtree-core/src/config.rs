#![forbid(unsafe_code)]

//! Static control configuration.
//!
//! A [`ControlConfig`] describes one position of the form value: a leaf
//! ([`ControlConfig::basic`]), an object with a fixed set of named fields
//! ([`ControlConfig::object`]) or a homogeneous array
//! ([`ControlConfig::array`]). Configs are built once and shared by every
//! control created from them, so they are `Rc` inside and cheap to clone.
//!
//! # Descendants context
//!
//! Objects and arrays hand their children a *descendants context* derived
//! from `(value, context)`. The derivation is resolved when the config is
//! built:
//!
//! 1. A custom function is used only if some descendant actually reads
//!    context; it is recomputed on context changes only when declared with
//!    `needs_context = true`.
//! 2. Without a custom function, descendants that read context get the
//!    parent's context passed through unchanged.
//! 3. When no descendant reads context, the descendants context is `Null`
//!    and never recomputed.
//!
//! # Example
//!
//! ```
//! use formtree_core::config::ControlConfig;
//! use formtree_core::error::ControlError;
//! use formtree_core::validation::Validation;
//!
//! let config = ControlConfig::object()
//!     .field("email", ControlConfig::basic().no_value_error(ControlError::new("required")).build())
//!     .field(
//!         "tags",
//!         ControlConfig::array(ControlConfig::basic().build())
//!             .validate(|value, _| match value.and_then(|v| v.as_array()) {
//!                 Some(tags) if tags.len() > 3 => Validation::invalid(ControlError::new("too many")),
//!                 _ => Validation::valid(),
//!             })
//!             .build(),
//!     )
//!     .build();
//! assert!(config.field_config("email").is_some());
//! ```

use std::future::Future;
use std::rc::Rc;

use serde_json::Value;
use web_time::Duration;

use crate::error::ControlError;
use crate::validation::{ValidateFn, Validation, always_valid};
use crate::value::Context;

/// Derives the children's context from `(value, context)`.
pub type DescendantsContextFn = Rc<dyn Fn(Option<&Value>, &Context) -> Context>;

/// Kind of control a config produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    Basic,
    Object,
    Array,
}

// ─── Validation settings ─────────────────────────────────────────────────────

/// Validation settings shared by every control kind.
#[derive(Clone)]
pub struct ValidationConfig {
    pub validate: ValidateFn,
    pub no_value_error: Option<ControlError>,
    pub debounce: Duration,
    pub uses_context: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            validate: always_valid(),
            no_value_error: None,
            debounce: Duration::ZERO,
            uses_context: false,
        }
    }
}

impl std::fmt::Debug for ValidationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationConfig")
            .field("no_value_error", &self.no_value_error)
            .field("debounce", &self.debounce)
            .field("uses_context", &self.uses_context)
            .finish_non_exhaustive()
    }
}

/// Resolved descendants-context derivation of a container.
#[derive(Clone)]
pub struct DescendantsContext {
    create: DescendantsContextFn,
    needs_context: bool,
    uses_passed_context: bool,
}

impl DescendantsContext {
    fn resolve(custom: Option<(DescendantsContextFn, bool)>, uses_passed_context: bool) -> Self {
        match (custom, uses_passed_context) {
            (Some((create, needs_context)), true) => Self {
                create,
                needs_context,
                uses_passed_context,
            },
            (_, true) => Self {
                create: Rc::new(|_: Option<&Value>, context: &Context| context.clone()),
                needs_context: true,
                uses_passed_context,
            },
            (_, false) => Self {
                create: Rc::new(|_: Option<&Value>, _: &Context| Value::Null),
                needs_context: false,
                uses_passed_context,
            },
        }
    }

    fn none() -> Self {
        Self::resolve(None, false)
    }

    /// Compute the descendants context.
    #[must_use]
    pub fn create(&self, value: Option<&Value>, context: &Context) -> Context {
        (self.create)(value, context)
    }

    /// Whether a context change requires recomputation.
    #[inline]
    #[must_use]
    pub fn needs_context(&self) -> bool {
        self.needs_context
    }

    /// Whether any descendant reads the context handed down.
    #[inline]
    #[must_use]
    pub fn uses_passed_context(&self) -> bool {
        self.uses_passed_context
    }
}

impl std::fmt::Debug for DescendantsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescendantsContext")
            .field("needs_context", &self.needs_context)
            .field("uses_passed_context", &self.uses_passed_context)
            .finish_non_exhaustive()
    }
}

// ─── Configs ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct BasicConfig {
    pub validation: ValidationConfig,
}

#[derive(Debug)]
pub struct ObjectConfig {
    pub validation: ValidationConfig,
    fields: Vec<(String, ControlConfig)>,
    pub descendants: DescendantsContext,
}

impl ObjectConfig {
    /// Declared fields in declaration order.
    pub fn fields(&self) -> impl ExactSizeIterator<Item = (&str, &ControlConfig)> {
        self.fields.iter().map(|(name, config)| (name.as_str(), config))
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&ControlConfig> {
        self.fields
            .iter()
            .find_map(|(key, config)| (key == name).then_some(config))
    }

    /// Whether the object has a value even when all fields are empty.
    #[inline]
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.validation.no_value_error.is_some()
    }
}

#[derive(Debug)]
pub struct ArrayConfig {
    pub validation: ValidationConfig,
    pub item: ControlConfig,
    pub descendants: DescendantsContext,
}

/// Configuration of one control position.
#[derive(Debug, Clone)]
pub enum ControlConfig {
    Basic(Rc<BasicConfig>),
    Object(Rc<ObjectConfig>),
    Array(Rc<ArrayConfig>),
}

impl ControlConfig {
    #[must_use]
    pub fn basic() -> BasicBuilder {
        BasicBuilder::default()
    }

    #[must_use]
    pub fn object() -> ObjectBuilder {
        ObjectBuilder::default()
    }

    #[must_use]
    pub fn array(item: ControlConfig) -> ArrayBuilder {
        ArrayBuilder {
            validation: ValidationConfig::default(),
            item,
            descendants: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ControlKind {
        match self {
            Self::Basic(_) => ControlKind::Basic,
            Self::Object(_) => ControlKind::Object,
            Self::Array(_) => ControlKind::Array,
        }
    }

    #[must_use]
    pub fn validation(&self) -> &ValidationConfig {
        match self {
            Self::Basic(c) => &c.validation,
            Self::Object(c) => &c.validation,
            Self::Array(c) => &c.validation,
        }
    }

    /// Descendants-context derivation; leaves hand nothing down.
    #[must_use]
    pub fn descendants(&self) -> DescendantsContext {
        match self {
            Self::Basic(_) => DescendantsContext::none(),
            Self::Object(c) => c.descendants.clone(),
            Self::Array(c) => c.descendants.clone(),
        }
    }

    #[inline]
    #[must_use]
    pub fn uses_context(&self) -> bool {
        self.validation().uses_context
    }

    /// Whether this control or any of its descendants reads context.
    #[must_use]
    pub fn reads_context(&self) -> bool {
        self.uses_context() || self.descendants_use_passed_context()
    }

    #[must_use]
    pub fn descendants_use_passed_context(&self) -> bool {
        match self {
            Self::Basic(_) => false,
            Self::Object(c) => c.descendants.uses_passed_context,
            Self::Array(c) => c.descendants.uses_passed_context,
        }
    }

    /// Config of object field `name`.
    #[must_use]
    pub fn field_config(&self, name: &str) -> Option<&ControlConfig> {
        match self {
            Self::Object(c) => c.field(name),
            _ => None,
        }
    }

    /// Config shared by all items of an array.
    #[must_use]
    pub fn item_config(&self) -> Option<&ControlConfig> {
        match self {
            Self::Array(c) => Some(&c.item),
            _ => None,
        }
    }

    /// A copy of this config with `uses_context` turned off.
    ///
    /// The form root validates against nothing, whatever it was configured
    /// with.
    #[must_use]
    pub fn without_own_context(&self) -> Self {
        match self {
            Self::Basic(c) => Self::Basic(Rc::new(BasicConfig {
                validation: ValidationConfig {
                    uses_context: false,
                    ..c.validation.clone()
                },
            })),
            Self::Object(c) => Self::Object(Rc::new(ObjectConfig {
                validation: ValidationConfig {
                    uses_context: false,
                    ..c.validation.clone()
                },
                fields: c.fields.clone(),
                descendants: c.descendants.clone(),
            })),
            Self::Array(c) => Self::Array(Rc::new(ArrayConfig {
                validation: ValidationConfig {
                    uses_context: false,
                    ..c.validation.clone()
                },
                item: c.item.clone(),
                descendants: c.descendants.clone(),
            })),
        }
    }
}

// ─── Builders ────────────────────────────────────────────────────────────────

macro_rules! validation_setters {
    () => {
        /// Synchronous validator.
        #[must_use]
        pub fn validate<F>(mut self, validate: F) -> Self
        where
            F: Fn(Option<&Value>, &Context) -> Validation + 'static,
        {
            self.validation.validate = Rc::new(validate);
            self
        }

        /// Asynchronous validator; the returned future is polled by the
        /// validation queue.
        #[must_use]
        pub fn validate_async<F, Fut>(mut self, validate: F) -> Self
        where
            F: Fn(Option<&Value>, &Context) -> Fut + 'static,
            Fut: Future<Output = Option<ControlError>> + 'static,
        {
            self.validation.validate = Rc::new(move |value: Option<&Value>, context: &Context| {
                Validation::pending(validate(value, context))
            });
            self
        }

        /// Error reported, without calling the validator, while the value is
        /// missing.
        #[must_use]
        pub fn no_value_error(mut self, error: ControlError) -> Self {
            self.validation.no_value_error = Some(error);
            self
        }

        /// Delay validation until changes settle for `debounce`.
        #[must_use]
        pub fn debounce(mut self, debounce: Duration) -> Self {
            self.validation.debounce = debounce;
            self
        }

        /// Pass the control's context to its validator.
        #[must_use]
        pub fn uses_context(mut self) -> Self {
            self.validation.uses_context = true;
            self
        }
    };
}

#[derive(Default)]
#[must_use]
pub struct BasicBuilder {
    validation: ValidationConfig,
}

impl BasicBuilder {
    validation_setters!();

    pub fn build(self) -> ControlConfig {
        ControlConfig::Basic(Rc::new(BasicConfig {
            validation: self.validation,
        }))
    }
}

#[derive(Default)]
#[must_use]
pub struct ObjectBuilder {
    validation: ValidationConfig,
    fields: Vec<(String, ControlConfig)>,
    descendants: Option<(DescendantsContextFn, bool)>,
}

impl ObjectBuilder {
    validation_setters!();

    /// Declare field `name`. Redeclaring a name replaces its config and keeps
    /// its position.
    pub fn field(mut self, name: impl Into<String>, config: ControlConfig) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = config,
            None => self.fields.push((name, config)),
        }
        self
    }

    /// Custom descendants context. `needs_context` declares whether the
    /// function reads the object's own context.
    pub fn descendants_context<F>(mut self, create: F, needs_context: bool) -> Self
    where
        F: Fn(Option<&Value>, &Context) -> Context + 'static,
    {
        self.descendants = Some((Rc::new(create), needs_context));
        self
    }

    pub fn build(self) -> ControlConfig {
        let uses_passed_context = self.fields.iter().any(|(_, config)| config.reads_context());
        ControlConfig::Object(Rc::new(ObjectConfig {
            validation: self.validation,
            fields: self.fields,
            descendants: DescendantsContext::resolve(self.descendants, uses_passed_context),
        }))
    }
}

#[must_use]
pub struct ArrayBuilder {
    validation: ValidationConfig,
    item: ControlConfig,
    descendants: Option<(DescendantsContextFn, bool)>,
}

impl ArrayBuilder {
    validation_setters!();

    /// Custom descendants context handed to every item.
    pub fn descendants_context<F>(mut self, create: F, needs_context: bool) -> Self
    where
        F: Fn(Option<&Value>, &Context) -> Context + 'static,
    {
        self.descendants = Some((Rc::new(create), needs_context));
        self
    }

    pub fn build(self) -> ControlConfig {
        let uses_passed_context = self.item.reads_context();
        ControlConfig::Array(Rc::new(ArrayConfig {
            validation: self.validation,
            item: self.item,
            descendants: DescendantsContext::resolve(self.descendants, uses_passed_context),
        }))
    }
}
