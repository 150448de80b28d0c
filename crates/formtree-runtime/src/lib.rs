#![forbid(unsafe_code)]

//! Control tree runtime for formtree.
//!
//! # Overview
//!
//! A form is a tree of controls built from a [`ControlConfig`]. Every
//! control is an immutable snapshot ([`Control`]); user actions record
//! pending changes, and one [`ControlHandle::apply_update`] at the root
//! produces the next snapshot, sharing every subtree that did not change.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`Validator`] | Per-control validation with debounce, caching and async results |
//! | [`ValidationQueue`] | Polls debounced and async validation to completion |
//! | [`ControlUpdate`] | Partial update routed down the tree |
//! | [`ControlHandle`] | Owner of a tree; applies updates |
//! | [`FormRoot`] | Handle plus scheduling, resets and server error routing |
//!
//! [`ControlConfig`]: formtree_core::ControlConfig

mod comparator;
pub mod control;
mod core;
pub mod factory;
pub mod form;
pub mod queue;
mod store;
pub mod update;
pub mod validator;

pub use control::{ArrayControl, ArrayItem, BasicControl, Control, NodeState, ObjectControl, SetValueOptions};
pub use factory::{ChangeListener, ControlHandle, CreateControl, ValidValue, create_control};
pub use form::{FormOptions, FormRoot, ResetOptions};
pub use queue::{ValidationQueue, ValidationTask};
pub use store::ItemId;
pub use update::{ControlUpdate, ItemsUpdate};
pub use validator::{Validator, ValidatorInput, ValidatorPoll, ValidatorState};
