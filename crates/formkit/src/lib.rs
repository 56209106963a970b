#![forbid(unsafe_code)]

//! Reactive form state: fields, groups, arrays, validation and behaviors.
//!
//! A form is a tree of nodes built once from a [`GroupSchema`]:
//!
//! - [`FieldNode`]: one value with touched/dirty flags, a validation status
//!   and an error list.
//! - [`GroupNode`]: named children whose value and status are derived.
//! - [`ArrayNode`]: an ordered list of groups sharing one template, with
//!   stable item identities.
//!
//! Every piece of state is a [`formkit_reactive`] cell, so a renderer can
//! subscribe to exactly what it draws. Cross-field logic is declared as
//! behavior rules (compute, watch, enable-when, copy-to, revalidate-when,
//! reset-when) and validators, both registered against [`Path`]
//! descriptors.
//!
//! # Example
//!
//! ```
//! use formkit::{FieldSchema, FormConfig, GroupNode, GroupSchema};
//! use serde_json::json;
//!
//! let schema = GroupSchema::new()
//!     .field("a", FieldSchema::new(json!(0)))
//!     .field("b", FieldSchema::new(json!(0)))
//!     .field("sum", FieldSchema::new(json!(0)))
//!     .behaviors(|b| {
//!         b.compute(["a", "b"], "sum", |v| {
//!             json!(v[0].as_i64().unwrap_or(0) + v[1].as_i64().unwrap_or(0))
//!         });
//!     })
//!     .unwrap();
//!
//! let form = GroupNode::create(&schema, FormConfig::default()).unwrap();
//! form.field("a").unwrap().set_value(json!(3));
//! form.field("b").unwrap().set_value(json!(4));
//! assert_eq!(form.value()["sum"], json!(7));
//! ```
//!
//! # Threading
//!
//! Everything is single-threaded (`Rc`). Asynchronous validators and
//! debounced watchers run on the form's [`Executor`]; the default
//! [`TokioExecutor`] needs a `tokio::task::LocalSet`.
//!
//! # Diagnostics
//!
//! The crate logs through `tracing` and never installs a subscriber. Usage
//! mistakes (unknown paths, rejected member writes) are `warn!` events on
//! target `formkit::usage`, emitted only when
//! [`FormConfig::dev_warnings`] is set.

pub mod behavior;
pub mod config;
pub mod error;
pub mod node;
pub mod path;
pub mod runtime;
pub mod schema;
pub mod validation;

pub use behavior::{
    BehaviorBinding, BehaviorContext, BehaviorKind, BehaviorRule, BehaviorSchema, BindingInfo,
    CopyOptions, ToggleOptions, WatchOptions,
};
pub use config::FormConfig;
pub use error::{FormError, Result};
pub use node::access::{Member, MemberAccess};
pub use node::{
    ArrayNode, FieldNode, FieldRegistry, FieldStatus, FormNode, GroupNode, NodeId, NodeKind,
    SetValueOptions, UpdateOn, WeakNode,
};
pub use path::{Anchor, Path, Segment};
pub use runtime::{Executor, FormRuntime, TokioExecutor};
pub use schema::{ArraySchema, FieldSchema, GroupSchema, NodeSchema};
pub use validation::{
    AsyncValidator, ValidationContext, ValidationError, ValidationSchema, Validator,
    async_validator, fallible_async_validator, validator,
};

pub use formkit_reactive as reactive;
