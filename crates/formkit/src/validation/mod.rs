//! Validation engine types.
//!
//! Validators are plain closures over the field value plus a
//! [`ValidationContext`] for cross-field reads and writes. Synchronous
//! validators all run (no short-circuit) and every non-`None` result is
//! kept. Only when none fired do the asynchronous validators run, all
//! concurrently.
//!
//! # Failure policy
//!
//! A backend failure inside an asynchronous validator means "cannot
//! determine validity". Wrap such validators with
//! [`fallible_async_validator`], which logs the failure and resolves as
//! valid so a transient outage never blocks form completion.

pub(crate) mod schema;
mod validators;

use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::{FormNode, GroupNode};
use crate::path::Path;
use crate::runtime::FormRuntime;

pub use schema::ValidationSchema;
pub use validators::{email, max, max_length, min, min_length, pattern, required, with_message};

/// One violated rule on a field or group.
///
/// Entries accumulate: a value violating three rules carries three entries.
/// The engine never deduplicates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl ValidationError {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            params: None,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

pub type Validator = Rc<dyn Fn(&Value, &ValidationContext) -> Option<ValidationError>>;

pub type AsyncValidator =
    Rc<dyn Fn(Value, ValidationContext) -> LocalBoxFuture<'static, Option<ValidationError>>>;

/// Wrap a closure as a [`Validator`].
pub fn validator(
    f: impl Fn(&Value, &ValidationContext) -> Option<ValidationError> + 'static,
) -> Validator {
    Rc::new(f)
}

/// Wrap an async closure as an [`AsyncValidator`].
pub fn async_validator<F, Fut>(f: F) -> AsyncValidator
where
    F: Fn(Value, ValidationContext) -> Fut + 'static,
    Fut: Future<Output = Option<ValidationError>> + 'static,
{
    Rc::new(move |value, ctx| f(value, ctx).boxed_local())
}

/// Wrap a fallible async closure. `Err` resolves as valid and is logged.
pub fn fallible_async_validator<F, Fut, E>(f: F) -> AsyncValidator
where
    F: Fn(Value, ValidationContext) -> Fut + 'static,
    Fut: Future<Output = Result<Option<ValidationError>, E>> + 'static,
    E: fmt::Display + 'static,
{
    Rc::new(move |value, ctx| {
        let path = ctx.path().clone();
        f(value, ctx)
            .map(move |outcome| match outcome {
                Ok(verdict) => verdict,
                Err(err) => {
                    tracing::warn!(
                        message = "validator.failed",
                        path = %path,
                        error = %err,
                        "async validator failed; treating value as valid"
                    );
                    None
                }
            })
            .boxed_local()
    })
}

/// What a validator can see besides the value: the form it belongs to.
///
/// Reads and writes go through the public node API of the root group; a
/// validator never touches another node's cells directly.
#[derive(Clone)]
pub struct ValidationContext {
    runtime: Rc<FormRuntime>,
    path: Path,
}

impl ValidationContext {
    pub(crate) fn new(runtime: Rc<FormRuntime>, path: Path) -> Self {
        Self { runtime, path }
    }

    /// Path of the node being validated, from the root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The root group of the form.
    #[must_use]
    pub fn form(&self) -> Option<GroupNode> {
        self.runtime.root()
    }

    /// Resolve `path` from the root (scope-anchored paths are read from the
    /// root too).
    #[must_use]
    pub fn node(&self, path: impl Into<Path>) -> Option<FormNode> {
        self.form()?.resolve(&path.into().anchored_at_scope())
    }

    /// Value at `path`, from the root.
    #[must_use]
    pub fn value(&self, path: impl Into<Path>) -> Option<Value> {
        self.node(path).map(|node| node.value())
    }

    /// Programmatic write to another node. Returns `false` when the path
    /// does not resolve.
    pub fn set_value(&self, path: impl Into<Path>, value: Value) -> bool {
        match self.node(path) {
            Some(node) => {
                node.set_value(value);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ValidationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationContext")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
