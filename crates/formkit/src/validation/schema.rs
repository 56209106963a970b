use std::future::Future;

use regex::Regex;
use serde_json::Value;

use super::{
    AsyncValidator, ValidationContext, ValidationError, Validator, async_validator, validators,
};
use crate::path::Path;

pub(crate) enum Registration {
    Sync(Path, Validator),
    Async(Path, AsyncValidator),
}

/// Collects validator registrations against paths of a schema.
///
/// Passed to the closure given to
/// [`GroupSchema::validation`](crate::GroupSchema::validation). A path naming
/// a field attaches a field validator; a path naming a group attaches a
/// group-level validator over the group's value. Paths through an array
/// (`items[*].qty`) attach to the item template, so items pushed later carry
/// the validator too.
#[derive(Default)]
pub struct ValidationSchema {
    entries: Vec<Registration>,
}

impl ValidationSchema {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn into_entries(self) -> Vec<Registration> {
        self.entries
    }

    pub fn add(&mut self, path: impl Into<Path>, validator: Validator) -> &mut Self {
        self.entries.push(Registration::Sync(path.into(), validator));
        self
    }

    pub fn add_async(&mut self, path: impl Into<Path>, validator: AsyncValidator) -> &mut Self {
        self.entries.push(Registration::Async(path.into(), validator));
        self
    }

    /// Register a closure validator.
    pub fn validate(
        &mut self,
        path: impl Into<Path>,
        f: impl Fn(&Value, &ValidationContext) -> Option<ValidationError> + 'static,
    ) -> &mut Self {
        self.add(path, super::validator(f))
    }

    /// Register an async closure validator.
    pub fn validate_async<F, Fut>(&mut self, path: impl Into<Path>, f: F) -> &mut Self
    where
        F: Fn(Value, ValidationContext) -> Fut + 'static,
        Fut: Future<Output = Option<ValidationError>> + 'static,
    {
        self.add_async(path, async_validator(f))
    }

    pub fn required(&mut self, path: impl Into<Path>) -> &mut Self {
        self.add(path, validators::required())
    }

    pub fn email(&mut self, path: impl Into<Path>) -> &mut Self {
        self.add(path, validators::email())
    }

    pub fn min_length(&mut self, path: impl Into<Path>, min: usize) -> &mut Self {
        self.add(path, validators::min_length(min))
    }

    pub fn max_length(&mut self, path: impl Into<Path>, max: usize) -> &mut Self {
        self.add(path, validators::max_length(max))
    }

    pub fn min(&mut self, path: impl Into<Path>, min: f64) -> &mut Self {
        self.add(path, validators::min(min))
    }

    pub fn max(&mut self, path: impl Into<Path>, max: f64) -> &mut Self {
        self.add(path, validators::max(max))
    }

    pub fn pattern(&mut self, path: impl Into<Path>, regex: Regex) -> &mut Self {
        self.add(path, validators::pattern(regex))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
