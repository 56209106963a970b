//! Built-in validators.
//!
//! Codes follow the conventional camelCase names (`required`, `minLength`,
//! `maxLength`, `min`, `max`, `pattern`, `email`) so renderers can map them
//! to localized messages. Every validator except `required` passes on an
//! empty value; combine with `required` to demand presence.

use std::rc::Rc;

use regex::Regex;
use serde_json::{Value, json};

use super::{ValidationError, Validator};

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

/// Fails on `null`, `""` and `[]`.
pub fn required() -> Validator {
    Rc::new(|value, _| {
        is_empty(value).then(|| ValidationError::new("required", "This field is required"))
    })
}

pub fn min_length(min: usize) -> Validator {
    Rc::new(move |value, _| {
        let actual = length_of(value).filter(|len| *len > 0)?;
        (actual < min).then(|| {
            ValidationError::new("minLength", format!("Must be at least {min} characters"))
                .with_params(json!({ "required_length": min, "actual_length": actual }))
        })
    })
}

pub fn max_length(max: usize) -> Validator {
    Rc::new(move |value, _| {
        let actual = length_of(value)?;
        (actual > max).then(|| {
            ValidationError::new("maxLength", format!("Must be at most {max} characters"))
                .with_params(json!({ "required_length": max, "actual_length": actual }))
        })
    })
}

pub fn min(min: f64) -> Validator {
    Rc::new(move |value, _| {
        let actual = value.as_f64()?;
        (actual < min).then(|| {
            ValidationError::new("min", format!("Must be at least {min}"))
                .with_params(json!({ "min": min, "actual": actual }))
        })
    })
}

pub fn max(max: f64) -> Validator {
    Rc::new(move |value, _| {
        let actual = value.as_f64()?;
        (actual > max).then(|| {
            ValidationError::new("max", format!("Must be at most {max}"))
                .with_params(json!({ "max": max, "actual": actual }))
        })
    })
}

/// String values must match `regex` (anchor it yourself for full matches).
pub fn pattern(regex: Regex) -> Validator {
    Rc::new(move |value, _| {
        let text = value.as_str().filter(|s| !s.is_empty())?;
        (!regex.is_match(text)).then(|| {
            ValidationError::new("pattern", "Invalid format")
                .with_params(json!({ "pattern": regex.as_str() }))
        })
    })
}

pub fn email() -> Validator {
    Rc::new(|value, _| {
        let text = value.as_str().filter(|s| !s.is_empty())?;
        (!looks_like_email(text)).then(|| ValidationError::new("email", "Invalid email address"))
    })
}

fn looks_like_email(text: &str) -> bool {
    if text.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = text.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, _)| !host.is_empty())
        && !domain.ends_with('.')
}

/// Replace the message of whatever error `inner` produces.
pub fn with_message(inner: Validator, message: impl Into<String>) -> Validator {
    let message = message.into();
    Rc::new(move |value, ctx| {
        inner(value, ctx).map(|mut err| {
            err.message.clone_from(&message);
            err
        })
    })
}
