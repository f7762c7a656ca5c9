// src/watch/unstructured.rs

//! Typed access to untyped repository objects
//!
//! Cluster-managed repository objects arrive as JSON trees. The accessors here
//! distinguish a missing field (`Ok(None)`) from a field of the wrong type
//! (`Err`), and the helpers below lift the fields the cache needs into a
//! [`Repo`].

use crate::error::{Error, Result};
use crate::models::Repo;
use serde_json::Value;

/// Walk `path` through nested objects
pub fn nested<'a>(obj: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(obj, |current, field| current.as_object()?.get(*field))
}

/// Read a string field; `Ok(None)` when absent or null
pub fn nested_str<'a>(obj: &'a Value, path: &[&str]) -> Result<Option<&'a str>> {
    match nested(obj, path) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(wrong_type(path, "string", other)),
    }
}

/// Read a list field; `Ok(None)` when absent or null
pub fn nested_slice<'a>(obj: &'a Value, path: &[&str]) -> Result<Option<&'a [Value]>> {
    match nested(obj, path) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(other) => Err(wrong_type(path, "list", other)),
    }
}

fn wrong_type(path: &[&str], expected: &str, found: &Value) -> Error {
    let kind = match found {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    };
    Error::ParseError(format!(
        "Field {} is a {}, expected a {}",
        path.join("."),
        kind,
        expected
    ))
}

/// Name of a repository object from `metadata.name`
pub fn repo_name(obj: &Value) -> Result<&str> {
    nested_str(obj, &["metadata", "name"])?
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::ParseError("Required field metadata.name not found".to_string()))
}

/// Repository identity of an object
pub fn repo_from_object(obj: &Value) -> Result<Repo> {
    let name = repo_name(obj)?;
    let namespace = nested_str(obj, &["metadata", "namespace"])?.unwrap_or_default();
    let url = nested_str(obj, &["spec", "url"])?.unwrap_or_default();
    Ok(Repo::new(name, namespace, url))
}

/// Whether `status.conditions` holds a `Ready` condition with status `True`
pub fn is_repo_ready(obj: &Value) -> Result<bool> {
    let Some(conditions) = nested_slice(obj, &["status", "conditions"])? else {
        return Ok(false);
    };

    for condition in conditions {
        let kind = nested_str(condition, &["type"])?;
        if kind == Some("Ready") {
            return Ok(nested_str(condition, &["status"])? == Some("True"));
        }
    }
    Ok(false)
}

/// Index URL published in `status.url`
pub fn status_url(obj: &Value) -> Result<Option<&str>> {
    Ok(nested_str(obj, &["status", "url"])?.filter(|url| !url.trim().is_empty()))
}
