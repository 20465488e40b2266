//! Applying a parameter combination to a base strategy configuration.
//!
//! Two key shapes are understood:
//!
//! - `strategy.parameters.<name>` upserts `{ "key": <name>, "value": <v> }` in the
//!   `strategy.parameters` list.
//! - Any other key is a dotted path. Object segments are created on demand and
//!   numeric segments index into lists, which grow as needed.

use serde_json::{Map, Value};

use crate::domain::optimization::errors::ValidationError;
use crate::domain::optimization::value_objects::Combination;

/// Key prefix addressing an entry of the strategy parameter list.
pub const STRATEGY_PARAMETER_PREFIX: &str = "strategy.parameters.";

/// Build a patched copy of `base` for one combination.
///
/// `base` is never modified. Keys are applied in sorted order.
pub fn patch_config(base: &Value, combination: &Combination) -> Result<Value, ValidationError> {
    let mut config = match base {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };

    for (key, value) in combination {
        match key.strip_prefix(STRATEGY_PARAMETER_PREFIX) {
            Some(name) if !name.is_empty() => {
                upsert_strategy_parameter(&mut config, key, name, value.clone())?;
            }
            _ => assign_path(&mut config, key, value.clone())?,
        }
    }

    Ok(config)
}

fn upsert_strategy_parameter(
    config: &mut Value,
    key: &str,
    name: &str,
    value: Value,
) -> Result<(), ValidationError> {
    let strategy = child_object(config, "strategy", key)?;
    let parameters = strategy
        .entry("parameters")
        .or_insert_with(|| Value::Array(Vec::new()));
    if parameters.is_null() {
        *parameters = Value::Array(Vec::new());
    }

    let Value::Array(entries) = parameters else {
        return Err(invalid(key, "strategy.parameters is not a list"));
    };

    let existing = entries
        .iter_mut()
        .filter_map(Value::as_object_mut)
        .find(|entry| entry.get("key").and_then(Value::as_str) == Some(name));

    match existing {
        Some(entry) => {
            entry.insert("value".to_string(), value);
        }
        None => {
            let mut entry = Map::new();
            entry.insert("key".to_string(), Value::String(name.to_string()));
            entry.insert("value".to_string(), value);
            entries.push(Value::Object(entry));
        }
    }

    Ok(())
}

fn assign_path(config: &mut Value, key: &str, value: Value) -> Result<(), ValidationError> {
    let segments: Vec<&str> = key.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(invalid(key, "empty path segment"));
    }

    let Some((last, parents)) = segments.split_last() else {
        return Err(invalid(key, "empty path"));
    };

    let mut cursor = config;
    for segment in parents {
        cursor = descend(cursor, segment, key)?;
    }

    if cursor.is_null() {
        *cursor = Value::Object(Map::new());
    }

    match cursor {
        Value::Object(map) => {
            map.insert((*last).to_string(), value);
        }
        Value::Array(items) => {
            let index = list_index(last, key)?;
            if items.len() <= index {
                items.resize(index + 1, Value::Null);
            }
            items[index] = value;
        }
        _ => return Err(invalid(key, "path walks through a scalar value")),
    }

    Ok(())
}

/// Step one segment down, creating an empty object where nothing exists yet.
fn descend<'a>(
    cursor: &'a mut Value,
    segment: &str,
    key: &str,
) -> Result<&'a mut Value, ValidationError> {
    if cursor.is_null() {
        *cursor = Value::Object(Map::new());
    }

    match cursor {
        Value::Object(map) => {
            let child = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            Ok(child)
        }
        Value::Array(items) => {
            let index = list_index(segment, key)?;
            if items.len() <= index {
                items.resize(index + 1, Value::Object(Map::new()));
            }
            Ok(&mut items[index])
        }
        _ => Err(invalid(key, "path walks through a scalar value")),
    }
}

fn child_object<'a>(
    config: &'a mut Value,
    name: &str,
    key: &str,
) -> Result<&'a mut Map<String, Value>, ValidationError> {
    let Value::Object(root) = config else {
        return Err(invalid(key, "configuration root is not an object"));
    };
    let child = root
        .entry(name.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if child.is_null() {
        *child = Value::Object(Map::new());
    }
    child
        .as_object_mut()
        .ok_or_else(|| invalid(key, &format!("{name} is not an object")))
}

fn list_index(segment: &str, key: &str) -> Result<usize, ValidationError> {
    segment
        .parse::<usize>()
        .map_err(|_| invalid(key, &format!("'{segment}' is not a list index")))
}

fn invalid(key: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidPatch {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
