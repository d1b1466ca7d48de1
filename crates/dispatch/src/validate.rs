//! Argument validation ahead of any handler.
//!
//! Checks the JSON-Schema shape (object-ness, required fields, the
//! `operation` enum) and screens string payloads for dangerous patterns:
//! command substitution, env-var interpolation outside the allow-list,
//! and path traversal in path-like fields. Handlers re-validate within
//! their own domains; nothing dangerous may reach them in the first place.

use serde_json::Value;

use mimo_domain::error::{Error, Result};

/// Env names that may appear as `${NAME}` in arguments.
const ENV_ALLOWLIST: [&str; 2] = ["HOME", "PATH"];

/// Keys treated as filesystem paths for traversal screening.
const PATH_KEYS: [&str; 6] = ["path", "file", "dir", "directory", "source", "destination"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schema-shape validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate `args` against a JSON-Schema-shaped descriptor schema.
pub fn validate_args(schema: &Value, args: &Value) -> Result<()> {
    let Some(args_map) = args.as_object() else {
        return Err(Error::InvalidArguments("arguments must be an object".into()));
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required {
            let Some(name) = field.as_str() else { continue };
            if !args_map.contains_key(name) {
                return Err(Error::InvalidArguments(format!(
                    "missing required argument '{name}'"
                )));
            }
        }
    }

    // `operation` enum check for multi-op tools.
    if let Some(allowed) = schema
        .pointer("/properties/operation/enum")
        .and_then(|e| e.as_array())
    {
        match args_map.get("operation").and_then(|o| o.as_str()) {
            Some(operation) => {
                let known = allowed.iter().any(|a| a.as_str() == Some(operation));
                if !known {
                    return Err(Error::InvalidArguments(format!(
                        "unknown operation '{operation}'"
                    )));
                }
            }
            None => {
                return Err(Error::InvalidArguments(
                    "missing required argument 'operation'".into(),
                ));
            }
        }
    }

    screen_payload(args)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dangerous-pattern screening
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Recursively screen every string in the payload.
pub fn screen_payload(value: &Value) -> Result<()> {
    screen_inner(value, None)
}

fn screen_inner(value: &Value, key: Option<&str>) -> Result<()> {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                screen_inner(v, Some(k.as_str()))?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                screen_inner(item, key)?;
            }
            Ok(())
        }
        Value::String(s) => screen_string(s, key),
        _ => Ok(()),
    }
}

fn screen_string(s: &str, key: Option<&str>) -> Result<()> {
    if s.contains("$(") || s.contains('`') {
        return Err(Error::InvalidArguments(
            "command substitution is not allowed in arguments".into(),
        ));
    }

    if let Some(start) = s.find("${") {
        let rest = &s[start + 2..];
        let name: String = rest.chars().take_while(|c| c.is_ascii_alphanumeric() || *c == '_').collect();
        if !ENV_ALLOWLIST.contains(&name.as_str()) {
            return Err(Error::InvalidArguments(format!(
                "env interpolation of '{name}' is not allowed"
            )));
        }
    }

    if let Some(key) = key {
        if PATH_KEYS.contains(&key) {
            if s.split(['/', '\\']).any(|segment| segment == "..") {
                return Err(Error::InvalidArguments(format!(
                    "path traversal in '{key}' is not allowed"
                )));
            }
        }
    }

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sandbox write gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Whether `(tool, operation)` is write-side and therefore forbidden for
/// sandboxed callers.
pub fn is_write_side(tool: &str, operation: Option<&str>) -> bool {
    match tool {
        "terminal" => true,
        "memory" => matches!(
            operation,
            Some("store") | Some("update") | Some("delete") | Some("forget") | Some("protect")
        ),
        "file" => matches!(
            operation,
            Some("write") | Some("append") | Some("delete") | Some("move")
        ),
        "knowledge" => matches!(operation, Some("teach")),
        _ => false,
    }
}
