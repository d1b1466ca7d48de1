//! Bodies of the 14 public tools. Each handler implements an
//! `operation`-keyed sub-dispatch table behind the [`ToolHandler`] seam;
//! shared state enters only through the collaborators a handler is
//! constructed with.

pub mod code;
pub mod cognitive;
pub mod files;
pub mod knowledge;
pub mod memory;
pub mod meta;
pub mod ops;
pub mod reason;
pub mod status;
pub mod terminal;
pub mod web;

use serde_json::Value;

use mimo_domain::error::{Error, Result};

pub use mimo_dispatch::ToolHandler;

/// Extract the `operation` argument (validated upstream, re-checked here).
pub(crate) fn operation(args: &Value) -> Result<&str> {
    args.get("operation")
        .and_then(|o| o.as_str())
        .ok_or_else(|| Error::InvalidArguments("missing required argument 'operation'".into()))
}

/// Extract a required string argument.
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidArguments(format!("missing required argument '{key}'")))
}

/// Extract an optional string argument.
pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

/// Extract a required integer id.
pub(crate) fn required_id(args: &Value, key: &str) -> Result<i64> {
    args.get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| Error::InvalidArguments(format!("missing required argument '{key}'")))
}

/// Standard success envelope shared by every handler.
pub(crate) fn success(data: Value) -> Value {
    serde_json::json!({ "status": "success", "data": data })
}
