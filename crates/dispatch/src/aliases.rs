//! Deprecation and alias layer.
//!
//! A fixed table maps legacy tool names onto canonical
//! `(tool, operation)` pairs. Resolution happens as the dispatcher's first
//! step; downstream code only ever sees canonical names. Deprecated names
//! stay callable but are hidden from listings unless explicitly requested.

use serde_json::Value;

/// `(deprecated_name, canonical_tool, operation)`.
pub const ALIAS_TABLE: &[(&str, &str, &str)] = &[
    ("fetch", "web", "fetch"),
    ("browser", "web", "browser"),
    ("code_symbols", "code", "symbols"),
    ("code_search", "code", "search"),
    ("remember", "memory", "store"),
    ("recall", "memory", "search"),
    ("think", "reason", "think"),
];

/// Resolve a possibly-deprecated tool name.
///
/// For an alias, the canonical name is returned and the mapped `operation`
/// is injected into the arguments (an explicit `operation` supplied by the
/// caller is preserved). Canonical names pass through untouched.
pub fn resolve(name: &str, mut args: Value) -> (String, Value) {
    for (alias, canonical, operation) in ALIAS_TABLE {
        if *alias == name {
            tracing::debug!(alias = %name, canonical = %canonical, "deprecated tool name resolved");
            if let Some(map) = args.as_object_mut() {
                map.entry("operation")
                    .or_insert_with(|| Value::String(operation.to_string()));
            }
            return (canonical.to_string(), args);
        }
    }
    (name.to_string(), args)
}

/// Whether `name` is a deprecated alias.
pub fn is_alias(name: &str) -> bool {
    ALIAS_TABLE.iter().any(|(alias, _, _)| *alias == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_pass_through() {
        let (name, args) = resolve("memory", serde_json::json!({"operation": "search"}));
        assert_eq!(name, "memory");
        assert_eq!(args["operation"], "search");
    }

    #[test]
    fn alias_injects_operation() {
        let (name, args) = resolve("fetch", serde_json::json!({"url": "https://example.com"}));
        assert_eq!(name, "web");
        assert_eq!(args["operation"], "fetch");
        assert_eq!(args["url"], "https://example.com");
    }

    #[test]
    fn alias_preserves_explicit_operation() {
        let (name, args) = resolve("recall", serde_json::json!({"operation": "get", "id": 3}));
        assert_eq!(name, "memory");
        assert_eq!(args["operation"], "get");
    }

    #[test]
    fn every_alias_maps_to_a_canonical_tool() {
        const CANONICAL: [&str; 14] = [
            "memory", "file", "terminal", "web", "code", "reason", "cognitive",
            "meta", "knowledge", "onboard", "autonomous", "orchestrate",
            "awakening_status", "tool_usage",
        ];
        for (alias, canonical, operation) in ALIAS_TABLE {
            assert!(CANONICAL.contains(canonical), "{alias} maps to unknown {canonical}");
            assert!(!operation.is_empty());
        }
    }
}
