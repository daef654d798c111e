//! Built-in defaults (first layer)

use serde_json::Value;

use super::ClientConfig;

/// Default repository endpoint
pub const DEFAULT_BASE_URL: &str = "http://localhost:24610";

/// The built-in layer as a JSON object.
pub fn builtin_defaults() -> Value {
    serde_json::to_value(ClientConfig::default()).unwrap_or(Value::Null)
}
