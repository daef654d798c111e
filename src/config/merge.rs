//! Layer merging
//!
//! Objects merge key by key; arrays and scalars from the later layer
//! replace earlier ones.

use serde_json::Value;

/// Merge `overlay` onto `base`.
///
/// A `null` in the overlay replaces the base value, so a later layer can
/// clear an optional setting such as `user`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut merged), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let value = match merged.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                merged.insert(key, value);
            }
            Value::Object(merged)
        }
        (_, overlay) => overlay,
    }
}

/// Merge layers in order; later layers take precedence.
pub fn merge_layers(layers: impl IntoIterator<Item = Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}
