//! Field-by-field merging of configuration layers.

use serde_json::Value;

/// Merge `overlay` into `base` in place.
///
/// Mappings merge key by key. Any other overlay value (sequence, scalar)
/// replaces the base value outright, except `null`, which means "not set
/// here" and keeps the base.
///
/// ```
/// use serde_json::json;
/// use cms_import::config::deep_merge;
///
/// let mut base = json!({ "import": { "strategy": "merge", "sample_limit": 5 } });
/// deep_merge(&mut base, json!({ "import": { "strategy": "replace" } }));
/// assert_eq!(base, json!({ "import": { "strategy": "replace", "sample_limit": 5 } }));
/// ```
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Null => {}
        Value::Object(entries) => {
            if !base.is_object() {
                *base = Value::Object(serde_json::Map::new());
            }
            if let Value::Object(target) = base {
                for (key, value) in entries {
                    if value.is_null() {
                        continue;
                    }
                    deep_merge(target.entry(key).or_insert(Value::Null), value);
                }
            }
        }
        other => *base = other,
    }
}

/// Merge layers in order; later layers win.
pub fn merge_layers(layers: impl IntoIterator<Item = Value>) -> Value {
    let mut merged = Value::Null;
    for layer in layers {
        deep_merge(&mut merged, layer);
    }
    merged
}
