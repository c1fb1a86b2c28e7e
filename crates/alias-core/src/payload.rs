// Tool payload normalization
//
// Engine tool arguments and results often arrive with JSON encoded as
// strings, sometimes nested several levels deep. These helpers normalize
// such values into canonical JSON strings that web clients can parse
// without guessing. Every parse failure degrades to the original string;
// nothing here fails a stream.

use serde_json::Value;

/// Recursively parse JSON-looking strings into structured values.
///
/// A string is only attempted when it looks like an object or array after
/// trimming; on parse failure it is kept as a plain string.
pub fn try_deep_parse(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            let looks_structured = (trimmed.starts_with('{') && trimmed.ends_with('}'))
                || (trimmed.starts_with('[') && trimmed.ends_with(']'));
            if looks_structured {
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(parsed) => try_deep_parse(parsed),
                    Err(_) => Value::String(s),
                }
            } else {
                Value::String(s)
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(try_deep_parse).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, val)| (key, try_deep_parse(val)))
                .collect(),
        ),
        other => other,
    }
}

/// Serialize a value into a canonical JSON string after deep normalization.
///
/// `null` renders as `{}` so clients always receive a parseable object.
pub fn canonical_json_string(value: Value) -> String {
    let parsed = try_deep_parse(value);
    if parsed.is_null() {
        return "{}".to_string();
    }
    serde_json::to_string(&parsed).unwrap_or_else(|_| "{}".to_string())
}

/// Extract the nested `output` object from an engine tool-result payload.
///
/// The engine wraps tool results as a JSON array whose first element holds
/// an `output` key. Anything that does not match that shape falls back to
/// the raw string.
pub fn extract_tool_output(content: &str) -> Value {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(content) {
        if let Some(first) = items.first() {
            if let Some(output) = first.get("output") {
                return output.clone();
            }
        }
    }
    Value::String(content.to_string())
}
