pub mod provider;
pub mod providers;
pub mod registry;
pub mod types;

use serde_json::Value;

const OMITTED: &str = "<omitted_base64_image>";

/// Copy of a request body with image payloads replaced, for logging only.
/// The request itself still carries the real data.
pub fn redact_images(body: &Value) -> String {
    let mut log_body = body.clone();
    redact(&mut log_body);
    serde_json::to_string(&log_body).unwrap_or_default()
}

fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let is_base64_source = map.get("type").and_then(Value::as_str) == Some("base64");
            for (key, v) in map.iter_mut() {
                match v {
                    Value::String(s) if key == "image_url" && s.starts_with("data:") => {
                        *s = OMITTED.to_string();
                    }
                    Value::String(s) if key == "data" && is_base64_source => {
                        *s = OMITTED.to_string();
                    }
                    _ => redact(v),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}
