//! JSON view of a script's global scope for crash snapshots.

use rhai::{Dynamic, Scope};

const MAX_VARIABLES: usize = 256;
const MAX_VALUE_CHARS: usize = 4096;
const REDACTED: &str = "<redacted>";
const SENSITIVE: [&str; 7] = [
    "token", "cookie", "auth", "password", "secret", "apikey", "api_key",
];

fn is_sensitive(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SENSITIVE.iter().any(|s| lower.contains(s))
}

fn truncate(mut value: String) -> String {
    if let Some((cut, _)) = value.char_indices().nth(MAX_VALUE_CHARS) {
        value.truncate(cut);
        value.push_str("...(truncated)");
    }
    value
}

/// Plain JSON for values that serialize and stay short; a truncated display
/// string for everything else.
fn render(value: &Dynamic) -> serde_json::Value {
    if value.is_string() {
        return serde_json::Value::String(truncate(value.to_string()));
    }
    match rhai::serde::from_dynamic::<serde_json::Value>(value) {
        Ok(json) if json.to_string().chars().count() <= MAX_VALUE_CHARS => json,
        _ => serde_json::Value::String(truncate(value.to_string())),
    }
}

/// Variables keyed by name; a shadowed name shows its latest value. Names
/// that look like credentials have their values replaced and long values
/// are truncated.
pub(crate) fn dump(scope: &Scope) -> serde_json::Value {
    let mut vars = serde_json::Map::new();
    for (name, _, _) in scope.iter_raw() {
        if vars.contains_key(name) {
            continue;
        }
        if vars.len() == MAX_VARIABLES {
            break;
        }
        let value = if is_sensitive(name) {
            serde_json::Value::String(REDACTED.to_string())
        } else {
            match scope.get(name) {
                Some(value) => render(value),
                None => continue,
            }
        };
        vars.insert(name.to_string(), value);
    }
    serde_json::Value::Object(vars)
}
