//! Parsing of repeated `--param` and `--header` values.

use anyhow::{bail, Result};
use std::collections::BTreeMap;

/// `KEY=VALUE` pairs. A value that parses as JSON is taken as JSON
/// (`pages=3`, `tags=["a","b"]`); anything else is a string.
pub fn parse_params(raw: &[String]) -> Result<BTreeMap<String, serde_json::Value>> {
    let mut out = BTreeMap::new();
    for item in raw {
        let Some((key, value)) = item.split_once('=') else {
            bail!("parameter '{}' is not KEY=VALUE", item);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("parameter '{}' has an empty key", item);
        }
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        out.insert(key.to_string(), value);
    }
    Ok(out)
}

/// `Name: value` pairs.
pub fn parse_headers(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|item| match item.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), value.trim().to_string()))
            }
            _ => bail!("header '{}' is not 'Name: value'", item),
        })
        .collect()
}
