//! Submission-time validation of raw parameter values.

use std::collections::{BTreeMap, BTreeSet};

use super::{ParamDecl, ParamSpec, ParamValue};
use crate::error::EngineError;

/// Validate `raw` against `decls`, filling declared defaults.
///
/// Undeclared keys, missing values without a default, wrong JSON types,
/// out-of-range numbers and values outside an allowed list are all
/// `EngineError::Config`.
pub fn validate(
    decls: &[ParamDecl],
    raw: &BTreeMap<String, serde_json::Value>,
) -> Result<BTreeMap<String, ParamValue>, EngineError> {
    if let Some(unknown) = raw.keys().find(|k| !decls.iter().any(|d| &d.key == *k)) {
        return Err(EngineError::Config(format!("unknown parameter '{}'", unknown)));
    }

    let mut out = BTreeMap::new();
    for decl in decls {
        let value = match raw.get(&decl.key).or(decl.default.as_ref()) {
            Some(v) => v,
            None => {
                return Err(EngineError::Config(format!(
                    "missing required parameter '{}'",
                    decl.key
                )))
            }
        };
        let parsed = validate_one(&decl.spec, value).map_err(|reason| {
            EngineError::Config(format!("parameter '{}': {}", decl.key, reason))
        })?;
        out.insert(decl.key.clone(), parsed);
    }
    Ok(out)
}

fn validate_one(spec: &ParamSpec, value: &serde_json::Value) -> Result<ParamValue, String> {
    match spec {
        ParamSpec::Int { min, max } => {
            let v = value
                .as_i64()
                .ok_or_else(|| format!("expected an integer, got {}", value))?;
            check_range(v, *min, *max)?;
            Ok(ParamValue::Int(v))
        }
        ParamSpec::Float { min, max } => {
            let v = value
                .as_f64()
                .filter(|v| v.is_finite())
                .ok_or_else(|| format!("expected a number, got {}", value))?;
            check_range(v, *min, *max)?;
            Ok(ParamValue::Float(v))
        }
        ParamSpec::Bool => value
            .as_bool()
            .map(ParamValue::Bool)
            .ok_or_else(|| format!("expected a boolean, got {}", value)),
        ParamSpec::Option { allowed } => {
            let v = expect_str(value)?;
            if !allowed.iter().any(|a| a == v) {
                return Err(format!("'{}' is not one of {:?}", v, allowed));
            }
            Ok(ParamValue::Option(v.to_string()))
        }
        ParamSpec::MultiOption { allowed } => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("expected a list, got {}", value))?;
            let mut set = BTreeSet::new();
            for item in items {
                let v = expect_str(item)?;
                if !allowed.iter().any(|a| a == v) {
                    return Err(format!("'{}' is not one of {:?}", v, allowed));
                }
                set.insert(v.to_string());
            }
            Ok(ParamValue::MultiOption(set))
        }
        ParamSpec::Path => Ok(ParamValue::Path(expect_str(value)?.to_string())),
        ParamSpec::Text => Ok(ParamValue::Text(expect_str(value)?.to_string())),
    }
}

fn expect_str(value: &serde_json::Value) -> Result<&str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("expected a string, got {}", value))
}

fn check_range<T: PartialOrd + std::fmt::Display + Copy>(
    v: T,
    min: Option<T>,
    max: Option<T>,
) -> Result<(), String> {
    if let Some(min) = min {
        if v < min {
            return Err(format!("{} is below the minimum {}", v, min));
        }
    }
    if let Some(max) = max {
        if v > max {
            return Err(format!("{} is above the maximum {}", v, max));
        }
    }
    Ok(())
}
