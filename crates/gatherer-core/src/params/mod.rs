//! Declared script parameters and their validated values.
//!
//! Sources declare a schema (`ParamDecl`); callers submit raw JSON. Validation
//! happens once, at submission, and produces closed `ParamValue` variants so a
//! script never sees a value of the wrong shape.

mod validate;

pub use validate::validate;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Declared shape of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ParamSpec {
    Int {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    Float {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    Bool,
    Option {
        allowed: Vec<String>,
    },
    MultiOption {
        allowed: Vec<String>,
    },
    Path,
    Text,
}

impl ParamSpec {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamSpec::Int { .. } => "int",
            ParamSpec::Float { .. } => "float",
            ParamSpec::Bool => "bool",
            ParamSpec::Option { .. } => "option",
            ParamSpec::MultiOption { .. } => "multi-option",
            ParamSpec::Path => "path",
            ParamSpec::Text => "text",
        }
    }
}

/// One declared parameter: the name the script sees and its schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub key: String,
    /// Display name for front ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub spec: ParamSpec,
    /// Used when the caller omits the parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// A validated parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Option(String),
    MultiOption(BTreeSet<String>),
    Path(String),
    Text(String),
}

impl ParamValue {
    /// Plain JSON form, as a caller would have submitted it.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParamValue::Int(v) => serde_json::Value::from(*v),
            ParamValue::Float(v) => serde_json::Value::from(*v),
            ParamValue::Bool(v) => serde_json::Value::from(*v),
            ParamValue::Option(v) | ParamValue::Path(v) | ParamValue::Text(v) => {
                serde_json::Value::from(v.as_str())
            }
            ParamValue::MultiOption(set) => {
                serde_json::Value::from(set.iter().cloned().collect::<Vec<_>>())
            }
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Option(v) | ParamValue::Path(v) | ParamValue::Text(v) => f.write_str(v),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decl_parses_from_toml() {
        #[derive(Deserialize)]
        struct Manifest {
            parameters: Vec<ParamDecl>,
        }
        let toml = r#"
            [[parameters]]
            key = "pages"
            type = "int"
            min = 1
            max = 50
            default = 3

            [[parameters]]
            key = "tags"
            name = "Tags"
            type = "multi-option"
            allowed = ["cat", "dog"]
        "#;
        let m: Manifest = toml::from_str(toml).unwrap();
        assert_eq!(m.parameters.len(), 2);
        assert_eq!(
            m.parameters[0].spec,
            ParamSpec::Int {
                min: Some(1),
                max: Some(50)
            }
        );
        assert_eq!(m.parameters[0].default, Some(serde_json::json!(3)));
        assert_eq!(m.parameters[1].spec.type_name(), "multi-option");
        assert_eq!(m.parameters[1].name.as_deref(), Some("Tags"));
    }

    #[test]
    fn value_persists_with_its_tag() {
        let v = ParamValue::Option("hd".into());
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json, serde_json::json!({"type": "option", "value": "hd"}));
        let back: ParamValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn to_json_is_plain() {
        let set: BTreeSet<String> = ["b".to_string(), "a".to_string()].into();
        assert_eq!(
            ParamValue::MultiOption(set).to_json(),
            serde_json::json!(["a", "b"])
        );
        assert_eq!(ParamValue::Int(7).to_json(), serde_json::json!(7));
    }
}
