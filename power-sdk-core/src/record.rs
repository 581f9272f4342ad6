use std::collections::HashMap;

/// A dynamically typed field value produced by the parser.
///
/// The source system represents parsed field values as a dynamic mapping;
/// this is the tagged-value replacement (see design note in SPEC_FULL.md §4).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    /// An `Enum` field value: the raw integer plus its mapped label.
    /// `label` is `"UNKNOWN_<n>"` when `raw` has no entry in the mapping.
    Enum { raw: i64, label: String },
    Null,
}

impl Value {
    pub fn get_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Enum { raw, .. } => Some(*raw),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn get_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn get_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            Value::Enum { label, .. } => Some(label.as_str()),
            _ => None,
        }
    }

    pub fn get_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn get_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Result of validating a byte buffer against a `BlockSchema`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub missing_fields: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        ValidationResult {
            valid: true,
            ..Default::default()
        }
    }
}

/// A fully parsed block, as returned by `BlockParser::parse_block`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub block_id: u32,
    pub name: String,
    pub values: HashMap<String, Value>,
    pub raw: Vec<u8>,
    pub length: usize,
    pub protocol_version: Option<u32>,
    pub schema_version: String,
    pub timestamp: std::time::SystemTime,
    pub validation: Option<ValidationResult>,
}

impl ParsedRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn get_int(&self, field: &str) -> Option<i64> {
        self.values.get(field).and_then(Value::get_int)
    }

    pub fn get_float(&self, field: &str) -> Option<f64> {
        self.values.get(field).and_then(Value::get_float)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.values.get(field).and_then(Value::get_str)
    }
}
