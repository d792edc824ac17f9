use std::collections::BTreeMap;

/// A decoded Avro datum.
///
/// Records keep their fields in writer order. Union values remember the
/// branch they were written with.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bytes(Vec<u8>),
    String(String),
    Fixed(Vec<u8>),
    Enum(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Union { index: usize, value: Box<Value> },
    Record(Vec<(String, Value)>),
}

impl Value {
    /// Wrap `value` as union branch `index`.
    pub fn union(index: usize, value: Value) -> Self {
        Self::Union {
            index,
            value: Box::new(value),
        }
    }

    /// The value inside a union, or `self` for anything else.
    pub fn unwrap_union(&self) -> &Value {
        match self {
            Self::Union { value, .. } => value.unwrap_union(),
            other => other,
        }
    }

    /// Look up a record field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self.unwrap_union() {
            Self::Record(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.unwrap_union() {
            Self::String(s) | Self::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.unwrap_union() {
            Self::Int(i) => Some(i64::from(*i)),
            Self::Long(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self.unwrap_union() {
            Self::Bytes(b) | Self::Fixed(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.unwrap_union(), Self::Null)
    }

    /// Short type label used in mismatch errors.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Bytes(_) => "bytes",
            Self::String(_) => "string",
            Self::Fixed(_) => "fixed",
            Self::Enum(_) => "enum",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Union { .. } => "union",
            Self::Record(_) => "record",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i)
    }
}

impl From<i64> for Value {
    fn from(l: i64) -> Self {
        Self::Long(l)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_lookup_sees_through_unions() {
        let record = Value::union(
            1,
            Value::Record(vec![
                ("id".into(), Value::Long(7)),
                ("name".into(), Value::union(1, "blob".into())),
            ]),
        );
        assert_eq!(record.field("id").and_then(Value::as_i64), Some(7));
        assert_eq!(record.field("name").and_then(Value::as_str), Some("blob"));
        assert!(record.field("missing").is_none());
    }

    #[test]
    fn nested_union_unwraps_fully() {
        let v = Value::union(0, Value::union(0, Value::Null));
        assert!(v.is_null());
    }
}
