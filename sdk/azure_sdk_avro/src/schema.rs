//! Avro schema model and JSON parsing.
//!
//! Named types (records, enums, fixed) are defined once, at their first
//! occurrence. Later occurrences, including recursive ones, are
//! [`Schema::Ref`] values resolved through a [`Names`] table.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Map, Value};

use crate::error::{AvroError, AvroResult};

/// An Avro schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Fixed(FixedSchema),
    Enum(EnumSchema),
    Array(Box<Schema>),
    Map(Box<Schema>),
    Union(Vec<Schema>),
    Record(RecordSchema),
    /// Reference by full name to a named type defined elsewhere.
    Ref(String),
}

/// The name of a named type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    pub name: String,
    pub namespace: Option<String>,
}

impl Name {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// `namespace.name`, or just `name` without a namespace.
    pub fn fullname(&self) -> String {
        match &self.namespace {
            Some(ns) if !ns.is_empty() => format!("{}.{}", ns, self.name),
            _ => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixedSchema {
    pub name: Name,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumSchema {
    pub name: Name,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    pub name: Name,
    pub fields: Vec<Field>,
}

/// A record field. Fields keep the order the writer declared them in.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub schema: Schema,
    pub default: Option<Value>,
}

impl Field {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            default: None,
        }
    }
}

impl Schema {
    /// Parse a schema from its JSON text.
    ///
    /// # Example
    /// ```
    /// use azure_sdk_avro::Schema;
    ///
    /// let schema = Schema::parse_str(r#"["null", "string"]"#).unwrap();
    /// assert_eq!(schema, Schema::Union(vec![Schema::Null, Schema::String]));
    /// ```
    pub fn parse_str(json: &str) -> AvroResult<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::parse(&value)
    }

    /// Parse a schema from a JSON value.
    pub fn parse(value: &Value) -> AvroResult<Self> {
        Parser::default().parse(value, None)
    }

    /// The Avro type name of this schema (`"record"`, `"union"`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Bytes => "bytes",
            Self::String => "string",
            Self::Fixed(_) => "fixed",
            Self::Enum(_) => "enum",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Union(_) => "union",
            Self::Record(_) => "record",
            Self::Ref(_) => "reference",
        }
    }

    /// The schema as Avro JSON.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Fixed(fixed) => {
                let mut obj = name_object("fixed", &fixed.name);
                obj.insert("size".into(), json!(fixed.size));
                Value::Object(obj)
            }
            Self::Enum(en) => {
                let mut obj = name_object("enum", &en.name);
                obj.insert("symbols".into(), json!(en.symbols));
                Value::Object(obj)
            }
            Self::Array(items) => json!({"type": "array", "items": items.to_json()}),
            Self::Map(values) => json!({"type": "map", "values": values.to_json()}),
            Self::Union(branches) => Value::Array(branches.iter().map(Self::to_json).collect()),
            Self::Record(record) => {
                let mut obj = name_object("record", &record.name);
                let fields = record
                    .fields
                    .iter()
                    .map(|field| {
                        let mut f = Map::new();
                        f.insert("name".into(), json!(field.name));
                        f.insert("type".into(), field.schema.to_json());
                        if let Some(default) = &field.default {
                            f.insert("default".into(), default.clone());
                        }
                        Value::Object(f)
                    })
                    .collect();
                obj.insert("fields".into(), Value::Array(fields));
                Value::Object(obj)
            }
            Self::Ref(name) => Value::String(name.clone()),
            primitive => Value::String(primitive.kind().to_string()),
        }
    }

    /// Compact JSON text of the schema.
    pub fn canonical_json(&self) -> String {
        self.to_json().to_string()
    }

    /// Indented JSON text of the schema, used in error messages.
    pub fn pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.to_json()).unwrap_or_else(|_| self.canonical_json())
    }

    /// Table of every named type defined in this schema.
    pub fn names(&self) -> Names {
        let mut names = Names::default();
        names.collect(self);
        names
    }
}

fn name_object(kind: &str, name: &Name) -> Map<String, Value> {
    let mut obj = Map::new();
    obj.insert("type".into(), json!(kind));
    obj.insert("name".into(), json!(name.name));
    if let Some(ns) = &name.namespace {
        obj.insert("namespace".into(), json!(ns));
    }
    obj
}

/// Named types by full name.
#[derive(Debug, Clone, Default)]
pub struct Names {
    types: HashMap<String, Schema>,
}

impl Names {
    pub fn get(&self, fullname: &str) -> Option<&Schema> {
        self.types.get(fullname)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Follow `schema` through references to a concrete schema.
    pub fn resolve<'a>(&'a self, schema: &'a Schema) -> AvroResult<&'a Schema> {
        match schema {
            Schema::Ref(name) => self
                .get(name)
                .ok_or_else(|| AvroError::UnknownType(name.clone())),
            other => Ok(other),
        }
    }

    fn collect(&mut self, schema: &Schema) {
        match schema {
            Schema::Fixed(fixed) => {
                self.types.insert(fixed.name.fullname(), schema.clone());
            }
            Schema::Enum(en) => {
                self.types.insert(en.name.fullname(), schema.clone());
            }
            Schema::Record(record) => {
                self.types.insert(record.name.fullname(), schema.clone());
                for field in &record.fields {
                    self.collect(&field.schema);
                }
            }
            Schema::Array(inner) | Schema::Map(inner) => self.collect(inner),
            Schema::Union(branches) => branches.iter().for_each(|b| self.collect(b)),
            _ => {}
        }
    }
}

#[derive(Default)]
struct Parser {
    defined: HashSet<String>,
}

fn primitive(name: &str) -> Option<Schema> {
    Some(match name {
        "null" => Schema::Null,
        "boolean" => Schema::Boolean,
        "int" => Schema::Int,
        "long" => Schema::Long,
        "float" => Schema::Float,
        "double" => Schema::Double,
        "bytes" => Schema::Bytes,
        "string" => Schema::String,
        _ => return None,
    })
}

impl Parser {
    fn parse(&mut self, value: &Value, namespace: Option<&str>) -> AvroResult<Schema> {
        match value {
            Value::String(name) => self.parse_name_reference(name, namespace),
            Value::Array(branches) => self.parse_union(branches, namespace),
            Value::Object(obj) => self.parse_object(obj, namespace),
            other => Err(AvroError::InvalidSchema(format!(
                "expected string, object, or array, found: {other}"
            ))),
        }
    }

    fn parse_name_reference(&self, name: &str, namespace: Option<&str>) -> AvroResult<Schema> {
        if let Some(schema) = primitive(name) {
            return Ok(schema);
        }
        let fullname = qualify(name, namespace);
        if self.defined.contains(&fullname) {
            Ok(Schema::Ref(fullname))
        } else if self.defined.contains(name) {
            Ok(Schema::Ref(name.to_string()))
        } else {
            Err(AvroError::UnknownType(fullname))
        }
    }

    fn parse_union(&mut self, branches: &[Value], namespace: Option<&str>) -> AvroResult<Schema> {
        let branches = branches
            .iter()
            .map(|b| self.parse(b, namespace))
            .collect::<AvroResult<Vec<_>>>()?;
        if branches.iter().any(|b| matches!(b, Schema::Union(_))) {
            return Err(AvroError::InvalidSchema(
                "unions may not immediately contain other unions".into(),
            ));
        }
        Ok(Schema::Union(branches))
    }

    fn parse_object(&mut self, obj: &Map<String, Value>, namespace: Option<&str>) -> AvroResult<Schema> {
        let type_value = obj
            .get("type")
            .ok_or_else(|| AvroError::InvalidSchema("missing 'type' field".into()))?;
        let type_name = match type_value {
            Value::String(name) => name.as_str(),
            // {"type": {...}} or {"type": [...]} wraps another schema.
            nested => return self.parse(nested, namespace),
        };

        match type_name {
            "record" | "error" => self.parse_record(obj, namespace),
            "enum" => self.parse_enum(obj, namespace),
            "fixed" => self.parse_fixed(obj, namespace),
            "array" => {
                let items = obj
                    .get("items")
                    .ok_or_else(|| AvroError::InvalidSchema("array missing 'items'".into()))?;
                Ok(Schema::Array(Box::new(self.parse(items, namespace)?)))
            }
            "map" => {
                let values = obj
                    .get("values")
                    .ok_or_else(|| AvroError::InvalidSchema("map missing 'values'".into()))?;
                Ok(Schema::Map(Box::new(self.parse(values, namespace)?)))
            }
            // Primitives, possibly annotated with a logical type, decode as
            // their underlying type.
            other => self.parse_name_reference(other, namespace),
        }
    }

    fn parse_name(&mut self, obj: &Map<String, Value>, namespace: Option<&str>, kind: &str) -> AvroResult<Name> {
        let raw = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| AvroError::InvalidSchema(format!("{kind} missing 'name'")))?;
        if raw.is_empty() {
            return Err(AvroError::InvalidSchema(format!("{kind} name cannot be empty")));
        }

        let name = match raw.rsplit_once('.') {
            Some((ns, short)) => Name::new(short).with_namespace(ns),
            None => {
                let ns = obj
                    .get("namespace")
                    .and_then(Value::as_str)
                    .or(namespace)
                    .filter(|ns| !ns.is_empty());
                match ns {
                    Some(ns) => Name::new(raw).with_namespace(ns),
                    None => Name::new(raw),
                }
            }
        };

        let fullname = name.fullname();
        if primitive(&fullname).is_some() || !self.defined.insert(fullname.clone()) {
            return Err(AvroError::InvalidSchema(format!(
                "duplicate or reserved type name: {fullname}"
            )));
        }
        Ok(name)
    }

    fn parse_record(&mut self, obj: &Map<String, Value>, namespace: Option<&str>) -> AvroResult<Schema> {
        // Registered before the fields so fields can refer to the record.
        let name = self.parse_name(obj, namespace, "record")?;
        let inner_namespace = name.namespace.clone();

        let fields = obj
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| AvroError::InvalidSchema("record missing 'fields' array".into()))?
            .iter()
            .map(|f| self.parse_field(f, inner_namespace.as_deref()))
            .collect::<AvroResult<Vec<_>>>()?;

        Ok(Schema::Record(RecordSchema { name, fields }))
    }

    fn parse_field(&mut self, value: &Value, namespace: Option<&str>) -> AvroResult<Field> {
        let obj = value
            .as_object()
            .ok_or_else(|| AvroError::InvalidSchema("field must be an object".into()))?;
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| AvroError::InvalidSchema("field missing 'name'".into()))?;
        let type_value = obj
            .get("type")
            .ok_or_else(|| AvroError::InvalidSchema(format!("field '{name}' missing 'type'")))?;

        Ok(Field {
            name: name.to_string(),
            schema: self.parse(type_value, namespace)?,
            default: obj.get("default").cloned(),
        })
    }

    fn parse_enum(&mut self, obj: &Map<String, Value>, namespace: Option<&str>) -> AvroResult<Schema> {
        let name = self.parse_name(obj, namespace, "enum")?;
        let symbols = obj
            .get("symbols")
            .and_then(Value::as_array)
            .ok_or_else(|| AvroError::InvalidSchema("enum missing 'symbols' array".into()))?
            .iter()
            .map(|s| {
                s.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| AvroError::InvalidSchema("enum symbols must be strings".into()))
            })
            .collect::<AvroResult<Vec<_>>>()?;

        let mut seen = HashSet::new();
        if let Some(dup) = symbols.iter().find(|s| !seen.insert(s.as_str())) {
            return Err(AvroError::InvalidSchema(format!("duplicate enum symbol: {dup}")));
        }
        Ok(Schema::Enum(EnumSchema { name, symbols }))
    }

    fn parse_fixed(&mut self, obj: &Map<String, Value>, namespace: Option<&str>) -> AvroResult<Schema> {
        let name = self.parse_name(obj, namespace, "fixed")?;
        let size = obj
            .get("size")
            .and_then(Value::as_u64)
            .ok_or_else(|| AvroError::InvalidSchema("fixed missing 'size'".into()))?;
        let size = usize::try_from(size)
            .map_err(|_| AvroError::InvalidSchema(format!("fixed size too large: {size}")))?;
        Ok(Schema::Fixed(FixedSchema { name, size }))
    }
}

fn qualify(name: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if !name.contains('.') && !ns.is_empty() => format!("{ns}.{name}"),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_primitives_in_both_forms() {
        assert_eq!(Schema::parse_str(r#""long""#).unwrap(), Schema::Long);
        assert_eq!(Schema::parse_str(r#"{"type": "bytes"}"#).unwrap(), Schema::Bytes);
        assert_eq!(
            Schema::parse_str(r#"{"type": "long", "logicalType": "timestamp-millis"}"#).unwrap(),
            Schema::Long
        );
    }

    #[test]
    fn parses_record_with_namespace_and_nested_types() {
        let schema = Schema::parse_str(
            r#"{
                "type": "record",
                "name": "BlobChangeEvent",
                "namespace": "com.microsoft.azure.storage.blob",
                "fields": [
                    {"name": "eventType", "type": {"type": "enum", "name": "EventType", "symbols": ["BlobCreated", "BlobDeleted"]}},
                    {"name": "topic", "type": "string"},
                    {"name": "tags", "type": {"type": "map", "values": "string"}},
                    {"name": "previous", "type": ["null", "EventType"], "default": null}
                ]
            }"#,
        )
        .unwrap();

        let Schema::Record(record) = &schema else {
            panic!("expected record, got {schema:?}");
        };
        assert_eq!(
            record.name.fullname(),
            "com.microsoft.azure.storage.blob.BlobChangeEvent"
        );
        let names: Vec<_> = record.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["eventType", "topic", "tags", "previous"]);
        assert_eq!(
            record.fields[3].schema,
            Schema::Union(vec![
                Schema::Null,
                Schema::Ref("com.microsoft.azure.storage.blob.EventType".into())
            ])
        );
        assert_eq!(record.fields[3].default, Some(Value::Null));

        let table = schema.names();
        assert_eq!(table.len(), 2);
        assert!(table.get("com.microsoft.azure.storage.blob.EventType").is_some());
    }

    #[test]
    fn recursive_record_refers_to_itself() {
        let schema = Schema::parse_str(
            r#"{"type": "record", "name": "Node", "fields": [
                {"name": "value", "type": "int"},
                {"name": "next", "type": ["null", "Node"]}
            ]}"#,
        )
        .unwrap();
        let Schema::Record(record) = &schema else {
            panic!("expected record");
        };
        assert_eq!(
            record.fields[1].schema,
            Schema::Union(vec![Schema::Null, Schema::Ref("Node".into())])
        );
    }

    #[test]
    fn undefined_reference_is_unknown_type() {
        let err = Schema::parse_str(r#"["null", "Missing"]"#).unwrap_err();
        assert!(matches!(err, AvroError::UnknownType(name) if name == "Missing"));
    }

    #[test]
    fn rejects_invalid_schemas() {
        for json in [
            r#"{"type": "record", "fields": []}"#,
            r#"{"type": "enum", "name": "E", "symbols": ["A", "A"]}"#,
            r#"{"type": "fixed", "name": "F"}"#,
            r#"[["null"], "int"]"#,
            r#"42"#,
        ] {
            assert!(Schema::parse_str(json).is_err(), "{json} should be rejected");
        }
    }

    #[test]
    fn json_round_trip_preserves_schema() {
        let text = r#"{"type":"record","name":"R","namespace":"ns","fields":[
            {"name":"f","type":{"type":"fixed","name":"MD5","size":16}},
            {"name":"a","type":{"type":"array","items":"ns.MD5"}}
        ]}"#;
        let schema = Schema::parse_str(text).unwrap();
        let reparsed = Schema::parse_str(&schema.canonical_json()).unwrap();
        assert_eq!(schema, reparsed);
    }
}
