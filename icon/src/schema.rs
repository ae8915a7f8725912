//! The schema engine (component B): compiled descriptors that validate
//! and coerce JSON-RPC wire values into typed records and back. Built on
//! top of the primitive codecs in [`crate::wire`].

use crate::wire::{self, AddressKind, Int, IntegerConstraint};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

/// A value after loading, or before dumping: the schema engine's internal
/// representation, independent of wire JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Int(Int),
    Bool(bool),
    /// Addresses, hashes, signatures, plain strings and enum symbols are
    /// all represented as strings once loaded; the schema remembers which
    /// primitive produced them so dumping reapplies the right codec.
    Str(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    List(Vec<TypedValue>),
    Record(BTreeMap<String, TypedValue>),
    Null,
}

impl TypedValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<Int> {
        match self {
            TypedValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&BTreeMap<String, TypedValue>> {
        match self {
            TypedValue::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[TypedValue]> {
        match self {
            TypedValue::List(l) => Some(l),
            _ => None,
        }
    }
}

/// The primitive wire codecs a leaf field can be typed as.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Integer(IntegerConstraint),
    Boolean,
    Address(AddressKind),
    Hash,
    Bytes,
    Signature,
    String,
    Timestamp,
    /// Identity codec: passes the wire value through unchanged, tagged as
    /// JSON rather than a [`TypedValue`] (used for `data.params` payloads
    /// whose shape is contract-defined).
    Any,
}

/// Concrete default applied when a field is missing on load. Named
/// `FieldDefault` rather than `Default` so it doesn't shadow
/// `std::default::Default` for crate users who glob-import `icon::*`.
#[derive(Debug, Clone)]
pub enum FieldDefault {
    Value(TypedValue),
    /// The only thunk this system needs: "now", used by timestamp fields.
    Now,
}

/// What kind of value a field holds.
#[derive(Debug, Clone)]
pub enum FieldType {
    Primitive(Primitive),
    List(Box<FieldType>),
    /// A finite set of symbolic names; wire representation is the name
    /// string.
    Enum(Vec<String>),
    /// A discriminated union keyed on a sibling field's value.
    Variant {
        discriminator: String,
        branches: BTreeMap<String, Schema>,
    },
    Schema(Schema),
    /// Every key in the input object carries the same element type.
    VariableKeyMap(Box<FieldType>),
    /// Passthrough: whatever JSON was there, unexamined.
    Any,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub required: bool,
    pub nullable: bool,
    pub default: Option<FieldDefault>,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Field {
            name: name.into(),
            ty,
            required: false,
            nullable: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, value: TypedValue) -> Self {
        self.default = Some(FieldDefault::Value(value));
        self
    }

    pub fn default_now(mut self) -> Self {
        self.default = Some(FieldDefault::Now);
        self
    }
}

/// A compiled record schema: an ordered set of named, typed fields.
#[derive(Debug, Clone)]
pub struct Schema {
    pub name: &'static str,
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

type SchemaCache = RwLock<BTreeMap<&'static str, Arc<Schema>>>;

fn schema_cache() -> &'static SchemaCache {
    static CACHE: OnceLock<SchemaCache> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(BTreeMap::new()))
}

/// Generate (or fetch the cached) schema for `name`, running `build` only
/// on a cache miss. Pure and idempotent: repeated calls with the same
/// `name` always observe the same schema, and a race between two callers
/// generating the same name concurrently is harmless (both builds are
/// equal; the loser's result is discarded).
pub fn generate(name: &'static str, build: impl FnOnce() -> Schema) -> Arc<Schema> {
    if let Some(schema) = schema_cache().read().get(name) {
        return schema.clone();
    }
    let schema = Arc::new(build());
    schema_cache().write().entry(name).or_insert_with(|| schema.clone()).clone()
}

/// A validation failure tree, keyed by dot-path. See
/// [`SchemaErrors::flatten`] for the single-line form used in error
/// messages.
#[derive(Debug, Clone, Default)]
pub struct SchemaErrors {
    pub tree: BTreeMap<String, ErrorNode>,
}

#[derive(Debug, Clone)]
pub enum ErrorNode {
    Leaf(String),
    Branch(SchemaErrors),
}

impl SchemaErrors {
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    fn insert_leaf(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.tree.insert(key.into(), ErrorNode::Leaf(message.into()));
    }

    fn insert_branch(&mut self, key: impl Into<String>, branch: SchemaErrors) {
        if !branch.is_empty() {
            self.tree.insert(key.into(), ErrorNode::Branch(branch));
        }
    }

    /// Dot-path keys, alphabetically joined into one line, e.g.
    /// `"a.b is invalid, c is required"`.
    pub fn flatten(&self) -> String {
        let mut parts = Vec::new();
        self.flatten_into("", &mut parts);
        parts.sort();
        parts.join(", ")
    }

    fn flatten_into(&self, prefix: &str, out: &mut Vec<String>) {
        for (key, node) in &self.tree {
            let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
            match node {
                ErrorNode::Leaf(message) => out.push(format!("{path} {message}")),
                ErrorNode::Branch(branch) => branch.flatten_into(&path, out),
            }
        }
    }
}

fn is_blank(value: &Value) -> bool {
    matches!(value, Value::Null) || matches!(value, Value::String(s) if s.is_empty())
}

/// Validate and coerce a wire JSON object into a typed record.
pub fn load(schema: &Schema, wire: &Value) -> Result<TypedValue, SchemaErrors> {
    let obj = wire.as_object().cloned().unwrap_or_default();
    load_fields(schema, &obj)
}

fn load_fields(schema: &Schema, obj: &Map<String, Value>) -> Result<TypedValue, SchemaErrors> {
    let mut errors = SchemaErrors::default();
    let mut out = BTreeMap::new();

    // Variant discriminators must be known before their branch is loaded;
    // since fields are evaluated in declaration order and a discriminator
    // is conventionally declared before its variant, a first pass is
    // unnecessary as long as callers order fields that way.
    for field in &schema.fields {
        let raw = obj.get(&field.name);
        let present = raw.is_some_and(|v| !is_blank(v));

        if !present {
            match &field.default {
                Some(FieldDefault::Value(v)) => {
                    out.insert(field.name.clone(), v.clone());
                }
                Some(FieldDefault::Now) => {
                    out.insert(field.name.clone(), TypedValue::Timestamp(Utc::now()));
                }
                None => {
                    if field.required {
                        errors.insert_leaf(&field.name, "is required");
                    } else if field.nullable && raw.is_some() {
                        out.insert(field.name.clone(), TypedValue::Null);
                    }
                }
            }
            continue;
        }

        let raw = raw.unwrap();
        match load_field_type(&field.ty, raw, &out, field.required) {
            Ok(LoadOutcome::Value(v)) => {
                out.insert(field.name.clone(), v);
            }
            Ok(LoadOutcome::Skip) => {}
            Err(FieldLoadError::Leaf) => errors.insert_leaf(&field.name, "is invalid"),
            Err(FieldLoadError::Branch(branch)) => errors.insert_branch(&field.name, branch),
        }
    }

    if errors.is_empty() {
        Ok(TypedValue::Record(out))
    } else {
        Err(errors)
    }
}

enum LoadOutcome {
    Value(TypedValue),
    Skip,
}

enum FieldLoadError {
    Leaf,
    Branch(SchemaErrors),
}

/// `required` reflects whether the *field this type belongs to* is
/// required; it only changes behavior for `FieldType::Variant`, where a
/// missing discriminator is `is invalid` for a required field and a
/// silent skip otherwise (§4.1). Nested/element recursion (list items,
/// map values) always passes `false`: a list's required-ness governs
/// whether the list itself is present, not whether each element's
/// variant discriminator is mandatory.
fn load_field_type(ty: &FieldType, raw: &Value, siblings: &BTreeMap<String, TypedValue>, required: bool) -> Result<LoadOutcome, FieldLoadError> {
    match ty {
        FieldType::Primitive(p) => load_primitive(p, raw).map(LoadOutcome::Value).map_err(|_| FieldLoadError::Leaf),
        FieldType::List(inner) => {
            let items = raw.as_array().ok_or(FieldLoadError::Leaf)?;
            let mut loaded = Vec::with_capacity(items.len());
            for item in items {
                match load_field_type(inner, item, siblings, false) {
                    Ok(LoadOutcome::Value(v)) => loaded.push(v),
                    Ok(LoadOutcome::Skip) => {}
                    Err(_) => return Err(FieldLoadError::Leaf),
                }
            }
            Ok(LoadOutcome::Value(TypedValue::List(loaded)))
        }
        FieldType::Enum(names) => {
            let s = raw.as_str().ok_or(FieldLoadError::Leaf)?;
            if names.iter().any(|n| n == s) {
                Ok(LoadOutcome::Value(TypedValue::Str(s.to_string())))
            } else {
                Err(FieldLoadError::Leaf)
            }
        }
        FieldType::Variant { discriminator, branches } => {
            let tag = match siblings.get(discriminator).and_then(TypedValue::as_str) {
                Some(tag) => tag,
                None if required => return Err(FieldLoadError::Leaf),
                None => return Ok(LoadOutcome::Skip),
            };
            let branch = branches.get(tag).ok_or(FieldLoadError::Leaf)?;
            let obj = raw.as_object().cloned().unwrap_or_default();
            load_fields(branch, &obj).map(LoadOutcome::Value).map_err(FieldLoadError::Branch)
        }
        FieldType::Schema(nested) => {
            let obj = raw.as_object().cloned().unwrap_or_default();
            load_fields(nested, &obj).map(LoadOutcome::Value).map_err(FieldLoadError::Branch)
        }
        FieldType::VariableKeyMap(inner) => {
            let obj = raw.as_object().ok_or(FieldLoadError::Leaf)?;
            let mut out = BTreeMap::new();
            for (k, v) in obj {
                match load_field_type(inner, v, siblings, false) {
                    Ok(LoadOutcome::Value(loaded)) => {
                        out.insert(k.clone(), loaded);
                    }
                    Ok(LoadOutcome::Skip) => {}
                    Err(_) => return Err(FieldLoadError::Leaf),
                }
            }
            Ok(LoadOutcome::Value(TypedValue::Record(out)))
        }
        FieldType::Any => Ok(LoadOutcome::Value(json_to_passthrough(raw))),
    }
}

/// The `Any`-primitive load codec, also used directly by call sites that
/// need to embed an already-parsed JSON value (e.g. contract call
/// parameters) into a [`TypedValue`] tree without a schema to validate it
/// against.
pub(crate) fn json_to_passthrough(value: &Value) -> TypedValue {
    // `Any` fields are not re-typed; we still need a TypedValue home for
    // them, so strings/bools/numbers map directly and everything else
    // round-trips through a record of stringified passthroughs.
    match value {
        Value::String(s) => TypedValue::Str(s.clone()),
        Value::Bool(b) => TypedValue::Bool(*b),
        Value::Null => TypedValue::Null,
        Value::Object(obj) => TypedValue::Record(obj.iter().map(|(k, v)| (k.clone(), json_to_passthrough(v))).collect()),
        Value::Array(items) => TypedValue::List(items.iter().map(json_to_passthrough).collect()),
        Value::Number(n) => TypedValue::Str(n.to_string()),
    }
}

fn load_primitive(p: &Primitive, raw: &Value) -> Result<TypedValue, String> {
    match p {
        Primitive::Integer(constraint) => {
            let v = wire::load_int(raw)?;
            if !constraint.check(v) {
                return Err("is invalid".to_string());
            }
            Ok(TypedValue::Int(v))
        }
        Primitive::Boolean => wire::load_bool(raw).map(TypedValue::Bool),
        Primitive::Address(kind) => wire::load_address(raw, *kind).map(TypedValue::Str),
        Primitive::Hash => wire::load_hash(raw).map(TypedValue::Str),
        Primitive::Bytes => wire::load_bytes(raw).map(TypedValue::Bytes),
        Primitive::Signature => wire::load_signature(raw).map(TypedValue::Str),
        Primitive::String => wire::load_string(raw).map(TypedValue::Str),
        Primitive::Timestamp => wire::load_timestamp(raw).map(TypedValue::Timestamp),
        Primitive::Any => Ok(json_to_passthrough(raw)),
    }
}

/// Coerce a typed record back into its wire JSON form. Empty records dump
/// to `Value::Null` so callers can elide an empty `params` field.
pub fn dump(schema: &Schema, value: &TypedValue) -> Result<Value, SchemaErrors> {
    let record = value.as_record().ok_or_else(|| {
        let mut errors = SchemaErrors::default();
        errors.insert_leaf("$", "is invalid");
        errors
    })?;

    let mut errors = SchemaErrors::default();
    let mut out = Map::new();

    for field in &schema.fields {
        let Some(v) = record.get(&field.name) else { continue };
        if matches!(v, TypedValue::Null) {
            out.insert(field.name.clone(), Value::Null);
            continue;
        }
        match dump_field_type(&field.ty, v) {
            Ok(DumpOutcome::Value(wire)) => {
                out.insert(field.name.clone(), wire);
            }
            Ok(DumpOutcome::Skip) => {}
            Err(FieldLoadError::Leaf) => errors.insert_leaf(&field.name, "is invalid"),
            Err(FieldLoadError::Branch(branch)) => errors.insert_branch(&field.name, branch),
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    if out.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(Value::Object(out))
    }
}

enum DumpOutcome {
    Value(Value),
    Skip,
}

fn dump_field_type(ty: &FieldType, value: &TypedValue) -> Result<DumpOutcome, FieldLoadError> {
    match ty {
        FieldType::Primitive(p) => dump_primitive(p, value).map(DumpOutcome::Value).map_err(|_| FieldLoadError::Leaf),
        FieldType::List(inner) => {
            let items = value.as_list().ok_or(FieldLoadError::Leaf)?;
            let mut wire_items = Vec::with_capacity(items.len());
            for item in items {
                match dump_field_type(inner, item)? {
                    DumpOutcome::Value(v) => wire_items.push(v),
                    DumpOutcome::Skip => {}
                }
            }
            Ok(DumpOutcome::Value(Value::Array(wire_items)))
        }
        FieldType::Enum(names) => {
            let s = value.as_str().ok_or(FieldLoadError::Leaf)?;
            if names.iter().any(|n| n == s) {
                Ok(DumpOutcome::Value(Value::String(s.to_string())))
            } else {
                Err(FieldLoadError::Leaf)
            }
        }
        FieldType::Variant { branches, .. } => {
            let record = value.as_record().ok_or(FieldLoadError::Leaf)?;
            // The branch is whichever one's fields are actually present;
            // with well-formed input exactly one will match non-trivially.
            for branch in branches.values() {
                if branch.fields.iter().any(|f| record.contains_key(&f.name)) {
                    return dump_schema(branch, record).map(DumpOutcome::Value).map_err(FieldLoadError::Branch);
                }
            }
            Ok(DumpOutcome::Skip)
        }
        FieldType::Schema(nested) => {
            let record = value.as_record().ok_or(FieldLoadError::Leaf)?;
            dump_schema(nested, record).map(DumpOutcome::Value).map_err(FieldLoadError::Branch)
        }
        FieldType::VariableKeyMap(inner) => {
            let record = value.as_record().ok_or(FieldLoadError::Leaf)?;
            let mut out = Map::new();
            for (k, v) in record {
                match dump_field_type(inner, v)? {
                    DumpOutcome::Value(wire) => {
                        out.insert(k.clone(), wire);
                    }
                    DumpOutcome::Skip => {}
                }
            }
            Ok(DumpOutcome::Value(Value::Object(out)))
        }
        FieldType::Any => Ok(DumpOutcome::Value(passthrough_to_json(value))),
    }
}

fn dump_schema(schema: &Schema, record: &BTreeMap<String, TypedValue>) -> Result<Value, SchemaErrors> {
    dump(schema, &TypedValue::Record(record.clone()))
}

/// Render a [`TypedValue`] as JSON without a schema to validate against,
/// for call sites (canonical serialization's no-schema fallback) that just
/// need *a* wire form rather than the schema-validated one.
pub(crate) fn passthrough_to_json(value: &TypedValue) -> Value {
    match value {
        TypedValue::Str(s) => Value::String(s.clone()),
        TypedValue::Bool(b) => Value::Bool(*b),
        TypedValue::Null => Value::Null,
        TypedValue::Record(r) => Value::Object(r.iter().map(|(k, v)| (k.clone(), passthrough_to_json(v))).collect()),
        TypedValue::List(items) => Value::Array(items.iter().map(passthrough_to_json).collect()),
        TypedValue::Int(i) => wire::dump_int(*i),
        TypedValue::Bytes(b) => wire::dump_bytes(b),
        TypedValue::Timestamp(t) => wire::dump_timestamp(*t),
    }
}

fn dump_primitive(p: &Primitive, value: &TypedValue) -> Result<Value, String> {
    match (p, value) {
        (Primitive::Integer(constraint), TypedValue::Int(i)) => {
            if !constraint.check(*i) {
                return Err("is invalid".to_string());
            }
            Ok(wire::dump_int(*i))
        }
        (Primitive::Boolean, TypedValue::Bool(b)) => Ok(wire::dump_bool(*b)),
        (Primitive::Address(_), TypedValue::Str(s)) => Ok(wire::dump_address(s)),
        (Primitive::Hash, TypedValue::Str(s)) => Ok(wire::dump_hash(s)),
        (Primitive::Bytes, TypedValue::Bytes(b)) => Ok(wire::dump_bytes(b)),
        (Primitive::Signature, TypedValue::Str(s)) => Ok(wire::dump_signature(s)),
        (Primitive::String, TypedValue::Str(s)) => Ok(wire::dump_string(s)),
        (Primitive::Timestamp, TypedValue::Timestamp(t)) => Ok(wire::dump_timestamp(*t)),
        (Primitive::Any, v) => Ok(passthrough_to_json(v)),
        _ => Err("is invalid".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema {
            name: "sample",
            fields: vec![
                Field::new("from", FieldType::Primitive(Primitive::Address(AddressKind::Eoa))).required(),
                Field::new("value", FieldType::Primitive(Primitive::Integer(IntegerConstraint::NonNegative))),
                Field::new("nonce", FieldType::Primitive(Primitive::Integer(IntegerConstraint::Any))).nullable(),
            ],
        }
    }

    #[test]
    fn generate_is_cached_and_deterministic() {
        let a = generate("sample-schema-test", sample_schema);
        let b = generate("sample-schema-test", || panic!("should not rebuild"));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn load_reports_required_field() {
        let schema = sample_schema();
        let wire = serde_json::json!({});
        let err = load(&schema, &wire).unwrap_err();
        assert_eq!(err.flatten(), "from is required");
    }

    #[test]
    fn load_then_dump_round_trips() {
        let schema = sample_schema();
        let wire = serde_json::json!({
            "from": "hxBE258CEB872E08851F1F59694DAC2558708ECE11",
            "value": "0x2a",
        });
        let loaded = load(&schema, &wire).unwrap();
        let dumped = dump(&schema, &loaded).unwrap();
        assert_eq!(dumped["from"], "hxbe258ceb872e08851f1f59694dac2558708ece11");
        assert_eq!(dumped["value"], "0x2a");
    }

    #[test]
    fn nullable_field_survives_as_null() {
        let schema = sample_schema();
        let wire = serde_json::json!({
            "from": "hx2e243ad926ac48d15156756fce28314357d49d83",
            "nonce": null,
        });
        let loaded = load(&schema, &wire).unwrap();
        assert_eq!(loaded.as_record().unwrap().get("nonce"), Some(&TypedValue::Null));
    }

    #[test]
    fn list_failure_does_not_expose_element_errors() {
        let schema = Schema {
            name: "list-test",
            fields: vec![Field::new(
                "items",
                FieldType::List(Box::new(FieldType::Primitive(Primitive::Integer(IntegerConstraint::Any)))),
            )
            .required()],
        };
        let wire = serde_json::json!({ "items": ["0x1", "not-a-number"] });
        let err = load(&schema, &wire).unwrap_err();
        assert_eq!(err.flatten(), "items is invalid");
    }

    fn variant_schema(data_required: bool) -> Schema {
        let mut branches = BTreeMap::new();
        branches.insert(
            "call".to_string(),
            Schema {
                name: "call-data",
                fields: vec![Field::new("method", FieldType::Primitive(Primitive::String)).required()],
            },
        );
        let data_field = Field::new(
            "data",
            FieldType::Variant {
                discriminator: "dataType".to_string(),
                branches,
            },
        );
        Schema {
            name: "variant-test",
            fields: vec![
                Field::new("dataType", FieldType::Enum(vec!["call".to_string()])),
                if data_required { data_field.required() } else { data_field },
            ],
        }
    }

    #[test]
    fn required_variant_with_missing_discriminator_is_invalid() {
        let schema = variant_schema(true);
        let wire = serde_json::json!({ "data": { "method": "transfer" } });
        let err = load(&schema, &wire).unwrap_err();
        assert_eq!(err.flatten(), "data is invalid");
    }

    #[test]
    fn optional_variant_with_missing_discriminator_is_skipped() {
        let schema = variant_schema(false);
        let wire = serde_json::json!({ "data": { "method": "transfer" } });
        let loaded = load(&schema, &wire).unwrap();
        assert!(loaded.as_record().unwrap().get("data").is_none());
    }
}
