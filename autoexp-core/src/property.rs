//! Typed property paths, leaf values, and schema-driven access to state documents.
//!
//! A [`PropertyPath`] is a chain of field and index segments (`balls[0].position.x`).
//! Paths are resolved against the canonical JSON encoding of a state, walking a
//! [`Schema`] in lockstep so that every read and write is checked against the
//! declared shape instead of being evaluated dynamically.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use smallvec::SmallVec;
use thiserror::Error;

use crate::numbers::{approx_eq, i64_to_f64, integral_f64_to_i64};

/// Errors raised while parsing or resolving property paths.
#[derive(Debug, Error)]
pub enum PropertyError {
    #[error("malformed property path '{input}': {reason}")]
    MalformedPath { input: String, reason: &'static str },
    #[error("property not found: {path}")]
    NotFound { path: String },
    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: String,
    },
    #[error("state encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// One step of a property path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Field(String),
    Index(usize),
}

/// Addressable location of a property inside a structured state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PropertyPath {
    segments: SmallVec<[Segment; 4]>,
}

impl PropertyPath {
    /// The empty path, addressing the whole state.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.segments.push(Segment::Field(name.to_string()));
        next
    }

    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        let mut next = self.clone();
        next.segments.push(Segment::Index(index));
        next
    }

    /// Append every segment of `suffix` to this path.
    #[must_use]
    pub fn join(&self, suffix: &Self) -> Self {
        let mut next = self.clone();
        next.segments.extend(suffix.segments.iter().cloned());
        next
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Path text with every index erased (`balls[].position.x`), used to share
    /// marginals across collection elements.
    #[must_use]
    pub fn normalized(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Field(name) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(name);
                }
                Segment::Index(_) => out.push_str("[]"),
            }
        }
        out
    }

    fn malformed(input: &str, reason: &'static str) -> PropertyError {
        PropertyError::MalformedPath {
            input: input.to_string(),
            reason,
        }
    }
}

impl FromStr for PropertyPath {
    type Err = PropertyError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.trim().is_empty() {
            return Err(Self::malformed(input, "empty path"));
        }
        let mut segments = SmallVec::new();
        for part in input.split('.') {
            let (name, mut rest) = part
                .find('[')
                .map_or((part, ""), |idx| (&part[..idx], &part[idx..]));
            if name.is_empty() {
                return Err(Self::malformed(input, "empty field name"));
            }
            if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(Self::malformed(input, "invalid character in field name"));
            }
            segments.push(Segment::Field(name.to_string()));
            while !rest.is_empty() {
                let Some(open) = rest.strip_prefix('[') else {
                    return Err(Self::malformed(input, "unexpected text after index"));
                };
                let Some(close) = open.find(']') else {
                    return Err(Self::malformed(input, "unclosed index bracket"));
                };
                let index = open[..close]
                    .parse::<usize>()
                    .map_err(|_| Self::malformed(input, "index is not a non-negative integer"))?;
                segments.push(Segment::Index(index));
                rest = &open[close + 1..];
            }
        }
        Ok(Self { segments })
    }
}

impl TryFrom<String> for PropertyPath {
    type Error = PropertyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PropertyPath> for String {
    fn from(path: PropertyPath) -> Self {
        path.to_string()
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            match segment {
                Segment::Field(name) => {
                    if !first {
                        f.write_str(".")?;
                    }
                    f.write_str(name)?;
                }
                Segment::Index(idx) => write!(f, "[{idx}]")?,
            }
            first = false;
        }
        Ok(())
    }
}

/// Scalar value stored at a leaf property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Continuous values get tail/bin-aware sampling; everything else is categorical.
    #[must_use]
    pub const fn is_continuous(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(i64_to_f64(*v)),
            Self::Float(v) => Some(*v),
            Self::Bool(_) | Self::Text(_) => None,
        }
    }

    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }

    /// Equality with float tolerance; ints and floats compare numerically.
    #[must_use]
    pub fn approx_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => approx_eq(x, y),
                _ => false,
            },
        }
    }

    fn from_json(json: &Json, schema: &Schema, path: &PropertyPath) -> Result<Self, PropertyError> {
        let value = match schema {
            Schema::Bool => json.as_bool().map(Self::Bool),
            Schema::Int => json.as_i64().map(Self::Int),
            Schema::Float => json.as_f64().map(Self::Float),
            Schema::Text => json.as_str().map(|s| Self::Text(s.to_string())),
            Schema::List(_) | Schema::Record(_) => {
                return Err(PropertyError::TypeMismatch {
                    path: path.to_string(),
                    expected: "leaf",
                    found: schema.kind_name().to_string(),
                });
            }
        };
        value.ok_or_else(|| PropertyError::TypeMismatch {
            path: path.to_string(),
            expected: schema.kind_name(),
            found: json_kind(json).to_string(),
        })
    }

    fn to_json(&self, schema: &Schema, path: &PropertyPath) -> Result<Json, PropertyError> {
        let converted = match (schema, self) {
            (Schema::Bool, Self::Bool(v)) => Some(Json::Bool(*v)),
            (Schema::Int, Self::Int(v)) => Some(Json::from(*v)),
            (Schema::Int, Self::Float(v)) => integral_f64_to_i64(*v).map(Json::from),
            (Schema::Float, Self::Float(v)) => serde_json::Number::from_f64(*v).map(Json::Number),
            (Schema::Float, Self::Int(v)) => {
                serde_json::Number::from_f64(i64_to_f64(*v)).map(Json::Number)
            }
            (Schema::Text, Self::Text(v)) => Some(Json::String(v.clone())),
            _ => None,
        };
        converted.ok_or_else(|| PropertyError::TypeMismatch {
            path: path.to_string(),
            expected: schema.kind_name(),
            found: self.kind_name().to_string(),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// How a declared field participates in comparison and intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    /// Meaningful game variable: compared and eligible for mutation.
    Comparable,
    /// Compared, but never a mutation point.
    Immutable,
    /// Implementation bookkeeping: neither compared nor mutated.
    Internal,
}

/// A named field inside a record schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub role: FieldRole,
    pub schema: Schema,
}

impl FieldSchema {
    #[must_use]
    pub fn comparable(name: &str, schema: Schema) -> Self {
        Self {
            name: name.to_string(),
            role: FieldRole::Comparable,
            schema,
        }
    }

    #[must_use]
    pub fn immutable(name: &str, schema: Schema) -> Self {
        Self {
            name: name.to_string(),
            role: FieldRole::Immutable,
            schema,
        }
    }

    #[must_use]
    pub fn internal(name: &str, schema: Schema) -> Self {
        Self {
            name: name.to_string(),
            role: FieldRole::Internal,
            schema,
        }
    }
}

/// Declared shape of a state type.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Bool,
    Int,
    Float,
    Text,
    List(Box<Schema>),
    Record(Vec<FieldSchema>),
}

impl Schema {
    #[must_use]
    pub fn list(inner: Self) -> Self {
        Self::List(Box::new(inner))
    }

    #[must_use]
    pub fn record(fields: impl IntoIterator<Item = FieldSchema>) -> Self {
        Self::Record(fields.into_iter().collect())
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        match self {
            Self::Record(fields) => fields.iter().find(|f| f.name == name),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        !matches!(self, Self::List(_) | Self::Record(_))
    }

    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::List(_) => "list",
            Self::Record(_) => "record",
        }
    }
}

const fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "text",
        Json::Array(_) => "list",
        Json::Object(_) => "record",
    }
}

/// Canonical encoding of one state paired with its schema.
#[derive(Debug, Clone)]
pub struct Document<'s> {
    root: Json,
    schema: &'s Schema,
}

impl<'s> Document<'s> {
    #[must_use]
    pub const fn new(root: Json, schema: &'s Schema) -> Self {
        Self { root, schema }
    }

    #[must_use]
    pub fn json(&self) -> &Json {
        &self.root
    }

    #[must_use]
    pub fn into_json(self) -> Json {
        self.root
    }

    fn locate(&self, path: &PropertyPath) -> Result<(&Json, &'s Schema), PropertyError> {
        let not_found = || PropertyError::NotFound {
            path: path.to_string(),
        };
        let mut json = &self.root;
        let mut schema = self.schema;
        for segment in path.segments() {
            match segment {
                Segment::Field(name) => {
                    let field = schema.field(name).ok_or_else(not_found)?;
                    json = json.get(name.as_str()).ok_or_else(not_found)?;
                    schema = &field.schema;
                }
                Segment::Index(idx) => {
                    let Schema::List(inner) = schema else {
                        return Err(not_found());
                    };
                    json = json.get(*idx).ok_or_else(not_found)?;
                    schema = inner;
                }
            }
        }
        Ok((json, schema))
    }

    fn locate_mut(
        &mut self,
        path: &PropertyPath,
    ) -> Result<(&mut Json, &'s Schema), PropertyError> {
        let not_found = || PropertyError::NotFound {
            path: path.to_string(),
        };
        let mut json = &mut self.root;
        let mut schema = self.schema;
        for segment in path.segments() {
            match segment {
                Segment::Field(name) => {
                    let field = schema.field(name).ok_or_else(not_found)?;
                    json = json.get_mut(name.as_str()).ok_or_else(not_found)?;
                    schema = &field.schema;
                }
                Segment::Index(idx) => {
                    let Schema::List(inner) = schema else {
                        return Err(not_found());
                    };
                    json = json.get_mut(*idx).ok_or_else(not_found)?;
                    schema = inner;
                }
            }
        }
        Ok((json, schema))
    }

    /// Read the leaf value at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::NotFound`] when the path does not resolve and
    /// [`PropertyError::TypeMismatch`] when it addresses a non-leaf.
    pub fn get(&self, path: &PropertyPath) -> Result<Value, PropertyError> {
        let (json, schema) = self.locate(path)?;
        Value::from_json(json, schema, path)
    }

    /// Number of elements in the collection at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the path does not resolve to a list.
    pub fn len(&self, path: &PropertyPath) -> Result<usize, PropertyError> {
        let (json, schema) = self.locate(path)?;
        match (schema, json.as_array()) {
            (Schema::List(_), Some(items)) => Ok(items.len()),
            _ => Err(PropertyError::TypeMismatch {
                path: path.to_string(),
                expected: "list",
                found: schema.kind_name().to_string(),
            }),
        }
    }

    /// Overwrite the leaf at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the path does not resolve or the value does not fit
    /// the declared leaf type.
    pub fn set(&mut self, path: &PropertyPath, value: &Value) -> Result<(), PropertyError> {
        let (json, schema) = self.locate_mut(path)?;
        if !schema.is_leaf() {
            return Err(PropertyError::TypeMismatch {
                path: path.to_string(),
                expected: "leaf",
                found: schema.kind_name().to_string(),
            });
        }
        *json = value.to_json(schema, path)?;
        Ok(())
    }

    /// Every comparable, non-immutable leaf, in schema order.
    #[must_use]
    pub fn mutable_leaves(&self) -> Vec<PropertyPath> {
        let mut out = Vec::new();
        collect_mutable(&self.root, self.schema, &PropertyPath::root(), &mut out);
        out
    }

    /// Paths whose comparable content differs between two documents.
    #[must_use]
    pub fn diff(&self, other: &Document<'_>) -> BTreeSet<PropertyPath> {
        let mut out = BTreeSet::new();
        diff_nodes(
            Some(&self.root),
            Some(&other.root),
            self.schema,
            &PropertyPath::root(),
            &mut out,
        );
        out
    }
}

fn collect_mutable(json: &Json, schema: &Schema, here: &PropertyPath, out: &mut Vec<PropertyPath>) {
    match schema {
        Schema::Record(fields) => {
            for field in fields.iter().filter(|f| f.role == FieldRole::Comparable) {
                if let Some(child) = json.get(field.name.as_str()) {
                    collect_mutable(child, &field.schema, &here.field(&field.name), out);
                }
            }
        }
        Schema::List(inner) => {
            if let Some(items) = json.as_array() {
                for (idx, item) in items.iter().enumerate() {
                    collect_mutable(item, inner, &here.index(idx), out);
                }
            }
        }
        _ => {
            if !here.is_root() {
                out.push(here.clone());
            }
        }
    }
}

fn diff_nodes(
    a: Option<&Json>,
    b: Option<&Json>,
    schema: &Schema,
    here: &PropertyPath,
    out: &mut BTreeSet<PropertyPath>,
) {
    let (Some(a), Some(b)) = (a, b) else {
        if a.is_some() || b.is_some() {
            out.insert(here.clone());
        }
        return;
    };
    match schema {
        Schema::Record(fields) => {
            for field in fields.iter().filter(|f| f.role != FieldRole::Internal) {
                diff_nodes(
                    a.get(field.name.as_str()),
                    b.get(field.name.as_str()),
                    &field.schema,
                    &here.field(&field.name),
                    out,
                );
            }
        }
        Schema::List(inner) => {
            let left = a.as_array().map_or(&[][..], Vec::as_slice);
            let right = b.as_array().map_or(&[][..], Vec::as_slice);
            if left.len() != right.len() {
                out.insert(here.clone());
            }
            for (idx, (x, y)) in left.iter().zip(right).enumerate() {
                diff_nodes(Some(x), Some(y), inner, &here.index(idx), out);
            }
        }
        _ => {
            let same = match (
                Value::from_json(a, schema, here),
                Value::from_json(b, schema, here),
            ) {
                (Ok(x), Ok(y)) => x.approx_eq(&y),
                _ => a == b,
            };
            if !same {
                out.insert(here.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        let point = Schema::record([
            FieldSchema::comparable("x", Schema::Float),
            FieldSchema::comparable("y", Schema::Float),
        ]);
        let ball = Schema::record([FieldSchema::comparable("position", point)]);
        Schema::record([
            FieldSchema::comparable("balls", Schema::list(ball)),
            FieldSchema::comparable("lives", Schema::Int),
            FieldSchema::immutable("width", Schema::Float),
            FieldSchema::internal("frame", Schema::Int),
        ])
    }

    fn doc(schema: &Schema) -> Document<'_> {
        Document::new(
            json!({
                "balls": [{"position": {"x": 10.0, "y": 20.0}}],
                "lives": 3,
                "width": 160.0,
                "frame": 7
            }),
            schema,
        )
    }

    #[test]
    fn parses_and_displays_paths() {
        let path: PropertyPath = "balls[0].position.x".parse().unwrap();
        assert_eq!(path.segments().len(), 4);
        assert_eq!(path.to_string(), "balls[0].position.x");
        assert_eq!(path.normalized(), "balls[].position.x");
        let nested: PropertyPath = "grid[1][2].alive".parse().unwrap();
        assert_eq!(nested.to_string(), "grid[1][2].alive");
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["", "balls[", "balls[x]", ".x", "a..b", "a[0]b", "bad-name"] {
            assert!(
                matches!(
                    bad.parse::<PropertyPath>(),
                    Err(PropertyError::MalformedPath { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn get_and_set_follow_nested_indexed_paths() {
        let schema = schema();
        let mut document = doc(&schema);
        let path: PropertyPath = "balls[0].position.x".parse().unwrap();
        assert_eq!(document.get(&path).unwrap(), Value::Float(10.0));
        document.set(&path, &Value::Float(42.5)).unwrap();
        assert_eq!(document.get(&path).unwrap(), Value::Float(42.5));
        assert_eq!(document.len(&"balls".parse().unwrap()).unwrap(), 1);
    }

    #[test]
    fn missing_paths_and_type_mismatches_surface() {
        let schema = schema();
        let mut document = doc(&schema);
        let missing: PropertyPath = "balls[3].position.x".parse().unwrap();
        assert!(matches!(document.get(&missing), Err(PropertyError::NotFound { .. })));
        let lives: PropertyPath = "lives".parse().unwrap();
        assert!(matches!(
            document.set(&lives, &Value::Text("many".into())),
            Err(PropertyError::TypeMismatch { .. })
        ));
        document.set(&lives, &Value::Float(2.0)).unwrap();
        assert_eq!(document.get(&lives).unwrap(), Value::Int(2));
    }

    #[test]
    fn mutable_leaves_skip_immutable_and_internal_fields() {
        let schema = schema();
        let leaves: Vec<String> = doc(&schema)
            .mutable_leaves()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            leaves,
            vec!["balls[0].position.x", "balls[0].position.y", "lives"]
        );
    }

    #[test]
    fn diff_reports_changed_paths_and_list_lengths() {
        let schema = schema();
        let a = doc(&schema);
        let mut b = doc(&schema);
        b.set(&"lives".parse().unwrap(), &Value::Int(2)).unwrap();
        b.set(&"frame".parse().unwrap(), &Value::Int(99)).unwrap();
        let diff = a.diff(&b);
        assert_eq!(diff.len(), 1);
        assert!(diff.contains(&"lives".parse().unwrap()));

        let empty = Document::new(
            json!({"balls": [], "lives": 3, "width": 160.0, "frame": 7}),
            &schema,
        );
        assert!(a.diff(&empty).contains(&"balls".parse().unwrap()));
    }

    #[test]
    fn value_equality_is_approximate_for_numbers() {
        assert!(Value::Float(0.1 + 0.2).approx_eq(&Value::Float(0.3)));
        assert!(Value::Int(3).approx_eq(&Value::Float(3.0)));
        assert!(!Value::Bool(true).approx_eq(&Value::Int(1)));
    }
}
