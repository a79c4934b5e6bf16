//! Operation log: the ordered record of what one regeneration applied
//!
//! Entries are plain data (operation name plus bound arguments). They are
//! what code generation consumes, so nothing in here knows how an operation
//! is carried out.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A language-neutral argument literal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    None,
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "float_literal")] f64),
    Str(String),
    List(Vec<ArgValue>),
    /// An in-memory value with no literal form (e.g. a dataset without a path)
    Opaque { opaque: String },
    Map(BTreeMap<String, ArgValue>),
}

// JSON has no infinities, so non-finite floats are written as `{"float": "-inf"}`
mod float_literal {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Special {
        float: String,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Finite(f64),
        Special(Special),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            return serializer.serialize_f64(*value);
        }
        let float = if value.is_nan() {
            "nan"
        } else if value.is_sign_positive() {
            "inf"
        } else {
            "-inf"
        };
        Special {
            float: float.to_string(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Finite(value) => Ok(value),
            Repr::Special(Special { float }) => match float.as_str() {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                "nan" => Ok(f64::NAN),
                other => Err(D::Error::custom(format!("unknown float literal '{other}'"))),
            },
        }
    }
}

impl ArgValue {
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    pub fn str_list<S: AsRef<str>>(items: impl IntoIterator<Item = S>) -> Self {
        Self::List(
            items
                .into_iter()
                .map(|s| Self::Str(s.as_ref().to_string()))
                .collect(),
        )
    }

    /// Name of the value's kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Opaque { .. } => "opaque",
        }
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for ArgValue {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl<T: Into<ArgValue>> From<Option<T>> for ArgValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::None)
    }
}

/// What part of regeneration produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryTag {
    Baseline,
    Dataset,
    /// Name/description; never a structural change
    Attribute,
    Structural,
    PdLink,
    ErrorModel,
    Variability,
    Covariate,
    Allometry,
    Estimation,
    Parameters,
    Format,
}

/// One applied operation with its bound arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub operation: String,
    /// Keyword arguments in signature order
    pub arguments: Vec<(String, ArgValue)>,
    pub tag: EntryTag,
}

impl LogEntry {
    pub fn new(operation: impl Into<String>, tag: EntryTag) -> Self {
        Self {
            operation: operation.into(),
            arguments: Vec::new(),
            tag,
        }
    }

    /// Append a keyword argument
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.arguments.push((name.into(), value.into()));
        self
    }

    pub fn argument(&self, name: &str) -> Option<&ArgValue> {
        self.arguments
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self
            .arguments
            .iter()
            .map(|(name, value)| format!("{name}={value:?}"))
            .collect();
        write!(f, "{}({})", self.operation, args.join(", "))
    }
}

/// The ordered operations applied by one regeneration
///
/// A log is built once and then only read; a new regeneration produces a
/// new log rather than extending an old one.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationLog(Vec<LogEntry>);

impl OperationLog {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub(crate) fn push(&mut self, entry: LogEntry) {
        self.0.push(entry);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.0.iter()
    }

    /// Operation names in order
    pub fn operations(&self) -> Vec<&str> {
        self.0.iter().map(|e| e.operation.as_str()).collect()
    }

    /// Entries produced by one part of regeneration
    pub fn tagged(&self, tag: EntryTag) -> impl Iterator<Item = &LogEntry> {
        self.0.iter().filter(move |e| e.tag == tag)
    }

    /// Serialize as pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl FromIterator<LogEntry> for OperationLog {
    fn from_iter<T: IntoIterator<Item = LogEntry>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a OperationLog {
    type Item = &'a LogEntry;
    type IntoIter = std::slice::Iter<'a, LogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
