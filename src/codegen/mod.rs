//! Code generation from operation logs
//!
//! An [OperationLog] is rendered as a script that rebuilds the same model
//! through the host modelling library. Each language supplies a
//! [Dialect]: how literals are spelled and how calls are chained. Argument
//! translation is shared, so every language sees the same calls with the
//! same arguments in the same order.

mod python;
mod r;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{BuilderError, CodegenError};
use crate::log::{ArgValue, OperationLog};

pub use python::Python;
pub use r::R;

// ═══════════════════════════════════════════════════════════════════════════════
// Language and Options
// ═══════════════════════════════════════════════════════════════════════════════

/// Target language of generated code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    R,
}

impl Language {
    pub const ALL: [Language; 2] = [Self::Python, Self::R];
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Python => write!(f, "Python"),
            Self::R => write!(f, "R"),
        }
    }
}

impl FromStr for Language {
    type Err = BuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "python" | "py" => Ok(Self::Python),
            "r" => Ok(Self::R),
            other => Err(BuilderError::parse(s, format!("unknown language '{other}'"))),
        }
    }
}

/// Options shared by all languages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodegenOptions {
    /// Name the model is bound to
    pub variable: String,
    /// Emit the import/library lines
    pub header: bool,
    /// Indentation of continuation lines
    pub indent: usize,
    pub python_module: String,
    pub r_library: String,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            variable: "model".to_string(),
            header: true,
            indent: 4,
            python_module: "pharmpy.modeling".to_string(),
            r_library: "pharmr".to_string(),
        }
    }
}

impl CodegenOptions {
    pub fn validate(&self) -> Result<(), BuilderError> {
        let mut chars = self.variable.chars();
        let valid = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(BuilderError::Config(format!(
                "'{}' is not a valid variable name",
                self.variable
            )));
        }
        if self.indent > 8 {
            return Err(BuilderError::Config(format!(
                "indent of {} is wider than 8",
                self.indent
            )));
        }
        if self.python_module.is_empty() || self.r_library.is_empty() {
            return Err(BuilderError::Config(
                "library names must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Dialects
// ═══════════════════════════════════════════════════════════════════════════════

/// One operation with its arguments already spelled as literals
#[derive(Debug, Clone, PartialEq)]
pub struct Call<'a> {
    pub operation: &'a str,
    pub arguments: Vec<(&'a str, String)>,
}

/// How a language spells literals and chains calls
pub trait Dialect {
    fn language(&self) -> Language;

    fn none(&self) -> String;

    fn boolean(&self, value: bool) -> String;

    fn infinity(&self, negative: bool) -> String;

    fn string(&self, value: &str) -> String;

    /// A sequence; `scalars` is true when no item is itself a list or map
    fn list(&self, items: Vec<String>, scalars: bool) -> String;

    fn map(&self, entries: Vec<(String, String)>) -> String;

    /// The complete script for `calls`
    fn assemble(&self, calls: &[Call<'_>], options: &CodegenOptions) -> String;

    /// Spell `value`, or say why it cannot be spelled
    fn literal(&self, value: &ArgValue) -> Result<String, String> {
        Ok(match value {
            ArgValue::None => self.none(),
            ArgValue::Bool(b) => self.boolean(*b),
            ArgValue::Int(i) => i.to_string(),
            ArgValue::Float(x) if x.is_nan() => {
                return Err("NaN has no literal form".to_string())
            }
            ArgValue::Float(x) if x.is_infinite() => self.infinity(*x < 0.0),
            ArgValue::Float(x) => float(*x),
            ArgValue::Str(s) => self.string(s),
            ArgValue::List(items) => {
                let scalars = items
                    .iter()
                    .all(|v| !matches!(v, ArgValue::List(_) | ArgValue::Map(_)));
                let items = items
                    .iter()
                    .map(|v| self.literal(v))
                    .collect::<Result<Vec<_>, _>>()?;
                self.list(items, scalars)
            }
            ArgValue::Map(entries) => {
                let entries = entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.literal(v)?)))
                    .collect::<Result<Vec<_>, String>>()?;
                self.map(entries)
            }
            ArgValue::Opaque { opaque } => {
                return Err(format!("{opaque} has no literal form"))
            }
        })
    }
}

/// Decimal spelling of a finite float, always with a fractional part
fn float(value: f64) -> String {
    let s = value.to_string();
    if s.contains('.') {
        s
    } else {
        format!("{s}.0")
    }
}

fn dialect(language: Language) -> &'static dyn Dialect {
    match language {
        Language::Python => &Python,
        Language::R => &R,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Generator
// ═══════════════════════════════════════════════════════════════════════════════

/// Generated source code
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedCode {
    pub language: Language,
    pub source: String,
    /// Operation names in call order
    pub operations: Vec<String>,
}

impl fmt::Display for GeneratedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// Renders an operation log as source code
pub struct CodeGenerator<'a> {
    log: &'a OperationLog,
    options: &'a CodegenOptions,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(log: &'a OperationLog, options: &'a CodegenOptions) -> Self {
        Self { log, options }
    }

    /// Translate every entry's arguments into literals of `dialect`
    fn calls(&self, dialect: &dyn Dialect) -> Result<Vec<Call<'a>>, CodegenError> {
        self.log
            .iter()
            .map(|entry| {
                let arguments = entry
                    .arguments
                    .iter()
                    .map(|(name, value)| {
                        dialect
                            .literal(value)
                            .map(|literal| (name.as_str(), literal))
                            .map_err(|reason| CodegenError::UnsupportedArgument {
                                operation: entry.operation.clone(),
                                argument: name.clone(),
                                language: dialect.language(),
                                reason,
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Call {
                    operation: entry.operation.as_str(),
                    arguments,
                })
            })
            .collect()
    }

    /// Render the log in `language`
    pub fn generate(&self, language: Language) -> Result<GeneratedCode, CodegenError> {
        if self.log.is_empty() {
            return Err(CodegenError::EmptyLog);
        }
        let dialect = dialect(language);
        let calls = self.calls(dialect)?;
        Ok(GeneratedCode {
            language,
            source: dialect.assemble(&calls, self.options),
            operations: calls.iter().map(|c| c.operation.to_string()).collect(),
        })
    }
}

/// Operation names in order of first use
fn distinct_operations<'a>(calls: &[Call<'a>]) -> Vec<&'a str> {
    let mut names: Vec<&str> = Vec::new();
    for call in calls {
        if !names.contains(&call.operation) {
            names.push(call.operation);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{EntryTag, LogEntry};
    use std::collections::BTreeMap;

    fn log(entries: Vec<LogEntry>) -> OperationLog {
        entries.into_iter().collect()
    }

    #[test]
    fn test_float_always_has_fraction() {
        assert_eq!(float(1.0), "1.0");
        assert_eq!(float(0.0031), "0.0031");
        assert_eq!(float(-70.0), "-70.0");
    }

    #[test]
    fn test_literals_per_language() {
        let value = ArgValue::Map(BTreeMap::from([
            ("POP_CL".to_string(), ArgValue::Float(f64::INFINITY)),
            ("POP_VC".to_string(), ArgValue::None),
        ]));
        assert_eq!(
            Python.literal(&value).unwrap(),
            "{'POP_CL': float('inf'), 'POP_VC': None}"
        );
        assert_eq!(R.literal(&value).unwrap(), "list(POP_CL = Inf, POP_VC = NULL)");

        let list = ArgValue::str_list(["ETA_CL", "ETA_VC"]);
        assert_eq!(Python.literal(&list).unwrap(), "['ETA_CL', 'ETA_VC']");
        assert_eq!(R.literal(&list).unwrap(), r#"c("ETA_CL", "ETA_VC")"#);
    }

    #[test]
    fn test_nan_and_opaque_fail() {
        let entry = LogEntry::new("set_initial_estimates", EntryTag::Parameters).arg(
            "inits",
            ArgValue::Map(BTreeMap::from([("POP_CL".to_string(), ArgValue::Float(f64::NAN))])),
        );
        let options = CodegenOptions::default();
        let log = log(vec![entry]);
        let result = CodeGenerator::new(&log, &options).generate(Language::R);
        assert!(matches!(
            result,
            Err(CodegenError::UnsupportedArgument { ref argument, language: Language::R, .. })
                if argument == "inits"
        ));

        let entry = LogEntry::new("set_dataset", EntryTag::Dataset).arg(
            "path_or_df",
            ArgValue::Opaque {
                opaque: "dataset".to_string(),
            },
        );
        let log = self::log(vec![entry]);
        assert!(CodeGenerator::new(&log, &options)
            .generate(Language::Python)
            .is_err());
    }

    #[test]
    fn test_empty_log() {
        let options = CodegenOptions::default();
        let log = OperationLog::new();
        assert_eq!(
            CodeGenerator::new(&log, &options).generate(Language::Python),
            Err(CodegenError::EmptyLog)
        );
    }

    #[test]
    fn test_language_names() {
        assert_eq!("py".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("R".parse::<Language>().unwrap(), Language::R);
        assert!("julia".parse::<Language>().is_err());
        assert_eq!(Language::R.to_string(), "R");
    }

    #[test]
    fn test_options_validate_variable() {
        let mut options = CodegenOptions::default();
        assert!(options.validate().is_ok());
        options.variable = "my model".to_string();
        assert!(options.validate().is_err());
    }
}
