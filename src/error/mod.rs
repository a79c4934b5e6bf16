//! Error types for model building, regeneration and code generation

use thiserror::Error;

use crate::codegen::Language;

/// Errors that can occur while editing or regenerating a model
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuilderError {
    // ─────────────────────────────────────────────────────────────────────────
    // Feature Errors
    // ─────────────────────────────────────────────────────────────────────────
    /// A feature statement could not be parsed
    #[error("Failed to parse feature statement '{input}': {message}")]
    Parse { input: String, message: String },

    /// The catalog found no transformation path to the requested feature
    #[error("Cannot realise feature '{feature}': {reason}")]
    InfeasibleDiff { feature: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Error Model Errors
    // ─────────────────────────────────────────────────────────────────────────
    /// More than one base error model was requested for the same response variable
    #[error(
        "Ambiguous error model for response variable {dv}: requested bases {requested:?}, \
         choose exactly one of add, prop or comb"
    )]
    AmbiguousErrorModel { dv: u32, requested: Vec<String> },

    /// The error model name is not in the registry
    #[error("Unknown error model '{0}'")]
    UnknownErrorModel(String),

    /// No such response variable in the model
    #[error("Response variable {0} is not defined by the model")]
    UnknownResponseVariable(u32),

    // ─────────────────────────────────────────────────────────────────────────
    // Parameter Errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Parameter does not exist in the model
    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    /// Parameter bounds do not enclose the initial estimate
    #[error("Invalid bounds for parameter '{name}': {lower} <= {init} <= {upper} does not hold")]
    InvalidBounds {
        name: String,
        init: f64,
        lower: f64,
        upper: f64,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Dataset and Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Dataset could not be read
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// No session is registered under this id
    #[error("Unknown session '{0}'")]
    UnknownSession(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Code Generation Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

impl BuilderError {
    /// Create an infeasible diff error naming the offending feature
    pub fn infeasible(feature: impl ToString, reason: impl Into<String>) -> Self {
        Self::InfeasibleDiff {
            feature: feature.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a parse error
    pub fn parse(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            input: input.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while rendering an operation log as source code
///
/// These are fatal for a single render call only.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodegenError {
    /// An argument value has no literal form in the target language
    #[error("Cannot render argument '{argument}' of '{operation}' as {language}: {reason}")]
    UnsupportedArgument {
        operation: String,
        argument: String,
        language: Language,
        reason: String,
    },

    /// The log has no entries to render
    #[error("Operation log is empty")]
    EmptyLog,
}
