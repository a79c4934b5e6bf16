//! Registry of residual error model operations
//!
//! Error models are requested by short symbolic names (`add`, `prop`,
//! `comb`, `iiv-on-ruv`, `power`, `time-varying`). Names are resolved to an
//! [ErrorModelKind] when the request is made, so an unknown name never
//! reaches regeneration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BuilderError;
use crate::model::{BaseError, ConcreteModel};

/// A residual error model operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ErrorModelKind {
    Additive,
    Proportional,
    Combined,
    IivOnRuv,
    PowerOnRuv,
    TimeVarying,
}

impl ErrorModelKind {
    /// All kinds, in registry order
    pub const ALL: [ErrorModelKind; 6] = [
        Self::Additive,
        Self::Proportional,
        Self::Combined,
        Self::IivOnRuv,
        Self::PowerOnRuv,
        Self::TimeVarying,
    ];

    /// Short symbolic name
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Additive => "add",
            Self::Proportional => "prop",
            Self::Combined => "comb",
            Self::IivOnRuv => "iiv-on-ruv",
            Self::PowerOnRuv => "power",
            Self::TimeVarying => "time-varying",
        }
    }

    /// Name of the catalog operation
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Additive => "set_additive_error_model",
            Self::Proportional => "set_proportional_error_model",
            Self::Combined => "set_combined_error_model",
            Self::IivOnRuv => "set_iiv_on_ruv",
            Self::PowerOnRuv => "set_power_on_ruv",
            Self::TimeVarying => "set_time_varying_error_model",
        }
    }

    /// The base error this kind selects, if it is a base kind
    pub fn base(&self) -> Option<BaseError> {
        match self {
            Self::Additive => Some(BaseError::Additive),
            Self::Proportional => Some(BaseError::Proportional),
            Self::Combined => Some(BaseError::Combined),
            _ => None,
        }
    }

    pub fn is_base(&self) -> bool {
        self.base().is_some()
    }

    /// Whether `model` already has this error model on response variable `dv`
    pub fn is_satisfied(&self, model: &ConcreteModel, dv: u32) -> bool {
        let Some(error) = model.error_model(dv) else {
            return false;
        };
        match self {
            Self::Additive | Self::Proportional | Self::Combined => {
                Some(error.base) == self.base()
            }
            Self::IivOnRuv => error.iiv_on_ruv,
            Self::PowerOnRuv => error.power_on_ruv,
            Self::TimeVarying => error.time_varying.is_some(),
        }
    }
}

impl fmt::Display for ErrorModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for ErrorModelKind {
    type Err = BuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.symbol() == s.trim().to_lowercase())
            .ok_or_else(|| BuilderError::UnknownErrorModel(s.to_string()))
    }
}

impl TryFrom<String> for ErrorModelKind {
    type Error = BuilderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ErrorModelKind> for String {
    fn from(kind: ErrorModelKind) -> Self {
        kind.symbol().to_string()
    }
}

/// Resolve and check the error model names requested for one response variable
///
/// At most one base kind may be requested; duplicates are dropped keeping
/// the first occurrence.
pub fn resolve_error_models<S: AsRef<str>>(
    dv: u32,
    names: &[S],
) -> Result<Vec<ErrorModelKind>, BuilderError> {
    let mut kinds: Vec<ErrorModelKind> = Vec::new();
    for name in names {
        let kind: ErrorModelKind = name.as_ref().parse()?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }

    let bases: Vec<String> = kinds
        .iter()
        .filter(|k| k.is_base())
        .map(|k| k.symbol().to_string())
        .collect();
    if bases.len() > 1 {
        return Err(BuilderError::AmbiguousErrorModel {
            dv,
            requested: bases,
        });
    }
    Ok(kinds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbols_round_trip() {
        for kind in ErrorModelKind::ALL {
            assert_eq!(kind.symbol().parse::<ErrorModelKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_name() {
        assert_eq!(
            "exponential".parse::<ErrorModelKind>(),
            Err(BuilderError::UnknownErrorModel("exponential".into()))
        );
    }

    #[test]
    fn test_conflicting_bases_rejected() {
        let err = resolve_error_models(1, &["add", "iiv-on-ruv", "prop"]).unwrap_err();
        assert_eq!(
            err,
            BuilderError::AmbiguousErrorModel {
                dv: 1,
                requested: vec!["add".into(), "prop".into()]
            }
        );
    }

    #[test]
    fn test_duplicates_dropped() {
        let kinds = resolve_error_models(1, &["add", "power", "add"]).unwrap();
        assert_eq!(
            kinds,
            vec![ErrorModelKind::Additive, ErrorModelKind::PowerOnRuv]
        );
    }
}
