//! Concrete model objects
//!
//! A [ConcreteModel] is what the catalog creates and transforms. It is a
//! plain value: every transformation takes a model and returns a new one,
//! and the regenerator never keeps one around to mutate later.

mod parameters;
mod summary;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::data::Dataset;
use crate::error::BuilderError;
use crate::features::{
    Absorption, CovariateEffect, Elimination, EtaForm, Feature, PdExpression, RandomEffectLevel,
    Turnover,
};

pub use parameters::{Parameter, Parameters};
pub(crate) use parameters::{lower_bound, upper_bound};

// ═══════════════════════════════════════════════════════════════════════════════
// Model Type and Format
// ═══════════════════════════════════════════════════════════════════════════════

/// Administration route the baseline model is created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    /// Intravenous bolus
    #[default]
    Iv,
    /// Oral (first-order absorption)
    Oral,
}

impl ModelType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Iv => "iv",
            Self::Oral => "oral",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ModelType {
    type Err = BuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "iv" => Ok(Self::Iv),
            "oral" => Ok(Self::Oral),
            other => Err(BuilderError::parse(s, format!("unknown model type '{other}'"))),
        }
    }
}

/// Output format of the concrete model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    #[default]
    Generic,
    Nonmem,
    Nlmixr,
}

impl TargetFormat {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Nonmem => "nonmem",
            Self::Nlmixr => "nlmixr",
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for TargetFormat {
    type Err = BuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "generic" => Ok(Self::Generic),
            "nonmem" => Ok(Self::Nonmem),
            "nlmixr" => Ok(Self::Nlmixr),
            other => Err(BuilderError::parse(s, format!("unknown format '{other}'"))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Structural Model
// ═══════════════════════════════════════════════════════════════════════════════

/// PK structure of a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkStructure {
    /// `None` for IV models, which have no depot
    pub absorption: Option<Absorption>,
    pub elimination: Elimination,
    pub transits: u32,
    pub peripherals: u32,
    pub lag_time: bool,
}

/// PD link attached to the PK model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PdLink {
    Direct(PdExpression),
    EffectCompartment(PdExpression),
    Indirect(PdExpression, Turnover),
}

impl PdLink {
    pub fn expression(&self) -> PdExpression {
        match self {
            Self::Direct(e) | Self::EffectCompartment(e) | Self::Indirect(e, _) => *e,
        }
    }

    pub fn to_feature(&self) -> Feature {
        match *self {
            Self::Direct(e) => Feature::DirectEffect(e),
            Self::EffectCompartment(e) => Feature::EffectCompartment(e),
            Self::Indirect(expression, turnover) => Feature::IndirectEffect {
                expression,
                turnover,
            },
        }
    }
}

/// An individual parameter and the population parameter it is built on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndividualParameter {
    pub name: String,
    pub population: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Random Effects
// ═══════════════════════════════════════════════════════════════════════════════

/// One random effect (eta) on an individual parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomEffect {
    /// Eta name, e.g. `ETA_CL`
    pub name: String,
    pub parameter: String,
    pub level: RandomEffectLevel,
    pub form: EtaForm,
    /// Variance parameter, e.g. `IIV_CL`
    pub variance: String,
    /// Occasion column for IOV
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occasion: Option<String>,
}

/// A joint distribution over two or more etas of the same level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CovarianceBlock {
    pub level: RandomEffectLevel,
    /// Eta names in block order
    pub etas: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Residual Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Base residual error model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseError {
    Additive,
    Proportional,
    Combined,
}

/// Residual error configuration for one response variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorModel {
    pub base: BaseError,
    pub iiv_on_ruv: bool,
    pub power_on_ruv: bool,
    /// Cutoff of a time-varying error model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_varying: Option<f64>,
}

impl ErrorModel {
    pub fn new(base: BaseError) -> Self {
        Self {
            base,
            iiv_on_ruv: false,
            power_on_ruv: false,
            time_varying: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Covariates, Allometry and Estimation
// ═══════════════════════════════════════════════════════════════════════════════

/// A covariate effect together with the parameters it introduced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCovariate {
    pub effect: CovariateEffect,
    pub thetas: Vec<String>,
}

/// Allometric scaling of clearance and volume parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allometry {
    /// Body size column, e.g. `WGT`
    pub variable: String,
    pub reference_value: f64,
    /// Parameters to scale; all clearances and volumes when empty
    #[serde(default)]
    pub parameters: Vec<String>,
    /// Fix the allometric exponents
    #[serde(default = "default_true")]
    pub fixed: bool,
}

fn default_true() -> bool {
    true
}

impl Allometry {
    pub fn new(variable: impl Into<String>, reference_value: f64) -> Self {
        Self {
            variable: variable.into(),
            reference_value,
            parameters: Vec::new(),
            fixed: true,
        }
    }
}

/// Estimation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstimationMethod {
    #[serde(rename = "FO")]
    Fo,
    #[serde(rename = "FOCE")]
    Foce,
    #[serde(rename = "ITS")]
    Its,
    #[serde(rename = "IMPMAP")]
    Impmap,
    #[serde(rename = "IMP")]
    Imp,
    #[serde(rename = "SAEM")]
    Saem,
    #[serde(rename = "BAYES")]
    Bayes,
    #[serde(rename = "LAPLACE")]
    Laplace,
}

impl EstimationMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fo => "FO",
            Self::Foce => "FOCE",
            Self::Its => "ITS",
            Self::Impmap => "IMPMAP",
            Self::Imp => "IMP",
            Self::Saem => "SAEM",
            Self::Bayes => "BAYES",
            Self::Laplace => "LAPLACE",
        }
    }
}

/// One estimation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationStep {
    pub method: EstimationMethod,
    #[serde(default)]
    pub interaction: bool,
    #[serde(default)]
    pub evaluation: bool,
    #[serde(default)]
    pub laplace: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_evaluations: Option<u32>,
}

impl EstimationStep {
    pub fn new(method: EstimationMethod) -> Self {
        Self {
            method,
            interaction: false,
            evaluation: false,
            laplace: false,
            maximum_evaluations: None,
        }
    }

    pub fn with_interaction(mut self, interaction: bool) -> Self {
        self.interaction = interaction;
        self
    }

    pub fn with_evaluation(mut self, evaluation: bool) -> Self {
        self.evaluation = evaluation;
        self
    }

    pub fn with_maximum_evaluations(mut self, n: u32) -> Self {
        self.maximum_evaluations = Some(n);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ConcreteModel
// ═══════════════════════════════════════════════════════════════════════════════

/// A fully specified pharmacometric model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcreteModel {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub model_type: ModelType,
    pub format: TargetFormat,
    pub structure: PkStructure,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pd_link: Option<PdLink>,
    pub individual_parameters: Vec<IndividualParameter>,
    pub parameters: Parameters,
    pub random_effects: Vec<RandomEffect>,
    pub blocks: Vec<CovarianceBlock>,
    /// Error model per response variable (DV number)
    pub error_models: BTreeMap<u32, ErrorModel>,
    pub covariates: Vec<AppliedCovariate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allometry: Option<Allometry>,
    pub estimation_steps: Vec<EstimationStep>,
    #[serde(default)]
    pub covariance_step: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<Dataset>,
}

impl ConcreteModel {
    /// Names of the individual parameters, in definition order
    pub fn individual_parameter_names(&self) -> Vec<&str> {
        self.individual_parameters
            .iter()
            .map(|p| p.name.as_str())
            .collect()
    }

    pub fn individual_parameter_set(&self) -> BTreeSet<String> {
        self.individual_parameters
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn individual_parameter(&self, name: &str) -> Option<&IndividualParameter> {
        self.individual_parameters.iter().find(|p| p.name == name)
    }

    pub fn has_individual_parameter(&self, name: &str) -> bool {
        self.individual_parameter(name).is_some()
    }

    /// Response variables (DV numbers) defined by the model
    pub fn responses(&self) -> Vec<u32> {
        self.error_models.keys().copied().collect()
    }

    pub fn error_model(&self, dv: u32) -> Option<&ErrorModel> {
        self.error_models.get(&dv)
    }

    /// Random effect of `level` on `parameter`
    pub fn random_effect(&self, parameter: &str, level: RandomEffectLevel) -> Option<&RandomEffect> {
        self.random_effects
            .iter()
            .find(|eta| eta.parameter == parameter && eta.level == level)
    }

    pub fn has_random_effect(&self, parameter: &str, level: RandomEffectLevel) -> bool {
        self.random_effect(parameter, level).is_some()
    }

    /// Block containing `eta`, if any
    pub fn block_of(&self, eta: &str) -> Option<&CovarianceBlock> {
        self.blocks.iter().find(|b| b.etas.iter().any(|e| e == eta))
    }

    /// Whether a covariate effect of `covariate` on `parameter` is present
    pub fn has_covariate_effect(&self, parameter: &str, covariate: &str) -> bool {
        self.covariates
            .iter()
            .any(|c| c.effect.parameter == parameter && c.effect.covariate == covariate)
    }

    /// Human readable summary of statements, random effects and parameters
    pub fn summary(&self) -> String {
        summary::render(self)
    }
}

impl fmt::Display for ConcreteModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}
