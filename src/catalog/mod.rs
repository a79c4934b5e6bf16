//! Transformation catalog
//!
//! The catalog knows how to create baseline models, how to read a model back
//! into features and how to bridge two feature sets with the fewest
//! operations. Operations are plain data ([Operation]); applying one is a
//! `match` in the catalog, and recording one is [Operation::to_entry].
//!
//! [PkCatalog] is the built-in catalog for compartmental PK models with an
//! optional PD link.

mod error_model;
mod pk;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::data::Dataset;
use crate::error::BuilderError;
use crate::features::{
    Absorption, CovariateEffect, Elimination, EtaForm, FeatureSet, RandomEffectLevel, Turnover,
};
use crate::log::{ArgValue, EntryTag, LogEntry};
use crate::model::{Allometry, ConcreteModel, EstimationStep, ModelType, PdLink, TargetFormat};

pub use error_model::{resolve_error_models, ErrorModelKind};
pub use pk::PkCatalog;

/// A catalog of model transformations
pub trait TransformationCatalog {
    /// A fresh model for `model_type`, before any user-driven transformation
    fn create_baseline(&self, model_type: ModelType) -> ConcreteModel;

    /// The declarative features `model` currently has
    fn baseline_features(&self, model: &ConcreteModel) -> FeatureSet;

    /// Ordered operations turning a model with `current` features into one with `target`
    ///
    /// Both sets must come from the same partition (PK structure, PD link,
    /// variability or covariates). Mixing partitions is rejected.
    fn minimal_transformations(
        &self,
        current: &FeatureSet,
        target: &FeatureSet,
        model: &ConcreteModel,
    ) -> Result<Vec<Operation>, BuilderError>;

    /// Apply one operation, returning the transformed model
    fn apply(&self, model: ConcreteModel, operation: &Operation)
        -> Result<ConcreteModel, BuilderError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Naming
// ═══════════════════════════════════════════════════════════════════════════════

/// Eta name of a random effect on `parameter`
pub fn eta_name(parameter: &str, level: RandomEffectLevel) -> String {
    match level {
        RandomEffectLevel::Iiv => format!("ETA_{parameter}"),
        RandomEffectLevel::Iov => format!("ETA_IOV_{parameter}"),
    }
}

/// Variance parameter name of a random effect on `parameter`
pub fn variance_name(parameter: &str, level: RandomEffectLevel) -> String {
    match level {
        RandomEffectLevel::Iiv => format!("IIV_{parameter}"),
        RandomEffectLevel::Iov => format!("IOV_{parameter}"),
    }
}

/// Population parameter name of an individual parameter
pub fn population_name(parameter: &str) -> String {
    format!("POP_{parameter}")
}

// ═══════════════════════════════════════════════════════════════════════════════
// Operations
// ═══════════════════════════════════════════════════════════════════════════════

/// One catalog operation with its arguments bound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateBasicPkModel {
        model_type: ModelType,
    },
    SetDataset {
        dataset: Dataset,
    },
    SetName {
        name: String,
    },
    SetDescription {
        description: String,
    },
    SetAbsorption {
        absorption: Absorption,
    },
    SetElimination {
        elimination: Elimination,
    },
    SetTransitCompartments {
        count: u32,
    },
    SetLagTime {
        enabled: bool,
    },
    SetPeripheralCompartments {
        count: u32,
    },
    SetPdLink {
        link: PdLink,
    },
    SetErrorModel {
        kind: ErrorModelKind,
        dv: u32,
        /// Only used by the time-varying error model
        cutoff: f64,
    },
    AddIiv {
        parameter: String,
        form: EtaForm,
        initial_estimate: f64,
    },
    RemoveIiv {
        parameter: String,
    },
    AddIov {
        parameter: String,
        form: EtaForm,
        occasion: String,
        initial_estimate: f64,
    },
    RemoveIov {
        parameter: String,
    },
    CreateJointDistribution {
        level: RandomEffectLevel,
        parameters: Vec<String>,
    },
    SplitJointDistribution {
        level: RandomEffectLevel,
        parameters: Vec<String>,
    },
    AddCovariateEffect {
        effect: CovariateEffect,
    },
    RemoveCovariateEffect {
        parameter: String,
        covariate: String,
    },
    AddAllometry {
        allometry: Allometry,
    },
    SetEstimationStep {
        index: usize,
        step: EstimationStep,
    },
    AddEstimationStep {
        step: EstimationStep,
    },
    AddCovarianceStep,
    SetInitialEstimates {
        values: BTreeMap<String, f64>,
    },
    SetLowerBounds {
        bounds: BTreeMap<String, f64>,
    },
    SetUpperBounds {
        bounds: BTreeMap<String, f64>,
    },
    FixParameters {
        names: Vec<String>,
    },
    UnfixParameters {
        names: Vec<String>,
    },
    ConvertModel {
        format: TargetFormat,
    },
}

fn float_map(values: &BTreeMap<String, f64>) -> ArgValue {
    ArgValue::Map(
        values
            .iter()
            .map(|(name, value)| (name.clone(), ArgValue::Float(*value)))
            .collect(),
    )
}

fn rvs(parameters: &[String], level: RandomEffectLevel) -> ArgValue {
    ArgValue::str_list(parameters.iter().map(|p| eta_name(p, level)))
}

impl Operation {
    /// The part of regeneration this operation belongs to
    pub fn tag(&self) -> EntryTag {
        match self {
            Self::CreateBasicPkModel { .. } => EntryTag::Baseline,
            Self::SetDataset { .. } => EntryTag::Dataset,
            Self::SetName { .. } | Self::SetDescription { .. } => EntryTag::Attribute,
            Self::SetAbsorption { .. }
            | Self::SetElimination { .. }
            | Self::SetTransitCompartments { .. }
            | Self::SetLagTime { .. }
            | Self::SetPeripheralCompartments { .. } => EntryTag::Structural,
            Self::SetPdLink { .. } => EntryTag::PdLink,
            Self::SetErrorModel { .. } => EntryTag::ErrorModel,
            Self::AddIiv { .. }
            | Self::RemoveIiv { .. }
            | Self::AddIov { .. }
            | Self::RemoveIov { .. }
            | Self::CreateJointDistribution { .. }
            | Self::SplitJointDistribution { .. } => EntryTag::Variability,
            Self::AddCovariateEffect { .. } | Self::RemoveCovariateEffect { .. } => {
                EntryTag::Covariate
            }
            Self::AddAllometry { .. } => EntryTag::Allometry,
            Self::SetEstimationStep { .. }
            | Self::AddEstimationStep { .. }
            | Self::AddCovarianceStep => EntryTag::Estimation,
            Self::SetInitialEstimates { .. }
            | Self::SetLowerBounds { .. }
            | Self::SetUpperBounds { .. }
            | Self::FixParameters { .. }
            | Self::UnfixParameters { .. } => EntryTag::Parameters,
            Self::ConvertModel { .. } => EntryTag::Format,
        }
    }

    /// Name of the operation as it appears in generated code
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateBasicPkModel { .. } => "create_basic_pk_model",
            Self::SetDataset { .. } => "set_dataset",
            Self::SetName { .. } => "set_name",
            Self::SetDescription { .. } => "set_description",
            Self::SetAbsorption { absorption } => match absorption {
                Absorption::Instantaneous => "set_instantaneous_absorption",
                Absorption::FirstOrder => "set_first_order_absorption",
                Absorption::ZeroOrder => "set_zero_order_absorption",
                Absorption::SeqZoFo => "set_seq_zo_fo_absorption",
            },
            Self::SetElimination { elimination } => match elimination {
                Elimination::FirstOrder => "set_first_order_elimination",
                Elimination::ZeroOrder => "set_zero_order_elimination",
                Elimination::MichaelisMenten => "set_michaelis_menten_elimination",
                Elimination::MixedMmFo => "set_mixed_mm_fo_elimination",
            },
            Self::SetTransitCompartments { .. } => "set_transit_compartments",
            Self::SetLagTime { enabled: true } => "add_lag_time",
            Self::SetLagTime { enabled: false } => "remove_lag_time",
            Self::SetPeripheralCompartments { .. } => "set_peripheral_compartments",
            Self::SetPdLink { link } => match link {
                PdLink::Direct(_) => "set_direct_effect",
                PdLink::EffectCompartment(_) => "add_effect_compartment",
                PdLink::Indirect(..) => "add_indirect_effect",
            },
            Self::SetErrorModel { kind, .. } => kind.operation(),
            Self::AddIiv { .. } => "add_iiv",
            Self::RemoveIiv { .. } => "remove_iiv",
            Self::AddIov { .. } => "add_iov",
            Self::RemoveIov { .. } => "remove_iov",
            Self::CreateJointDistribution { .. } => "create_joint_distribution",
            Self::SplitJointDistribution { .. } => "split_joint_distribution",
            Self::AddCovariateEffect { .. } => "add_covariate_effect",
            Self::RemoveCovariateEffect { .. } => "remove_covariate_effect",
            Self::AddAllometry { .. } => "add_allometry",
            Self::SetEstimationStep { .. } => "set_estimation_step",
            Self::AddEstimationStep { .. } => "add_estimation_step",
            Self::AddCovarianceStep => "add_covariance_step",
            Self::SetInitialEstimates { .. } => "set_initial_estimates",
            Self::SetLowerBounds { .. } => "set_lower_bounds",
            Self::SetUpperBounds { .. } => "set_upper_bounds",
            Self::FixParameters { .. } => "fix_parameters",
            Self::UnfixParameters { .. } => "unfix_parameters",
            Self::ConvertModel { .. } => "convert_model",
        }
    }

    /// Record this operation as a log entry with keyword arguments in signature order
    pub fn to_entry(&self) -> LogEntry {
        let entry = LogEntry::new(self.name(), self.tag());
        match self {
            Self::CreateBasicPkModel { model_type } => {
                entry.arg("administration", model_type.name())
            }
            Self::SetDataset { dataset } => {
                let path = match dataset.path() {
                    Some(path) => ArgValue::str(path.display().to_string()),
                    None => ArgValue::Opaque {
                        opaque: format!(
                            "dataset ({} rows x {} columns)",
                            dataset.nrows(),
                            dataset.ncols()
                        ),
                    },
                };
                let column_types = ArgValue::Map(
                    dataset
                        .info()
                        .overrides()
                        .into_iter()
                        .map(|(name, kind)| (name, ArgValue::str(kind.name())))
                        .collect(),
                );
                entry
                    .arg("path_or_df", path)
                    .arg("column_types", column_types)
            }
            Self::SetName { name } => entry.arg("new_name", name.as_str()),
            Self::SetDescription { description } => {
                entry.arg("new_description", description.as_str())
            }
            Self::SetAbsorption { .. } | Self::SetElimination { .. } => entry,
            Self::SetTransitCompartments { count } => entry.arg("n", *count),
            Self::SetLagTime { .. } => entry,
            Self::SetPeripheralCompartments { count } => entry.arg("n", *count),
            Self::SetPdLink { link } => {
                let entry = entry.arg("expr", link.expression().name());
                match link {
                    PdLink::Indirect(_, turnover) => {
                        entry.arg("prod", *turnover == Turnover::Production)
                    }
                    _ => entry,
                }
            }
            Self::SetErrorModel { kind, dv, cutoff } => match kind {
                ErrorModelKind::Additive
                | ErrorModelKind::Proportional
                | ErrorModelKind::Combined => entry.arg("dv", *dv),
                ErrorModelKind::IivOnRuv | ErrorModelKind::PowerOnRuv => {
                    entry.arg("dv", ArgValue::List(vec![ArgValue::from(*dv)]))
                }
                ErrorModelKind::TimeVarying => entry
                    .arg("cutoff", *cutoff)
                    .arg("dv", ArgValue::List(vec![ArgValue::from(*dv)])),
            },
            Self::AddIiv {
                parameter,
                form,
                initial_estimate,
            } => entry
                .arg("list_of_parameters", ArgValue::str_list([parameter]))
                .arg("expression", form.expression())
                .arg("initial_estimate", *initial_estimate)
                .arg(
                    "eta_names",
                    ArgValue::str_list([eta_name(parameter, RandomEffectLevel::Iiv)]),
                ),
            Self::RemoveIiv { parameter } => entry.arg(
                "to_remove",
                ArgValue::str_list([eta_name(parameter, RandomEffectLevel::Iiv)]),
            ),
            Self::AddIov {
                parameter,
                form,
                occasion,
                initial_estimate,
            } => entry
                .arg("occ", occasion.as_str())
                .arg("list_of_parameters", ArgValue::str_list([parameter]))
                .arg("expression", form.expression())
                .arg("initial_estimate", *initial_estimate)
                .arg(
                    "eta_names",
                    ArgValue::str_list([eta_name(parameter, RandomEffectLevel::Iov)]),
                )
                .arg("distribution", "disjoint"),
            Self::RemoveIov { parameter } => entry.arg(
                "to_remove",
                ArgValue::str_list([eta_name(parameter, RandomEffectLevel::Iov)]),
            ),
            Self::CreateJointDistribution { level, parameters }
            | Self::SplitJointDistribution { level, parameters } => {
                entry.arg("rvs", rvs(parameters, *level))
            }
            Self::AddCovariateEffect { effect } => entry
                .arg("parameter", effect.parameter.as_str())
                .arg("covariate", effect.covariate.as_str())
                .arg("effect", effect.effect.name())
                .arg("operation", effect.operation.symbol()),
            Self::RemoveCovariateEffect {
                parameter,
                covariate,
            } => entry
                .arg("parameter", parameter.as_str())
                .arg("covariate", covariate.as_str()),
            Self::AddAllometry { allometry } => {
                let parameters = if allometry.parameters.is_empty() {
                    ArgValue::None
                } else {
                    ArgValue::str_list(&allometry.parameters)
                };
                entry
                    .arg("allometric_variable", allometry.variable.as_str())
                    .arg("reference_value", allometry.reference_value)
                    .arg("parameters", parameters)
                    .arg("fixed", allometry.fixed)
            }
            Self::SetEstimationStep { index, step } => {
                let entry = entry
                    .arg("method", step.method.name())
                    .arg("idx", *index as i64);
                step_arguments(entry, step)
            }
            Self::AddEstimationStep { step } => {
                step_arguments(entry.arg("method", step.method.name()), step)
            }
            Self::AddCovarianceStep => entry,
            Self::SetInitialEstimates { values } => entry.arg("inits", float_map(values)),
            Self::SetLowerBounds { bounds } | Self::SetUpperBounds { bounds } => {
                entry.arg("bounds", float_map(bounds))
            }
            Self::FixParameters { names } | Self::UnfixParameters { names } => {
                entry.arg("parameter_names", ArgValue::str_list(names))
            }
            Self::ConvertModel { format } => entry.arg("to_format", format.name()),
        }
    }
}

fn step_arguments(entry: LogEntry, step: &EstimationStep) -> LogEntry {
    entry
        .arg("interaction", step.interaction)
        .arg("evaluation", step.evaluation)
        .arg("laplace", step.laplace)
        .arg("maximum_evaluations", step.maximum_evaluations)
}
