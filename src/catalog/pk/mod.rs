//! Built-in catalog for compartmental PK models
//!
//! Parameter names follow one convention throughout: an individual parameter
//! `X` has population parameter `POP_X`, IIV eta `ETA_X` with variance
//! `IIV_X` and IOV eta `ETA_IOV_X` with variance `IOV_X`.

mod apply;
mod diff;

use std::collections::{BTreeMap, BTreeSet};

use super::{Operation, TransformationCatalog};
use crate::error::BuilderError;
use crate::features::{
    Absorption, Elimination, EtaForm, Feature, FeatureSet, PdExpression, RandomEffectLevel,
};
use crate::model::{
    BaseError, ConcreteModel, ErrorModel, EstimationMethod, EstimationStep, ModelType, Parameters,
    PdLink, PkStructure, TargetFormat,
};

/// Name given to freshly created models
pub const BASELINE_NAME: &str = "start";

/// Initial variance of the IIV a baseline model starts with
const BASELINE_IIV_INIT: f64 = 0.1;

/// Catalog of PK structural, PD link, variability, error and covariate operations
#[derive(Debug, Clone, PartialEq)]
pub struct PkCatalog {
    iiv_init: f64,
    iov_init: f64,
    covariance_init: f64,
}

impl Default for PkCatalog {
    fn default() -> Self {
        Self {
            iiv_init: 0.09,
            iov_init: 0.01,
            covariance_init: 0.0031,
        }
    }
}

impl PkCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial variances for random effects added by [TransformationCatalog::minimal_transformations]
    pub fn with_initial_variances(mut self, iiv: f64, iov: f64) -> Self {
        self.iiv_init = iiv;
        self.iov_init = iov;
        self
    }

    /// Initial covariance between etas joined into a block
    pub fn with_covariance_init(mut self, covariance: f64) -> Self {
        self.covariance_init = covariance;
        self
    }
}

/// Individual parameters implied by a structure and PD link, in definition order
pub(crate) fn structural_parameters(
    structure: &PkStructure,
    pd_link: Option<&PdLink>,
) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut push = |name: &str| names.push(name.to_string());

    match structure.absorption {
        Some(Absorption::FirstOrder) => push("MAT"),
        Some(Absorption::ZeroOrder) => push("D1"),
        Some(Absorption::SeqZoFo) => {
            push("MAT");
            push("D1");
        }
        Some(Absorption::Instantaneous) | None => {}
    }
    match structure.elimination {
        Elimination::FirstOrder => push("CL"),
        Elimination::ZeroOrder | Elimination::MichaelisMenten => {
            push("CL");
            push("KM");
        }
        Elimination::MixedMmFo => {
            push("CL");
            push("CLMM");
            push("KM");
        }
    }
    push("VC");
    if structure.transits > 0 {
        push("MDT");
    }
    if structure.lag_time {
        push("TLAG");
    }
    for i in 1..=structure.peripherals {
        push(&format!("QP{i}"));
        push(&format!("VP{i}"));
    }

    if let Some(link) = pd_link {
        push("B");
        match link.expression() {
            PdExpression::Linear => push("SLOPE"),
            PdExpression::Emax => {
                push("E_MAX");
                push("EC_50");
            }
            PdExpression::Sigmoid => {
                push("E_MAX");
                push("EC_50");
                push("N");
            }
        }
        match link {
            PdLink::Direct(_) => {}
            PdLink::EffectCompartment(_) => push("KE0"),
            PdLink::Indirect(..) => push("KOUT"),
        }
    }
    names
}

impl TransformationCatalog for PkCatalog {
    fn create_baseline(&self, model_type: ModelType) -> ConcreteModel {
        let structure = PkStructure {
            absorption: match model_type {
                ModelType::Iv => None,
                ModelType::Oral => Some(Absorption::FirstOrder),
            },
            elimination: Elimination::FirstOrder,
            transits: 0,
            peripherals: 0,
            lag_time: false,
        };

        let mut model = ConcreteModel {
            name: BASELINE_NAME.to_string(),
            description: String::new(),
            model_type,
            format: TargetFormat::Generic,
            structure,
            pd_link: None,
            individual_parameters: Vec::new(),
            parameters: Parameters::new(),
            random_effects: Vec::new(),
            blocks: Vec::new(),
            error_models: BTreeMap::from([(1, ErrorModel::new(BaseError::Proportional))]),
            covariates: Vec::new(),
            allometry: None,
            estimation_steps: vec![EstimationStep::new(EstimationMethod::Foce).with_interaction(true)],
            covariance_step: false,
            dataset: None,
        };

        apply::sync_structure(&mut model);
        for name in structural_parameters(&model.structure, None) {
            apply::insert_random_effect(
                &mut model,
                &name,
                RandomEffectLevel::Iiv,
                EtaForm::Exponential,
                BASELINE_IIV_INIT,
                None,
            );
        }
        apply::sync_error_parameters(&mut model, 1);
        model
    }

    fn baseline_features(&self, model: &ConcreteModel) -> FeatureSet {
        let structure = &model.structure;
        let mut features: BTreeSet<Feature> = BTreeSet::new();

        if let Some(absorption) = structure.absorption {
            features.insert(Feature::Absorption(absorption));
        }
        features.insert(Feature::Elimination(structure.elimination));
        features.insert(Feature::Transits(structure.transits));
        features.insert(Feature::Peripherals(structure.peripherals));
        features.insert(Feature::LagTime(structure.lag_time));

        if let Some(link) = &model.pd_link {
            features.insert(link.to_feature());
        }

        for eta in &model.random_effects {
            let parameter = eta.parameter.clone();
            features.insert(match eta.level {
                RandomEffectLevel::Iiv => Feature::Iiv {
                    parameter,
                    form: eta.form,
                },
                RandomEffectLevel::Iov => Feature::Iov {
                    parameter,
                    form: eta.form,
                },
            });
        }

        for block in &model.blocks {
            let parameters = block
                .etas
                .iter()
                .filter_map(|name| model.random_effects.iter().find(|eta| &eta.name == name))
                .map(|eta| eta.parameter.clone())
                .collect();
            features.insert(Feature::Covariance {
                level: block.level,
                parameters,
            });
        }

        for applied in &model.covariates {
            features.insert(Feature::Covariate(applied.effect.clone()));
        }

        features.into_iter().collect()
    }

    fn minimal_transformations(
        &self,
        current: &FeatureSet,
        target: &FeatureSet,
        model: &ConcreteModel,
    ) -> Result<Vec<Operation>, BuilderError> {
        diff::plan(self, current, target, model)
    }

    fn apply(
        &self,
        mut model: ConcreteModel,
        operation: &Operation,
    ) -> Result<ConcreteModel, BuilderError> {
        match operation {
            Operation::CreateBasicPkModel { model_type } => {
                return Ok(self.create_baseline(*model_type))
            }
            Operation::SetDataset { dataset } => model.dataset = Some(dataset.clone()),
            Operation::SetName { name } => model.name = name.clone(),
            Operation::SetDescription { description } => model.description = description.clone(),
            Operation::SetAbsorption { absorption } => apply::set_absorption(&mut model, *absorption)?,
            Operation::SetElimination { elimination } => {
                model.structure.elimination = *elimination;
                apply::sync_structure(&mut model);
            }
            Operation::SetTransitCompartments { count } => {
                model.structure.transits = *count;
                apply::sync_structure(&mut model);
            }
            Operation::SetLagTime { enabled } => {
                model.structure.lag_time = *enabled;
                apply::sync_structure(&mut model);
            }
            Operation::SetPeripheralCompartments { count } => {
                model.structure.peripherals = *count;
                apply::sync_structure(&mut model);
            }
            Operation::SetPdLink { link } => apply::set_pd_link(&mut model, *link),
            Operation::SetErrorModel { kind, dv, cutoff } => {
                apply::set_error_model(&mut model, *kind, *dv, *cutoff)?
            }
            Operation::AddIiv {
                parameter,
                form,
                initial_estimate,
            } => apply::add_random_effect(
                &mut model,
                parameter,
                RandomEffectLevel::Iiv,
                *form,
                *initial_estimate,
                None,
            )?,
            Operation::RemoveIiv { parameter } => {
                apply::remove_random_effect(&mut model, parameter, RandomEffectLevel::Iiv)?
            }
            Operation::AddIov {
                parameter,
                form,
                occasion,
                initial_estimate,
            } => apply::add_random_effect(
                &mut model,
                parameter,
                RandomEffectLevel::Iov,
                *form,
                *initial_estimate,
                Some(occasion.clone()),
            )?,
            Operation::RemoveIov { parameter } => {
                apply::remove_random_effect(&mut model, parameter, RandomEffectLevel::Iov)?
            }
            Operation::CreateJointDistribution { level, parameters } => {
                apply::create_joint_distribution(&mut model, *level, parameters, self.covariance_init)?
            }
            Operation::SplitJointDistribution { level, parameters } => {
                apply::split_joint_distribution(&mut model, *level, parameters)?
            }
            Operation::AddCovariateEffect { effect } => apply::add_covariate_effect(&mut model, effect)?,
            Operation::RemoveCovariateEffect {
                parameter,
                covariate,
            } => apply::remove_covariate_effect(&mut model, parameter, covariate)?,
            Operation::AddAllometry { allometry } => apply::add_allometry(&mut model, allometry)?,
            Operation::SetEstimationStep { index, step } => {
                let slot = model.estimation_steps.get_mut(*index).ok_or_else(|| {
                    BuilderError::infeasible(
                        format!("ESTIMATION({})", step.method.name()),
                        format!("no estimation step at index {index}"),
                    )
                })?;
                *slot = step.clone();
            }
            Operation::AddEstimationStep { step } => model.estimation_steps.push(step.clone()),
            Operation::AddCovarianceStep => model.covariance_step = true,
            Operation::SetInitialEstimates { values } => {
                for (name, value) in values {
                    apply::parameter_mut(&mut model, name)?.init = *value;
                }
            }
            Operation::SetLowerBounds { bounds } => {
                for (name, value) in bounds {
                    apply::parameter_mut(&mut model, name)?.lower = *value;
                }
            }
            Operation::SetUpperBounds { bounds } => {
                for (name, value) in bounds {
                    apply::parameter_mut(&mut model, name)?.upper = *value;
                }
            }
            Operation::FixParameters { names } => {
                for name in names {
                    apply::parameter_mut(&mut model, name)?.fix = true;
                }
            }
            Operation::UnfixParameters { names } => {
                for name in names {
                    apply::parameter_mut(&mut model, name)?.fix = false;
                }
            }
            Operation::ConvertModel { format } => model.format = *format,
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ErrorModelKind;
    use crate::data::Dataset;
    use crate::features::{CovariateEffect, EffectFunction};
    use crate::model::Allometry;

    fn apply_all(catalog: &PkCatalog, model: ConcreteModel, ops: &[Operation]) -> ConcreteModel {
        ops.iter()
            .try_fold(model, |m, op| catalog.apply(m, op))
            .unwrap()
    }

    fn dataset() -> Dataset {
        Dataset::from_reader(
            "ID,TIME,AMT,DV,WGT,SEX,OCC\n1,0,100,.,70,0,1\n1,2,0,3.1,70,0,2\n2,0,100,.,85,1,1\n"
                .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn test_iv_baseline() {
        let catalog = PkCatalog::new();
        let model = catalog.create_baseline(ModelType::Iv);
        assert_eq!(model.individual_parameter_names(), vec!["CL", "VC"]);
        assert_eq!(
            model.parameters.names(),
            vec!["POP_CL", "POP_VC", "IIV_CL", "IIV_VC", "SIGMA_PROP"]
        );
        assert_eq!(
            catalog.baseline_features(&model).to_string(),
            "ELIMINATION(FO);TRANSITS(0);PERIPHERALS(0);LAGTIME(OFF);IIV(CL,EXP);IIV(VC,EXP)"
        );
    }

    #[test]
    fn test_oral_baseline_has_absorption() {
        let catalog = PkCatalog::new();
        let model = catalog.create_baseline(ModelType::Oral);
        let features = catalog.baseline_features(&model);
        assert!(features.contains(&Feature::Absorption(Absorption::FirstOrder)));
        assert!(features.contains(&Feature::Iiv {
            parameter: "MAT".into(),
            form: EtaForm::Exponential
        }));
    }

    #[test]
    fn test_michaelis_menten_keeps_cl_and_vc() {
        let catalog = PkCatalog::new();
        let model = catalog.create_baseline(ModelType::Iv);
        let model = catalog
            .apply(
                model,
                &Operation::SetElimination {
                    elimination: Elimination::MichaelisMenten,
                },
            )
            .unwrap();
        assert_eq!(model.individual_parameter_names(), vec!["CL", "KM", "VC"]);
        assert!(model.has_random_effect("CL", RandomEffectLevel::Iiv));
        assert!(model.parameters.contains("POP_KM"));
    }

    #[test]
    fn test_removing_absorption_drops_its_random_effect() {
        let catalog = PkCatalog::new();
        let model = catalog.create_baseline(ModelType::Oral);
        let model = catalog
            .apply(
                model,
                &Operation::SetAbsorption {
                    absorption: Absorption::Instantaneous,
                },
            )
            .unwrap();
        assert!(!model.has_individual_parameter("MAT"));
        assert!(!model.parameters.contains("IIV_MAT"));
        assert!(!model.has_random_effect("MAT", RandomEffectLevel::Iiv));
    }

    #[test]
    fn test_iv_absorption_is_infeasible() {
        let catalog = PkCatalog::new();
        let model = catalog.create_baseline(ModelType::Iv);
        let result = catalog.apply(
            model,
            &Operation::SetAbsorption {
                absorption: Absorption::ZeroOrder,
            },
        );
        assert!(matches!(result, Err(BuilderError::InfeasibleDiff { .. })));
    }

    #[test]
    fn test_pd_link_adds_response_variable() {
        let catalog = PkCatalog::new();
        let model = catalog.create_baseline(ModelType::Iv);
        let model = catalog
            .apply(
                model,
                &Operation::SetPdLink {
                    link: PdLink::EffectCompartment(PdExpression::Emax),
                },
            )
            .unwrap();
        assert_eq!(model.responses(), vec![1, 2]);
        for name in ["POP_B", "POP_E_MAX", "POP_EC_50", "POP_KE0", "SIGMA_ADD_2"] {
            assert!(model.parameters.contains(name), "missing {name}");
        }
    }

    #[test]
    fn test_joint_distribution_and_split() {
        let catalog = PkCatalog::new();
        let model = catalog.create_baseline(ModelType::Iv);
        let params = vec!["CL".to_string(), "VC".to_string()];
        let joined = catalog
            .apply(
                model,
                &Operation::CreateJointDistribution {
                    level: RandomEffectLevel::Iiv,
                    parameters: params.clone(),
                },
            )
            .unwrap();
        assert_eq!(joined.blocks.len(), 1);
        assert!(joined.parameters.contains("IIV_CL_IIV_VC"));

        let split = catalog
            .apply(
                joined,
                &Operation::SplitJointDistribution {
                    level: RandomEffectLevel::Iiv,
                    parameters: params,
                },
            )
            .unwrap();
        assert!(split.blocks.is_empty());
        assert!(!split.parameters.contains("IIV_CL_IIV_VC"));
    }

    #[test]
    fn test_removing_eta_dissolves_pair_block() {
        let catalog = PkCatalog::new();
        let model = apply_all(
            &catalog,
            catalog.create_baseline(ModelType::Iv),
            &[
                Operation::CreateJointDistribution {
                    level: RandomEffectLevel::Iiv,
                    parameters: vec!["CL".into(), "VC".into()],
                },
                Operation::RemoveIiv {
                    parameter: "VC".into(),
                },
            ],
        );
        assert!(model.blocks.is_empty());
        assert!(!model.parameters.contains("IIV_CL_IIV_VC"));
    }

    #[test]
    fn test_covariate_needs_dataset_column() {
        let catalog = PkCatalog::new();
        let effect = CovariateEffect::new("CL", "WGT", EffectFunction::Exp);

        let without = catalog.apply(
            catalog.create_baseline(ModelType::Iv),
            &Operation::AddCovariateEffect {
                effect: effect.clone(),
            },
        );
        assert!(matches!(without, Err(BuilderError::InfeasibleDiff { .. })));

        let model = apply_all(
            &catalog,
            catalog.create_baseline(ModelType::Iv),
            &[
                Operation::SetDataset { dataset: dataset() },
                Operation::AddCovariateEffect { effect },
            ],
        );
        assert!(model.has_covariate_effect("CL", "WGT"));
        assert!(model.parameters.contains("POP_CLWGT"));
    }

    #[test]
    fn test_categorical_covariate_thetas() {
        let catalog = PkCatalog::new();
        let model = apply_all(
            &catalog,
            catalog.create_baseline(ModelType::Iv),
            &[
                Operation::SetDataset { dataset: dataset() },
                Operation::AddCovariateEffect {
                    effect: CovariateEffect::new("VC", "SEX", EffectFunction::Cat),
                },
            ],
        );
        assert_eq!(model.covariates[0].thetas, vec!["POP_VCSEX"]);
    }

    #[test]
    fn test_error_model_on_unknown_dv() {
        let catalog = PkCatalog::new();
        let result = catalog.apply(
            catalog.create_baseline(ModelType::Iv),
            &Operation::SetErrorModel {
                kind: ErrorModelKind::Additive,
                dv: 3,
                cutoff: 1.0,
            },
        );
        assert_eq!(result, Err(BuilderError::UnknownResponseVariable(3)));
    }

    #[test]
    fn test_combined_error_parameters() {
        let catalog = PkCatalog::new();
        let model = apply_all(
            &catalog,
            catalog.create_baseline(ModelType::Iv),
            &[
                Operation::SetErrorModel {
                    kind: ErrorModelKind::Combined,
                    dv: 1,
                    cutoff: 1.0,
                },
                Operation::SetErrorModel {
                    kind: ErrorModelKind::TimeVarying,
                    dv: 1,
                    cutoff: 2.5,
                },
            ],
        );
        assert!(model.parameters.contains("SIGMA_PROP"));
        assert!(model.parameters.contains("SIGMA_ADD"));
        assert!(model.parameters.contains("TIME_VARYING"));
        assert_eq!(model.error_model(1).unwrap().time_varying, Some(2.5));
    }

    #[test]
    fn test_allometry_defaults_to_clearance_and_volume() {
        let catalog = PkCatalog::new();
        let model = apply_all(
            &catalog,
            catalog.create_baseline(ModelType::Oral),
            &[
                Operation::SetDataset { dataset: dataset() },
                Operation::AddAllometry {
                    allometry: Allometry::new("WGT", 70.0),
                },
            ],
        );
        assert_eq!(model.parameters.get("ALLO_CL").unwrap().init, 0.75);
        assert!(model.parameters.get("ALLO_VC").unwrap().fix);
        assert!(!model.parameters.contains("ALLO_MAT"));
    }

    #[test]
    fn test_unknown_parameter_in_overrides() {
        let catalog = PkCatalog::new();
        let result = catalog.apply(
            catalog.create_baseline(ModelType::Iv),
            &Operation::FixParameters {
                names: vec!["POP_MAT".into()],
            },
        );
        assert_eq!(result, Err(BuilderError::UnknownParameter("POP_MAT".into())));
    }
}
