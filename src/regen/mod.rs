//! Deterministic model regeneration
//!
//! A [ModelRegenerator] turns a [ModelState] into a concrete model by
//! replaying it from the baseline every time: create the baseline, attach
//! the dataset, set attributes, then realise the structural, PD link, error
//! model, variability, covariate, allometry and estimation choices, apply
//! parameter overrides and finally convert to the target format. Every
//! applied operation is recorded in the returned [OperationLog].
//!
//! Regeneration is pure: the same state always yields the same model and
//! log, and regenerating the returned state changes nothing.

mod reconcile;

use tracing::{debug, warn};

use crate::catalog::{Operation, PkCatalog, TransformationCatalog};
use crate::config::BuilderConfig;
use crate::error::BuilderError;
use crate::features::FeatureSet;
use crate::log::OperationLog;
use crate::model::{ConcreteModel, ModelType, TargetFormat};
use crate::state::{ModelState, DESCRIPTION};

pub use reconcile::{ParameterReconciler, Reconciliation};

/// Output of one regeneration
#[derive(Debug, Clone, PartialEq)]
pub struct Regeneration {
    pub model: ConcreteModel,
    pub log: OperationLog,
    /// The input state without stale references, refreshed from the model
    pub state: ModelState,
}

/// Rebuilds concrete models from model states
#[derive(Debug, Clone)]
pub struct ModelRegenerator<C = PkCatalog> {
    catalog: C,
    config: BuilderConfig,
}

impl Default for ModelRegenerator<PkCatalog> {
    fn default() -> Self {
        let config = BuilderConfig::default();
        Self {
            catalog: config.catalog(),
            config,
        }
    }
}

impl ModelRegenerator<PkCatalog> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A regenerator over the PK catalog configured by `config`
    pub fn with_config(config: BuilderConfig) -> Result<Self, BuilderError> {
        config.validate()?;
        Ok(Self {
            catalog: config.catalog(),
            config,
        })
    }
}

impl<C: TransformationCatalog> ModelRegenerator<C> {
    pub fn with_catalog(catalog: C, config: BuilderConfig) -> Self {
        Self { catalog, config }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// The state of a freshly created model of `model_type`
    pub fn baseline_state(&self, model_type: ModelType) -> ModelState {
        ModelState::baseline(&self.catalog, model_type)
    }

    fn apply_all(
        &self,
        mut model: ConcreteModel,
        operations: impl IntoIterator<Item = Operation>,
        log: &mut OperationLog,
    ) -> Result<ConcreteModel, BuilderError> {
        for operation in operations {
            debug!(operation = operation.name(), "applying operation");
            model = self.catalog.apply(model, &operation)?;
            log.push(operation.to_entry());
        }
        Ok(model)
    }

    fn transform(
        &self,
        model: ConcreteModel,
        current: &FeatureSet,
        target: &FeatureSet,
        log: &mut OperationLog,
    ) -> Result<ConcreteModel, BuilderError> {
        let operations = self
            .catalog
            .minimal_transformations(current, target, &model)?;
        self.apply_all(model, operations, log)
    }

    /// Build the concrete model and operation log for `state`
    pub fn regenerate(&self, state: &ModelState) -> Result<Regeneration, BuilderError> {
        let mut log = OperationLog::new();
        let mut next = state.clone();
        let target = state.target_features();

        // Baseline
        let model_type = state.model_type;
        let model = self.catalog.create_baseline(model_type);
        log.push(Operation::CreateBasicPkModel { model_type }.to_entry());
        debug!(%model_type, "created baseline");

        // Dataset
        let dataset = state.dataset.iter().map(|dataset| Operation::SetDataset {
            dataset: dataset.clone(),
        });
        let model = self.apply_all(model, dataset, &mut log)?;

        // Attributes
        let mut attributes = Vec::new();
        if let Some(name) = state.name() {
            if name != model.name {
                attributes.push(Operation::SetName {
                    name: name.to_string(),
                });
            }
        }
        if let Some(description) = state.attributes.get(DESCRIPTION) {
            if !description.is_empty() && *description != model.description {
                attributes.push(Operation::SetDescription {
                    description: description.clone(),
                });
            }
        }
        let model = self.apply_all(model, attributes, &mut log)?;

        // PK structure, then PD link
        let current = self.catalog.baseline_features(&model);
        let model = self.transform(
            model,
            &current.structural(),
            &target.structural(),
            &mut log,
        )?;
        let current = self.catalog.baseline_features(&model);
        let model = self.transform(model, &current.pd_link(), &target.pd_link(), &mut log)?;

        // Error models
        let mut errors = Vec::new();
        for (dv, kinds) in &state.error_models {
            for kind in kinds {
                if !kind.is_satisfied(&model, *dv) {
                    errors.push(Operation::SetErrorModel {
                        kind: *kind,
                        dv: *dv,
                        cutoff: self.config.time_varying_cutoff,
                    });
                }
            }
        }
        let mut model = self.apply_all(model, errors, &mut log)?;
        debug!(operations = log.len(), "structure and error models done");

        // Variability
        let present = model.individual_parameter_set();
        let (variability, stale) = target.variability().partition_referenced(&present);
        for feature in stale.iter() {
            warn!(%feature, "dropping random effect on a parameter the model no longer has");
        }
        next.features = next.features.without(|f| stale.contains(f));
        next.blocks
            .retain(|group| group.iter().all(|p| present.contains(p)));
        let current = self.catalog.baseline_features(&model).variability();
        model = self.transform(model, &current, &variability, &mut log)?;

        // Covariates
        let (covariates, stale) = target.covariates().partition_referenced(&present);
        for feature in stale.iter() {
            warn!(%feature, "dropping covariate effect on a parameter the model no longer has");
        }
        next.covariates.retain(|c| present.contains(&c.parameter));
        let current = self.catalog.baseline_features(&model).covariates();
        model = self.transform(model, &current, &covariates, &mut log)?;

        // Allometry
        if let Some(allometry) = &state.allometry {
            let mut allometry = allometry.clone();
            let requested = allometry.parameters.len();
            allometry.parameters.retain(|p| present.contains(p));
            if requested > 0 && allometry.parameters.is_empty() {
                warn!(variable = %allometry.variable, "dropping allometry on removed parameters");
                next.allometry = None;
            } else {
                if allometry.parameters.len() < requested {
                    warn!(variable = %allometry.variable, "dropping allometry on removed parameters");
                }
                next.allometry = Some(allometry.clone());
                model = self.apply_all(model, [Operation::AddAllometry { allometry }], &mut log)?;
            }
        }

        // Estimation
        let mut estimation = Vec::new();
        for (index, step) in state.estimation_steps.iter().enumerate() {
            match model.estimation_steps.get(index) {
                Some(existing) if existing == step => {}
                Some(_) => estimation.push(Operation::SetEstimationStep {
                    index,
                    step: step.clone(),
                }),
                None => estimation.push(Operation::AddEstimationStep { step: step.clone() }),
            }
        }
        if state.covariance_step && !model.covariance_step {
            estimation.push(Operation::AddCovarianceStep);
        }
        model = self.apply_all(model, estimation, &mut log)?;

        // Parameter overrides
        let reconciliation = ParameterReconciler::reconcile(&state.overrides, &model.parameters);
        for name in &reconciliation.dropped {
            warn!(parameter = %name, "dropping override of a parameter the model no longer has");
        }
        next.overrides = reconciliation.kept;
        model = self.apply_all(model, reconciliation.operations, &mut log)?;

        // Format
        if state.format != TargetFormat::Generic && state.format != model.format {
            model = self.apply_all(
                model,
                [Operation::ConvertModel {
                    format: state.format,
                }],
                &mut log,
            )?;
        }

        next.refresh(&model);
        debug!(operations = log.len(), "regenerated model");
        Ok(Regeneration {
            model,
            log,
            state: next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Dataset;
    use crate::features::{Feature, RandomEffectLevel};
    use crate::log::EntryTag;
    use crate::model::{EstimationMethod, EstimationStep};

    fn dataset() -> Dataset {
        Dataset::from_reader("ID,TIME,AMT,DV,WGT,OCC\n1,0,100,.,70,1\n1,2,0,3.1,70,2\n".as_bytes())
            .unwrap()
            .with_path("data/pk.csv")
    }

    #[test]
    fn test_baseline_log_is_single_entry() {
        let regenerator = ModelRegenerator::new();
        let state = regenerator.baseline_state(ModelType::Oral);
        let result = regenerator.regenerate(&state).unwrap();
        assert_eq!(result.log.operations(), vec!["create_basic_pk_model"]);
        assert_eq!(result.state, state);
    }

    #[test]
    fn test_steps_run_in_order() {
        let regenerator = ModelRegenerator::new();
        let mut state = regenerator.baseline_state(ModelType::Oral);
        state.attach_dataset(dataset());
        state.set_name("run1");
        state.apply_mfl("PERIPHERALS(1);IIV(MAT,EXP);COVARIATE(CL,WGT,pow)").unwrap();
        state.set_error_models(1, &["comb"]).unwrap();
        state.covariance_step = true;
        state.set_initial_estimate("POP_CL", 10.0).unwrap();
        state.format = TargetFormat::Nonmem;

        let result = regenerator.regenerate(&state).unwrap();
        let tags: Vec<EntryTag> = result.log.iter().map(|e| e.tag).collect();
        assert_eq!(
            tags,
            vec![
                EntryTag::Baseline,
                EntryTag::Dataset,
                EntryTag::Attribute,
                EntryTag::Structural,
                EntryTag::ErrorModel,
                EntryTag::Covariate,
                EntryTag::Estimation,
                EntryTag::Parameters,
                EntryTag::Format,
            ]
        );
        assert_eq!(result.model.name, "run1");
        assert_eq!(result.model.parameters.get("POP_CL").unwrap().init, 10.0);
    }

    #[test]
    fn test_regenerating_the_result_changes_nothing() {
        let regenerator = ModelRegenerator::new();
        let mut state = regenerator.baseline_state(ModelType::Oral);
        state.attach_dataset(dataset());
        state.apply_mfl("ELIMINATION(MM);IOV(CL,EXP);COVARIANCE(IIV,[CL,VC])").unwrap();

        let first = regenerator.regenerate(&state).unwrap();
        let second = regenerator.regenerate(&first.state).unwrap();
        assert_eq!(first.model, second.model);
        assert_eq!(first.log, second.log);
        assert_eq!(first.state, second.state);
    }

    #[test]
    fn test_stale_random_effects_are_dropped() {
        let regenerator = ModelRegenerator::new();
        let mut state = regenerator.baseline_state(ModelType::Oral);
        state.add_block(vec!["CL".into(), "MAT".into()]);
        state.set_initial_estimate("IIV_MAT", 0.3).unwrap();
        state.apply_mfl("ABSORPTION(INST)").unwrap();

        let result = regenerator.regenerate(&state).unwrap();
        assert!(!result.model.has_individual_parameter("MAT"));
        assert!(!result.state.features.contains(&Feature::Iiv {
            parameter: "MAT".into(),
            form: crate::features::EtaForm::Exponential,
        }));
        assert!(result.state.blocks.is_empty());
        assert!(result.state.overrides.is_empty());
        assert!(result.model.blocks.is_empty());
    }

    #[test]
    fn test_estimation_steps_only_when_changed() {
        let regenerator = ModelRegenerator::new();
        let mut state = regenerator.baseline_state(ModelType::Iv);
        let baseline = state.estimation_steps.clone();
        state
            .set_estimation_steps(
                baseline
                    .into_iter()
                    .chain([EstimationStep::new(EstimationMethod::Imp).with_evaluation(true)])
                    .collect(),
            )
            .unwrap();
        let result = regenerator.regenerate(&state).unwrap();
        assert_eq!(
            result.log.operations(),
            vec!["create_basic_pk_model", "add_estimation_step"]
        );
    }

    #[test]
    fn test_failed_regeneration_reports_feature() {
        let regenerator = ModelRegenerator::new();
        let mut state = regenerator.baseline_state(ModelType::Iv);
        state.apply_mfl("IOV(CL,EXP)").unwrap();
        let result = regenerator.regenerate(&state);
        assert!(matches!(result, Err(BuilderError::InfeasibleDiff { .. })));

        state.remove_random_effect("CL", RandomEffectLevel::Iov);
        assert!(regenerator.regenerate(&state).is_ok());
    }
}
