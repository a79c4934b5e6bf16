//! The editable model description
//!
//! [ModelState] is what a user edits and what undo/redo restores. It never
//! holds a concrete model; regeneration derives one from it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::{resolve_error_models, ErrorModelKind, TransformationCatalog};
use crate::data::{ColumnType, Dataset};
use crate::error::BuilderError;
use crate::features::{parse_features, CovariateEffect, Feature, FeatureSet, RandomEffectLevel};
use crate::model::{
    lower_bound, upper_bound, Allometry, BaseError, ConcreteModel, EstimationStep, ModelType,
    Parameter, Parameters, TargetFormat,
};

pub const NAME: &str = "name";
pub const DESCRIPTION: &str = "description";

// ═══════════════════════════════════════════════════════════════════════════════
// ParameterOverride
// ═══════════════════════════════════════════════════════════════════════════════

/// A user-entered parameter value, matched by name at every regeneration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterOverride {
    pub name: String,
    pub init: f64,
    #[serde(with = "lower_bound", default = "lower_bound::unbounded")]
    pub lower: f64,
    #[serde(with = "upper_bound", default = "upper_bound::unbounded")]
    pub upper: f64,
    #[serde(default)]
    pub fix: bool,
}

impl ParameterOverride {
    pub fn to_parameter(&self) -> Parameter {
        Parameter::new(self.name.clone(), self.init)
            .with_bounds(self.lower, self.upper)
            .fixed(self.fix)
    }

    pub fn validate(&self) -> Result<(), BuilderError> {
        self.to_parameter().validate()
    }

    /// Whether `parameter` already carries exactly these values
    pub fn matches(&self, parameter: &Parameter) -> bool {
        self.to_parameter() == *parameter
    }
}

impl From<&Parameter> for ParameterOverride {
    fn from(parameter: &Parameter) -> Self {
        Self {
            name: parameter.name.clone(),
            init: parameter.init,
            lower: parameter.lower,
            upper: parameter.upper,
            fix: parameter.fix,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ModelState
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything a user has chosen for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub model_type: ModelType,
    #[serde(default)]
    pub format: TargetFormat,
    /// Free-form attributes; `name` and `description` are applied to the model
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Structural, PD link and random-effect features
    pub features: FeatureSet,
    /// Ordered error model requests per response variable
    pub error_models: BTreeMap<u32, Vec<ErrorModelKind>>,
    #[serde(default)]
    pub overrides: Vec<ParameterOverride>,
    /// Parameters whose IIV share a joint distribution; singletons stay independent
    #[serde(default)]
    pub blocks: Vec<Vec<String>>,
    #[serde(default)]
    pub covariates: Vec<CovariateEffect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allometry: Option<Allometry>,
    pub estimation_steps: Vec<EstimationStep>,
    #[serde(default)]
    pub covariance_step: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<Dataset>,
    /// Individual parameters of the last regenerated model
    #[serde(default)]
    pub individual_parameters: Vec<String>,
    /// Parameters of the last regenerated model
    #[serde(default)]
    pub parameters: Parameters,
}

impl ModelState {
    /// The state matching a freshly created model of `model_type`
    pub fn baseline<C: TransformationCatalog + ?Sized>(catalog: &C, model_type: ModelType) -> Self {
        let model = catalog.create_baseline(model_type);
        let features = catalog.baseline_features(&model);
        let error_models = model
            .error_models
            .iter()
            .map(|(dv, error)| {
                let base = match error.base {
                    BaseError::Additive => ErrorModelKind::Additive,
                    BaseError::Proportional => ErrorModelKind::Proportional,
                    BaseError::Combined => ErrorModelKind::Combined,
                };
                (*dv, vec![base])
            })
            .collect();

        let mut state = Self {
            model_type,
            format: model.format,
            attributes: BTreeMap::new(),
            features: features.without(|f| f.category().is_covariate()),
            error_models,
            overrides: Vec::new(),
            blocks: Vec::new(),
            covariates: Vec::new(),
            allometry: None,
            estimation_steps: model.estimation_steps.clone(),
            covariance_step: model.covariance_step,
            dataset: None,
            individual_parameters: Vec::new(),
            parameters: Parameters::new(),
        };
        state.refresh(&model);
        state
    }

    /// A baseline state for another route, keeping the attached dataset
    pub fn reset_route<C: TransformationCatalog + ?Sized>(
        &self,
        catalog: &C,
        model_type: ModelType,
    ) -> Self {
        let mut state = Self::baseline(catalog, model_type);
        state.dataset = self.dataset.clone();
        state
    }

    /// Take the derived parameter lists from a regenerated model
    pub fn refresh(&mut self, model: &ConcreteModel) {
        self.individual_parameters = model
            .individual_parameter_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        self.parameters = model.parameters.clone();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Features
    // ─────────────────────────────────────────────────────────────────────────

    /// All features regeneration should realise, including blocks and covariates
    pub fn target_features(&self) -> FeatureSet {
        let blocks = self
            .blocks
            .iter()
            .filter(|group| group.len() > 1)
            .map(|group| Feature::Covariance {
                level: RandomEffectLevel::Iiv,
                parameters: group.iter().cloned().collect(),
            });
        let covariates = self.covariates.iter().cloned().map(Feature::Covariate);
        self.features
            .iter()
            .cloned()
            .chain(blocks)
            .chain(covariates)
            .collect()
    }

    /// Apply features, replacing those in the same slot
    ///
    /// Covariate effects go to the covariate list and IIV covariance
    /// features become block groups.
    pub fn apply_features(&mut self, features: impl IntoIterator<Item = Feature>) {
        let mut rest = Vec::new();
        for feature in features {
            match feature {
                Feature::Covariate(effect) => {
                    self.covariates.retain(|c| {
                        !(c.parameter == effect.parameter && c.covariate == effect.covariate)
                    });
                    self.covariates.push(effect);
                }
                Feature::Covariance {
                    level: RandomEffectLevel::Iiv,
                    parameters,
                } => self.add_block(parameters.into_iter().collect()),
                other => rest.push(other),
            }
        }
        self.features = self.features.replace(rest);
    }

    /// Parse feature statements and apply them
    pub fn apply_mfl(&mut self, statements: &str) -> Result<(), BuilderError> {
        self.apply_features(parse_features(statements)?);
        Ok(())
    }

    /// Drop features matching `predicate`
    pub fn remove_features(&mut self, predicate: impl Fn(&Feature) -> bool) {
        self.features = self.features.without(predicate);
    }

    /// Drop the random effect of `level` on `parameter`, leaving its block group
    pub fn remove_random_effect(&mut self, parameter: &str, level: RandomEffectLevel) {
        self.remove_features(|f| match (f, level) {
            (Feature::Iiv { parameter: p, .. }, RandomEffectLevel::Iiv)
            | (Feature::Iov { parameter: p, .. }, RandomEffectLevel::Iov) => p == parameter,
            _ => false,
        });
        if level == RandomEffectLevel::Iiv {
            for group in &mut self.blocks {
                group.retain(|p| p != parameter);
            }
            self.blocks.retain(|g| !g.is_empty());
        }
    }

    pub fn remove_covariate(&mut self, parameter: &str, covariate: &str) {
        self.covariates
            .retain(|c| !(c.parameter == parameter && c.covariate == covariate));
    }

    /// Add a block group, taking its parameters out of any other group
    pub fn add_block(&mut self, group: Vec<String>) {
        let members: BTreeSet<&String> = group.iter().collect();
        for existing in &mut self.blocks {
            existing.retain(|p| !members.contains(p));
        }
        self.blocks.retain(|g| !g.is_empty());
        self.blocks.push(group);
    }

    /// Replace all block groups
    pub fn set_blocks(&mut self, groups: Vec<Vec<String>>) {
        self.blocks = groups.into_iter().filter(|g| !g.is_empty()).collect();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Attributes, error models, estimation
    // ─────────────────────────────────────────────────────────────────────────

    pub fn name(&self) -> Option<&str> {
        self.attributes.get(NAME).map(String::as_str)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.set_attribute(NAME, name);
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.set_attribute(DESCRIPTION, description);
    }

    /// Set the error models of response variable `dv` by registry name
    pub fn set_error_models<S: AsRef<str>>(
        &mut self,
        dv: u32,
        names: &[S],
    ) -> Result<(), BuilderError> {
        let kinds = resolve_error_models(dv, names)?;
        self.error_models.insert(dv, kinds);
        Ok(())
    }

    pub fn set_estimation_steps(&mut self, steps: Vec<EstimationStep>) -> Result<(), BuilderError> {
        if steps.is_empty() {
            return Err(BuilderError::Config(
                "a model needs at least one estimation step".to_string(),
            ));
        }
        self.estimation_steps = steps;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dataset
    // ─────────────────────────────────────────────────────────────────────────

    pub fn attach_dataset(&mut self, dataset: Dataset) {
        self.dataset = Some(dataset);
    }

    pub fn detach_dataset(&mut self) {
        self.dataset = None;
    }

    /// Change the declared type of a column of the attached dataset
    pub fn set_column_type(&mut self, column: &str, kind: ColumnType) -> Result<(), BuilderError> {
        let dataset = self
            .dataset
            .take()
            .ok_or_else(|| BuilderError::Dataset("no dataset is attached".to_string()))?;
        match dataset.clone().with_column_type(column, kind) {
            Ok(updated) => {
                self.dataset = Some(updated);
                Ok(())
            }
            Err(e) => {
                self.dataset = Some(dataset);
                Err(e)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Parameter overrides
    // ─────────────────────────────────────────────────────────────────────────

    /// Current values of a parameter: its override, or the regenerated value
    pub fn parameter(&self, name: &str) -> Option<Parameter> {
        self.overrides
            .iter()
            .find(|o| o.name == name)
            .map(ParameterOverride::to_parameter)
            .or_else(|| self.parameters.get(name).cloned())
    }

    /// Store an override, replacing one with the same name
    pub fn set_override(&mut self, value: ParameterOverride) -> Result<(), BuilderError> {
        value.validate()?;
        match self.overrides.iter_mut().find(|o| o.name == value.name) {
            Some(existing) => *existing = value,
            None => self.overrides.push(value),
        }
        Ok(())
    }

    fn edit_parameter(
        &mut self,
        name: &str,
        edit: impl FnOnce(&mut ParameterOverride),
    ) -> Result<(), BuilderError> {
        let current = self
            .parameter(name)
            .ok_or_else(|| BuilderError::UnknownParameter(name.to_string()))?;
        let mut value = ParameterOverride::from(&current);
        edit(&mut value);
        self.set_override(value)
    }

    pub fn set_initial_estimate(&mut self, name: &str, init: f64) -> Result<(), BuilderError> {
        self.edit_parameter(name, |p| p.init = init)
    }

    pub fn set_bounds(&mut self, name: &str, lower: f64, upper: f64) -> Result<(), BuilderError> {
        self.edit_parameter(name, |p| {
            p.lower = lower;
            p.upper = upper;
        })
    }

    pub fn set_fixed(&mut self, name: &str, fix: bool) -> Result<(), BuilderError> {
        self.edit_parameter(name, |p| p.fix = fix)
    }

    /// Fix or unfix every parameter of the last regenerated model
    pub fn set_all_fixed(&mut self, fix: bool) -> Result<(), BuilderError> {
        let names: Vec<String> = self.parameters.names().into_iter().map(str::to_string).collect();
        for name in names {
            self.set_fixed(&name, fix)?;
        }
        Ok(())
    }

    pub fn clear_override(&mut self, name: &str) {
        self.overrides.retain(|o| o.name != name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PkCatalog;
    use crate::features::{EffectFunction, EtaForm};

    fn state() -> ModelState {
        ModelState::baseline(&PkCatalog::new(), ModelType::Iv)
    }

    #[test]
    fn test_baseline_state() {
        let state = state();
        assert_eq!(
            state.features.to_string(),
            "ELIMINATION(FO);TRANSITS(0);PERIPHERALS(0);LAGTIME(OFF);IIV(CL,EXP);IIV(VC,EXP)"
        );
        assert_eq!(
            state.error_models.get(&1),
            Some(&vec![ErrorModelKind::Proportional])
        );
        assert_eq!(state.individual_parameters, vec!["CL", "VC"]);
        assert!(state.parameters.contains("POP_CL"));
    }

    #[test]
    fn test_apply_features_routes_covariates_and_blocks() {
        let mut state = state();
        state
            .apply_mfl("ELIMINATION(MM);COVARIATE(CL,WGT,exp);COVARIANCE(IIV,[CL,VC])")
            .unwrap();

        assert_eq!(
            state.features.get(crate::features::FeatureCategory::Elimination).map(|f| f.to_string()),
            Some("ELIMINATION(MM)".to_string())
        );
        assert_eq!(state.covariates, vec![CovariateEffect::new("CL", "WGT", EffectFunction::Exp)]);
        assert_eq!(state.blocks, vec![vec!["CL".to_string(), "VC".to_string()]]);
        assert!(state
            .target_features()
            .contains(&"COVARIANCE(IIV,[CL,VC])".parse().unwrap()));
    }

    #[test]
    fn test_singleton_blocks_are_not_joint() {
        let mut state = state();
        state.set_blocks(vec![vec!["CL".into()], vec!["VC".into()]]);
        assert!(state
            .target_features()
            .by_category(crate::features::FeatureCategory::Covariance)
            .is_empty());
    }

    #[test]
    fn test_add_block_takes_members_from_other_groups() {
        let mut state = state();
        state.add_block(vec!["CL".into(), "VC".into()]);
        state.add_block(vec!["VC".into(), "MAT".into()]);
        assert_eq!(
            state.blocks,
            vec![vec!["CL".to_string()], vec!["VC".to_string(), "MAT".to_string()]]
        );
    }

    #[test]
    fn test_remove_random_effect() {
        let mut state = state();
        state.add_block(vec!["CL".into(), "VC".into()]);
        state.remove_random_effect("CL", RandomEffectLevel::Iiv);
        assert_eq!(state.blocks, vec![vec!["VC".to_string()]]);
        assert!(!state.features.contains(&Feature::Iiv {
            parameter: "CL".into(),
            form: EtaForm::Exponential
        }));
    }

    #[test]
    fn test_ambiguous_error_model_rejected() {
        let mut state = state();
        let result = state.set_error_models(1, &["add", "comb"]);
        assert!(matches!(result, Err(BuilderError::AmbiguousErrorModel { dv: 1, .. })));
        assert_eq!(
            state.error_models.get(&1),
            Some(&vec![ErrorModelKind::Proportional])
        );
    }

    #[test]
    fn test_override_starts_from_current_values() {
        let mut state = state();
        state.set_initial_estimate("POP_CL", 10.0).unwrap();
        let value = state.parameter("POP_CL").unwrap();
        assert_eq!(value.init, 10.0);
        assert_eq!(value.lower, 0.0);

        assert!(state.set_bounds("POP_CL", 0.0, 5.0).is_err());
        assert_eq!(
            state.set_initial_estimate("POP_XYZ", 1.0),
            Err(BuilderError::UnknownParameter("POP_XYZ".into()))
        );
    }

    #[test]
    fn test_fix_all() {
        let mut state = state();
        state.set_all_fixed(true).unwrap();
        assert_eq!(state.overrides.len(), state.parameters.len());
        assert!(state.overrides.iter().all(|o| o.fix));
    }

    #[test]
    fn test_reset_route_keeps_dataset() {
        let mut state = state();
        state.attach_dataset(Dataset::new(&["ID", "TIME", "DV"], vec![]).unwrap());
        state.set_name("run2");
        let oral = state.reset_route(&PkCatalog::new(), ModelType::Oral);
        assert!(oral.dataset.is_some());
        assert_eq!(oral.name(), None);
        assert_eq!(oral.model_type, ModelType::Oral);
    }

    #[test]
    fn test_state_json_round_trip() {
        let mut state = state();
        state.set_bounds("POP_VC", 0.0, f64::INFINITY).unwrap();
        state.attach_dataset(
            Dataset::from_reader("ID,TIME,DV,AMT\n1,0,.,100\n1,1,2.0,.\n".as_bytes()).unwrap(),
        );
        let json = serde_json::to_string(&state).unwrap();
        let back: ModelState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
