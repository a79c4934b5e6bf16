//! Editing sessions
//!
//! A [Session] owns the current [ModelState] together with the model and
//! log last regenerated from it. Every edit goes through
//! [Session::update]: the edit runs on a copy, the copy is regenerated,
//! and only a successful regeneration replaces the session contents.
//! [SessionStore] keeps independent sessions apart by id.

use dashmap::DashMap;
use tracing::{info, warn};

use crate::catalog::{PkCatalog, TransformationCatalog};
use crate::codegen::{CodeGenerator, GeneratedCode, Language};
use crate::config::BuilderConfig;
use crate::error::BuilderError;
use crate::features::{Feature, RandomEffectLevel};
use crate::log::OperationLog;
use crate::model::{Allometry, ConcreteModel, ModelType};
use crate::regen::{ModelRegenerator, Regeneration};
use crate::state::ModelState;

/// Number of states kept for undo
pub const DEFAULT_HISTORY: usize = 50;

/// One user's model under construction
#[derive(Debug, Clone)]
pub struct Session<C = PkCatalog> {
    regenerator: ModelRegenerator<C>,
    state: ModelState,
    model: ConcreteModel,
    log: OperationLog,
    undo: Vec<ModelState>,
    redo: Vec<ModelState>,
    history: usize,
}

impl Session<PkCatalog> {
    /// A session on the baseline model of `model_type` with default configuration
    pub fn new(model_type: ModelType) -> Result<Self, BuilderError> {
        Self::with_regenerator(ModelRegenerator::new(), model_type)
    }

    pub fn with_config(config: BuilderConfig, model_type: ModelType) -> Result<Self, BuilderError> {
        Self::with_regenerator(ModelRegenerator::with_config(config)?, model_type)
    }
}

impl<C: TransformationCatalog> Session<C> {
    pub fn with_regenerator(
        regenerator: ModelRegenerator<C>,
        model_type: ModelType,
    ) -> Result<Self, BuilderError> {
        let state = regenerator.baseline_state(model_type);
        let Regeneration { model, log, state } = regenerator.regenerate(&state)?;
        Ok(Self {
            regenerator,
            state,
            model,
            log,
            undo: Vec::new(),
            redo: Vec::new(),
            history: DEFAULT_HISTORY,
        })
    }

    pub fn with_history(mut self, history: usize) -> Self {
        self.history = history;
        self
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn model(&self) -> &ConcreteModel {
        &self.model
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    fn commit(&mut self, regeneration: Regeneration) -> ModelState {
        self.model = regeneration.model;
        self.log = regeneration.log;
        std::mem::replace(&mut self.state, regeneration.state)
    }

    /// Apply `edit` to a copy of the state and regenerate
    ///
    /// On error the session is left exactly as it was.
    pub fn update<F>(&mut self, edit: F) -> Result<(), BuilderError>
    where
        F: FnOnce(&mut ModelState) -> Result<(), BuilderError>,
    {
        let mut candidate = self.state.clone();
        let regeneration = edit(&mut candidate)
            .and_then(|_| self.regenerator.regenerate(&candidate))
            .inspect_err(|e| warn!(error = %e, "rejected model edit"))?;

        let previous = self.commit(regeneration);
        self.undo.push(previous);
        if self.undo.len() > self.history {
            self.undo.remove(0);
        }
        self.redo.clear();
        info!(operations = self.log.len(), "committed model edit");
        Ok(())
    }

    /// Restore the state before the last edit; `false` when there is nothing to undo
    pub fn undo(&mut self) -> Result<bool, BuilderError> {
        let Some(state) = self.undo.last() else {
            return Ok(false);
        };
        let regeneration = self.regenerator.regenerate(state)?;
        self.undo.pop();
        let current = self.commit(regeneration);
        self.redo.push(current);
        info!("undid model edit");
        Ok(true)
    }

    /// Re-apply the last undone edit; `false` when there is nothing to redo
    pub fn redo(&mut self) -> Result<bool, BuilderError> {
        let Some(state) = self.redo.last() else {
            return Ok(false);
        };
        let regeneration = self.regenerator.regenerate(state)?;
        self.redo.pop();
        let current = self.commit(regeneration);
        self.undo.push(current);
        info!("redid model edit");
        Ok(true)
    }

    /// Start over from the baseline of `model_type`, keeping the dataset
    pub fn reset_route(&mut self, model_type: ModelType) -> Result<(), BuilderError> {
        let catalog = self.regenerator.catalog();
        let reset = self.state.reset_route(catalog, model_type);
        self.update(|state| {
            *state = reset;
            Ok(())
        })
    }

    /// Apply feature statements such as `ELIMINATION(MM);PERIPHERALS(1)`
    pub fn apply_mfl(&mut self, statements: &str) -> Result<(), BuilderError> {
        self.update(|state| state.apply_mfl(statements))
    }

    /// Add IIV on `parameter` with the configured default form
    pub fn add_iiv(&mut self, parameter: &str) -> Result<(), BuilderError> {
        let form = self.regenerator.config().iiv_expression;
        self.update(|state| {
            state.apply_features([Feature::Iiv {
                parameter: parameter.to_string(),
                form,
            }]);
            Ok(())
        })
    }

    pub fn remove_iiv(&mut self, parameter: &str) -> Result<(), BuilderError> {
        self.update(|state| {
            state.remove_random_effect(parameter, RandomEffectLevel::Iiv);
            Ok(())
        })
    }

    /// Scale clearances and volumes by `variable` at the configured reference value
    pub fn add_allometry(&mut self, variable: &str) -> Result<(), BuilderError> {
        let allometry = Allometry::new(variable, self.regenerator.config().allometric_reference);
        self.update(|state| {
            state.allometry = Some(allometry);
            Ok(())
        })
    }

    /// Render the current log in `language`
    pub fn render(&self, language: Language) -> Result<GeneratedCode, BuilderError> {
        let options = &self.regenerator.config().codegen;
        Ok(CodeGenerator::new(&self.log, options).generate(language)?)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SessionStore
// ═══════════════════════════════════════════════════════════════════════════════

/// Independent sessions keyed by id
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    config: BuilderConfig,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: BuilderConfig) -> Result<Self, BuilderError> {
        config.validate()?;
        Ok(Self {
            sessions: DashMap::new(),
            config,
        })
    }

    /// Open a session on a baseline model, replacing any session with the same id
    pub fn open(&self, id: impl Into<String>, model_type: ModelType) -> Result<(), BuilderError> {
        let id = id.into();
        let session = Session::with_config(self.config.clone(), model_type)?;
        info!(session = %id, %model_type, "opened session");
        self.sessions.insert(id, session);
        Ok(())
    }

    pub fn close(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Read a session
    pub fn with<R>(&self, id: &str, f: impl FnOnce(&Session) -> R) -> Result<R, BuilderError> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| BuilderError::UnknownSession(id.to_string()))?;
        Ok(f(&session))
    }

    /// Modify a session
    pub fn with_mut<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Session) -> Result<R, BuilderError>,
    ) -> Result<R, BuilderError> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| BuilderError::UnknownSession(id.to_string()))?;
        f(&mut session)
    }

    /// Apply an edit to one session
    pub fn update<F>(&self, id: &str, edit: F) -> Result<(), BuilderError>
    where
        F: FnOnce(&mut ModelState) -> Result<(), BuilderError>,
    {
        self.with_mut(id, |session| session.update(edit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_edit_leaves_session_unchanged() {
        let mut session = Session::new(ModelType::Iv).unwrap();
        let before = (session.state().clone(), session.log().clone());

        let result = session.apply_mfl("ABSORPTION(FO)");
        assert!(matches!(result, Err(BuilderError::InfeasibleDiff { .. })));
        assert_eq!(session.state(), &before.0);
        assert_eq!(session.log(), &before.1);
        assert!(!session.can_undo());

        let result = session.update(|state| state.set_error_models(1, &["prop", "comb"]));
        assert!(matches!(result, Err(BuilderError::AmbiguousErrorModel { .. })));
        assert_eq!(session.state(), &before.0);
    }

    #[test]
    fn test_undo_redo() {
        let mut session = Session::new(ModelType::Oral).unwrap();
        session.apply_mfl("PERIPHERALS(2)").unwrap();
        assert_eq!(session.model().structure.peripherals, 2);

        assert!(session.undo().unwrap());
        assert_eq!(session.model().structure.peripherals, 0);
        assert!(!session.undo().unwrap());

        assert!(session.redo().unwrap());
        assert_eq!(session.model().structure.peripherals, 2);
        assert!(!session.can_redo());
    }

    #[test]
    fn test_edit_clears_redo() {
        let mut session = Session::new(ModelType::Oral).unwrap();
        session.apply_mfl("LAGTIME(ON)").unwrap();
        session.undo().unwrap();
        session.apply_mfl("TRANSITS(1)").unwrap();
        assert!(!session.can_redo());
    }

    #[test]
    fn test_history_limit() {
        let mut session = Session::new(ModelType::Iv).unwrap().with_history(2);
        for n in 1..=4 {
            session
                .apply_mfl(&format!("PERIPHERALS({})", n % 3))
                .unwrap();
        }
        assert!(session.undo().unwrap());
        assert!(session.undo().unwrap());
        assert!(!session.undo().unwrap());
    }

    #[test]
    fn test_add_and_remove_iiv_use_configured_form() {
        let config = BuilderConfig {
            iiv_expression: crate::features::EtaForm::Additive,
            ..Default::default()
        };
        let mut session = Session::with_config(config, ModelType::Oral).unwrap();
        session.apply_mfl("ELIMINATION(MM)").unwrap();
        session.add_iiv("KM").unwrap();
        let eta = session
            .model()
            .random_effect("KM", RandomEffectLevel::Iiv)
            .unwrap();
        assert_eq!(eta.form, crate::features::EtaForm::Additive);

        session.remove_iiv("KM").unwrap();
        assert!(!session.model().has_random_effect("KM", RandomEffectLevel::Iiv));
    }

    #[test]
    fn test_store_keeps_sessions_apart() {
        let store = SessionStore::new();
        store.open("a", ModelType::Iv).unwrap();
        store.open("b", ModelType::Oral).unwrap();

        store
            .update("a", |state| state.apply_mfl("PERIPHERALS(1)"))
            .unwrap();

        let a = store.with("a", |s| s.model().structure.peripherals).unwrap();
        let b = store.with("b", |s| s.model().structure.peripherals).unwrap();
        assert_eq!((a, b), (1, 0));

        assert_eq!(
            store.update("c", |_| Ok(())),
            Err(BuilderError::UnknownSession("c".into()))
        );
        assert!(store.close("a"));
        assert_eq!(store.len(), 1);
    }
}
