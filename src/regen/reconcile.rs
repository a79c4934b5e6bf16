use std::collections::BTreeMap;

use tracing::debug;

use crate::catalog::Operation;
use crate::model::Parameters;
use crate::state::ParameterOverride;

/// Outcome of matching overrides against regenerated parameters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reconciliation {
    /// Operations carrying the override values into the model
    pub operations: Vec<Operation>,
    /// Overrides whose parameter still exists
    pub kept: Vec<ParameterOverride>,
    /// Names of overrides whose parameter no longer exists
    pub dropped: Vec<String>,
}

/// Matches user-entered parameter values to a freshly regenerated model by name
pub struct ParameterReconciler;

impl ParameterReconciler {
    /// Plan the operations that make `parameters` agree with `overrides`
    ///
    /// An override wins over the regenerated default for every field. An
    /// override naming a parameter that no longer exists is dropped.
    pub fn reconcile(overrides: &[ParameterOverride], parameters: &Parameters) -> Reconciliation {
        let mut inits = BTreeMap::new();
        let mut lower = BTreeMap::new();
        let mut upper = BTreeMap::new();
        let mut fix = Vec::new();
        let mut unfix = Vec::new();
        let mut out = Reconciliation::default();

        for value in overrides {
            let Some(current) = parameters.get(&value.name) else {
                debug!(parameter = %value.name, "dropping override of removed parameter");
                out.dropped.push(value.name.clone());
                continue;
            };
            out.kept.push(value.clone());

            if value.init != current.init {
                inits.insert(value.name.clone(), value.init);
            }
            if value.lower != current.lower {
                lower.insert(value.name.clone(), value.lower);
            }
            if value.upper != current.upper {
                upper.insert(value.name.clone(), value.upper);
            }
            match (value.fix, current.fix) {
                (true, false) => fix.push(value.name.clone()),
                (false, true) => unfix.push(value.name.clone()),
                _ => {}
            }
        }

        if !inits.is_empty() {
            out.operations
                .push(Operation::SetInitialEstimates { values: inits });
        }
        if !lower.is_empty() {
            out.operations.push(Operation::SetLowerBounds { bounds: lower });
        }
        if !upper.is_empty() {
            out.operations.push(Operation::SetUpperBounds { bounds: upper });
        }
        if !fix.is_empty() {
            out.operations.push(Operation::FixParameters { names: fix });
        }
        if !unfix.is_empty() {
            out.operations
                .push(Operation::UnfixParameters { names: unfix });
        }
        out
    }

    /// `parameters` with every matching override applied
    pub fn merge(overrides: &[ParameterOverride], parameters: &Parameters) -> Parameters {
        parameters
            .iter()
            .map(|p| {
                overrides
                    .iter()
                    .find(|o| o.name == p.name)
                    .map(ParameterOverride::to_parameter)
                    .unwrap_or_else(|| p.clone())
            })
            .collect()
    }
}
