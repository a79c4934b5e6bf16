//! Minimal transformation planning
//!
//! Each partition is planned on its own: PK structure and PD link compare
//! exclusive slots, variability compares random effects per parameter and
//! covariance blocks, covariates are added and removed by value.

use std::collections::{BTreeMap, BTreeSet};

use super::{apply, PkCatalog};
use crate::catalog::Operation;
use crate::error::BuilderError;
use crate::features::{EtaForm, Feature, FeatureCategory, FeatureSet, RandomEffectLevel, Slot};
use crate::model::{ConcreteModel, ModelType, PdLink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Partition {
    Structural,
    PdLink,
    Variability,
    Covariate,
}

impl Partition {
    fn of(category: FeatureCategory) -> Self {
        if category.is_structural() {
            Self::Structural
        } else if category.is_pd_link() {
            Self::PdLink
        } else if category.is_variability() {
            Self::Variability
        } else {
            Self::Covariate
        }
    }
}

/// Order in which structural slots are transformed
const STRUCTURAL_ORDER: [FeatureCategory; 5] = [
    FeatureCategory::Absorption,
    FeatureCategory::Elimination,
    FeatureCategory::Peripherals,
    FeatureCategory::Transits,
    FeatureCategory::LagTime,
];

pub(super) fn plan(
    catalog: &PkCatalog,
    current: &FeatureSet,
    target: &FeatureSet,
    model: &ConcreteModel,
) -> Result<Vec<Operation>, BuilderError> {
    let mut partition: Option<(Partition, &Feature)> = None;
    for feature in current.iter().chain(target.iter()) {
        let this = Partition::of(feature.category());
        match partition {
            None => partition = Some((this, feature)),
            Some((seen, first)) if seen != this => {
                return Err(BuilderError::infeasible(
                    feature,
                    format!("cannot be planned together with {first}"),
                ))
            }
            Some(_) => {}
        }
    }

    check_exclusive(target)?;
    match partition.map(|(p, _)| p) {
        None => Ok(Vec::new()),
        Some(Partition::Structural) => structural(current, target, model),
        Some(Partition::PdLink) => pd_link(current, target),
        Some(Partition::Variability) => variability(catalog, current, target, model),
        Some(Partition::Covariate) => covariates(current, target, model),
    }
}

fn check_exclusive(target: &FeatureSet) -> Result<(), BuilderError> {
    let mut seen: BTreeMap<Slot, &Feature> = BTreeMap::new();
    for feature in target.iter().filter(|f| f.category().is_exclusive()) {
        if let Some(previous) = seen.insert(feature.slot(), feature) {
            return Err(BuilderError::infeasible(
                feature,
                format!("conflicts with {previous}"),
            ));
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Structure and PD link
// ═══════════════════════════════════════════════════════════════════════════════

fn structural_operation(feature: &Feature) -> Option<Operation> {
    match feature {
        Feature::Absorption(absorption) => Some(Operation::SetAbsorption {
            absorption: *absorption,
        }),
        Feature::Elimination(elimination) => Some(Operation::SetElimination {
            elimination: *elimination,
        }),
        Feature::Transits(count) => Some(Operation::SetTransitCompartments { count: *count }),
        Feature::Peripherals(count) => Some(Operation::SetPeripheralCompartments { count: *count }),
        Feature::LagTime(enabled) => Some(Operation::SetLagTime { enabled: *enabled }),
        _ => None,
    }
}

fn structural(
    current: &FeatureSet,
    target: &FeatureSet,
    model: &ConcreteModel,
) -> Result<Vec<Operation>, BuilderError> {
    let mut operations = Vec::new();
    for category in STRUCTURAL_ORDER {
        // A slot absent from the target is left as it is
        let Some(wanted) = target.get(category) else {
            continue;
        };
        if current.get(category) == Some(wanted) {
            continue;
        }
        if category == FeatureCategory::Absorption && model.model_type == ModelType::Iv {
            return Err(BuilderError::infeasible(
                wanted,
                "intravenous models have no absorption",
            ));
        }
        operations.extend(structural_operation(wanted));
    }
    Ok(operations)
}

fn pd_link_of(feature: &Feature) -> Option<PdLink> {
    match feature {
        Feature::DirectEffect(e) => Some(PdLink::Direct(*e)),
        Feature::EffectCompartment(e) => Some(PdLink::EffectCompartment(*e)),
        Feature::IndirectEffect {
            expression,
            turnover,
        } => Some(PdLink::Indirect(*expression, *turnover)),
        _ => None,
    }
}

fn pd_link(current: &FeatureSet, target: &FeatureSet) -> Result<Vec<Operation>, BuilderError> {
    let have = current.pd_link().into_iter().next();
    let want = target.pd_link().into_iter().next();
    match (have, want) {
        (Some(have), None) => Err(BuilderError::infeasible(
            have,
            "a PD link cannot be removed from a model",
        )),
        (have, Some(want)) if have.as_ref() != Some(&want) => Ok(pd_link_of(&want)
            .map(|link| Operation::SetPdLink { link })
            .into_iter()
            .collect()),
        _ => Ok(Vec::new()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Variability
// ═══════════════════════════════════════════════════════════════════════════════

type Block = (RandomEffectLevel, BTreeSet<String>);

fn random_effects(set: &FeatureSet, level: RandomEffectLevel) -> BTreeMap<String, EtaForm> {
    set.iter()
        .filter_map(|f| match (f, level) {
            (Feature::Iiv { parameter, form }, RandomEffectLevel::Iiv)
            | (Feature::Iov { parameter, form }, RandomEffectLevel::Iov) => {
                Some((parameter.clone(), *form))
            }
            _ => None,
        })
        .collect()
}

fn blocks(set: &FeatureSet) -> Vec<Block> {
    set.iter()
        .filter_map(|f| match f {
            Feature::Covariance { level, parameters } => Some((*level, parameters.clone())),
            _ => None,
        })
        .collect()
}

fn block_feature(block: &Block) -> Feature {
    Feature::Covariance {
        level: block.0,
        parameters: block.1.clone(),
    }
}

/// Parameters whose random effect of one level is absent from, or different in, `to`
fn changed(
    from: &BTreeMap<String, EtaForm>,
    to: &BTreeMap<String, EtaForm>,
) -> Vec<(String, EtaForm)> {
    from.iter()
        .filter(|(parameter, form)| to.get(*parameter) != Some(*form))
        .map(|(p, f)| (p.clone(), *f))
        .collect()
}

fn occasion_column(feature: &Feature, model: &ConcreteModel) -> Result<String, BuilderError> {
    let Some(dataset) = &model.dataset else {
        return Err(BuilderError::infeasible(feature, "IOV needs an attached dataset"));
    };
    let occasion = dataset.info().occasion_column().ok_or_else(|| {
        BuilderError::infeasible(feature, "the dataset has no occasion column")
    })?;
    Ok(occasion.to_string())
}

fn variability(
    catalog: &PkCatalog,
    current: &FeatureSet,
    target: &FeatureSet,
    model: &ConcreteModel,
) -> Result<Vec<Operation>, BuilderError> {
    let current_iiv = random_effects(current, RandomEffectLevel::Iiv);
    let target_iiv = random_effects(target, RandomEffectLevel::Iiv);
    let current_iov = random_effects(current, RandomEffectLevel::Iov);
    let target_iov = random_effects(target, RandomEffectLevel::Iov);
    let current_blocks = blocks(current);
    let target_blocks = blocks(target);

    for feature in target.by_category(FeatureCategory::Iiv).iter() {
        for parameter in feature.parameters() {
            if !model.has_individual_parameter(parameter) {
                return Err(BuilderError::infeasible(
                    feature,
                    format!("{parameter} is not a parameter of the model"),
                ));
            }
        }
    }
    for feature in target.by_category(FeatureCategory::Iov).iter() {
        for parameter in feature.parameters() {
            if !target_iiv.contains_key(parameter) {
                return Err(BuilderError::infeasible(
                    feature,
                    format!("IOV on {parameter} requires IIV on {parameter}"),
                ));
            }
        }
    }
    let mut claimed: BTreeSet<(RandomEffectLevel, &str)> = BTreeSet::new();
    for block in &target_blocks {
        let feature = block_feature(block);
        if block.1.len() < 2 {
            return Err(BuilderError::infeasible(
                feature,
                "a joint distribution needs at least two parameters",
            ));
        }
        let members = match block.0 {
            RandomEffectLevel::Iiv => &target_iiv,
            RandomEffectLevel::Iov => &target_iov,
        };
        for parameter in &block.1 {
            if !members.contains_key(parameter) {
                return Err(BuilderError::infeasible(
                    feature,
                    format!("{parameter} has no {}", block.0),
                ));
            }
            if !claimed.insert((block.0, parameter.as_str())) {
                return Err(BuilderError::infeasible(
                    feature,
                    format!("{parameter} is already in another joint distribution"),
                ));
            }
        }
    }

    let removed_iov = changed(&current_iov, &target_iov);
    let removed_iiv = changed(&current_iiv, &target_iiv);
    let added_iiv = changed(&target_iiv, &current_iiv);
    let added_iov = changed(&target_iov, &current_iov);

    // Removing an eta dissolves its block, so such blocks are split and rebuilt
    let touched = |block: &Block| {
        let removed = match block.0 {
            RandomEffectLevel::Iiv => &removed_iiv,
            RandomEffectLevel::Iov => &removed_iov,
        };
        removed.iter().any(|(p, _)| block.1.contains(p))
    };
    let split: Vec<&Block> = current_blocks
        .iter()
        .filter(|b| !target_blocks.contains(b) || touched(b))
        .collect();
    let create: Vec<&Block> = target_blocks
        .iter()
        .filter(|b| !current_blocks.contains(b) || split.contains(b))
        .collect();

    let mut operations = Vec::new();
    for (level, parameters) in split {
        operations.push(Operation::SplitJointDistribution {
            level: *level,
            parameters: parameters.iter().cloned().collect(),
        });
    }
    for (parameter, _) in removed_iov {
        operations.push(Operation::RemoveIov { parameter });
    }
    for (parameter, _) in removed_iiv {
        operations.push(Operation::RemoveIiv { parameter });
    }
    for (parameter, form) in added_iiv {
        operations.push(Operation::AddIiv {
            parameter,
            form,
            initial_estimate: catalog.iiv_init,
        });
    }
    for (parameter, form) in added_iov {
        let feature = Feature::Iov {
            parameter: parameter.clone(),
            form,
        };
        let occasion = occasion_column(&feature, model)?;
        operations.push(Operation::AddIov {
            parameter,
            form,
            occasion,
            initial_estimate: catalog.iov_init,
        });
    }
    for (level, parameters) in create {
        operations.push(Operation::CreateJointDistribution {
            level: *level,
            parameters: parameters.iter().cloned().collect(),
        });
    }
    Ok(operations)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Covariates
// ═══════════════════════════════════════════════════════════════════════════════

fn covariates(
    current: &FeatureSet,
    target: &FeatureSet,
    model: &ConcreteModel,
) -> Result<Vec<Operation>, BuilderError> {
    let mut operations = Vec::new();
    for feature in current.difference(target).iter() {
        if let Feature::Covariate(effect) = feature {
            operations.push(Operation::RemoveCovariateEffect {
                parameter: effect.parameter.clone(),
                covariate: effect.covariate.clone(),
            });
        }
    }
    for feature in target.difference(current).iter() {
        if let Feature::Covariate(effect) = feature {
            apply::check_covariate(model, effect)?;
            operations.push(Operation::AddCovariateEffect {
                effect: effect.clone(),
            });
        }
    }
    Ok(operations)
}
