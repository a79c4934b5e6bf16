use super::structural_parameters;
use crate::catalog::{eta_name, population_name, variance_name, ErrorModelKind};
use crate::error::BuilderError;
use crate::features::{
    Absorption, CovariateEffect, EffectFunction, EtaForm, Feature, RandomEffectLevel,
};
use crate::model::{
    Allometry, AppliedCovariate, BaseError, ConcreteModel, CovarianceBlock, ErrorModel,
    IndividualParameter, ModelType, Parameter, PdLink, RandomEffect,
};

const COVARIATE_INIT: f64 = 0.001;

// ═══════════════════════════════════════════════════════════════════════════════
// Parameter defaults
// ═══════════════════════════════════════════════════════════════════════════════

fn population_default(parameter: &str) -> Parameter {
    let init = match parameter {
        "CL" | "CLMM" => 0.01,
        "VC" | "N" => 1.0,
        "MAT" | "D1" => 2.0,
        "KM" => 1.0,
        "MDT" => 0.5,
        _ => 0.1,
    };
    let lower = match parameter {
        "SLOPE" | "E_MAX" => f64::NEG_INFINITY,
        _ => 0.0,
    };
    Parameter::new(population_name(parameter), init).with_bounds(lower, f64::INFINITY)
}

fn variance(name: impl Into<String>, init: f64) -> Parameter {
    Parameter::new(name, init).with_bounds(0.0, f64::INFINITY)
}

fn is_clearance(parameter: &str) -> bool {
    parameter == "CL" || parameter == "CLMM" || parameter.starts_with("QP")
}

fn is_volume(parameter: &str) -> bool {
    parameter == "VC" || parameter.starts_with("VP")
}

pub(super) fn parameter_mut<'a>(
    model: &'a mut ConcreteModel,
    name: &str,
) -> Result<&'a mut Parameter, BuilderError> {
    model
        .parameters
        .get_mut(name)
        .ok_or_else(|| BuilderError::UnknownParameter(name.to_string()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Structure
// ═══════════════════════════════════════════════════════════════════════════════

/// Bring individual and population parameters in line with the structure
///
/// Parameters that vanished take their random effects, covariate effects and
/// allometric exponents with them. Surviving parameters keep their values.
pub(super) fn sync_structure(model: &mut ConcreteModel) {
    let required = structural_parameters(&model.structure, model.pd_link.as_ref());
    let vanished: Vec<String> = model
        .individual_parameters
        .iter()
        .map(|p| p.name.clone())
        .filter(|name| !required.contains(name))
        .collect();
    for name in &vanished {
        drop_individual_parameter(model, name);
    }

    model.individual_parameters = required
        .iter()
        .map(|name| IndividualParameter {
            name: name.clone(),
            population: population_name(name),
        })
        .collect();
    for name in &required {
        model.parameters.insert_if_absent(population_default(name));
    }
}

fn drop_individual_parameter(model: &mut ConcreteModel, name: &str) {
    model.parameters.remove(&population_name(name));
    for level in [RandomEffectLevel::Iov, RandomEffectLevel::Iiv] {
        if model.has_random_effect(name, level) {
            detach_random_effect(model, name, level);
        }
    }

    let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut model.covariates)
        .into_iter()
        .partition(|c| c.effect.parameter == name);
    model.covariates = kept;
    for applied in dropped {
        for theta in &applied.thetas {
            model.parameters.remove(theta);
        }
    }

    model.parameters.remove(&format!("ALLO_{name}"));
    if let Some(allometry) = &mut model.allometry {
        allometry.parameters.retain(|p| p != name);
    }
}

pub(super) fn set_absorption(
    model: &mut ConcreteModel,
    absorption: Absorption,
) -> Result<(), BuilderError> {
    if model.model_type == ModelType::Iv {
        return Err(BuilderError::infeasible(
            Feature::Absorption(absorption),
            "intravenous models have no absorption",
        ));
    }
    model.structure.absorption = Some(absorption);
    sync_structure(model);
    Ok(())
}

/// Attach or replace the PD link; the effect is observed as response variable 2
pub(super) fn set_pd_link(model: &mut ConcreteModel, link: PdLink) {
    model.pd_link = Some(link);
    sync_structure(model);
    model
        .error_models
        .entry(2)
        .or_insert_with(|| ErrorModel::new(BaseError::Additive));
    sync_error_parameters(model, 2);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Residual error
// ═══════════════════════════════════════════════════════════════════════════════

fn suffix(dv: u32) -> String {
    if dv == 1 {
        String::new()
    } else {
        format!("_{dv}")
    }
}

pub(super) fn set_error_model(
    model: &mut ConcreteModel,
    kind: ErrorModelKind,
    dv: u32,
    cutoff: f64,
) -> Result<(), BuilderError> {
    let error = model
        .error_models
        .get_mut(&dv)
        .ok_or(BuilderError::UnknownResponseVariable(dv))?;
    match kind {
        ErrorModelKind::Additive => error.base = BaseError::Additive,
        ErrorModelKind::Proportional => error.base = BaseError::Proportional,
        ErrorModelKind::Combined => error.base = BaseError::Combined,
        ErrorModelKind::IivOnRuv => error.iiv_on_ruv = true,
        ErrorModelKind::PowerOnRuv => error.power_on_ruv = true,
        ErrorModelKind::TimeVarying => error.time_varying = Some(cutoff),
    }
    sync_error_parameters(model, dv);
    Ok(())
}

/// Add or remove the residual error parameters of response variable `dv`
pub(super) fn sync_error_parameters(model: &mut ConcreteModel, dv: u32) {
    let Some(error) = model.error_models.get(&dv).cloned() else {
        return;
    };
    let s = suffix(dv);
    let proportional = matches!(error.base, BaseError::Proportional | BaseError::Combined);
    let additive = matches!(error.base, BaseError::Additive | BaseError::Combined);

    let wanted = [
        (variance(format!("SIGMA_PROP{s}"), 0.09), proportional),
        (variance(format!("SIGMA_ADD{s}"), 0.1), additive),
        (variance(format!("IIV_RUV{dv}"), 0.09), error.iiv_on_ruv),
        (Parameter::new(format!("POWER{s}"), 1.0), error.power_on_ruv),
        (
            variance(format!("TIME_VARYING{s}"), 0.1),
            error.time_varying.is_some(),
        ),
    ];
    for (parameter, keep) in wanted {
        if keep {
            model.parameters.insert_if_absent(parameter);
        } else {
            model.parameters.remove(&parameter.name);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Random effects
// ═══════════════════════════════════════════════════════════════════════════════

fn random_effect_feature(parameter: &str, level: RandomEffectLevel, form: EtaForm) -> Feature {
    let parameter = parameter.to_string();
    match level {
        RandomEffectLevel::Iiv => Feature::Iiv { parameter, form },
        RandomEffectLevel::Iov => Feature::Iov { parameter, form },
    }
}

/// Add an eta without checks; used while building a baseline
pub(super) fn insert_random_effect(
    model: &mut ConcreteModel,
    parameter: &str,
    level: RandomEffectLevel,
    form: EtaForm,
    init: f64,
    occasion: Option<String>,
) {
    let variance_parameter = variance_name(parameter, level);
    model
        .parameters
        .upsert(variance(variance_parameter.clone(), init));
    model.random_effects.push(RandomEffect {
        name: eta_name(parameter, level),
        parameter: parameter.to_string(),
        level,
        form,
        variance: variance_parameter,
        occasion,
    });
}

pub(super) fn add_random_effect(
    model: &mut ConcreteModel,
    parameter: &str,
    level: RandomEffectLevel,
    form: EtaForm,
    init: f64,
    occasion: Option<String>,
) -> Result<(), BuilderError> {
    let feature = random_effect_feature(parameter, level, form);
    if !model.has_individual_parameter(parameter) {
        return Err(BuilderError::infeasible(
            feature,
            format!("{parameter} is not a parameter of the model"),
        ));
    }
    if model.has_random_effect(parameter, level) {
        return Err(BuilderError::infeasible(
            feature,
            format!("{parameter} already has {level}"),
        ));
    }
    if let Some(occasion) = &occasion {
        if model.covariates.iter().any(|c| &c.effect.covariate == occasion) {
            return Err(BuilderError::infeasible(
                feature,
                format!("occasion column {occasion} is used as a covariate"),
            ));
        }
    }
    insert_random_effect(model, parameter, level, form, init, occasion);
    Ok(())
}

pub(super) fn remove_random_effect(
    model: &mut ConcreteModel,
    parameter: &str,
    level: RandomEffectLevel,
) -> Result<(), BuilderError> {
    if !model.has_random_effect(parameter, level) {
        return Err(BuilderError::infeasible(
            format!("{level}({parameter})"),
            format!("{parameter} has no {level} to remove"),
        ));
    }
    detach_random_effect(model, parameter, level);
    Ok(())
}

fn detach_random_effect(model: &mut ConcreteModel, parameter: &str, level: RandomEffectLevel) {
    let Some(idx) = model
        .random_effects
        .iter()
        .position(|eta| eta.parameter == parameter && eta.level == level)
    else {
        return;
    };
    let eta = model.random_effects[idx].name.clone();
    detach_from_block(model, &eta);
    let removed = model.random_effects.remove(idx);
    model.parameters.remove(&removed.variance);
}

/// Covariance parameters of a block as `(eta_a, eta_b, parameter)`
fn covariance_parameters(
    model: &ConcreteModel,
    block: &CovarianceBlock,
) -> Vec<(String, String, String)> {
    let variance_of = |eta: &str| {
        model
            .random_effects
            .iter()
            .find(|e| e.name == eta)
            .map(|e| e.variance.clone())
            .unwrap_or_else(|| eta.to_string())
    };
    let mut out = Vec::new();
    for (i, a) in block.etas.iter().enumerate() {
        for b in &block.etas[i + 1..] {
            out.push((
                a.clone(),
                b.clone(),
                format!("{}_{}", variance_of(a), variance_of(b)),
            ));
        }
    }
    out
}

fn detach_from_block(model: &mut ConcreteModel, eta: &str) {
    let Some(idx) = model
        .blocks
        .iter()
        .position(|b| b.etas.iter().any(|e| e == eta))
    else {
        return;
    };
    let pairs = covariance_parameters(model, &model.blocks[idx]);
    for (a, b, parameter) in pairs {
        if a == eta || b == eta {
            model.parameters.remove(&parameter);
        }
    }
    model.blocks[idx].etas.retain(|e| e != eta);
    if model.blocks[idx].etas.len() < 2 {
        model.blocks.remove(idx);
    }
}

fn covariance_feature(level: RandomEffectLevel, parameters: &[String]) -> Feature {
    Feature::Covariance {
        level,
        parameters: parameters.iter().cloned().collect(),
    }
}

pub(super) fn create_joint_distribution(
    model: &mut ConcreteModel,
    level: RandomEffectLevel,
    parameters: &[String],
    covariance_init: f64,
) -> Result<(), BuilderError> {
    if parameters.len() < 2 {
        return Err(BuilderError::infeasible(
            covariance_feature(level, parameters),
            "a joint distribution needs at least two parameters",
        ));
    }
    let etas = parameters
        .iter()
        .map(|p| {
            model
                .random_effect(p, level)
                .map(|eta| eta.name.clone())
                .ok_or_else(|| {
                    BuilderError::infeasible(
                        covariance_feature(level, parameters),
                        format!("{p} has no {level}"),
                    )
                })
        })
        .collect::<Result<Vec<String>, _>>()?;

    for eta in &etas {
        detach_from_block(model, eta);
    }
    let block = CovarianceBlock { level, etas };
    let pairs = covariance_parameters(model, &block);
    for (_, _, name) in pairs {
        model.parameters.upsert(Parameter::new(name, covariance_init));
    }
    model.blocks.push(block);
    Ok(())
}

pub(super) fn split_joint_distribution(
    model: &mut ConcreteModel,
    level: RandomEffectLevel,
    parameters: &[String],
) -> Result<(), BuilderError> {
    let etas: Vec<String> = parameters.iter().map(|p| eta_name(p, level)).collect();
    let idx = model
        .blocks
        .iter()
        .position(|b| {
            b.level == level
                && b.etas.len() == etas.len()
                && etas.iter().all(|e| b.etas.contains(e))
        })
        .ok_or_else(|| {
            BuilderError::infeasible(
                covariance_feature(level, parameters),
                "no such joint distribution",
            )
        })?;
    let pairs = covariance_parameters(model, &model.blocks[idx]);
    for (_, _, name) in pairs {
        model.parameters.remove(&name);
    }
    model.blocks.remove(idx);
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Covariates and allometry
// ═══════════════════════════════════════════════════════════════════════════════

/// Check that a covariate effect can be added to `model`
pub(super) fn check_covariate(
    model: &ConcreteModel,
    effect: &CovariateEffect,
) -> Result<(), BuilderError> {
    let feature = Feature::Covariate(effect.clone());
    if !model.has_individual_parameter(&effect.parameter) {
        return Err(BuilderError::infeasible(
            feature,
            format!("{} is not a parameter of the model", effect.parameter),
        ));
    }
    let Some(dataset) = &model.dataset else {
        return Err(BuilderError::infeasible(feature, "no dataset is attached"));
    };
    if !dataset.has_column(&effect.covariate) {
        return Err(BuilderError::infeasible(
            feature,
            format!("column {} is not in the dataset", effect.covariate),
        ));
    }
    if model
        .random_effects
        .iter()
        .any(|eta| eta.occasion.as_deref() == Some(effect.covariate.as_str()))
    {
        return Err(BuilderError::infeasible(
            feature,
            format!("column {} is the occasion of an IOV", effect.covariate),
        ));
    }
    Ok(())
}

pub(super) fn add_covariate_effect(
    model: &mut ConcreteModel,
    effect: &CovariateEffect,
) -> Result<(), BuilderError> {
    check_covariate(model, effect)?;
    if model.has_covariate_effect(&effect.parameter, &effect.covariate) {
        return Err(BuilderError::infeasible(
            Feature::Covariate(effect.clone()),
            "an effect of this covariate on this parameter is already present",
        ));
    }

    let count = match effect.effect {
        EffectFunction::Cat | EffectFunction::Cat2 => {
            let levels = model
                .dataset
                .as_ref()
                .and_then(|d| d.levels(&effect.covariate))
                .map(|l| l.len())
                .unwrap_or(0);
            if levels < 2 {
                return Err(BuilderError::infeasible(
                    Feature::Covariate(effect.clone()),
                    format!("column {} has fewer than two levels", effect.covariate),
                ));
            }
            levels - 1
        }
        EffectFunction::PieceLin => 2,
        EffectFunction::Lin | EffectFunction::Exp | EffectFunction::Pow => 1,
    };
    let base = format!("POP_{}{}", effect.parameter, effect.covariate);
    let thetas: Vec<String> = (0..count)
        .map(|i| {
            if i == 0 {
                base.clone()
            } else {
                format!("{base}_{}", i + 1)
            }
        })
        .collect();

    let (lower, upper) = match effect.effect {
        EffectFunction::Pow => (-100.0, 100000.0),
        _ => (f64::NEG_INFINITY, f64::INFINITY),
    };
    for theta in &thetas {
        model
            .parameters
            .upsert(Parameter::new(theta.clone(), COVARIATE_INIT).with_bounds(lower, upper));
    }
    model.covariates.push(AppliedCovariate {
        effect: effect.clone(),
        thetas,
    });
    Ok(())
}

pub(super) fn remove_covariate_effect(
    model: &mut ConcreteModel,
    parameter: &str,
    covariate: &str,
) -> Result<(), BuilderError> {
    let idx = model
        .covariates
        .iter()
        .position(|c| c.effect.parameter == parameter && c.effect.covariate == covariate)
        .ok_or_else(|| {
            BuilderError::infeasible(
                format!("COVARIATE({parameter},{covariate})"),
                "no such covariate effect",
            )
        })?;
    let removed = model.covariates.remove(idx);
    for theta in &removed.thetas {
        model.parameters.remove(theta);
    }
    Ok(())
}

pub(super) fn add_allometry(
    model: &mut ConcreteModel,
    allometry: &Allometry,
) -> Result<(), BuilderError> {
    let label = format!("ALLOMETRY({},{})", allometry.variable, allometry.reference_value);
    let has_column = model
        .dataset
        .as_ref()
        .is_some_and(|d| d.has_column(&allometry.variable));
    if !has_column {
        return Err(BuilderError::infeasible(
            label,
            format!("column {} is not in the dataset", allometry.variable),
        ));
    }

    let targets: Vec<String> = if allometry.parameters.is_empty() {
        model
            .individual_parameter_names()
            .into_iter()
            .filter(|p| is_clearance(p) || is_volume(p))
            .map(str::to_string)
            .collect()
    } else {
        if let Some(missing) = allometry
            .parameters
            .iter()
            .find(|p| !model.has_individual_parameter(p))
        {
            return Err(BuilderError::infeasible(
                label,
                format!("{missing} is not a parameter of the model"),
            ));
        }
        allometry.parameters.clone()
    };

    model.parameters.retain(|p| !p.name.starts_with("ALLO_"));
    for parameter in targets {
        let init = if is_clearance(&parameter) { 0.75 } else { 1.0 };
        model.parameters.upsert(
            Parameter::new(format!("ALLO_{parameter}"), init).fixed(allometry.fixed),
        );
    }
    model.allometry = Some(allometry.clone());
    Ok(())
}
