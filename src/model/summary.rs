//! Generic text view of a model

use std::fmt::Write;

use super::*;
use crate::features::{EffectFunction, EffectOperation};

const RULE: &str = "--------------------";

fn header(out: &mut String, title: &str) {
    let _ = writeln!(out, "{RULE}{title}{RULE}\n");
}

fn eta_term(base: &str, eta: &RandomEffect) -> String {
    match eta.form {
        EtaForm::Exponential => format!("{base}*exp({})", eta.name),
        EtaForm::Additive => format!("{base} + {}", eta.name),
        EtaForm::Proportional => format!("{base}*(1 + {})", eta.name),
        EtaForm::Log => format!("exp(log({base}) + {})", eta.name),
        EtaForm::ReLog => format!("{base}*exp({0})/(1 + {base}*(exp({0}) - 1))", eta.name),
    }
}

fn covariate_statement(applied: &AppliedCovariate, model: &ConcreteModel) -> String {
    let effect = &applied.effect;
    let cov = &effect.covariate;
    let thetas = &applied.thetas;
    let theta = thetas.first().map(|s| s.as_str()).unwrap_or("THETA");
    let centre = model
        .dataset
        .as_ref()
        .and_then(|d| d.column(cov))
        .map(|values| median(values.into_iter().flatten().collect()))
        .unwrap_or(0.0);

    let expr = match effect.effect {
        EffectFunction::Lin => format!("1 + {theta}*({cov} - {centre})"),
        EffectFunction::Exp => format!("exp({theta}*({cov} - {centre}))"),
        EffectFunction::Pow => format!("({cov}/{centre})**{theta}"),
        EffectFunction::PieceLin => format!(
            "piecewise(1 + {theta}*({cov} - {centre}), {cov} <= {centre}; 1 + {}*({cov} - {centre}))",
            thetas.get(1).map(|s| s.as_str()).unwrap_or(theta)
        ),
        EffectFunction::Cat | EffectFunction::Cat2 => {
            let levels: Vec<String> = thetas
                .iter()
                .enumerate()
                .map(|(i, t)| format!("1 + {t}, {cov} == level{}", i + 1))
                .collect();
            format!("piecewise({}; 1)", levels.join("; "))
        }
    };
    format!("{}{} = {}", effect.parameter, cov, expr)
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn structure_lines(model: &ConcreteModel) -> Vec<String> {
    let s = &model.structure;
    let mut lines = Vec::new();
    match s.absorption {
        Some(a) => lines.push(format!("absorption: {}", Feature::Absorption(a))),
        None => lines.push("absorption: none (intravenous)".to_string()),
    }
    lines.push(format!("elimination: {}", Feature::Elimination(s.elimination)));
    lines.push(format!("transit compartments: {}", s.transits));
    lines.push(format!("peripheral compartments: {}", s.peripherals));
    lines.push(format!("lag time: {}", if s.lag_time { "yes" } else { "no" }));
    if let Some(link) = &model.pd_link {
        lines.push(format!("pd link: {}", link.to_feature()));
    }
    lines
}

pub(super) fn render(model: &ConcreteModel) -> String {
    let mut out = String::new();

    header(&mut out, "STATEMENTS");
    for line in structure_lines(model) {
        let _ = writeln!(out, "; {line}");
    }
    for applied in &model.covariates {
        let _ = writeln!(out, "{}", covariate_statement(applied, model));
    }
    for ip in &model.individual_parameters {
        let mut expr = ip.population.clone();
        if let Some(allo) = &model.allometry {
            let theta = format!("ALLO_{}", ip.name);
            if model.parameters.contains(&theta) {
                expr = format!(
                    "{expr}*({}/{})**{theta}",
                    allo.variable, allo.reference_value
                );
            }
        }
        for applied in model
            .covariates
            .iter()
            .filter(|c| c.effect.parameter == ip.name)
        {
            let factor = format!("{}{}", ip.name, applied.effect.covariate);
            expr = match applied.effect.operation {
                EffectOperation::Multiplicative => format!("{expr}*{factor}"),
                EffectOperation::Additive => format!("{expr} + {factor}"),
            };
        }
        for eta in model
            .random_effects
            .iter()
            .filter(|eta| eta.parameter == ip.name)
        {
            expr = eta_term(&expr, eta);
        }
        let _ = writeln!(out, "{} = {}", ip.name, expr);
    }
    for (dv, error) in &model.error_models {
        let suffix = if *dv == 1 { String::new() } else { format!("_{dv}") };
        let mut y = match error.base {
            BaseError::Additive => format!("IPRED{suffix} + EPS_ADD{suffix}"),
            BaseError::Proportional => format!("IPRED{suffix}*(1 + EPS_PROP{suffix})"),
            BaseError::Combined => {
                format!("IPRED{suffix}*(1 + EPS_PROP{suffix}) + EPS_ADD{suffix}")
            }
        };
        if error.power_on_ruv {
            y = format!("{y}; W = IPRED{suffix}**POWER{suffix}");
        }
        if error.iiv_on_ruv {
            y = format!("{y}; EPS scaled by exp(ETA_RV{dv})");
        }
        if let Some(cutoff) = error.time_varying {
            y = format!("{y}; EPS scaled by TIME_VARYING{suffix} when TIME < {cutoff}");
        }
        let _ = writeln!(out, "Y{suffix} = {y}");
    }
    out.push('\n');

    header(&mut out, "ETAS");
    for eta in &model.random_effects {
        let joint = model
            .block_of(&eta.name)
            .map(|b| format!(" (joint with {})", b.etas.join(", ")))
            .unwrap_or_default();
        let occasion = eta
            .occasion
            .as_ref()
            .map(|o| format!(" by {o}"))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{} ~ N(0, {}) [{}{}]{}",
            eta.name,
            eta.variance,
            eta.level,
            occasion,
            joint
        );
    }
    out.push('\n');

    header(&mut out, "PARAMETERS");
    let _ = write!(out, "{}", model.parameters);
    out.push('\n');

    header(&mut out, "ESTIMATION");
    for step in &model.estimation_steps {
        let _ = writeln!(
            out,
            "{}{}{}",
            step.method.name(),
            if step.interaction { " INTERACTION" } else { "" },
            if step.evaluation { " EVALUATION" } else { "" }
        );
    }
    if model.covariance_step {
        let _ = writeln!(out, "COVARIANCE");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median() {
        assert_eq!(median(vec![3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(vec![4.0, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(median(Vec::new()), 0.0);
    }
}
