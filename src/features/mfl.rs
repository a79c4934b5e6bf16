//! Compact feature notation
//!
//! Statements look like `ELIMINATION(MM)` or `IIV([CL,VC],EXP)` and are
//! separated by `;`. List arguments expand to one feature per element, so
//! `IIV([CL,VC],EXP)` yields two features.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::*;
use crate::error::BuilderError;

// ═══════════════════════════════════════════════════════════════════════════════
// Rendering
// ═══════════════════════════════════════════════════════════════════════════════

impl fmt::Display for Absorption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instantaneous => write!(f, "INST"),
            Self::FirstOrder => write!(f, "FO"),
            Self::ZeroOrder => write!(f, "ZO"),
            Self::SeqZoFo => write!(f, "SEQ-ZO-FO"),
        }
    }
}

impl fmt::Display for Elimination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstOrder => write!(f, "FO"),
            Self::ZeroOrder => write!(f, "ZO"),
            Self::MichaelisMenten => write!(f, "MM"),
            Self::MixedMmFo => write!(f, "MIX-FO-MM"),
        }
    }
}

impl fmt::Display for EtaForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression().to_uppercase())
    }
}

impl fmt::Display for RandomEffectLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iiv => write!(f, "IIV"),
            Self::Iov => write!(f, "IOV"),
        }
    }
}

impl fmt::Display for PdExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name().to_uppercase())
    }
}

impl fmt::Display for Turnover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => write!(f, "PRODUCTION"),
            Self::Degradation => write!(f, "DEGRADATION"),
        }
    }
}

impl fmt::Display for EffectFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Display for CovariateEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "COVARIATE({},{},{}", self.parameter, self.covariate, self.effect)?;
        if self.operation != EffectOperation::Multiplicative {
            write!(f, ",{}", self.operation.symbol())?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absorption(a) => write!(f, "ABSORPTION({a})"),
            Self::Elimination(e) => write!(f, "ELIMINATION({e})"),
            Self::Transits(n) => write!(f, "TRANSITS({n})"),
            Self::Peripherals(n) => write!(f, "PERIPHERALS({n})"),
            Self::LagTime(on) => write!(f, "LAGTIME({})", if *on { "ON" } else { "OFF" }),
            Self::Iiv { parameter, form } => write!(f, "IIV({parameter},{form})"),
            Self::Iov { parameter, form } => write!(f, "IOV({parameter},{form})"),
            Self::Covariance { level, parameters } => {
                let params: Vec<_> = parameters.iter().map(|p| p.as_str()).collect();
                write!(f, "COVARIANCE({level},[{}])", params.join(","))
            }
            Self::Covariate(effect) => write!(f, "{effect}"),
            Self::DirectEffect(e) => write!(f, "DIRECTEFFECT({e})"),
            Self::EffectCompartment(e) => write!(f, "EFFECTCOMP({e})"),
            Self::IndirectEffect {
                expression,
                turnover,
            } => write!(f, "INDIRECTEFFECT({expression},{turnover})"),
        }
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let statements: Vec<String> = self.iter().map(|feat| feat.to_string()).collect();
        write!(f, "{}", statements.join(";"))
    }
}

impl From<Feature> for String {
    fn from(feature: Feature) -> Self {
        feature.to_string()
    }
}

impl TryFrom<String> for Feature {
    type Error = BuilderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Parsing
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse a `;`-separated list of statements into features
pub fn parse_features(input: &str) -> Result<Vec<Feature>, BuilderError> {
    let mut features = Vec::new();
    for statement in input.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        features.extend(parse_statement(statement)?);
    }
    Ok(features)
}

impl FromStr for Feature {
    type Err = BuilderError;

    /// Parse a statement that expands to exactly one feature
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut features = parse_statement(s.trim())?;
        match features.len() {
            1 => Ok(features.remove(0)),
            n => Err(BuilderError::parse(
                s,
                format!("expected a single feature, statement expands to {n}"),
            )),
        }
    }
}

impl FromStr for FeatureSet {
    type Err = BuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(parse_features(s)?.into_iter().collect())
    }
}

/// One argument: a bare value or a bracketed list
fn split_arguments(statement: &str, args: &str) -> Result<Vec<Vec<String>>, BuilderError> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for c in args.chars() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| BuilderError::parse(statement, "unbalanced ']'"))?;
                current.push(c);
            }
            ',' if depth == 0 => {
                out.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if depth != 0 {
        return Err(BuilderError::parse(statement, "unbalanced '['"));
    }
    out.push(current);

    out.into_iter()
        .map(|arg| {
            let arg = arg.trim();
            let values: Vec<String> = match arg.strip_prefix('[').and_then(|a| a.strip_suffix(']'))
            {
                Some(inner) => inner
                    .split(',')
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect(),
                None => vec![arg.to_string()],
            };
            if values.is_empty() || values.iter().any(|v| v.is_empty()) {
                return Err(BuilderError::parse(statement, "empty argument"));
            }
            Ok(values)
        })
        .collect()
}

fn single<'a>(statement: &str, arg: &'a [String]) -> Result<&'a str, BuilderError> {
    match arg {
        [value] => Ok(value.as_str()),
        _ => Err(BuilderError::parse(
            statement,
            "expected a single value, not a list",
        )),
    }
}

fn expect_arity(
    statement: &str,
    args: &[Vec<String>],
    min: usize,
    max: usize,
) -> Result<(), BuilderError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(BuilderError::parse(
            statement,
            format!("expected {expected} arguments, got {}", args.len()),
        ));
    }
    Ok(())
}

fn parse_statement(statement: &str) -> Result<Vec<Feature>, BuilderError> {
    let open = statement
        .find('(')
        .ok_or_else(|| BuilderError::parse(statement, "missing '('"))?;
    if !statement.ends_with(')') {
        return Err(BuilderError::parse(statement, "missing closing ')'"));
    }
    let name = statement[..open].trim().to_uppercase();
    let args = split_arguments(statement, &statement[open + 1..statement.len() - 1])?;

    let features = match name.as_str() {
        "ABSORPTION" => {
            expect_arity(statement, &args, 1, 1)?;
            vec![Feature::Absorption(parse_absorption(
                statement,
                single(statement, &args[0])?,
            )?)]
        }
        "ELIMINATION" => {
            expect_arity(statement, &args, 1, 1)?;
            vec![Feature::Elimination(parse_elimination(
                statement,
                single(statement, &args[0])?,
            )?)]
        }
        "TRANSITS" => {
            expect_arity(statement, &args, 1, 1)?;
            vec![Feature::Transits(parse_count(
                statement,
                single(statement, &args[0])?,
            )?)]
        }
        "PERIPHERALS" => {
            expect_arity(statement, &args, 1, 1)?;
            vec![Feature::Peripherals(parse_count(
                statement,
                single(statement, &args[0])?,
            )?)]
        }
        "LAGTIME" => {
            expect_arity(statement, &args, 1, 1)?;
            let on = match single(statement, &args[0])?.to_uppercase().as_str() {
                "ON" => true,
                "OFF" => false,
                other => {
                    return Err(BuilderError::parse(
                        statement,
                        format!("unknown lag time '{other}'"),
                    ))
                }
            };
            vec![Feature::LagTime(on)]
        }
        "IIV" | "IOV" => {
            expect_arity(statement, &args, 1, 2)?;
            let form = match args.get(1) {
                Some(arg) => parse_form(statement, single(statement, arg)?)?,
                None => EtaForm::Exponential,
            };
            args[0]
                .iter()
                .map(|parameter| {
                    let parameter = parameter.clone();
                    if name == "IIV" {
                        Feature::Iiv { parameter, form }
                    } else {
                        Feature::Iov { parameter, form }
                    }
                })
                .collect()
        }
        "COVARIANCE" => {
            expect_arity(statement, &args, 2, 2)?;
            let level = match single(statement, &args[0])?.to_uppercase().as_str() {
                "IIV" => RandomEffectLevel::Iiv,
                "IOV" => RandomEffectLevel::Iov,
                other => {
                    return Err(BuilderError::parse(
                        statement,
                        format!("unknown random effect level '{other}'"),
                    ))
                }
            };
            let parameters: BTreeSet<String> = args[1].iter().cloned().collect();
            if parameters.len() < 2 {
                return Err(BuilderError::parse(
                    statement,
                    "a covariance block needs at least two parameters",
                ));
            }
            vec![Feature::Covariance { level, parameters }]
        }
        "COVARIATE" => {
            expect_arity(statement, &args, 3, 4)?;
            let effect = parse_effect(statement, single(statement, &args[2])?)?;
            let operation = match args.get(3) {
                Some(arg) => match single(statement, arg)? {
                    "*" => EffectOperation::Multiplicative,
                    "+" => EffectOperation::Additive,
                    other => {
                        return Err(BuilderError::parse(
                            statement,
                            format!("unknown operation '{other}'"),
                        ))
                    }
                },
                None => EffectOperation::Multiplicative,
            };
            let mut out = Vec::new();
            for parameter in &args[0] {
                for covariate in &args[1] {
                    out.push(Feature::Covariate(
                        CovariateEffect::new(parameter.clone(), covariate.clone(), effect)
                            .with_operation(operation),
                    ));
                }
            }
            out
        }
        "DIRECTEFFECT" => {
            expect_arity(statement, &args, 1, 1)?;
            vec![Feature::DirectEffect(parse_pd(
                statement,
                single(statement, &args[0])?,
            )?)]
        }
        "EFFECTCOMP" => {
            expect_arity(statement, &args, 1, 1)?;
            vec![Feature::EffectCompartment(parse_pd(
                statement,
                single(statement, &args[0])?,
            )?)]
        }
        "INDIRECTEFFECT" => {
            expect_arity(statement, &args, 2, 2)?;
            let expression = parse_pd(statement, single(statement, &args[0])?)?;
            let turnover = match single(statement, &args[1])?.to_uppercase().as_str() {
                "PRODUCTION" => Turnover::Production,
                "DEGRADATION" => Turnover::Degradation,
                other => {
                    return Err(BuilderError::parse(
                        statement,
                        format!("unknown turnover '{other}'"),
                    ))
                }
            };
            vec![Feature::IndirectEffect {
                expression,
                turnover,
            }]
        }
        other => {
            return Err(BuilderError::parse(
                statement,
                format!("unknown feature '{other}'"),
            ))
        }
    };
    Ok(features)
}

fn parse_absorption(statement: &str, value: &str) -> Result<Absorption, BuilderError> {
    match value.to_uppercase().as_str() {
        "INST" => Ok(Absorption::Instantaneous),
        "FO" => Ok(Absorption::FirstOrder),
        "ZO" => Ok(Absorption::ZeroOrder),
        "SEQ-ZO-FO" => Ok(Absorption::SeqZoFo),
        other => Err(BuilderError::parse(
            statement,
            format!("unknown absorption '{other}'"),
        )),
    }
}

fn parse_elimination(statement: &str, value: &str) -> Result<Elimination, BuilderError> {
    match value.to_uppercase().as_str() {
        "FO" => Ok(Elimination::FirstOrder),
        "ZO" => Ok(Elimination::ZeroOrder),
        "MM" => Ok(Elimination::MichaelisMenten),
        "MIX-FO-MM" => Ok(Elimination::MixedMmFo),
        other => Err(BuilderError::parse(
            statement,
            format!("unknown elimination '{other}'"),
        )),
    }
}

fn parse_count(statement: &str, value: &str) -> Result<u32, BuilderError> {
    value
        .parse::<u32>()
        .map_err(|_| BuilderError::parse(statement, format!("'{value}' is not a count")))
}

fn parse_form(statement: &str, value: &str) -> Result<EtaForm, BuilderError> {
    match value.to_uppercase().as_str() {
        "EXP" => Ok(EtaForm::Exponential),
        "ADD" => Ok(EtaForm::Additive),
        "PROP" => Ok(EtaForm::Proportional),
        "LOG" => Ok(EtaForm::Log),
        "RE_LOG" => Ok(EtaForm::ReLog),
        other => Err(BuilderError::parse(
            statement,
            format!("unknown functional form '{other}'"),
        )),
    }
}

fn parse_effect(statement: &str, value: &str) -> Result<EffectFunction, BuilderError> {
    match value.to_lowercase().as_str() {
        "lin" => Ok(EffectFunction::Lin),
        "cat" => Ok(EffectFunction::Cat),
        "cat2" => Ok(EffectFunction::Cat2),
        "piece_lin" => Ok(EffectFunction::PieceLin),
        "exp" => Ok(EffectFunction::Exp),
        "pow" => Ok(EffectFunction::Pow),
        other => Err(BuilderError::parse(
            statement,
            format!("unknown covariate effect '{other}'"),
        )),
    }
}

fn parse_pd(statement: &str, value: &str) -> Result<PdExpression, BuilderError> {
    match value.to_uppercase().as_str() {
        "LINEAR" => Ok(PdExpression::Linear),
        "EMAX" => Ok(PdExpression::Emax),
        "SIGMOID" => Ok(PdExpression::Sigmoid),
        other => Err(BuilderError::parse(
            statement,
            format!("unknown PD expression '{other}'"),
        )),
    }
}
