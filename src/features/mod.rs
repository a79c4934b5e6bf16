//! Declarative model features and feature-set algebra
//!
//! A [Feature] is one value-equal design choice such as "first-order
//! elimination" or "exponential IIV on CL". A [FeatureSet] is the full set
//! of such choices describing a model. Sets are immutable values: every
//! edit produces a new set, usually through [FeatureSet::replace].
//!
//! Features render to and parse from a compact notation, see [mfl]:
//!
//! ```ignore
//! use pharmbuild::features::{parse_features, FeatureSet};
//!
//! let current: FeatureSet = "ELIMINATION(FO);PERIPHERALS(0)".parse()?;
//! let target = current.replace(parse_features("ELIMINATION(MM)")?);
//! assert_eq!(target.to_string(), "ELIMINATION(MM);PERIPHERALS(0)");
//! ```

pub mod mfl;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use mfl::parse_features;

// ═══════════════════════════════════════════════════════════════════════════════
// Feature Categories
// ═══════════════════════════════════════════════════════════════════════════════

/// Category of a feature statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCategory {
    Absorption,
    Elimination,
    Transits,
    Peripherals,
    LagTime,
    Iiv,
    Iov,
    Covariance,
    Covariate,
    DirectEffect,
    EffectCompartment,
    IndirectEffect,
}

impl FeatureCategory {
    /// PK structural categories
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Absorption | Self::Elimination | Self::Transits | Self::Peripherals | Self::LagTime
        )
    }

    /// PD link categories (direct, indirect and effect-compartment)
    pub fn is_pd_link(&self) -> bool {
        matches!(
            self,
            Self::DirectEffect | Self::EffectCompartment | Self::IndirectEffect
        )
    }

    /// Random-effect categories
    pub fn is_variability(&self) -> bool {
        matches!(self, Self::Iiv | Self::Iov | Self::Covariance)
    }

    pub fn is_covariate(&self) -> bool {
        matches!(self, Self::Covariate)
    }

    /// Categories where at most one feature may be active per model
    pub fn is_exclusive(&self) -> bool {
        self.is_structural() || self.is_pd_link()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Feature Payloads
// ═══════════════════════════════════════════════════════════════════════════════

/// Absorption type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Absorption {
    /// Instantaneous (bolus into central)
    Instantaneous,
    FirstOrder,
    ZeroOrder,
    /// Sequential zero-order then first-order
    SeqZoFo,
}

/// Elimination type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Elimination {
    FirstOrder,
    ZeroOrder,
    MichaelisMenten,
    /// Mixed Michaelis-Menten and first-order
    MixedMmFo,
}

/// Functional form of a random effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EtaForm {
    #[serde(rename = "exp")]
    Exponential,
    #[serde(rename = "add")]
    Additive,
    #[serde(rename = "prop")]
    Proportional,
    #[serde(rename = "log")]
    Log,
    #[serde(rename = "re_log")]
    ReLog,
}

impl EtaForm {
    /// Expression name as accepted by `add_iiv`
    pub fn expression(&self) -> &'static str {
        match self {
            Self::Exponential => "exp",
            Self::Additive => "add",
            Self::Proportional => "prop",
            Self::Log => "log",
            Self::ReLog => "re_log",
        }
    }
}

/// Level of a random effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RandomEffectLevel {
    /// Inter-individual variability
    Iiv,
    /// Inter-occasion variability
    Iov,
}

/// PD link function
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdExpression {
    Linear,
    Emax,
    Sigmoid,
}

impl PdExpression {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Emax => "emax",
            Self::Sigmoid => "sigmoid",
        }
    }
}

/// Whether an indirect effect acts on production or degradation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Turnover {
    Production,
    Degradation,
}

/// Covariate effect function
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectFunction {
    /// Linear effect centred on the median
    Lin,
    /// Categorical effect, most common level as reference
    Cat,
    /// Categorical effect, other level as reference
    Cat2,
    /// Piecewise linear
    PieceLin,
    /// Exponential
    Exp,
    /// Power
    Pow,
}

impl EffectFunction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lin => "lin",
            Self::Cat => "cat",
            Self::Cat2 => "cat2",
            Self::PieceLin => "piece_lin",
            Self::Exp => "exp",
            Self::Pow => "pow",
        }
    }

    /// Categorical effects get one parameter per non-reference level
    pub fn is_categorical(&self) -> bool {
        matches!(self, Self::Cat | Self::Cat2)
    }
}

/// How a covariate effect is combined with the parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum EffectOperation {
    #[default]
    #[serde(rename = "*")]
    Multiplicative,
    #[serde(rename = "+")]
    Additive,
}

impl EffectOperation {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Multiplicative => "*",
            Self::Additive => "+",
        }
    }
}

/// A covariate effect of `covariate` on `parameter`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CovariateEffect {
    pub parameter: String,
    pub covariate: String,
    pub effect: EffectFunction,
    #[serde(default)]
    pub operation: EffectOperation,
}

impl CovariateEffect {
    pub fn new(
        parameter: impl Into<String>,
        covariate: impl Into<String>,
        effect: EffectFunction,
    ) -> Self {
        Self {
            parameter: parameter.into(),
            covariate: covariate.into(),
            effect,
            operation: EffectOperation::Multiplicative,
        }
    }

    pub fn with_operation(mut self, operation: EffectOperation) -> Self {
        self.operation = operation;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Feature
// ═══════════════════════════════════════════════════════════════════════════════

/// One declarative model design choice
///
/// Features are value-equal and totally ordered, so a [FeatureSet] has a
/// canonical iteration order regardless of how it was built.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Feature {
    Absorption(Absorption),
    Elimination(Elimination),
    Transits(u32),
    Peripherals(u32),
    LagTime(bool),
    Iiv {
        parameter: String,
        form: EtaForm,
    },
    Iov {
        parameter: String,
        form: EtaForm,
    },
    Covariance {
        level: RandomEffectLevel,
        parameters: BTreeSet<String>,
    },
    Covariate(CovariateEffect),
    DirectEffect(PdExpression),
    EffectCompartment(PdExpression),
    IndirectEffect {
        expression: PdExpression,
        turnover: Turnover,
    },
}

/// Exclusivity slot of a feature: two features in the same slot replace each other
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot {
    category: FeatureCategory,
    key: Option<String>,
}

impl Feature {
    pub fn category(&self) -> FeatureCategory {
        match self {
            Self::Absorption(_) => FeatureCategory::Absorption,
            Self::Elimination(_) => FeatureCategory::Elimination,
            Self::Transits(_) => FeatureCategory::Transits,
            Self::Peripherals(_) => FeatureCategory::Peripherals,
            Self::LagTime(_) => FeatureCategory::LagTime,
            Self::Iiv { .. } => FeatureCategory::Iiv,
            Self::Iov { .. } => FeatureCategory::Iov,
            Self::Covariance { .. } => FeatureCategory::Covariance,
            Self::Covariate(_) => FeatureCategory::Covariate,
            Self::DirectEffect(_) => FeatureCategory::DirectEffect,
            Self::EffectCompartment(_) => FeatureCategory::EffectCompartment,
            Self::IndirectEffect { .. } => FeatureCategory::IndirectEffect,
        }
    }

    /// The slot this feature occupies
    ///
    /// All PD link categories share one slot, random effects are keyed by
    /// parameter and covariate effects by parameter/covariate pair.
    pub fn slot(&self) -> Slot {
        let category = self.category();
        match self {
            Self::Iiv { parameter, .. } | Self::Iov { parameter, .. } => Slot {
                category,
                key: Some(parameter.clone()),
            },
            Self::Covariance { parameters, .. } => Slot {
                category,
                key: Some(parameters.iter().cloned().collect::<Vec<_>>().join(",")),
            },
            Self::Covariate(effect) => Slot {
                category,
                key: Some(format!("{}:{}", effect.parameter, effect.covariate)),
            },
            _ if category.is_pd_link() => Slot {
                category: FeatureCategory::DirectEffect,
                key: None,
            },
            _ => Slot {
                category,
                key: None,
            },
        }
    }

    /// Model parameters referenced by this feature
    pub fn parameters(&self) -> Vec<&str> {
        match self {
            Self::Iiv { parameter, .. } | Self::Iov { parameter, .. } => vec![parameter.as_str()],
            Self::Covariance { parameters, .. } => parameters.iter().map(|p| p.as_str()).collect(),
            Self::Covariate(effect) => vec![effect.parameter.as_str()],
            _ => Vec::new(),
        }
    }

    /// Whether every referenced parameter is in `present`
    pub fn references_only(&self, present: &BTreeSet<String>) -> bool {
        self.parameters().iter().all(|p| present.contains(*p))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FeatureSet
// ═══════════════════════════════════════════════════════════════════════════════

/// An immutable set of value-equal features
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet(BTreeSet<Feature>);

impl FeatureSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, feature: &Feature) -> bool {
        self.0.contains(feature)
    }

    /// Iterate in canonical order
    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.0.iter()
    }

    /// Features in either set
    pub fn union(&self, other: &FeatureSet) -> FeatureSet {
        Self(self.0.union(&other.0).cloned().collect())
    }

    /// Features in `self` that are not in `other`
    pub fn difference(&self, other: &FeatureSet) -> FeatureSet {
        Self(self.0.difference(&other.0).cloned().collect())
    }

    pub fn intersection(&self, other: &FeatureSet) -> FeatureSet {
        Self(self.0.intersection(&other.0).cloned().collect())
    }

    pub fn is_subset(&self, other: &FeatureSet) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Features matching `predicate`
    pub fn filter(&self, predicate: impl Fn(&Feature) -> bool) -> FeatureSet {
        Self(self.0.iter().filter(|f| predicate(f)).cloned().collect())
    }

    pub fn by_category(&self, category: FeatureCategory) -> FeatureSet {
        self.filter(|f| f.category() == category)
    }

    /// PK structural subset
    pub fn structural(&self) -> FeatureSet {
        self.filter(|f| f.category().is_structural())
    }

    pub fn pd_link(&self) -> FeatureSet {
        self.filter(|f| f.category().is_pd_link())
    }

    pub fn variability(&self) -> FeatureSet {
        self.filter(|f| f.category().is_variability())
    }

    pub fn covariates(&self) -> FeatureSet {
        self.filter(|f| f.category().is_covariate())
    }

    /// First feature of `category` in canonical order
    pub fn get(&self, category: FeatureCategory) -> Option<&Feature> {
        self.0.iter().find(|f| f.category() == category)
    }

    /// Split into features whose parameters are all in `present` and the rest
    pub fn partition_referenced(&self, present: &BTreeSet<String>) -> (FeatureSet, FeatureSet) {
        let (kept, stale): (BTreeSet<_>, BTreeSet<_>) = self
            .0
            .iter()
            .cloned()
            .partition(|f| f.references_only(present));
        (Self(kept), Self(stale))
    }

    /// `self − (features sharing a slot with new) + new`
    ///
    /// Later features in `new` win over earlier ones in the same slot.
    pub fn replace(&self, new: impl IntoIterator<Item = Feature>) -> FeatureSet {
        let mut incoming: Vec<Feature> = Vec::new();
        for feature in new {
            incoming.retain(|f| f.slot() != feature.slot());
            incoming.push(feature);
        }
        let slots: BTreeSet<Slot> = incoming.iter().map(|f| f.slot()).collect();
        let mut out: BTreeSet<Feature> = self
            .0
            .iter()
            .filter(|f| !slots.contains(&f.slot()))
            .cloned()
            .collect();
        out.extend(incoming);
        Self(out)
    }

    /// A copy with `feature` added
    pub fn with(&self, feature: Feature) -> FeatureSet {
        let mut out = self.0.clone();
        out.insert(feature);
        Self(out)
    }

    /// A copy without features matching `predicate`
    pub fn without(&self, predicate: impl Fn(&Feature) -> bool) -> FeatureSet {
        self.filter(|f| !predicate(f))
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<T: IntoIterator<Item = Feature>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for FeatureSet {
    type Item = Feature;
    type IntoIter = std::collections::btree_set::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a FeatureSet {
    type Item = &'a Feature;
    type IntoIter = std::collections::btree_set::Iter<'a, Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iiv(p: &str) -> Feature {
        Feature::Iiv {
            parameter: p.to_string(),
            form: EtaForm::Exponential,
        }
    }

    #[test]
    fn test_union_and_difference_are_order_independent() {
        let a: FeatureSet = [Feature::Elimination(Elimination::FirstOrder), iiv("CL")]
            .into_iter()
            .collect();
        let b: FeatureSet = [iiv("CL"), Feature::Peripherals(1)].into_iter().collect();

        assert_eq!(a.union(&b), b.union(&a));
        assert_eq!(a.union(&b).len(), 3);
        assert_eq!(
            a.difference(&b),
            [Feature::Elimination(Elimination::FirstOrder)]
                .into_iter()
                .collect()
        );
    }

    #[test]
    fn test_duplicates_collapse() {
        let set: FeatureSet = [iiv("CL"), iiv("CL"), iiv("CL")].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_replace_same_slot() {
        let set: FeatureSet = [
            Feature::Elimination(Elimination::FirstOrder),
            Feature::Peripherals(0),
            iiv("CL"),
        ]
        .into_iter()
        .collect();

        let replaced = set.replace([
            Feature::Elimination(Elimination::MichaelisMenten),
            Feature::Iiv {
                parameter: "CL".into(),
                form: EtaForm::Additive,
            },
        ]);

        assert!(replaced.contains(&Feature::Elimination(Elimination::MichaelisMenten)));
        assert!(!replaced.contains(&Feature::Elimination(Elimination::FirstOrder)));
        assert!(replaced.contains(&Feature::Peripherals(0)));
        assert_eq!(replaced.by_category(FeatureCategory::Iiv).len(), 1);
    }

    #[test]
    fn test_pd_link_features_share_a_slot() {
        let set: FeatureSet = [Feature::DirectEffect(PdExpression::Emax)]
            .into_iter()
            .collect();
        let replaced = set.replace([Feature::EffectCompartment(PdExpression::Linear)]);
        assert_eq!(replaced.pd_link().len(), 1);
        assert!(replaced.contains(&Feature::EffectCompartment(PdExpression::Linear)));
    }

    #[test]
    fn test_partition_referenced() {
        let set: FeatureSet = [iiv("CL"), iiv("MAT"), Feature::Transits(0)]
            .into_iter()
            .collect();
        let present: BTreeSet<String> = ["CL".to_string(), "VC".to_string()].into();

        let (kept, stale) = set.partition_referenced(&present);
        assert!(kept.contains(&iiv("CL")));
        assert!(kept.contains(&Feature::Transits(0)));
        assert_eq!(stale, [iiv("MAT")].into_iter().collect());
    }

    #[test]
    fn test_category_partitions_are_disjoint() {
        let set: FeatureSet = [
            Feature::Absorption(Absorption::FirstOrder),
            Feature::DirectEffect(PdExpression::Linear),
            iiv("CL"),
            Feature::Covariate(CovariateEffect::new("CL", "WGT", EffectFunction::Exp)),
        ]
        .into_iter()
        .collect();

        let parts = [
            set.structural(),
            set.pd_link(),
            set.variability(),
            set.covariates(),
        ];
        assert_eq!(parts.iter().map(|p| p.len()).sum::<usize>(), set.len());
    }
}
