use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::BuilderError;

/// A population parameter with its initial estimate, bounds and fixedness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub init: f64,
    #[serde(with = "lower_bound", default = "lower_bound::unbounded")]
    pub lower: f64,
    #[serde(with = "upper_bound", default = "upper_bound::unbounded")]
    pub upper: f64,
    #[serde(default)]
    pub fix: bool,
}

// JSON has no infinities, so open bounds are written as `null`
macro_rules! bound_serde {
    ($module:ident, $open:expr) => {
        pub(crate) mod $module {
            use serde::{Deserialize, Deserializer, Serializer};

            pub fn unbounded() -> f64 {
                $open
            }

            pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
                if value.is_finite() {
                    serializer.serialize_some(value)
                } else {
                    serializer.serialize_none()
                }
            }

            pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
                Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or($open))
            }
        }
    };
}

bound_serde!(lower_bound, f64::NEG_INFINITY);
bound_serde!(upper_bound, f64::INFINITY);

impl Parameter {
    /// Unbounded, estimated parameter
    pub fn new(name: impl Into<String>, init: f64) -> Self {
        Self {
            name: name.into(),
            init,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
            fix: false,
        }
    }

    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    pub fn fixed(mut self, fix: bool) -> Self {
        self.fix = fix;
        self
    }

    /// Check that `lower <= init <= upper`
    pub fn validate(&self) -> Result<(), BuilderError> {
        if self.init.is_nan() || self.lower > self.init || self.init > self.upper {
            return Err(BuilderError::InvalidBounds {
                name: self.name.clone(),
                init: self.init,
                lower: self.lower,
                upper: self.upper,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<14} {:>12.6} {:>12} {:>12}{}",
            self.name,
            self.init,
            self.lower,
            self.upper,
            if self.fix { "  FIX" } else { "" }
        )
    }
}

/// Ordered collection of uniquely named parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Parameters(Vec<Parameter>);

impl Parameters {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.0.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.0.iter().find(|p| p.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.0.iter_mut().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert, or replace the parameter with the same name in place
    pub fn upsert(&mut self, parameter: Parameter) {
        match self.get_mut(&parameter.name) {
            Some(existing) => *existing = parameter,
            None => self.0.push(parameter),
        }
    }

    /// Insert unless a parameter with the same name exists
    pub fn insert_if_absent(&mut self, parameter: Parameter) {
        if !self.contains(&parameter.name) {
            self.0.push(parameter);
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Parameter> {
        let idx = self.0.iter().position(|p| p.name == name)?;
        Some(self.0.remove(idx))
    }

    pub fn retain(&mut self, keep: impl Fn(&Parameter) -> bool) {
        self.0.retain(|p| keep(p));
    }
}

impl FromIterator<Parameter> for Parameters {
    fn from_iter<T: IntoIterator<Item = Parameter>>(iter: T) -> Self {
        let mut out = Parameters::new();
        for p in iter {
            out.upsert(p);
        }
        out
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<14} {:>12} {:>12} {:>12}",
            "name", "value", "lower", "upper"
        )?;
        for p in &self.0 {
            writeln!(f, "{p}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_keeps_position() {
        let mut params: Parameters = [Parameter::new("POP_CL", 0.01), Parameter::new("POP_VC", 1.0)]
            .into_iter()
            .collect();
        params.upsert(Parameter::new("POP_CL", 5.0));
        assert_eq!(params.names(), vec!["POP_CL", "POP_VC"]);
        assert_eq!(params.get("POP_CL").unwrap().init, 5.0);
    }

    #[test]
    fn test_validate_bounds() {
        assert!(Parameter::new("A", 1.0).with_bounds(0.0, 2.0).validate().is_ok());
        assert!(Parameter::new("A", 3.0).with_bounds(0.0, 2.0).validate().is_err());
        assert!(Parameter::new("A", f64::NAN).validate().is_err());
    }

    #[test]
    fn test_open_bounds_survive_json() {
        let p = Parameter::new("POP_CL", 0.01).with_bounds(0.0, f64::INFINITY);
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"upper\":null"));
        let back: Parameter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
