//! Parameter space and its expansion into combinations.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SearchPlan;
use crate::domain::optimization::errors::ValidationError;

/// One fully-specified set of parameter values, keyed by parameter name.
pub type Combination = BTreeMap<String, Value>;

/// Parameter name to ordered candidate values.
///
/// Keys are kept sorted, which fixes the enumeration order: the last key cycles
/// fastest. Null candidates are ignored during expansion.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSpace {
    parameters: BTreeMap<String, Vec<Value>>,
}

/// One validated dimension of the space.
struct Axis<'a> {
    name: &'a str,
    values: Vec<&'a Value>,
}

impl ParameterSpace {
    /// Wrap an existing parameter map.
    #[must_use]
    pub const fn new(parameters: BTreeMap<String, Vec<Value>>) -> Self {
        Self { parameters }
    }

    /// Start building a space parameter by parameter.
    #[must_use]
    pub fn builder() -> ParameterSpaceBuilder {
        ParameterSpaceBuilder::default()
    }

    /// Number of declared parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Returns true if no parameter is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Declared candidates for one parameter, nulls included.
    #[must_use]
    pub fn candidates(&self, name: &str) -> Option<&[Value]> {
        self.parameters.get(name).map(Vec::as_slice)
    }

    /// Borrow the underlying map.
    #[must_use]
    pub const fn as_map(&self) -> &BTreeMap<String, Vec<Value>> {
        &self.parameters
    }

    /// Size of the full cartesian product.
    pub fn population_size(&self) -> Result<usize, ValidationError> {
        let axes = self.axes()?;
        Self::population(&axes)
    }

    /// Expand the space according to a search plan.
    ///
    /// `GRID` ignores `sample_count` and `seed`. `RANDOM` draws
    /// `min(sample_count, population)` distinct combinations with a generator
    /// seeded from `seed` (or the OS when absent) and returns them in grid
    /// order. Without a `sample_count` the whole grid is returned.
    pub fn expand(
        &self,
        plan: SearchPlan,
        sample_count: Option<usize>,
        seed: Option<u64>,
    ) -> Result<Vec<Combination>, ValidationError> {
        match plan {
            SearchPlan::Grid => self.grid(),
            SearchPlan::Random => {
                if sample_count == Some(0) {
                    return Err(ValidationError::ZeroSampleCount);
                }
                let axes = self.axes()?;
                let population = Self::population(&axes)?;

                match sample_count {
                    Some(count) if count < population => {
                        let mut rng = seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
                        let mut picked = rand::seq::index::sample(&mut rng, population, count)
                            .into_vec();
                        picked.sort_unstable();
                        Ok(picked
                            .into_iter()
                            .map(|index| Self::combination_at(&axes, index))
                            .collect())
                    }
                    _ => Ok(Self::enumerate(&axes, population)),
                }
            }
        }
    }

    /// Every combination in odometer order.
    pub fn grid(&self) -> Result<Vec<Combination>, ValidationError> {
        let axes = self.axes()?;
        let population = Self::population(&axes)?;
        Ok(Self::enumerate(&axes, population))
    }

    fn axes(&self) -> Result<Vec<Axis<'_>>, ValidationError> {
        if self.parameters.is_empty() {
            return Err(ValidationError::EmptySpace);
        }

        self.parameters
            .iter()
            .map(|(name, candidates)| {
                let values: Vec<&Value> = candidates.iter().filter(|v| !v.is_null()).collect();
                if values.is_empty() {
                    return Err(ValidationError::EmptyParameter { name: name.clone() });
                }
                Ok(Axis { name, values })
            })
            .collect()
    }

    fn population(axes: &[Axis<'_>]) -> Result<usize, ValidationError> {
        axes.iter()
            .try_fold(1_usize, |acc, axis| acc.checked_mul(axis.values.len()))
            .ok_or(ValidationError::SpaceTooLarge)
    }

    fn enumerate(axes: &[Axis<'_>], population: usize) -> Vec<Combination> {
        (0..population)
            .map(|index| Self::combination_at(axes, index))
            .collect()
    }

    /// Decode a grid index as a mixed-radix number, last axis least significant.
    fn combination_at(axes: &[Axis<'_>], mut index: usize) -> Combination {
        let mut combination = Combination::new();
        for axis in axes.iter().rev() {
            let radix = axis.values.len();
            combination.insert(axis.name.to_string(), axis.values[index % radix].clone());
            index /= radix;
        }
        combination
    }
}

impl From<BTreeMap<String, Vec<Value>>> for ParameterSpace {
    fn from(parameters: BTreeMap<String, Vec<Value>>) -> Self {
        Self::new(parameters)
    }
}

/// Builder for parameter spaces.
#[derive(Debug, Default)]
pub struct ParameterSpaceBuilder {
    parameters: BTreeMap<String, Vec<Value>>,
}

impl ParameterSpaceBuilder {
    /// Declare a parameter with its candidate values.
    #[must_use]
    pub fn param<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.parameters
            .insert(name.to_string(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Build the space.
    #[must_use]
    pub fn build(self) -> ParameterSpace {
        ParameterSpace::new(self.parameters)
    }
}
