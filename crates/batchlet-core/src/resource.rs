//! Multi-dimensional resource vectors

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{BatchletError, BatchletResult};

/// Tolerance for comparing resource quantities.
const EPSILON: f64 = 0.01;

/// Well-known dimension name for CPU, in millicores.
pub const DIMENSION_CPU: &str = "cpu";
/// Well-known dimension name for memory, in bytes.
pub const DIMENSION_MEMORY: &str = "memory";

/// A vector of named resource quantities.
///
/// CPU is tracked in millicores and memory in bytes; every other dimension
/// (GPUs, other extended device resources) lives in `scalars`. A dimension
/// absent from one operand is treated as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// CPU in millicores
    pub milli_cpu: f64,
    /// Memory in bytes
    pub memory: f64,
    /// Extended scalar resources indexed by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scalars: BTreeMap<String, f64>,
}

impl Resource {
    /// Create a resource with all dimensions zero
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a resource with the given CPU and memory quantities
    pub fn new(milli_cpu: f64, memory: f64) -> Self {
        Self {
            milli_cpu,
            memory,
            scalars: BTreeMap::new(),
        }
    }

    /// Add an extended dimension, returning the updated resource
    pub fn with_scalar(mut self, name: &str, quantity: f64) -> Self {
        self.scalars.insert(name.to_string(), quantity);
        self
    }

    /// Quantity of a dimension by name; unknown dimensions are zero
    pub fn quantity(&self, dimension: &str) -> f64 {
        match dimension {
            DIMENSION_CPU => self.milli_cpu,
            DIMENSION_MEMORY => self.memory,
            other => self.scalars.get(other).copied().unwrap_or(0.0),
        }
    }

    /// All dimensions present in this resource as `(name, quantity)` pairs
    pub fn entries(&self) -> Vec<(String, f64)> {
        let mut entries = vec![
            (DIMENSION_CPU.to_string(), self.milli_cpu),
            (DIMENSION_MEMORY.to_string(), self.memory),
        ];
        for (name, quantity) in &self.scalars {
            entries.push((name.clone(), *quantity));
        }
        entries
    }

    /// True when every dimension is approximately zero
    pub fn is_empty(&self) -> bool {
        self.milli_cpu < EPSILON
            && self.memory < EPSILON
            && self.scalars.values().all(|q| *q < EPSILON)
    }

    /// Component-wise addition
    pub fn add(&mut self, other: &Resource) -> &mut Self {
        self.milli_cpu += other.milli_cpu;
        self.memory += other.memory;
        for (name, quantity) in &other.scalars {
            *self.scalars.entry(name.clone()).or_insert(0.0) += quantity;
        }
        self
    }

    /// Component-wise subtraction.
    ///
    /// A component may never go negative: subtracting a larger value clamps
    /// the component to zero and reports the underflow to the caller as a
    /// policy error. The clamped result is kept either way.
    pub fn sub(&mut self, other: &Resource) -> BatchletResult<&mut Self> {
        let lhs = self.to_string();
        let mut underflow = false;

        if self.milli_cpu + EPSILON < other.milli_cpu {
            underflow = true;
        }
        self.milli_cpu = (self.milli_cpu - other.milli_cpu).max(0.0);

        if self.memory + EPSILON < other.memory {
            underflow = true;
        }
        self.memory = (self.memory - other.memory).max(0.0);

        for (name, quantity) in &other.scalars {
            let entry = self.scalars.entry(name.clone()).or_insert(0.0);
            if *entry + EPSILON < *quantity {
                underflow = true;
            }
            *entry = (*entry - quantity).max(0.0);
        }

        if underflow {
            return Err(BatchletError::ResourceUnderflow {
                lhs,
                rhs: other.to_string(),
            });
        }
        Ok(self)
    }

    /// Pointwise comparison: true iff every dimension of `self` is less
    /// than or equal to the same dimension of `other`
    pub fn less_equal(&self, other: &Resource) -> bool {
        if self.milli_cpu > other.milli_cpu + EPSILON {
            return false;
        }
        if self.memory > other.memory + EPSILON {
            return false;
        }
        self.scalars
            .iter()
            .all(|(name, quantity)| *quantity <= other.quantity(name) + EPSILON)
    }

    /// Multiply every dimension by `factor`
    pub fn scale(&self, factor: f64) -> Resource {
        let mut scaled = self.clone();
        scaled.milli_cpu *= factor;
        scaled.memory *= factor;
        for quantity in scaled.scalars.values_mut() {
            *quantity *= factor;
        }
        scaled
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu {:.0}m, memory {:.0}", self.milli_cpu, self.memory)?;
        for (name, quantity) in &self.scalars {
            write!(f, ", {} {:.0}", name, quantity)?;
        }
        Ok(())
    }
}
