//! Resource quantity parsing
//!
//! Converts Kubernetes-style quantity strings into canonical values:
//! CPU in whole cores and memory in gigabytes (10^9 bytes).

use crate::error::ParseError;
use serde::Serialize;
use std::fmt;
use tracing::warn;

/// Bytes per gigabyte, the canonical memory unit
const BYTES_PER_GB: f64 = 1e9;

/// CPU suffixes and the divisor that converts them to whole cores
const CPU_UNITS: &[(&str, f64)] = &[("m", 1000.0), ("", 1.0)];

/// Memory suffixes and the number of bytes each one stands for
const MEMORY_UNITS: &[(&str, f64)] = &[
    ("Ei", 1_152_921_504_606_846_976.0),
    ("Pi", 1_125_899_906_842_624.0),
    ("Ti", 1_099_511_627_776.0),
    ("Gi", 1_073_741_824.0),
    ("Mi", 1_048_576.0),
    ("Ki", 1_024.0),
    ("E", 1e18),
    ("P", 1e15),
    ("T", 1e12),
    ("G", 1e9),
    ("M", 1e6),
    ("k", 1e3),
    ("m", 1e-3),
    ("", 1.0),
];

/// Which canonical unit a quantity is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    /// Whole CPU cores
    Cpu,
    /// Gigabytes
    Memory,
}

impl Dimension {
    fn as_str(&self) -> &'static str {
        match self {
            Dimension::Cpu => "cpu",
            Dimension::Memory => "memory",
        }
    }
}

/// A parsed resource quantity in canonical units
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceQuantity {
    value: f64,
    dimension: Dimension,
    unit: &'static str,
}

impl ResourceQuantity {
    /// Quantity in whole CPU cores
    pub fn cores(value: f64) -> Self {
        Self {
            value,
            dimension: Dimension::Cpu,
            unit: "",
        }
    }

    /// Quantity in gigabytes
    pub fn gigabytes(value: f64) -> Self {
        Self {
            value,
            dimension: Dimension::Memory,
            unit: "G",
        }
    }

    /// Canonical value (cores or gigabytes)
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// Suffix the quantity was parsed from
    pub fn unit(&self) -> &'static str {
        self.unit
    }

    /// True when the source string carried no unit suffix
    pub fn is_bare(&self) -> bool {
        self.unit.is_empty()
    }
}

impl std::ops::Add for ResourceQuantity {
    type Output = ResourceQuantity;

    /// Sum two quantities of the same dimension, keeping the left unit tag
    fn add(self, other: ResourceQuantity) -> ResourceQuantity {
        debug_assert_eq!(self.dimension, other.dimension);
        Self {
            value: self.value + other.value,
            ..self
        }
    }
}

impl fmt::Display for ResourceQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dimension {
            Dimension::Cpu => write!(f, "{:.3}", self.value),
            Dimension::Memory => write!(f, "{:.3}GB", self.value),
        }
    }
}

/// What to do when a CPU quantity has no unit suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BareCpuPolicy {
    /// Emit a warning and assume whole cores
    #[default]
    Warn,
    /// Assume whole cores silently
    Allow,
}

/// Parse a CPU quantity such as `"500m"` or `"2"` into whole cores
pub fn parse_cpu(input: &str) -> Result<ResourceQuantity, ParseError> {
    parse_cpu_with(input, BareCpuPolicy::Allow)
}

/// Parse a CPU quantity, applying `policy` to suffix-less values
pub fn parse_cpu_with(input: &str, policy: BareCpuPolicy) -> Result<ResourceQuantity, ParseError> {
    let (number, unit) = split_quantity(input)?;

    let (unit, divisor) = lookup(CPU_UNITS, &unit)
        .ok_or_else(|| unsupported(Dimension::Cpu, &unit, input, CPU_UNITS))?;

    if unit.is_empty() && policy == BareCpuPolicy::Warn {
        warn!(quantity = %input, "No CPU unit detected, assuming whole CPU");
    }

    Ok(ResourceQuantity {
        value: number / divisor,
        dimension: Dimension::Cpu,
        unit,
    })
}

/// Parse a memory quantity such as `"1Gi"` or `"512M"` into gigabytes.
///
/// A value without suffix is taken as bytes.
pub fn parse_memory(input: &str) -> Result<ResourceQuantity, ParseError> {
    let (number, unit) = split_quantity(input)?;

    let (unit, bytes) = lookup(MEMORY_UNITS, &unit)
        .ok_or_else(|| unsupported(Dimension::Memory, &unit, input, MEMORY_UNITS))?;

    Ok(ResourceQuantity {
        value: number * bytes / BYTES_PER_GB,
        dimension: Dimension::Memory,
        unit,
    })
}

/// Split a quantity into its numeric literal and unit suffix.
///
/// The literal is the leading run of digits, with at most one decimal point.
fn split_quantity(input: &str) -> Result<(f64, String), ParseError> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut seen_dot = false;
    let split_at = compact
        .char_indices()
        .find(|&(_, c)| {
            if c.is_ascii_digit() {
                false
            } else if c == '.' && !seen_dot {
                seen_dot = true;
                false
            } else {
                true
            }
        })
        .map(|(i, _)| i)
        .unwrap_or(compact.len());

    let (literal, unit) = compact.split_at(split_at);
    if !literal.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(ParseError::MalformedNumber {
            input: input.to_string(),
        });
    }

    let number = literal.parse::<f64>().map_err(|_| ParseError::MalformedNumber {
        input: input.to_string(),
    })?;

    Ok((number, unit.to_string()))
}

fn lookup(table: &'static [(&'static str, f64)], unit: &str) -> Option<(&'static str, f64)> {
    table.iter().copied().find(|(suffix, _)| *suffix == unit)
}

fn unsupported(
    dimension: Dimension,
    unit: &str,
    input: &str,
    table: &[(&str, f64)],
) -> ParseError {
    let supported = table
        .iter()
        .map(|(suffix, _)| if suffix.is_empty() { "<none>" } else { *suffix })
        .collect::<Vec<_>>()
        .join(", ");

    ParseError::UnsupportedUnit {
        dimension: dimension.as_str(),
        unit: unit.to_string(),
        input: input.to_string(),
        supported,
    }
}
