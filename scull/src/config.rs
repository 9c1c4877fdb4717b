//! Process-wide defaults
//!
//! The defaults are an explicit value handed to the registry at
//! construction time. `trim` and `reset_config` restore a device to them.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Result, ScullError};

pub const DEFAULT_QUANTUM: usize = 4000;
pub const DEFAULT_QSET: usize = 1000;
pub const DEFAULT_NR_DEVS: usize = 4;

/// Block size and set width of a quantum store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Bytes per block
    pub quantum: usize,
    /// Block slots per set
    pub qset: usize,
}

impl Geometry {
    /// # Errors
    ///
    /// Returns `InvalidArgument` if either field is zero.
    pub fn new(quantum: usize, qset: usize) -> Result<Self> {
        let geometry = Self { quantum, qset };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Bytes covered by one set
    #[must_use]
    pub fn itemsize(&self) -> usize {
        self.quantum.saturating_mul(self.qset)
    }

    #[must_use]
    pub fn get(&self, field: ConfigField) -> usize {
        match field {
            ConfigField::Quantum => self.quantum,
            ConfigField::Qset => self.qset,
        }
    }

    /// Copy with one field replaced
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `value` is zero.
    pub fn with(self, field: ConfigField, value: usize) -> Result<Self> {
        let geometry = match field {
            ConfigField::Quantum => Self { quantum: value, ..self },
            ConfigField::Qset => Self { qset: value, ..self },
        };
        geometry.validate()?;
        Ok(geometry)
    }

    fn validate(&self) -> Result<()> {
        if self.quantum == 0 {
            return Err(ScullError::InvalidArgument("quantum must be positive".into()));
        }
        if self.qset == 0 {
            return Err(ScullError::InvalidArgument("qset must be positive".into()));
        }
        Ok(())
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            quantum: DEFAULT_QUANTUM,
            qset: DEFAULT_QSET,
        }
    }
}

/// A device parameter that sessions can query and change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    Quantum,
    Qset,
}

impl FromStr for ConfigField {
    type Err = ScullError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "quantum" => Ok(Self::Quantum),
            "qset" => Ok(Self::Qset),
            other => Err(ScullError::InvalidArgument(format!(
                "unknown config field '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quantum => f.write_str("quantum"),
            Self::Qset => f.write_str("qset"),
        }
    }
}

/// Registry configuration
///
/// Every field is optional in the JSON form:
///
/// ```
/// use scull::ScullConfig;
///
/// let config = ScullConfig::from_reader(r#"{"quantum": 16, "nr_devs": 2}"#.as_bytes()).unwrap();
/// assert_eq!(config.geometry().quantum, 16);
/// assert_eq!(config.geometry().qset, 1000);
/// assert_eq!(config.nr_devs, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScullConfig {
    pub quantum: usize,
    pub qset: usize,
    /// Number of plain devices, named `scull0` and up
    pub nr_devs: usize,
    /// Upper bound on the footprint of all devices, in arena accounting units
    pub memory_limit: Option<usize>,
}

impl Default for ScullConfig {
    fn default() -> Self {
        Self {
            quantum: DEFAULT_QUANTUM,
            qset: DEFAULT_QSET,
            nr_devs: DEFAULT_NR_DEVS,
            memory_limit: None,
        }
    }
}

impl ScullConfig {
    /// Read a JSON configuration
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the JSON is malformed, names an unknown
    /// field, or sets `quantum`/`qset` to zero.
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self> {
        let config: Self = serde_json::from_reader(reader)
            .map_err(|e| ScullError::InvalidArgument(format!("bad config: {e}")))?;
        config.geometry().validate()?;
        Ok(config)
    }

    /// Default sizing for fresh and trimmed devices
    #[must_use]
    pub fn geometry(&self) -> Geometry {
        Geometry {
            quantum: self.quantum,
            qset: self.qset,
        }
    }
}
