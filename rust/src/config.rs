//! Configuration types for the scheduler.

use rustc_hash::FxHashMap;

use crate::error::{SchedResult, SchedulerError};
use crate::hw::RING_PAGE_WORDS;
use crate::models::PcieBifurcation;

pub const PROP_MODE: &str = "api.scheduler.mode";
pub const PROP_OVERSPEED: &str = "api.scheduler.overspeed";
pub const PROP_LENGTH: &str = "api.scheduler.length";
pub const PROP_ALLOW_UPDATE_VIOLATION: &str = "api.scheduler.allowUpdateViolation";
pub const PROP_VERBOSITY: &str = "api.scheduler.verbosity";
pub const PROP_PCIE_BIFURCATION: &str = "api.scheduler.pcieBifurcation";

/// Platform configuration lookup. Missing properties yield the default.
pub trait PropertySource {
    fn bool_prop(&self, name: &str, default: bool) -> bool;
    fn int_prop(&self, name: &str, default: i64) -> i64;
    fn text_prop(&self, name: &str, default: &str) -> String;
}

/// Property source backed by a string map.
#[derive(Clone, Debug, Default)]
pub struct MapProperties {
    values: FxHashMap<String, String>,
}

impl MapProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.values.insert(name.to_string(), value.to_string());
        self
    }
}

impl PropertySource for MapProperties {
    fn bool_prop(&self, name: &str, default: bool) -> bool {
        match self.values.get(name).map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "true" || v == "1" => true,
            Some(v) if v == "false" || v == "0" => false,
            _ => default,
        }
    }

    fn int_prop(&self, name: &str, default: i64) -> i64 {
        self.values
            .get(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn text_prop(&self, name: &str, default: &str) -> String {
        self.values
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}

/// Whether port speeds may change after initialization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchedulerMode {
    /// Slots are owned by the configured ports from the start.
    #[default]
    Static,
    /// Ethernet lanes start free and are claimed on link negotiation.
    Dynamic,
}

impl SchedulerMode {
    pub fn parse(s: &str) -> SchedResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(SchedulerMode::Static),
            "dynamic" => Ok(SchedulerMode::Dynamic),
            other => Err(SchedulerError::InvalidArgument(format!(
                "unknown scheduler mode {:?}",
                other
            ))),
        }
    }
}

/// Configuration for schedule generation and updates.
#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerConfig {
    pub mode: SchedulerMode,
    /// Extra bits per second tolerated per 10G of bandwidth.
    pub oversubscription_margin_bps: f64,
    /// Explicit ring length; derived from the clock when `None`.
    pub schedule_length: Option<usize>,
    /// Downgrade update-time schedule violations to warnings.
    pub allow_update_violation: bool,
    /// Verbosity level: 0=silent, 1=changes, 2=checks, 3=debug.
    pub verbosity: u8,
    /// Bifurcation of each PCIe endpoint pair, indexed by `pep / 2`.
    pub pcie_bifurcation: Vec<PcieBifurcation>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: SchedulerMode::Static,
            oversubscription_margin_bps: 0.0,
            schedule_length: None,
            allow_update_violation: false,
            verbosity: 0,
            pcie_bifurcation: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Read the configuration from platform properties.
    pub fn from_properties(props: &dyn PropertySource) -> SchedResult<Self> {
        let defaults = Self::default();

        let mode = SchedulerMode::parse(&props.text_prop(PROP_MODE, "static"))?;

        let margin = props.int_prop(PROP_OVERSPEED, 0);
        if margin < 0 {
            return Err(SchedulerError::InvalidArgument(format!(
                "{} must not be negative, got {}",
                PROP_OVERSPEED, margin
            )));
        }

        let length = props.int_prop(PROP_LENGTH, 0);
        let schedule_length = match length {
            0 => None,
            n if n > RING_PAGE_WORDS as i64 => {
                return Err(SchedulerError::InvalidArgument(format!(
                    "{} must be at most {}, got {}",
                    PROP_LENGTH, RING_PAGE_WORDS, n
                )))
            }
            n if n > 0 => Some(n as usize),
            n => {
                return Err(SchedulerError::InvalidArgument(format!(
                    "{} must not be negative, got {}",
                    PROP_LENGTH, n
                )))
            }
        };

        let pcie_bifurcation = props
            .text_prop(PROP_PCIE_BIFURCATION, "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_bifurcation)
            .collect::<SchedResult<Vec<_>>>()?;

        Ok(Self {
            mode,
            oversubscription_margin_bps: margin as f64,
            schedule_length,
            allow_update_violation: props
                .bool_prop(PROP_ALLOW_UPDATE_VIOLATION, defaults.allow_update_violation),
            verbosity: props
                .int_prop(PROP_VERBOSITY, defaults.verbosity as i64)
                .clamp(0, 3) as u8,
            pcie_bifurcation,
        })
    }

    /// Bifurcation mode of the pair containing `pep`.
    pub fn bifurcation_for(&self, pep: u8) -> PcieBifurcation {
        self.pcie_bifurcation
            .get(pep as usize / 2)
            .copied()
            .unwrap_or_default()
    }
}

fn parse_bifurcation(s: &str) -> SchedResult<PcieBifurcation> {
    match s.to_ascii_lowercase().as_str() {
        "x4x2" | "2x4" => Ok(PcieBifurcation::TwoByFour),
        "x8" | "1x8" => Ok(PcieBifurcation::OneByEight),
        other => Err(SchedulerError::InvalidArgument(format!(
            "unknown PCIe bifurcation {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_properties() {
        let config = SchedulerConfig::from_properties(&MapProperties::new()).unwrap();
        assert_eq!(config, SchedulerConfig::default());
    }

    #[test]
    fn test_reads_all_properties() {
        let props = MapProperties::new()
            .with(PROP_MODE, "Dynamic")
            .with(PROP_OVERSPEED, "500000000")
            .with(PROP_LENGTH, "400")
            .with(PROP_ALLOW_UPDATE_VIOLATION, "true")
            .with(PROP_VERBOSITY, "9")
            .with(PROP_PCIE_BIFURCATION, "x8, x4x2");
        let config = SchedulerConfig::from_properties(&props).unwrap();

        assert_eq!(config.mode, SchedulerMode::Dynamic);
        assert!((config.oversubscription_margin_bps - 5e8).abs() < 1e-3);
        assert_eq!(config.schedule_length, Some(400));
        assert!(config.allow_update_violation);
        assert_eq!(config.verbosity, 3);
        assert_eq!(config.bifurcation_for(0), PcieBifurcation::OneByEight);
        assert_eq!(config.bifurcation_for(1), PcieBifurcation::OneByEight);
        assert_eq!(config.bifurcation_for(3), PcieBifurcation::TwoByFour);
        assert_eq!(config.bifurcation_for(8), PcieBifurcation::TwoByFour);
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad_mode = MapProperties::new().with(PROP_MODE, "adaptive");
        assert!(matches!(
            SchedulerConfig::from_properties(&bad_mode),
            Err(SchedulerError::InvalidArgument(_))
        ));

        let bad_len = MapProperties::new().with(PROP_LENGTH, "-4");
        assert!(SchedulerConfig::from_properties(&bad_len).is_err());

        // Each ring page holds 4096 words.
        let too_long = MapProperties::new().with(PROP_LENGTH, "5000");
        assert!(matches!(
            SchedulerConfig::from_properties(&too_long),
            Err(SchedulerError::InvalidArgument(_))
        ));
        let page = MapProperties::new().with(PROP_LENGTH, "4096");
        assert_eq!(
            SchedulerConfig::from_properties(&page).unwrap().schedule_length,
            Some(4096)
        );

        let bad_pcie = MapProperties::new().with(PROP_PCIE_BIFURCATION, "x16");
        assert!(SchedulerConfig::from_properties(&bad_pcie).is_err());
    }
}
