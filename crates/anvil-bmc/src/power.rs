use crate::error::BmcError;

/// Normalized power state. The task controller polls [`BmcClient::get_power_state`]
/// and compares against this rather than the vendor's raw string (spec.md §4.E.2, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
}

/// Tolerates vendor variation in raw power-state strings: case-insensitive,
/// plus the handful of synonyms real BMCs return (spec.md §9
/// "`convertRawBMCPowerState` helper that tolerates vendor variation").
pub fn convert_raw_bmc_power_state(raw: &str) -> Result<PowerState, BmcError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on" | "poweron" | "power on" | "host_on" => Ok(PowerState::On),
        "off" | "poweroff" | "power off" | "host_off" => Ok(PowerState::Off),
        other => Err(BmcError::UnknownPowerState(other.to_string())),
    }
}
