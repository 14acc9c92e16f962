use thiserror::Error;

/// Error surface for BMC connections and commands (spec.md §4.E.2, §7).
///
/// A connect failure and a dispatch failure are both terminal for the
/// BMCTask that hit them; the distinction exists only so the task
/// controller can log a more useful message.
#[derive(Debug, Error)]
pub enum BmcError {
    #[error("failed to connect to BMC at {host}:{port}: {source}")]
    Connect { host: String, port: u16, source: String },

    #[error("BMC command failed: {0}")]
    Command(String),

    #[error("unrecognized BMC power state: {0:?}")]
    UnknownPowerState(String),
}
