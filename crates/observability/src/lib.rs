//! Process-wide tracing setup shared by every binary.

pub mod tracing;

pub use crate::tracing::LogFormat;

/// Initialize tracing with JSON output.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}

/// Initialize tracing with the given output format.
pub fn init_with(format: LogFormat) {
    tracing::init(format);
}
