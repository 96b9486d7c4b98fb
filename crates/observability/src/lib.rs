//! Process-wide tracing setup shared by the binaries.

pub mod tracing;

/// Install the global subscriber.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    tracing::init();
}
