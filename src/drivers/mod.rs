//! Board drivers behind the debug tool's hardware seams.

/// User flash sector holding the stored frame
pub mod flash;
/// Runtime-addressed GPIO for action graphs and the CSPI alert
pub mod pins;
