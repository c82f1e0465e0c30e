//! Application layer of the debug tool firmware.
//!
//! The library crate holds the protocol, the action executor and the CSPI session logic; these
//! tasks wire it to the board:
//! - [`host_link`] moves bytes between USB CDC ACM and the dispatcher
//! - [`dispatcher`] runs the main loop

/// Main loop task
pub mod dispatcher;
/// USB to byte transport bridge
pub mod host_link;
