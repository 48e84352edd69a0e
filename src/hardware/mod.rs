//! Controller communication.
//!
//! The FINS protocol stack, the fail-soft connector facade used by the
//! trigger monitor, and a simulated controller for tests and offline runs.

pub mod fins;
pub mod mock;
pub mod plc_connector;

pub use mock::MockPlc;
pub use plc_connector::PlcConnector;
