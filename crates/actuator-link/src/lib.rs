//! Command link to the actuator microcontroller.
//!
//! Three pieces: the line-oriented wire [`protocol`], the serial
//! [`transport`] the autopilot sends through, and the actuator-side
//! [`simulator`] state machine used on the bench and in tests. The safety
//! property lives in the state machine: loss of the control channel must
//! fail safe (motors zeroed), never fail silent.

pub use protocol::{Channel, Command, Mode, ProtocolError};
pub use simulator::{ActuatorSim, Disposition, HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT, LinkState};
pub use transport::CommandLink;

mod protocol;
mod simulator;
mod transport;
