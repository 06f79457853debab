//! Shared data model: identifiers, capabilities, sessions and node status

mod capabilities;
mod command;
mod ids;
mod session;
mod status;

pub use capabilities::{BROWSER_NAME, BROWSER_VERSION, Capabilities, IMPORTANT, PLATFORM_NAME};
pub use command::{CommandRequest, CommandResponse};
pub use ids::{NodeId, SessionId, SlotId};
pub use session::{CreateSessionRequest, CreateSessionResponse, Dialect, Session};
pub use status::{Availability, NodeStatus, OsInfo, SlotState, SlotSummary};
