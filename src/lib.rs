//! Session Grid - distributed scheduler for remote browser sessions
//!
//! This library provides the core of a WebDriver grid:
//! - Nodes owning a fixed set of slots, each able to host one session
//! - A distributor placing new session requests onto the best node
//! - A queue holding requests until capacity frees up
//! - A session map recording which node owns which session
//! - An HTTP router forwarding client commands to the owning node
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Clients                           │
//! │        WebDriver (W3C)   │   legacy (OSS)            │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                    Router                            │
//! │   new session  │  commands  │  status  │  admin     │
//! └──────┬──────────────────────────────┬───────────────┘
//!        │                              │
//! ┌──────▼───────────────────┐  ┌───────▼──────────────┐
//! │ Distributor  ◄─ Queue     │  │     SessionMap       │
//! └──────┬───────────────────┘  └──────────────────────┘
//!        │        ▲ heartbeats / drain / closed (EventBus)
//! ┌──────▼────────┴─────────────────────────────────────┐
//! │              Nodes (local or remote)                 │
//! │   slot  │  slot  │  slot   ──►  relay driver         │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod daemon;
pub mod data;
pub mod distributor;
pub mod error;
pub mod events;
pub mod node;
pub mod queue;
pub mod sessionmap;

pub use config::GridConfig;
pub use daemon::Daemon;
pub use data::{Capabilities, CreateSessionRequest, CreateSessionResponse, NodeId, NodeStatus, Session, SessionId};
pub use distributor::Distributor;
pub use error::{Error, Result};
pub use events::{EventBus, GridEvent};
pub use node::{LocalNode, Node};
pub use queue::NewSessionQueue;
pub use sessionmap::{LocalSessionMap, SessionMap};
