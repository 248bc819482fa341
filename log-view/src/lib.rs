//! Log View - incremental polling and reconciliation for the agent chat log
//!
//! This crate turns the server's continuously growing, mutable session log into a
//! stable tree of message containers and collapsible process groups, with subordinate
//! agents' steps nested under the delegation that spawned them.

mod aggregate;
pub mod config;
pub mod entry;
pub mod format;
pub mod kvps;
pub mod logging;
pub mod markup;
pub mod model;
pub mod nesting;
pub mod poller;
pub mod prefs;
pub mod render;
pub mod schedule;
pub mod scroll;
pub mod session;
pub mod status;
pub mod surface;
pub mod transport;

pub use poller::{ConnectionState, PollCommand, PollOutcome, PollSink, Poller, PollerOptions};
pub use prefs::{ExpansionPrefs, JsonFileStore, MemoryStore, PreferenceStore};
pub use session::{Applied, Change, NodeRef, ReconcileOptions, SessionView};
pub use surface::{PatchTarget, SurfaceSink};
pub use transport::{HttpTransport, LogTransport, TransportError};
