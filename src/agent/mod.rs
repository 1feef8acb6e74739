//! Agents
//!
//! An agent hosts runners outside the calling runner, normally in a child
//! process. The engine talks to it through a narrow request/response
//! protocol that works over any byte stream.

mod agency;
mod host;
mod protocol;
mod remote;
mod transport;

pub use agency::{
    AgentHandle, AgentLauncher, AgentOptions, InProcessLauncher, LaunchedAgent, ProcessLauncher,
    TestAgency, DEFAULT_AGENT_TIMEOUT_SECS,
};
pub use host::serve;
pub use protocol::{AgentRequest, AgentResponse, Envelope, READY_ID};
pub use remote::RemoteRunner;
pub use transport::{Exchange, StreamTransport};

/// Runtime this build executes tests on
pub const CURRENT_RUNTIME: &str = "native";
