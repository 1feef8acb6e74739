//! Agent wire protocol
//!
//! One JSON envelope per line. Requests carry a caller-chosen id; every
//! response to a request repeats it, so several requests can be in flight at
//! once. Id 0 is reserved for the unsolicited `Ready` announcement.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::listener::TestEvent;
use crate::models::{TestFilter, TestPackage};
use crate::results::{LoadSummary, ResultNode, TestDescription};

/// Id of the `Ready` message an agent sends on startup
pub const READY_ID: u64 = 0;

/// A message with its correlation id
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: u64,
    pub body: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(id: u64, body: T) -> Self {
        Self { id, body }
    }

    /// Serialize as one protocol line, newline included
    pub fn to_line(&self) -> EngineResult<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    pub fn from_line(line: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

/// Calls a client makes on an agent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentRequest {
    CreateRunner { package: TestPackage },
    Load,
    Explore { filter: TestFilter },
    CountTestCases { filter: TestFilter },
    Run { filter: TestFilter },
    StopRun { force: bool },
    Unload,
    Stop,
}

impl AgentRequest {
    pub fn name(&self) -> &'static str {
        match self {
            AgentRequest::CreateRunner { .. } => "create_runner",
            AgentRequest::Load => "load",
            AgentRequest::Explore { .. } => "explore",
            AgentRequest::CountTestCases { .. } => "count_test_cases",
            AgentRequest::Run { .. } => "run",
            AgentRequest::StopRun { .. } => "stop_run",
            AgentRequest::Unload => "unload",
            AgentRequest::Stop => "stop",
        }
    }
}

/// Replies and notifications from an agent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentResponse {
    Ready { agent_id: String, runtime: String },
    Loaded { summary: LoadSummary },
    Explored { description: TestDescription },
    Count { count: usize },
    /// Progress of an in-flight run; zero or more precede `RunCompleted`
    Event { event: TestEvent },
    RunCompleted { result: ResultNode },
    Unloaded,
    Ack,
    Error { message: String },
}

impl AgentResponse {
    pub fn name(&self) -> &'static str {
        match self {
            AgentResponse::Ready { .. } => "ready",
            AgentResponse::Loaded { .. } => "loaded",
            AgentResponse::Explored { .. } => "explored",
            AgentResponse::Count { .. } => "count",
            AgentResponse::Event { .. } => "event",
            AgentResponse::RunCompleted { .. } => "run_completed",
            AgentResponse::Unloaded => "unloaded",
            AgentResponse::Ack => "ack",
            AgentResponse::Error { .. } => "error",
        }
    }
}
