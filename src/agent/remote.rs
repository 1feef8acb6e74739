//! Runner proxy forwarding every call to an agent

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::protocol::{AgentRequest, AgentResponse};
use super::transport::{unexpected, StreamTransport};
use crate::error::EngineResult;
use crate::listener::{notify, TestListener};
use crate::models::TestFilter;
use crate::results::{LoadSummary, ResultNode, TestDescription};
use crate::runners::TestEngineRunner;

/// A runner living inside an agent
pub struct RemoteRunner {
    transport: Arc<StreamTransport>,
}

impl RemoteRunner {
    pub(crate) fn new(transport: Arc<StreamTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl TestEngineRunner for RemoteRunner {
    async fn load(&self) -> EngineResult<LoadSummary> {
        match self.transport.call(AgentRequest::Load).await? {
            AgentResponse::Loaded { summary } => Ok(summary),
            other => Err(unexpected(&other)),
        }
    }

    async fn explore(&self, filter: &TestFilter) -> EngineResult<TestDescription> {
        let request = AgentRequest::Explore {
            filter: filter.clone(),
        };
        match self.transport.call(request).await? {
            AgentResponse::Explored { description } => Ok(description),
            other => Err(unexpected(&other)),
        }
    }

    async fn count_test_cases(&self, filter: &TestFilter) -> EngineResult<usize> {
        let request = AgentRequest::CountTestCases {
            filter: filter.clone(),
        };
        match self.transport.call(request).await? {
            AgentResponse::Count { count } => Ok(count),
            other => Err(unexpected(&other)),
        }
    }

    async fn run(
        &self,
        listener: Arc<dyn TestListener>,
        filter: &TestFilter,
    ) -> EngineResult<ResultNode> {
        let mut exchange = self
            .transport
            .request(AgentRequest::Run {
                filter: filter.clone(),
            })
            .await?;

        loop {
            match exchange.next().await? {
                AgentResponse::Event { event } => notify(listener.as_ref(), &event),
                AgentResponse::RunCompleted { result } => return Ok(result),
                other => return Err(unexpected(&other)),
            }
        }
    }

    async fn unload(&self) -> EngineResult<()> {
        match self.transport.call(AgentRequest::Unload).await? {
            AgentResponse::Unloaded => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn cancel_run(&self, force: bool) {
        if let Err(e) = self.transport.call(AgentRequest::StopRun { force }).await {
            warn!("Could not forward cancellation to agent: {}", e);
        }
    }
}
