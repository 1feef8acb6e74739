//! Agent host
//!
//! Serves the agent protocol over a byte stream. Each request is handled on
//! its own task so `StopRun` can reach a runner while `Run` is in flight.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::protocol::{AgentRequest, AgentResponse, Envelope, READY_ID};
use super::CURRENT_RUNTIME;
use crate::drivers::DriverService;
use crate::error::{EngineError, EngineResult};
use crate::listener::{TestEvent, TestListener};
use crate::runners::{DirectRunner, TestEngineRunner};

type Outbox = UnboundedSender<Envelope<AgentResponse>>;
type HostedRunner = Arc<RwLock<Option<Arc<DirectRunner>>>>;

/// Forwards run events to the client as responses to the `Run` request
struct RemoteListener {
    request_id: u64,
    outbox: Outbox,
}

impl TestListener for RemoteListener {
    fn on_event(&self, event: &TestEvent) {
        let _ = self.outbox.send(Envelope::new(
            self.request_id,
            AgentResponse::Event {
                event: event.clone(),
            },
        ));
    }
}

/// Serve one client until it sends `Stop` or closes the stream
pub async fn serve<R, W>(
    reader: R,
    mut writer: W,
    drivers: DriverService,
    agent_id: String,
) -> EngineResult<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (outbox, mut inbox) = mpsc::unbounded_channel::<Envelope<AgentResponse>>();
    let write_task = tokio::spawn(async move {
        while let Some(envelope) = inbox.recv().await {
            let line = envelope.to_line()?;
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok::<(), EngineError>(())
    });

    let _ = outbox.send(Envelope::new(
        READY_ID,
        AgentResponse::Ready {
            agent_id: agent_id.clone(),
            runtime: CURRENT_RUNTIME.to_string(),
        },
    ));
    info!("Agent {} ready", agent_id);

    let hosted: HostedRunner = Arc::new(RwLock::new(None));
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let envelope = match Envelope::<AgentRequest>::from_line(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Ignoring unreadable request: {}", e);
                continue;
            }
        };

        debug!("Agent {} received {} ({})", agent_id, envelope.body.name(), envelope.id);
        if envelope.body == AgentRequest::Stop {
            let _ = outbox.send(Envelope::new(envelope.id, AgentResponse::Ack));
            break;
        }

        let hosted = Arc::clone(&hosted);
        let drivers = drivers.clone();
        let outbox = outbox.clone();
        tokio::spawn(async move {
            let id = envelope.id;
            let response = handle(id, envelope.body, &hosted, drivers, &outbox)
                .await
                .unwrap_or_else(|e| AgentResponse::Error {
                    message: e.to_string(),
                });
            let _ = outbox.send(Envelope::new(id, response));
        });
    }

    if let Some(runner) = hosted.write().await.take() {
        if let Err(e) = runner.dispose().await {
            warn!("Agent {} cleanup failed: {}", agent_id, e);
        }
    }
    info!("Agent {} stopping", agent_id);

    drop(outbox);
    match write_task.await {
        Ok(result) => result,
        Err(e) => {
            error!("Agent writer failed: {}", e);
            Err(EngineError::TaskFailed(e.to_string()))
        }
    }
}

async fn current(hosted: &HostedRunner) -> EngineResult<Arc<DirectRunner>> {
    hosted
        .read()
        .await
        .as_ref()
        .map(Arc::clone)
        .ok_or_else(|| EngineError::Remote("no runner has been created".into()))
}

async fn handle(
    id: u64,
    request: AgentRequest,
    hosted: &HostedRunner,
    drivers: DriverService,
    outbox: &Outbox,
) -> EngineResult<AgentResponse> {
    match request {
        AgentRequest::CreateRunner { package } => {
            let runner = Arc::new(DirectRunner::new(package, drivers));
            if let Some(previous) = hosted.write().await.replace(runner) {
                previous.dispose().await?;
            }
            Ok(AgentResponse::Ack)
        }
        AgentRequest::Load => Ok(AgentResponse::Loaded {
            summary: current(hosted).await?.load().await?,
        }),
        AgentRequest::Explore { filter } => Ok(AgentResponse::Explored {
            description: current(hosted).await?.explore(&filter).await?,
        }),
        AgentRequest::CountTestCases { filter } => Ok(AgentResponse::Count {
            count: current(hosted).await?.count_test_cases(&filter).await?,
        }),
        AgentRequest::Run { filter } => {
            let listener = Arc::new(RemoteListener {
                request_id: id,
                outbox: outbox.clone(),
            });
            let result = current(hosted).await?.run(listener, &filter).await?;
            Ok(AgentResponse::RunCompleted { result })
        }
        AgentRequest::StopRun { force } => {
            current(hosted).await?.cancel_run(force).await;
            Ok(AgentResponse::Ack)
        }
        AgentRequest::Unload => {
            if let Some(runner) = hosted.read().await.as_ref() {
                runner.unload().await?;
            }
            Ok(AgentResponse::Unloaded)
        }
        AgentRequest::Stop => Ok(AgentResponse::Ack),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::StreamTransport;
    use crate::models::{TestFilter, TestPackage};
    use crate::runners::test_support;
    use tokio::io::{duplex, split};

    async fn connect() -> (StreamTransport, tokio::task::JoinHandle<EngineResult<()>>) {
        let (client, server) = duplex(64 * 1024);
        let (server_read, server_write) = split(server);
        let host = tokio::spawn(serve(
            server_read,
            server_write,
            test_support::drivers(),
            "agent-test".into(),
        ));
        let (client_read, client_write) = split(client);
        let transport = StreamTransport::new(client_read, client_write);
        transport.wait_ready().await.unwrap();
        (transport, host)
    }

    #[tokio::test]
    async fn test_remote_load_and_run() {
        let (transport, host) = connect().await;

        let package = TestPackage::new("calc.dll");
        assert_eq!(
            transport
                .call(AgentRequest::CreateRunner { package })
                .await
                .unwrap(),
            AgentResponse::Ack
        );
        let AgentResponse::Loaded { summary } = transport.call(AgentRequest::Load).await.unwrap()
        else {
            panic!("expected loaded");
        };
        assert_eq!(summary.test_case_count, 3);

        let mut run = transport
            .request(AgentRequest::Run {
                filter: TestFilter::Empty,
            })
            .await
            .unwrap();
        let mut events = 0;
        let result = loop {
            match run.next().await.unwrap() {
                AgentResponse::Event { .. } => events += 1,
                AgentResponse::RunCompleted { result } => break result,
                other => panic!("unexpected {other:?}"),
            }
        };
        assert!(events >= 6);
        assert_eq!(result.fail_count, 1);

        transport.call(AgentRequest::Stop).await.unwrap();
        host.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_request_before_create_is_remote_error() {
        let (transport, _host) = connect().await;
        let err = transport.call(AgentRequest::Load).await.unwrap_err();
        assert!(matches!(err, EngineError::Remote(m) if m.contains("no runner")));
    }
}
