//! Client side of the agent protocol over a byte stream

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::protocol::{AgentRequest, AgentResponse, Envelope, READY_ID};
use crate::error::{EngineError, EngineResult};

type Pending = Arc<Mutex<HashMap<u64, UnboundedSender<AgentResponse>>>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Multiplexed request/response channel to one agent
pub struct StreamTransport {
    writer: tokio::sync::Mutex<Writer>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    ready: tokio::sync::Mutex<Option<UnboundedReceiver<AgentResponse>>>,
    reader: JoinHandle<()>,
}

impl StreamTransport {
    /// Start reading responses from `reader`; must be called inside a runtime
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        lock(&pending).insert(READY_ID, ready_tx);

        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            reader,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending,
            closed,
            next_id: AtomicU64::new(READY_ID + 1),
            ready: tokio::sync::Mutex::new(Some(ready_rx)),
            reader,
        }
    }

    /// Wait for the agent's `Ready`, returning its id and runtime
    pub async fn wait_ready(&self) -> EngineResult<(String, String)> {
        let mut receiver = self
            .ready
            .lock()
            .await
            .take()
            .ok_or_else(|| EngineError::Transport("agent already reported ready".into()))?;
        let response = receiver.recv().await;
        lock(&self.pending).remove(&READY_ID);

        match response {
            Some(AgentResponse::Ready { agent_id, runtime }) => Ok((agent_id, runtime)),
            Some(other) => Err(unexpected(&other)),
            None => Err(EngineError::Transport(
                "agent exited before reporting ready".into(),
            )),
        }
    }

    /// Send a request and return the stream of its responses
    pub async fn request(&self, body: AgentRequest) -> EngineResult<Exchange> {
        if self.is_closed() {
            return Err(EngineError::Transport("agent connection is closed".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.pending).insert(id, tx);

        let exchange = Exchange {
            id,
            receiver: rx,
            pending: Arc::clone(&self.pending),
        };

        trace!("-> {} {}", id, body.name());
        let line = Envelope::new(id, body).to_line()?;
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        Ok(exchange)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send a request and wait for its single reply
    pub async fn call(&self, body: AgentRequest) -> EngineResult<AgentResponse> {
        self.request(body).await?.next().await
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Responses to one request
pub struct Exchange {
    id: u64,
    receiver: UnboundedReceiver<AgentResponse>,
    pending: Pending,
}

impl Exchange {
    /// Next response; a remote `Error` becomes [`EngineError::Remote`]
    pub async fn next(&mut self) -> EngineResult<AgentResponse> {
        match self.receiver.recv().await {
            Some(AgentResponse::Error { message }) => Err(EngineError::Remote(message)),
            Some(response) => Ok(response),
            None => Err(EngineError::Transport(
                "agent closed the connection".into(),
            )),
        }
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.id);
    }
}

/// Error for a reply of the wrong kind
pub fn unexpected(response: &AgentResponse) -> EngineError {
    EngineError::Transport(format!("unexpected response '{}'", response.name()))
}

fn lock(pending: &Pending) -> std::sync::MutexGuard<'_, HashMap<u64, UnboundedSender<AgentResponse>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn read_loop<R>(reader: R, pending: Pending, closed: Arc<AtomicBool>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match Envelope::<AgentResponse>::from_line(&line) {
                Ok(envelope) => {
                    trace!("<- {} {}", envelope.id, envelope.body.name());
                    let sender = lock(&pending).get(&envelope.id).cloned();
                    match sender {
                        Some(sender) => {
                            let _ = sender.send(envelope.body);
                        }
                        None => debug!("Dropping response for unknown request {}", envelope.id),
                    }
                }
                Err(e) => warn!("Unreadable agent message: {}", e),
            },
            Ok(None) => break,
            Err(e) => {
                warn!("Agent stream failed: {}", e);
                break;
            }
        }
    }
    // Dropping the senders wakes every waiter with a closed channel
    closed.store(true, Ordering::Release);
    lock(&pending).clear();
}
