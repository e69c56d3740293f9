//! Sending execution requests to the VM.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};
use vmb_proto::vm::EXECUTE;
use vmb_proto::{
    ExecuteParams, ExecuteResponse, FrameReader, FrameWriter, RequestEnvelope, ResponseEnvelope,
    RpcError, WireExecution,
};
use vmb_types::{Address, ExecutionRequest, Payload};

use crate::config::{BridgeConfig, Endpoint};
use crate::error::{ProtocolViolation, VmFault};
use crate::session::SessionId;
use crate::transport::{BoxedReader, BoxedWriter, Connection};

/// Raw request/response exchange with a VM. The bridge talks to this seam so
/// tests can answer without a socket.
#[async_trait]
pub trait VmService: Send + Sync {
    /// Send one execution request and return the undecoded result body.
    async fn execute(&self, params: &ExecuteParams) -> Result<serde_json::Value, VmFault>;
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<ResponseEnvelope>>>>;

/// One multiplexed connection to the VM. Requests are tagged with an id and
/// may complete out of order; a background task routes each response line to
/// its waiter.
pub struct VmClient {
    endpoint: Endpoint,
    writer: tokio::sync::Mutex<FrameWriter<BoxedWriter>>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    reader_task: JoinHandle<()>,
}

impl VmClient {
    pub async fn connect(endpoint: &Endpoint, max_frame_len: usize) -> std::io::Result<Self> {
        let (r, w) = Connection::connect(endpoint).await?.into_split();
        let pending: Pending = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));
        let reader_task = tokio::spawn(read_responses(
            FrameReader::with_max_len(r, max_frame_len),
            pending.clone(),
            closed.clone(),
        ));
        Ok(Self {
            endpoint: endpoint.clone(),
            writer: tokio::sync::Mutex::new(FrameWriter::new(w)),
            pending,
            closed,
            next_id: AtomicU64::new(1),
            reader_task,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.writer.lock().await.shutdown().await;
        self.reader_task.abort();
        lock(&self.pending).clear();
    }

    pub async fn call(
        &self,
        cmd: &str,
        payload: &impl serde::Serialize,
    ) -> Result<ResponseEnvelope, VmFault> {
        if self.is_closed() {
            return Err(VmFault::Disconnected);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let env = RequestEnvelope::new(id, cmd, payload)
            .map_err(|e| VmFault::Transport(format!("encode {cmd} request: {e}")))?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        // Removes the waiter if this future is dropped, e.g. on timeout.
        let _waiter = PendingGuard {
            pending: &self.pending,
            id,
        };

        self.writer
            .lock()
            .await
            .write_frame(&env)
            .await
            .map_err(|e| VmFault::Transport(e.to_string()))?;
        rx.await.map_err(|_| VmFault::Disconnected)
    }
}

#[async_trait]
impl VmService for VmClient {
    async fn execute(&self, params: &ExecuteParams) -> Result<serde_json::Value, VmFault> {
        let resp = self.call(EXECUTE, params).await?;
        if !resp.ok {
            let err = resp
                .error
                .unwrap_or_else(|| RpcError::invalid_request("error response without error body"));
            return Err(VmFault::Rejected(err));
        }
        Ok(resp.result.unwrap_or(serde_json::Value::Null))
    }
}

impl Drop for VmClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

fn lock(
    pending: &Pending,
) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<ResponseEnvelope>>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

async fn read_responses(
    mut reader: FrameReader<BoxedReader>,
    pending: Pending,
    closed: Arc<AtomicBool>,
) {
    loop {
        match reader.read_frame::<ResponseEnvelope>().await {
            Ok(Some(resp)) => {
                let waiter = lock(&pending).remove(&resp.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(resp);
                    }
                    None => debug!(id = resp.id, "dropping response with no waiter"),
                }
            }
            Ok(None) => {
                warn!("vm closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "vm response stream failed");
                break;
            }
        }
    }
    closed.store(true, Ordering::Release);
    // Dropping the senders wakes every waiter with `Disconnected`.
    lock(&pending).clear();
}

/// Why an execution produced no usable result.
#[derive(Debug)]
pub enum ExecError {
    /// Fatal; the caller must halt.
    Fault(VmFault),
    /// Deterministic; the transaction is rejected.
    Violation(ProtocolViolation),
}

/// Per-transaction inputs taken from the enclosing block.
#[derive(Debug, Clone, Copy)]
pub struct BlockInfo {
    pub height: u64,
    /// Unix seconds.
    pub time: u64,
    pub gas_limit: u64,
}

pub fn build_request(block: BlockInfo, sender: Address, payload: Payload) -> ExecutionRequest {
    ExecutionRequest {
        sender,
        block_height: block.height,
        block_time: block.time,
        gas_limit: block.gas_limit,
        payload,
    }
}

/// Applies the deadline and the one-execution-per-request rule on top of a
/// [`VmService`].
#[derive(Clone)]
pub struct ExecutionClient {
    service: Arc<dyn VmService>,
    config: BridgeConfig,
}

impl ExecutionClient {
    pub fn new(service: Arc<dyn VmService>, config: &BridgeConfig) -> Self {
        Self {
            service,
            config: config.clone(),
        }
    }

    pub async fn execute(
        &self,
        session: SessionId,
        request: ExecutionRequest,
    ) -> Result<WireExecution, ExecError> {
        let kind = request.payload.kind();
        let deadline = self.config.timeout_for(kind);
        let params = ExecuteParams { session, request };

        let value = match timeout(deadline, self.service.execute(&params)).await {
            Ok(Ok(value)) => value,
            Ok(Err(fault)) => return Err(ExecError::Fault(fault)),
            Err(_) => {
                return Err(ExecError::Fault(VmFault::Timeout {
                    kind: kind.as_str(),
                    timeout: deadline,
                }));
            }
        };

        let resp: ExecuteResponse = serde_json::from_value(value).map_err(|e| {
            ExecError::Violation(ProtocolViolation::MalformedResponse(e.to_string()))
        })?;
        let count = resp.executions.len();
        let mut executions = resp.executions.into_iter();
        match (executions.next(), executions.next()) {
            (Some(exec), None) => Ok(exec),
            _ => Err(ExecError::Violation(ProtocolViolation::ExecutionCount(count))),
        }
    }
}
