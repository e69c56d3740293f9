//! Scripted stand-in for the external VM, speaking the real wire protocol
//! over a real socket. Used by the integration tests.
//!
//! Each execution request pops the next [`VmPlan`]: the plan's steps are
//! replayed against the bridge's data source under the request's session,
//! then the plan's reply is sent. Requests are served concurrently.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};
use vmb_proto::ds::{DeleteParams, GetParams, MultiGetParams, SetParams};
use vmb_proto::vm::EXECUTE;
use vmb_proto::{
    DsCall, ExecuteParams, ExecuteResponse, FrameReader, FrameWriter, RequestEnvelope,
    ResponseEnvelope, RpcError, WireExecution,
};
use vmb_types::{AccessPath, WriteOp};

use crate::config::Endpoint;
use crate::transport::{BoxedReader, BoxedWriter, Connection, Listener};

#[derive(Debug, Clone)]
pub enum VmStep {
    Get(AccessPath),
    MultiGet(Vec<AccessPath>),
    Set(AccessPath, Vec<u8>),
    Delete(AccessPath),
    Sleep(Duration),
}

#[derive(Debug, Clone)]
pub enum VmReply {
    Executions(Vec<WireExecution>),
    /// Keep, with a write-set made of the plan's `Set`/`Delete` steps.
    KeepWrites { gas_used: u64 },
    /// Successful envelope with an arbitrary result body.
    Raw(serde_json::Value),
    Error(RpcError),
    /// Never answer.
    Hang,
    /// Close the connection instead of answering.
    Disconnect,
}

#[derive(Debug, Clone)]
pub struct VmPlan {
    pub steps: Vec<VmStep>,
    pub reply: VmReply,
}

impl VmPlan {
    pub fn reply(reply: VmReply) -> Self {
        Self {
            steps: Vec::new(),
            reply,
        }
    }

    pub fn keep(exec: WireExecution) -> Self {
        Self::reply(VmReply::Executions(vec![exec]))
    }

    pub fn step(mut self, step: VmStep) -> Self {
        self.steps.push(step);
        self
    }
}

/// One data-source call the test VM made and what it got back.
#[derive(Debug, Clone)]
pub struct DsExchange {
    pub session: u64,
    pub cmd: &'static str,
    pub response: ResponseEnvelope,
}

#[derive(Default)]
struct State {
    plans: Mutex<VecDeque<VmPlan>>,
    requests: Mutex<Vec<ExecuteParams>>,
    exchanges: Mutex<Vec<DsExchange>>,
    data_source: Mutex<Option<Endpoint>>,
}

fn locked<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct TestVm {
    endpoint: Endpoint,
    state: Arc<State>,
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl TestVm {
    pub async fn start(listen: &Endpoint) -> Result<Self> {
        let listener = Listener::bind(listen)
            .await
            .with_context(|| format!("bind test vm on {listen}"))?;
        let endpoint = listener.local_endpoint()?;
        let state = Arc::new(State::default());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(accept_loop(listener, state.clone(), shutdown_rx));
        Ok(Self {
            endpoint,
            state,
            shutdown_tx,
            task: Some(task),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Where to send data-source calls; needed before any plan with steps runs.
    pub fn set_data_source(&self, endpoint: Endpoint) {
        *locked(&self.state.data_source) = Some(endpoint);
    }

    pub fn push(&self, plan: VmPlan) {
        locked(&self.state.plans).push_back(plan);
    }

    pub fn requests(&self) -> Vec<ExecuteParams> {
        locked(&self.state.requests).clone()
    }

    pub fn exchanges(&self) -> Vec<DsExchange> {
        locked(&self.state.exchanges).clone()
    }

    /// Poll until at least `n` data-source exchanges have been recorded.
    pub async fn wait_for_exchanges(&self, n: usize, within: Duration) -> Result<Vec<DsExchange>> {
        let poll = async {
            loop {
                let seen = self.exchanges();
                if seen.len() >= n {
                    return seen;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(within, poll)
            .await
            .map_err(|_| anyhow!("saw {} of {n} data-source exchanges", self.exchanges().len()))
    }

    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestVm {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn accept_loop(listener: Listener, state: Arc<State>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            res = listener.accept() => match res {
                Ok(conn) => {
                    connections.spawn(serve(conn, state.clone()));
                }
                Err(e) => warn!(error = %e, "test vm accept failed"),
            },
            _ = shutdown_rx.recv() => break,
        }
    }
    connections.shutdown().await;
}

type SharedWriter = Arc<tokio::sync::Mutex<FrameWriter<BoxedWriter>>>;

async fn serve(conn: Connection, state: Arc<State>) {
    let (r, w) = conn.into_split();
    let mut reader = FrameReader::new(r);
    let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(FrameWriter::new(w)));
    let mut inflight = JoinSet::new();
    loop {
        let req = match reader.read_frame::<RequestEnvelope>().await {
            Ok(Some(req)) => req,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "test vm read failed");
                break;
            }
        };
        if req.cmd != EXECUTE {
            let resp = ResponseEnvelope::failure(req.id, RpcError::unknown_method(&req.cmd));
            let _ = writer.lock().await.write_frame(&resp).await;
            continue;
        }
        let params: ExecuteParams = match req.payload() {
            Ok(params) => params,
            Err(err) => {
                let _ = writer.lock().await.write_frame(&ResponseEnvelope::failure(req.id, err)).await;
                continue;
            }
        };
        locked(&state.requests).push(params.clone());
        let plan = locked(&state.plans)
            .pop_front()
            .unwrap_or_else(|| VmPlan::keep(WireExecution::keep(0, &[], Vec::new())));

        let state = state.clone();
        let writer = writer.clone();
        inflight.spawn(async move {
            if let Err(e) = run_plan(req.id, params.session, plan, &state, &writer).await {
                warn!(error = %e, "test vm plan failed");
            }
        });
    }
    inflight.shutdown().await;
}

async fn run_plan(
    id: u64,
    session: u64,
    plan: VmPlan,
    state: &State,
    writer: &SharedWriter,
) -> Result<()> {
    let mut writes = Vec::new();
    if !plan.steps.is_empty() {
        let endpoint = locked(&state.data_source)
            .clone()
            .ok_or_else(|| anyhow!("test vm has no data source configured"))?;
        let mut ds = DsClient::connect(&endpoint).await?;
        for step in plan.steps {
            let call = match step {
                VmStep::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    continue;
                }
                VmStep::Get(access_path) => DsCall::Get(GetParams {
                    session,
                    access_path,
                }),
                VmStep::MultiGet(access_paths) => DsCall::MultiGet(MultiGetParams {
                    session,
                    access_paths,
                }),
                VmStep::Set(access_path, value) => {
                    writes.push(WriteOp::write(access_path.clone(), value.clone()));
                    DsCall::Set(SetParams {
                        session,
                        access_path,
                        value,
                    })
                }
                VmStep::Delete(access_path) => {
                    writes.push(WriteOp::delete(access_path.clone()));
                    DsCall::Delete(DeleteParams {
                        session,
                        access_path,
                    })
                }
            };
            let cmd = call.cmd();
            let response = ds.call(call).await?;
            debug!(session, cmd, ok = response.ok, "test vm data-source call");
            locked(&state.exchanges).push(DsExchange {
                session,
                cmd,
                response,
            });
        }
    }

    let resp = match plan.reply {
        VmReply::Executions(executions) => {
            ResponseEnvelope::success(id, &ExecuteResponse { executions })
        }
        VmReply::KeepWrites { gas_used } => ResponseEnvelope::success(
            id,
            &ExecuteResponse {
                executions: vec![WireExecution::keep(gas_used, &writes, Vec::new())],
            },
        ),
        VmReply::Raw(value) => ResponseEnvelope {
            id,
            ok: true,
            result: Some(value),
            error: None,
        },
        VmReply::Error(err) => ResponseEnvelope::failure(id, err),
        VmReply::Hang => return Ok(()),
        VmReply::Disconnect => {
            writer.lock().await.shutdown().await?;
            return Ok(());
        }
    };
    writer.lock().await.write_frame(&resp).await?;
    Ok(())
}

/// Sequential data-source client: one outstanding call at a time.
struct DsClient {
    reader: FrameReader<BoxedReader>,
    writer: FrameWriter<BoxedWriter>,
    next_id: u64,
}

impl DsClient {
    async fn connect(endpoint: &Endpoint) -> Result<Self> {
        let (r, w) = Connection::connect(endpoint)
            .await
            .with_context(|| format!("connect to data source at {endpoint}"))?
            .into_split();
        Ok(Self {
            reader: FrameReader::new(r),
            writer: FrameWriter::new(w),
            next_id: 0,
        })
    }

    async fn call(&mut self, call: DsCall) -> Result<ResponseEnvelope> {
        self.next_id += 1;
        let id = self.next_id;
        self.writer.write_frame(&call.into_envelope(id)?).await?;
        let Some(resp) = self.reader.read_frame::<ResponseEnvelope>().await? else {
            bail!("data source closed the connection");
        };
        if resp.id != id {
            bail!("response id {} does not match request {id}", resp.id);
        }
        Ok(resp)
    }
}
