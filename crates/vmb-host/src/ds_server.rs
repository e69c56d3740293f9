//! Answers the VM's state reads and writes while it executes a request.

use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use vmb_proto::ds::{Ack, DeleteParams, GetParams, GetResult, MultiGetParams, MultiGetResult, SetParams};
use vmb_proto::{
    DEFAULT_MAX_FRAME_LEN, DsCall, FrameError, FrameReader, FrameWriter, PROTOCOL_VERSION,
    RequestEnvelope, ResponseEnvelope, RpcError, codes,
};
use vmb_types::AccessPath;

use crate::error::DsError;
use crate::session::SessionRegistry;
use crate::transport::{Connection, Listener};

/// Resolves data-source calls against the session named in each call.
///
/// A call whose session is not registered (never opened, or already
/// finished or timed out) gets `unknown_request` and touches nothing.
#[derive(Clone)]
pub struct DataSourceServer {
    sessions: SessionRegistry,
    max_frame_len: usize,
}

impl DataSourceServer {
    pub fn new(sessions: SessionRegistry) -> Self {
        Self {
            sessions,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn get(&self, session: u64, access_path: &AccessPath) -> Result<Option<Vec<u8>>, DsError> {
        let session = self.sessions.lookup(session)?;
        session.get(&ledger_key(access_path)?)
    }

    /// Values in request order; absent entries are `None`.
    pub fn multi_get(
        &self,
        session: u64,
        access_paths: &[AccessPath],
    ) -> Result<Vec<Option<Vec<u8>>>, DsError> {
        let session = self.sessions.lookup(session)?;
        let keys = access_paths
            .iter()
            .map(ledger_key)
            .collect::<Result<Vec<_>, _>>()?;
        session.multi_get(keys.iter().map(Vec::as_slice))
    }

    pub fn set(&self, session: u64, access_path: &AccessPath, value: Vec<u8>) -> Result<(), DsError> {
        let session = self.sessions.lookup(session)?;
        session.set(ledger_key(access_path)?, value);
        Ok(())
    }

    pub fn delete(&self, session: u64, access_path: &AccessPath) -> Result<(), DsError> {
        let session = self.sessions.lookup(session)?;
        session.delete(ledger_key(access_path)?);
        Ok(())
    }

    pub fn handle_request(&self, req: RequestEnvelope) -> ResponseEnvelope {
        let id = req.id;
        if req.v != PROTOCOL_VERSION {
            return ResponseEnvelope::failure(
                id,
                RpcError::new(
                    codes::UNSUPPORTED_VERSION,
                    format!("unsupported protocol version {}", req.v),
                ),
            );
        }
        let call = match DsCall::from_envelope(&req) {
            Ok(call) => call,
            Err(err) => return ResponseEnvelope::failure(id, err),
        };
        let cmd = call.cmd();
        let session = call.session();
        let res = match call {
            DsCall::Get(GetParams { session, access_path }) => self
                .get(session, &access_path)
                .map(|value| ResponseEnvelope::success(id, &GetResult { value })),
            DsCall::MultiGet(MultiGetParams {
                session,
                access_paths,
            }) => self
                .multi_get(session, &access_paths)
                .map(|values| ResponseEnvelope::success(id, &MultiGetResult { values })),
            DsCall::Set(SetParams {
                session,
                access_path,
                value,
            }) => self
                .set(session, &access_path, value)
                .map(|()| ResponseEnvelope::success(id, &Ack {})),
            DsCall::Delete(DeleteParams {
                session,
                access_path,
            }) => self
                .delete(session, &access_path)
                .map(|()| ResponseEnvelope::success(id, &Ack {})),
        };
        match res {
            Ok(resp) => resp,
            Err(err) => {
                if matches!(err, DsError::UnknownRequest(_)) {
                    debug!(session, cmd, "call for unknown session");
                } else {
                    warn!(session, cmd, error = %err, "data-source call failed");
                }
                ResponseEnvelope::failure(id, err.into())
            }
        }
    }

    /// Accept loop; runs until `shutdown_rx` fires, then drops every open
    /// connection.
    pub async fn run(self, listener: Listener, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                res = listener.accept() => match res {
                    Ok(conn) => {
                        connections.spawn(self.clone().serve(conn));
                    }
                    Err(e) => warn!(error = %e, "data-source accept failed"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = shutdown_rx.recv() => break,
            }
        }
        connections.shutdown().await;
    }

    /// Serve one VM connection: one response per request line, in order.
    pub async fn serve(self, conn: Connection) {
        let (r, w) = conn.into_split();
        let mut reader = FrameReader::with_max_len(r, self.max_frame_len);
        let mut writer = FrameWriter::new(w);
        loop {
            let line = match reader.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(FrameError::TooLarge { max }) => {
                    let err = RpcError::invalid_request(format!("frame exceeds {max} bytes"));
                    let _ = writer.write_frame(&ResponseEnvelope::failure(0, err)).await;
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "data-source read failed");
                    break;
                }
            };
            let resp = match serde_json::from_slice::<RequestEnvelope>(&line) {
                Ok(req) => self.handle_request(req),
                Err(e) => ResponseEnvelope::failure(0, RpcError::decode(e.to_string())),
            };
            if let Err(e) = writer.write_frame(&resp).await {
                warn!(error = %e, "data-source write failed");
                break;
            }
        }
    }
}

// Same rule the write-set decoder applies to paths coming back from the VM.
fn ledger_key(access_path: &AccessPath) -> Result<Vec<u8>, DsError> {
    if access_path.path.is_empty() {
        return Err(DsError::InvalidAccessPath("empty path"));
    }
    Ok(access_path.to_ledger_key())
}
