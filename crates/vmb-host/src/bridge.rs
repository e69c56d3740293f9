use std::sync::Arc;

use tracing::{debug, error, info, warn};
use vmb_store::DynLedger;
use vmb_types::{Address, Payload, PayloadKind, ScriptArg};

use crate::client::{BlockInfo, ExecError, ExecutionClient, VmService, build_request};
use crate::config::{BridgeConfig, FaultAction};
use crate::ds_server::DataSourceServer;
use crate::error::{BridgeError, TxRejection, VmFault};
use crate::events::EventSink;
use crate::processor::{self, Outcome, RequestState};
use crate::session::{SessionId, SessionRegistry};
use crate::storage::VmStorage;
use crate::transport::TransportManager;

/// Block-scoped inputs of one transaction.
#[derive(Clone)]
pub struct ExecContext {
    pub block: BlockInfo,
    /// The VM module's view of the ledger for the current block.
    pub ledger: DynLedger,
}

impl ExecContext {
    pub fn new(height: u64, time: u64, gas_limit: u64, ledger: DynLedger) -> Self {
        Self {
            block: BlockInfo {
                height,
                time,
                gas_limit,
            },
            ledger,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgExecuteScript {
    pub signer: Address,
    pub script: Vec<u8>,
    pub type_args: Vec<String>,
    pub args: Vec<ScriptArg>,
}

impl MsgExecuteScript {
    pub fn new(signer: Address, script: Vec<u8>) -> Self {
        Self {
            signer,
            script,
            type_args: Vec::new(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<ScriptArg>) -> Self {
        self.args = args;
        self
    }

    pub fn validate_basic(&self) -> Result<(), TxRejection> {
        if self.signer == Address::ZERO {
            return Err(TxRejection::InvalidMessage("missing signer"));
        }
        if self.script.is_empty() {
            return Err(TxRejection::InvalidMessage("empty script"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgDeployModule {
    pub signer: Address,
    pub module: Vec<u8>,
}

impl MsgDeployModule {
    pub fn new(signer: Address, module: Vec<u8>) -> Self {
        Self { signer, module }
    }

    pub fn validate_basic(&self) -> Result<(), TxRejection> {
        if self.signer == Address::ZERO {
            return Err(TxRejection::InvalidMessage("missing signer"));
        }
        if self.module.is_empty() {
            return Err(TxRejection::InvalidMessage("empty module"));
        }
        Ok(())
    }
}

/// What a kept execution did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionReport {
    pub gas_used: u64,
    pub writes_applied: usize,
    pub events_emitted: usize,
}

/// Entry point for the VM module: runs one transaction through the VM and
/// commits its result to the ledger.
///
/// Returns `Ok` for a kept execution and `Err` for a rejected one. When the
/// VM gives no verifiable answer the call does not return at all; see
/// [`FaultAction`].
pub struct VmBridge {
    exec: ExecutionClient,
    sessions: SessionRegistry,
    fault_action: FaultAction,
}

impl VmBridge {
    pub fn new(
        service: Arc<dyn VmService>,
        sessions: SessionRegistry,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            exec: ExecutionClient::new(service, config),
            sessions,
            fault_action: config.fault_action,
        }
    }

    /// Bring up the data-source server and the VM connection.
    pub async fn connect(config: &BridgeConfig) -> Result<(Self, TransportManager), BridgeError> {
        let sessions = SessionRegistry::new();
        let server =
            DataSourceServer::new(sessions.clone()).with_max_frame_len(config.max_frame_len);
        let transport = TransportManager::start(config, server).await?;
        let service: Arc<dyn VmService> = transport.client();
        Ok((Self::new(service, sessions, config), transport))
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub async fn execute_script(
        &self,
        ctx: &ExecContext,
        msg: MsgExecuteScript,
        events: &mut dyn EventSink,
    ) -> Result<ExecutionReport, TxRejection> {
        msg.validate_basic()?;
        let payload = Payload::Script {
            code: msg.script,
            type_args: msg.type_args,
            args: msg.args,
        };
        self.run(ctx, msg.signer, payload, events).await
    }

    pub async fn deploy_module(
        &self,
        ctx: &ExecContext,
        msg: MsgDeployModule,
        events: &mut dyn EventSink,
    ) -> Result<ExecutionReport, TxRejection> {
        msg.validate_basic()?;
        let payload = Payload::Module { code: msg.module };
        self.run(ctx, msg.signer, payload, events).await
    }

    async fn run(
        &self,
        ctx: &ExecContext,
        sender: Address,
        payload: Payload,
        events: &mut dyn EventSink,
    ) -> Result<ExecutionReport, TxRejection> {
        let kind = payload.kind();
        let request = build_request(ctx.block, sender, payload);

        let guard = self.sessions.open(ctx.ledger.clone(), ctx.block.height);
        let session = guard.id();
        debug!(
            session,
            kind = kind.as_str(),
            height = ctx.block.height,
            state = RequestState::Sent.as_str(),
            "vm request"
        );
        let reply = self.exec.execute(session, request).await;
        let storage_fault = guard.session().storage_fault();
        // Later data-source calls for this session must find nothing.
        drop(guard);
        if let Some(e) = storage_fault {
            // Whatever the VM answered, it answered from an incomplete view.
            self.halt(session, VmFault::Storage(e));
        }

        let wire = match reply {
            Ok(wire) => wire,
            Err(ExecError::Violation(violation)) => {
                warn!(session, kind = kind.as_str(), error = %violation, "rejecting vm response");
                return Err(violation.into());
            }
            Err(ExecError::Fault(fault)) => self.halt(session, fault),
        };
        let result = processor::validate(wire).map_err(|violation| {
            warn!(session, kind = kind.as_str(), error = %violation, "rejecting vm response");
            TxRejection::from(violation)
        })?;

        let outcome = match processor::process(ctx.ledger.as_ref(), result, events) {
            Ok(outcome) => outcome,
            Err(e) => self.halt(session, VmFault::Storage(e.to_string())),
        };
        finish(session, kind, ctx.block.gas_limit, outcome)
    }

    fn halt(&self, session: SessionId, fault: VmFault) -> ! {
        error!(
            session,
            state = RequestState::Faulted.as_str(),
            error = %fault,
            "vm gave no verifiable answer; halting"
        );
        match self.fault_action {
            FaultAction::Panic => std::panic::panic_any(fault),
            FaultAction::Abort => std::process::abort(),
        }
    }
}

impl VmStorage for VmBridge {}

fn finish(
    session: SessionId,
    kind: PayloadKind,
    gas_limit: u64,
    outcome: Outcome,
) -> Result<ExecutionReport, TxRejection> {
    let state = outcome.state().as_str();
    match outcome {
        Outcome::Kept {
            gas_used,
            writes_applied,
            events_emitted,
        } => {
            info!(session, kind = kind.as_str(), state, gas_used, writes_applied, "vm execution");
            Ok(ExecutionReport {
                gas_used,
                writes_applied,
                events_emitted,
            })
        }
        Outcome::Discarded { gas_used, reason } => {
            info!(
                session,
                kind = kind.as_str(),
                state,
                gas_used,
                major_status = reason.major_status,
                "vm execution"
            );
            if reason.is_out_of_gas() {
                Err(TxRejection::OutOfGas {
                    gas_used,
                    gas_limit,
                })
            } else {
                Err(TxRejection::Discarded { gas_used, reason })
            }
        }
    }
}
