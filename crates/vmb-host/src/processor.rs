//! Turning one VM execution into ledger writes and events.
//!
//! Validation runs over the whole write-set before the first mutation, so a
//! rejected response leaves the ledger byte-identical.

use base64::prelude::*;
use tracing::debug;
use vmb_proto::{WireExecution, WireStatus, WireWriteKind, WireWriteOp};
use vmb_store::{LedgerStore, StoreResult};
use vmb_types::{AccessPath, Address, DiscardReason, ExecStatus, ExecutionResult, WriteKind, WriteOp};

use crate::error::ProtocolViolation;
use crate::events::{EventSink, discard_event, keep_event};

/// Where a request is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Sent,
    Kept,
    Discarded,
    Faulted,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Sent => "sent",
            RequestState::Kept => "kept",
            RequestState::Discarded => "discarded",
            RequestState::Faulted => "faulted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Kept {
        gas_used: u64,
        writes_applied: usize,
        events_emitted: usize,
    },
    Discarded {
        gas_used: u64,
        reason: DiscardReason,
    },
}

impl Outcome {
    pub fn state(&self) -> RequestState {
        match self {
            Outcome::Kept { .. } => RequestState::Kept,
            Outcome::Discarded { .. } => RequestState::Discarded,
        }
    }

    pub fn gas_used(&self) -> u64 {
        match self {
            Outcome::Kept { gas_used, .. } | Outcome::Discarded { gas_used, .. } => *gas_used,
        }
    }
}

/// Decode and check a wire execution. A discarded execution keeps only its
/// reason; any write-set or events it carries are dropped unread.
pub fn validate(exec: WireExecution) -> Result<ExecutionResult, ProtocolViolation> {
    match exec.status {
        WireStatus::Keep => {
            let write_set = exec
                .write_set
                .iter()
                .enumerate()
                .map(|(index, op)| decode_write_op(index, op))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ExecutionResult {
                status: ExecStatus::Keep,
                gas_used: exec.gas_used,
                write_set,
                events: exec.events,
            })
        }
        WireStatus::Discard => {
            let reason = exec.discard.ok_or(ProtocolViolation::MissingDiscardReason)?;
            if !exec.write_set.is_empty() || !exec.events.is_empty() {
                debug!(
                    writes = exec.write_set.len(),
                    events = exec.events.len(),
                    "ignoring effects of discarded execution"
                );
            }
            Ok(ExecutionResult {
                status: ExecStatus::Discard(reason),
                gas_used: exec.gas_used,
                write_set: Vec::new(),
                events: Vec::new(),
            })
        }
    }
}

fn decode_write_op(index: usize, op: &WireWriteOp) -> Result<WriteOp, ProtocolViolation> {
    let malformed = |reason: String| ProtocolViolation::MalformedWriteOp { index, reason };

    let address = Address::from_hex(&op.address).map_err(|e| malformed(e.to_string()))?;
    let path = BASE64_STANDARD
        .decode(&op.path)
        .map_err(|e| malformed(format!("path: {e}")))?;
    if path.is_empty() {
        return Err(malformed("empty path".into()));
    }
    let access_path = AccessPath::new(address, path);

    match (op.kind, &op.value) {
        (WireWriteKind::Write, Some(value)) => {
            let value = BASE64_STANDARD
                .decode(value)
                .map_err(|e| malformed(format!("value: {e}")))?;
            Ok(WriteOp::write(access_path, value))
        }
        (WireWriteKind::Write, None) => Err(malformed("write without value".into())),
        (WireWriteKind::Delete, None) => Ok(WriteOp::delete(access_path)),
        (WireWriteKind::Delete, Some(_)) => Err(malformed("delete with value".into())),
    }
}

/// Apply operations in order; a key touched twice ends with the later op.
pub fn apply_write_set(ledger: &dyn LedgerStore, ops: &[WriteOp]) -> StoreResult<()> {
    for op in ops {
        let key = op.access_path.to_ledger_key();
        match &op.kind {
            WriteKind::Write(value) => ledger.set(&key, value)?,
            WriteKind::Delete => ledger.delete(&key)?,
        }
    }
    Ok(())
}

/// Commit a validated result: writes and events for `Keep`, a single
/// diagnostic event for `Discard`.
pub fn process(
    ledger: &dyn LedgerStore,
    result: ExecutionResult,
    sink: &mut dyn EventSink,
) -> StoreResult<Outcome> {
    match result.status {
        ExecStatus::Keep => {
            apply_write_set(ledger, &result.write_set)?;
            let events_emitted = result.events.len();
            for event in result.events {
                sink.emit(event);
            }
            sink.emit(keep_event(result.gas_used));
            Ok(Outcome::Kept {
                gas_used: result.gas_used,
                writes_applied: result.write_set.len(),
                events_emitted,
            })
        }
        ExecStatus::Discard(reason) => {
            sink.emit(discard_event(result.gas_used, &reason));
            Ok(Outcome::Discarded {
                gas_used: result.gas_used,
                reason,
            })
        }
    }
}
