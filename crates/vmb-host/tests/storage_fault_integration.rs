use std::sync::Arc;
use std::time::Duration;

use vmb_host::testvm::{VmPlan, VmReply, VmStep};
use vmb_host::{ExecContext, VmFault};
use vmb_proto::{WireExecution, codes};
use vmb_types::{DiscardReason, WriteOp};

mod helpers;
use helpers::{BrokenLedger, GAS_LIMIT, Harness, ap, error_code, expect_fault};

#[tokio::test]
async fn failed_ledger_read_halts_even_when_vm_discards() {
    let h = Harness::unix().await;
    h.vm.push(
        VmPlan::reply(VmReply::Executions(vec![WireExecution::discard(
            7,
            DiscardReason::new(4016),
        )]))
        .step(VmStep::Get(ap(1))),
    );

    let ledger = BrokenLedger::failing_reads();
    let ctx = ExecContext::new(1, 0, GAS_LIMIT, Arc::new(ledger));
    let fault = expect_fault(h.spawn_in(ctx)).await;

    assert!(matches!(fault, VmFault::Storage(ref msg) if msg.contains("disk unavailable")));
    let exchanges = h
        .vm
        .wait_for_exchanges(1, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(error_code(&exchanges[0].response), Some(codes::STORAGE_ERROR));
    assert!(h.bridge.sessions().is_empty());
}

#[tokio::test]
async fn failed_ledger_read_halts_even_when_vm_keeps() {
    let h = Harness::unix().await;
    h.vm.push(
        VmPlan::keep(WireExecution::keep(
            3,
            &[WriteOp::write(ap(2), b"v".to_vec())],
            vec![],
        ))
        .step(VmStep::MultiGet(vec![ap(1), ap(2)])),
    );

    let ledger = BrokenLedger::failing_reads();
    let ctx = ExecContext::new(1, 0, GAS_LIMIT, Arc::new(ledger.clone()));
    let fault = expect_fault(h.spawn_in(ctx)).await;

    assert!(matches!(fault, VmFault::Storage(_)));
    assert!(ledger.inner.is_empty());
}

#[tokio::test]
async fn failed_ledger_write_while_applying_halts() {
    let h = Harness::unix().await;
    h.vm.push(VmPlan::keep(WireExecution::keep(
        4,
        &[WriteOp::write(ap(3), b"v".to_vec())],
        vec![],
    )));

    let ledger = BrokenLedger::failing_writes();
    let ctx = ExecContext::new(1, 0, GAS_LIMIT, Arc::new(ledger.clone()));
    let fault = expect_fault(h.spawn_in(ctx)).await;

    assert!(matches!(fault, VmFault::Storage(ref msg) if msg.contains("set")));
    assert!(ledger.inner.is_empty());
    assert!(h.bridge.sessions().is_empty());
}
