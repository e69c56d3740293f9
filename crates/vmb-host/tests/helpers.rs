//! Shared helpers for the bridge integration tests.
//!
//! Each integration test compiles this module separately, so some helpers
//! may look unused in a given test binary.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;
use tokio::task::JoinHandle;
use vmb_host::testvm::TestVm;
use vmb_host::{
    BridgeConfig, Endpoint, EventManager, ExecContext, ExecutionReport, MsgExecuteScript,
    TransportManager, TxRejection, VmBridge, VmFault,
};
use vmb_proto::ResponseEnvelope;
use vmb_store::{LedgerStore, MemLedger, PrefixIter, StoreError, StoreResult};
use vmb_types::{AccessPath, Address};

pub const GAS_LIMIT: u64 = 1_000_000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A bridge wired to a scripted VM over real sockets, with an in-memory
/// ledger standing in for the VM module's block state.
pub struct Harness {
    pub bridge: Arc<VmBridge>,
    pub transport: TransportManager,
    pub vm: TestVm,
    pub ledger: MemLedger,
    pub dir: TempDir,
}

impl Harness {
    pub async fn unix() -> Self {
        Self::unix_with(|_| {}).await
    }

    pub async fn unix_with(tweak: impl FnOnce(&mut BridgeConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let vm = TestVm::start(&Endpoint::unix(dir.path().join("vm.sock")))
            .await
            .unwrap();
        let mut config = BridgeConfig {
            vm_address: vm.endpoint().clone(),
            data_listen: Endpoint::unix(dir.path().join("ds.sock")),
            ..BridgeConfig::default()
        };
        tweak(&mut config);
        Self::start(dir, vm, config).await
    }

    pub async fn tcp() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let vm = TestVm::start(&Endpoint::tcp("127.0.0.1:0")).await.unwrap();
        let config = BridgeConfig {
            vm_address: vm.endpoint().clone(),
            data_listen: Endpoint::tcp("127.0.0.1:0"),
            ..BridgeConfig::default()
        };
        Self::start(dir, vm, config).await
    }

    async fn start(dir: TempDir, vm: TestVm, config: BridgeConfig) -> Self {
        init_tracing();
        let (bridge, transport) = VmBridge::connect(&config).await.unwrap();
        vm.set_data_source(transport.data_endpoint().clone());
        Self {
            bridge: Arc::new(bridge),
            transport,
            vm,
            ledger: MemLedger::new(),
            dir,
        }
    }

    pub fn ctx(&self, height: u64) -> ExecContext {
        ctx_over(&self.ledger, height)
    }

    pub async fn run_script(
        &self,
        height: u64,
        events: &mut EventManager,
    ) -> Result<ExecutionReport, TxRejection> {
        self.bridge
            .execute_script(&self.ctx(height), script(), events)
            .await
    }

    /// Run a script on a separate task so a fault can be observed as a panic.
    pub fn spawn_script(&self, height: u64) -> JoinHandle<Result<ExecutionReport, TxRejection>> {
        self.spawn_in(self.ctx(height))
    }

    pub fn spawn_in(&self, ctx: ExecContext) -> JoinHandle<Result<ExecutionReport, TxRejection>> {
        let bridge = self.bridge.clone();
        tokio::spawn(async move {
            let mut events = EventManager::new();
            bridge.execute_script(&ctx, script(), &mut events).await
        })
    }

    pub async fn shutdown(self) {
        self.transport.shutdown().await;
        self.vm.stop().await;
    }
}

pub fn ctx_over(ledger: &MemLedger, height: u64) -> ExecContext {
    ExecContext::new(height, 1_700_000_000 + height, GAS_LIMIT, Arc::new(ledger.clone()))
}

/// In-memory ledger whose reads or writes fail like a broken backend.
#[derive(Clone, Default)]
pub struct BrokenLedger {
    pub inner: MemLedger,
    fail_reads: bool,
    fail_writes: bool,
}

impl BrokenLedger {
    pub fn failing_reads() -> Self {
        Self {
            fail_reads: true,
            ..Self::default()
        }
    }

    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    fn check(&self, fail: bool, op: &str) -> StoreResult<()> {
        if fail {
            return Err(StoreError::Backend(format!("{op}: disk unavailable")));
        }
        Ok(())
    }
}

impl LedgerStore for BrokenLedger {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.check(self.fail_reads, "get")?;
        self.inner.get(key)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.check(self.fail_writes, "set")?;
        self.inner.set(key, value)
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.check(self.fail_writes, "delete")?;
        self.inner.delete(key)
    }

    fn iter_prefix(&self, prefix: &[u8]) -> StoreResult<PrefixIter> {
        self.check(self.fail_reads, "iter_prefix")?;
        self.inner.iter_prefix(prefix)
    }
}

pub fn signer() -> Address {
    Address::new([0xAA; 20])
}

pub fn script() -> MsgExecuteScript {
    MsgExecuteScript::new(signer(), vec![0xA1, 0x1C, 0xEB, 0x0B])
}

pub fn ap(n: u8) -> AccessPath {
    AccessPath::resource(Address::new([n; 20]), "0x1::Store::Value")
}

pub fn stored(ledger: &MemLedger, ap: &AccessPath) -> Option<Vec<u8>> {
    ledger.get(&ap.to_ledger_key()).unwrap()
}

/// Await a task that is expected to halt with a [`VmFault`] panic.
pub async fn expect_fault<T: std::fmt::Debug>(handle: JoinHandle<T>) -> VmFault {
    let err = handle.await.expect_err("bridge should have halted");
    assert!(err.is_panic(), "task ended without panicking: {err}");
    match err.into_panic().downcast::<VmFault>() {
        Ok(fault) => *fault,
        Err(_) => panic!("panic payload is not a VmFault"),
    }
}

pub fn error_code(resp: &ResponseEnvelope) -> Option<&str> {
    resp.error.as_ref().map(|e| e.code.as_str())
}
