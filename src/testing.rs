//! Test doubles for the chain collaborators and a small NFT-like ABI.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use alloy::{
    dyn_abi::{DynSolValue, FunctionExt},
    json_abi::{Function, JsonAbi},
    primitives::{address, keccak256, Address, Bytes, LogData, TxHash, U256},
    rpc::types::{Filter, Log, TransactionRequest},
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{channel::mpsc, StreamExt};
use parking_lot::Mutex;

use crate::ethereum::{
    ChainProvider, ChainSigner, Connector, LogStream, ProviderKind, TransactionInfo,
};

pub const TOKEN: Address = address!("af0326d92b97df1221759476b072abfd8084f9be");

const FIXTURE_ABI: &str = r#"[
  {"type":"function","name":"balanceOf","stateMutability":"view",
   "inputs":[{"name":"owner","type":"address"}],
   "outputs":[{"name":"","type":"uint256"}]},
  {"type":"function","name":"name","stateMutability":"view",
   "inputs":[],"outputs":[{"name":"","type":"string"}]},
  {"type":"function","name":"ownerOf","stateMutability":"view",
   "inputs":[{"name":"tokenId","type":"uint256"}],
   "outputs":[{"name":"","type":"address"}]},
  {"type":"function","name":"getPosition","stateMutability":"view",
   "inputs":[],
   "outputs":[{"name":"position","type":"tuple","components":[
     {"name":"x","type":"uint256"},{"name":"y","type":"uint256"}]}]},
  {"type":"function","name":"getPair","stateMutability":"view",
   "inputs":[],
   "outputs":[{"name":"amount","type":"uint256"},{"name":"label","type":"string"}]},
  {"type":"function","name":"ping","stateMutability":"view","inputs":[],"outputs":[]},
  {"type":"function","name":"touch","stateMutability":"nonpayable","inputs":[],"outputs":[]},
  {"type":"function","name":"mint","stateMutability":"nonpayable","inputs":[],"outputs":[]},
  {"type":"function","name":"mint","stateMutability":"nonpayable",
   "inputs":[{"name":"tokenId","type":"uint256"}],"outputs":[]},
  {"type":"function","name":"transferFrom","stateMutability":"nonpayable",
   "inputs":[{"name":"from","type":"address"},{"name":"to","type":"address"},
             {"name":"tokenId","type":"uint256"}],
   "outputs":[]},
  {"type":"function","name":"setPosition","stateMutability":"nonpayable",
   "inputs":[{"name":"position","type":"tuple","components":[
     {"name":"x","type":"uint256"},{"name":"y","type":"uint256"}]}],
   "outputs":[]},
  {"type":"function","name":"burnAll","stateMutability":"nonpayable",
   "inputs":[{"name":"ids","type":"uint256[]"}],"outputs":[]},
  {"type":"function","name":"deposit","stateMutability":"payable","inputs":[],"outputs":[]},
  {"type":"event","name":"Transfer","anonymous":false,
   "inputs":[{"name":"from","type":"address","indexed":true},
             {"name":"to","type":"address","indexed":true},
             {"name":"tokenId","type":"uint256","indexed":false}]}
]"#;

pub fn fixture_abi() -> JsonAbi {
    serde_json::from_str(FIXTURE_ABI).expect("fixture ABI parses")
}

pub fn fixture_abi_arc() -> Arc<JsonAbi> {
    Arc::new(fixture_abi())
}

pub fn function(abi: &JsonAbi, signature: &str) -> Function {
    crate::abi::select_function(abi, signature, None)
        .found()
        .expect("fixture function exists")
        .function
        .clone()
}

/// A `Transfer(from, to, tokenId)` log emitted by [`TOKEN`].
pub fn transfer_log(from: Address, to: Address, token_id: u64) -> Log {
    let topics = vec![
        keccak256("Transfer(address,address,uint256)"),
        from.into_word(),
        to.into_word(),
    ];
    let data = Bytes::from(U256::from(token_id).to_be_bytes::<32>().to_vec());
    Log {
        inner: alloy::primitives::Log {
            address: TOKEN,
            data: LogData::new_unchecked(topics, data),
        },
        ..Default::default()
    }
}

/// Lets spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[derive(Debug)]
pub struct MockProvider {
    chain_id: u64,
    kind: ProviderKind,
    responses: Mutex<HashMap<[u8; 4], Bytes>>,
    calls: AtomicUsize,
    call_blocks: Mutex<Vec<Option<u64>>>,
    call_delay: Mutex<Option<Duration>>,
    block_number: AtomicU64,
    names: Mutex<HashMap<String, Address>>,
    log_senders: Mutex<Vec<mpsc::UnboundedSender<Log>>>,
    receipts: Mutex<HashMap<TxHash, TransactionInfo>>,
    receipt_polls: AtomicUsize,
}

impl MockProvider {
    fn with_kind(chain_id: u64, kind: ProviderKind) -> Arc<Self> {
        Arc::new(Self {
            chain_id,
            kind,
            responses: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            call_blocks: Mutex::new(Vec::new()),
            call_delay: Mutex::new(None),
            block_number: AtomicU64::new(1),
            names: Mutex::new(HashMap::new()),
            log_senders: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
            receipt_polls: AtomicUsize::new(0),
        })
    }

    pub fn new(chain_id: u64) -> Arc<Self> {
        Self::with_kind(chain_id, ProviderKind::Polling)
    }

    pub fn websocket(chain_id: u64) -> Arc<Self> {
        Self::with_kind(chain_id, ProviderKind::WebSocket)
    }

    /// Answers calls to `function` with `outputs`.
    pub fn respond(&self, function: &Function, outputs: &[DynSolValue]) {
        let data = function
            .abi_encode_output(outputs)
            .expect("outputs match the function");
        self.responses.lock().insert(function.selector().0, data.into());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_blocks(&self) -> Vec<Option<u64>> {
        self.call_blocks.lock().clone()
    }

    pub fn set_call_delay(&self, delay: Duration) {
        *self.call_delay.lock() = Some(delay);
    }

    pub fn set_block_number(&self, block: u64) {
        self.block_number.store(block, Ordering::SeqCst);
    }

    pub fn register_name(&self, name: &str, address: Address) {
        self.names.lock().insert(name.to_string(), address);
    }

    pub fn add_receipt(&self, info: TransactionInfo) {
        self.receipts.lock().insert(info.hash, info);
    }

    pub fn receipt_polls(&self) -> usize {
        self.receipt_polls.load(Ordering::SeqCst)
    }

    /// Delivers `log` to every open watcher, returning how many got it.
    pub fn emit(&self, log: Log) -> usize {
        let mut senders = self.log_senders.lock();
        senders.retain(|sender| sender.unbounded_send(log.clone()).is_ok());
        senders.len()
    }

    pub fn active_log_watchers(&self) -> usize {
        let mut senders = self.log_senders.lock();
        senders.retain(|sender| !sender.is_closed());
        senders.len()
    }
}

#[async_trait]
impl ChainProvider for MockProvider {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn call(&self, tx: &TransactionRequest, block: Option<u64>) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_blocks.lock().push(block);
        let delay = *self.call_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let input = tx.input.input().cloned().unwrap_or_default();
        let selector: [u8; 4] = input
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| anyhow!("execution reverted: missing selector"))?;
        self.responses
            .lock()
            .get(&selector)
            .cloned()
            .ok_or_else(|| anyhow!("execution reverted"))
    }

    async fn estimate_gas(&self, _tx: &TransactionRequest) -> Result<u64> {
        Ok(21_000)
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.block_number.load(Ordering::SeqCst))
    }

    async fn resolve_name(&self, name: &str) -> Result<Address> {
        self.names
            .lock()
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("ENS name {} does not resolve to an address", name))
    }

    async fn watch_logs(&self, _filter: &Filter) -> Result<LogStream> {
        let (sender, receiver) = mpsc::unbounded();
        self.log_senders.lock().push(sender);
        Ok(receiver.boxed())
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionInfo>> {
        self.receipt_polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.receipts.lock().get(&hash).cloned())
    }
}

#[derive(Debug)]
pub struct MockSigner {
    address: Address,
    chain_id: u64,
    gas: Mutex<std::result::Result<u64, String>>,
    estimates: AtomicUsize,
    sent: Mutex<Vec<TransactionRequest>>,
}

impl MockSigner {
    pub fn new(chain_id: u64) -> Arc<Self> {
        Self::with_address(chain_id, Address::repeat_byte(0xaa))
    }

    pub fn with_address(chain_id: u64, address: Address) -> Arc<Self> {
        Arc::new(Self {
            address,
            chain_id,
            gas: Mutex::new(Ok(50_000)),
            estimates: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_estimation(&self, reason: &str) {
        *self.gas.lock() = Err(reason.to_string());
    }

    pub fn estimate_count(&self) -> usize {
        self.estimates.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<TransactionRequest> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChainSigner for MockSigner {
    fn address(&self) -> Address {
        self.address
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn estimate_gas(&self, _tx: &TransactionRequest) -> Result<u64> {
        self.estimates.fetch_add(1, Ordering::SeqCst);
        self.gas.lock().clone().map_err(|reason| anyhow!(reason))
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash> {
        let mut sent = self.sent.lock();
        sent.push(tx);
        Ok(keccak256((sent.len() as u64).to_be_bytes()))
    }

    async fn resolve_name(&self, name: &str) -> Result<Address> {
        Err(anyhow!("ENS name {} does not resolve to an address", name))
    }
}

#[derive(Debug)]
pub struct MockConnector {
    chain_id: Mutex<u64>,
    signer: Mutex<Option<Arc<MockSigner>>>,
    disconnects: AtomicUsize,
}

impl MockConnector {
    pub fn new(chain_id: u64) -> Arc<Self> {
        Arc::new(Self {
            chain_id: Mutex::new(chain_id),
            signer: Mutex::new(None),
            disconnects: AtomicUsize::new(0),
        })
    }

    /// The signer handed out by the last connect or switch.
    pub fn signer(&self) -> Option<Arc<MockSigner>> {
        self.signer.lock().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn issue(&self, chain_id: u64) -> Arc<dyn ChainSigner> {
        *self.chain_id.lock() = chain_id;
        let signer = MockSigner::new(chain_id);
        *self.signer.lock() = Some(signer.clone());
        signer
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn id(&self) -> &str {
        "mock"
    }

    fn name(&self) -> &str {
        "Mock"
    }

    async fn connect(&self, chain_id: Option<u64>) -> Result<Arc<dyn ChainSigner>> {
        let chain_id = chain_id.unwrap_or(*self.chain_id.lock());
        Ok(self.issue(chain_id))
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<Arc<dyn ChainSigner>> {
        Ok(self.issue(chain_id))
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        *self.signer.lock() = None;
        Ok(())
    }
}
