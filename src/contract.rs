//! Contract handles: an address and an ABI bound to a signer or provider.

use std::{fmt, str::FromStr, sync::Arc};

use alloy::{
    dyn_abi::{DynSolValue, EventExt},
    json_abi::{Event, Function, JsonAbi},
    primitives::{Address, U256},
    rpc::types::{Filter, Log, TransactionRequest},
};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    abi::{
        select_event, select_function, value, ArgumentShape, FunctionShape, Selection, ValueShape,
    },
    client::{same_instance, ClientState},
    error::{ContractError, Result},
    ethereum::{utils, ChainProvider, ChainSigner},
};

/// A contract target: a literal address or an ENS name resolved at call time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddressOrName {
    Address(Address),
    Name(String),
}

impl FromStr for AddressOrName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        if s.starts_with("0x") || s.starts_with("0X") {
            return utils::validate_address(s).map(Self::Address);
        }
        if utils::looks_like_ens_name(s) {
            return Ok(Self::Name(s.to_string()));
        }
        Err(anyhow::anyhow!(
            "'{}' is neither an address nor an ENS name",
            s
        ))
    }
}

impl From<Address> for AddressOrName {
    fn from(address: Address) -> Self {
        Self::Address(address)
    }
}

impl fmt::Display for AddressOrName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(address) => write!(f, "{}", address.to_checksum(None)),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl AddressOrName {
    pub async fn resolve(&self, runner: &Runner) -> Result<Address> {
        match self {
            Self::Address(address) => Ok(*address),
            Self::Name(name) => Ok(runner.resolve_name(name).await?),
        }
    }
}

/// Transaction fields layered over an encoded call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallOverrides {
    pub from: Option<Address>,
    pub value: Option<U256>,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub nonce: Option<u64>,
    /// Block to read at. Ignored for writes.
    pub block_number: Option<u64>,
}

impl CallOverrides {
    pub fn apply(&self, mut tx: TransactionRequest) -> TransactionRequest {
        if let Some(from) = self.from {
            tx.from = Some(from);
        }
        if let Some(value) = self.value {
            tx.value = Some(value);
        }
        if let Some(gas) = self.gas_limit {
            tx.gas = Some(gas);
        }
        if let Some(gas_price) = self.gas_price {
            tx.gas_price = Some(gas_price);
        }
        if let Some(max_fee) = self.max_fee_per_gas {
            tx.max_fee_per_gas = Some(max_fee);
        }
        if let Some(priority_fee) = self.max_priority_fee_per_gas {
            tx.max_priority_fee_per_gas = Some(priority_fee);
        }
        if let Some(nonce) = self.nonce {
            tx.nonce = Some(nonce);
        }
        tx
    }
}

/// What a contract handle executes through.
#[derive(Clone, Debug)]
pub enum Runner {
    /// Signs writes. Calls and subscriptions go through `provider`.
    Signer {
        signer: Arc<dyn ChainSigner>,
        provider: Option<Arc<dyn ChainProvider>>,
    },
    Provider(Arc<dyn ChainProvider>),
}

impl Runner {
    pub fn from_signer(signer: Arc<dyn ChainSigner>) -> Self {
        Self::Signer {
            signer,
            provider: None,
        }
    }

    /// Identity comparison: the same underlying instances, not equal ones.
    pub fn same_as(&self, other: &Runner) -> bool {
        match (self, other) {
            (
                Self::Signer {
                    signer: a,
                    provider: pa,
                },
                Self::Signer {
                    signer: b,
                    provider: pb,
                },
            ) => {
                same_instance(a, b)
                    && match (pa, pb) {
                        (Some(pa), Some(pb)) => same_instance(pa, pb),
                        (None, None) => true,
                        _ => false,
                    }
            }
            (Self::Provider(a), Self::Provider(b)) => same_instance(a, b),
            _ => false,
        }
    }

    pub fn signer(&self) -> Option<&Arc<dyn ChainSigner>> {
        match self {
            Self::Signer { signer, .. } => Some(signer),
            Self::Provider(_) => None,
        }
    }

    pub fn provider(&self) -> Option<&Arc<dyn ChainProvider>> {
        match self {
            Self::Provider(provider) => Some(provider),
            Self::Signer { provider, .. } => provider.as_ref(),
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Self::Signer { signer, .. } => signer.chain_id(),
            Self::Provider(provider) => provider.chain_id(),
        }
    }

    async fn resolve_name(&self, name: &str) -> anyhow::Result<Address> {
        match self {
            Self::Signer { signer, .. } => signer.resolve_name(name).await,
            Self::Provider(provider) => provider.resolve_name(name).await,
        }
    }
}

/// A decoded event delivered to listeners.
#[derive(Debug, Clone, Serialize)]
pub struct EventArgs {
    pub name: String,
    /// Every input in declaration order, indexed and non-indexed.
    pub args: Vec<Value>,
    pub named: Map<String, Value>,
    pub log: Log,
}

pub type EventListener = Arc<dyn Fn(EventArgs) + Send + Sync>;

/// A listener attached with [`Contract::on`]. Dropping it detaches.
#[derive(Debug)]
pub struct EventSubscription {
    event: String,
    task: JoinHandle<()>,
}

impl EventSubscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn off(self) {}
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A handle over one deployed contract.
///
/// Construction does no I/O. Functions are looked up in the ABI when called,
/// by bare name or full signature.
#[derive(Clone, Debug)]
pub struct Contract {
    address: Address,
    abi: Arc<JsonAbi>,
    runner: Runner,
    explorer_url: Option<String>,
}

impl Contract {
    pub fn new(address: Address, abi: Arc<JsonAbi>, runner: Runner) -> Self {
        Self {
            address,
            abi,
            runner,
            explorer_url: None,
        }
    }

    pub fn with_explorer(mut self, explorer_url: Option<String>) -> Self {
        self.explorer_url = explorer_url;
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &Arc<JsonAbi> {
        &self.abi
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Selects a function, narrowing overloads by argument count.
    pub fn function(&self, name: &str, arity: Option<usize>) -> Result<FunctionShape<'_>> {
        match select_function(&self.abi, name, arity) {
            Selection::Found(shape) => Ok(shape),
            Selection::Missing => Err(ContractError::ContractMethodDoesNotExist {
                address: self.address.to_checksum(None),
                function_name: name.to_string(),
                explorer_url: self.explorer_url.clone(),
            }),
            Selection::Ambiguous(candidates) => Err(ContractError::AmbiguousFunction {
                address: self.address.to_checksum(None),
                function_name: name.to_string(),
                candidates: candidates.iter().map(|f| f.signature()).collect(),
            }),
        }
    }

    pub fn event(&self, name: &str) -> Result<&Event> {
        select_event(&self.abi, name).ok_or_else(|| ContractError::ContractEventDoesNotExist {
            address: self.address.to_checksum(None),
            event_name: name.to_string(),
        })
    }

    /// Builds the unsigned transaction for `function` without sending it.
    pub fn populate_transaction(
        &self,
        function: &Function,
        args: &ArgumentShape,
        overrides: Option<&CallOverrides>,
    ) -> Result<TransactionRequest> {
        let data = value::encode_call(function, args)?;
        let mut tx = TransactionRequest::default()
            .to(self.address)
            .input(data.into());
        if let Some(signer) = self.runner.signer() {
            tx.from = Some(signer.address());
        }
        Ok(match overrides {
            Some(overrides) => overrides.apply(tx),
            None => tx,
        })
    }

    /// Executes `function` with `eth_call` and decodes the positional result.
    pub async fn call(
        &self,
        function: &Function,
        args: &ArgumentShape,
        overrides: Option<&CallOverrides>,
    ) -> Result<Vec<DynSolValue>> {
        let provider = self.runner.provider().ok_or_else(|| {
            ContractError::Provider(anyhow::anyhow!(
                "contract {} is bound to a signer without a provider and cannot perform calls",
                self.address
            ))
        })?;
        let tx = self.populate_transaction(function, args, overrides)?;
        let block = overrides.and_then(|o| o.block_number);
        debug!(function = %function.signature(), address = %self.address, "eth_call");
        let data = provider.call(&tx, block).await?;
        value::decode_output(function, &data)
    }

    pub async fn estimate_gas(
        &self,
        function: &Function,
        args: &ArgumentShape,
        overrides: Option<&CallOverrides>,
    ) -> Result<u64> {
        let tx = self.populate_transaction(function, args, overrides)?;
        let gas = match &self.runner {
            Runner::Signer { signer, .. } => signer.estimate_gas(&tx).await?,
            Runner::Provider(provider) => provider.estimate_gas(&tx).await?,
        };
        Ok(gas)
    }

    /// Attaches `listener` to `event_name`.
    ///
    /// The subscription runs on a background task, so this must be called
    /// from within a tokio runtime. With `once` the task ends after the first
    /// decoded event.
    pub fn on(
        &self,
        event_name: &str,
        listener: EventListener,
        once: bool,
    ) -> Result<EventSubscription> {
        let provider = self.runner.provider().cloned().ok_or_else(|| {
            ContractError::Provider(anyhow::anyhow!(
                "contract {} is bound to a signer without a provider and cannot subscribe to events",
                self.address
            ))
        })?;
        let event = self.event(event_name)?.clone();

        let mut filter = Filter::new().address(self.address);
        if !event.anonymous {
            filter = filter.event_signature(event.selector());
        }

        let label = event.name.clone();
        let task = tokio::spawn(async move {
            let mut logs = match provider.watch_logs(&filter).await {
                Ok(logs) => logs,
                Err(e) => {
                    warn!("Failed to subscribe to {} logs: {}", event.name, e);
                    return;
                }
            };
            while let Some(log) = logs.next().await {
                match decode_log(&event, log) {
                    Ok(args) => {
                        listener(args);
                        if once {
                            break;
                        }
                    }
                    Err(e) => warn!("Skipping undecodable {} log: {}", event.name, e),
                }
            }
            debug!("{} listener finished", event.name);
        });

        Ok(EventSubscription { event: label, task })
    }
}

/// Decodes a log, restoring declaration order across topics and data.
pub fn decode_log(event: &Event, log: Log) -> Result<EventArgs> {
    let decoded = event
        .decode_log_parts(
            log.inner.data.topics().iter().copied(),
            &log.inner.data.data,
            false,
        )
        .map_err(|source| ContractError::Decode {
            name: event.name.clone(),
            source,
        })?;

    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    let mut args = Vec::with_capacity(event.inputs.len());

    for input in &event.inputs {
        let item = if input.indexed {
            indexed.next()
        } else {
            body.next()
        };
        let Some(item) = item else {
            break;
        };
        let projected = match ValueShape::parse(&input.ty, &input.components) {
            // indexed dynamic values arrive as their hash
            Ok(shape) if !(input.indexed && matches!(item, DynSolValue::FixedBytes(..))) => {
                value::from_sol_value(&item, &shape)
            }
            _ => value::plain(&item),
        };
        args.push(projected);
    }
    let named = value::named_params(event.inputs.iter().map(|i| i.name.as_str()), &args);

    Ok(EventArgs {
        name: event.name.clone(),
        args,
        named,
        log,
    })
}

/// A contract handle that follows the client's active runner.
///
/// The underlying [`Contract`] is rebuilt whenever the active signer or
/// provider instance changes, so a handle never keeps using a disconnected
/// signer.
#[derive(Debug)]
pub struct ContractBinding {
    address: Address,
    abi: Arc<JsonAbi>,
    chain_id: Option<u64>,
    bound: Mutex<Option<Contract>>,
}

impl ContractBinding {
    pub fn new(address: Address, abi: Arc<JsonAbi>, chain_id: Option<u64>) -> Self {
        Self {
            address,
            abi,
            chain_id,
            bound: Mutex::new(None),
        }
    }

    /// Current handle, preferring the connected signer when it is on the
    /// binding's chain. The chain's provider stays attached for calls.
    pub fn contract(&self, state: &ClientState) -> Result<Contract> {
        let chain_id = state.chain_id(self.chain_id);
        let runner = match state.signer() {
            Some(signer) if signer.chain_id() == chain_id => Runner::Signer {
                signer,
                provider: state.provider(Some(chain_id)).ok(),
            },
            _ => Runner::Provider(state.provider(Some(chain_id))?),
        };

        let mut bound = self.bound.lock();
        if let Some(contract) = bound.as_ref() {
            if contract.runner.same_as(&runner) {
                return Ok(contract.clone());
            }
            debug!(address = %self.address, "runner changed, rebinding contract");
        }
        let contract = Contract::new(self.address, self.abi.clone(), runner)
            .with_explorer(state.explorer_url(chain_id));
        *bound = Some(contract.clone());
        Ok(contract)
    }
}
