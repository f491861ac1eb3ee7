use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use alloy::{json_abi::JsonAbi, primitives::Address};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::Unwatch;
use crate::{
    abi::select_event,
    client::{same_instance, Client, ClientState},
    contract::{AddressOrName, Contract, EventListener, EventSubscription, Runner},
    error::{ContractError, Result},
    ethereum::ChainProvider,
};

#[derive(Debug, Clone)]
pub struct WatchContractEventConfig {
    pub address: AddressOrName,
    pub abi: Arc<JsonAbi>,
    pub event_name: String,
    pub chain_id: Option<u64>,
    /// Deliver one event, then stop for good.
    pub once: bool,
}

impl WatchContractEventConfig {
    pub fn new(address: impl Into<AddressOrName>, abi: Arc<JsonAbi>, event_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            abi,
            event_name: event_name.into(),
            chain_id: None,
            once: false,
        }
    }
}

/// Socket provider when there is one, the polling provider otherwise.
fn event_provider(state: &ClientState, chain_id: Option<u64>) -> Option<Arc<dyn ChainProvider>> {
    state
        .ws_provider(chain_id)
        .or_else(|| state.provider(chain_id).ok())
}

fn same_provider(a: &Option<Arc<dyn ChainProvider>>, b: &Option<Arc<dyn ChainProvider>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => same_instance(a, b),
        (None, None) => true,
        _ => false,
    }
}

enum WatchState {
    Detached,
    Attached {
        provider: Arc<dyn ChainProvider>,
        subscription: EventSubscription,
    },
}

struct EventWatcher {
    address: Address,
    abi: Arc<JsonAbi>,
    event_name: String,
    once: bool,
    delivered: Arc<AtomicBool>,
    listener: EventListener,
    state: Mutex<WatchState>,
}

impl EventWatcher {
    /// Detaches from the current provider, then attaches to `provider`.
    fn on_provider_change(&self, provider: Option<Arc<dyn ChainProvider>>) -> Result<()> {
        let mut state = self.state.lock();
        Self::release(&mut state);

        let Some(provider) = provider else {
            return Ok(());
        };
        if self.once && self.delivered.load(Ordering::SeqCst) {
            return Ok(());
        }

        let contract = Contract::new(self.address, self.abi.clone(), Runner::Provider(provider.clone()));
        let subscription = contract.on(&self.event_name, self.deliver(), self.once)?;
        debug!(
            event = %self.event_name,
            address = %self.address,
            chain_id = provider.chain_id(),
            "attached event listener"
        );
        *state = WatchState::Attached {
            provider,
            subscription,
        };
        Ok(())
    }

    fn detach(&self) {
        Self::release(&mut self.state.lock());
    }

    fn release(state: &mut WatchState) {
        if let WatchState::Attached {
            provider,
            subscription,
        } = std::mem::replace(state, WatchState::Detached)
        {
            debug!(
                event = subscription.event(),
                chain_id = provider.chain_id(),
                "detached event listener"
            );
            subscription.off();
        }
    }

    fn deliver(&self) -> EventListener {
        let listener = self.listener.clone();
        let delivered = self.delivered.clone();
        let once = self.once;
        Arc::new(move |args| {
            if once && delivered.swap(true, Ordering::SeqCst) {
                return;
            }
            listener(args);
        })
    }
}

/// Calls `listener` for every `event_name` log emitted by the contract.
///
/// The listener follows the client's provider for the chain: whenever that
/// provider is replaced, the old listener is removed before a new one is
/// attached. An ENS target is resolved once, when the watch starts.
pub async fn watch_contract_event(
    client: &Client,
    config: WatchContractEventConfig,
    listener: EventListener,
) -> Result<Unwatch> {
    let state = client.state();
    let chain_id = state.chain_id(config.chain_id);
    if select_event(&config.abi, &config.event_name).is_none() {
        return Err(ContractError::ContractEventDoesNotExist {
            address: config.address.to_string(),
            event_name: config.event_name,
        });
    }
    let provider = event_provider(&state, config.chain_id)
        .ok_or(ContractError::ChainNotConfigured(chain_id))?;
    let address = config.address.resolve(&Runner::Provider(provider)).await?;

    let watcher = Arc::new(EventWatcher {
        address,
        abi: config.abi,
        event_name: config.event_name,
        once: config.once,
        delivered: Arc::new(AtomicBool::new(false)),
        listener,
        state: Mutex::new(WatchState::Detached),
    });

    let requested = config.chain_id;
    let handle = Handle::current();
    let subscription = {
        let watcher = watcher.clone();
        client.subscribe_with_selector(
            move |state| event_provider(state, requested),
            same_provider,
            move |next, _previous| {
                // store updates may come from outside the runtime
                let _runtime = handle.enter();
                if let Err(e) = watcher.on_provider_change(next) {
                    warn!(event = %watcher.event_name, "failed to re-attach listener: {}", e);
                }
            },
        )
    };

    watcher.on_provider_change(event_provider(&client.state(), requested))?;

    Ok(Unwatch::new(move || {
        subscription.unsubscribe();
        watcher.detach();
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture_abi_arc, settle, transfer_log, MockProvider, TOKEN};
    use std::sync::atomic::AtomicUsize;

    fn counting_listener() -> (EventListener, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let listener: EventListener = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (listener, count)
    }

    fn replace_provider(client: &Client, provider: &Arc<MockProvider>) {
        let provider: Arc<dyn ChainProvider> = provider.clone();
        client.set_state(move |state| {
            state.providers.insert(provider.chain_id(), provider);
        });
    }

    #[tokio::test]
    async fn unknown_events_are_rejected() {
        let client = Client::builder().provider(MockProvider::new(1)).build();
        let (listener, _) = counting_listener();
        let config = WatchContractEventConfig::new(TOKEN, fixture_abi_arc(), "Approval");
        assert!(matches!(
            watch_contract_event(&client, config, listener).await,
            Err(ContractError::ContractEventDoesNotExist { .. })
        ));
    }

    #[tokio::test]
    async fn prefers_the_socket_provider() {
        let http = MockProvider::new(1);
        let ws = MockProvider::websocket(1);
        let client = Client::builder()
            .provider(http.clone())
            .ws_provider(ws.clone())
            .build();
        let (listener, count) = counting_listener();
        let _unwatch = watch_contract_event(
            &client,
            WatchContractEventConfig::new(TOKEN, fixture_abi_arc(), "Transfer"),
            listener,
        )
        .await
        .unwrap();
        settle().await;

        assert_eq!(ws.active_log_watchers(), 1);
        assert_eq!(http.active_log_watchers(), 0);
        ws.emit(transfer_log(Address::ZERO, TOKEN, 1));
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn provider_changes_reattach_without_duplicates() {
        let first = MockProvider::new(1);
        let client = Client::builder().provider(first.clone()).build();
        let (listener, count) = counting_listener();
        let unwatch = watch_contract_event(
            &client,
            WatchContractEventConfig::new(TOKEN, fixture_abi_arc(), "Transfer"),
            listener,
        )
        .await
        .unwrap();
        settle().await;
        assert_eq!(first.active_log_watchers(), 1);

        let second = MockProvider::new(1);
        replace_provider(&client, &second);
        settle().await;
        assert_eq!(first.active_log_watchers(), 0);
        assert_eq!(second.active_log_watchers(), 1);

        // unrelated updates keep the same listener
        client.set_state(|_| {});
        settle().await;
        assert_eq!(second.active_log_watchers(), 1);

        assert_eq!(first.emit(transfer_log(Address::ZERO, TOKEN, 1)), 0);
        second.emit(transfer_log(Address::ZERO, TOKEN, 2));
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        unwatch.unwatch();
        unwatch.unwatch();
        settle().await;
        assert_eq!(second.active_log_watchers(), 0);

        replace_provider(&client, &first);
        settle().await;
        assert_eq!(first.active_log_watchers(), 0);
    }

    #[tokio::test]
    async fn once_delivers_a_single_event_and_does_not_rearm() {
        let first = MockProvider::new(1);
        let client = Client::builder().provider(first.clone()).build();
        let (listener, count) = counting_listener();
        let mut config = WatchContractEventConfig::new(TOKEN, fixture_abi_arc(), "Transfer");
        config.once = true;
        let _unwatch = watch_contract_event(&client, config, listener).await.unwrap();
        settle().await;

        first.emit(transfer_log(Address::ZERO, TOKEN, 1));
        settle().await;
        first.emit(transfer_log(Address::ZERO, TOKEN, 2));
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let second = MockProvider::new(1);
        replace_provider(&client, &second);
        settle().await;
        assert_eq!(second.active_log_watchers(), 0);
    }

    #[tokio::test]
    async fn once_moves_with_the_provider_until_delivered() {
        let first = MockProvider::new(1);
        let client = Client::builder().provider(first.clone()).build();
        let (listener, count) = counting_listener();
        let mut config = WatchContractEventConfig::new(TOKEN, fixture_abi_arc(), "Transfer");
        config.once = true;
        let _unwatch = watch_contract_event(&client, config, listener).await.unwrap();
        settle().await;

        let second = MockProvider::new(1);
        replace_provider(&client, &second);
        settle().await;
        assert_eq!(first.active_log_watchers(), 0);
        assert_eq!(second.active_log_watchers(), 1);

        second.emit(transfer_log(Address::ZERO, TOKEN, 3));
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
