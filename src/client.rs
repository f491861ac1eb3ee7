//! Process-wide connection state: the active signer, the providers per chain
//! and the active chain.
//!
//! State lives in a [`Client`] store. Every write bumps a version number and
//! notifies subscribers synchronously, after the lock is released. Readers
//! take a fresh [`ClientState`] snapshot per operation instead of holding on
//! to one across awaits.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{ContractError, Result},
    ethereum::{ChainProvider, ChainSigner, Connector},
};

/// True when both handles point at the same allocation.
pub fn same_instance<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub id: u64,
    pub name: String,
    pub explorer_url: Option<String>,
}

/// The connector currently providing a signer.
#[derive(Clone, Debug)]
pub struct Connection {
    pub connector: Arc<dyn Connector>,
    pub signer: Arc<dyn ChainSigner>,
    pub chain_id: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ClientState {
    pub version: u64,
    pub chains: Vec<Chain>,
    pub default_chain_id: u64,
    pub providers: HashMap<u64, Arc<dyn ChainProvider>>,
    pub ws_providers: HashMap<u64, Arc<dyn ChainProvider>>,
    pub connection: Option<Connection>,
}

impl ClientState {
    /// The connected chain, or the default chain while disconnected.
    pub fn active_chain_id(&self) -> u64 {
        self.connection
            .as_ref()
            .map(|c| c.chain_id)
            .unwrap_or(self.default_chain_id)
    }

    pub fn chain_id(&self, requested: Option<u64>) -> u64 {
        requested.unwrap_or_else(|| self.active_chain_id())
    }

    pub fn provider(&self, chain_id: Option<u64>) -> Result<Arc<dyn ChainProvider>> {
        let chain_id = self.chain_id(chain_id);
        self.providers
            .get(&chain_id)
            .cloned()
            .ok_or(ContractError::ChainNotConfigured(chain_id))
    }

    pub fn ws_provider(&self, chain_id: Option<u64>) -> Option<Arc<dyn ChainProvider>> {
        self.ws_providers.get(&self.chain_id(chain_id)).cloned()
    }

    pub fn signer(&self) -> Option<Arc<dyn ChainSigner>> {
        self.connection.as_ref().map(|c| c.signer.clone())
    }

    pub fn chain(&self, chain_id: u64) -> Option<&Chain> {
        self.chains.iter().find(|c| c.id == chain_id)
    }

    /// Human-readable label, `Chain <id>` when the chain is unknown.
    pub fn chain_label(&self, chain_id: u64) -> String {
        self.chain(chain_id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| format!("Chain {chain_id}"))
    }

    pub fn explorer_url(&self, chain_id: u64) -> Option<String> {
        self.chain(chain_id).and_then(|c| c.explorer_url.clone())
    }
}

type Listener = Arc<dyn Fn(&ClientState, &ClientState) + Send + Sync>;

struct Inner {
    state: RwLock<ClientState>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
}

/// Shared handle to the connection state store.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Client")
            .field("version", &state.version)
            .field("active_chain_id", &state.active_chain_id())
            .field("connected", &state.connection.is_some())
            .finish()
    }
}

impl Client {
    pub fn new(state: ClientState) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> ClientState {
        self.inner.state.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.inner.state.read().version
    }

    /// Applies `update`, bumps the version and notifies subscribers.
    pub fn set_state(&self, update: impl FnOnce(&mut ClientState)) {
        let (previous, next) = {
            let mut state = self.inner.state.write();
            let previous = state.clone();
            update(&mut state);
            state.version = previous.version + 1;
            (previous, state.clone())
        };

        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&next, &previous);
        }
    }

    /// Calls `listener(next, previous)` after every state change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ClientState, &ClientState) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Calls `listener(next, previous)` when the selected slice changes
    /// according to `equal`.
    pub fn subscribe_with_selector<T, S, E, F>(
        &self,
        selector: S,
        equal: E,
        listener: F,
    ) -> Subscription
    where
        T: 'static,
        S: Fn(&ClientState) -> T + Send + Sync + 'static,
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
        F: Fn(T, T) + Send + Sync + 'static,
    {
        self.subscribe(move |next, previous| {
            let next = selector(next);
            let previous = selector(previous);
            if !equal(&next, &previous) {
                listener(next, previous);
            }
        })
    }

    /// Connects `connector` and makes its signer the active one.
    pub async fn connect(
        &self,
        connector: Arc<dyn Connector>,
        chain_id: Option<u64>,
    ) -> Result<Arc<dyn ChainSigner>> {
        let signer = connector.connect(chain_id).await?;
        let chain_id = signer.chain_id();
        info!(
            connector = connector.id(),
            address = %signer.address(),
            chain_id,
            "connected"
        );
        let active = signer.clone();
        self.set_state(move |state| {
            state.connection = Some(Connection {
                connector,
                signer: active,
                chain_id,
            });
        });
        Ok(signer)
    }

    /// Drops the active signer. A no-op while disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(connection) = self.state().connection else {
            return Ok(());
        };
        self.set_state(|state| state.connection = None);
        connection.connector.disconnect().await?;
        debug!(connector = connection.connector.id(), "disconnected");
        Ok(())
    }

    /// Asks the active connector to move to `chain_id`.
    pub async fn switch_chain(&self, chain_id: u64) -> Result<Arc<dyn ChainSigner>> {
        let connection = self
            .state()
            .connection
            .ok_or(ContractError::ConnectorNotFound)?;
        let signer = connection.connector.switch_chain(chain_id).await?;
        let connector = connection.connector.clone();
        let active = signer.clone();
        self.set_state(move |state| {
            state.connection = Some(Connection {
                connector,
                signer: active,
                chain_id,
            });
        });
        info!(chain_id, "switched chain");
        Ok(signer)
    }
}

/// Handle for a store subscription. Unsubscribes on drop.
pub struct Subscription {
    inner: Weak<Inner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[derive(Default)]
pub struct ClientBuilder {
    state: ClientState,
}

impl ClientBuilder {
    pub fn chain(mut self, chain: Chain) -> Self {
        self.state.chains.retain(|c| c.id != chain.id);
        self.state.chains.push(chain);
        self
    }

    pub fn chains(self, chains: impl IntoIterator<Item = Chain>) -> Self {
        chains.into_iter().fold(self, Self::chain)
    }

    /// Registers an HTTP provider. The first one registered becomes the
    /// default chain unless [`default_chain`](Self::default_chain) is set.
    pub fn provider(mut self, provider: Arc<dyn ChainProvider>) -> Self {
        if self.state.providers.is_empty() && self.state.default_chain_id == 0 {
            self.state.default_chain_id = provider.chain_id();
        }
        self.state.providers.insert(provider.chain_id(), provider);
        self
    }

    pub fn ws_provider(mut self, provider: Arc<dyn ChainProvider>) -> Self {
        self.state.ws_providers.insert(provider.chain_id(), provider);
        self
    }

    pub fn default_chain(mut self, chain_id: u64) -> Self {
        self.state.default_chain_id = chain_id;
        self
    }

    pub fn build(self) -> Client {
        Client::new(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnector, MockProvider};
    use std::sync::atomic::AtomicUsize;

    fn client() -> Client {
        Client::builder()
            .chain(Chain {
                id: 1,
                name: "Ethereum".to_string(),
                explorer_url: Some("https://etherscan.io".to_string()),
            })
            .provider(MockProvider::new(1))
            .provider(MockProvider::new(5))
            .build()
    }

    #[test]
    fn labels_fall_back_to_chain_id() {
        let state = client().state();
        assert_eq!(state.chain_label(1), "Ethereum");
        assert_eq!(state.chain_label(69), "Chain 69");
        assert_eq!(state.explorer_url(1).as_deref(), Some("https://etherscan.io"));
    }

    #[test]
    fn providers_resolve_by_chain() {
        let state = client().state();
        assert_eq!(state.active_chain_id(), 1);
        assert_eq!(state.provider(None).unwrap().chain_id(), 1);
        assert_eq!(state.provider(Some(5)).unwrap().chain_id(), 5);
        assert!(matches!(
            state.provider(Some(10)),
            Err(ContractError::ChainNotConfigured(10))
        ));
        assert!(state.ws_provider(None).is_none());
    }

    #[test]
    fn set_state_bumps_version_and_notifies() {
        let client = client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = client.subscribe(move |next, previous| {
            sink.lock().push((previous.version, next.version));
        });

        client.set_state(|state| state.default_chain_id = 5);
        client.set_state(|state| state.default_chain_id = 1);
        assert_eq!(*seen.lock(), vec![(0, 1), (1, 2)]);

        subscription.unsubscribe();
        subscription.unsubscribe();
        client.set_state(|_| {});
        assert_eq!(seen.lock().len(), 2);
        assert_eq!(client.version(), 3);
    }

    #[test]
    fn selector_subscriptions_skip_equal_slices() {
        let client = client();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _subscription = client.subscribe_with_selector(
            |state| state.default_chain_id,
            |a, b| a == b,
            move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        client.set_state(|_| {});
        client.set_state(|state| state.default_chain_id = 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_may_read_the_store() {
        let client = client();
        let reader = client.clone();
        let observed = Arc::new(AtomicU64::new(0));
        let sink = observed.clone();
        let _subscription = client.subscribe(move |_, _| {
            sink.store(reader.version(), Ordering::SeqCst);
        });
        client.set_state(|_| {});
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connector_lifecycle_drives_the_connection() {
        let client = client();
        let connector = MockConnector::new(1);

        let signer = client.connect(connector.clone(), None).await.unwrap();
        let state = client.state();
        assert!(same_instance(&state.signer().unwrap(), &signer));
        assert_eq!(state.active_chain_id(), 1);

        let switched = client.switch_chain(5).await.unwrap();
        assert_eq!(switched.chain_id(), 5);
        assert_eq!(client.state().active_chain_id(), 5);
        assert!(!same_instance(&client.state().signer().unwrap(), &signer));

        client.disconnect().await.unwrap();
        assert!(client.state().signer().is_none());
        assert_eq!(connector.disconnects(), 1);
        client.disconnect().await.unwrap();
        assert_eq!(connector.disconnects(), 1);

        assert!(matches!(
            client.switch_chain(1).await,
            Err(ContractError::ConnectorNotFound)
        ));
    }
}
