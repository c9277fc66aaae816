use crate::{
    config::Settings,
    connext::ConnextClient,
    lnd::LndClient,
    swap_client::{self, SwapClient, SwapClientError, SwapClientType, TradingLimits},
    units::UnitConverter,
};
use anyhow::Context;
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinHandle;

/// Routes each currency to the client that pays in it. One client may serve
/// several currencies, as Connext does for all of its tokens.
pub struct SwapClientManager {
    clients: BTreeMap<String, Arc<dyn SwapClient>>,
    converter: Arc<UnitConverter>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SwapClientManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapClientManager")
            .field("currencies", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SwapClientManager {
    pub fn new(converter: Arc<UnitConverter>) -> Self {
        Self {
            clients: BTreeMap::new(),
            converter,
            watchers: Mutex::new(Vec::new()),
        }
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let converter = Arc::new(UnitConverter::new(&settings.currencies));
        let mut manager = Self::new(Arc::clone(&converter));

        let tokens: HashMap<String, String> = settings
            .currencies
            .iter()
            .filter(|currency| currency.swap_client == SwapClientType::Connext)
            .filter_map(|currency| {
                currency
                    .token_address
                    .clone()
                    .map(|address| (currency.id.clone(), address))
            })
            .collect();

        if let Some(connext) = &settings.connext {
            if !tokens.is_empty() {
                let client: Arc<dyn SwapClient> = Arc::new(
                    ConnextClient::new(connext, tokens.clone(), Arc::clone(&converter))
                        .context("failed to create connext client")?,
                );
                for currency in tokens.keys() {
                    manager.register(currency.clone(), Arc::clone(&client));
                }
            }
        }

        for lnd in &settings.lnd {
            let client = LndClient::new(lnd)
                .with_context(|| format!("failed to create lnd client for {}", lnd.currency))?;
            manager.register(lnd.currency.clone(), Arc::new(client));
        }

        Ok(manager)
    }

    pub fn register(&mut self, currency: impl Into<String>, client: Arc<dyn SwapClient>) {
        let currency = currency.into();
        tracing::debug!(%currency, client = %client.client_type(), "registered swap client");
        self.clients.insert(currency, client);
    }

    pub fn get(&self, currency: &str) -> Option<Arc<dyn SwapClient>> {
        self.clients.get(currency).cloned()
    }

    pub fn currencies(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    pub fn converter(&self) -> &UnitConverter {
        &self.converter
    }

    /// Every distinct client, however many currencies it serves.
    pub fn unique_clients(&self) -> Vec<Arc<dyn SwapClient>> {
        let mut unique: Vec<Arc<dyn SwapClient>> = Vec::new();
        for client in self.clients.values() {
            let seen = unique
                .iter()
                .any(|known| Arc::as_ptr(known) as *const () == Arc::as_ptr(client) as *const ());
            if !seen {
                unique.push(Arc::clone(client));
            }
        }
        unique
    }

    /// Initializes every client. A client that cannot initialize, e.g. for
    /// lack of credentials, is logged and left `NotInitialized`.
    pub async fn init(&self) {
        for client in self.unique_clients() {
            if let Err(e) = client.init_specific().await {
                tracing::error!(client = %client.client_type(), "failed to initialize: {}", e);
            }
        }
    }

    pub fn spawn_connection_watchers(&self, interval: Duration) {
        let mut watchers = self.watchers.lock();
        for client in self.unique_clients() {
            watchers.push(tokio::spawn(swap_client::watch_connection(client, interval)));
        }
    }

    pub async fn trading_limits(&self, currency: &str) -> Result<TradingLimits, SwapClientError> {
        let client = self
            .get(currency)
            .ok_or_else(|| SwapClientError::unsupported_currency(currency))?;

        client.trading_limits(currency).await
    }

    /// Stops reconnecting and disconnects every client.
    pub async fn disconnect(&self) {
        let watchers = std::mem::take(&mut *self.watchers.lock());
        for watcher in watchers {
            watcher.abort();
        }

        for client in self.unique_clients() {
            client.disconnect().await;
        }
    }
}
