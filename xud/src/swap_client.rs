//! The capability set every payment backend implements.
//!
//! The coordinator is written once against [`SwapClient`]; each supported
//! network plugs in an adapter that normalises its own API and failure modes
//! onto this contract and onto [`ErrorKind`].

mod error;
pub mod http;
mod manager;

pub use self::{
    error::{ErrorKind, SwapClientError},
    manager::SwapClientManager,
};

use crate::swaps::{Secret, SecretHash, SwapDeal, SwapState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;

/// Capacity reported by backends that recollateralise on demand and therefore
/// have no meaningful ceiling.
pub const UNLIMITED_CAPACITY: u64 = u64::MAX;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SwapClientType {
    Lnd,
    Connext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientStatus {
    NotInitialized,
    Initialized,
    ConnectionVerified,
    Disconnected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelBalance {
    pub balance: u64,
    pub pending_open_balance: u64,
    pub inactive_balance: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WalletBalance {
    pub total_balance: u64,
    pub confirmed_balance: u64,
    pub unconfirmed_balance: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TradingLimits {
    pub max_sell: u64,
    pub max_buy: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentStatus {
    pub state: PaymentState,
    pub preimage: Option<Secret>,
}

impl PaymentStatus {
    pub fn pending() -> Self {
        Self {
            state: PaymentState::Pending,
            preimage: None,
        }
    }

    pub fn succeeded(preimage: Option<Secret>) -> Self {
        Self {
            state: PaymentState::Succeeded,
            preimage,
        }
    }

    pub fn failed() -> Self {
        Self {
            state: PaymentState::Failed,
            preimage: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenChannelRequest {
    pub currency: String,
    pub units: u128,
    /// Backend identity of the peer, required by channel-based networks.
    pub remote_identifier: Option<String>,
    pub uris: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseChannelRequest {
    pub currency: String,
    pub remote_identifier: Option<String>,
    /// Units to release; everything when absent.
    pub units: Option<u128>,
    /// Where released funds go, for backends that pay out on close.
    pub destination: Option<String>,
    pub force: bool,
}

#[async_trait]
pub trait SwapClient: Send + Sync + 'static {
    fn client_type(&self) -> SwapClientType;

    fn status(&self) -> ClientStatus;

    fn subscribe(&self) -> watch::Receiver<ClientStatus>;

    fn is_connected(&self) -> bool {
        self.status() == ClientStatus::ConnectionVerified
    }

    fn is_currency_supported(&self, currency: &str) -> bool;

    /// Lock timeout applied when this client pays the final hop of a swap.
    fn final_lock(&self) -> u64;

    async fn init_specific(&self) -> Result<(), SwapClientError>;

    /// One connectivity check. Leaves the client `ConnectionVerified` or
    /// `Disconnected`; retrying is left to [`watch_connection`].
    async fn verify_connection(&self) -> Result<(), SwapClientError>;

    async fn disconnect(&self);

    async fn channel_balance(
        &self,
        currency: Option<&str>,
    ) -> Result<ChannelBalance, SwapClientError>;

    async fn wallet_balance(&self, currency: Option<&str>)
        -> Result<WalletBalance, SwapClientError>;

    async fn trading_limits(&self, currency: &str) -> Result<TradingLimits, SwapClientError>;

    fn total_outbound_amount(&self, currency: &str) -> u64;

    fn max_channel_outbound_amount(&self, currency: &str) -> u64;

    fn max_channel_inbound_amount(&self, currency: &str) -> u64;

    /// Refreshes the cached capacity figures.
    async fn update_capacity(&self);

    /// Executes this node's leg of `deal` and returns the preimage.
    async fn send_payment(&self, deal: &SwapDeal) -> Result<Secret, SwapClientError>;

    async fn send_smallest_amount(
        &self,
        r_hash: SecretHash,
        destination: &str,
        currency: &str,
    ) -> Result<Secret, SwapClientError>;

    async fn lookup_payment(
        &self,
        r_hash: SecretHash,
        currency: &str,
    ) -> Result<PaymentStatus, SwapClientError>;

    async fn add_invoice(
        &self,
        r_hash: SecretHash,
        units: u128,
        expiry: u64,
        currency: &str,
    ) -> Result<(), SwapClientError>;

    async fn settle_invoice(
        &self,
        r_hash: SecretHash,
        r_preimage: Secret,
        currency: &str,
    ) -> Result<(), SwapClientError>;

    async fn remove_invoice(&self, r_hash: SecretHash) -> Result<(), SwapClientError>;

    async fn open_channel(&self, request: OpenChannelRequest) -> Result<(), SwapClientError>;

    async fn close_channel(&self, request: CloseChannelRequest) -> Result<(), SwapClientError>;
}

/// Checks the preconditions of `send_payment` and returns the destination.
///
/// A violation means the caller advanced the deal incorrectly; it is reported
/// as [`ErrorKind::AssertionViolation`] before any backend is contacted.
pub fn ensure_payable(deal: &SwapDeal) -> Result<&str, SwapClientError> {
    if deal.state() != SwapState::Active {
        return Err(SwapClientError::assertion(format!(
            "cannot send payment for deal {} in state {}",
            deal.r_hash(),
            deal.state()
        )));
    }

    deal.destination().ok_or_else(|| {
        SwapClientError::assertion(format!("deal {} has no destination", deal.r_hash()))
    })
}

/// Owner side of a client's status. Every change is published to
/// subscribers and logged.
#[derive(Debug)]
pub struct StatusNotifier {
    client: SwapClientType,
    sender: watch::Sender<ClientStatus>,
}

impl StatusNotifier {
    pub fn new(client: SwapClientType) -> Self {
        let (sender, _) = watch::channel(ClientStatus::NotInitialized);
        Self { client, sender }
    }

    pub fn get(&self) -> ClientStatus {
        *self.sender.borrow()
    }

    pub fn set(&self, status: ClientStatus) {
        let previous = self.sender.send_replace(status);
        if previous != status {
            tracing::info!(client = %self.client, from = %previous, to = %status, "swap client status changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientStatus> {
        self.sender.subscribe()
    }
}

/// Keeps `client` connected: verifies the connection, waits until it is
/// lost and then retries every `interval`. Never fails; a client without
/// credentials is given up on.
pub async fn watch_connection(client: Arc<dyn SwapClient>, interval: Duration) {
    let mut status = client.subscribe();

    loop {
        match client.verify_connection().await {
            Ok(()) => {
                while *status.borrow_and_update() == ClientStatus::ConnectionVerified {
                    if status.changed().await.is_err() {
                        return;
                    }
                }
                tracing::warn!(client = %client.client_type(), "connection lost");
            }
            Err(e) if e.kind == ErrorKind::MissingCredentials => {
                tracing::error!(client = %client.client_type(), "cannot connect: {}", e);
                return;
            }
            Err(e) => {
                tracing::warn!(
                    client = %client.client_type(),
                    "could not verify connection, retrying in {:?}: {}",
                    interval,
                    e
                );
            }
        }

        tokio::time::sleep(interval).await;
    }
}
