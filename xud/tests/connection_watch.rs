use async_trait::async_trait;
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::{sync::watch, time};
use xud::{
    swap_client::{
        watch_connection, ChannelBalance, ClientStatus, CloseChannelRequest, ErrorKind,
        OpenChannelRequest, PaymentStatus, StatusNotifier, SwapClient, SwapClientError,
        SwapClientType, TradingLimits, WalletBalance,
    },
    swaps::{Secret, SecretHash, SwapDeal},
};

const INTERVAL: Duration = Duration::from_secs(5);

/// A backend whose connection checks succeed or fail as scripted.
struct FlakyClient {
    status: StatusNotifier,
    outcomes: Mutex<VecDeque<Result<(), SwapClientError>>>,
    attempts: Mutex<usize>,
}

impl FlakyClient {
    fn new(outcomes: Vec<Result<(), SwapClientError>>) -> Arc<Self> {
        Arc::new(Self {
            status: StatusNotifier::new(SwapClientType::Lnd),
            outcomes: Mutex::new(outcomes.into()),
            attempts: Mutex::new(0),
        })
    }

    fn refusing(times: usize) -> Arc<Self> {
        Self::new(
            (0..times)
                .map(|_| Err(SwapClientError::new(ErrorKind::ConnectionRefused, "refused")))
                .collect(),
        )
    }

    fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

#[async_trait]
impl SwapClient for FlakyClient {
    fn client_type(&self) -> SwapClientType {
        SwapClientType::Lnd
    }

    fn status(&self) -> ClientStatus {
        self.status.get()
    }

    fn subscribe(&self) -> watch::Receiver<ClientStatus> {
        self.status.subscribe()
    }

    fn is_currency_supported(&self, currency: &str) -> bool {
        currency == "BTC"
    }

    fn final_lock(&self) -> u64 {
        40
    }

    async fn init_specific(&self) -> Result<(), SwapClientError> {
        Ok(())
    }

    async fn verify_connection(&self) -> Result<(), SwapClientError> {
        *self.attempts.lock() += 1;

        let outcome = self.outcomes.lock().pop_front().unwrap_or(Ok(()));
        match &outcome {
            Ok(()) => self.status.set(ClientStatus::ConnectionVerified),
            Err(_) => self.status.set(ClientStatus::Disconnected),
        }
        outcome
    }

    async fn disconnect(&self) {
        self.status.set(ClientStatus::Disconnected);
    }

    async fn channel_balance(
        &self,
        _currency: Option<&str>,
    ) -> Result<ChannelBalance, SwapClientError> {
        unimplemented!()
    }

    async fn wallet_balance(
        &self,
        _currency: Option<&str>,
    ) -> Result<WalletBalance, SwapClientError> {
        unimplemented!()
    }

    async fn trading_limits(&self, _currency: &str) -> Result<TradingLimits, SwapClientError> {
        unimplemented!()
    }

    fn total_outbound_amount(&self, _currency: &str) -> u64 {
        0
    }

    fn max_channel_outbound_amount(&self, _currency: &str) -> u64 {
        0
    }

    fn max_channel_inbound_amount(&self, _currency: &str) -> u64 {
        0
    }

    async fn update_capacity(&self) {}

    async fn send_payment(&self, _deal: &SwapDeal) -> Result<Secret, SwapClientError> {
        unimplemented!()
    }

    async fn send_smallest_amount(
        &self,
        _r_hash: SecretHash,
        _destination: &str,
        _currency: &str,
    ) -> Result<Secret, SwapClientError> {
        unimplemented!()
    }

    async fn lookup_payment(
        &self,
        _r_hash: SecretHash,
        _currency: &str,
    ) -> Result<PaymentStatus, SwapClientError> {
        unimplemented!()
    }

    async fn add_invoice(
        &self,
        _r_hash: SecretHash,
        _units: u128,
        _expiry: u64,
        _currency: &str,
    ) -> Result<(), SwapClientError> {
        unimplemented!()
    }

    async fn settle_invoice(
        &self,
        _r_hash: SecretHash,
        _r_preimage: Secret,
        _currency: &str,
    ) -> Result<(), SwapClientError> {
        unimplemented!()
    }

    async fn remove_invoice(&self, _r_hash: SecretHash) -> Result<(), SwapClientError> {
        unimplemented!()
    }

    async fn open_channel(&self, _request: OpenChannelRequest) -> Result<(), SwapClientError> {
        unimplemented!()
    }

    async fn close_channel(&self, _request: CloseChannelRequest) -> Result<(), SwapClientError> {
        unimplemented!()
    }
}

/// Lets the watcher run until it blocks again.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn unreachable_client_is_retried_every_interval() {
    let client = FlakyClient::refusing(2);
    let watcher = tokio::spawn(watch_connection(
        Arc::clone(&client) as Arc<dyn SwapClient>,
        INTERVAL,
    ));

    settle().await;
    assert_eq!(client.attempts(), 1);
    assert_eq!(client.status(), ClientStatus::Disconnected);

    time::advance(INTERVAL - Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(client.attempts(), 1);

    time::advance(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(client.attempts(), 2);

    time::advance(INTERVAL).await;
    settle().await;
    assert_eq!(client.attempts(), 3);
    assert_eq!(client.status(), ClientStatus::ConnectionVerified);

    watcher.abort();
}

#[tokio::test(start_paused = true)]
async fn verified_client_is_only_checked_again_once_disconnected() {
    let client = FlakyClient::refusing(0);
    let watcher = tokio::spawn(watch_connection(
        Arc::clone(&client) as Arc<dyn SwapClient>,
        INTERVAL,
    ));

    settle().await;
    time::advance(INTERVAL * 3).await;
    settle().await;
    assert_eq!(client.attempts(), 1);

    client.disconnect().await;
    settle().await;
    assert_eq!(client.attempts(), 1);

    time::advance(INTERVAL).await;
    settle().await;
    assert_eq!(client.attempts(), 2);
    assert_eq!(client.status(), ClientStatus::ConnectionVerified);

    watcher.abort();
}

#[tokio::test(start_paused = true)]
async fn client_without_credentials_is_given_up() {
    let client = FlakyClient::new(vec![Err(SwapClientError::missing_credentials(
        "no macaroon",
    ))]);

    watch_connection(Arc::clone(&client) as Arc<dyn SwapClient>, INTERVAL).await;

    assert_eq!(client.attempts(), 1);
}
