//! Adapter for an lnd node reached over its REST gateway. One client serves
//! exactly one currency.

mod api;

use self::api::{
    AddHoldInvoice, CancelInvoice, ChannelBalanceResponse, ConnectPeer, GetInfo, ListChannels,
    ListPayments, OpenChannel, PeerAddress, SendRequest, SendResponse, SettleInvoice,
    WalletBalanceResponse,
};
use crate::{
    config::LndSettings,
    swap_client::{
        ensure_payable,
        http::{self, classify_transport},
        ChannelBalance, ClientStatus, CloseChannelRequest, ErrorKind, OpenChannelRequest,
        PaymentStatus, StatusNotifier, SwapClient, SwapClientError, SwapClientType,
        TradingLimits, WalletBalance,
    },
    swaps::{Role, Secret, SecretHash, SwapDeal},
};
use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::RwLock;
use reqwest::{Method, RequestBuilder, Response};
use std::{path::PathBuf, time::Duration};
use tokio::sync::watch;

const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Capacity {
    total_outbound: u64,
    max_outbound: u64,
    max_inbound: u64,
}

impl Capacity {
    fn of(channels: &ListChannels) -> Self {
        channels
            .channels
            .iter()
            .filter(|channel| channel.active)
            .fold(Capacity::default(), |capacity, channel| Capacity {
                total_outbound: capacity.total_outbound.saturating_add(channel.local_balance),
                max_outbound: capacity.max_outbound.max(channel.local_balance),
                max_inbound: capacity.max_inbound.max(channel.remote_balance),
            })
    }
}

pub struct LndClient {
    http: reqwest::Client,
    base_url: String,
    currency: String,
    final_lock: u64,
    macaroon_path: Option<PathBuf>,
    no_macaroons: bool,
    macaroon: RwLock<Option<String>>,
    capacity: RwLock<Capacity>,
    status: StatusNotifier,
}

impl std::fmt::Debug for LndClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LndClient")
            .field("base_url", &self.base_url)
            .field("currency", &self.currency)
            .field("status", &self.status.get())
            .finish()
    }
}

impl LndClient {
    pub fn new(settings: &LndSettings) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs));
        if let Some(cert_path) = &settings.cert_path {
            let pem = std::fs::read(cert_path)
                .with_context(|| format!("failed to read tls cert {}", cert_path.display()))?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }

        Ok(Self {
            http: builder.build()?,
            base_url: settings.url.as_str().trim_end_matches('/').to_owned(),
            currency: settings.currency.clone(),
            final_lock: settings.final_lock,
            macaroon_path: settings.macaroon_path.clone(),
            no_macaroons: settings.no_macaroons,
            macaroon: RwLock::new(None),
            capacity: RwLock::new(Capacity::default()),
            status: StatusNotifier::new(SwapClientType::Lnd),
        })
    }

    fn ensure_currency(&self, currency: &str) -> Result<(), SwapClientError> {
        if currency == self.currency {
            Ok(())
        } else {
            Err(SwapClientError::unsupported_currency(currency))
        }
    }

    fn ensure_credentials(&self) -> Result<(), SwapClientError> {
        if self.no_macaroons || self.macaroon.read().is_some() {
            Ok(())
        } else {
            Err(SwapClientError::missing_credentials(format!(
                "no macaroon loaded for lnd {}",
                self.currency
            )))
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self
            .http
            .request(method, format!("{}{}", self.base_url, path));

        match self.macaroon.read().as_deref() {
            Some(macaroon) => request.header(MACAROON_HEADER, macaroon),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, SwapClientError> {
        let response = request.send().await.map_err(|e| {
            let error = classify_transport(e);
            if error.kind == ErrorKind::ConnectionRefused {
                self.status.set(ClientStatus::Disconnected);
            }
            error
        })?;

        http::check_status(response).await
    }

    async fn list_channels(&self) -> Result<ListChannels, SwapClientError> {
        let response = self.send(self.request(Method::GET, "/v1/channels")).await?;
        http::json(response, ErrorKind::Unexpected).await
    }

    async fn pay(
        &self,
        r_hash: SecretHash,
        units: u128,
        final_cltv_delta: u64,
        destination: &str,
    ) -> Result<Secret, SwapClientError> {
        let amount = u64::try_from(units).map_err(|_| {
            SwapClientError::new(
                ErrorKind::Unexpected,
                format!("{} units exceed the satoshi range", units),
            )
        })?;
        let body = SendRequest {
            dest_string: destination,
            amt: amount.to_string(),
            payment_hash_string: hex::encode(r_hash.as_bytes()),
            final_cltv_delta,
        };

        tracing::debug!(%r_hash, amount, final_cltv_delta, "sending lightning payment");
        let response = self
            .send(self.request(Method::POST, "/v1/channels/transactions").json(&body))
            .await?;
        let sent: SendResponse = http::json(response, ErrorKind::InvalidPaymentResponse).await?;

        if !sent.payment_error.is_empty() {
            return Err(classify_payment_error(&sent.payment_error));
        }

        let bytes = BASE64.decode(&sent.payment_preimage).map_err(|e| {
            SwapClientError::invalid_payment_response(format!("invalid preimage encoding: {}", e))
        })?;
        let preimage = Secret::from_slice(&bytes).map_err(|e| {
            SwapClientError::invalid_payment_response(format!("invalid preimage: {}", e))
        })?;
        if !r_hash.is_hash_of(&preimage) {
            return Err(SwapClientError::invalid_payment_response(format!(
                "preimage does not hash to {}",
                r_hash
            )));
        }

        Ok(preimage)
    }
}

fn classify_payment_error(message: &str) -> SwapClientError {
    let kind = if message.contains("insufficient") {
        ErrorKind::InsufficientBalance
    } else {
        ErrorKind::PaymentFailed
    };

    SwapClientError::new(kind, message)
}

#[async_trait]
impl SwapClient for LndClient {
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
        currency == self.currency
    }

    fn final_lock(&self) -> u64 {
        self.final_lock
    }

    async fn init_specific(&self) -> Result<(), SwapClientError> {
        if !self.no_macaroons {
            let path = self.macaroon_path.as_ref().ok_or_else(|| {
                SwapClientError::missing_credentials(format!(
                    "no macaroon path configured for lnd {}",
                    self.currency
                ))
            })?;
            let macaroon = std::fs::read(path).map_err(|e| {
                SwapClientError::missing_credentials(format!(
                    "failed to read macaroon {}: {}",
                    path.display(),
                    e
                ))
            })?;
            *self.macaroon.write() = Some(hex::encode(macaroon));
        }

        self.status.set(ClientStatus::Initialized);
        Ok(())
    }

    async fn verify_connection(&self) -> Result<(), SwapClientError> {
        self.ensure_credentials()?;

        let info: Result<GetInfo, SwapClientError> = async {
            let response = self.send(self.request(Method::GET, "/v1/getinfo")).await?;
            http::json(response, ErrorKind::Unexpected).await
        }
        .await;

        match info {
            Ok(info) => {
                if !info.synced_to_chain {
                    tracing::warn!(currency = %self.currency, "lnd is not synced to chain");
                }
                tracing::info!(
                    currency = %self.currency,
                    pubkey = %info.identity_pubkey,
                    alias = %info.alias,
                    "connected to lnd"
                );
                self.update_capacity().await;
                self.status.set(ClientStatus::ConnectionVerified);
                Ok(())
            }
            Err(e) => {
                self.status.set(ClientStatus::Disconnected);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        self.status.set(ClientStatus::Disconnected);
    }

    async fn channel_balance(
        &self,
        currency: Option<&str>,
    ) -> Result<ChannelBalance, SwapClientError> {
        if let Some(currency) = currency {
            self.ensure_currency(currency)?;
        }

        let response = self
            .send(self.request(Method::GET, "/v1/balance/channels"))
            .await?;
        let balance: ChannelBalanceResponse = http::json(response, ErrorKind::Unexpected).await?;
        let inactive_balance = self
            .list_channels()
            .await?
            .channels
            .iter()
            .filter(|channel| !channel.active)
            .fold(0u64, |sum, channel| sum.saturating_add(channel.local_balance));

        Ok(ChannelBalance {
            balance: balance.balance,
            pending_open_balance: balance.pending_open_balance,
            inactive_balance,
        })
    }

    async fn wallet_balance(
        &self,
        currency: Option<&str>,
    ) -> Result<WalletBalance, SwapClientError> {
        if let Some(currency) = currency {
            self.ensure_currency(currency)?;
        }

        let response = self
            .send(self.request(Method::GET, "/v1/balance/blockchain"))
            .await?;
        let balance: WalletBalanceResponse = http::json(response, ErrorKind::Unexpected).await?;

        Ok(WalletBalance {
            total_balance: balance.total_balance,
            confirmed_balance: balance.confirmed_balance,
            unconfirmed_balance: balance.unconfirmed_balance,
        })
    }

    async fn trading_limits(&self, currency: &str) -> Result<TradingLimits, SwapClientError> {
        self.ensure_currency(currency)?;
        let capacity = Capacity::of(&self.list_channels().await?);
        *self.capacity.write() = capacity;

        Ok(TradingLimits {
            max_sell: capacity.max_outbound,
            max_buy: capacity.max_inbound,
        })
    }

    fn total_outbound_amount(&self, _currency: &str) -> u64 {
        self.capacity.read().total_outbound
    }

    fn max_channel_outbound_amount(&self, _currency: &str) -> u64 {
        self.capacity.read().max_outbound
    }

    fn max_channel_inbound_amount(&self, _currency: &str) -> u64 {
        self.capacity.read().max_inbound
    }

    async fn update_capacity(&self) {
        match self.list_channels().await {
            Ok(channels) => *self.capacity.write() = Capacity::of(&channels),
            Err(e) => {
                tracing::warn!(currency = %self.currency, "failed to refresh capacity: {}", e)
            }
        }
    }

    async fn send_payment(&self, deal: &SwapDeal) -> Result<Secret, SwapClientError> {
        let destination = ensure_payable(deal)?;

        match (deal.role(), deal.r_preimage()) {
            (Role::Maker, Some(preimage)) => {
                self.settle_invoice(deal.r_hash(), preimage, deal.receiving_currency())
                    .await?;
                Ok(preimage)
            }
            _ => {
                self.ensure_currency(deal.paying_currency())?;
                self.pay(
                    deal.r_hash(),
                    deal.paying_units(),
                    deal.lock_timeout(self.final_lock),
                    destination,
                )
                .await
            }
        }
    }

    async fn send_smallest_amount(
        &self,
        r_hash: SecretHash,
        destination: &str,
        currency: &str,
    ) -> Result<Secret, SwapClientError> {
        self.ensure_currency(currency)?;
        self.pay(r_hash, 1, self.final_lock, destination).await
    }

    async fn lookup_payment(
        &self,
        r_hash: SecretHash,
        currency: &str,
    ) -> Result<PaymentStatus, SwapClientError> {
        self.ensure_currency(currency)?;

        let response = self
            .send(self.request(Method::GET, "/v1/payments?include_incomplete=true"))
            .await?;
        let payments: ListPayments = http::json(response, ErrorKind::Unexpected).await?;
        let wanted = hex::encode(r_hash.as_bytes());

        let payment = payments
            .payments
            .into_iter()
            .find(|payment| payment.payment_hash == wanted)
            .ok_or_else(|| {
                SwapClientError::payment_not_found(format!("no payment to {}", r_hash))
            })?;

        Ok(match payment.status {
            api::PaymentStatus::Unknown | api::PaymentStatus::InFlight => PaymentStatus::pending(),
            api::PaymentStatus::Succeeded => {
                let preimage = payment.payment_preimage.parse::<Secret>().map_err(|e| {
                    SwapClientError::invalid_payment_response(format!("invalid preimage: {}", e))
                })?;
                PaymentStatus::succeeded(Some(preimage))
            }
            api::PaymentStatus::Failed => PaymentStatus::failed(),
        })
    }

    async fn add_invoice(
        &self,
        r_hash: SecretHash,
        units: u128,
        expiry: u64,
        currency: &str,
    ) -> Result<(), SwapClientError> {
        self.ensure_currency(currency)?;
        let body = AddHoldInvoice {
            hash: BASE64.encode(r_hash.as_bytes()),
            value: units.to_string(),
            cltv_expiry: expiry.to_string(),
        };

        self.send(self.request(Method::POST, "/v2/invoices/hodl").json(&body))
            .await?;
        tracing::debug!(%r_hash, %units, expiry, "added hold invoice");
        Ok(())
    }

    async fn settle_invoice(
        &self,
        r_hash: SecretHash,
        r_preimage: Secret,
        currency: &str,
    ) -> Result<(), SwapClientError> {
        self.ensure_currency(currency)?;
        let body = SettleInvoice {
            preimage: BASE64.encode(r_preimage.as_bytes()),
        };

        self.send(self.request(Method::POST, "/v2/invoices/settle").json(&body))
            .await?;
        tracing::debug!(%r_hash, "settled hold invoice");
        Ok(())
    }

    async fn remove_invoice(&self, r_hash: SecretHash) -> Result<(), SwapClientError> {
        let body = CancelInvoice {
            payment_hash: BASE64.encode(r_hash.as_bytes()),
        };

        self.send(self.request(Method::POST, "/v2/invoices/cancel").json(&body))
            .await?;
        tracing::debug!(%r_hash, "cancelled hold invoice");
        Ok(())
    }

    async fn open_channel(&self, request: OpenChannelRequest) -> Result<(), SwapClientError> {
        self.ensure_currency(&request.currency)?;
        let pubkey = request.remote_identifier.as_deref().ok_or_else(|| {
            SwapClientError::assertion("opening an lnd channel requires the peer's pubkey")
        })?;

        for uri in &request.uris {
            let host = match uri.split_once('@') {
                Some((_, host)) => host,
                None => continue,
            };
            let body = ConnectPeer {
                addr: PeerAddress { pubkey, host },
                perm: false,
            };
            match self
                .send(self.request(Method::POST, "/v1/peers").json(&body))
                .await
            {
                Ok(_) => break,
                Err(e) if e.message.contains("already connected") => break,
                Err(e) => tracing::debug!(%uri, "failed to connect to peer: {}", e),
            }
        }

        let body = OpenChannel {
            node_pubkey_string: pubkey,
            local_funding_amount: request.units.to_string(),
        };
        self.send(self.request(Method::POST, "/v1/channels").json(&body))
            .await?;
        tracing::info!(%pubkey, units = %request.units, "opened channel");
        Ok(())
    }

    async fn close_channel(&self, request: CloseChannelRequest) -> Result<(), SwapClientError> {
        self.ensure_currency(&request.currency)?;
        let pubkey = request.remote_identifier.as_deref().ok_or_else(|| {
            SwapClientError::assertion("closing an lnd channel requires the peer's pubkey")
        })?;

        let channels = self.list_channels().await?;
        for channel in channels
            .channels
            .iter()
            .filter(|channel| channel.remote_pubkey == pubkey)
        {
            let (txid, index) = channel.channel_point.split_once(':').ok_or_else(|| {
                SwapClientError::new(
                    ErrorKind::Unexpected,
                    format!("malformed channel point {}", channel.channel_point),
                )
            })?;
            let path = format!("/v1/channels/{}/{}?force={}", txid, index, request.force);

            // Closing streams updates until the channel is closed; the
            // response body is not needed.
            self.send(self.request(Method::DELETE, &path)).await?;
            tracing::info!(%pubkey, channel_point = %channel.channel_point, "closing channel");
        }

        Ok(())
    }
}
