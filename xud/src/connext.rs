//! Adapter for a Connext state-channel node reached over its REST API.

mod api;

use self::api::{
    Balance, ConnectRequest, Deposit, HashLockResolve, HashLockStatus, HashLockTransfer,
    NodeConfig, OnchainBalance, PreimageResponse, TransferStatus, Withdraw,
};
use crate::{
    config::ConnextSettings,
    swap_client::{
        ensure_payable,
        http::{self, classify_transport},
        ChannelBalance, ClientStatus, CloseChannelRequest, ErrorKind, OpenChannelRequest,
        PaymentStatus, StatusNotifier, SwapClient, SwapClientError, SwapClientType,
        TradingLimits, WalletBalance, UNLIMITED_CAPACITY,
    },
    swaps::{Role, Secret, SecretHash, SwapDeal},
    units::UnitConverter,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{RequestBuilder, Response, StatusCode};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::watch;

pub struct ConnextClient {
    http: reqwest::Client,
    base_url: String,
    seed: Option<String>,
    final_lock: u64,
    /// Currency id to asset id (token address).
    tokens: HashMap<String, String>,
    outbound: RwLock<HashMap<String, u64>>,
    status: StatusNotifier,
    converter: Arc<UnitConverter>,
}

impl std::fmt::Debug for ConnextClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnextClient")
            .field("base_url", &self.base_url)
            .field("tokens", &self.tokens)
            .field("status", &self.status.get())
            .finish()
    }
}

impl ConnextClient {
    pub fn new(
        settings: &ConnextSettings,
        tokens: HashMap<String, String>,
        converter: Arc<UnitConverter>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: settings.url.as_str().trim_end_matches('/').to_owned(),
            seed: settings.seed.clone(),
            final_lock: settings.final_lock,
            tokens,
            outbound: RwLock::new(HashMap::new()),
            status: StatusNotifier::new(SwapClientType::Connext),
            converter,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn asset_id(&self, currency: &str) -> Result<&str, SwapClientError> {
        self.tokens
            .get(currency)
            .map(String::as_str)
            .ok_or_else(|| SwapClientError::unsupported_currency(currency))
    }

    fn seed(&self) -> Result<&str, SwapClientError> {
        self.seed
            .as_deref()
            .ok_or_else(|| SwapClientError::missing_credentials("no connext seed configured"))
    }

    /// Sends `request` without looking at the status code. A refused
    /// connection marks the client as disconnected so the watcher
    /// reconnects it.
    async fn dispatch(&self, request: RequestBuilder) -> Result<Response, SwapClientError> {
        request.send().await.map_err(|e| {
            let error = classify_transport(e);
            if error.kind == ErrorKind::ConnectionRefused {
                self.status.set(ClientStatus::Disconnected);
            }
            error
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, SwapClientError> {
        let response = self.dispatch(request).await?;
        http::check_status(response).await
    }

    fn to_amount(&self, currency: &str, units: &str) -> Result<u64, SwapClientError> {
        let units: u128 = units.parse().map_err(|_| {
            SwapClientError::new(
                ErrorKind::Unexpected,
                format!("{} is not a valid amount of base units", units),
            )
        })?;

        self.converter
            .units_to_amount(currency, units)
            .map_err(|e| SwapClientError::new(ErrorKind::Unexpected, e.to_string()))
    }

    async fn free_units(&self, currency: &str) -> Result<String, SwapClientError> {
        let asset_id = self.asset_id(currency)?;
        let response = self
            .send(self.http.get(self.endpoint(&format!("/balance/{}", asset_id))))
            .await?;
        let balance: Balance = http::json(response, ErrorKind::Unexpected).await?;

        Ok(balance.free_balance)
    }

    async fn transfer(
        &self,
        r_hash: SecretHash,
        units: u128,
        timelock: u64,
        recipient: &str,
        currency: &str,
    ) -> Result<Secret, SwapClientError> {
        let body = HashLockTransfer {
            amount: units.to_string(),
            asset_id: self.asset_id(currency)?,
            lock_hash: r_hash.to_prefixed_hex(),
            timelock: timelock.to_string(),
            recipient,
        };

        tracing::debug!(%r_hash, %units, timelock, "sending hash lock transfer");
        let response = self
            .send(self.http.post(self.endpoint("/hashlock-transfer")).json(&body))
            .await?;
        let PreimageResponse { pre_image } =
            http::json(response, ErrorKind::InvalidPaymentResponse).await?;

        let preimage = Secret::from_prefixed_hex(&pre_image).map_err(|e| {
            SwapClientError::invalid_payment_response(format!(
                "invalid preimage {}: {}",
                pre_image, e
            ))
        })?;
        if !r_hash.is_hash_of(&preimage) {
            return Err(SwapClientError::invalid_payment_response(format!(
                "preimage does not hash to {}",
                r_hash
            )));
        }

        Ok(preimage)
    }

    async fn resolve(&self, preimage: Secret, currency: &str) -> Result<(), SwapClientError> {
        let body = HashLockResolve {
            pre_image: preimage.to_prefixed_hex(),
            asset_id: self.asset_id(currency)?,
        };

        self.send(self.http.post(self.endpoint("/hashlock-resolve")).json(&body))
            .await?;
        tracing::debug!(r_hash = %preimage.hash(), "resolved hash lock transfer");
        Ok(())
    }
}

#[async_trait]
impl SwapClient for ConnextClient {
    fn client_type(&self) -> SwapClientType {
        SwapClientType::Connext
    }

    fn status(&self) -> ClientStatus {
        self.status.get()
    }

    fn subscribe(&self) -> watch::Receiver<ClientStatus> {
        self.status.subscribe()
    }

    fn is_currency_supported(&self, currency: &str) -> bool {
        self.tokens.contains_key(currency)
    }

    fn final_lock(&self) -> u64 {
        self.final_lock
    }

    async fn init_specific(&self) -> Result<(), SwapClientError> {
        self.seed()?;
        self.status.set(ClientStatus::Initialized);
        Ok(())
    }

    async fn verify_connection(&self) -> Result<(), SwapClientError> {
        let seed = self.seed()?;

        let verified: Result<NodeConfig, SwapClientError> = async {
            self.send(self.http.get(self.endpoint("/health"))).await?;
            self.send(
                self.http
                    .post(self.endpoint("/connect"))
                    .json(&ConnectRequest { mnemonic: seed }),
            )
            .await?;
            let response = self.send(self.http.get(self.endpoint("/config"))).await?;
            http::json(response, ErrorKind::Unexpected).await
        }
        .await;

        match verified {
            Ok(config) => {
                tracing::info!(
                    signer = %config.signer_address,
                    identifier = config.public_identifier.as_deref().unwrap_or_default(),
                    "connected to connext node"
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
        let currency = match currency {
            Some(currency) => currency,
            None => return Ok(ChannelBalance::default()),
        };

        let free = self.free_units(currency).await?;
        Ok(ChannelBalance {
            balance: self.to_amount(currency, &free)?,
            ..ChannelBalance::default()
        })
    }

    async fn wallet_balance(
        &self,
        currency: Option<&str>,
    ) -> Result<WalletBalance, SwapClientError> {
        let currency = match currency {
            Some(currency) => currency,
            None => return Ok(WalletBalance::default()),
        };

        let asset_id = self.asset_id(currency)?;
        let response = self
            .send(
                self.http
                    .get(self.endpoint(&format!("/onchain-balance/{}", asset_id))),
            )
            .await?;
        let onchain: OnchainBalance = http::json(response, ErrorKind::Unexpected).await?;
        let confirmed = self.to_amount(currency, &onchain.balance)?;

        Ok(WalletBalance {
            total_balance: confirmed,
            confirmed_balance: confirmed,
            unconfirmed_balance: 0,
        })
    }

    async fn trading_limits(&self, currency: &str) -> Result<TradingLimits, SwapClientError> {
        let balance = self.channel_balance(Some(currency)).await?;

        Ok(TradingLimits {
            max_sell: balance.balance,
            max_buy: UNLIMITED_CAPACITY,
        })
    }

    fn total_outbound_amount(&self, currency: &str) -> u64 {
        self.outbound.read().get(currency).copied().unwrap_or(0)
    }

    // The node collateralises channels on demand, so per-channel capacity
    // has no ceiling worth reporting.
    fn max_channel_outbound_amount(&self, _currency: &str) -> u64 {
        UNLIMITED_CAPACITY
    }

    fn max_channel_inbound_amount(&self, _currency: &str) -> u64 {
        UNLIMITED_CAPACITY
    }

    async fn update_capacity(&self) {
        let balances = futures::future::join_all(self.tokens.keys().map(|currency| async move {
            (currency, self.channel_balance(Some(currency.as_str())).await)
        }))
        .await;

        let mut outbound = self.outbound.write();
        for (currency, balance) in balances {
            match balance {
                Ok(balance) => {
                    outbound.insert(currency.clone(), balance.balance);
                }
                Err(e) => tracing::warn!(%currency, "failed to refresh capacity: {}", e),
            }
        }
    }

    async fn send_payment(&self, deal: &SwapDeal) -> Result<Secret, SwapClientError> {
        let destination = ensure_payable(deal)?;

        match (deal.role(), deal.r_preimage()) {
            (Role::Maker, Some(preimage)) => {
                self.resolve(preimage, deal.receiving_currency()).await?;
                Ok(preimage)
            }
            _ => {
                self.transfer(
                    deal.r_hash(),
                    deal.paying_units(),
                    deal.lock_timeout(self.final_lock),
                    destination,
                    deal.paying_currency(),
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
        self.transfer(r_hash, 1, self.final_lock, destination, currency)
            .await
    }

    async fn lookup_payment(
        &self,
        r_hash: SecretHash,
        currency: &str,
    ) -> Result<PaymentStatus, SwapClientError> {
        let asset_id = self.asset_id(currency)?;
        let url = self.endpoint(&format!(
            "/hashlock-status/{}/{}",
            r_hash.to_prefixed_hex(),
            asset_id
        ));

        let response = self.dispatch(self.http.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SwapClientError::payment_not_found(format!(
                "no transfer locked to {}",
                r_hash
            )));
        }

        let response = http::check_status(response).await?;
        let status: HashLockStatus = http::json(response, ErrorKind::Unexpected).await?;

        Ok(match status.status {
            TransferStatus::Pending => PaymentStatus::pending(),
            TransferStatus::Completed => {
                let preimage = status
                    .pre_image
                    .as_deref()
                    .map(Secret::from_prefixed_hex)
                    .transpose()
                    .map_err(|e| {
                        SwapClientError::invalid_payment_response(format!(
                            "invalid preimage: {}",
                            e
                        ))
                    })?;
                PaymentStatus::succeeded(preimage)
            }
            TransferStatus::Failed | TransferStatus::Expired => PaymentStatus::failed(),
        })
    }

    // Hash lock transfers need no invoice on the receiving side.
    async fn add_invoice(
        &self,
        _r_hash: SecretHash,
        _units: u128,
        _expiry: u64,
        _currency: &str,
    ) -> Result<(), SwapClientError> {
        Ok(())
    }

    async fn settle_invoice(
        &self,
        _r_hash: SecretHash,
        r_preimage: Secret,
        currency: &str,
    ) -> Result<(), SwapClientError> {
        self.resolve(r_preimage, currency).await
    }

    async fn remove_invoice(&self, _r_hash: SecretHash) -> Result<(), SwapClientError> {
        Ok(())
    }

    async fn open_channel(&self, request: OpenChannelRequest) -> Result<(), SwapClientError> {
        let body = Deposit {
            amount: request.units.to_string(),
            asset_id: self.asset_id(&request.currency)?,
        };

        self.send(self.http.post(self.endpoint("/deposit")).json(&body))
            .await?;
        tracing::info!(currency = %request.currency, units = %request.units, "deposited into channel");
        Ok(())
    }

    async fn close_channel(&self, request: CloseChannelRequest) -> Result<(), SwapClientError> {
        let amount = match request.units {
            Some(units) => units.to_string(),
            None => self.free_units(&request.currency).await?,
        };
        let body = Withdraw {
            amount,
            asset_id: self.asset_id(&request.currency)?,
            recipient: request.destination.as_deref(),
        };

        self.send(self.http.post(self.endpoint("/withdraw")).json(&body))
            .await?;
        tracing::info!(currency = %request.currency, "withdrew from channel");
        Ok(())
    }
}
