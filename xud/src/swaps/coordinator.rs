use crate::{
    swap_client::{
        ClientStatus, ErrorKind, PaymentState, SwapClient, SwapClientError, SwapClientManager,
    },
    swaps::{
        DealError, DealProposal, Role, Secret, SecretHash, SwapDeal, SwapFailureReason,
        SwapOutcome, SwapPhase, SwapReporter, SwapRepository, SwapState,
    },
};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::Instrument;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown deal {0}")]
    UnknownDeal(SecretHash),
    #[error("a deal with hash {0} already exists")]
    DuplicateDeal(SecretHash),
    #[error("currency {0} is not supported by any swap client")]
    UnsupportedCurrency(String),
    #[error("invalid deal proposal: {0}")]
    InvalidProposal(String),
    #[error("swap client for {0} is not connected")]
    ClientNotConnected(String),
    #[error("failed to add invoice for {currency}")]
    AddInvoice {
        currency: String,
        #[source]
        source: SwapClientError,
    },
    #[error("deal {r_hash} is {state}, expected ACTIVE")]
    NotActive { r_hash: SecretHash, state: SwapState },
    #[error(transparent)]
    InvalidTransition(#[from] DealError),
    #[error("failed to persist deal")]
    Persistence(#[source] anyhow::Error),
}

/// Progress of a deal after a call to [`Swaps::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    /// The deal reached a terminal state and was reported.
    Finished(SwapOutcome),
    /// The deal is still `Active` and must be executed again later, e.g.
    /// once an in-flight payment resolves or the backend is reachable.
    Pending(SwapPhase),
}

type DealSlot = Arc<Mutex<SwapDeal>>;

/// Drives deals against the swap clients of both legs.
///
/// Each deal sits behind its own lock, so all operations on one hash are
/// serialised while different deals proceed in parallel. Only unfinished
/// deals are held in memory; finished ones live in the repository.
pub struct Swaps<R, P> {
    clients: Arc<SwapClientManager>,
    repository: R,
    reporter: P,
    deals: Mutex<HashMap<SecretHash, DealSlot>>,
    /// Deals whose execution was refused because a client was offline.
    deferred: parking_lot::Mutex<HashSet<SecretHash>>,
}

impl<R, P> Swaps<R, P>
where
    R: SwapRepository,
    P: SwapReporter,
{
    pub fn new(clients: Arc<SwapClientManager>, repository: R, reporter: P) -> Self {
        Self {
            clients,
            repository,
            reporter,
            deals: Mutex::new(HashMap::new()),
            deferred: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    /// Loads unfinished deals from the repository so they can be
    /// revalidated. Finished deals stay in the repository, which keeps
    /// their hashes reserved. Returns the number of unfinished deals.
    pub async fn restore(&self) -> Result<usize, Error> {
        let stored = self.repository.all().await.map_err(Error::Persistence)?;
        let mut deals = self.deals.lock().await;

        let mut unfinished = 0;
        for deal in stored.into_iter().filter(|deal| !deal.state().is_terminal()) {
            unfinished += 1;
            deals
                .entry(deal.r_hash())
                .or_insert_with(|| Arc::new(Mutex::new(deal)));
        }

        tracing::info!("restored {} unfinished deals", unfinished);
        Ok(unfinished)
    }

    pub async fn accept_deal(&self, proposal: DealProposal) -> Result<(), Error> {
        validate_proposal(&proposal)?;
        self.client_for(&proposal.maker_currency)?;
        self.client_for(&proposal.taker_currency)?;

        let r_hash = proposal.r_hash;
        let mut deals = self.deals.lock().await;
        if deals.contains_key(&r_hash) {
            return Err(Error::DuplicateDeal(r_hash));
        }
        if self
            .repository
            .get(&r_hash)
            .await
            .map_err(Error::Persistence)?
            .is_some()
        {
            return Err(Error::DuplicateDeal(r_hash));
        }

        let deal = SwapDeal::new(proposal);
        self.repository
            .upsert(&deal)
            .await
            .map_err(Error::Persistence)?;

        tracing::info!(%r_hash, role = %deal.role(), pair_id = deal.pair_id(), "accepted deal");
        deals.insert(r_hash, Arc::new(Mutex::new(deal)));
        Ok(())
    }

    /// Registers the invoice for the incoming leg and marks the deal
    /// active. The counterparty may lock its payment from then on.
    pub async fn activate(&self, r_hash: SecretHash) -> Result<(), Error> {
        let slot = self.slot(&r_hash).await?;
        let mut deal = slot.lock().await;

        for currency in &[deal.maker_currency(), deal.taker_currency()] {
            let client = self.client_for(currency)?;
            if !client.is_currency_supported(currency) {
                return Err(Error::UnsupportedCurrency(currency.to_string()));
            }
        }

        let mut next = deal.clone();
        next.transition_to_active()?;

        let currency = deal.receiving_currency().to_owned();
        let receiving = self.client_for(&currency)?;
        receiving
            .add_invoice(
                r_hash,
                deal.receiving_units(),
                deal.invoice_expiry(receiving.final_lock()),
                &currency,
            )
            .await
            .map_err(|source| Error::AddInvoice {
                currency: currency.clone(),
                source,
            })?;

        if let Err(e) = self.commit(&mut deal, next).await {
            remove_invoice(receiving.as_ref(), r_hash).await;
            return Err(e);
        }

        tracing::debug!(%r_hash, %currency, "deal is active");
        Ok(())
    }

    /// Records a preimage learned outside of our own payment, e.g. from the
    /// counterparty. It is only accepted if it hashes to the deal's hash.
    pub async fn resolve_preimage(
        &self,
        r_hash: SecretHash,
        preimage: Secret,
    ) -> Result<(), Error> {
        let slot = self.slot(&r_hash).await?;
        let mut deal = slot.lock().await;

        let mut next = deal.clone();
        next.set_preimage(preimage)?;
        self.commit(&mut deal, next).await
    }

    /// Records a failure reported by the counterparty.
    pub async fn fail_deal(
        &self,
        r_hash: SecretHash,
        reason: SwapFailureReason,
        message: impl Into<String>,
    ) -> Result<SwapOutcome, Error> {
        let slot = self.slot(&r_hash).await?;
        let mut deal = slot.lock().await;

        self.fail(&mut deal, reason, message.into()).await
    }

    /// Returns a deal that has not finished yet. Finished deals are read
    /// from the repository.
    pub async fn deal(&self, r_hash: &SecretHash) -> Option<SwapDeal> {
        let slot = self.deals.lock().await.get(r_hash).cloned()?;
        let deal = slot.lock().await;
        Some(deal.clone())
    }

    /// Executes our leg of an active deal and settles the incoming one.
    ///
    /// Calling this again for a pending deal resumes where it stopped: an
    /// in-flight payment is looked up rather than sent again and a known
    /// preimage is only used to settle.
    pub async fn execute(&self, r_hash: SecretHash) -> Result<Execution, Error> {
        let slot = self.slot(&r_hash).await?;
        let mut deal = slot.lock().await;

        self.run(&mut deal).await
    }

    /// Revalidates deals that were interrupted while `currency`'s client was
    /// unreachable. Returns the number of deals looked at.
    pub async fn revalidate(&self, currency: &str) -> usize {
        let slots: Vec<DealSlot> = self.deals.lock().await.values().cloned().collect();

        let mut revalidated = 0;
        for slot in slots {
            let mut deal = slot.lock().await;
            if !self.is_interrupted(&deal, currency) {
                continue;
            }

            revalidated += 1;
            let r_hash = deal.r_hash();
            match self.run(&mut deal).await {
                Ok(Execution::Finished(outcome)) => {
                    tracing::info!(%r_hash, state = %outcome.state, "revalidated deal")
                }
                Ok(Execution::Pending(phase)) => {
                    tracing::debug!(%r_hash, %phase, "deal still pending")
                }
                Err(e) => tracing::warn!(%r_hash, "failed to revalidate deal: {}", e),
            }
        }

        revalidated
    }

    fn is_interrupted(&self, deal: &SwapDeal, currency: &str) -> bool {
        if deal.state() != SwapState::Active {
            return false;
        }

        match deal.phase() {
            SwapPhase::SwapAccepted if deal.role() == Role::Maker && deal.r_preimage().is_some() => {
                deal.receiving_currency() == currency
            }
            SwapPhase::SwapAccepted => {
                deal.paying_currency() == currency && self.deferred.lock().contains(&deal.r_hash())
            }
            SwapPhase::SendingPayment => deal.paying_currency() == currency,
            SwapPhase::PreimageResolved => deal.receiving_currency() == currency,
            SwapPhase::SwapCreated | SwapPhase::PaymentReceived => false,
        }
    }

    /// Drives `deal` and remembers whether it was refused for lack of a
    /// connected client.
    async fn run(&self, deal: &mut SwapDeal) -> Result<Execution, Error> {
        let r_hash = deal.r_hash();
        let result = self
            .drive(deal)
            .instrument(tracing::info_span!("swap", %r_hash))
            .await;

        let mut deferred = self.deferred.lock();
        match result {
            Err(Error::ClientNotConnected(_)) => deferred.insert(r_hash),
            _ => deferred.remove(&r_hash),
        };

        result
    }

    async fn drive(&self, deal: &mut SwapDeal) -> Result<Execution, Error> {
        if deal.state() != SwapState::Active {
            return Err(Error::NotActive {
                r_hash: deal.r_hash(),
                state: deal.state(),
            });
        }

        let paying = self.client_for(deal.paying_currency())?;
        let receiving = self.client_for(deal.receiving_currency())?;

        match deal.phase() {
            SwapPhase::SwapAccepted if deal.role() == Role::Maker && deal.r_preimage().is_some() => {
                self.redeem(deal, receiving.as_ref()).await
            }
            SwapPhase::SwapAccepted => self.pay(deal, paying.as_ref(), receiving.as_ref()).await,
            SwapPhase::SendingPayment => {
                self.recover_in_flight(deal, paying.as_ref(), receiving.as_ref())
                    .await
            }
            SwapPhase::PreimageResolved => self.settle(deal, receiving.as_ref()).await,
            SwapPhase::SwapCreated | SwapPhase::PaymentReceived => Err(Error::NotActive {
                r_hash: deal.r_hash(),
                state: deal.state(),
            }),
        }
    }

    async fn pay(
        &self,
        deal: &mut SwapDeal,
        paying: &dyn SwapClient,
        receiving: &dyn SwapClient,
    ) -> Result<Execution, Error> {
        let currency = deal.paying_currency().to_owned();
        if !paying.is_connected() {
            return Err(Error::ClientNotConnected(currency));
        }

        let mut next = deal.clone();
        next.advance_phase(SwapPhase::SendingPayment)?;
        self.commit(deal, next).await?;

        tracing::info!(%currency, units = %deal.paying_units(), "sending payment");
        match paying.send_payment(deal).await {
            Ok(preimage) => self.resolve(deal, preimage, receiving).await,
            Err(e) if e.is_indeterminate() => {
                tracing::warn!("payment outcome unknown, looking it up: {}", e);
                self.recover_in_flight(deal, paying, receiving).await
            }
            Err(e) => {
                tracing::error!("payment failed: {}", e);
                self.fail(deal, SwapFailureReason::from(e.kind), e.to_string())
                    .await
                    .map(Execution::Finished)
            }
        }
    }

    /// A maker that already knows the preimage only redeems the payment
    /// locked to it. No new lock is created, so failures leave the deal
    /// pending instead of failing it.
    async fn redeem(
        &self,
        deal: &mut SwapDeal,
        receiving: &dyn SwapClient,
    ) -> Result<Execution, Error> {
        let currency = deal.receiving_currency().to_owned();
        if !receiving.is_connected() {
            return Err(Error::ClientNotConnected(currency));
        }

        tracing::info!(%currency, "redeeming locked payment with known preimage");
        let preimage = match receiving.send_payment(deal).await {
            Ok(preimage) => preimage,
            Err(e) => {
                tracing::warn!("failed to redeem locked payment: {}", e);
                return Ok(Execution::Pending(deal.phase()));
            }
        };

        if !deal.r_hash().is_hash_of(&preimage) {
            return self.invalid_preimage(deal).await;
        }

        let mut next = deal.clone();
        next.advance_phase(SwapPhase::PreimageResolved)?;
        next.advance_phase(SwapPhase::PaymentReceived)?;
        next.transition_to_completed()?;
        self.commit(deal, next).await?;

        Ok(Execution::Finished(self.finish(deal).await))
    }

    /// Never re-sends: the backend is asked what became of the payment.
    async fn recover_in_flight(
        &self,
        deal: &mut SwapDeal,
        paying: &dyn SwapClient,
        receiving: &dyn SwapClient,
    ) -> Result<Execution, Error> {
        match paying
            .lookup_payment(deal.r_hash(), deal.paying_currency())
            .await
        {
            Ok(status) => match (status.state, status.preimage.or_else(|| deal.r_preimage())) {
                (PaymentState::Succeeded, Some(preimage)) => {
                    self.resolve(deal, preimage, receiving).await
                }
                (PaymentState::Succeeded, None) => {
                    tracing::warn!("payment succeeded but the backend did not reveal the preimage");
                    Ok(Execution::Pending(deal.phase()))
                }
                (PaymentState::Pending, _) => {
                    tracing::info!("payment is still in flight");
                    Ok(Execution::Pending(deal.phase()))
                }
                (PaymentState::Failed, _) => {
                    self.fail(
                        deal,
                        SwapFailureReason::SendPaymentFailure,
                        "payment failed".to_owned(),
                    )
                    .await
                    .map(Execution::Finished)
                }
            },
            Err(e) if e.kind == ErrorKind::PaymentNotFound => {
                self.fail(deal, SwapFailureReason::PaymentRejected, e.to_string())
                    .await
                    .map(Execution::Finished)
            }
            Err(e) => {
                tracing::warn!("could not look up in-flight payment: {}", e);
                Ok(Execution::Pending(deal.phase()))
            }
        }
    }

    async fn resolve(
        &self,
        deal: &mut SwapDeal,
        preimage: Secret,
        receiving: &dyn SwapClient,
    ) -> Result<Execution, Error> {
        if !deal.r_hash().is_hash_of(&preimage) {
            return self.invalid_preimage(deal).await;
        }

        let mut next = deal.clone();
        next.set_preimage(preimage)?;
        next.advance_phase(SwapPhase::PreimageResolved)?;
        self.commit(deal, next).await?;

        tracing::info!("preimage resolved");
        self.settle(deal, receiving).await
    }

    /// Claims the incoming leg. Settling is idempotent, so a failure leaves
    /// the deal pending in `PreimageResolved` to be retried.
    async fn settle(
        &self,
        deal: &mut SwapDeal,
        receiving: &dyn SwapClient,
    ) -> Result<Execution, Error> {
        let preimage = deal
            .r_preimage()
            .ok_or_else(|| DealError::MissingPreimage(deal.r_hash()))?;

        if let Err(e) = receiving
            .settle_invoice(deal.r_hash(), preimage, deal.receiving_currency())
            .await
        {
            tracing::error!("failed to settle incoming payment: {}", e);
            return Ok(Execution::Pending(deal.phase()));
        }

        let mut next = deal.clone();
        next.advance_phase(SwapPhase::PaymentReceived)?;
        next.transition_to_completed()?;
        self.commit(deal, next).await?;

        Ok(Execution::Finished(self.finish(deal).await))
    }

    async fn invalid_preimage(&self, deal: &mut SwapDeal) -> Result<Execution, Error> {
        let message = format!("backend returned a preimage that does not hash to {}", deal.r_hash());
        tracing::error!("{}", message);
        self.fail(deal, SwapFailureReason::InvalidResolvedPreimage, message)
            .await
            .map(Execution::Finished)
    }

    /// Fails the deal and cancels the invoice of an activated deal, so the
    /// counterparty's lock is released.
    async fn fail(
        &self,
        deal: &mut SwapDeal,
        reason: SwapFailureReason,
        message: String,
    ) -> Result<SwapOutcome, Error> {
        let invoiced = deal.state() == SwapState::Active;

        let mut next = deal.clone();
        next.transition_to_failed(reason, message)?;
        self.commit(deal, next).await?;

        if invoiced {
            if let Ok(receiving) = self.client_for(deal.receiving_currency()) {
                remove_invoice(receiving.as_ref(), deal.r_hash()).await;
            }
        }

        Ok(self.finish(deal).await)
    }

    async fn finish(&self, deal: &SwapDeal) -> SwapOutcome {
        self.deals.lock().await.remove(&deal.r_hash());

        let outcome = SwapOutcome::from_deal(deal);
        tracing::info!(state = %outcome.state, "deal finished");
        self.reporter.report(outcome.clone()).await;

        outcome
    }

    /// Persists `next` and only then makes it the current state of `deal`.
    async fn commit(&self, deal: &mut SwapDeal, next: SwapDeal) -> Result<(), Error> {
        self.repository
            .upsert(&next)
            .await
            .map_err(Error::Persistence)?;
        *deal = next;
        Ok(())
    }

    async fn slot(&self, r_hash: &SecretHash) -> Result<DealSlot, Error> {
        if let Some(slot) = self.deals.lock().await.get(r_hash).cloned() {
            return Ok(slot);
        }

        match self.repository.get(r_hash).await.map_err(Error::Persistence)? {
            Some(deal) => Err(Error::NotActive {
                r_hash: *r_hash,
                state: deal.state(),
            }),
            None => Err(Error::UnknownDeal(*r_hash)),
        }
    }

    fn client_for(&self, currency: &str) -> Result<Arc<dyn SwapClient>, Error> {
        self.clients
            .get(currency)
            .ok_or_else(|| Error::UnsupportedCurrency(currency.to_owned()))
    }
}

impl<R, P> Swaps<R, P>
where
    R: SwapRepository,
    P: SwapReporter,
{
    /// Revalidates interrupted deals whenever a client (re)gains its
    /// connection.
    pub fn watch_reconnects(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.clients
            .currencies()
            .filter_map(|currency| {
                let client = self.clients.get(currency)?;
                let mut status = client.subscribe();
                let swaps = Arc::clone(self);
                let currency = currency.to_owned();

                Some(tokio::spawn(async move {
                    while status.changed().await.is_ok() {
                        let verified = *status.borrow_and_update() == ClientStatus::ConnectionVerified;
                        if verified {
                            let count = swaps.revalidate(&currency).await;
                            tracing::debug!(%currency, "revalidated {} deals after reconnect", count);
                        }
                    }
                }))
            })
            .collect()
    }
}

async fn remove_invoice(client: &dyn SwapClient, r_hash: SecretHash) {
    if let Err(e) = client.remove_invoice(r_hash).await {
        tracing::warn!(%r_hash, "failed to remove invoice: {}", e);
    }
}

fn validate_proposal(proposal: &DealProposal) -> Result<(), Error> {
    if proposal.maker_units == 0 || proposal.taker_units == 0 {
        return Err(Error::InvalidProposal("units must be greater than zero".to_owned()));
    }
    if proposal.maker_currency == proposal.taker_currency {
        return Err(Error::InvalidProposal(format!(
            "both legs use {}",
            proposal.maker_currency
        )));
    }
    if proposal.maker_cltv_delta == 0 {
        return Err(Error::InvalidProposal(
            "maker cltv delta must be greater than zero".to_owned(),
        ));
    }

    Ok(())
}
