use crate::swaps::{Role, Secret, SecretHash, SwapFailureReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapState {
    Created,
    Active,
    Completed,
    Failed,
}

impl SwapState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SwapState::Completed | SwapState::Failed)
    }
}

/// Fine-grained progress of a deal. Phases only ever move forward.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapPhase {
    SwapCreated,
    SwapAccepted,
    /// Our leg has been handed to the backend; a lock may be in flight.
    SendingPayment,
    /// The preimage is known and verified against the hash.
    PreimageResolved,
    /// The incoming leg has been settled with the preimage.
    PaymentReceived,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DealError {
    #[error("deal {r_hash} cannot transition from {from} to {to}")]
    InvalidTransition {
        r_hash: SecretHash,
        from: SwapState,
        to: SwapState,
    },
    #[error("deal {r_hash} cannot move back from phase {from} to {to}")]
    PhaseRegression {
        r_hash: SecretHash,
        from: SwapPhase,
        to: SwapPhase,
    },
    #[error("deal {0} is closed")]
    Closed(SecretHash),
    #[error("preimage does not hash to {0}")]
    PreimageMismatch(SecretHash),
    #[error("deal {0} has no destination")]
    MissingDestination(SecretHash),
    #[error("deal {0} has no verified preimage")]
    MissingPreimage(SecretHash),
}

/// A deal as negotiated with the counterparty, delivered by the packet layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealProposal {
    pub r_hash: SecretHash,
    pub order_id: String,
    pub pair_id: String,
    pub role: Role,
    pub maker_currency: String,
    pub taker_currency: String,
    pub maker_units: u128,
    pub taker_units: u128,
    pub destination: Option<String>,
    pub maker_cltv_delta: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapDeal {
    r_hash: SecretHash,
    order_id: String,
    pair_id: String,
    role: Role,
    maker_currency: String,
    taker_currency: String,
    maker_units: u128,
    taker_units: u128,
    destination: Option<String>,
    maker_cltv_delta: u64,
    r_preimage: Option<Secret>,
    state: SwapState,
    phase: SwapPhase,
    failure_reason: Option<SwapFailureReason>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    executed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl SwapDeal {
    pub fn new(proposal: DealProposal) -> Self {
        let DealProposal {
            r_hash,
            order_id,
            pair_id,
            role,
            maker_currency,
            taker_currency,
            maker_units,
            taker_units,
            destination,
            maker_cltv_delta,
        } = proposal;

        Self {
            r_hash,
            order_id,
            pair_id,
            role,
            maker_currency,
            taker_currency,
            maker_units,
            taker_units,
            destination,
            maker_cltv_delta,
            r_preimage: None,
            state: SwapState::Created,
            phase: SwapPhase::SwapCreated,
            failure_reason: None,
            error_message: None,
            created_at: Utc::now(),
            executed_at: None,
            completed_at: None,
        }
    }

    pub fn r_hash(&self) -> SecretHash {
        self.r_hash
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn pair_id(&self) -> &str {
        &self.pair_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn maker_currency(&self) -> &str {
        &self.maker_currency
    }

    pub fn taker_currency(&self) -> &str {
        &self.taker_currency
    }

    pub fn maker_units(&self) -> u128 {
        self.maker_units
    }

    pub fn taker_units(&self) -> u128 {
        self.taker_units
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    pub fn maker_cltv_delta(&self) -> u64 {
        self.maker_cltv_delta
    }

    pub fn r_preimage(&self) -> Option<Secret> {
        self.r_preimage
    }

    pub fn state(&self) -> SwapState {
        self.state
    }

    pub fn phase(&self) -> SwapPhase {
        self.phase
    }

    pub fn failure_reason(&self) -> Option<SwapFailureReason> {
        self.failure_reason
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn executed_at(&self) -> Option<DateTime<Utc>> {
        self.executed_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// The currency this node pays: the taker pays the maker in the maker's
    /// currency and vice versa.
    pub fn paying_currency(&self) -> &str {
        match self.role {
            Role::Taker => &self.maker_currency,
            Role::Maker => &self.taker_currency,
        }
    }

    pub fn paying_units(&self) -> u128 {
        match self.role {
            Role::Taker => self.maker_units,
            Role::Maker => self.taker_units,
        }
    }

    pub fn receiving_currency(&self) -> &str {
        match self.role {
            Role::Taker => &self.taker_currency,
            Role::Maker => &self.maker_currency,
        }
    }

    pub fn receiving_units(&self) -> u128 {
        match self.role {
            Role::Taker => self.taker_units,
            Role::Maker => self.maker_units,
        }
    }

    /// Expiry of the invoice for the incoming leg. The taker receives the
    /// final hop, so it uses the receiving client's final lock.
    pub fn invoice_expiry(&self, final_lock: u64) -> u64 {
        match self.role {
            Role::Taker => final_lock,
            Role::Maker => self.maker_cltv_delta,
        }
    }

    /// Lock timeout for our leg. The maker's payment is the final hop.
    pub fn lock_timeout(&self, final_lock: u64) -> u64 {
        match self.role {
            Role::Taker => self.maker_cltv_delta,
            Role::Maker => final_lock,
        }
    }

    pub fn set_destination(&mut self, destination: String) -> Result<(), DealError> {
        if self.state != SwapState::Created {
            return Err(DealError::Closed(self.r_hash));
        }

        self.destination = Some(destination);
        Ok(())
    }

    pub fn transition_to_active(&mut self) -> Result<(), DealError> {
        self.ensure_from(&[SwapState::Created], SwapState::Active)?;
        if self.destination.is_none() {
            return Err(DealError::MissingDestination(self.r_hash));
        }

        self.state = SwapState::Active;
        self.phase = SwapPhase::SwapAccepted;
        Ok(())
    }

    pub fn transition_to_completed(&mut self) -> Result<(), DealError> {
        self.ensure_from(&[SwapState::Active], SwapState::Completed)?;
        if self.r_preimage.is_none() {
            return Err(DealError::MissingPreimage(self.r_hash));
        }

        self.state = SwapState::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn transition_to_failed(
        &mut self,
        reason: SwapFailureReason,
        message: impl Into<String>,
    ) -> Result<(), DealError> {
        self.ensure_from(&[SwapState::Created, SwapState::Active], SwapState::Failed)?;

        self.state = SwapState::Failed;
        self.failure_reason = Some(reason);
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn advance_phase(&mut self, phase: SwapPhase) -> Result<(), DealError> {
        if self.state.is_terminal() {
            return Err(DealError::Closed(self.r_hash));
        }
        if phase <= self.phase {
            return Err(DealError::PhaseRegression {
                r_hash: self.r_hash,
                from: self.phase,
                to: phase,
            });
        }

        if phase == SwapPhase::SendingPayment {
            self.executed_at = Some(Utc::now());
        }
        self.phase = phase;
        Ok(())
    }

    /// Records the preimage if, and only if, it hashes to `r_hash`.
    pub fn set_preimage(&mut self, preimage: Secret) -> Result<(), DealError> {
        if self.state.is_terminal() {
            return Err(DealError::Closed(self.r_hash));
        }
        if !self.r_hash.is_hash_of(&preimage) {
            return Err(DealError::PreimageMismatch(self.r_hash));
        }

        self.r_preimage = Some(preimage);
        Ok(())
    }

    fn ensure_from(&self, allowed: &[SwapState], to: SwapState) -> Result<(), DealError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(DealError::InvalidTransition {
                r_hash: self.r_hash,
                from: self.state,
                to,
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use spectral::prelude::*;

    pub(crate) fn proposal(role: Role, preimage: &Secret) -> DealProposal {
        DealProposal {
            r_hash: preimage.hash(),
            order_id: "order-1".to_owned(),
            pair_id: "ETH/BTC".to_owned(),
            role,
            maker_currency: "ETH".to_owned(),
            taker_currency: "BTC".to_owned(),
            maker_units: 1000,
            taker_units: 2000,
            destination: Some("counterparty".to_owned()),
            maker_cltv_delta: 144,
        }
    }

    fn active_deal(role: Role, preimage: &Secret) -> SwapDeal {
        let mut deal = SwapDeal::new(proposal(role, preimage));
        deal.transition_to_active().unwrap();
        deal
    }

    #[test]
    fn new_deal_is_created() {
        let deal = SwapDeal::new(proposal(Role::Taker, &Secret::random()));

        assert_eq!(deal.state(), SwapState::Created);
        assert_eq!(deal.phase(), SwapPhase::SwapCreated);
        assert_that(&deal.r_preimage()).is_none();
    }

    #[test]
    fn activation_requires_a_destination() {
        let mut proposal = proposal(Role::Taker, &Secret::random());
        proposal.destination = None;
        let mut deal = SwapDeal::new(proposal);

        let result = deal.transition_to_active();

        assert_eq!(result, Err(DealError::MissingDestination(deal.r_hash())));
        assert_eq!(deal.state(), SwapState::Created);
    }

    #[test]
    fn completion_requires_a_verified_preimage() {
        let preimage = Secret::random();
        let mut deal = active_deal(Role::Taker, &preimage);

        assert_eq!(
            deal.transition_to_completed(),
            Err(DealError::MissingPreimage(deal.r_hash()))
        );

        deal.set_preimage(preimage).unwrap();
        deal.transition_to_completed().unwrap();

        assert_eq!(deal.state(), SwapState::Completed);
        assert_that(&deal.completed_at()).is_some();
    }

    #[test]
    fn mismatching_preimage_leaves_deal_untouched() {
        let mut deal = active_deal(Role::Maker, &Secret::random());

        let result = deal.set_preimage(Secret::random());

        assert_eq!(result, Err(DealError::PreimageMismatch(deal.r_hash())));
        assert_that(&deal.r_preimage()).is_none();
    }

    #[test]
    fn terminal_states_admit_no_transition() {
        let preimage = Secret::random();
        let mut failed = active_deal(Role::Taker, &preimage);
        failed
            .transition_to_failed(SwapFailureReason::InsufficientBalance, "402")
            .unwrap();

        assert_that(&failed.transition_to_active()).is_err();
        assert_that(&failed.transition_to_completed()).is_err();
        assert_eq!(
            failed.transition_to_failed(SwapFailureReason::RemoteError, "again"),
            Err(DealError::InvalidTransition {
                r_hash: failed.r_hash(),
                from: SwapState::Failed,
                to: SwapState::Failed,
            })
        );
        assert_eq!(failed.set_preimage(preimage), Err(DealError::Closed(failed.r_hash())));
        assert_eq!(failed.error_message(), Some("402"));
    }

    #[test]
    fn phases_only_move_forward() {
        let mut deal = active_deal(Role::Taker, &Secret::random());

        deal.advance_phase(SwapPhase::SendingPayment).unwrap();

        assert_that(&deal.executed_at()).is_some();
        assert_that(&deal.advance_phase(SwapPhase::SendingPayment)).is_err();
        assert_that(&deal.advance_phase(SwapPhase::SwapAccepted)).is_err();
        assert_that(&deal.advance_phase(SwapPhase::PreimageResolved)).is_ok();
    }

    #[test]
    fn legs_follow_the_role() {
        let preimage = Secret::random();
        let taker = SwapDeal::new(proposal(Role::Taker, &preimage));
        let maker = SwapDeal::new(proposal(Role::Maker, &preimage));

        assert_eq!(taker.paying_currency(), "ETH");
        assert_eq!(taker.paying_units(), 1000);
        assert_eq!(taker.receiving_currency(), "BTC");
        assert_eq!(taker.receiving_units(), 2000);
        assert_eq!(taker.lock_timeout(40), 144);
        assert_eq!(taker.invoice_expiry(40), 40);

        assert_eq!(maker.paying_currency(), "BTC");
        assert_eq!(maker.paying_units(), 2000);
        assert_eq!(maker.receiving_currency(), "ETH");
        assert_eq!(maker.receiving_units(), 1000);
        assert_eq!(maker.lock_timeout(40), 40);
        assert_eq!(maker.invoice_expiry(40), 144);
    }

    #[test]
    fn state_serializes_in_screaming_snake_case() {
        let serialized = serde_json::to_string(&SwapState::Active).unwrap();

        assert_eq!(serialized, r#""ACTIVE""#);
    }
}
