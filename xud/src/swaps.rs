mod coordinator;
mod deal;
mod outcome;
mod secret;
mod store;

pub use self::{
    coordinator::{Error, Execution, Swaps},
    deal::{DealError, DealProposal, SwapDeal, SwapPhase, SwapState},
    outcome::{LogReporter, SwapOutcome, SwapReporter},
    secret::{FromHexError, Secret, SecretHash},
    store::{InMemorySwapRepository, SwapRepository},
};

use crate::swap_client::ErrorKind;
use serde::{Deserialize, Serialize};

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
pub enum Role {
    Maker,
    Taker,
}

/// The reason attached to a deal that ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapFailureReason {
    SwapClientNotSetup,
    InsufficientBalance,
    SendPaymentFailure,
    PaymentRejected,
    InvalidResolvedPreimage,
    UnexpectedClientError,
    RemoteError,
    DealTimedOut,
}

impl From<ErrorKind> for SwapFailureReason {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::MissingCredentials | ErrorKind::UnsupportedCurrency => {
                SwapFailureReason::SwapClientNotSetup
            }
            ErrorKind::InsufficientBalance => SwapFailureReason::InsufficientBalance,
            ErrorKind::InvalidPaymentResponse => SwapFailureReason::InvalidResolvedPreimage,
            ErrorKind::PaymentNotFound => SwapFailureReason::PaymentRejected,
            ErrorKind::PaymentFailed
            | ErrorKind::Conflict
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset => SwapFailureReason::SendPaymentFailure,
            ErrorKind::Timeout => SwapFailureReason::DealTimedOut,
            ErrorKind::ServerError | ErrorKind::Unexpected | ErrorKind::AssertionViolation => {
                SwapFailureReason::UnexpectedClientError
            }
        }
    }
}
