use crate::swaps::{Secret, SecretHash, SwapDeal, SwapFailureReason, SwapState};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// The settlement result handed back to the packet layer, which notifies
/// the counterparty.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapOutcome {
    pub r_hash: SecretHash,
    pub state: SwapState,
    pub r_preimage: Option<Secret>,
    pub failure_reason: Option<SwapFailureReason>,
    pub message: Option<String>,
}

impl SwapOutcome {
    pub fn from_deal(deal: &SwapDeal) -> Self {
        Self {
            r_hash: deal.r_hash(),
            state: deal.state(),
            r_preimage: deal.r_preimage(),
            failure_reason: deal.failure_reason(),
            message: deal.error_message().map(str::to_owned),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == SwapState::Completed
    }
}

#[async_trait]
pub trait SwapReporter: Send + Sync + 'static {
    async fn report(&self, outcome: SwapOutcome);
}

#[async_trait]
impl<T> SwapReporter for Arc<T>
where
    T: SwapReporter + ?Sized,
{
    async fn report(&self, outcome: SwapOutcome) {
        T::report(self, outcome).await
    }
}

/// Reporter for a daemon running without a packet layer attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

#[async_trait]
impl SwapReporter for LogReporter {
    async fn report(&self, outcome: SwapOutcome) {
        match outcome.failure_reason {
            None => tracing::info!(r_hash = %outcome.r_hash, state = %outcome.state, "swap finished"),
            Some(reason) => tracing::warn!(
                r_hash = %outcome.r_hash,
                %reason,
                message = outcome.message.as_deref().unwrap_or_default(),
                "swap failed"
            ),
        }
    }
}
