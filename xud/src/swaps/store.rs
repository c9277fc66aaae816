use crate::swaps::{SecretHash, SwapDeal};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

/// Durable storage for deal snapshots, keyed by hash.
///
/// Every transition is upserted here before it is reported to the packet
/// layer.
#[async_trait]
pub trait SwapRepository: Send + Sync + 'static {
    async fn upsert(&self, deal: &SwapDeal) -> anyhow::Result<()>;

    async fn get(&self, r_hash: &SecretHash) -> anyhow::Result<Option<SwapDeal>>;

    async fn all(&self) -> anyhow::Result<Vec<SwapDeal>>;
}

#[async_trait]
impl<T> SwapRepository for Arc<T>
where
    T: SwapRepository + ?Sized,
{
    async fn upsert(&self, deal: &SwapDeal) -> anyhow::Result<()> {
        T::upsert(self, deal).await
    }

    async fn get(&self, r_hash: &SecretHash) -> anyhow::Result<Option<SwapDeal>> {
        T::get(self, r_hash).await
    }

    async fn all(&self) -> anyhow::Result<Vec<SwapDeal>> {
        T::all(self).await
    }
}

#[derive(Default, Debug)]
pub struct InMemorySwapRepository {
    deals: Mutex<HashMap<SecretHash, SwapDeal>>,
}

#[async_trait]
impl SwapRepository for InMemorySwapRepository {
    async fn upsert(&self, deal: &SwapDeal) -> anyhow::Result<()> {
        let mut deals = self.deals.lock().await;
        deals.insert(deal.r_hash(), deal.clone());
        Ok(())
    }

    async fn get(&self, r_hash: &SecretHash) -> anyhow::Result<Option<SwapDeal>> {
        let deals = self.deals.lock().await;
        Ok(deals.get(r_hash).cloned())
    }

    async fn all(&self) -> anyhow::Result<Vec<SwapDeal>> {
        let deals = self.deals.lock().await;
        Ok(deals.values().cloned().collect())
    }
}
