//! Offer catalog: space-filtered discovery over the registry.

use std::sync::Arc;

use peerstash_common::Offer;

use crate::error::{CoordinatorError, Result};
use crate::registry::CapacityRegistry;

#[derive(Clone)]
pub struct OfferCatalog {
    registry: Arc<CapacityRegistry>,
}

impl OfferCatalog {
    pub fn new(registry: Arc<CapacityRegistry>) -> Self {
        Self { registry }
    }

    /// Nodes whose free space is at least `min_space`, largest first, ties
    /// by ascending id.
    pub fn list_offers(&self, min_space: i64) -> Result<Vec<Offer>> {
        let min_space = u64::try_from(min_space).map_err(|_| {
            CoordinatorError::InvalidArgument(format!("min_space must be >= 0, got {min_space}"))
        })?;

        let mut offers: Vec<Offer> = self
            .registry
            .handles()
            .into_iter()
            .filter_map(|handle| {
                let account = handle.lock();
                let free_space = account.free_space();
                (free_space >= min_space).then(|| Offer {
                    id: account.info.id.clone(),
                    endpoint: account.info.endpoint.clone(),
                    free_space,
                })
            })
            .collect();

        offers.sort_by(|a, b| b.free_space.cmp(&a.free_space).then_with(|| a.id.cmp(&b.id)));
        Ok(offers)
    }
}
