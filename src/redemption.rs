use std::sync::Arc;

use tracing::debug;

use crate::catalog::{Catalog, CatalogError};

/// Counts presentments of issued tickets.
#[derive(Clone)]
pub struct RedemptionLedger {
    catalog: Arc<Catalog>,
}

impl RedemptionLedger {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Record one presentment of `ticket_id` at `spot_id` and return how many
    /// times it had been presented before. 0 means first use.
    pub async fn redeem(&self, spot_id: i64, ticket_id: i64) -> Result<i64, CatalogError> {
        let mut uow = self.catalog.begin();
        let previous = self
            .catalog
            .increment_presentment_counter(&mut uow, ticket_id, spot_id)
            .await?;
        uow.commit().await?;

        metrics::counter!(crate::observability::PRESENTMENTS_TOTAL).increment(1);
        debug!(spot_id, ticket_id, previous, "ticket presented");
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::model::*;
    use crate::reservation::ReservationEngine;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("spotbook_test_redemption");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn setup(name: &str) -> (ReservationEngine, RedemptionLedger) {
        let catalog = Arc::new(Catalog::open(test_wal_path(name)).unwrap());
        catalog
            .create_spot(&SpotView {
                name: "Concert".into(),
                note: None,
                slots: vec![SlotView::new(4_000_000_000).with_capacity(1)],
            })
            .await
            .unwrap();
        (ReservationEngine::new(catalog.clone()), RedemptionLedger::new(catalog))
    }

    #[tokio::test]
    async fn repeated_redemption_counts_up() {
        let (engine, ledger) = setup("repeated.wal").await;
        let ticket = engine.reserve("Concert", None, None).await.unwrap().unwrap();

        for expected in 0..5 {
            assert_eq!(ledger.redeem(ticket.spot_id, ticket.ticket_id).await.unwrap(), expected);
        }
        assert_eq!(engine.catalog().get_ticket(ticket.ticket_id).unwrap().presentments, 5);
    }

    #[tokio::test]
    async fn tickets_are_counted_separately() {
        let (engine, ledger) = setup("separate.wal").await;
        let first = engine.reserve("Concert", None, None).await.unwrap().unwrap();
        let second = engine.reserve("Concert", None, None).await.unwrap().unwrap();

        assert_eq!(ledger.redeem(first.spot_id, first.ticket_id).await.unwrap(), 0);
        assert_eq!(ledger.redeem(first.spot_id, first.ticket_id).await.unwrap(), 1);
        assert_eq!(ledger.redeem(second.spot_id, second.ticket_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_redemptions_never_share_a_count() {
        let (engine, ledger) = setup("concurrent.wal").await;
        let ticket = engine.reserve("Concert", None, None).await.unwrap().unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                let (spot_id, ticket_id) = (ticket.spot_id, ticket.ticket_id);
                tokio::spawn(async move { ledger.redeem(spot_id, ticket_id).await })
            })
            .collect();
        let mut seen: Vec<i64> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn unknown_pair_is_not_found() {
        let (engine, ledger) = setup("unknown.wal").await;
        let ticket = engine.reserve("Concert", None, None).await.unwrap().unwrap();

        assert!(matches!(
            ledger.redeem(ticket.spot_id, ticket.ticket_id + 1).await,
            Err(CatalogError::NotFound(_))
        ));
        assert!(matches!(
            ledger.redeem(ticket.spot_id + 1, ticket.ticket_id).await,
            Err(CatalogError::NotFound(_))
        ));
        assert_eq!(engine.catalog().get_ticket(ticket.ticket_id).unwrap().presentments, 0);
    }
}
