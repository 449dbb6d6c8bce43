//! Shared fixtures for unit tests.

use std::sync::Arc;

use parking_lot::Mutex;
use vault_engine_core::{
    Clock, CollaboratorResult, ManualClock, PriceData, PriceFeed, PrincipalsConfig, RiskConfig,
};
use vault_engine_risk::RiskManager;

pub struct TestFeed {
    clock: Arc<ManualClock>,
    price: Mutex<i128>,
}

impl TestFeed {
    pub fn set(&self, price: i128) {
        *self.price.lock() = price;
    }
}

impl PriceFeed for TestFeed {
    fn latest_price(&self) -> CollaboratorResult<PriceData> {
        Ok(PriceData {
            value: *self.price.lock(),
            updated_at: self.clock.now(),
            round_complete: true,
        })
    }
}

/// Risk manager over a feed priced at 1,000 and a manual clock.
pub fn risk_manager() -> (Arc<RiskManager>, Arc<TestFeed>, Arc<ManualClock>, PrincipalsConfig) {
    let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
    let feed = Arc::new(TestFeed {
        clock: clock.clone(),
        price: Mutex::new(1_000),
    });
    let principals = PrincipalsConfig::default();
    let risk = Arc::new(RiskManager::new(
        RiskConfig::default(),
        &principals,
        feed.clone(),
        clock.clone(),
    ));
    (risk, feed, clock, principals)
}
