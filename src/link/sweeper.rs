//! Periodic removal of expired link bans

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::LINK_TARGET;
use crate::link::RequestStore;

/// Drops expired bans from the store on a fixed period
#[derive(Debug, Clone)]
pub struct BanSweeper {
    store: RequestStore,
}

impl BanSweeper {
    #[must_use]
    pub fn new(store: RequestStore) -> Self {
        Self { store }
    }

    /// Remove every ban expired at `now`
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        self.store.sweep_expired_bans(now)
    }

    /// Run forever, one sweep per `period`
    pub async fn run(self, period: Duration) {
        info!("Starting ban sweep task with {}s interval", period.as_secs());

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let removed = self.sweep(Utc::now());
            if removed > 0 {
                info!(target: LINK_TARGET, removed, "Expired link bans lifted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use poise::serenity_prelude::UserId;

    #[test]
    fn test_sweep_lifts_only_expired_bans() {
        let store = RequestStore::default();
        let now = Utc::now();
        store.ban(UserId::new(1), TimeDelta::hours(1), now);
        store.ban(UserId::new(2), TimeDelta::hours(12), now);

        let sweeper = BanSweeper::new(store.clone());
        assert_eq!(sweeper.sweep(now), 0);
        assert_eq!(sweeper.sweep(now + TimeDelta::hours(2)), 1);
        assert_eq!(sweeper.sweep(now + TimeDelta::hours(2)), 0);

        assert_eq!(store.bans().len(), 1);
        assert_eq!(store.ban_remaining(UserId::new(1), now + TimeDelta::hours(2)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweeps_on_schedule() {
        let store = RequestStore::default();
        // Already expired, removed on the first tick
        store.ban(UserId::new(1), TimeDelta::seconds(-1), Utc::now());

        let handle = tokio::spawn(BanSweeper::new(store.clone()).run(Duration::from_secs(60)));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(store.bans().is_empty());
        handle.abort();
    }
}
