//! Periodic purge of expired evaluations.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use cr_core::{RuleStore, RulesEngine};

/// Spawn a task that drops expired cache entries every `every`.
///
/// Abort the returned handle to stop it.
pub fn spawn_cache_sweeper<S>(engine: Arc<RulesEngine<S>>, every: Duration) -> JoinHandle<()>
where
    S: RuleStore + 'static,
{
    let every = every.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let purged = engine.purge_expired();
            if purged > 0 {
                log::debug!("Purged {purged} expired evaluations");
            }
        }
    })
}
