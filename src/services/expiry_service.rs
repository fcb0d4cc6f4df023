use std::time::SystemTime;

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    dao::{game_store::GameStore, models::GameTransition},
    error::ServiceError,
    services::session_service,
    state::{
        SharedState,
        lifecycle::{FinishReason, GameEvent, GameStatus},
    },
};

/// Games touched by one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Running games finished because their deadline passed.
    pub expired: usize,
    /// Stale waiting games abandoned and deleted.
    pub purged: usize,
    /// Finished games deleted once their retention elapsed.
    pub retired: usize,
}

/// Periodically finish expired sessions, purge stale lobbies and drop
/// finished games past their retention.
///
/// Sweeps are skipped while the application runs without a record store.
pub async fn run(state: SharedState) {
    let mut ticker = time::interval(state.config().sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(store) = state.game_store().await else {
            continue;
        };

        match sweep(&state, store.as_ref(), SystemTime::now()).await {
            Ok(report) if report != SweepReport::default() => {
                info!(
                    expired = report.expired,
                    purged = report.purged,
                    retired = report.retired,
                    "expiry sweep done"
                );
            }
            Ok(_) => debug!("expiry sweep found nothing to do"),
            Err(err) => warn!(error = %err, "expiry sweep failed"),
        }
    }
}

/// Run a single sweep as of `now`.
pub async fn sweep(
    state: &SharedState,
    store: &dyn GameStore,
    now: SystemTime,
) -> Result<SweepReport, ServiceError> {
    let config = state.config();
    let mut report = SweepReport::default();

    if config.expire_running_games {
        for game in store.list_games_by_status(GameStatus::Running).await? {
            if !game.is_expired_at(now) {
                continue;
            }
            if session_service::finish_game(state, store, game.id, FinishReason::Expired).await? {
                report.expired += 1;
            }
        }
    }

    for game in store.list_games_by_status(GameStatus::Waiting).await? {
        if !game.is_older_than(config.stale_waiting_after, now) {
            continue;
        }
        let next = game.status.apply(GameEvent::Abandon)?;
        if !store
            .transition_game(game.id, GameTransition::new(game.status, next))
            .await?
        {
            continue;
        }
        state.rooms().close_room(game.id);
        store.delete_game(game.id).await?;
        info!(game_id = %game.id, code = %game.code, "stale waiting game purged");
        report.purged += 1;
    }

    for game in store.list_games_by_status(GameStatus::Finished).await? {
        if !game.is_past_retention(config.finished_retention, now) {
            continue;
        }
        state.rooms().close_room(game.id);
        if store.delete_game(game.id).await? {
            debug!(game_id = %game.id, code = %game.code, "finished game removed");
            report.retired += 1;
        }
    }

    Ok(report)
}
