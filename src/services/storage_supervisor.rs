use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{game_store::GameStore, storage::StorageError},
    state::SharedState,
};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const IN_PLACE_RECONNECTS: u32 = 3;

/// Doubling delay between connection attempts.
#[derive(Debug, Clone, Copy)]
struct Backoff {
    current: Duration,
}

impl Backoff {
    const FLOOR: Duration = Duration::from_secs(1);
    const CEILING: Duration = Duration::from_secs(10);

    fn new() -> Self {
        Self {
            current: Self::FLOOR,
        }
    }

    /// Delay to wait now; the next call returns twice as much, capped.
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(Self::CEILING);
        delay
    }
}

/// Keep a record store installed in `state`.
///
/// Games stay unavailable (degraded mode) until `connect` succeeds. A failed
/// health check flags the state degraded and retries the existing handle a
/// few times; when that does not help the handle is dropped and `connect`
/// starts over.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn GameStore>, StorageError>> + Send,
{
    let mut backoff = Backoff::new();

    loop {
        let store = match connect().await {
            Ok(store) => store,
            Err(err) => {
                let delay = backoff.next_delay();
                warn!(error = %err, retry_in = ?delay, "record store unreachable");
                sleep(delay).await;
                continue;
            }
        };

        state.install_game_store(store.clone()).await;
        info!("record store connected; games available");
        backoff = Backoff::new();

        watch_store(&state, store.as_ref()).await;
        state.clear_game_store().await;
        warn!("record store handle dropped; reconnecting from scratch");
        sleep(backoff.next_delay()).await;
    }
}

/// Health-check `store` until it is beyond in-place repair.
async fn watch_store(state: &SharedState, store: &dyn GameStore) {
    loop {
        sleep(HEALTH_POLL_INTERVAL).await;
        let Err(err) = store.health_check().await else {
            if state.is_degraded() {
                info!("record store healthy again");
                state.set_degraded(false);
            }
            continue;
        };

        warn!(error = %err, "record store health check failed; entering degraded mode");
        state.set_degraded(true);
        if !reconnect_in_place(store).await {
            return;
        }
        state.set_degraded(false);
    }
}

async fn reconnect_in_place(store: &dyn GameStore) -> bool {
    let mut backoff = Backoff::new();
    for attempt in 1..=IN_PLACE_RECONNECTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "record store reconnected");
                return true;
            }
            Err(err) => {
                warn!(attempt, error = %err, "record store reconnect failed");
                sleep(backoff.next_delay()).await;
            }
        }
    }
    false
}
