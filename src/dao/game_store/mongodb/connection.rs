use std::time::Duration;

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use tokio::time::sleep;
use tracing::debug;

use super::error::{MongoDaoError, MongoResult};

const PING_ATTEMPTS: u32 = 10;
const FIRST_PING_DELAY: Duration = Duration::from_millis(250);
const PING_DELAY_CAP: Duration = Duration::from_secs(5);

/// Open a client on `database_name`; the handle is returned only once the
/// server answered a `ping`.
pub async fn establish_connection(
    options: &ClientOptions,
    database_name: &str,
) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);
    wait_for_ping(&database).await?;
    Ok((client, database))
}

async fn wait_for_ping(database: &Database) -> MongoResult<()> {
    let mut pause = FIRST_PING_DELAY;
    for attempt in 1..=PING_ATTEMPTS {
        let err = match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => return Ok(()),
            Err(err) => err,
        };
        if attempt == PING_ATTEMPTS {
            return Err(MongoDaoError::InitialPing {
                attempts: attempt,
                source: err,
            });
        }
        debug!(attempt, database = database.name(), error = %err, "mongo not answering yet");
        sleep(pause).await;
        pause = (pause * 2).min(PING_DELAY_CAP);
    }
    Ok(())
}
