//! Connection bootstrap for the MongoDB room store.
//!
//! Dialing is deadline-bounded rather than attempt-counted: the store
//! supervisor already spaces out whole connect attempts, so within one
//! attempt we just ping on a short fixed cadence until the server answers
//! or the deadline passes. Phase timers rebuilt at boot wait on this, so
//! a single attempt must not stall for long.

use std::time::{Duration, Instant};

use mongodb::{bson::doc, options::ClientOptions, Client, Database};
use tokio::time::sleep;

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_DATABASE: &str = "sketch_party";
const DEFAULT_DIAL_DEADLINE: Duration = Duration::from_secs(8);
const PING_CADENCE: Duration = Duration::from_millis(400);

/// Plain connection settings; the URI is parsed at dial time so a bad value
/// surfaces as a dial error, not a config-load error.
#[derive(Clone)]
pub struct MongoSettings {
    pub uri: String,
    pub database: String,
    pub dial_deadline: Duration,
}

impl MongoSettings {
    pub fn from_env() -> MongoResult<Self> {
        let uri = std::env::var("MONGO_URI")
            .map_err(|_| MongoDaoError::MissingEnvVar { var: "MONGO_URI" })?;
        let database = std::env::var("MONGO_DB").unwrap_or_else(|_| DEFAULT_DATABASE.to_owned());
        let dial_deadline = std::env::var("MONGO_DIAL_DEADLINE_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_DIAL_DEADLINE);
        Ok(Self {
            uri,
            database,
            dial_deadline,
        })
    }
}

/// Dial MongoDB and keep pinging until it answers or the deadline passes.
pub(super) async fn dial(settings: &MongoSettings) -> MongoResult<(Client, Database)> {
    let options =
        ClientOptions::parse(&settings.uri)
            .await
            .map_err(|source| MongoDaoError::BadUri {
                uri: settings.uri.clone(),
                source,
            })?;
    let client =
        Client::with_options(options).map_err(|source| MongoDaoError::ClientConstruction {
            source,
        })?;
    let database = client.database(&settings.database);

    let started = Instant::now();
    loop {
        let err = match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => return Ok((client, database)),
            Err(err) => err,
        };
        if started.elapsed() >= settings.dial_deadline {
            return Err(MongoDaoError::Unreachable {
                waited_ms: started.elapsed().as_millis() as u64,
                source: err,
            });
        }
        sleep(PING_CADENCE).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_parse_or_fall_back() {
        // No MONGO_URI set in the test environment.
        std::env::remove_var("MONGO_URI");
        assert!(matches!(
            MongoSettings::from_env(),
            Err(MongoDaoError::MissingEnvVar { var: "MONGO_URI" })
        ));
    }
}
