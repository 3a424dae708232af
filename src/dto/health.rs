use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Whether the startup sweep finished and joins are accepted.
    pub accepting_joins: bool,
}

impl HealthResponse {
    pub fn ok(accepting_joins: bool) -> Self {
        Self {
            status: "ok".to_string(),
            accepting_joins,
        }
    }

    pub fn degraded(accepting_joins: bool) -> Self {
        Self {
            status: "degraded".to_string(),
            accepting_joins,
        }
    }
}
