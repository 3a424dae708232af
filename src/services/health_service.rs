use crate::{dto::health::HealthResponse, state::SharedState};

/// Current backend health: degraded while no storage backend is installed
/// or the last health check failed.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let accepting = state.accepting_joins();
    if state.is_degraded().await {
        HealthResponse::degraded(accepting)
    } else {
        HealthResponse::ok(accepting)
    }
}
