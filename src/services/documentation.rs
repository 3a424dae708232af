use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the game backend's REST surface.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::websocket::ws_handler,
        crate::routes::rooms::create_room,
        crate::routes::rooms::list_rooms,
        crate::routes::rooms::get_room,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::rooms::CreateRoomRequest,
            crate::dto::rooms::RoomSummary,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Room lobby bootstrap"),
        (name = "socket", description = "WebSocket upgrade for game sessions"),
    )
)]
pub struct ApiDoc;
