/// Typed emit helpers over the socket registry.
pub mod broadcast;
/// Chat persistence and fan-out.
pub mod chat_service;
/// Contracts for the wallet and voice collaborators.
pub mod collaborators;
/// OpenAPI documentation generation.
pub mod documentation;
/// Guess evaluation orchestration.
pub mod guess_service;
/// Health check service.
pub mod health_service;
/// Report recording and strike escalation.
pub mod report_service;
/// Canvas snapshot brokering for reconnecting viewers.
pub mod resync_service;
/// Room membership and setup operations.
pub mod room_service;
/// Socket lifecycle and event dispatch.
pub mod socket_service;
/// Storage connection supervisor with degraded mode.
pub mod storage_supervisor;
