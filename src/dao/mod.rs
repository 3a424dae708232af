/// Database model definitions.
pub mod models;
/// Short-TTL snapshot of hot room fields.
pub mod room_cache;
/// Room state storage and retrieval operations.
pub mod room_store;
