use mongodb::error::Error as MongoError;
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    BadUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB did not answer a ping within {waited_ms} ms")]
    Unreachable {
        waited_ms: u64,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    Ping {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to allocate a room id")]
    AllocateRoomId {
        #[source]
        source: MongoError,
    },
    #[error("failed to write room `{id}`")]
    WriteRoom {
        id: i64,
        #[source]
        source: MongoError,
    },
    #[error("failed to load room `{id}`")]
    LoadRoom {
        id: i64,
        #[source]
        source: MongoError,
    },
    #[error("failed to load room by code `{code}`")]
    LoadRoomByCode {
        code: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to list rooms")]
    ListRooms {
        #[source]
        source: MongoError,
    },
    #[error("failed to write participant ({room_id}, {user_id})")]
    WriteParticipant {
        room_id: i64,
        user_id: i64,
        #[source]
        source: MongoError,
    },
    #[error("failed to load participants of room `{room_id}`")]
    LoadParticipants {
        room_id: i64,
        #[source]
        source: MongoError,
    },
    #[error("orphan sweep failed")]
    SweepOrphans {
        #[source]
        source: MongoError,
    },
    #[error("failed to save message in room `{room_id}`")]
    SaveMessage {
        room_id: i64,
        #[source]
        source: MongoError,
    },
    #[error("failed to record report in room `{room_id}`")]
    RecordReport {
        room_id: i64,
        #[source]
        source: MongoError,
    },
}

impl MongoDaoError {
    /// Short operation label carried into the backend-agnostic store error.
    pub fn op(&self) -> &'static str {
        match self {
            MongoDaoError::MissingEnvVar { .. } => "loading settings",
            MongoDaoError::BadUri { .. } | MongoDaoError::ClientConstruction { .. } => "dialing",
            MongoDaoError::Unreachable { .. } => "dialing",
            MongoDaoError::Ping { .. } => "health check",
            MongoDaoError::EnsureIndex { .. } => "ensuring indexes",
            MongoDaoError::AllocateRoomId { .. } => "allocating room id",
            MongoDaoError::WriteRoom { .. } => "writing room",
            MongoDaoError::LoadRoom { .. } | MongoDaoError::LoadRoomByCode { .. } => {
                "loading room"
            }
            MongoDaoError::ListRooms { .. } => "listing rooms",
            MongoDaoError::WriteParticipant { .. } => "writing participant",
            MongoDaoError::LoadParticipants { .. } => "loading participants",
            MongoDaoError::SweepOrphans { .. } => "sweeping orphans",
            MongoDaoError::SaveMessage { .. } => "saving message",
            MongoDaoError::RecordReport { .. } => "recording report",
        }
    }
}
