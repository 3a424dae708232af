use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::{future::BoxFuture, TryStreamExt};
use mongodb::bson::{doc, to_bson, Bson, DateTime, Document};
use mongodb::error::ErrorKind;
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};
use rand::Rng;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::warn;
use uuid::Uuid;

use super::bootstrap::{dial, MongoSettings};
use super::error::{MongoDaoError, MongoResult};
use super::models::{
    doc_id, participant_key, phase_bson, report_kind_str, MongoMessageDocument,
    MongoParticipantDocument, MongoReportDocument, MongoRoomDocument,
};
use crate::dao::models::{
    MessageEntity, NewMessage, NewReport, NewRoom, ParticipantEntity, ReportEntity, RoomEntity,
    RoomSettings,
};
use crate::dao::room_store::{
    JoinOutcome, ParticipantPatch, PhaseUpdate, RoomStore, StoreError, StoreResult,
};
use crate::game::phases::{RoomStatus, RoundPhase, Team, ELIMINATION_ALLOWANCE};

const ROOM_COLLECTION: &str = "rooms";
const PARTICIPANT_COLLECTION: &str = "room_participants";
const MESSAGE_COLLECTION: &str = "messages";
const REPORT_COLLECTION: &str = "reports";
const COUNTER_COLLECTION: &str = "counters";

/// Bounded retry for multi-row writes that can hit transient write conflicts.
const WRITE_RETRY_ATTEMPTS: u32 = 3;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct MongoRoomStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    settings: MongoSettings,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::Ping { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = dial(&self.settings).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoRoomStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(settings: MongoSettings) -> MongoResult<Self> {
        let (client, database) = dial(&settings).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            settings,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        let rooms = database.collection::<Document>(ROOM_COLLECTION);
        let code_index = IndexModel::builder()
            .keys(doc! { "code": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("room_code_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        rooms
            .create_index(code_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: ROOM_COLLECTION,
                index: "code",
                source,
            })?;

        let participants = database.collection::<Document>(PARTICIPANT_COLLECTION);
        let seat_index = IndexModel::builder()
            .keys(doc! { "room_id": 1, "user_id": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("participant_seat_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        participants
            .create_index(seat_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: PARTICIPANT_COLLECTION,
                index: "room_id,user_id",
                source,
            })?;

        let reports = database.collection::<Document>(REPORT_COLLECTION);
        let report_index = IndexModel::builder()
            .keys(doc! { "room_id": 1, "target_user_id": 1, "kind": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("report_target_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        reports
            .create_index(report_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: REPORT_COLLECTION,
                index: "room_id,target_user_id,kind",
                source,
            })?;

        let messages = database.collection::<Document>(MESSAGE_COLLECTION);
        let message_index = IndexModel::builder()
            .keys(doc! { "room_id": 1, "sent_at": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("message_room_idx".to_owned()))
                    .build(),
            )
            .build();
        messages
            .create_index(message_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: MESSAGE_COLLECTION,
                index: "room_id,sent_at",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn rooms(&self) -> Collection<MongoRoomDocument> {
        self.database().await.collection(ROOM_COLLECTION)
    }

    async fn participants(&self) -> Collection<MongoParticipantDocument> {
        self.database().await.collection(PARTICIPANT_COLLECTION)
    }

    async fn messages(&self) -> Collection<MongoMessageDocument> {
        self.database().await.collection(MESSAGE_COLLECTION)
    }

    async fn reports(&self) -> Collection<MongoReportDocument> {
        self.database().await.collection(REPORT_COLLECTION)
    }

    async fn next_room_id(&self) -> MongoResult<i64> {
        let counters = self.database().await.collection::<Document>(COUNTER_COLLECTION);
        let counter = counters
            .find_one_and_update(
                doc! { "_id": "rooms" },
                doc! { "$inc": { "seq": Bson::Int64(1) } },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::AllocateRoomId { source })?;

        Ok(counter
            .and_then(|doc| doc.get_i64("seq").ok())
            .unwrap_or(1))
    }

    /// Claim one active seat if the room still has capacity.
    async fn claim_seat(&self, room_id: i64, released: bool) -> MongoResult<bool> {
        let rooms = self.rooms().await;
        let (filter, delta) = if released {
            (doc! { "_id": room_id, "seat_count": { "$gt": 0 } }, -1)
        } else {
            (
                doc! { "_id": room_id, "$expr": { "$lt": ["$seat_count", "$max_players"] } },
                1,
            )
        };
        let updated = rooms
            .find_one_and_update(filter, doc! { "$inc": { "seat_count": delta } })
            .await
            .map_err(|source| MongoDaoError::WriteRoom {
                id: room_id,
                source,
            })?;
        Ok(updated.is_some())
    }

    async fn release_seat(&self, room_id: i64) -> MongoResult<()> {
        self.claim_seat(room_id, true).await.map(|_| ())
    }
}

fn phase_update_document(update: &PhaseUpdate) -> Document {
    let mut set = doc! {
        "round_phase": phase_bson(update.phase),
        "round_phase_end_time": match update.phase_end_time {
            Some(end) => Bson::DateTime(DateTime::from_system_time(end)),
            None => Bson::Null,
        },
        "updated_at": DateTime::from_system_time(SystemTime::now()),
    };
    if let Some(status) = update.status {
        set.insert("status", status.as_str());
    }
    if let Some(round) = update.current_round {
        set.insert("current_round", round);
    }
    if let Some(drawer) = update.current_drawer_id {
        set.insert("current_drawer_id", drawer.map(Bson::Int64).unwrap_or(Bson::Null));
    }
    if let Some(ref word) = update.current_word {
        set.insert(
            "current_word",
            word.clone().map(Bson::String).unwrap_or(Bson::Null),
        );
    }
    if let Some(ref options) = update.current_word_options {
        let value = match options {
            Some(words) => Bson::Array(words.iter().cloned().map(Bson::String).collect()),
            None => Bson::Null,
        };
        set.insert("current_word_options", value);
    }
    if let Some(pointer) = update.drawer_pointer_index {
        set.insert("drawer_pointer_index", pointer);
    }
    if let Some(last) = update.last_drawer_id {
        set.insert("last_drawer_id", last.map(Bson::Int64).unwrap_or(Bson::Null));
    }
    if let Some(ref drawn) = update.drawn_user_ids {
        set.insert(
            "drawn_user_ids",
            Bson::Array(drawn.iter().copied().map(Bson::Int64).collect()),
        );
    }
    if update.clear_used_words {
        set.insert("used_words", Bson::Array(Vec::new()));
    }

    let mut document = doc! { "$set": set };
    if let Some(ref word) = update.used_word {
        document.insert("$addToSet", doc! { "used_words": word.clone() });
    }
    document
}

fn participant_patch_document(patch: &ParticipantPatch) -> Document {
    let mut set = Document::new();
    if let Some(socket) = patch.socket_id {
        set.insert(
            "socket_id",
            socket
                .map(|id| Bson::String(id.to_string()))
                .unwrap_or(Bson::Null),
        );
    }
    if let Some(active) = patch.is_active {
        set.insert("is_active", active);
    }
    if let Some(team) = patch.team {
        set.insert(
            "team",
            team.map(|team| Bson::String(team.as_str().to_owned()))
                .unwrap_or(Bson::Null),
        );
    }
    if let Some(paid) = patch.has_paid_entry {
        set.insert("has_paid_entry", paid);
    }
    if let Some(drawn) = patch.has_drawn {
        set.insert("has_drawn", drawn);
    }
    if let Some(count) = patch.elimination_count {
        set.insert("elimination_count", count);
    }
    if let Some(count) = patch.skip_count {
        set.insert("skip_count", count);
    }
    doc! { "$set": set }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(mongodb::error::WriteFailure::WriteError(ref write))
            if write.code == 11000
    )
}

fn random_code() -> String {
    let mut rng = rand::thread_rng();
    (0..5)
        .map(|_| char::from(b'A' + rng.gen_range(0..26)))
        .collect()
}

fn new_participant(room_id: i64, user_id: i64, team: Option<Team>) -> ParticipantEntity {
    let now = SystemTime::now();
    ParticipantEntity {
        room_id,
        user_id,
        team,
        is_drawer: false,
        score: 0,
        points_updated_at: now,
        has_guessed_this_round: false,
        has_paid_entry: false,
        has_drawn: false,
        elimination_count: ELIMINATION_ALLOWANCE,
        skip_count: 0,
        is_active: true,
        socket_id: None,
        banned_at: None,
        joined_at: now,
    }
}

impl MongoRoomStore {
    async fn create_room_inner(&self, new_room: NewRoom) -> MongoResult<RoomEntity> {
        let id = self.next_room_id().await?;
        let now = SystemTime::now();
        let rooms = self.rooms().await;

        // The unique index on `code` backs collision retry.
        loop {
            let room = RoomEntity {
                id,
                code: random_code(),
                owner_id: new_room.owner_id,
                max_players: new_room.max_players,
                is_public: new_room.is_public,
                game_mode: new_room.game_mode,
                settings: new_room.settings.clone(),
                status: RoomStatus::Lobby,
                current_round: 0,
                round_phase: None,
                round_phase_end_time: None,
                current_drawer_id: None,
                current_word: None,
                current_word_options: None,
                drawer_pointer_index: 0,
                last_drawer_id: None,
                drawn_user_ids: Vec::new(),
                used_words: Vec::new(),
                seat_count: 0,
                created_at: now,
                updated_at: now,
            };
            let document: MongoRoomDocument = room.clone().into();
            match rooms.insert_one(&document).await {
                Ok(_) => return Ok(room),
                Err(err) if is_duplicate_key(&err) => continue,
                Err(source) => return Err(MongoDaoError::WriteRoom { id, source }),
            }
        }
    }

    async fn join_room_inner(
        &self,
        room_id: i64,
        user_id: i64,
        team: Option<Team>,
    ) -> MongoResult<JoinOutcome> {
        let rooms = self.rooms().await;
        let participants = self.participants().await;

        let Some(room) = rooms
            .find_one(doc_id(room_id))
            .await
            .map_err(|source| MongoDaoError::LoadRoom { id: room_id, source })?
        else {
            return Ok(JoinOutcome::RoomGone);
        };

        let existing = participants
            .find_one(participant_key(room_id, user_id))
            .await
            .map_err(|source| MongoDaoError::LoadParticipants { room_id, source })?;

        if let Some(existing) = existing {
            let entity: ParticipantEntity = existing.into();
            if entity.is_banned() {
                return Ok(JoinOutcome::Banned);
            }
            if entity.is_active {
                return Ok(JoinOutcome::Rejoined(entity));
            }
            if room.status == RoomStatus::Playing {
                return Ok(JoinOutcome::SeatLost);
            }
            if !self.claim_seat(room_id, false).await? {
                return Ok(JoinOutcome::RoomFull);
            }
            let updated = participants
                .find_one_and_update(
                    participant_key(room_id, user_id),
                    doc! { "$set": { "is_active": true } },
                )
                .return_document(ReturnDocument::After)
                .await
                .map_err(|source| MongoDaoError::WriteParticipant {
                    room_id,
                    user_id,
                    source,
                })?;
            return match updated {
                Some(doc) => Ok(JoinOutcome::Joined(doc.into())),
                None => {
                    self.release_seat(room_id).await?;
                    Ok(JoinOutcome::RoomGone)
                }
            };
        }

        if !self.claim_seat(room_id, false).await? {
            return Ok(JoinOutcome::RoomFull);
        }

        let participant = new_participant(room_id, user_id, team);
        let document: MongoParticipantDocument = participant.clone().into();
        match participants.insert_one(&document).await {
            Ok(_) => Ok(JoinOutcome::Joined(participant)),
            Err(err) if is_duplicate_key(&err) => {
                // Lost the insert race to a concurrent join of the same user.
                self.release_seat(room_id).await?;
                let winner = participants
                    .find_one(participant_key(room_id, user_id))
                    .await
                    .map_err(|source| MongoDaoError::LoadParticipants { room_id, source })?;
                Ok(winner
                    .map(|doc| JoinOutcome::Rejoined(doc.into()))
                    .unwrap_or(JoinOutcome::RoomGone))
            }
            Err(source) => {
                self.release_seat(room_id).await?;
                Err(MongoDaoError::WriteParticipant {
                    room_id,
                    user_id,
                    source,
                })
            }
        }
    }

    /// One attempt at the whole-team award; the trait impl wraps this in
    /// the bounded conflict retry.
    async fn award_team_inner(
        &self,
        room_id: i64,
        team: Team,
        points: i32,
        at: SystemTime,
    ) -> MongoResult<Vec<ParticipantEntity>> {
        let participants = self.participants().await;
        let filter = doc! {
            "room_id": room_id,
            "team": team.as_str(),
            "is_active": true,
            "has_guessed_this_round": false,
        };
        let update = doc! {
            "$inc": { "score": points },
            "$set": {
                "has_guessed_this_round": true,
                "points_updated_at": DateTime::from_system_time(at),
            },
        };
        participants
            .update_many(filter, update)
            .await
            .map_err(|source| MongoDaoError::WriteParticipant {
                room_id,
                user_id: 0,
                source,
            })?;

        let awarded: Vec<MongoParticipantDocument> = participants
            .find(doc! {
                "room_id": room_id,
                "team": team.as_str(),
                "is_active": true,
                "has_guessed_this_round": true,
            })
            .sort(doc! { "user_id": 1 })
            .await
            .map_err(|source| MongoDaoError::LoadParticipants { room_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadParticipants { room_id, source })?;

        Ok(awarded.into_iter().map(Into::into).collect())
    }
}

impl RoomStore for MongoRoomStore {
    fn create_room(&self, new_room: NewRoom) -> BoxFuture<'static, StoreResult<RoomEntity>> {
        let store = self.clone();
        Box::pin(async move { store.create_room_inner(new_room).await.map_err(Into::into) })
    }

    fn find_room(&self, id: i64) -> BoxFuture<'static, StoreResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let rooms = store.rooms().await;
            let document = rooms
                .find_one(doc_id(id))
                .await
                .map_err(|source| MongoDaoError::LoadRoom { id, source })?;
            Ok(document.map(Into::into))
        })
    }

    fn find_room_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StoreResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let rooms = store.rooms().await;
            let document = rooms
                .find_one(doc! { "code": &code })
                .await
                .map_err(|source| MongoDaoError::LoadRoomByCode { code, source })?;
            Ok(document.map(Into::into))
        })
    }

    fn list_public_rooms(&self) -> BoxFuture<'static, StoreResult<Vec<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let rooms = store.rooms().await;
            let documents: Vec<MongoRoomDocument> = rooms
                .find(doc! { "is_public": true, "status": { "$in": ["lobby", "waiting"] } })
                .sort(doc! { "_id": 1 })
                .await
                .map_err(|source| MongoDaoError::ListRooms { source })?
                .try_collect()
                .await
                .map_err(|source| MongoDaoError::ListRooms { source })?;
            Ok(documents.into_iter().map(Into::into).collect())
        })
    }

    fn list_playing_rooms(&self) -> BoxFuture<'static, StoreResult<Vec<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let rooms = store.rooms().await;
            let documents: Vec<MongoRoomDocument> = rooms
                .find(doc! { "status": "playing" })
                .sort(doc! { "_id": 1 })
                .await
                .map_err(|source| MongoDaoError::ListRooms { source })?
                .try_collect()
                .await
                .map_err(|source| MongoDaoError::ListRooms { source })?;
            Ok(documents.into_iter().map(Into::into).collect())
        })
    }

    fn update_settings(
        &self,
        room_id: i64,
        settings: RoomSettings,
    ) -> BoxFuture<'static, StoreResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let rooms = store.rooms().await;
            let settings_bson = to_bson(&settings).unwrap_or(Bson::Null);
            let updated = rooms
                .find_one_and_update(
                    doc_id(room_id),
                    doc! { "$set": {
                        "settings": settings_bson,
                        "updated_at": DateTime::from_system_time(SystemTime::now()),
                    } },
                )
                .return_document(ReturnDocument::After)
                .await
                .map_err(|source| MongoDaoError::WriteRoom { id: room_id, source })?;
            Ok(updated.map(Into::into))
        })
    }

    fn set_status(
        &self,
        room_id: i64,
        status: RoomStatus,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let rooms = store.rooms().await;
            rooms
                .update_one(
                    doc_id(room_id),
                    doc! { "$set": {
                        "status": status.as_str(),
                        "updated_at": DateTime::from_system_time(SystemTime::now()),
                    } },
                )
                .await
                .map_err(|source| MongoDaoError::WriteRoom { id: room_id, source })?;
            Ok(())
        })
    }

    fn transition_phase(
        &self,
        room_id: i64,
        from: Option<RoundPhase>,
        update: PhaseUpdate,
    ) -> BoxFuture<'static, StoreResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let rooms = store.rooms().await;
            let filter = doc! { "_id": room_id, "round_phase": phase_bson(from) };
            let updated = rooms
                .find_one_and_update(filter, phase_update_document(&update))
                .return_document(ReturnDocument::After)
                .await
                .map_err(|source| MongoDaoError::WriteRoom { id: room_id, source })?;
            Ok(updated.map(Into::into))
        })
    }

    fn delete_room(&self, room_id: i64) -> BoxFuture<'static, StoreResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let rooms = store.rooms().await;
            let deleted = rooms
                .delete_one(doc_id(room_id))
                .await
                .map_err(|source| MongoDaoError::WriteRoom { id: room_id, source })?;
            store
                .participants()
                .await
                .delete_many(doc! { "room_id": room_id })
                .await
                .map_err(|source| MongoDaoError::WriteParticipant {
                    room_id,
                    user_id: 0,
                    source,
                })?;
            Ok(deleted.deleted_count > 0)
        })
    }

    fn join_room(
        &self,
        room_id: i64,
        user_id: i64,
        team: Option<Team>,
    ) -> BoxFuture<'static, StoreResult<JoinOutcome>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .join_room_inner(room_id, user_id, team)
                .await
                .map_err(Into::into)
        })
    }

    fn find_participant(
        &self,
        room_id: i64,
        user_id: i64,
    ) -> BoxFuture<'static, StoreResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let participants = store.participants().await;
            let document = participants
                .find_one(participant_key(room_id, user_id))
                .await
                .map_err(|source| MongoDaoError::LoadParticipants { room_id, source })?;
            Ok(document.map(Into::into))
        })
    }

    fn list_participants(
        &self,
        room_id: i64,
    ) -> BoxFuture<'static, StoreResult<Vec<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let participants = store.participants().await;
            let documents: Vec<MongoParticipantDocument> = participants
                .find(doc! { "room_id": room_id })
                .sort(doc! { "user_id": 1 })
                .await
                .map_err(|source| MongoDaoError::LoadParticipants { room_id, source })?
                .try_collect()
                .await
                .map_err(|source| MongoDaoError::LoadParticipants { room_id, source })?;
            Ok(documents.into_iter().map(Into::into).collect())
        })
    }

    fn update_participant(
        &self,
        room_id: i64,
        user_id: i64,
        patch: ParticipantPatch,
    ) -> BoxFuture<'static, StoreResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let participants = store.participants().await;
            let activity_change = patch.is_active;
            let before = participants
                .find_one_and_update(
                    participant_key(room_id, user_id),
                    participant_patch_document(&patch),
                )
                .return_document(ReturnDocument::Before)
                .await
                .map_err(|source| MongoDaoError::WriteParticipant {
                    room_id,
                    user_id,
                    source,
                })?;

            let Some(before) = before else {
                return Ok(None);
            };
            let mut after: ParticipantEntity = before.into();
            let was_active = after.is_active;

            // Keep the room's active-seat counter in step with activity flips.
            if let Some(now_active) = activity_change {
                if now_active != was_active {
                    store.claim_seat(room_id, !now_active).await?;
                }
            }

            // Re-apply the patch onto the pre-image to return the post-image.
            if let Some(socket) = patch.socket_id {
                after.socket_id = socket;
            }
            if let Some(active) = patch.is_active {
                after.is_active = active;
            }
            if let Some(team) = patch.team {
                after.team = team;
            }
            if let Some(paid) = patch.has_paid_entry {
                after.has_paid_entry = paid;
            }
            if let Some(drawn) = patch.has_drawn {
                after.has_drawn = drawn;
            }
            if let Some(count) = patch.elimination_count {
                after.elimination_count = count;
            }
            if let Some(count) = patch.skip_count {
                after.skip_count = count;
            }
            Ok(Some(after))
        })
    }

    fn set_drawer(&self, room_id: i64, drawer_id: i64) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let participants = store.participants().await;
            participants
                .update_many(
                    doc! { "room_id": room_id, "user_id": { "$ne": drawer_id } },
                    doc! { "$set": { "is_drawer": false } },
                )
                .await
                .map_err(|source| MongoDaoError::WriteParticipant {
                    room_id,
                    user_id: drawer_id,
                    source,
                })?;
            participants
                .update_one(
                    participant_key(room_id, drawer_id),
                    doc! { "$set": { "is_drawer": true } },
                )
                .await
                .map_err(|source| MongoDaoError::WriteParticipant {
                    room_id,
                    user_id: drawer_id,
                    source,
                })?;
            Ok(())
        })
    }

    fn award_guess(
        &self,
        room_id: i64,
        user_id: i64,
        points: i32,
        at: SystemTime,
    ) -> BoxFuture<'static, StoreResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let participants = store.participants().await;
            let updated = participants
                .find_one_and_update(
                    doc! {
                        "room_id": room_id,
                        "user_id": user_id,
                        "has_guessed_this_round": false,
                    },
                    doc! {
                        "$inc": { "score": points },
                        "$set": {
                            "has_guessed_this_round": true,
                            "points_updated_at": DateTime::from_system_time(at),
                        },
                    },
                )
                .return_document(ReturnDocument::After)
                .await
                .map_err(|source| MongoDaoError::WriteParticipant {
                    room_id,
                    user_id,
                    source,
                })?;
            Ok(updated.map(Into::into))
        })
    }

    fn award_team(
        &self,
        room_id: i64,
        team: Team,
        points: i32,
        at: SystemTime,
    ) -> BoxFuture<'static, StoreResult<Vec<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            // The multi-row award can collide with concurrent seat and flag
            // writes; retry a bounded number of times, then report the
            // conflict rather than wedging the round.
            let mut attempt = 1;
            loop {
                match store.award_team_inner(room_id, team, points, at).await {
                    Ok(members) => return Ok(members),
                    Err(err) if attempt < WRITE_RETRY_ATTEMPTS => {
                        warn!(room_id, attempt, error = %err, "team award collided; retrying");
                        sleep(WRITE_RETRY_DELAY * attempt).await;
                        attempt += 1;
                    }
                    Err(err) => {
                        warn!(room_id, error = %err, "team award exhausted its retries");
                        return Err(StoreError::Conflict {
                            op: "award_team",
                            room_id,
                            attempts: WRITE_RETRY_ATTEMPTS,
                        });
                    }
                }
            }
        })
    }

    fn reset_round_flags(&self, room_id: i64) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let participants = store.participants().await;
            participants
                .update_many(
                    doc! { "room_id": room_id },
                    doc! { "$set": { "has_guessed_this_round": false, "is_drawer": false } },
                )
                .await
                .map_err(|source| MongoDaoError::WriteParticipant {
                    room_id,
                    user_id: 0,
                    source,
                })?;
            Ok(())
        })
    }

    fn reset_scores(&self, room_id: i64) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let participants = store.participants().await;
            participants
                .update_many(
                    doc! { "room_id": room_id },
                    doc! { "$set": {
                        "score": 0,
                        "has_guessed_this_round": false,
                        "has_paid_entry": false,
                        "has_drawn": false,
                        "is_drawer": false,
                        "elimination_count": ELIMINATION_ALLOWANCE,
                        "skip_count": 0,
                    } },
                )
                .await
                .map_err(|source| MongoDaoError::WriteParticipant {
                    room_id,
                    user_id: 0,
                    source,
                })?;
            Ok(())
        })
    }

    fn remove_participant(
        &self,
        room_id: i64,
        user_id: i64,
    ) -> BoxFuture<'static, StoreResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let participants = store.participants().await;
            let removed = participants
                .find_one_and_delete(participant_key(room_id, user_id))
                .await
                .map_err(|source| MongoDaoError::WriteParticipant {
                    room_id,
                    user_id,
                    source,
                })?;
            if let Some(ref doc) = removed {
                if doc.is_active {
                    store.release_seat(room_id).await?;
                }
            }
            Ok(removed.is_some())
        })
    }

    fn ban_participant(
        &self,
        room_id: i64,
        user_id: i64,
        at: SystemTime,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let participants = store.participants().await;
            let before = participants
                .find_one_and_update(
                    participant_key(room_id, user_id),
                    doc! { "$set": {
                        "banned_at": DateTime::from_system_time(at),
                        "is_active": false,
                        "socket_id": Bson::Null,
                    } },
                )
                .return_document(ReturnDocument::Before)
                .await
                .map_err(|source| MongoDaoError::WriteParticipant {
                    room_id,
                    user_id,
                    source,
                })?;
            if let Some(before) = before {
                if before.is_active {
                    store.release_seat(room_id).await?;
                }
            }
            Ok(())
        })
    }

    fn sweep_orphans(&self) -> BoxFuture<'static, StoreResult<Vec<i64>>> {
        let store = self.clone();
        Box::pin(async move {
            let participants = store.participants().await;
            let filter = doc! { "is_active": true, "socket_id": Bson::Null };
            let room_ids = participants
                .distinct("room_id", filter.clone())
                .await
                .map_err(|source| MongoDaoError::SweepOrphans { source })?;
            participants
                .update_many(filter, doc! { "$set": { "is_active": false } })
                .await
                .map_err(|source| MongoDaoError::SweepOrphans { source })?;

            let affected: Vec<i64> = room_ids
                .into_iter()
                .filter_map(|value| value.as_i64())
                .collect();

            // The counter can only be rebuilt per room once rows are swept.
            let rooms = store.rooms().await;
            for room_id in &affected {
                let seats = participants
                    .count_documents(doc! { "room_id": room_id, "is_active": true })
                    .await
                    .map_err(|source| MongoDaoError::SweepOrphans { source })?;
                rooms
                    .update_one(
                        doc_id(*room_id),
                        doc! { "$set": { "seat_count": seats as i64 } },
                    )
                    .await
                    .map_err(|source| MongoDaoError::WriteRoom {
                        id: *room_id,
                        source,
                    })?;
            }
            Ok(affected)
        })
    }

    fn save_message(
        &self,
        message: NewMessage,
    ) -> BoxFuture<'static, StoreResult<MessageEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let messages = store.messages().await;
            let document = MongoMessageDocument {
                id: Uuid::new_v4(),
                room_id: message.room_id,
                user_id: message.user_id,
                content: message.content,
                sent_at: DateTime::from_system_time(SystemTime::now()),
            };
            messages
                .insert_one(&document)
                .await
                .map_err(|source| MongoDaoError::SaveMessage {
                    room_id: document.room_id,
                    source,
                })?;
            Ok(document.into())
        })
    }

    fn record_report(&self, report: NewReport) -> BoxFuture<'static, StoreResult<ReportEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let reports = store.reports().await;
            let key = doc! {
                "room_id": report.room_id,
                "target_user_id": report.target_user_id,
                "kind": report_kind_str(report.kind),
            };
            let mut filter = key.clone();
            filter.insert("reporter_ids", doc! { "$ne": report.reporter_id });

            let updated = reports
                .find_one_and_update(
                    filter,
                    doc! {
                        "$addToSet": { "reporter_ids": report.reporter_id },
                        "$inc": { "strike_count": 1 },
                        "$setOnInsert": key.clone(),
                    },
                )
                .upsert(true)
                .return_document(ReturnDocument::After)
                .await;

            match updated {
                Ok(Some(document)) => Ok(document.into()),
                // Upsert raced the unique index: this reporter already counted.
                Ok(None) | Err(_) => {
                    let existing = reports.find_one(key).await.map_err(|source| {
                        MongoDaoError::RecordReport {
                            room_id: report.room_id,
                            source,
                        }
                    })?;
                    existing.map(Into::into).ok_or_else(|| {
                        MongoDaoError::RecordReport {
                            room_id: report.room_id,
                            source: mongodb::error::Error::custom("report row vanished"),
                        }
                        .into()
                    })
                }
            }
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
