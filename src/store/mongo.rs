//! MongoDB backed store.
//!
//! Multi-document transactions need a replica set (or sharded cluster).
//! Collections and indexes are created up front in [`MongoStore::connect`]
//! because older servers can't create collections inside a transaction.
//!
//! Transactions run under snapshot isolation and only abort when two of them
//! write the same document. Users and rooms carry a `revision` counter that
//! transactions bump when their outcome depends on that document.

use bson::{doc, Document};
use mongodb::options::{FindOptions, IndexOptions, UpdateOptions};
use mongodb::{Client, ClientSession, Collection, Database, IndexModel};
use rocket::futures::TryStreamExt;
use uuid::Uuid;

use super::{SessionQuery, Store, Transaction};
use crate::data::filter;
use crate::data::moderation::{BanRecord, Report, BAN_COLLECTION_NAME, REPORT_COLLECTION_NAME};
use crate::data::review::{Review, REVIEW_COLLECTION_NAME};
use crate::data::room::{Message, Room, MESSAGE_COLLECTION_NAME, ROOM_COLLECTION_NAME};
use crate::data::session::{Session, SessionStatus, SESSION_COLLECTION_NAME};
use crate::data::user::{User, USER_COLLECTION_NAME};
use crate::error::StoreError;
use crate::role::Role;

#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

fn session_filter(query: &SessionQuery) -> Document {
    let mut filter = Document::new();
    if let Some(tutor) = query.tutor_id {
        filter.insert("tutor_id", filter::uuid(tutor));
    }
    if let Some(student) = query.student_id {
        filter.insert("booking.student_id", filter::uuid(student));
    }
    if !query.statuses.is_empty() {
        let statuses: Vec<&str> = query.statuses.iter().map(|s| s.as_str()).collect();
        filter.insert("status", doc! { "$in": statuses });
    }
    filter
}

fn guarded(id: Uuid, expected: SessionStatus) -> Document {
    doc! { "_id": filter::uuid(id), "status": expected.as_str() }
}

fn bump_revision() -> Document {
    doc! { "$inc": { "revision": 1 } }
}

fn by_starts_at() -> FindOptions {
    FindOptions::builder().sort(doc! { "starts_at": 1 }).build()
}

impl MongoStore {
    pub async fn connect(uri: &str, db_name: &str) -> Result<MongoStore, StoreError> {
        tracing::info!("Connecting to MongoDB: {}", uri);
        let client = Client::with_uri_str(uri).await?;

        tracing::info!("Using MongoDB database: {}", db_name);
        let store = MongoStore {
            db: client.database(db_name),
            client,
        };
        store.ensure_indexes().await?;

        Ok(store)
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique = || IndexOptions::builder().unique(true).build();

        self.users_collection()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(unique())
                    .build(),
                None,
            )
            .await?;
        self.sessions_collection()
            .create_index(IndexModel::builder().keys(doc! { "tutor_id": 1 }).build(), None)
            .await?;
        self.sessions_collection()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "booking.student_id": 1, "tutor_id": 1 })
                    .build(),
                None,
            )
            .await?;
        self.rooms_collection()
            .create_index(IndexModel::builder().keys(doc! { "student_id": 1 }).build(), None)
            .await?;
        self.rooms_collection()
            .create_index(IndexModel::builder().keys(doc! { "tutor_id": 1 }).build(), None)
            .await?;
        self.messages_collection()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "room_id": 1, "sent_at": 1 })
                    .build(),
                None,
            )
            .await?;
        self.bans_collection()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "tutor_id": 1 })
                    .options(unique())
                    .build(),
                None,
            )
            .await?;
        self.reviews_collection()
            .create_index(IndexModel::builder().keys(doc! { "tutor_id": 1 }).build(), None)
            .await?;
        self.db
            .collection::<Document>(REPORT_COLLECTION_NAME)
            .create_index(IndexModel::builder().keys(doc! { "tutor_id": 1 }).build(), None)
            .await?;

        Ok(())
    }

    fn users_collection(&self) -> Collection<User> {
        self.db.collection(USER_COLLECTION_NAME)
    }

    fn sessions_collection(&self) -> Collection<Session> {
        self.db.collection(SESSION_COLLECTION_NAME)
    }

    fn rooms_collection(&self) -> Collection<Room> {
        self.db.collection(ROOM_COLLECTION_NAME)
    }

    fn messages_collection(&self) -> Collection<Message> {
        self.db.collection(MESSAGE_COLLECTION_NAME)
    }

    fn reports_collection(&self) -> Collection<Report> {
        self.db.collection(REPORT_COLLECTION_NAME)
    }

    fn bans_collection(&self) -> Collection<BanRecord> {
        self.db.collection(BAN_COLLECTION_NAME)
    }

    fn reviews_collection(&self) -> Collection<Review> {
        self.db.collection(REVIEW_COLLECTION_NAME)
    }
}

pub struct MongoTx {
    db: Database,
    session: ClientSession,
}

impl MongoTx {
    fn sessions_collection(&self) -> Collection<Session> {
        self.db.collection(SESSION_COLLECTION_NAME)
    }

    fn rooms_collection(&self) -> Collection<Room> {
        self.db.collection(ROOM_COLLECTION_NAME)
    }

    fn users_collection(&self) -> Collection<User> {
        self.db.collection(USER_COLLECTION_NAME)
    }
}

impl Transaction for MongoTx {
    async fn user(&mut self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users_collection()
            .find_one_with_session(filter::by_id(id), None, &mut self.session)
            .await?)
    }

    async fn touch_user(&mut self, id: Uuid) -> Result<(), StoreError> {
        self.users_collection()
            .update_one_with_session(filter::by_id(id), bump_revision(), None, &mut self.session)
            .await?;
        Ok(())
    }

    async fn session(&mut self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions_collection()
            .find_one_with_session(filter::by_id(id), None, &mut self.session)
            .await?)
    }

    async fn sessions(&mut self, query: &SessionQuery) -> Result<Vec<Session>, StoreError> {
        let mut cursor = self.sessions_collection()
            .find_with_session(session_filter(query), by_starts_at(), &mut self.session)
            .await?;

        let mut found = vec![];
        while let Some(session) = cursor.next(&mut self.session).await {
            found.push(session?);
        }
        Ok(found)
    }

    async fn insert_session(&mut self, session: &Session) -> Result<(), StoreError> {
        self.sessions_collection()
            .insert_one_with_session(session, None, &mut self.session)
            .await?;
        Ok(())
    }

    async fn swap_session(
        &mut self,
        session: &Session,
        expected: SessionStatus,
    ) -> Result<bool, StoreError> {
        let result = self.sessions_collection()
            .replace_one_with_session(
                guarded(session.id, expected),
                session,
                None,
                &mut self.session,
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn delete_session(
        &mut self,
        id: Uuid,
        expected: SessionStatus,
    ) -> Result<bool, StoreError> {
        let result = self.sessions_collection()
            .delete_one_with_session(guarded(id, expected), None, &mut self.session)
            .await?;
        Ok(result.deleted_count == 1)
    }

    async fn room(&mut self, id: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms_collection()
            .find_one_with_session(filter::by_key(id), None, &mut self.session)
            .await?)
    }

    async fn open_room(&mut self, room: &Room) -> Result<bool, StoreError> {
        let mut fields = bson::to_document(room)?;
        fields.remove("_id");
        let mut update = bump_revision();
        update.insert("$setOnInsert", fields);

        let result = self.rooms_collection()
            .update_one_with_session(
                filter::by_key(&room.id),
                update,
                UpdateOptions::builder().upsert(true).build(),
                &mut self.session,
            )
            .await?;
        Ok(result.upserted_id.is_some())
    }

    async fn delete_room(&mut self, id: &str) -> Result<bool, StoreError> {
        let result = self.rooms_collection()
            .delete_one_with_session(filter::by_key(id), None, &mut self.session)
            .await?;
        self.db
            .collection::<Message>(MESSAGE_COLLECTION_NAME)
            .delete_many_with_session(doc! { "room_id": id }, None, &mut self.session)
            .await?;
        Ok(result.deleted_count == 1)
    }

    async fn insert_message(&mut self, message: &Message) -> Result<bool, StoreError> {
        let room = self.rooms_collection()
            .update_one_with_session(
                filter::by_key(&message.room_id),
                bump_revision(),
                None,
                &mut self.session,
            )
            .await?;
        if room.matched_count == 0 {
            return Ok(false);
        }
        self.db
            .collection::<Message>(MESSAGE_COLLECTION_NAME)
            .insert_one_with_session(message, None, &mut self.session)
            .await?;
        Ok(true)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        self.session.commit_transaction().await?;
        Ok(())
    }
}

impl Store for MongoStore {
    type Tx = MongoTx;

    async fn begin(&self) -> Result<MongoTx, StoreError> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        Ok(MongoTx {
            db: self.db.clone(),
            session,
        })
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        self.users_collection().insert_one(user, None).await?;
        Ok(())
    }

    async fn replace_user(&self, user: &User) -> Result<bool, StoreError> {
        let result = self.users_collection()
            .replace_one(filter::by_id(user.id), user, None)
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users_collection().find_one(filter::by_id(id), None).await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users_collection().find_one(filter::by_email(email), None).await?)
    }

    async fn list_users(&self, role: Option<Role>) -> Result<Vec<User>, StoreError> {
        let filter = role.map(|r| doc! { "profile.role": r.to_string() });
        Ok(self.users_collection().find(filter, None).await?.try_collect().await?)
    }

    async fn delete_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users_collection()
            .find_one_and_delete(filter::by_id(id), None)
            .await?)
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions_collection().find_one(filter::by_id(id), None).await?)
    }

    async fn find_sessions(&self, query: &SessionQuery) -> Result<Vec<Session>, StoreError> {
        Ok(self.sessions_collection()
            .find(session_filter(query), by_starts_at())
            .await?
            .try_collect()
            .await?)
    }

    async fn get_room(&self, id: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms_collection().find_one(filter::by_key(id), None).await?)
    }

    async fn rooms_of(&self, user: Uuid) -> Result<Vec<Room>, StoreError> {
        let filter = doc! {
            "$or": [
                filter::by_uuid_field("student_id", user),
                filter::by_uuid_field("tutor_id", user),
            ]
        };
        Ok(self.rooms_collection().find(filter, None).await?.try_collect().await?)
    }

    async fn messages(&self, room: &str) -> Result<Vec<Message>, StoreError> {
        let options = FindOptions::builder().sort(doc! { "sent_at": 1 }).build();
        Ok(self.messages_collection()
            .find(doc! { "room_id": room }, options)
            .await?
            .try_collect()
            .await?)
    }

    async fn insert_report(&self, report: &Report) -> Result<(), StoreError> {
        self.reports_collection().insert_one(report, None).await?;
        Ok(())
    }

    async fn reports(&self) -> Result<Vec<Report>, StoreError> {
        Ok(self.reports_collection().find(None, None).await?.try_collect().await?)
    }

    async fn insert_ban(&self, ban: &BanRecord) -> Result<(), StoreError> {
        self.bans_collection().insert_one(ban, None).await?;
        Ok(())
    }

    async fn find_ban(&self, tutor: Uuid) -> Result<Option<BanRecord>, StoreError> {
        Ok(self.bans_collection()
            .find_one(filter::by_uuid_field("tutor_id", tutor), None)
            .await?)
    }

    async fn find_ban_by_email(&self, email: &str) -> Result<Option<BanRecord>, StoreError> {
        Ok(self.bans_collection().find_one(filter::by_email(email), None).await?)
    }

    async fn delete_ban(&self, tutor: Uuid) -> Result<Option<BanRecord>, StoreError> {
        Ok(self.bans_collection()
            .find_one_and_delete(filter::by_uuid_field("tutor_id", tutor), None)
            .await?)
    }

    async fn bans(&self) -> Result<Vec<BanRecord>, StoreError> {
        Ok(self.bans_collection().find(None, None).await?.try_collect().await?)
    }

    async fn insert_review(&self, review: &Review) -> Result<(), StoreError> {
        self.reviews_collection().insert_one(review, None).await?;
        Ok(())
    }

    async fn reviews_of(&self, tutor: Uuid) -> Result<Vec<Review>, StoreError> {
        Ok(self.reviews_collection()
            .find(filter::by_uuid_field("tutor_id", tutor), None)
            .await?
            .try_collect()
            .await?)
    }
}
