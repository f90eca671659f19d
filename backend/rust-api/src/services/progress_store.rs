use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::track_db_operation;
use crate::models::{ProgressRecord, ProgressStatus};

const COLLECTION: &str = "course_taken";
const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("progress record already exists for this user and course")]
    DuplicateKey,

    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Persistence for progress records, one per (user, course).
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<ProgressRecord>, StoreError>;

    async fn find_by_user_and_course(
        &self,
        user_id: &str,
        course_id: i64,
    ) -> Result<Option<ProgressRecord>, StoreError>;

    async fn find_completed_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ProgressRecord>, StoreError>;

    /// Inserts when `record.id` is empty, replaces otherwise.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateKey` when an insert collides with an
    /// existing (user, course) record.
    async fn save(&self, record: &ProgressRecord) -> Result<ProgressRecord, StoreError>;

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-memory store for tests and local runs without MongoDB.
#[derive(Clone, Default)]
pub struct InMemoryProgressStore {
    records: Arc<Mutex<HashMap<(String, i64), ProgressRecord>>>,
    next_id: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
    failing_saves: Arc<AtomicBool>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes every subsequent `save` fail with a backend error. Reads keep
    /// working.
    pub fn set_failing_saves(&self, failing: bool) {
        self.failing_saves.store(failing, Ordering::SeqCst);
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(String, i64), ProgressRecord>>, StoreError>
    {
        self.records
            .lock()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("store lock poisoned: {}", e)))
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<ProgressRecord>, StoreError> {
        let guard = self.lock()?;
        let mut records: Vec<ProgressRecord> = guard
            .values()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.course_id);
        Ok(records)
    }

    async fn find_by_user_and_course(
        &self,
        user_id: &str,
        course_id: i64,
    ) -> Result<Option<ProgressRecord>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.get(&(user_id.to_string(), course_id)).cloned())
    }

    async fn find_completed_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ProgressRecord>, StoreError> {
        Ok(self
            .find_by_user(user_id)
            .await?
            .into_iter()
            .filter(|record| record.status == ProgressStatus::Completed)
            .collect())
    }

    async fn save(&self, record: &ProgressRecord) -> Result<ProgressRecord, StoreError> {
        if self.failing_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!("store unavailable")));
        }
        let mut guard = self.lock()?;
        let key = (record.user_id.clone(), record.course_id);

        let mut stored = record.clone();
        if stored.id.is_none() {
            if guard.contains_key(&key) {
                return Err(StoreError::DuplicateKey);
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            stored.id = Some(format!("mem-{}", id));
        }

        guard.insert(key, stored.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }
}

/// Shape of a progress record in the `course_taken` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProgressDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    user_id: String,
    course_id: i64,
    current_lesson_id: i64,
    current_part_id: i64,
    current_test_id: Option<i64>,
    status: ProgressStatus,
    completion: f64,
    #[serde(default)]
    completion_date: Option<bson::DateTime>,
    #[serde(default)]
    rating: Option<i32>,
    #[serde(default)]
    feedback: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: bson::DateTime,
    #[serde(rename = "updatedAt")]
    updated_at: bson::DateTime,
}

fn to_bson_date(date: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(date.timestamp_millis())
}

fn from_bson_date(date: bson::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(date.timestamp_millis()).unwrap_or_default()
}

impl ProgressDocument {
    fn from_record(record: &ProgressRecord) -> Result<Self, StoreError> {
        let id = record
            .id
            .as_deref()
            .map(ObjectId::parse_str)
            .transpose()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("invalid record id: {}", e)))?;

        Ok(Self {
            id,
            user_id: record.user_id.clone(),
            course_id: record.course_id,
            current_lesson_id: record.current_lesson_id,
            current_part_id: record.current_part_id,
            current_test_id: record.current_test_id,
            status: record.status,
            completion: record.completion,
            completion_date: record.completion_date.map(to_bson_date),
            rating: record.rating.map(i32::from),
            feedback: record.feedback.clone(),
            created_at: to_bson_date(record.created_at),
            updated_at: to_bson_date(record.updated_at),
        })
    }

    fn into_record(self) -> ProgressRecord {
        ProgressRecord {
            id: self.id.map(|oid| oid.to_hex()),
            user_id: self.user_id,
            course_id: self.course_id,
            current_lesson_id: self.current_lesson_id,
            current_part_id: self.current_part_id,
            current_test_id: self.current_test_id,
            status: self.status,
            completion: self.completion,
            completion_date: self.completion_date.map(from_bson_date),
            rating: self.rating.and_then(|value| u8::try_from(value).ok()),
            feedback: self.feedback,
            created_at: from_bson_date(self.created_at),
            updated_at: from_bson_date(self.updated_at),
        }
    }
}

pub struct MongoProgressStore {
    mongo: Database,
    collection: Collection<ProgressDocument>,
}

impl MongoProgressStore {
    pub fn new(mongo: Database) -> Self {
        let collection = mongo.collection::<ProgressDocument>(COLLECTION);
        Self { mongo, collection }
    }

    /// Creates the unique (user_id, course_id) index enrolment relies on.
    pub async fn ensure_indexes(&self) -> anyhow::Result<()> {
        let index = IndexModel::builder()
            .keys(doc! { "user_id": 1, "course_id": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name("user_course_unique".to_string())
                    .build(),
            )
            .build();

        self.collection
            .create_index(index)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create course_taken index: {}", e))?;

        tracing::info!("course_taken indexes ensured");
        Ok(())
    }

    async fn find_many(&self, filter: bson::Document) -> Result<Vec<ProgressRecord>, StoreError> {
        let cursor = self
            .collection
            .find(filter)
            .with_options(FindOptions::builder().sort(doc! { "course_id": 1 }).build())
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("Failed to query progress: {}", e)))?;

        let documents: Vec<ProgressDocument> = cursor
            .try_collect()
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("Progress cursor error: {}", e)))?;

        Ok(documents
            .into_iter()
            .map(ProgressDocument::into_record)
            .collect())
    }
}

fn ensure_replaced(matched_count: u64, id: &ObjectId) -> Result<(), StoreError> {
    if matched_count == 0 {
        return Err(StoreError::Backend(anyhow::anyhow!(
            "Progress record {} not found for update",
            id.to_hex()
        )));
    }
    Ok(())
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(ref we))
            if we.code == DUPLICATE_KEY_CODE
    )
}

#[async_trait]
impl ProgressStore for MongoProgressStore {
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<ProgressRecord>, StoreError> {
        track_db_operation("find", COLLECTION, self.find_many(doc! { "user_id": user_id })).await
    }

    async fn find_by_user_and_course(
        &self,
        user_id: &str,
        course_id: i64,
    ) -> Result<Option<ProgressRecord>, StoreError> {
        track_db_operation("find_one", COLLECTION, async {
            self.collection
                .find_one(doc! { "user_id": user_id, "course_id": course_id })
                .await
                .map(|found| found.map(ProgressDocument::into_record))
                .map_err(|e| {
                    StoreError::Backend(anyhow::anyhow!("Failed to query progress: {}", e))
                })
        })
        .await
    }

    async fn find_completed_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ProgressRecord>, StoreError> {
        track_db_operation(
            "find",
            COLLECTION,
            self.find_many(doc! {
                "user_id": user_id,
                "status": ProgressStatus::Completed.as_str(),
            }),
        )
        .await
    }

    async fn save(&self, record: &ProgressRecord) -> Result<ProgressRecord, StoreError> {
        let document = ProgressDocument::from_record(record)?;

        match document.id {
            None => {
                let inserted = track_db_operation("insert_one", COLLECTION, async {
                    self.collection.insert_one(&document).await.map_err(|e| {
                        if is_duplicate_key(&e) {
                            StoreError::DuplicateKey
                        } else {
                            StoreError::Backend(anyhow::anyhow!(
                                "Failed to insert progress: {}",
                                e
                            ))
                        }
                    })
                })
                .await?;

                let mut stored = record.clone();
                stored.id = inserted.inserted_id.as_object_id().map(|oid| oid.to_hex());
                Ok(stored)
            }
            Some(id) => {
                let replaced = track_db_operation("replace_one", COLLECTION, async {
                    self.collection
                        .replace_one(doc! { "_id": id }, &document)
                        .await
                        .map_err(|e| {
                            StoreError::Backend(anyhow::anyhow!(
                                "Failed to update progress: {}",
                                e
                            ))
                        })
                })
                .await?;
                ensure_replaced(replaced.matched_count, &id)?;
                Ok(record.clone())
            }
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.mongo
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("MongoDB error: {}", e)))
    }
}
