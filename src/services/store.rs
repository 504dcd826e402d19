use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::{Config, StoreBackend};
use crate::models::{
    announcement::{Announcement, AnnouncementView, NewAnnouncement},
    user::ProfileRecord,
};
use crate::services::firebase::{
    firestore::FirestoreClient, realtime::RealtimeDbClient, FirebaseAuth, FirebaseError,
};
use crate::services::memory::{InMemoryAnnouncementStore, InMemoryPhotoStore, InMemoryProfileStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Firebase(#[from] FirebaseError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// User records keyed by [`realtime_key`](crate::models::user::realtime_key).
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<ProfileRecord>>;
    async fn set(&self, key: &str, record: &ProfileRecord) -> StoreResult<()>;
    /// Shallow merge of `patch` into the record, creating it when absent.
    async fn update(&self, key: &str, patch: Map<String, Value>) -> StoreResult<()>;
    async fn remove(&self, key: &str) -> StoreResult<()>;
    async fn list(&self) -> StoreResult<Vec<(String, ProfileRecord)>>;
    async fn ping(&self) -> StoreResult<()>;
}

/// Photo data URLs stored as documents addressed by path (`userPhotos/<email>`).
#[async_trait]
pub trait PhotoStore: Send + Sync {
    async fn get_photo(&self, doc_path: &str) -> StoreResult<Option<String>>;
    async fn put_photo(&self, doc_path: &str, photo: Option<&str>) -> StoreResult<()>;
}

#[async_trait]
pub trait AnnouncementStore: Send + Sync {
    async fn create(&self, new: NewAnnouncement) -> StoreResult<Announcement>;
    /// Announcements with `created_at > cutoff`, newest first.
    async fn list_since(&self, cutoff: i64) -> StoreResult<Vec<Announcement>>;
    async fn get(&self, id: &str) -> StoreResult<Option<Announcement>>;
    /// Append `view` unless its viewer is already recorded. Returns whether
    /// the view was added.
    async fn add_view(&self, id: &str, view: AnnouncementView) -> StoreResult<bool>;
}

/// The three stores, picked by [`StoreBackend`].
#[derive(Clone)]
pub struct Stores {
    pub profiles: Arc<dyn ProfileStore>,
    pub photos: Arc<dyn PhotoStore>,
    pub announcements: Arc<dyn AnnouncementStore>,
}

impl Stores {
    pub fn open(config: &Config, http: reqwest::Client) -> Self {
        match config.store_backend {
            StoreBackend::Firebase => {
                let auth = FirebaseAuth {
                    api_key: config.firebase_api_key.clone(),
                    auth_token: config.firebase_auth_token.clone(),
                };
                let documents =
                    Arc::new(FirestoreClient::new(http.clone(), &config.firebase_project_id, auth.clone()));
                Self {
                    profiles: Arc::new(RealtimeDbClient::new(http, &config.firebase_database_url, auth)),
                    photos: documents.clone(),
                    announcements: documents,
                }
            }
            StoreBackend::Memory => {
                tracing::warn!("STORE_BACKEND=memory: data is lost on restart");
                Self {
                    profiles: Arc::new(InMemoryProfileStore::new()),
                    photos: Arc::new(InMemoryPhotoStore::new()),
                    announcements: Arc::new(InMemoryAnnouncementStore::new()),
                }
            }
        }
    }
}
