//! In-process stores, used by tests and by `STORE_BACKEND=memory`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::models::{
    announcement::{Announcement, AnnouncementView, NewAnnouncement},
    user::{normalize_email, ProfileRecord},
};
use crate::middleware::rate_limit::AttemptCounter;
use crate::services::session::SessionEpochs;
use crate::services::store::{AnnouncementStore, PhotoStore, ProfileStore, StoreError, StoreResult};

#[derive(Default, Clone)]
pub struct InMemoryProfileStore {
    records: Arc<RwLock<HashMap<String, ProfileRecord>>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get(&self, key: &str) -> StoreResult<Option<ProfileRecord>> {
        let records = self.records.read().await;
        Ok(records.get(key).cloned())
    }

    async fn set(&self, key: &str, record: &ProfileRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        records.insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn update(&self, key: &str, patch: Map<String, Value>) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let current = records.remove(key).unwrap_or_default();

        let mut merged = match serde_json::to_value(&current) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        merged.extend(patch);
        let updated: ProfileRecord = serde_json::from_value(Value::Object(merged))
            .map_err(|e| StoreError::Firebase(e.into()))?;

        records.insert(key.to_string(), updated);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let mut records = self.records.write().await;
        records.remove(key);
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<(String, ProfileRecord)>> {
        let records = self.records.read().await;
        Ok(records.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryPhotoStore {
    photos: Arc<RwLock<HashMap<String, Option<String>>>>,
}

impl InMemoryPhotoStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PhotoStore for InMemoryPhotoStore {
    async fn get_photo(&self, doc_path: &str) -> StoreResult<Option<String>> {
        let photos = self.photos.read().await;
        Ok(photos.get(doc_path).cloned().flatten())
    }

    async fn put_photo(&self, doc_path: &str, photo: Option<&str>) -> StoreResult<()> {
        let mut photos = self.photos.write().await;
        photos.insert(doc_path.to_string(), photo.map(str::to_string));
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryAnnouncementStore {
    announcements: Arc<RwLock<HashMap<String, Announcement>>>,
}

impl InMemoryAnnouncementStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnnouncementStore for InMemoryAnnouncementStore {
    async fn create(&self, new: NewAnnouncement) -> StoreResult<Announcement> {
        let announcement = Announcement {
            id: Uuid::new_v4().simple().to_string(),
            title: new.title,
            content: new.content,
            date: new.date,
            author: Some(new.author),
            author_photo_url: new.author_photo_url,
            views: Vec::new(),
            created_at: new.created_at,
        };
        let mut announcements = self.announcements.write().await;
        announcements.insert(announcement.id.clone(), announcement.clone());
        Ok(announcement)
    }

    async fn list_since(&self, cutoff: i64) -> StoreResult<Vec<Announcement>> {
        let announcements = self.announcements.read().await;
        let mut visible: Vec<Announcement> = announcements
            .values()
            .filter(|a| a.created_at > cutoff)
            .cloned()
            .collect();
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(visible)
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Announcement>> {
        let announcements = self.announcements.read().await;
        Ok(announcements.get(id).cloned())
    }

    async fn add_view(&self, id: &str, view: AnnouncementView) -> StoreResult<bool> {
        let mut announcements = self.announcements.write().await;
        let announcement = announcements
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("announcements/{id}")))?;
        if announcement.has_viewer(&view.viewer_id) {
            return Ok(false);
        }
        announcement.views.push(view);
        Ok(true)
    }
}

#[derive(Default, Clone)]
pub struct InMemorySessionEpochs {
    epochs: Arc<RwLock<HashMap<String, u64>>>,
}

impl InMemorySessionEpochs {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionEpochs for InMemorySessionEpochs {
    async fn current(&self, email: &str) -> anyhow::Result<u64> {
        let epochs = self.epochs.read().await;
        Ok(epochs.get(&normalize_email(email)).copied().unwrap_or(0))
    }

    async fn bump(&self, email: &str) -> anyhow::Result<u64> {
        let mut epochs = self.epochs.write().await;
        let epoch = epochs.entry(normalize_email(email)).or_insert(0);
        *epoch += 1;
        Ok(*epoch)
    }
}

/// Fixed windows kept in process; a window restarts once it has elapsed.
#[derive(Default, Clone)]
pub struct InMemoryAttemptCounter {
    windows: Arc<Mutex<HashMap<String, (u64, Instant)>>>,
}

impl InMemoryAttemptCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptCounter for InMemoryAttemptCounter {
    async fn hit(&self, key: &str, window_secs: u64) -> anyhow::Result<u64> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let window = windows.entry(key.to_string()).or_insert((0, now));
        if now.duration_since(window.1) >= Duration::from_secs(window_secs) {
            *window = (0, now);
        }
        window.0 += 1;
        Ok(window.0)
    }
}
