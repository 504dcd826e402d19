use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, Utc};

use crate::{
    error::{PortalError, PortalResult},
    models::announcement::{
        cutoff_millis, format_announcement_date, Announcement, AnnouncementView,
        NewAnnouncement, DEFAULT_AUTHOR,
    },
    services::{live::LiveHub, metrics, store::AnnouncementStore},
};

/// Offset used for the human-readable date label (Brasília time).
const LABEL_OFFSET_SECS: i32 = -3 * 3600;

/// Who is looking at or posting an announcement.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub photo_url: Option<String>,
}

impl Participant {
    fn view_at(&self, now: DateTime<Utc>) -> AnnouncementView {
        AnnouncementView {
            viewer_id: self.id.clone(),
            name: self.name.clone(),
            photo_url: self.photo_url.clone(),
            viewed_at: now,
        }
    }
}

#[derive(Clone)]
pub struct AnnouncementService {
    store: Arc<dyn AnnouncementStore>,
    hub: LiveHub,
}

impl AnnouncementService {
    pub fn new(store: Arc<dyn AnnouncementStore>, hub: LiveHub) -> Self {
        Self { store, hub }
    }

    pub async fn create(
        &self,
        title: &str,
        content: &str,
        author: &Participant,
        now: DateTime<Utc>,
    ) -> PortalResult<Announcement> {
        let title = title.trim();
        let content = content.trim();
        if title.is_empty() || content.is_empty() {
            return Err(PortalError::Validation(
                "Título e conteúdo do comunicado são obrigatórios.".into(),
            ));
        }

        let author_name = if author.name.trim().is_empty() {
            DEFAULT_AUTHOR.to_string()
        } else {
            author.name.clone()
        };
        let offset = FixedOffset::east_opt(LABEL_OFFSET_SECS).unwrap_or_else(|| Utc.fix());

        let announcement = self
            .store
            .create(NewAnnouncement {
                title: title.to_string(),
                content: content.to_string(),
                date: format_announcement_date(&now.with_timezone(&offset)),
                author: author_name,
                author_photo_url: author.photo_url.clone(),
                created_at: now.timestamp_millis(),
            })
            .await?;

        tracing::info!("announcement {} created by {}", announcement.id, author.id);
        metrics::ANNOUNCEMENTS_COUNTER.inc();
        self.hub.announcements_changed();
        Ok(announcement)
    }

    /// Announcements younger than the expiry window, newest first.
    pub async fn list_visible(&self, now: DateTime<Utc>) -> PortalResult<Vec<Announcement>> {
        let mut announcements = self.store.list_since(cutoff_millis(now)).await?;
        announcements.retain(|a| a.is_visible(now));
        Ok(announcements)
    }

    async fn get_visible(&self, id: &str, now: DateTime<Utc>) -> PortalResult<Announcement> {
        match self.store.get(id).await? {
            Some(a) if a.is_visible(now) => Ok(a),
            Some(_) => Err(PortalError::NotFound("Este comunicado expirou.".into())),
            None => Err(PortalError::NotFound("Comunicado não encontrado.".into())),
        }
    }

    /// Record that `viewer` saw announcement `id`. Returns `false` when the
    /// viewer was already recorded.
    pub async fn record_view(
        &self,
        id: &str,
        viewer: &Participant,
        now: DateTime<Utc>,
    ) -> PortalResult<bool> {
        let announcement = self.get_visible(id, now).await?;
        if announcement.has_viewer(&viewer.id) {
            return Ok(false);
        }

        let added = self.store.add_view(id, viewer.view_at(now)).await?;
        if added {
            metrics::VIEWS_COUNTER.inc();
            self.hub.announcements_changed();
        }
        Ok(added)
    }

    /// Record a view on every visible announcement the viewer has not seen.
    /// Announcements that fail are skipped.
    pub async fn mark_all_viewed(
        &self,
        viewer: &Participant,
        now: DateTime<Utc>,
    ) -> PortalResult<usize> {
        let mut recorded = 0;
        for announcement in self.list_visible(now).await? {
            if announcement.has_viewer(&viewer.id) {
                continue;
            }
            match self.store.add_view(&announcement.id, viewer.view_at(now)).await {
                Ok(true) => recorded += 1,
                Ok(false) => {}
                // Deleted or unreachable meanwhile; the rest still count.
                Err(e) => tracing::warn!(
                    "could not record view of {} by {}: {e}",
                    announcement.id,
                    viewer.id
                ),
            }
        }

        if recorded > 0 {
            metrics::VIEWS_COUNTER.inc_by(recorded as f64);
            self.hub.announcements_changed();
        }
        Ok(recorded)
    }

    pub async fn views(&self, id: &str, now: DateTime<Utc>) -> PortalResult<Vec<AnnouncementView>> {
        Ok(self.get_visible(id, now).await?.views)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::InMemoryAnnouncementStore;
    use crate::services::store::{StoreError, StoreResult};
    use chrono::{Duration, TimeZone};

    fn service() -> AnnouncementService {
        AnnouncementService::new(Arc::new(InMemoryAnnouncementStore::new()), LiveHub::new())
    }

    fn person(id: &str) -> Participant {
        Participant {
            id: id.into(),
            name: id.to_uppercase(),
            photo_url: None,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 7, 15, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn create_trims_and_labels() {
        let svc = service();
        let a = svc.create("  Reunião ", " Sexta ", &person("rh@x.io"), t0()).await.unwrap();
        assert_eq!(a.title, "Reunião");
        assert_eq!(a.content, "Sexta");
        assert_eq!(a.author.as_deref(), Some("RH@X.IO"));
        assert_eq!(a.date, "07 de Mar, 2025");
        assert_eq!(a.created_at, t0().timestamp_millis());
        assert!(a.views.is_empty());
    }

    #[tokio::test]
    async fn create_requires_title_and_content_and_defaults_author() {
        let svc = service();
        let err = svc.create("  ", "c", &person("a"), t0()).await.unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));

        let mut anon = person("a");
        anon.name = " ".into();
        let a = svc.create("t", "c", &anon, t0()).await.unwrap();
        assert_eq!(a.author.as_deref(), Some(DEFAULT_AUTHOR));
    }

    #[tokio::test]
    async fn announcements_disappear_after_48_hours() {
        let svc = service();
        svc.create("old", "c", &person("a"), t0()).await.unwrap();
        svc.create("new", "c", &person("a"), t0() + Duration::hours(24)).await.unwrap();

        let listed = svc.list_visible(t0() + Duration::hours(25)).await.unwrap();
        let titles: Vec<&str> = listed.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["new", "old"]);

        let listed = svc.list_visible(t0() + Duration::hours(48)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "new");
    }

    #[tokio::test]
    async fn views_are_unique_per_viewer() {
        let svc = service();
        let a = svc.create("t", "c", &person("admin"), t0()).await.unwrap();
        let now = t0() + Duration::minutes(5);

        assert!(svc.record_view(&a.id, &person("ana"), now).await.unwrap());
        assert!(!svc.record_view(&a.id, &person("ana"), now).await.unwrap());
        assert!(svc.record_view(&a.id, &person("bia"), now).await.unwrap());

        let views = svc.views(&a.id, now).await.unwrap();
        let viewers: Vec<&str> = views.iter().map(|v| v.viewer_id.as_str()).collect();
        assert_eq!(viewers, vec!["ana", "bia"]);
        assert_eq!(views[0].viewed_at, now);
    }

    #[tokio::test]
    async fn expired_or_missing_announcements_reject_views() {
        let svc = service();
        let a = svc.create("t", "c", &person("admin"), t0()).await.unwrap();

        let late = t0() + Duration::hours(49);
        assert!(matches!(
            svc.record_view(&a.id, &person("ana"), late).await,
            Err(PortalError::NotFound(_))
        ));
        assert!(matches!(
            svc.record_view("nope", &person("ana"), t0()).await,
            Err(PortalError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn mark_all_viewed_skips_seen_and_expired() {
        let svc = service();
        let mut hub_rx = svc.hub.subscribe_announcements();
        let old = svc.create("old", "c", &person("admin"), t0()).await.unwrap();
        let seen = svc.create("seen", "c", &person("admin"), t0() + Duration::hours(30)).await.unwrap();
        svc.create("fresh", "c", &person("admin"), t0() + Duration::hours(31)).await.unwrap();

        let now = t0() + Duration::hours(49);
        svc.record_view(&seen.id, &person("ana"), now).await.unwrap();

        assert_eq!(svc.mark_all_viewed(&person("ana"), now).await.unwrap(), 1);
        assert_eq!(svc.mark_all_viewed(&person("ana"), now).await.unwrap(), 0);

        let stored_old = svc.store.get(&old.id).await.unwrap().unwrap();
        assert!(stored_old.views.is_empty());

        // three creates, one single view, one bulk view
        let mut signals = 0;
        while hub_rx.try_recv().is_ok() {
            signals += 1;
        }
        assert_eq!(signals, 5);
    }

    /// Fails `add_view` for one announcement id.
    struct FailingViews {
        inner: InMemoryAnnouncementStore,
        failing: std::sync::Mutex<Option<String>>,
    }

    #[async_trait::async_trait]
    impl AnnouncementStore for FailingViews {
        async fn create(&self, new: NewAnnouncement) -> StoreResult<Announcement> {
            self.inner.create(new).await
        }
        async fn list_since(&self, cutoff: i64) -> StoreResult<Vec<Announcement>> {
            self.inner.list_since(cutoff).await
        }
        async fn get(&self, id: &str) -> StoreResult<Option<Announcement>> {
            self.inner.get(id).await
        }
        async fn add_view(&self, id: &str, view: AnnouncementView) -> StoreResult<bool> {
            if self.failing.lock().unwrap().as_deref() == Some(id) {
                return Err(StoreError::NotFound(id.to_string()));
            }
            self.inner.add_view(id, view).await
        }
    }

    #[tokio::test]
    async fn mark_all_viewed_skips_announcements_that_fail() {
        let store = Arc::new(FailingViews {
            inner: InMemoryAnnouncementStore::new(),
            failing: std::sync::Mutex::new(None),
        });
        let svc = AnnouncementService::new(store.clone(), LiveHub::new());
        let gone = svc.create("gone", "c", &person("admin"), t0()).await.unwrap();
        svc.create("a", "c", &person("admin"), t0() + Duration::hours(1)).await.unwrap();
        svc.create("b", "c", &person("admin"), t0() + Duration::hours(2)).await.unwrap();
        *store.failing.lock().unwrap() = Some(gone.id.clone());

        let now = t0() + Duration::hours(3);
        assert_eq!(svc.mark_all_viewed(&person("ana"), now).await.unwrap(), 2);
        assert!(!store.get(&gone.id).await.unwrap().unwrap().has_viewer("ana"));
    }
}
