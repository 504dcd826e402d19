use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Announcements stop being listed this many hours after creation.
pub const ANNOUNCEMENT_TTL_HOURS: i64 = 48;

pub fn announcement_ttl() -> Duration {
    Duration::hours(ANNOUNCEMENT_TTL_HOURS)
}

pub const DEFAULT_AUTHOR: &str = "Portal Ícone";

const MONTHS_PT: [&str; 12] = [
    "Jan", "Fev", "Mar", "Abr", "Mai", "Jun", "Jul", "Ago", "Set", "Out", "Nov", "Dez",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementView {
    pub viewer_id: String,
    pub name: String,
    #[serde(rename = "photoURL", default)]
    pub photo_url: Option<String>,
    pub viewed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub id: String,
    pub title: String,
    pub content: String,
    pub date: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(rename = "authorPhotoURL", default)]
    pub author_photo_url: Option<String>,
    #[serde(default)]
    pub views: Vec<AnnouncementView>,
    /// Epoch milliseconds.
    pub created_at: i64,
}

impl Announcement {
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        is_visible(self.created_at, now)
    }

    pub fn has_viewer(&self, viewer_id: &str) -> bool {
        self.views.iter().any(|v| v.viewer_id == viewer_id)
    }
}

/// Fields of a new announcement; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnnouncement {
    pub title: String,
    pub content: String,
    pub date: String,
    pub author: String,
    pub author_photo_url: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateAnnouncementRequest {
    pub title: String,
    pub content: String,
}

/// Announcement as listed to clients, with the countdown label.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementListItem {
    #[serde(flatten)]
    pub announcement: Announcement,
    pub views_count: usize,
    pub expires_at: DateTime<Utc>,
    pub time_remaining: Option<String>,
}

impl AnnouncementListItem {
    pub fn new(announcement: Announcement, now: DateTime<Utc>) -> Self {
        Self {
            views_count: announcement.views.len(),
            expires_at: expires_at(announcement.created_at),
            time_remaining: time_remaining_label(announcement.created_at, now),
            announcement,
        }
    }
}

pub fn cutoff_millis(now: DateTime<Utc>) -> i64 {
    (now - announcement_ttl()).timestamp_millis()
}

pub fn is_visible(created_at: i64, now: DateTime<Utc>) -> bool {
    created_at > cutoff_millis(now)
}

pub fn expires_at(created_at: i64) -> DateTime<Utc> {
    let created = Utc
        .timestamp_millis_opt(created_at)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    created + announcement_ttl()
}

/// `"5h restantes"`, `"1h restante"`, `"12m restantes"`; `None` once expired.
pub fn time_remaining_label(created_at: i64, now: DateTime<Utc>) -> Option<String> {
    let diff = created_at + announcement_ttl().num_milliseconds() - now.timestamp_millis();
    if diff <= 0 {
        return None;
    }

    let hours = diff / (1000 * 60 * 60);
    let minutes = (diff % (1000 * 60 * 60)) / (1000 * 60);
    let (value, unit) = if hours > 0 { (hours, "h") } else { (minutes, "m") };
    let plural = if value != 1 { "s" } else { "" };
    Some(format!("{value}{unit} restante{plural}"))
}

/// `"07 de Mar, 2025"`
pub fn format_announcement_date<Tz: TimeZone>(date: &DateTime<Tz>) -> String {
    let month = MONTHS_PT[date.month0() as usize];
    format!("{:02} de {}, {}", date.day(), month, date.year())
}
