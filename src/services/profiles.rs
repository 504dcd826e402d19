use std::sync::Arc;

use chrono::Utc;
use futures_util::future::try_join_all;
use serde_json::{json, Map, Value};

use crate::{
    error::{PortalError, PortalResult},
    models::user::{
        email_from_key, legacy_realtime_key, normalize_email, photo_doc_path, realtime_key,
        AccessDenial, AccessStatus, BirthdayEntry, PortalUser, ProfileRecord, UserRole,
    },
    services::store::{PhotoStore, ProfileStore},
};

/// Longest photo data URL accepted, in characters.
pub const MAX_PHOTO_DATA_URL_LEN: usize = 1024 * 1024;

/// Role, name and flag as resolved from the stored record.
#[derive(Debug, Clone, PartialEq)]
struct ResolvedProfile {
    role: UserRole,
    display_name: String,
    is_active: bool,
}

#[derive(Clone)]
pub struct ProfileService {
    store: Arc<dyn ProfileStore>,
    photos: Arc<dyn PhotoStore>,
}

impl ProfileService {
    pub fn new(store: Arc<dyn ProfileStore>, photos: Arc<dyn PhotoStore>) -> Self {
        Self { store, photos }
    }

    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.store
    }

    /// Make sure `user` has a record, backfilling missing fields, and return
    /// the user enriched with the stored role, flag, name and photo.
    pub async fn ensure_profile(&self, user: PortalUser) -> PortalResult<PortalUser> {
        if user.email.trim().is_empty() {
            let role = user.role();
            return Ok(PortalUser { role: Some(role), ..user });
        }

        let profile = self.ensure_record(&user).await?;
        let photo = self.photos.get_photo(&photo_doc_path(&user.email)).await?;

        let display_name = if profile.display_name.is_empty() {
            user.display_name.clone()
        } else {
            profile.display_name
        };

        Ok(PortalUser {
            display_name,
            photo_url: photo.or(user.photo_url.clone()),
            role: Some(profile.role),
            is_active: Some(profile.is_active),
            ..user
        })
    }

    async fn ensure_record(&self, user: &PortalUser) -> PortalResult<ResolvedProfile> {
        let key = realtime_key(&user.email);
        let now = Utc::now().timestamp_millis();

        let Some(current) = self.store.get(&key).await? else {
            let legacy = self.take_legacy_record(&user.email, &key).await?;
            let mut record = legacy.unwrap_or_default();

            record.email.get_or_insert_with(|| normalize_email(&user.email));
            record.display_name.get_or_insert_with(|| user.display_name.clone());
            record.photo_doc_path.get_or_insert_with(|| photo_doc_path(&user.email));
            if record.birthday.is_none() {
                record.birthday = user.birthday.clone();
            }
            let role = *record.role.get_or_insert(UserRole::User);
            let is_active = *record.is_active.get_or_insert(true);
            record.created_at.get_or_insert(now);
            record.updated_at = Some(now);

            self.store.set(&key, &record).await?;
            tracing::info!("created profile record for {key} (role={role})");

            return Ok(ResolvedProfile {
                role,
                display_name: record.display_name.unwrap_or_default(),
                is_active,
            });
        };

        let mut patch = Map::new();
        if current.role.is_none() {
            patch.insert("role".into(), json!(UserRole::User));
        }
        if current.photo_doc_path.is_none() {
            patch.insert("photoDocPath".into(), json!(photo_doc_path(&user.email)));
        }
        if current.is_active.is_none() {
            patch.insert("isActive".into(), json!(true));
        }
        if current.birthday.is_none() {
            if let Some(birthday) = &user.birthday {
                patch.insert("birthday".into(), json!(birthday));
            }
        }
        let synced_name = (!user.display_name.is_empty()
            && current.display_name.as_deref() != Some(user.display_name.as_str()))
        .then(|| user.display_name.clone());
        if let Some(name) = &synced_name {
            patch.insert("displayName".into(), json!(name));
        }

        if !patch.is_empty() {
            patch.insert("updatedAt".into(), json!(now));
            self.store.update(&key, patch).await?;
        }

        Ok(ResolvedProfile {
            role: current.role.unwrap_or_default(),
            display_name: synced_name
                .or(current.display_name)
                .unwrap_or_else(|| user.display_name.clone()),
            is_active: current.is_active.unwrap_or(true),
        })
    }

    /// Remove and return a record stored under the legacy key format.
    async fn take_legacy_record(
        &self,
        email: &str,
        key: &str,
    ) -> PortalResult<Option<ProfileRecord>> {
        let legacy_key = legacy_realtime_key(email);
        if legacy_key == key {
            return Ok(None);
        }
        let Some(legacy) = self.store.get(&legacy_key).await? else {
            return Ok(None);
        };
        self.store.remove(&legacy_key).await?;
        tracing::info!("migrated legacy profile record {legacy_key} -> {key}");
        Ok(Some(legacy))
    }

    /// Store (or clear) the user's photo and point the record at it.
    pub async fn persist_photo(&self, email: &str, photo: Option<&str>) -> PortalResult<()> {
        if email.trim().is_empty() {
            return Ok(());
        }
        if photo.is_some_and(|p| p.len() > MAX_PHOTO_DATA_URL_LEN) {
            return Err(PortalError::Validation(
                "A imagem final ainda possui mais de 1MB. Tente uma foto menor.".into(),
            ));
        }

        let doc_path = photo_doc_path(email);
        self.photos.put_photo(&doc_path, photo).await?;

        let mut patch = Map::new();
        patch.insert("photoDocPath".into(), json!(doc_path));
        patch.insert("updatedAt".into(), json!(Utc::now().timestamp_millis()));
        self.store.update(&realtime_key(email), patch).await?;
        Ok(())
    }

    pub async fn update_role(&self, email: &str, role: UserRole) -> PortalResult<UserRole> {
        self.patch_user(email, "role", json!(role)).await?;
        Ok(role)
    }

    pub async fn update_access(&self, email: &str, is_active: bool) -> PortalResult<()> {
        self.patch_user(email, "isActive", json!(is_active)).await
    }

    async fn patch_user(&self, email: &str, field: &str, value: Value) -> PortalResult<()> {
        if email.trim().is_empty() {
            return Err(PortalError::Validation("Informe o email do usuário.".into()));
        }
        let mut patch = Map::new();
        patch.insert("email".into(), json!(normalize_email(email)));
        patch.insert(field.into(), value);
        patch.insert("updatedAt".into(), json!(Utc::now().timestamp_millis()));
        self.store.update(&realtime_key(email), patch).await?;
        Ok(())
    }

    pub async fn access_status(&self, email: &str) -> PortalResult<AccessStatus> {
        match self.store.get(&realtime_key(email)).await? {
            Some(record) => Ok(record.access_status()),
            None => Ok(AccessStatus::denied(AccessDenial::Revoked)),
        }
    }

    pub async fn role_of(&self, email: &str) -> PortalResult<Option<UserRole>> {
        Ok(self
            .store
            .get(&realtime_key(email))
            .await?
            .map(|r| r.role.unwrap_or_default()))
    }

    pub async fn photo_of(&self, email: &str) -> PortalResult<Option<String>> {
        if email.trim().is_empty() {
            return Ok(None);
        }
        Ok(self.photos.get_photo(&photo_doc_path(email)).await?)
    }

    /// Every user, with photos, sorted by display name.
    pub async fn list_users(&self) -> PortalResult<Vec<PortalUser>> {
        let records = self.store.list().await?;

        let mut users = try_join_all(records.into_iter().map(|(key, record)| async move {
            let email = record.email.clone().unwrap_or_else(|| email_from_key(&key));
            let photo_url = match record.photo_doc_path.as_deref() {
                Some(path) if !path.is_empty() => self.photos.get_photo(path).await?,
                _ => None,
            };
            Ok::<_, PortalError>(PortalUser {
                display_name: record.display_name.clone().unwrap_or_else(|| email.clone()),
                photo_url,
                birthday: record.birthday.clone(),
                cpf: None,
                role: Some(record.role.unwrap_or_default()),
                is_active: Some(record.is_active != Some(false)),
                email,
            })
        }))
        .await?;

        users.sort_by_cached_key(|u| u.display_name.to_lowercase());
        Ok(users)
    }

    /// Users whose birthday falls in `month` (1-12), by day.
    pub async fn birthdays_in_month(&self, month: u32) -> PortalResult<Vec<BirthdayEntry>> {
        let users = self.list_users().await?;
        Ok(birthday_roster(&users, month))
    }
}

/// `(month, day)` of a `YYYY-MM-DD` birthday.
pub fn parse_birthday(value: &str) -> Option<(u32, u32)> {
    let mut parts = value.split('-');
    let _year = parts.next()?;
    let month: u32 = parts.next()?.trim().parse().ok()?;
    let day: u32 = parts.next()?.trim().parse().ok()?;
    Some((month, day))
}

pub fn birthday_roster(users: &[PortalUser], month: u32) -> Vec<BirthdayEntry> {
    let mut entries: Vec<BirthdayEntry> = users
        .iter()
        .filter_map(|user| {
            let (m, day) = parse_birthday(user.birthday.as_deref()?)?;
            if m != month {
                return None;
            }
            let name = [user.display_name.as_str(), user.email.as_str()]
                .into_iter()
                .find(|s| !s.is_empty())
                .unwrap_or("Colaborador")
                .to_string();
            let id = if user.email.is_empty() {
                format!("{}-{}", user.display_name, day)
            } else {
                user.email.clone()
            };
            Some(BirthdayEntry {
                id,
                name,
                day,
                day_label: format!("{day:02}/{m:02}"),
                photo_url: user.photo_url.clone(),
            })
        })
        .collect();
    entries.sort_by_key(|e| e.day);
    entries
}
