use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const PHOTO_COLLECTION: &str = "userPhotos";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
    Pendente,
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
            UserRole::Pendente => "pendente",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(UserRole::User),
            "admin" => Ok(UserRole::Admin),
            "pendente" => Ok(UserRole::Pendente),
            _ => Err(anyhow::anyhow!("Unknown role: {s}")),
        }
    }
}

/// Stored roles other than the three known ones (empty, differently cased,
/// hand-edited) read as missing, so the default role and the backfill apply.
fn lenient_role<'de, D>(deserializer: D) -> Result<Option<UserRole>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(Value::as_str).and_then(|s| s.parse().ok()))
}

/// `isActive` only counts when it is a real boolean.
fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(|v| v.as_bool()))
}

/// A portal user as exchanged with the browser and the auth script.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortalUser {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    /// Base64 data URL.
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    /// `YYYY-MM-DD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthday: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpf: Option<String>,
    #[serde(default, deserialize_with = "lenient_role")]
    pub role: Option<UserRole>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub is_active: Option<bool>,
}

impl PortalUser {
    pub fn role(&self) -> UserRole {
        self.role.unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        self.is_active != Some(false)
    }
}

/// Record stored under `users/<key>` in the realtime database.
///
/// Fields this service does not know about are carried through `extra` so
/// that a read-modify-write never drops them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_doc_path: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_role",
        skip_serializing_if = "Option::is_none"
    )]
    pub role: Option<UserRole>,
    #[serde(
        default,
        deserialize_with = "lenient_flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthday: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfileRecord {
    pub fn access_status(&self) -> AccessStatus {
        if self.is_active == Some(false) {
            return AccessStatus::denied(AccessDenial::Revoked);
        }
        if self.role == Some(UserRole::Pendente) {
            return AccessStatus::denied(AccessDenial::Pending);
        }
        AccessStatus::granted()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessDenial {
    Revoked,
    Pending,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessStatus {
    pub has_access: bool,
    pub reason: Option<AccessDenial>,
}

impl AccessStatus {
    pub fn granted() -> Self {
        Self { has_access: true, reason: None }
    }

    pub fn denied(reason: AccessDenial) -> Self {
        Self { has_access: false, reason: Some(reason) }
    }

    pub fn message(&self) -> Option<&'static str> {
        match self.reason {
            Some(AccessDenial::Pending) => Some(
                "Seu cadastro está pendente de aprovação. Aguarde até que um administrador libere o acesso.",
            ),
            Some(AccessDenial::Revoked) => Some("Seu acesso foi revogado."),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BirthdayEntry {
    pub id: String,
    pub name: String,
    pub day: u32,
    pub day_label: String,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Key of a user record in the realtime database.
pub fn realtime_key(email: &str) -> String {
    normalize_email(email)
        .chars()
        .map(|c| match c {
            '.' => ',',
            '#' | '$' | '[' | ']' => '_',
            c => c,
        })
        .collect()
}

/// Key format used by older clients; records found there get migrated.
pub fn legacy_realtime_key(email: &str) -> String {
    normalize_email(email)
        .chars()
        .map(|c| match c {
            '.' | '#' | '$' | '/' | '[' | ']' => '_',
            c => c,
        })
        .collect()
}

pub fn email_from_key(key: &str) -> String {
    key.replace(',', ".")
}

pub fn photo_doc_path(email: &str) -> String {
    format!("{PHOTO_COLLECTION}/{}", normalize_email(email))
}

// Request/Response DTOs
#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub birthday: String,
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResetRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

/// Partial profile update. An absent field is left alone, an explicit
/// `null` is forwarded as a clear.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[serde(default, deserialize_with = "present")]
    pub display_name: Option<Option<String>>,
    #[serde(rename = "photoURL", default, deserialize_with = "present")]
    pub photo_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub birthday: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub cpf: Option<Option<String>>,
}

impl UpdateProfileRequest {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.photo_url.is_none()
            && self.birthday.is_none()
            && self.cpf.is_none()
    }
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccessRequest {
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: UserRole,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    /// Absent when the account still awaits approval.
    pub token: Option<String>,
    pub user: PortalUser,
}
