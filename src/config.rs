use std::env;

/// Which implementation backs the user/announcement/photo stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firebase,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "firebase" => Ok(StoreBackend::Firebase),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(anyhow::anyhow!("Unknown store backend: {s}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiry_seconds: u64,
    pub host: String,
    pub port: u16,
    pub app_base_url: String,
    pub apps_script_url: String,
    pub store_backend: StoreBackend,
    pub firebase_database_url: String,
    pub firebase_project_id: String,
    pub firebase_api_key: Option<String>,
    pub firebase_auth_token: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub access_poll_seconds: u64,
    pub departments_file: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            jwt_secret: required("JWT_SECRET")?,
            jwt_expiry_seconds: env::var("JWT_EXPIRY_SECONDS")
                .unwrap_or_else(|_| "604800".into())
                .parse()?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            app_base_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost".into()),
            apps_script_url: required("APPS_SCRIPT_URL")?,
            store_backend: env::var("STORE_BACKEND")
                .unwrap_or_else(|_| "firebase".into())
                .parse()?,
            firebase_database_url: env::var("FIREBASE_DATABASE_URL")
                .unwrap_or_else(|_| "https://portal-icone-4eb8e-default-rtdb.firebaseio.com".into()),
            firebase_project_id: env::var("FIREBASE_PROJECT_ID")
                .unwrap_or_else(|_| "portal-icone-4eb8e".into()),
            firebase_api_key: env::var("FIREBASE_API_KEY").ok().filter(|s| !s.is_empty()),
            firebase_auth_token: env::var("FIREBASE_AUTH_TOKEN").ok().filter(|s| !s.is_empty()),
            gemini_api_key: env::var("GEMINI_API_KEY").ok().filter(|s| !s.is_empty()),
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash".into()),
            access_poll_seconds: env::var("ACCESS_POLL_SECONDS")
                .unwrap_or_else(|_| "30".into())
                .parse()?,
            departments_file: env::var("DEPARTMENTS_FILE").ok().filter(|s| !s.is_empty()),
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {}", key))
}
