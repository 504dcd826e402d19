use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};

use super::{check, FirebaseAuth, FirebaseError};
use crate::models::user::ProfileRecord;
use crate::services::store::{ProfileStore, StoreResult};

const USERS_PATH: &str = "users";

/// User records under `users/` in the realtime database, over its REST API.
#[derive(Clone)]
pub struct RealtimeDbClient {
    client: Client,
    base_url: String,
    auth: FirebaseAuth,
}

impl RealtimeDbClient {
    pub fn new(client: Client, database_url: &str, auth: FirebaseAuth) -> Self {
        Self {
            client,
            base_url: database_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.auth.auth_token {
            Some(token) => builder.query(&[("auth", token)]),
            None => builder,
        }
    }

    fn user_path(key: &str) -> String {
        format!("{USERS_PATH}/{key}")
    }
}

#[async_trait]
impl ProfileStore for RealtimeDbClient {
    async fn get(&self, key: &str) -> StoreResult<Option<ProfileRecord>> {
        let response = self
            .request(reqwest::Method::GET, &Self::user_path(key))
            .send()
            .await
            .map_err(FirebaseError::from)?;
        let value: Value = check(response).await?.json().await.map_err(FirebaseError::from)?;
        if value.is_null() {
            return Ok(None);
        }
        let record = serde_json::from_value(value).map_err(FirebaseError::from)?;
        Ok(Some(record))
    }

    async fn set(&self, key: &str, record: &ProfileRecord) -> StoreResult<()> {
        let response = self
            .request(reqwest::Method::PUT, &Self::user_path(key))
            .json(record)
            .send()
            .await
            .map_err(FirebaseError::from)?;
        check(response).await?;
        Ok(())
    }

    async fn update(&self, key: &str, patch: Map<String, Value>) -> StoreResult<()> {
        let response = self
            .request(reqwest::Method::PATCH, &Self::user_path(key))
            .json(&patch)
            .send()
            .await
            .map_err(FirebaseError::from)?;
        check(response).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let response = self
            .request(reqwest::Method::DELETE, &Self::user_path(key))
            .send()
            .await
            .map_err(FirebaseError::from)?;
        check(response).await?;
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<(String, ProfileRecord)>> {
        let response = self
            .request(reqwest::Method::GET, USERS_PATH)
            .send()
            .await
            .map_err(FirebaseError::from)?;
        let value: Value = check(response).await?.json().await.map_err(FirebaseError::from)?;

        let Value::Object(entries) = value else {
            return Ok(Vec::new());
        };

        let mut records = Vec::with_capacity(entries.len());
        for (key, raw) in entries {
            match serde_json::from_value::<ProfileRecord>(raw) {
                Ok(record) => records.push((key, record)),
                Err(e) => tracing::warn!("skipping unreadable user record {key}: {e}"),
            }
        }
        Ok(records)
    }

    async fn ping(&self) -> StoreResult<()> {
        let response = self
            .request(reqwest::Method::GET, USERS_PATH)
            .query(&[("shallow", "true")])
            .send()
            .await
            .map_err(FirebaseError::from)?;
        check(response).await?;
        Ok(())
    }
}
