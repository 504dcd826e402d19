//! Document store REST client.
//!
//! Documents travel as typed `Value`s (`{"stringValue": ".."}`,
//! `{"integerValue": "12"}` …). They are bridged to plain JSON so the
//! model types can be decoded with serde.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number};

use super::{check, with_bearer, FirebaseAuth, FirebaseError};
use crate::models::announcement::{Announcement, AnnouncementView, NewAnnouncement};
use crate::services::store::{AnnouncementStore, PhotoStore, StoreError, StoreResult};

pub const ANNOUNCEMENTS_COLLECTION: &str = "announcements";

/// Attempts at a guarded view append before giving up.
const MAX_VIEW_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum FsValue {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String),
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    BytesValue(String),
    ReferenceValue(String),
    GeoPointValue(serde_json::Value),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArrayValue {
    #[serde(default)]
    pub values: Vec<FsValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MapValue {
    #[serde(default)]
    pub fields: HashMap<String, FsValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub fields: HashMap<String, FsValue>,
    #[serde(default, skip_serializing)]
    pub update_time: Option<String>,
}

impl Document {
    /// Last path segment of the resource name.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map: Map<String, serde_json::Value> =
            self.fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
        serde_json::Value::Object(map)
    }
}

impl FsValue {
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            FsValue::NullValue(()) => Value::Null,
            FsValue::BooleanValue(b) => Value::Bool(*b),
            FsValue::IntegerValue(s) => s
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(s.clone())),
            FsValue::DoubleValue(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            FsValue::TimestampValue(s)
            | FsValue::StringValue(s)
            | FsValue::BytesValue(s)
            | FsValue::ReferenceValue(s) => Value::String(s.clone()),
            FsValue::GeoPointValue(v) => v.clone(),
            FsValue::ArrayValue(a) => Value::Array(a.values.iter().map(FsValue::to_json).collect()),
            FsValue::MapValue(m) => Value::Object(
                m.fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => FsValue::NullValue(()),
            Value::Bool(b) => FsValue::BooleanValue(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FsValue::IntegerValue(i.to_string()),
                None => FsValue::DoubleValue(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => FsValue::StringValue(s.clone()),
            Value::Array(items) => FsValue::ArrayValue(ArrayValue {
                values: items.iter().map(FsValue::from_json).collect(),
            }),
            Value::Object(map) => FsValue::MapValue(MapValue {
                fields: map.iter().map(|(k, v)| (k.clone(), FsValue::from_json(v))).collect(),
            }),
        }
    }
}

/// Encode a serialisable value's top-level object as document fields.
pub fn fields_from<T: Serialize>(value: &T) -> Result<HashMap<String, FsValue>, FirebaseError> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => {
            Ok(map.iter().map(|(k, v)| (k.clone(), FsValue::from_json(v))).collect())
        }
        other => Err(FirebaseError::Malformed(format!("expected an object, got {other}"))),
    }
}

pub fn announcement_from_document(doc: &Document) -> Result<Announcement, FirebaseError> {
    let mut json = doc.to_json();
    if let Some(map) = json.as_object_mut() {
        map.insert("id".into(), json!(doc.id()));
    }
    serde_json::from_value(json)
        .map_err(|e| FirebaseError::Malformed(format!("announcement {}: {e}", doc.id())))
}

/// Stored shape of a new announcement.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnnouncementFields<'a> {
    title: &'a str,
    content: &'a str,
    author: &'a str,
    #[serde(rename = "authorPhotoURL")]
    author_photo_url: Option<&'a str>,
    date: &'a str,
    created_at: i64,
    views: &'a [AnnouncementView],
}

#[derive(Deserialize)]
struct RunQueryItem {
    document: Option<Document>,
}

#[derive(Clone)]
pub struct FirestoreClient {
    client: Client,
    /// `projects/<id>/databases/(default)/documents`
    root: String,
    auth: FirebaseAuth,
}

impl FirestoreClient {
    pub fn new(client: Client, project_id: &str, auth: FirebaseAuth) -> Self {
        Self {
            client,
            root: format!("projects/{project_id}/databases/(default)/documents"),
            auth,
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!("https://firestore.googleapis.com/v1/{}{}", self.root, suffix)
    }

    fn request(&self, method: Method, suffix: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, self.url(suffix));
        if let Some(key) = &self.auth.api_key {
            builder = builder.query(&[("key", key)]);
        }
        with_bearer(builder, &self.auth)
    }

    async fn get_document(&self, path: &str) -> Result<Option<Document>, FirebaseError> {
        let response = self.request(Method::GET, &format!("/{path}")).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(response).await?.json().await?))
    }

    /// Append `view` to the document's `views`, guarded by its update time.
    async fn append_view(
        &self,
        doc: &Document,
        view: &AnnouncementView,
    ) -> Result<(), FirebaseError> {
        let view_json = serde_json::to_value(view)?;
        let mut write = json!({
            "transform": {
                "document": doc.name,
                "fieldTransforms": [{
                    "fieldPath": "views",
                    "appendMissingElements": { "values": [FsValue::from_json(&view_json)] }
                }]
            }
        });
        if let Some(update_time) = &doc.update_time {
            write["currentDocument"] = json!({ "updateTime": update_time });
        }

        let response = self
            .request(Method::POST, ":commit")
            .json(&json!({ "writes": [write] }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl PhotoStore for FirestoreClient {
    async fn get_photo(&self, doc_path: &str) -> StoreResult<Option<String>> {
        let Some(doc) = self.get_document(doc_path).await? else {
            return Ok(None);
        };
        Ok(match doc.fields.get("photoData") {
            Some(FsValue::StringValue(data)) => Some(data.clone()),
            _ => None,
        })
    }

    async fn put_photo(&self, doc_path: &str, photo: Option<&str>) -> StoreResult<()> {
        let mut fields = HashMap::new();
        fields.insert(
            "photoData".to_string(),
            photo.map_or(FsValue::NullValue(()), |p| FsValue::StringValue(p.to_string())),
        );
        fields.insert(
            "updatedAt".to_string(),
            FsValue::TimestampValue(Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
        );

        // The update mask turns the PATCH into a merge.
        let response = self
            .request(Method::PATCH, &format!("/{doc_path}"))
            .query(&[
                ("updateMask.fieldPaths", "photoData"),
                ("updateMask.fieldPaths", "updatedAt"),
            ])
            .json(&Document { fields, ..Default::default() })
            .send()
            .await
            .map_err(FirebaseError::from)?;
        check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl AnnouncementStore for FirestoreClient {
    async fn create(&self, new: NewAnnouncement) -> StoreResult<Announcement> {
        let fields = fields_from(&AnnouncementFields {
            title: &new.title,
            content: &new.content,
            author: &new.author,
            author_photo_url: new.author_photo_url.as_deref(),
            date: &new.date,
            created_at: new.created_at,
            views: &[],
        })?;

        let response = self
            .request(Method::POST, &format!("/{ANNOUNCEMENTS_COLLECTION}"))
            .json(&Document { fields, ..Default::default() })
            .send()
            .await
            .map_err(FirebaseError::from)?;
        let doc: Document = check(response).await?.json().await.map_err(FirebaseError::from)?;
        Ok(announcement_from_document(&doc)?)
    }

    async fn list_since(&self, cutoff: i64) -> StoreResult<Vec<Announcement>> {
        let query = json!({
            "structuredQuery": {
                "from": [{ "collectionId": ANNOUNCEMENTS_COLLECTION }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": "createdAt" },
                        "op": "GREATER_THAN",
                        "value": { "integerValue": cutoff.to_string() }
                    }
                },
                "orderBy": [{ "field": { "fieldPath": "createdAt" }, "direction": "DESCENDING" }]
            }
        });

        let response = self
            .request(Method::POST, ":runQuery")
            .json(&query)
            .send()
            .await
            .map_err(FirebaseError::from)?;
        let items: Vec<RunQueryItem> =
            check(response).await?.json().await.map_err(FirebaseError::from)?;

        let mut announcements = Vec::with_capacity(items.len());
        for doc in items.into_iter().filter_map(|item| item.document) {
            match announcement_from_document(&doc) {
                Ok(a) => announcements.push(a),
                Err(e) => tracing::warn!("skipping announcement: {e}"),
            }
        }
        Ok(announcements)
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Announcement>> {
        let path = format!("{ANNOUNCEMENTS_COLLECTION}/{id}");
        match self.get_document(&path).await? {
            Some(doc) => Ok(Some(announcement_from_document(&doc)?)),
            None => Ok(None),
        }
    }

    async fn add_view(&self, id: &str, view: AnnouncementView) -> StoreResult<bool> {
        let path = format!("{ANNOUNCEMENTS_COLLECTION}/{id}");

        for attempt in 1..=MAX_VIEW_ATTEMPTS {
            let doc = self
                .get_document(&path)
                .await?
                .ok_or_else(|| StoreError::NotFound(path.clone()))?;
            let current = announcement_from_document(&doc)?;
            if current.has_viewer(&view.viewer_id) {
                return Ok(false);
            }

            match self.append_view(&doc, &view).await {
                Ok(()) => return Ok(true),
                Err(FirebaseError::Conflict) => {
                    tracing::debug!("view append on {path} lost a race (attempt {attempt})");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(FirebaseError::Conflict.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn typed_values_use_firestore_tags() {
        let value = FsValue::from_json(&json!({ "n": 5, "s": "x", "z": null, "l": [true] }));
        let wire = serde_json::to_value(&value).unwrap();
        assert_eq!(wire["mapValue"]["fields"]["n"], json!({ "integerValue": "5" }));
        assert_eq!(wire["mapValue"]["fields"]["s"], json!({ "stringValue": "x" }));
        assert_eq!(wire["mapValue"]["fields"]["z"], json!({ "nullValue": null }));
        assert_eq!(
            wire["mapValue"]["fields"]["l"],
            json!({ "arrayValue": { "values": [{ "booleanValue": true }] } })
        );
    }

    #[test]
    fn document_decodes_into_announcement() {
        let raw = json!({
            "name": "projects/p/databases/(default)/documents/announcements/abc123",
            "fields": {
                "title": { "stringValue": "Reunião" },
                "content": { "stringValue": "Sexta às 10h" },
                "author": { "stringValue": "RH" },
                "authorPhotoURL": { "nullValue": null },
                "date": { "stringValue": "07 de Mar, 2025" },
                "createdAt": { "integerValue": "1741348800000" },
                "views": { "arrayValue": { "values": [
                    { "mapValue": { "fields": {
                        "viewerId": { "stringValue": "ana@icone.com" },
                        "name": { "stringValue": "ANA" },
                        "photoURL": { "nullValue": null },
                        "viewedAt": { "stringValue": "2025-03-07T13:00:00.000Z" }
                    } } }
                ] } }
            },
            "updateTime": "2025-03-07T13:00:00.123456Z"
        });
        let doc: Document = serde_json::from_value(raw).unwrap();
        assert_eq!(doc.id(), "abc123");
        assert_eq!(doc.update_time.as_deref(), Some("2025-03-07T13:00:00.123456Z"));

        let a = announcement_from_document(&doc).unwrap();
        assert_eq!(a.id, "abc123");
        assert_eq!(a.created_at, 1_741_348_800_000);
        assert_eq!(a.author_photo_url, None);
        assert_eq!(a.views.len(), 1);
        assert_eq!(a.views[0].viewed_at, Utc.with_ymd_and_hms(2025, 3, 7, 13, 0, 0).unwrap());
    }

    #[test]
    fn empty_views_array_decodes() {
        let raw = json!({
            "name": "projects/p/databases/(default)/documents/announcements/x",
            "fields": {
                "title": { "stringValue": "t" },
                "content": { "stringValue": "c" },
                "date": { "stringValue": "d" },
                "createdAt": { "integerValue": "1" },
                "views": { "arrayValue": {} }
            }
        });
        let doc: Document = serde_json::from_value(raw).unwrap();
        let a = announcement_from_document(&doc).unwrap();
        assert!(a.views.is_empty());
        assert_eq!(a.author, None);
    }

    #[test]
    fn new_announcement_fields_start_without_views() {
        let fields = fields_from(&AnnouncementFields {
            title: "t",
            content: "c",
            author: "a",
            author_photo_url: None,
            date: "d",
            created_at: 42,
            views: &[],
        })
        .unwrap();
        assert_eq!(fields["createdAt"], FsValue::IntegerValue("42".into()));
        assert_eq!(fields["authorPhotoURL"], FsValue::NullValue(()));
        assert_eq!(fields["views"], FsValue::ArrayValue(ArrayValue::default()));
    }
}
