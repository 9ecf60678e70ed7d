//! Realtime-database REST implementation of [`DocumentStore`].
//!
//! Layout under the database root:
//!
//! ```text
//! {category}/items/{item id}            -> MergedItem
//! {category}/item_sub_icon_urls/{src}   -> icon URL
//! _import/{category}/{fullname}         -> true
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Map, Value};

use super::{DocumentStore, OpenHandles, StoreCredential, StoreError, StoreHandle};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::sync::batch::SyncBatch;
use crate::types::Category;

const IMPORT_ROOT: &str = "_import";

pub struct RtdbDocumentStore {
    http: Client,
    retry: RetryConfig,
    handles: OpenHandles,
}

impl RtdbDocumentStore {
    pub fn new(timeout: Duration, retry: RetryConfig) -> Result<Self, StoreError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Http {
                path: "client".to_string(),
                source: e,
            })?;
        Ok(Self {
            http,
            retry,
            handles: OpenHandles::default(),
        })
    }
}

#[async_trait]
impl DocumentStore for RtdbDocumentStore {
    async fn open(
        &self,
        username: &str,
        credential: &StoreCredential,
    ) -> Result<Arc<dyn StoreHandle>, StoreError> {
        if credential.database_url.is_empty() {
            return Err(StoreError::Rejected("empty database URL".to_string()));
        }
        Ok(Arc::new(RtdbHandle {
            http: self.http.clone(),
            retry: self.retry.clone(),
            base: credential.database_url.trim_end_matches('/').to_string(),
            auth: credential.auth_token.clone(),
            username: username.to_string(),
            invalidated: self.handles.track(username),
        }))
    }

    fn invalidate(&self, username: &str) {
        self.handles.invalidate(username);
    }
}

struct RtdbHandle {
    http: Client,
    retry: RetryConfig,
    base: String,
    auth: String,
    username: String,
    invalidated: Arc<AtomicBool>,
}

impl RtdbHandle {
    fn ensure_live(&self) -> Result<(), StoreError> {
        if self.is_invalidated() {
            return Err(StoreError::Invalidated {
                username: self.username.clone(),
            });
        }
        Ok(())
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, StoreError> {
        let url = format!("{}/{}.json", self.base, path);
        retry_with_backoff(&self.retry, path, || async {
            let mut req = self
                .http
                .request(method.clone(), &url)
                .query(&[("auth", self.auth.as_str())]);
            if let Some(body) = body {
                req = req.json(body);
            }
            let resp = req.send().await.map_err(|e| StoreError::Http {
                path: path.to_string(),
                source: e,
            })?;
            let status = resp.status();
            if !status.is_success() {
                return Err(StoreError::HttpStatus {
                    status: status.as_u16(),
                    path: path.to_string(),
                });
            }
            resp.json::<Value>().await.map_err(|e| StoreError::Http {
                path: path.to_string(),
                source: e,
            })
        })
        .await
    }

    async fn patch(&self, path: &str, body: Map<String, Value>) -> Result<(), StoreError> {
        if body.is_empty() {
            return Ok(());
        }
        self.request(Method::PATCH, path, Some(&Value::Object(body)))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StoreHandle for RtdbHandle {
    fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }

    async fn write_batches(
        &self,
        batches: &BTreeMap<Category, SyncBatch>,
    ) -> Result<(), StoreError> {
        for (category, batch) in batches {
            self.ensure_live()?;
            let mut items = Map::new();
            for (id, item) in &batch.items {
                items.insert(encode_key(id), serde_json::to_value(item)?);
            }
            self.patch(&format!("{category}/items"), items).await?;

            let icons = batch
                .icon_urls
                .iter()
                .map(|(source, url)| (encode_key(source), Value::String(url.clone())))
                .collect();
            self.patch(&format!("{category}/item_sub_icon_urls"), icons)
                .await?;
        }
        Ok(())
    }

    async fn pending_imports(&self, category: Category) -> Result<Option<Vec<String>>, StoreError> {
        self.ensure_live()?;
        let queued = self
            .request(Method::GET, &format!("{IMPORT_ROOT}/{category}"), None)
            .await?;
        match queued {
            Value::Object(map) if !map.is_empty() => {
                Ok(Some(map.keys().map(|k| decode_key(k)).collect()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_imports(
        &self,
        imports: &BTreeMap<Category, Vec<String>>,
    ) -> Result<(), StoreError> {
        for (category, fullnames) in imports {
            self.ensure_live()?;
            let body = fullnames
                .iter()
                .map(|name| (encode_key(name), Value::Null))
                .collect();
            self.patch(&format!("{IMPORT_ROOT}/{category}"), body)
                .await?;
        }
        Ok(())
    }

    async fn release(&self) -> Result<(), StoreError> {
        self.invalidated.store(true, Ordering::SeqCst);
        tracing::debug!(username = %self.username, "Released document store handle");
        Ok(())
    }
}

/// Escape characters the database forbids in keys.
///
/// Percent-encoding leaves `.` alone, but keys may not contain it either.
fn encode_key(key: &str) -> String {
    urlencoding::encode(key).replace('.', "%2E")
}

/// Malformed escapes are kept as written.
fn decode_key(key: &str) -> String {
    match urlencoding::decode(key) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => key.to_string(),
    }
}
