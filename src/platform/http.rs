//! reqwest implementation of [`PlatformClient`] against the OAuth API.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::error::PlatformError;
use super::types::{ListingPage, ListingQuery, PageToken, SourceAbout, Thing};
use super::{PlatformClient, PlatformConnector};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::types::{Category, CursorSlot, ItemKind};

/// Budget assumed before the first response reports the real one.
const DEFAULT_RATELIMIT_BUDGET: u32 = 600;
const RATELIMIT_HEADER: &str = "x-ratelimit-remaining";

#[derive(Debug, Clone)]
pub struct HttpPlatformConfig {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub token_url: String,
    pub api_base: String,
}

impl HttpPlatformConfig {
    pub fn new(client_id: String, client_secret: String, user_agent: String) -> Self {
        Self {
            client_id,
            client_secret,
            user_agent,
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            token_url: "https://www.reddit.com/api/v1/access_token".to_string(),
            api_base: "https://oauth.reddit.com".to_string(),
        }
    }
}

pub struct HttpPlatformConnector {
    http: Client,
    config: HttpPlatformConfig,
}

impl HttpPlatformConnector {
    pub fn new(config: HttpPlatformConfig) -> Result<Self, PlatformError> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .map_err(|e| PlatformError::Http {
                path: "client".to_string(),
                source: e,
            })?;
        Ok(Self { http, config })
    }

    async fn exchange_token(&self, refresh_token: &str) -> Result<String, PlatformError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: Option<String>,
            error: Option<String>,
        }

        let path = self.config.token_url.as_str();
        let resp = retry_with_backoff(&self.config.retry, "token exchange", || async {
            let resp = self
                .http
                .post(path)
                .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
                .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
                .send()
                .await
                .map_err(|e| PlatformError::Http {
                    path: path.to_string(),
                    source: e,
                })?;
            let status = resp.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                return Err(PlatformError::HttpStatus {
                    status: status.as_u16(),
                    path: path.to_string(),
                });
            }
            resp.json::<TokenResponse>()
                .await
                .map_err(|e| PlatformError::Http {
                    path: path.to_string(),
                    source: e,
                })
        })
        .await?;

        match (resp.access_token, resp.error) {
            (Some(token), _) => Ok(token),
            (None, Some(err)) => Err(PlatformError::Auth(err)),
            (None, None) => Err(PlatformError::Auth("no access token returned".to_string())),
        }
    }
}

#[async_trait]
impl PlatformConnector for HttpPlatformConnector {
    async fn connect(&self, refresh_token: &str) -> Result<Arc<dyn PlatformClient>, PlatformError> {
        let access_token = self.exchange_token(refresh_token).await?;
        let mut client = HttpPlatformClient {
            http: self.http.clone(),
            api_base: self.config.api_base.trim_end_matches('/').to_string(),
            retry: self.config.retry.clone(),
            access_token,
            username: String::new(),
            ratelimit_remaining: AtomicU32::new(DEFAULT_RATELIMIT_BUDGET),
        };
        let me = client.get_json("/api/v1/me", &[], None).await?;
        client.username = me
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| PlatformError::Malformed {
                path: "/api/v1/me".to_string(),
                reason: "missing account name".to_string(),
            })?
            .to_string();
        tracing::debug!(username = %client.username, "Platform session established");
        Ok(Arc::new(client))
    }
}

pub struct HttpPlatformClient {
    http: Client,
    api_base: String,
    retry: RetryConfig,
    access_token: String,
    username: String,
    ratelimit_remaining: AtomicU32,
}

impl HttpPlatformClient {
    fn record_ratelimit(&self, headers: &HeaderMap) {
        if let Some(remaining) = parse_ratelimit(headers) {
            self.ratelimit_remaining.store(remaining, Ordering::Relaxed);
        }
    }

    /// GET `path`. When `before` is set, a 403 is reported as a refused cursor.
    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
        before: Option<&str>,
    ) -> Result<Value, PlatformError> {
        let url = format!("{}{}", self.api_base, path);
        retry_with_backoff(&self.retry, path, || async {
            let resp = self
                .http
                .get(&url)
                .bearer_auth(&self.access_token)
                .query(&[("raw_json", "1")])
                .query(query)
                .send()
                .await
                .map_err(|e| PlatformError::Http {
                    path: path.to_string(),
                    source: e,
                })?;
            self.record_ratelimit(resp.headers());
            let status = resp.status();
            if status == StatusCode::FORBIDDEN {
                if let Some(before) = before {
                    return Err(PlatformError::Forbidden {
                        path: path.to_string(),
                        before: before.to_string(),
                    });
                }
            }
            if !status.is_success() {
                return Err(PlatformError::HttpStatus {
                    status: status.as_u16(),
                    path: path.to_string(),
                });
            }
            resp.json::<Value>().await.map_err(|e| PlatformError::Http {
                path: path.to_string(),
                source: e,
            })
        })
        .await
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<(), PlatformError> {
        let url = format!("{}{}", self.api_base, path);
        retry_with_backoff(&self.retry, path, || async {
            let resp = self
                .http
                .post(&url)
                .bearer_auth(&self.access_token)
                .form(form)
                .send()
                .await
                .map_err(|e| PlatformError::Http {
                    path: path.to_string(),
                    source: e,
                })?;
            self.record_ratelimit(resp.headers());
            let status = resp.status();
            if !status.is_success() {
                return Err(PlatformError::HttpStatus {
                    status: status.as_u16(),
                    path: path.to_string(),
                });
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn get_listing(
        &self,
        category: Category,
        slot: CursorSlot,
        query: &ListingQuery,
    ) -> Result<ListingPage, PlatformError> {
        let path = listing_path(&self.username, category, slot)?;
        let mut params = vec![("limit", query.limit.to_string())];
        if let Some(before) = &query.before {
            params.push(("before", before.clone()));
        }
        if let Some(after) = &query.after {
            params.push(("after", after.clone()));
        }
        let body = self
            .get_json(&path, &params, query.before.as_deref())
            .await?;
        parse_listing(&path, body, query.before.is_some())
    }

    async fn get_items_by_ids(&self, fullnames: &[String]) -> Result<Vec<Thing>, PlatformError> {
        if fullnames.is_empty() {
            return Ok(Vec::new());
        }
        let body = self
            .get_json("/api/info", &[("id", fullnames.join(","))], None)
            .await?;
        Ok(parse_listing("/api/info", body, false)?.items)
    }

    async fn get_community_info(
        &self,
        names: &[String],
    ) -> Result<Vec<SourceAbout>, PlatformError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let sr_names: Vec<&str> = names
            .iter()
            .map(|n| n.strip_prefix("r/").unwrap_or(n))
            .collect();
        let body = self
            .get_json("/api/info", &[("sr_name", sr_names.join(","))], None)
            .await?;
        let children = listing_children("/api/info", &body)?;
        let mut abouts = Vec::with_capacity(children.len());
        for child in children {
            if let Some(data) = child.get("data") {
                abouts.push(serde_json::from_value(data.clone())?);
            }
        }
        Ok(abouts)
    }

    async fn get_user_about(&self, name: &str) -> Result<SourceAbout, PlatformError> {
        let user = name.strip_prefix("u/").unwrap_or(name);
        let path = format!("/user/{user}/about");
        let body = self.get_json(&path, &[], None).await?;
        let data = body.get("data").cloned().ok_or(PlatformError::Malformed {
            path,
            reason: "missing data".to_string(),
        })?;
        Ok(serde_json::from_value(data)?)
    }

    fn ratelimit_remaining(&self) -> u32 {
        self.ratelimit_remaining.load(Ordering::Relaxed)
    }

    async fn remove_from_listing(
        &self,
        category: Category,
        kind: ItemKind,
        id: &str,
    ) -> Result<(), PlatformError> {
        let fullname = kind.fullname(id);
        match category {
            Category::Saved => self.post_form("/api/unsave", &[("id", &fullname)]).await,
            Category::Created => self.post_form("/api/del", &[("id", &fullname)]).await,
            Category::Upvoted | Category::Downvoted => {
                self.post_form("/api/vote", &[("id", &fullname), ("dir", "0")])
                    .await
            }
            Category::Hidden => self.post_form("/api/unhide", &[("id", &fullname)]).await,
            Category::Awarded => Err(PlatformError::Unsupported(
                "awards cannot be removed".to_string(),
            )),
        }
    }

    async fn get_comment_body(&self, id: &str) -> Result<String, PlatformError> {
        let fullname = ItemKind::Comment.fullname(id);
        let items = self.get_items_by_ids(&[fullname]).await?;
        match items.into_iter().next() {
            Some(Thing::Comment(comment)) => Ok(comment.body),
            _ => Err(PlatformError::Malformed {
                path: "/api/info".to_string(),
                reason: format!("comment {id} not found"),
            }),
        }
    }
}

fn listing_path(username: &str, category: Category, slot: CursorSlot) -> Result<String, PlatformError> {
    let leaf = match (category, slot) {
        (Category::Saved, _) => "saved",
        (Category::Created, CursorSlot::Posts) => "submitted",
        (Category::Created, CursorSlot::Comments) => "comments",
        (Category::Created, CursorSlot::Mixed) => {
            return Err(PlatformError::Unsupported(
                "created items are listed per kind".to_string(),
            ))
        }
        (Category::Upvoted, _) => "upvoted",
        (Category::Downvoted, _) => "downvoted",
        (Category::Hidden, _) => "hidden",
        (Category::Awarded, _) => "gilded/given",
    };
    Ok(format!("/user/{username}/{leaf}"))
}

fn listing_children<'a>(path: &str, body: &'a Value) -> Result<&'a Vec<Value>, PlatformError> {
    body.pointer("/data/children")
        .and_then(Value::as_array)
        .ok_or_else(|| PlatformError::Malformed {
            path: path.to_string(),
            reason: "missing data.children".to_string(),
        })
}

/// Decode a listing body. `walking_newer` selects which pagination field
/// continues the walk.
fn parse_listing(path: &str, body: Value, walking_newer: bool) -> Result<ListingPage, PlatformError> {
    let items = listing_children(path, &body)?
        .iter()
        .cloned()
        .filter_map(Thing::from_child)
        .collect();
    let field = if walking_newer { "/data/before" } else { "/data/after" };
    let next = body
        .pointer(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if walking_newer {
                PageToken::Newer(s.to_string())
            } else {
                PageToken::Older(s.to_string())
            }
        });
    Ok(ListingPage { items, next })
}

fn parse_ratelimit(headers: &HeaderMap) -> Option<u32> {
    let raw = headers.get(RATELIMIT_HEADER)?.to_str().ok()?;
    let remaining: f64 = raw.trim().parse().ok()?;
    Some(remaining.max(0.0) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_listing_paths() {
        assert_eq!(
            listing_path("alice", Category::Saved, CursorSlot::Mixed).unwrap(),
            "/user/alice/saved"
        );
        assert_eq!(
            listing_path("alice", Category::Created, CursorSlot::Comments).unwrap(),
            "/user/alice/comments"
        );
        assert_eq!(
            listing_path("alice", Category::Awarded, CursorSlot::Mixed).unwrap(),
            "/user/alice/gilded/given"
        );
        assert!(listing_path("alice", Category::Created, CursorSlot::Mixed).is_err());
    }

    fn listing_body(before: Option<&str>, after: Option<&str>) -> Value {
        json!({
            "kind": "Listing",
            "data": {
                "before": before,
                "after": after,
                "children": [
                    {"kind": "t3", "data": {"id": "b", "name": "t3_b", "title": "B"}},
                    {"kind": "t2", "data": {"name": "ignored"}},
                    {"kind": "t1", "data": {"id": "a", "name": "t1_a", "body": "A"}}
                ]
            }
        })
    }

    #[test]
    fn test_parse_listing_walking_newer_uses_before() {
        let page = parse_listing("/x", listing_body(Some("t3_b"), Some("t1_a")), true).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next, Some(PageToken::Newer("t3_b".into())));
    }

    #[test]
    fn test_parse_listing_walking_older_uses_after() {
        let page = parse_listing("/x", listing_body(None, Some("t1_a")), false).unwrap();
        assert_eq!(page.next, Some(PageToken::Older("t1_a".into())));

        let done = parse_listing("/x", listing_body(Some("t3_b"), None), false).unwrap();
        assert!(done.is_finished());
    }

    #[test]
    fn test_parse_listing_rejects_malformed_body() {
        let err = parse_listing("/x", json!({"error": 500}), false).unwrap_err();
        assert!(matches!(err, PlatformError::Malformed { .. }));
    }

    #[test]
    fn test_parse_ratelimit_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_ratelimit(&headers), None);
        headers.insert(RATELIMIT_HEADER, HeaderValue::from_static("597.0"));
        assert_eq!(parse_ratelimit(&headers), Some(597));
        headers.insert(RATELIMIT_HEADER, HeaderValue::from_static("junk"));
        assert_eq!(parse_ratelimit(&headers), None);
    }
}
