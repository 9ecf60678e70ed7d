//! Typed view of the platform's listing and profile payloads.

use serde::Deserialize;

use crate::types::ItemKind;

/// A post as returned inside a listing (`kind: "t3"`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Post {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub subreddit_name_prefixed: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub created_utc: f64,
}

/// A comment as returned inside a listing (`kind: "t1"`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Comment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub subreddit_name_prefixed: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub created_utc: f64,
}

/// A listing child. Other kinds (messages, awards, ...) are filtered out by
/// [`Thing::from_child`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum Thing {
    #[serde(rename = "t3")]
    Post(Post),
    #[serde(rename = "t1")]
    Comment(Comment),
}

impl Thing {
    /// Decode one raw listing child, returning `None` for unsupported kinds.
    pub fn from_child(child: serde_json::Value) -> Option<Self> {
        match child.get("kind").and_then(|k| k.as_str()) {
            Some("t3") | Some("t1") => match serde_json::from_value(child) {
                Ok(thing) => Some(thing),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping undecodable listing child");
                    None
                }
            },
            _ => None,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Post(_) => ItemKind::Post,
            Self::Comment(_) => ItemKind::Comment,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Post(p) => &p.id,
            Self::Comment(c) => &c.id,
        }
    }

    /// Platform-global identifier (`t3_...` / `t1_...`), used as a cursor.
    pub fn fullname(&self) -> &str {
        match self {
            Self::Post(p) => &p.name,
            Self::Comment(c) => &c.name,
        }
    }

    /// Title for posts, body text for comments.
    pub fn content(&self) -> &str {
        match self {
            Self::Post(p) => &p.title,
            Self::Comment(c) => &c.body,
        }
    }

    pub fn author(&self) -> &str {
        match self {
            Self::Post(p) => &p.author,
            Self::Comment(c) => &c.author,
        }
    }

    /// Community or profile the item was posted in, e.g. `r/rust` or `u/alice`.
    pub fn source(&self) -> &str {
        match self {
            Self::Post(p) => &p.subreddit_name_prefixed,
            Self::Comment(c) => &c.subreddit_name_prefixed,
        }
    }

    pub fn permalink(&self) -> &str {
        match self {
            Self::Post(p) => &p.permalink,
            Self::Comment(c) => &c.permalink,
        }
    }

    pub fn created_utc(&self) -> f64 {
        match self {
            Self::Post(p) => p.created_utc,
            Self::Comment(c) => c.created_utc,
        }
    }
}

/// Direction in which a listing continues past the page just fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageToken {
    /// More items newer than this page (walking with `before`).
    Newer(String),
    /// More items older than this page (walking with `after`).
    Older(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingQuery {
    pub before: Option<String>,
    pub after: Option<String>,
    pub limit: u32,
}

impl ListingQuery {
    /// Items newer than `cursor`, or the newest items when there is no cursor.
    pub fn newer_than(cursor: Option<&str>, limit: u32) -> Self {
        Self {
            before: cursor.map(str::to_owned),
            after: None,
            limit,
        }
    }

    pub fn latest(limit: u32) -> Self {
        Self {
            before: None,
            after: None,
            limit,
        }
    }

    /// Query for the page that follows `token`.
    pub fn continued(token: &PageToken, limit: u32) -> Self {
        match token {
            PageToken::Newer(name) => Self {
                before: Some(name.clone()),
                after: None,
                limit,
            },
            PageToken::Older(name) => Self {
                before: None,
                after: Some(name.clone()),
                limit,
            },
        }
    }
}

/// One page of a listing, newest item first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingPage {
    pub items: Vec<Thing>,
    pub next: Option<PageToken>,
}

impl ListingPage {
    /// True when the platform reports no further pages in the walked direction.
    pub fn is_finished(&self) -> bool {
        self.next.is_none()
    }
}

/// Icon fields shared by community records and user profiles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IconFields {
    #[serde(default)]
    pub icon_img: Option<String>,
    #[serde(default)]
    pub community_icon: Option<String>,
    #[serde(default)]
    pub snoovatar_img: Option<String>,
}

/// `about` data for a community (`t5`) or a user account (`t2`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SourceAbout {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name_prefixed: Option<String>,
    #[serde(flatten)]
    pub icons: IconFields,
    /// User accounts carry their profile community here.
    #[serde(default)]
    pub subreddit: Option<IconFields>,
}

impl SourceAbout {
    /// Icon for a community: `icon_img`, then `community_icon`.
    pub fn community_icon_url(&self) -> Option<String> {
        first_icon([
            self.icons.icon_img.as_deref(),
            self.icons.community_icon.as_deref(),
        ])
    }

    /// Icon for a user profile. Account-level fields win over the profile
    /// community's, and avatars are the last resort.
    pub fn user_icon_url(&self) -> Option<String> {
        let profile = self.subreddit.as_ref();
        first_icon([
            self.icons.icon_img.as_deref(),
            profile.and_then(|p| p.icon_img.as_deref()),
            self.icons.community_icon.as_deref(),
            profile.and_then(|p| p.community_icon.as_deref()),
            self.icons.snoovatar_img.as_deref(),
            profile.and_then(|p| p.snoovatar_img.as_deref()),
        ])
    }
}

/// First non-empty candidate with its query string removed.
fn first_icon<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|url| url.split('?').next().unwrap_or(url))
        .find(|url| !url.is_empty())
        .map(str::to_owned)
}
