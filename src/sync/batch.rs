//! Per-category write set assembled during a sync.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::platform::Thing;
use crate::types::ItemKind;

/// Written for sources whose icon could not be resolved.
pub const ICON_PLACEHOLDER: &str = "#";

const PERMALINK_HOST: &str = "https://www.reddit.com";

/// How an item entered the batch. Not persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ItemOrigin {
    #[default]
    Incremental,
    Imported,
}

/// The normalized form of an item as stored in the user's document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedItem {
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub content: String,
    pub author: String,
    #[serde(rename = "sub")]
    pub source: String,
    pub url: String,
    pub created_epoch: i64,
    #[serde(skip)]
    pub origin: ItemOrigin,
}

impl MergedItem {
    pub fn from_thing(thing: &Thing, origin: ItemOrigin) -> Self {
        Self {
            kind: thing.kind(),
            content: thing.content().to_string(),
            author: format!("u/{}", thing.author()),
            source: thing.source().to_string(),
            url: format!(
                "{PERMALINK_HOST}{}",
                thing.permalink().trim_end_matches('/')
            ),
            created_epoch: thing.created_utc() as i64,
            origin,
        }
    }
}

/// Items, sources and icons for one category, keyed by item id.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncBatch {
    pub items: BTreeMap<String, MergedItem>,
    /// Sources referenced by `items`, before icon lookup.
    pub sources: BTreeSet<String>,
    /// Resolved icon per source. Sources skipped for rate-limit reasons are
    /// absent.
    pub icon_urls: BTreeMap<String, String>,
}

impl SyncBatch {
    pub fn insert(&mut self, thing: &Thing, origin: ItemOrigin) {
        let item = MergedItem::from_thing(thing, origin);
        self.sources.insert(item.source.clone());
        self.items.insert(thing.id().to_string(), item);
    }

    pub fn extend<'a>(&mut self, things: impl IntoIterator<Item = &'a Thing>, origin: ItemOrigin) {
        for thing in things {
            self.insert(thing, origin);
        }
    }

    pub fn count(&self, origin: ItemOrigin) -> usize {
        self.items.values().filter(|i| i.origin == origin).count()
    }

    /// Resolved icon for `source`, or the placeholder.
    #[cfg(test)]
    pub fn icon_url(&self, source: &str) -> &str {
        self.icon_urls
            .get(source)
            .map(String::as_str)
            .unwrap_or(ICON_PLACEHOLDER)
    }
}

/// Import queue entries consumed by a category, plus what the platform
/// returned for them.
#[derive(Debug, Clone, Default)]
pub struct ImportSet {
    pub fullnames: Vec<String>,
    pub things: Vec<Thing>,
}
