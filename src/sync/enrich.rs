//! Icon lookup for the sources referenced by a batch.
//!
//! Communities are looked up in batches, users one request each. The number
//! of requests is capped by the platform's remaining rate-limit budget, read
//! once per category; sources beyond the cap are left out of the icon map.
//! A failed lookup only costs the icons it covered.

use futures_util::future::join_all;

use super::batch::{SyncBatch, ICON_PLACEHOLDER};
use crate::platform::{PlatformClient, MAX_IDS_PER_REQUEST};
use crate::types::Category;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichStats {
    pub requests: usize,
    pub resolved: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub async fn enrich_icons(
    platform: &dyn PlatformClient,
    category: Category,
    batch: &mut SyncBatch,
) -> EnrichStats {
    let (communities, users): (Vec<String>, Vec<String>) = batch
        .sources
        .iter()
        .filter(|s| !s.is_empty())
        .cloned()
        .partition(|s| !s.starts_with("u/"));
    if communities.is_empty() && users.is_empty() {
        return EnrichStats::default();
    }

    let mut budget = platform.ratelimit_remaining() as usize;
    let mut stats = EnrichStats::default();

    let chunks: Vec<&[String]> = communities.chunks(MAX_IDS_PER_REQUEST).collect();
    let community_requests = chunks.len().min(budget);
    budget -= community_requests;
    let results = join_all(
        chunks[..community_requests]
            .iter()
            .map(|chunk| platform.get_community_info(chunk)),
    )
    .await;
    for (chunk, result) in chunks[..community_requests].iter().zip(results) {
        let abouts = match result {
            Ok(abouts) => abouts,
            Err(e) => {
                tracing::warn!(
                    %category,
                    sources = chunk.len(),
                    error = %e,
                    "Community icon lookup failed"
                );
                stats.failed += chunk.len();
                continue;
            }
        };
        for name in chunk.iter() {
            batch
                .icon_urls
                .insert(name.clone(), ICON_PLACEHOLDER.to_string());
        }
        for about in abouts {
            let Some(name) = about.display_name_prefixed.clone() else {
                continue;
            };
            if let Some(url) = about.community_icon_url() {
                batch.icon_urls.insert(name, url);
            }
        }
    }
    stats.requests += community_requests;
    stats.skipped += chunks[community_requests..]
        .iter()
        .map(|c| c.len())
        .sum::<usize>();

    let user_requests = users.len().min(budget);
    let profiles = join_all(
        users[..user_requests]
            .iter()
            .map(|name| platform.get_user_about(name)),
    )
    .await;
    for (name, result) in users[..user_requests].iter().zip(profiles) {
        match result {
            Ok(about) => {
                let url = about
                    .user_icon_url()
                    .unwrap_or_else(|| ICON_PLACEHOLDER.to_string());
                batch.icon_urls.insert(name.clone(), url);
            }
            Err(e) => {
                tracing::warn!(
                    %category,
                    source = %name,
                    error = %e,
                    "User icon lookup failed"
                );
                stats.failed += 1;
            }
        }
    }
    stats.requests += user_requests;
    stats.skipped += users.len() - user_requests;

    stats.resolved = batch
        .icon_urls
        .values()
        .filter(|url| url.as_str() != ICON_PLACEHOLDER)
        .count();
    if stats.skipped > 0 {
        tracing::info!(
            %category,
            skipped = stats.skipped,
            "Rate-limit budget exhausted, some source icons left unresolved"
        );
    }
    stats
}
