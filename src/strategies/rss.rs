//! RSS/Atom feed probing.
//!
//! Builds a candidate feed-URL list (known feeds first, each with an
//! `http -> https` variant, then conventional paths) and tries each in
//! order, stopping at the first feed that parses with at least one entry.
//!
//! Per feed fetch:
//! - 404: skip, keep trying
//! - 401 / 403 / 429 / 5xx or a network error: transient, keep trying
//! - 200 / 301 / 302 and parseable with entries: stop
//!
//! Entries are filtered by recency. When every entry is too old but the
//! feed's newest entry is still within the activity window, up to
//! `fallback_max_entries` entries are emitted anyway, tagged
//! `fallback_include_older`.

use chrono::{DateTime, Duration, Utc};
use feed_rs::model::Feed;
use itertools::Itertools;
use tracing::{debug, info, instrument};
use url::Url;

use super::{AttemptContext, StrategyKit, StrategyReport};
use crate::health::classifier::RawOutcome;
use crate::models::{CandidateMetadata, CandidateUrl, DiscoveryMethod};
use crate::utils::{normalize_url, resolve_url, truncate_for_log};

/// Conventional feed locations, probed after any known feeds.
pub const CONVENTIONAL_FEED_PATHS: &[&str] = &[
    "/rss",
    "/feed",
    "/rss.xml",
    "/feed.xml",
    "/atom.xml",
    "/index.xml",
    "/feeds/posts/default",
    "/rss/news",
    "/news/rss.xml",
    "/?feed=rss2",
];

/// One entry pulled out of a parsed feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub url: String,
    pub published: Option<DateTime<Utc>>,
    pub title: Option<String>,
}

/// Recency parameters for [`select_entries`].
#[derive(Debug, Clone, Copy)]
pub struct RecencyPolicy {
    pub cutoff: DateTime<Utc>,
    /// The newest entry must be at least this recent for the fallback.
    pub activity_since: DateTime<Utc>,
    pub fallback_max: usize,
    pub cap: usize,
}

/// Feed URLs to try: explicit feeds (plus https variants), then, when
/// `conventional` is set, the conventional paths under the homepage.
pub fn candidate_feed_urls(homepage: &str, explicit: &[String], conventional: bool) -> Vec<String> {
    let mut urls = Vec::new();
    for feed in explicit {
        let feed = feed.trim();
        if feed.is_empty() {
            continue;
        }
        urls.push(feed.to_string());
        if let Some(rest) = feed.strip_prefix("http://") {
            urls.push(format!("https://{rest}"));
        }
    }
    if conventional {
        if let Ok(base) = Url::parse(homepage) {
            urls.extend(
                CONVENTIONAL_FEED_PATHS
                    .iter()
                    .filter_map(|path| base.join(path).ok())
                    .map(|u| u.to_string()),
            );
        }
    }
    urls.into_iter().unique().collect()
}

/// Entries with a resolvable http(s) link, in feed order.
pub fn feed_entries(feed: &Feed, feed_url: &Url) -> Vec<FeedEntry> {
    feed.entries
        .iter()
        .filter_map(|entry| {
            let href = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))?;
            let url = resolve_url(feed_url, &href)?;
            Some(FeedEntry {
                url: normalize_url(&url),
                published: entry.published.or(entry.updated),
                title: entry.title.as_ref().map(|t| t.content.trim().to_string()),
            })
        })
        .collect()
}

/// Apply recency filtering, with the older-entry fallback.
///
/// Returns the kept entries and whether the fallback was used. Undated
/// entries always pass the recency check.
pub fn select_entries(entries: &[FeedEntry], policy: RecencyPolicy) -> (Vec<FeedEntry>, bool) {
    let newest_first = |a: &&FeedEntry, b: &&FeedEntry| b.published.cmp(&a.published);

    let recent: Vec<FeedEntry> = entries
        .iter()
        .filter(|e| e.published.is_none_or(|p| p >= policy.cutoff))
        .take(policy.cap)
        .cloned()
        .collect();
    if !recent.is_empty() {
        return (recent, false);
    }

    let newest = entries.iter().filter_map(|e| e.published).max();
    match newest {
        Some(newest) if newest >= policy.activity_since => {
            let kept = entries
                .iter()
                .sorted_by(newest_first)
                .take(policy.fallback_max.min(policy.cap))
                .cloned()
                .collect();
            (kept, true)
        }
        _ => (Vec::new(), false),
    }
}

/// Probe the source's known feeds, then conventional paths.
pub async fn discover(kit: &StrategyKit, ctx: &mut AttemptContext<'_>) -> StrategyReport {
    let feeds = candidate_feed_urls(&ctx.source.homepage_url(), &ctx.source.known_feeds, true);
    probe_feeds(kit, ctx, &feeds, None).await
}

/// Try `feeds` in order; stop at the first that parses with entries.
#[instrument(level = "info", skip_all, fields(source_id = %ctx.source.id, feeds = feeds.len()))]
pub async fn probe_feeds(
    kit: &StrategyKit,
    ctx: &mut AttemptContext<'_>,
    feeds: &[String],
    via: Option<&str>,
) -> StrategyReport {
    let mut report = StrategyReport::default();
    if !ctx.rss_allowed {
        report.note = Some("rss suppressed".to_string());
        return report;
    }

    let recency = kit.config.recency_days;
    let policy = RecencyPolicy {
        cutoff: ctx.now - Duration::days(recency),
        activity_since: ctx.now - kit.gate.fallback_activity_window(ctx.source.frequency.as_deref()),
        fallback_max: kit.config.fallback_max_entries,
        cap: ctx.cap,
    };

    for feed_url in feeds {
        let page = match kit.fetcher.get(feed_url).await {
            Ok(page) => page,
            Err(e) => {
                debug!(%feed_url, error = %e, "Feed fetch failed");
                report.outcomes.push(RawOutcome::from_fetch_error(&e));
                continue;
            }
        };
        if !page.is_success() {
            debug!(%feed_url, status = page.status, "Feed fetch returned non-success status");
            report.outcomes.push(RawOutcome::HttpStatus(page.status));
            continue;
        }

        let feed = match feed_rs::parser::parse(&page.body[..]) {
            Ok(feed) if !feed.entries.is_empty() => feed,
            Ok(_) => {
                report.outcomes.push(RawOutcome::Unparseable("feed has no entries".into()));
                continue;
            }
            Err(e) => {
                debug!(%feed_url, error = %truncate_for_log(&e.to_string(), 200), "Feed did not parse");
                report.outcomes.push(RawOutcome::Unparseable(e.to_string()));
                continue;
            }
        };

        let base = Url::parse(&page.final_url)
            .or_else(|_| Url::parse(feed_url))
            .ok();
        let Some(base) = base else {
            report.outcomes.push(RawOutcome::Unparseable(format!("bad feed url {feed_url}")));
            continue;
        };
        let entries = feed_entries(&feed, &base);
        let (kept, fallback) = select_entries(&entries, policy);

        report.candidates = kept
            .into_iter()
            .map(|entry| CandidateUrl {
                url: entry.url,
                source_id: ctx.source.id.clone(),
                method: DiscoveryMethod::RssFeed,
                published_at: entry.published,
                metadata: CandidateMetadata {
                    feed_url: Some(feed_url.clone()),
                    entry_count: Some(entries.len()),
                    fallback_include_older: fallback,
                    title: entry.title,
                    via: via.map(str::to_string),
                    ..Default::default()
                },
            })
            .collect();

        if report.candidates.is_empty() {
            report.outcomes.push(RawOutcome::FeedAlive { entries: entries.len() });
            report.note = Some(format!("{feed_url}: {} entries, none recent", entries.len()));
        } else {
            report.outcomes.push(RawOutcome::Found(report.candidates.len()));
        }
        info!(
            %feed_url,
            entries = entries.len(),
            emitted = report.candidates.len(),
            fallback,
            "Feed parsed"
        );
        return report;
    }

    report
}
