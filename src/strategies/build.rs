//! Full-site build strategy with homepage pre-checks.
//!
//! The build is orders of magnitude slower than anything else the router
//! does, so it is the last resort inside its own strategy:
//!
//! 1. fetch the homepage once and look for advertised feeds; if any, probe
//!    them with the RSS strategy (skipped while RSS is suppressed)
//! 2. otherwise (or if those feeds yield nothing) take article-like
//!    same-host anchors straight from the homepage
//! 3. only if both come up empty, run the isolated full-site build

use tracing::{debug, info, instrument};
use url::Url;

use super::{AttemptContext, StrategyKit, StrategyReport, homepage, rss};
use crate::health::classifier::RawOutcome;
use crate::models::{CandidateMetadata, CandidateUrl, DiscoveryMethod};
use crate::utils::{host_allowed, normalize_url, resolve_url};

pub const VIA_FEED_LINK: &str = "homepage_feed_link";
pub const VIA_HOMEPAGE_LINKS: &str = "homepage_links";
pub const VIA_SITE_INDEX: &str = "site_index";

fn build_candidate(ctx: &AttemptContext<'_>, url: &Url, via: &str) -> CandidateUrl {
    CandidateUrl {
        url: normalize_url(url),
        source_id: ctx.source.id.clone(),
        method: DiscoveryMethod::FullBuild,
        published_at: None,
        metadata: CandidateMetadata {
            via: Some(via.to_string()),
            ..Default::default()
        },
    }
}

#[instrument(level = "info", skip_all, fields(source_id = %ctx.source.id))]
pub async fn discover(kit: &StrategyKit, ctx: &mut AttemptContext<'_>) -> StrategyReport {
    let mut report = StrategyReport::default();
    let homepage_url = ctx.source.homepage_url();

    match ctx.homepage(kit.fetcher.as_ref()).await {
        Ok(page) if page.is_success() => {
            let html = page.text();
            let base = Url::parse(&page.final_url)
                .or_else(|_| Url::parse(&homepage_url))
                .ok();

            if let Some(base) = base {
                if ctx.rss_allowed {
                    let feeds = homepage::feed_links(&html, &base);
                    if !feeds.is_empty() {
                        info!(feeds = ?feeds, "Homepage advertises feeds; delegating to RSS");
                        let nested = rss::probe_feeds(kit, ctx, &feeds, Some(VIA_FEED_LINK)).await;
                        if !nested.candidates.is_empty() {
                            return StrategyReport {
                                note: Some(format!("delegated to rss via {} feed link(s)", feeds.len())),
                                ..nested
                            };
                        }
                        debug!("Advertised feeds produced nothing; continuing pre-check");
                    }
                }

                let links = homepage::article_links(&html, &base, &ctx.allowed_hosts);
                if !links.is_empty() {
                    report.candidates = links
                        .iter()
                        .take(ctx.cap)
                        .map(|u| build_candidate(ctx, u, VIA_HOMEPAGE_LINKS))
                        .collect();
                    report.outcomes.push(RawOutcome::Found(report.candidates.len()));
                    report.note = Some("homepage article links; build skipped".to_string());
                    info!(count = report.candidates.len(), "Homepage pre-check found article links");
                    return report;
                }
            }
        }
        Ok(page) => report.outcomes.push(RawOutcome::HttpStatus(page.status)),
        Err(e) => report.outcomes.push(RawOutcome::from_fetch_error(&e)),
    }

    let urls = kit.builder.build(&homepage_url, kit.config.http_timeout()).await;
    let base = Url::parse(&homepage_url).ok();
    report.candidates = urls
        .iter()
        .filter_map(|raw| base.as_ref().and_then(|b| resolve_url(b, raw)))
        .filter(|u| u.host_str().map(|h| host_allowed(h, &ctx.allowed_hosts)).unwrap_or(false))
        .take(ctx.cap)
        .map(|u| build_candidate(ctx, &u, VIA_SITE_INDEX))
        .collect();
    report.outcomes.push(if report.candidates.is_empty() {
        RawOutcome::Empty
    } else {
        RawOutcome::Found(report.candidates.len())
    });
    info!(returned = urls.len(), kept = report.candidates.len(), "Full-site build finished");
    report
}
