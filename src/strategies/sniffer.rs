//! Heuristic sniffer strategy.
//!
//! Scores every in-scope homepage link with the external
//! [`HeuristicClassifier`](crate::interfaces::HeuristicClassifier) and keeps
//! the ones it calls articles. The classifier's confidence is carried
//! through untouched.

use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use super::{AttemptContext, StrategyKit, StrategyReport, homepage};
use crate::health::classifier::RawOutcome;
use crate::models::{CandidateMetadata, CandidateUrl, DiscoveryMethod};
use crate::utils::normalize_url;

/// Upper bound on links scored per attempt, as a multiple of the cap.
const SCORE_BUDGET_FACTOR: usize = 4;

#[instrument(level = "info", skip_all, fields(source_id = %ctx.source.id))]
pub async fn discover(kit: &StrategyKit, ctx: &mut AttemptContext<'_>) -> StrategyReport {
    let mut report = StrategyReport::default();

    let page = match ctx.homepage(kit.fetcher.as_ref()).await {
        Ok(page) if page.is_success() => page,
        Ok(page) => {
            report.outcomes.push(RawOutcome::HttpStatus(page.status));
            return report;
        }
        Err(e) => {
            report.outcomes.push(RawOutcome::from_fetch_error(&e));
            return report;
        }
    };

    let Ok(base) = url::Url::parse(&page.final_url) else {
        report.outcomes.push(RawOutcome::Crashed(format!("bad homepage url {}", page.final_url)));
        return report;
    };
    let links = homepage::same_host_links(&page.text(), &base, &ctx.allowed_hosts);
    let budget = ctx.cap.saturating_mul(SCORE_BUDGET_FACTOR).max(1);
    let source_id = ctx.source.id.clone();
    let classifier = kit.classifier.clone();

    let verdicts: Vec<Result<Option<CandidateUrl>, String>> = stream::iter(links.into_iter().take(budget))
        .then(|link| {
            let classifier = classifier.clone();
            let source_id = source_id.clone();
            async move {
                let url = normalize_url(&link);
                match classifier.guess(&url).await {
                    Ok((_, confidence)) if !confidence.is_finite() => {
                        Err(format!("classifier returned non-finite confidence for {url}"))
                    }
                    Ok((true, confidence)) => Ok(Some(CandidateUrl {
                        url,
                        source_id,
                        method: DiscoveryMethod::Sniffer,
                        published_at: None,
                        metadata: CandidateMetadata {
                            confidence: Some(confidence),
                            ..Default::default()
                        },
                    })),
                    Ok((false, _)) => Ok(None),
                    Err(e) => Err(format!("classifier failed for {url}: {e}")),
                }
            }
        })
        .collect()
        .await;

    let mut errors = 0usize;
    for verdict in verdicts {
        match verdict {
            Ok(Some(candidate)) if report.candidates.len() < ctx.cap => report.candidates.push(candidate),
            Ok(_) => {}
            Err(e) => {
                errors += 1;
                debug!(error = %e, "Skipping unscored link");
                report.outcomes.push(RawOutcome::Crashed(e));
            }
        }
    }
    if errors > 0 {
        warn!(errors, "Classifier failed on some links");
    }

    report.outcomes.push(if report.candidates.is_empty() {
        RawOutcome::Empty
    } else {
        RawOutcome::Found(report.candidates.len())
    });
    info!(count = report.candidates.len(), "Sniffer finished");
    report
}
