//! Full-site article index, run inside the isolated build worker.
//!
//! This is the slow path: it walks the homepage, a bounded number of section
//! pages, and whatever sitemaps the site exposes, collecting article-like
//! same-host URLs. It runs in a child process (see [`crate::worker`]) and
//! hands its result back through a JSON file.
//!
//! ## Sources walked, in order
//!
//! | Source | Bound |
//! |--------|-------|
//! | Homepage anchors | one page |
//! | Section pages linked from the homepage | `max_sections` |
//! | `Sitemap:` lines in `robots.txt`, then `/sitemap.xml`, `/news-sitemap.xml`, `/sitemap_index.xml` | `max_sitemaps` documents in total, child sitemaps included |
//!
//! Collection stops once `max_urls` distinct URLs are found.

use anyhow::Context;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::fetch::{HttpFetcher, PageFetcher};
use crate::strategies::homepage::{article_links, is_utility_path, looks_like_article_path, same_host_links};
use crate::utils::{host_allowed, normalize_host, normalize_url};
use crate::worker::{WorkerReport, write_report};

pub const DEFAULT_MAX_SECTIONS: usize = 12;
pub const DEFAULT_MAX_SITEMAPS: usize = 6;
pub const DEFAULT_MAX_URLS: usize = 500;

const CONVENTIONAL_SITEMAPS: &[&str] = &["/sitemap.xml", "/news-sitemap.xml", "/sitemap_index.xml"];

/// `<loc>` values from a sitemap document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SitemapDoc {
    /// Page URLs from a `<urlset>`.
    pub locs: Vec<String>,
    /// Child sitemap URLs from a `<sitemapindex>`.
    pub children: Vec<String>,
}

/// Parse a sitemap or sitemap index.
pub fn parse_sitemap(xml: &str) -> Result<SitemapDoc, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut doc = SitemapDoc::default();
    let mut in_index_entry = false;
    let mut in_loc = false;
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"sitemap" => in_index_entry = true,
                b"loc" => {
                    in_loc = true;
                    text.clear();
                }
                _ => {}
            },
            Event::Text(t) if in_loc => text.push_str(&String::from_utf8_lossy(&t)),
            Event::CData(t) if in_loc => text.push_str(&String::from_utf8_lossy(&t)),
            Event::GeneralRef(r) if in_loc => {
                let name = String::from_utf8_lossy(&r).into_owned();
                if let Some(resolved) = quick_xml::escape::resolve_predefined_entity(&name) {
                    text.push_str(resolved);
                } else if let Ok(Some(c)) = r.resolve_char_ref() {
                    text.push(c);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"loc" => {
                    in_loc = false;
                    let loc = text.trim();
                    if !loc.is_empty() {
                        if in_index_entry {
                            doc.children.push(loc.to_string());
                        } else {
                            doc.locs.push(loc.to_string());
                        }
                    }
                }
                b"sitemap" => in_index_entry = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(doc)
}

/// `Sitemap:` directives from a robots.txt body.
pub fn robots_sitemaps(robots: &str) -> Vec<String> {
    robots
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case("sitemap")
                .then(|| value.trim().to_string())
        })
        .filter(|v| !v.is_empty())
        .collect()
}

/// Same-host links that look like section fronts: one or two path
/// segments, not an article, not a utility page.
pub fn section_links(html: &str, base: &Url, allowed_hosts: &[String]) -> Vec<Url> {
    same_host_links(html, base, allowed_hosts)
        .into_iter()
        .filter(|u| {
            let path = u.path();
            let depth = path.split('/').filter(|s| !s.is_empty()).count();
            (1..=2).contains(&depth) && !looks_like_article_path(path) && !is_utility_path(path)
        })
        .collect()
}

struct Collector {
    seen: HashSet<String>,
    urls: Vec<String>,
    max: usize,
}

impl Collector {
    fn new(max: usize) -> Self {
        Self {
            seen: HashSet::new(),
            urls: Vec::new(),
            max,
        }
    }

    fn full(&self) -> bool {
        self.urls.len() >= self.max
    }

    fn push(&mut self, url: &Url) {
        if self.full() {
            return;
        }
        let normalized = normalize_url(url);
        if self.seen.insert(normalized.clone()) {
            self.urls.push(normalized);
        }
    }
}

/// Walks a site for article URLs.
pub struct SiteIndexer {
    fetcher: Arc<dyn PageFetcher>,
    max_sections: usize,
    max_sitemaps: usize,
    max_urls: usize,
}

impl SiteIndexer {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            fetcher,
            max_sections: DEFAULT_MAX_SECTIONS,
            max_sitemaps: DEFAULT_MAX_SITEMAPS,
            max_urls: DEFAULT_MAX_URLS,
        }
    }

    pub fn with_limits(mut self, max_sections: usize, max_sitemaps: usize, max_urls: usize) -> Self {
        self.max_sections = max_sections;
        self.max_sitemaps = max_sitemaps;
        self.max_urls = max_urls;
        self
    }

    async fn fetch_text(&self, url: &str) -> Option<String> {
        match self.fetcher.get(url).await {
            Ok(page) if page.is_success() => Some(page.text()),
            Ok(page) => {
                debug!(%url, status = page.status, "Skipping non-success page");
                None
            }
            Err(e) => {
                debug!(%url, error = %e, "Fetch failed");
                None
            }
        }
    }

    #[instrument(level = "info", skip_all, fields(%homepage))]
    pub async fn index(&self, homepage: &str) -> Vec<String> {
        let Ok(base) = Url::parse(homepage) else {
            warn!("Unparseable homepage URL");
            return Vec::new();
        };
        let Some(host) = base.host_str().map(normalize_host) else {
            return Vec::new();
        };
        let allowed = vec![host];
        let mut collector = Collector::new(self.max_urls);

        let mut sections = Vec::new();
        if let Some(html) = self.fetch_text(homepage).await {
            for url in article_links(&html, &base, &allowed) {
                collector.push(&url);
            }
            sections = section_links(&html, &base, &allowed);
        }
        debug!(found = collector.urls.len(), sections = sections.len(), "Homepage scanned");

        for section in sections.iter().take(self.max_sections) {
            if collector.full() {
                break;
            }
            if let Some(html) = self.fetch_text(section.as_str()).await {
                for url in article_links(&html, section, &allowed) {
                    collector.push(&url);
                }
            }
        }

        if collector.full() {
            info!(urls = collector.urls.len(), "Site index complete before sitemaps");
            return collector.urls;
        }

        let mut queue: VecDeque<String> = VecDeque::new();
        if let Ok(robots_url) = base.join("/robots.txt") {
            if let Some(robots) = self.fetch_text(robots_url.as_str()).await {
                queue.extend(robots_sitemaps(&robots));
            }
        }
        queue.extend(
            CONVENTIONAL_SITEMAPS
                .iter()
                .filter_map(|path| base.join(path).ok())
                .map(|u| u.to_string()),
        );

        let mut visited = HashSet::new();
        while let Some(sitemap) = queue.pop_front() {
            if visited.len() >= self.max_sitemaps || collector.full() {
                break;
            }
            if !visited.insert(sitemap.clone()) {
                continue;
            }
            let Some(xml) = self.fetch_text(&sitemap).await else {
                continue;
            };
            match parse_sitemap(&xml) {
                Ok(doc) => {
                    for loc in &doc.locs {
                        let Ok(url) = Url::parse(loc) else { continue };
                        let in_scope = url.host_str().map(|h| host_allowed(h, &allowed)).unwrap_or(false);
                        if in_scope && looks_like_article_path(url.path()) {
                            collector.push(&url);
                        }
                    }
                    queue.extend(doc.children);
                }
                Err(e) => debug!(%sitemap, error = %e, "Unparseable sitemap"),
            }
        }

        info!(urls = collector.urls.len(), sitemaps = visited.len(), "Site index complete");
        collector.urls
    }
}

/// Entry point of the `build-worker` subcommand: index `url` and write the
/// result atomically to `output`.
pub async fn run_worker(
    url: &str,
    output: &Path,
    timeout: Duration,
    max_urls: usize,
    user_agent: &str,
) -> anyhow::Result<()> {
    let t0 = Instant::now();
    let fetcher = HttpFetcher::new(timeout, user_agent).context("failed to build HTTP client")?;
    let urls = SiteIndexer::new(Arc::new(fetcher))
        .with_limits(DEFAULT_MAX_SECTIONS, DEFAULT_MAX_SITEMAPS, max_urls.max(1))
        .index(url)
        .await;
    let report = WorkerReport {
        urls,
        elapsed_ms: t0.elapsed().as_millis() as u64,
    };
    write_report(output, &report)
        .await
        .with_context(|| format!("failed to write {}", output.display()))
}
