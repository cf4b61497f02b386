//! Homepage scanning shared by the build pre-check and the sniffer.
//!
//! Two cheap looks at a homepage can save a full-site build:
//! 1. `<link type="application/rss+xml">` / atom tags point at feeds
//! 2. same-host anchors whose paths look like articles
//!
//! Only when both come up empty is the expensive build worth paying for.

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::utils::{host_allowed, normalize_url, resolve_url};

static LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("link[href]").expect("valid selector"));
static ANCHOR_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("valid selector"));

static ARTICLE_SECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/(news|article|articles|story|stories|post|posts|blog|local|politics|sports|business|obituaries|community|features)/[^/?#]+")
        .expect("valid regex")
});
static YEAR_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/(19|20)\d{2}/(\d{1,2}/)?").expect("valid regex"));
static NUMERIC_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"[/_-]\d{5,}(\.html?)?/?$").expect("valid regex"));
static LONG_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"/[a-z0-9]+(-[a-z0-9]+){3,}(\.html?)?/?$").expect("valid regex"));
static NON_ARTICLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/(tag|tags|category|categories|author|authors|page|search|login|subscribe|account|about|contact|privacy|terms|feed|rss|wp-admin|wp-login\.php)(/|$)")
        .expect("valid regex")
});
static ASSET_EXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(jpe?g|png|gif|svg|webp|pdf|mp3|mp4|css|js|xml|zip)$").expect("valid regex")
});

/// Feed URLs advertised by `<link type="application/rss+xml|atom+xml">` tags.
pub fn feed_links(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&LINK_SELECTOR)
        .filter(|el| {
            el.value()
                .attr("type")
                .map(|t| {
                    let t = t.to_ascii_lowercase();
                    t.contains("application/rss+xml") || t.contains("application/atom+xml")
                })
                .unwrap_or(false)
        })
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| resolve_url(base, href))
        .map(|u| normalize_url(&u))
        .unique()
        .collect()
}

/// Tag pages, account pages, feeds, and static assets.
pub fn is_utility_path(path: &str) -> bool {
    NON_ARTICLE.is_match(path) || ASSET_EXT.is_match(path)
}

/// Path heuristic for "article-like" URLs.
pub fn looks_like_article_path(path: &str) -> bool {
    if path.is_empty() || path == "/" || is_utility_path(path) {
        return false;
    }
    ARTICLE_SECTION.is_match(path)
        || YEAR_SEGMENT.is_match(path)
        || NUMERIC_ID.is_match(path)
        || LONG_SLUG.is_match(path)
}

/// Every in-scope anchor on the page, resolved, normalized, deduplicated,
/// in document order. The homepage itself is excluded.
pub fn same_host_links(html: &str, base: &Url, allowed_hosts: &[String]) -> Vec<Url> {
    let document = Html::parse_document(html);
    let home = normalize_url(base);
    document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| resolve_url(base, href))
        .filter(|u| u.host_str().map(|h| host_allowed(h, allowed_hosts)).unwrap_or(false))
        .filter(|u| u.path() != "/" && normalize_url(u) != home)
        .unique_by(normalize_url)
        .collect()
}

/// In-scope anchors whose paths look like articles.
pub fn article_links(html: &str, base: &Url, allowed_hosts: &[String]) -> Vec<Url> {
    same_host_links(html, base, allowed_hosts)
        .into_iter()
        .filter(|u| looks_like_article_path(u.path()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/").unwrap()
    }

    fn hosts() -> Vec<String> {
        vec!["example.com".to_string()]
    }

    #[test]
    fn test_feed_links_from_link_tags() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="/feed.xml">
            <link rel="alternate" type="application/atom+xml" href="https://example.com/atom">
            <link rel="stylesheet" type="text/css" href="/style.css">
            <link rel="alternate" type="APPLICATION/RSS+XML" href="/feed.xml">
        </head></html>"#;
        assert_eq!(
            feed_links(html, &base()),
            vec!["https://example.com/feed.xml", "https://example.com/atom"]
        );
    }

    #[test]
    fn test_no_feed_links() {
        assert!(feed_links("<html><body><a href='/x'>x</a></body></html>", &base()).is_empty());
    }

    #[test]
    fn test_article_path_heuristics() {
        assert!(looks_like_article_path("/news/city-council-votes"));
        assert!(looks_like_article_path("/2025/05/06/budget"));
        assert!(looks_like_article_path("/story/12345"));
        assert!(looks_like_article_path("/local-school-board-approves-new-budget"));
        assert!(looks_like_article_path("/item_9876543.html"));

        assert!(!looks_like_article_path("/"));
        assert!(!looks_like_article_path("/news"));
        assert!(!looks_like_article_path("/news/"));
        assert!(!looks_like_article_path("/tag/politics"));
        assert!(!looks_like_article_path("/about"));
        assert!(!looks_like_article_path("/2025/05/photo.jpg"));
    }

    #[test]
    fn test_article_links_same_host_only() {
        let html = r##"<html><body>
            <a href="/news/mayor-resigns">Mayor</a>
            <a href="https://www.example.com/2025/06/01/flood-warning#comments">Flood</a>
            <a href="https://other.org/news/not-ours">Other</a>
            <a href="/news/mayor-resigns">Duplicate</a>
            <a href="/contact">Contact</a>
            <a href="/">Home</a>
        </body></html>"##;
        let links: Vec<String> = article_links(html, &base(), &hosts())
            .iter()
            .map(|u| u.to_string())
            .collect();
        assert_eq!(
            links,
            vec![
                "https://example.com/news/mayor-resigns",
                "https://www.example.com/2025/06/01/flood-warning#comments",
            ]
        );
    }

    #[test]
    fn test_same_host_links_includes_sections() {
        let html = r#"<a href="/sports">Sports</a><a href="/news/a-b">A</a><a href="mailto:x@example.com">m</a>"#;
        let links = same_host_links(html, &base(), &hosts());
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].path(), "/sports");
    }
}
