//! Link extraction for the `parse` stage
//!
//! Collects followable links from an HTML page:
//! - `<a href="...">` anywhere in the document (except `download` links)
//! - `<link rel="canonical" href="...">`
//!
//! Links are resolved against the page URL, canonicalized and deduplicated
//! in document order. `javascript:`, `mailto:`, `tel:`, `data:` and
//! fragment-only links are dropped.

use crate::cache::canonicalize_url;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// What the `parse` stage keeps from a page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLinks {
    /// The page title (from <title> tag)
    pub title: Option<String>,

    /// Canonical absolute URLs, first occurrence order
    pub links: Vec<String>,
}

impl PageLinks {
    /// Keeps only links on the same host as `base`
    pub fn retain_same_host(&mut self, base: &Url) {
        let host = base.host_str().map(str::to_ascii_lowercase);
        self.links.retain(|link| {
            Url::parse(link)
                .ok()
                .map(|u| u.host_str().map(str::to_ascii_lowercase) == host)
                .unwrap_or(false)
        });
    }
}

/// Parses HTML content and extracts the title and links
pub fn extract_page_links(html: &str, base_url: &Url) -> PageLinks {
    let document = Html::parse_document(html);

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for href in hrefs(&document) {
        if let Some(link) = resolve_link(&href, base_url) {
            if seen.insert(link.clone()) {
                links.push(link);
            }
        }
    }

    PageLinks {
        title: extract_title(&document),
        links,
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn hrefs(document: &Html) -> Vec<String> {
    let mut hrefs = Vec::new();

    if let Ok(selector) = Selector::parse("a[href]") {
        hrefs.extend(
            document
                .select(&selector)
                .filter(|element| element.value().attr("download").is_none())
                .filter_map(|element| element.value().attr("href"))
                .map(str::to_string),
        );
    }

    if let Ok(selector) = Selector::parse("link[rel='canonical'][href]") {
        hrefs.extend(
            document
                .select(&selector)
                .filter_map(|element| element.value().attr("href"))
                .map(str::to_string),
        );
    }

    hrefs
}

/// Resolves an href to a canonical absolute http(s) URL
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    canonicalize_url(absolute.as_str()).ok().map(String::from)
}
