//! Source scrapers: per-source drivers that enumerate candidate files per scope.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use vsfm_core::{Candidate, Completeness, FileType, Scope};
use vsfm_storage::PageSource;

mod annual;
mod dol;
mod monthly;
mod uscis;
mod yearbook;

pub use annual::AnnualScraper;
pub use dol::{dol_program_for, extract_dol_year, normalize_url, should_skip_file, DolScraper, DOL_PROGRAMS, DOL_ROOT};
pub use monthly::{extract_period, MonthlyScraper};
pub use uscis::{make_uscis_period, uscis_program_for, UscisScraper, USCIS_HUBS};
pub use yearbook::{YearbookScraper, YEARBOOK_ROOT};

pub const CRATE_NAME: &str = "vsfm-adapters";

pub const VISA_STATISTICS_ROOT: &str =
    "https://travel.state.gov/content/travel/en/legal/visa-law0/visa-statistics.html";

#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("failed to load {url}: {message}")]
    Page { url: String, message: String },
    #[error("invalid selector: {0}")]
    Selector(String),
    #[error("{0}")]
    Message(String),
}

/// Where a scraper starts and which source id it reports under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScraperConfig {
    pub source_id: String,
    #[serde(default)]
    pub listing_urls: Vec<String>,
}

impl ScraperConfig {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            listing_urls: Vec::new(),
        }
    }

    pub fn with_listing_urls(mut self, urls: Vec<String>) -> Self {
        self.listing_urls = urls;
        self
    }

    fn first_listing_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.listing_urls
            .first()
            .map(String::as_str)
            .unwrap_or(default)
    }
}

/// Everything one scraper found for one scope.
///
/// `errors` collects sub-page failures and rejected candidates. A scope with
/// errors cannot back a complete pass.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeEnumeration {
    pub scope: Scope,
    pub candidates: Vec<Candidate>,
    pub completeness: Completeness,
    pub errors: Vec<String>,
}

impl ScopeEnumeration {
    pub fn complete(scope: Scope) -> Self {
        Self {
            scope,
            candidates: Vec::new(),
            completeness: Completeness::Complete,
            errors: Vec::new(),
        }
    }

    pub fn partial(scope: Scope) -> Self {
        Self {
            completeness: Completeness::Partial,
            ..Self::complete(scope)
        }
    }

    /// Validate and add a candidate. Repeated URLs are dropped.
    pub fn push(&mut self, url: &str, period: &str, filename: &str) {
        match Candidate::new(url, period, filename) {
            Ok(candidate) => {
                if !self.candidates.iter().any(|c| c.url() == candidate.url()) {
                    self.candidates.push(candidate);
                }
            }
            Err(err) => self.errors.push(err.to_string()),
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[async_trait]
pub trait SourceScraper: Send + Sync {
    fn source_id(&self) -> &str;
    fn file_type(&self) -> FileType;

    /// Walk the source's listing pages. An `Err` means nothing could be
    /// enumerated at all; sub-page trouble lands in `ScopeEnumeration::errors`.
    async fn enumerate(&self, pages: &dyn PageSource) -> Result<Vec<ScopeEnumeration>, ScraperError>;
}

pub fn scraper_for_file_type(file_type: FileType, config: ScraperConfig) -> Box<dyn SourceScraper> {
    match file_type {
        FileType::Monthly => Box::new(MonthlyScraper::new(config)),
        FileType::Annual => Box::new(AnnualScraper::new(config)),
        FileType::Dol => Box::new(DolScraper::new(config)),
        FileType::Yearbook => Box::new(YearbookScraper::new(config)),
        FileType::Uscis => Box::new(UscisScraper::new(config)),
    }
}

/// An anchor resolved against its page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLink {
    pub url: String,
    pub text: String,
    /// Text of the anchor's parent element.
    pub context: String,
}

pub(crate) async fn load_page(
    pages: &dyn PageSource,
    source_id: &str,
    url: &str,
) -> Result<String, ScraperError> {
    pages
        .page_text(source_id, url)
        .await
        .map_err(|err| ScraperError::Page {
            url: url.to_string(),
            message: format!("{err:#}"),
        })
}

pub(crate) fn parse_base(url: &str) -> Result<Url, ScraperError> {
    Url::parse(url).map_err(|e| ScraperError::Message(format!("invalid listing url {url:?}: {e}")))
}

pub(crate) fn selector(raw: &str) -> Result<Selector, ScraperError> {
    Selector::parse(raw).map_err(|e| ScraperError::Selector(e.to_string()))
}

pub(crate) fn element_text(element: &ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

/// All `a[href]` on a page, resolved to absolute URLs.
pub fn page_links(html: &str, base: &Url) -> Result<Vec<PageLink>, ScraperError> {
    let document = Html::parse_document(html);
    let anchors = selector("a[href]")?;
    let mut out = Vec::new();
    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(resolved) = base.join(href.trim()) else {
            continue;
        };
        let context = anchor
            .parent()
            .and_then(ElementRef::wrap)
            .map(|p| element_text(&p))
            .unwrap_or_default();
        out.push(PageLink {
            url: resolved.to_string(),
            text: element_text(&anchor),
            context,
        });
    }
    Ok(out)
}

pub(crate) fn find_anchor_by_text<'a>(links: &'a [PageLink], needle: &str) -> Option<&'a PageLink> {
    let needle = needle.to_lowercase();
    links
        .iter()
        .find(|link| link.text.to_lowercase().contains(&needle))
}

/// Case-insensitive extension test on the URL path, ignoring query strings.
pub fn has_extension(url: &str, extensions: &[&str]) -> bool {
    let path = Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    extensions.iter().any(|ext| path.ends_with(ext))
}

pub fn normalize_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whole-word, case-insensitive match where words are runs of alphanumerics
/// and underscores.
pub(crate) fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .any(|token| token.eq_ignore_ascii_case(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_links_resolve_relative_hrefs_with_context() {
        let base = Url::parse("https://travel.state.gov/content/visa/monthly.html").unwrap();
        let html = r#"<ul><li>October 2023 <a href="files/oct.pdf"> IV   Issuances </a></li></ul>"#;
        let links = page_links(html, &base).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://travel.state.gov/content/visa/files/oct.pdf");
        assert_eq!(links[0].text, "IV Issuances");
        assert_eq!(links[0].context, "October 2023 IV Issuances");
    }

    #[test]
    fn extension_checks_ignore_query_and_case() {
        assert!(has_extension("https://x.gov/a/B.XLSX?dl=1", &[".xlsx"]));
        assert!(!has_extension("https://x.gov/a/page.html", &[".pdf", ".xlsx"]));
    }

    #[test]
    fn enumeration_dedupes_urls_and_records_invalid_candidates() {
        let mut scope = ScopeEnumeration::complete(Scope::new("s", FileType::Annual, None));
        scope.push("https://x.gov/a.pdf", "2024", "");
        scope.push("https://x.gov/a.pdf", "2024", "");
        scope.push("https://x.gov/b.pdf", "", "");
        assert_eq!(scope.candidates.len(), 1);
        assert_eq!(scope.errors.len(), 1);
        assert!(!scope.is_clean());
    }

    #[test]
    fn words_match_on_boundaries_only() {
        assert!(contains_word("Sept. 2024 report", "sept"));
        assert!(!contains_word("september", "sept"));
        assert!(!contains_word("FY2024_oct", "oct"));
    }
}
