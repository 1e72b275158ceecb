use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use vsfm_core::{filename_from_url, FileType, Scope};
use vsfm_storage::PageSource;

use crate::{
    has_extension, load_page, page_links, parse_base, ScopeEnumeration, ScraperConfig,
    ScraperError, SourceScraper,
};

/// Employer data hub pages, one per program.
pub const USCIS_HUBS: [(&str, &str); 3] = [
    ("h1b", "https://www.uscis.gov/archive/h-1b-employer-data-hub-files"),
    ("h2a", "https://www.uscis.gov/archive/h-2a-employer-data-hub-files"),
    ("h2b", "https://www.uscis.gov/archive/h-2b-employer-data-hub-files"),
];

const FILE_EXTS: &[&str] = &[".csv", ".xls", ".xlsx", ".zip"];

static FISCAL_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)FY\s*(\d{2,4})").expect("static pattern"));
static BARE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(20\d{2})\b").expect("static pattern"));

pub fn uscis_program_for(url: &str) -> Option<&'static str> {
    let lower = url.to_ascii_lowercase();
    [("h1b", ["h-1b", "h1b"]), ("h2a", ["h-2a", "h2a"]), ("h2b", ["h-2b", "h2b"])]
        .into_iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(program, _)| program)
}

/// `<program>/<year>` or `<program>/misc`. Two-digit fiscal years are 20xx.
pub fn make_uscis_period(program: &str, filename: &str) -> String {
    let year = FISCAL_YEAR
        .captures(filename)
        .map(|caps| {
            let token = &caps[1];
            if token.len() == 2 {
                format!("20{token}")
            } else {
                token.to_string()
            }
        })
        .or_else(|| BARE_YEAR.captures(filename).map(|caps| caps[1].to_string()));

    match year {
        Some(year) => format!("{program}/{year}"),
        None => format!("{program}/misc"),
    }
}

/// USCIS H-1B/H-2A/H-2B employer data hub exports.
#[derive(Debug, Clone)]
pub struct UscisScraper {
    config: ScraperConfig,
}

impl UscisScraper {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }

    fn hubs(&self) -> Result<Vec<(&'static str, String)>, ScraperError> {
        if self.config.listing_urls.is_empty() {
            return Ok(USCIS_HUBS
                .iter()
                .map(|(program, url)| (*program, url.to_string()))
                .collect());
        }
        self.config
            .listing_urls
            .iter()
            .map(|url| {
                uscis_program_for(url)
                    .map(|program| (program, url.clone()))
                    .ok_or_else(|| {
                        ScraperError::Message(format!("cannot tell the USCIS program of {url}"))
                    })
            })
            .collect()
    }
}

#[async_trait]
impl SourceScraper for UscisScraper {
    fn source_id(&self) -> &str {
        &self.config.source_id
    }

    fn file_type(&self) -> FileType {
        FileType::Uscis
    }

    async fn enumerate(&self, pages: &dyn PageSource) -> Result<Vec<ScopeEnumeration>, ScraperError> {
        let mut scopes = Vec::new();
        for (program, hub_url) in self.hubs()? {
            let scope = Scope::new(self.source_id(), FileType::Uscis, Some(program.to_string()));
            let mut enumeration = ScopeEnumeration::complete(scope);

            match load_page(pages, self.source_id(), &hub_url).await {
                Ok(html) => {
                    let links = page_links(&html, &parse_base(&hub_url)?)?;
                    for link in links.iter().filter(|l| has_extension(&l.url, FILE_EXTS)) {
                        let filename = filename_from_url(&link.url).unwrap_or_default();
                        let period = make_uscis_period(program, &filename);
                        enumeration.push(&link.url, &period, &filename);
                    }
                }
                Err(err) => enumeration.record_error(err.to_string()),
            }
            scopes.push(enumeration);
        }
        Ok(scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_uses_fiscal_year_then_calendar_year() {
        assert_eq!(make_uscis_period("h1b", "h1b_datahubexport-FY24.csv"), "h1b/2024");
        assert_eq!(make_uscis_period("h2a", "h-2a-employer-2019.xlsx"), "h2a/2019");
        assert_eq!(make_uscis_period("h2b", "readme.csv"), "h2b/misc");
    }

    #[test]
    fn program_is_inferred_from_hub_url() {
        assert_eq!(
            uscis_program_for("https://www.uscis.gov/archive/h-2b-employer-data-hub-files"),
            Some("h2b")
        );
        assert_eq!(uscis_program_for("https://www.uscis.gov/other"), None);
    }
}
