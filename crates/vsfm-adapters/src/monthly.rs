use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use vsfm_core::{FileType, Scope};
use vsfm_storage::PageSource;

use crate::{
    contains_word, find_anchor_by_text, has_extension, load_page, normalize_whitespace, page_links,
    parse_base, ScopeEnumeration, ScraperConfig, ScraperError, SourceScraper, VISA_STATISTICS_ROOT,
};

const LANDINGS: [(&str, &str); 2] = [
    ("IV", "Monthly Immigrant Visa (IV) Issuances"),
    ("NIV", "Monthly Nonimmigrant Visa (NIV) Issuances"),
];

const FILE_EXTS: &[&str] = &[".pdf", ".xlsx", ".xls", ".csv"];

// Full names first so "may" and friends win over abbreviations.
const MONTHS: &[(&str, u32)] = &[
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("sept", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

static FISCAL_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bFY\s*(20\d{2})\b").expect("static pattern"));
static BARE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(20\d{2})\b").expect("static pattern"));

/// `FY<year>-<MM>`, `FY<year>`, or `misc`, inferred from link text and href.
pub fn extract_period(text: &str, href: &str) -> String {
    let text = normalize_whitespace(text);
    let haystack = format!("{text} {href}");

    let month = MONTHS
        .iter()
        .find(|(name, _)| contains_word(&text, name) || contains_word(href, name))
        .map(|(_, month)| *month);

    let year = FISCAL_YEAR
        .captures(&haystack)
        .or_else(|| BARE_YEAR.captures(&haystack))
        .map(|caps| caps[1].to_string());

    match (year, month) {
        (Some(year), Some(month)) => format!("FY{year}-{month:02}"),
        (Some(year), None) => format!("FY{year}"),
        _ => "misc".to_string(),
    }
}

/// Monthly IV/NIV issuance tables from travel.state.gov.
#[derive(Debug, Clone)]
pub struct MonthlyScraper {
    config: ScraperConfig,
}

impl MonthlyScraper {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SourceScraper for MonthlyScraper {
    fn source_id(&self) -> &str {
        &self.config.source_id
    }

    fn file_type(&self) -> FileType {
        FileType::Monthly
    }

    async fn enumerate(&self, pages: &dyn PageSource) -> Result<Vec<ScopeEnumeration>, ScraperError> {
        let root_url = self.config.first_listing_or(VISA_STATISTICS_ROOT);
        let root_html = load_page(pages, self.source_id(), root_url).await?;
        let root_links = page_links(&root_html, &parse_base(root_url)?)?;

        let mut scopes = Vec::with_capacity(LANDINGS.len());
        for (program, key_text) in LANDINGS {
            let scope = Scope::new(self.source_id(), FileType::Monthly, Some(program.to_string()));
            let mut enumeration = ScopeEnumeration::complete(scope);

            let Some(landing) = find_anchor_by_text(&root_links, key_text) else {
                enumeration.record_error(format!("no {key_text:?} link on {root_url}"));
                scopes.push(enumeration);
                continue;
            };
            let landing_url = landing.url.clone();

            match load_page(pages, self.source_id(), &landing_url).await {
                Ok(html) => {
                    let links = page_links(&html, &parse_base(&landing_url)?)?;
                    for link in links.iter().filter(|l| has_extension(&l.url, FILE_EXTS)) {
                        let text = if link.text.is_empty() { &link.url } else { &link.text };
                        let period = extract_period(text, &link.url);
                        enumeration.push(&link.url, &period, "");
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
    fn period_combines_fiscal_year_and_month() {
        assert_eq!(
            extract_period("FY 2024 October - IV Issuances by Post", "https://x/oct.pdf"),
            "FY2024-10"
        );
        assert_eq!(extract_period("Sept 2023 NIV Issuances", "https://x/a.pdf"), "FY2023-09");
    }

    #[test]
    fn period_degrades_to_year_then_misc() {
        assert_eq!(extract_period("Issuances 2022 summary", "https://x/a.xlsx"), "FY2022");
        assert_eq!(extract_period("Methodology notes", "https://x/notes.pdf"), "misc");
    }

    #[test]
    fn month_can_come_from_the_href() {
        assert_eq!(
            extract_period("FY2021 IV", "https://x/files/IV-issuances-march.pdf"),
            "FY2021-03"
        );
    }
}
