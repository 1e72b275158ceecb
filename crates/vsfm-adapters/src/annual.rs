use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use vsfm_core::{FileType, Scope};
use vsfm_storage::PageSource;

use crate::{
    find_anchor_by_text, has_extension, load_page, page_links, parse_base, PageLink,
    ScopeEnumeration, ScraperConfig, ScraperError, SourceScraper, VISA_STATISTICS_ROOT,
};

const FILE_EXTS: &[&str] = &[".pdf", ".xlsx", ".xls"];

static REPORT_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Report of the Visa Office\s*(\d{4})").expect("static pattern")
});

/// `(year, page url)` for every "Report of the Visa Office <YEAR>" link, first
/// occurrence of each url only.
pub(crate) fn report_pages(links: &[PageLink]) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for link in links {
        let Some(caps) = REPORT_YEAR.captures(&link.text) else {
            continue;
        };
        if out.iter().any(|(_, url)| url == &link.url) {
            continue;
        }
        out.push((caps[1].to_string(), link.url.clone()));
    }
    out
}

/// Annual Report of the Visa Office tables.
#[derive(Debug, Clone)]
pub struct AnnualScraper {
    config: ScraperConfig,
}

impl AnnualScraper {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SourceScraper for AnnualScraper {
    fn source_id(&self) -> &str {
        &self.config.source_id
    }

    fn file_type(&self) -> FileType {
        FileType::Annual
    }

    async fn enumerate(&self, pages: &dyn PageSource) -> Result<Vec<ScopeEnumeration>, ScraperError> {
        let root_url = self.config.first_listing_or(VISA_STATISTICS_ROOT);
        let root_html = load_page(pages, self.source_id(), root_url).await?;
        let root_links = page_links(&root_html, &parse_base(root_url)?)?;

        let mut enumeration =
            ScopeEnumeration::complete(Scope::new(self.source_id(), FileType::Annual, None));

        // The year links live on the "Annual Reports" overview when the root has one.
        let overview_links = match find_anchor_by_text(&root_links, "annual reports") {
            Some(overview) => {
                let overview_url = overview.url.clone();
                let html = load_page(pages, self.source_id(), &overview_url).await?;
                page_links(&html, &parse_base(&overview_url)?)?
            }
            None => root_links,
        };

        let year_pages = report_pages(&overview_links);
        if year_pages.is_empty() {
            enumeration.record_error("no \"Report of the Visa Office\" pages found");
        }

        for (year, page_url) in year_pages {
            match load_page(pages, self.source_id(), &page_url).await {
                Ok(html) => {
                    let links = page_links(&html, &parse_base(&page_url)?)?;
                    for link in links.iter().filter(|l| has_extension(&l.url, FILE_EXTS)) {
                        enumeration.push(&link.url, &year, "");
                    }
                }
                Err(err) => enumeration.record_error(err.to_string()),
            }
        }

        Ok(vec![enumeration])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(url: &str, text: &str) -> PageLink {
        PageLink {
            url: url.to_string(),
            text: text.to_string(),
            context: String::new(),
        }
    }

    #[test]
    fn report_pages_pick_year_from_link_text() {
        let links = vec![
            link("https://x/2024.html", "Report of the Visa Office 2024"),
            link("https://x/2023.html", "report of the visa office2023"),
            link("https://x/2024.html", "Report of the Visa Office 2024"),
            link("https://x/other.html", "Visa Bulletin"),
        ];
        assert_eq!(
            report_pages(&links),
            vec![
                ("2024".to_string(), "https://x/2024.html".to_string()),
                ("2023".to_string(), "https://x/2023.html".to_string()),
            ]
        );
    }
}
