use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use url::Url;
use vsfm_core::{FileType, Scope};
use vsfm_storage::PageSource;

use crate::{
    has_extension, load_page, page_links, parse_base, PageLink, ScopeEnumeration, ScraperConfig,
    ScraperError, SourceScraper,
};

pub const YEARBOOK_ROOT: &str = "https://ohss.dhs.gov/topics/immigration/yearbook";

const FILE_EXTS: &[&str] = &[".pdf", ".xlsx", ".xls", ".zip"];

static YEARBOOK_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/yearbook/(\d{4})(?:-\d{4})?/?$").expect("static pattern")
});
static YEARBOOK_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Yearbook\s+(\d{4})(?:\s+to\s+\d{4})?").expect("static pattern")
});

/// Year pages, newest first. A `/yearbook/<YYYY>` path beats a
/// "Yearbook <YYYY>" link text for the same year.
pub(crate) fn yearbook_pages(links: &[PageLink]) -> Vec<(String, String)> {
    let mut by_year: BTreeMap<String, String> = BTreeMap::new();
    for link in links {
        let path = Url::parse(&link.url)
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        if let Some(caps) = YEARBOOK_PATH.captures(&path) {
            by_year.insert(caps[1].to_string(), link.url.clone());
            continue;
        }
        if let Some(caps) = YEARBOOK_TEXT.captures(&link.text) {
            by_year
                .entry(caps[1].to_string())
                .or_insert_with(|| link.url.clone());
        }
    }
    by_year.into_iter().rev().collect()
}

/// DHS Yearbook of Immigration Statistics.
#[derive(Debug, Clone)]
pub struct YearbookScraper {
    config: ScraperConfig,
}

impl YearbookScraper {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SourceScraper for YearbookScraper {
    fn source_id(&self) -> &str {
        &self.config.source_id
    }

    fn file_type(&self) -> FileType {
        FileType::Yearbook
    }

    async fn enumerate(&self, pages: &dyn PageSource) -> Result<Vec<ScopeEnumeration>, ScraperError> {
        let root_url = self.config.first_listing_or(YEARBOOK_ROOT);
        let root_html = load_page(pages, self.source_id(), root_url).await?;
        let root_links = page_links(&root_html, &parse_base(root_url)?)?;

        let mut enumeration =
            ScopeEnumeration::complete(Scope::new(self.source_id(), FileType::Yearbook, None));

        let years = yearbook_pages(&root_links);
        if years.is_empty() {
            enumeration.record_error(format!("no yearbook pages linked from {root_url}"));
        }

        for (year, page_url) in years {
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
    fn year_pages_prefer_paths_and_sort_newest_first() {
        let links = vec![
            link("https://ohss.dhs.gov/archive/yb-2021", "Yearbook 2021"),
            link("https://ohss.dhs.gov/topics/immigration/yearbook/2022", "2022"),
            link("https://ohss.dhs.gov/legacy/2022", "Yearbook 2022"),
            link("https://ohss.dhs.gov/topics/immigration/yearbook/2019-2020", "2019 to 2020"),
        ];
        let pages = yearbook_pages(&links);
        assert_eq!(
            pages,
            vec![
                (
                    "2022".to_string(),
                    "https://ohss.dhs.gov/topics/immigration/yearbook/2022".to_string()
                ),
                ("2021".to_string(), "https://ohss.dhs.gov/archive/yb-2021".to_string()),
                (
                    "2019".to_string(),
                    "https://ohss.dhs.gov/topics/immigration/yearbook/2019-2020".to_string()
                ),
            ]
        );
    }
}
