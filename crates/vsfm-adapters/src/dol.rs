use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html};
use url::Url;
use vsfm_core::{filename_from_url, FileType, Scope};
use vsfm_storage::PageSource;

use crate::{
    element_text, has_extension, load_page, parse_base, selector, ScopeEnumeration,
    ScraperConfig, ScraperError, SourceScraper,
};

pub const DOL_ROOT: &str = "https://www.dol.gov/agencies/eta/foreign-labor/performance";

/// Every program scope the performance page is split into.
pub const DOL_PROGRAMS: [&str; 7] = [
    "PERM Program",
    "LCA Program",
    "Prevailing Wage Program",
    "H-2A Program",
    "H-2B Program",
    "CW-1 Program",
    "Uncategorized",
];

const UNCATEGORIZED: &str = "Uncategorized";

const FILE_EXTS: &[&str] = &[".pdf", ".xlsx", ".xls", ".csv", ".docx", ".doc", ".zip"];

const PROGRAM_KEYS: &[(&str, &str)] = &[
    ("perm", "PERM Program"),
    ("lca", "LCA Program"),
    ("h-1b", "LCA Program"),
    ("h1b", "LCA Program"),
    ("pw", "Prevailing Wage Program"),
    ("prevailing", "Prevailing Wage Program"),
    ("h-2a", "H-2A Program"),
    ("h2a", "H-2A Program"),
    ("h-2b", "H-2B Program"),
    ("h2b", "H-2B Program"),
    ("cw-1", "CW-1 Program"),
    ("cw1", "CW-1 Program"),
];

// Deprecated annual reports.
const SKIP_PATTERNS: &[&str] = &[
    "annual performance report",
    "fy 2016 report",
    "fy 2015 report",
    "fy 2014 report",
    "fy 2013 report",
    "fy 2012 report",
    "fy 2011 report",
    "fy 2010 report",
    "fy 2009 report",
    "fy 2007 report",
    "fy 2006 report",
];

static FISCAL_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)fy\s*(\d{2,4})").expect("static pattern"));
static ANY_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(19|20)\d{2}").expect("static pattern"));

/// Lowercase scheme and host, drop a trailing path slash.
pub fn normalize_url(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(mut url) => {
            let trimmed = url.path().trim_end_matches('/').to_string();
            url.set_path(&trimmed);
            url.to_string()
        }
        Err(_) => raw.trim().to_string(),
    }
}

pub fn dol_program_for(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    PROGRAM_KEYS
        .iter()
        .find(|(key, _)| lower.contains(key))
        .map(|(_, program)| *program)
}

pub fn extract_dol_year(filename: &str) -> String {
    if let Some(caps) = FISCAL_YEAR.captures(filename) {
        let token = &caps[1];
        return if token.len() == 2 {
            format!("20{token}")
        } else {
            token.to_string()
        };
    }
    ANY_YEAR
        .find(filename)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "unknown_year".to_string())
}

/// Record layouts are always kept; other annual reports are retired.
pub fn should_skip_file(filename: &str, context: &str) -> bool {
    let combined = format!("{filename} {context}").to_lowercase();
    if combined.contains("record layout") || combined.contains("record_layout") {
        return false;
    }
    if SKIP_PATTERNS.iter().any(|p| combined.contains(p)) {
        return true;
    }
    combined.contains("annual")
        && combined.contains("report")
        && filename.to_lowercase().ends_with(".pdf")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DolFile {
    pub program: &'static str,
    pub url: String,
    pub filename: String,
    pub year: String,
}

impl DolFile {
    fn period(&self) -> String {
        format!("{}/{}", self.program, self.year)
    }
}

/// Table rows first (their label names the program), then every other file
/// link with program taken from the filename, the enclosing block, or the
/// nearest preceding heading.
pub(crate) fn discover_files(html: &str, base: &Url) -> Result<Vec<DolFile>, ScraperError> {
    let document = Html::parse_document(html);
    let mut found: Vec<DolFile> = Vec::new();

    let rows = selector("table tr")?;
    let cells = selector("td")?;
    let anchors = selector("a[href]")?;
    for row in document.select(&rows) {
        let row_cells: Vec<ElementRef<'_>> = row.select(&cells).collect();
        if row_cells.len() < 2 {
            continue;
        }
        let label = element_text(&row_cells[0]);
        for cell in &row_cells[1..] {
            for anchor in cell.select(&anchors) {
                let Some((url, filename)) = resolve(base, &anchor) else {
                    continue;
                };
                if should_skip_file(&filename, &label) {
                    continue;
                }
                let program = dol_program_for(&label)
                    .or_else(|| dol_program_for(&filename))
                    .unwrap_or(UNCATEGORIZED);
                push_unique(&mut found, program, url, filename);
            }
        }
    }

    let walk = selector("h2, h3, h4, strong, b, a[href]")?;
    let mut heading_program: Option<&'static str> = None;
    for element in document.select(&walk) {
        if element.value().name() != "a" {
            let text = element_text(&element).to_lowercase();
            if !text.contains("annual") {
                if let Some(program) = dol_program_for(&text) {
                    heading_program = Some(program);
                }
            }
            continue;
        }

        let Some((url, filename)) = resolve(base, &element) else {
            continue;
        };
        if should_skip_file(&filename, "") {
            continue;
        }
        let program = dol_program_for(&filename)
            .or_else(|| enclosing_block_text(&element).and_then(|t| dol_program_for(&t)))
            .or(heading_program)
            .unwrap_or(UNCATEGORIZED);
        push_unique(&mut found, program, url, filename);
    }

    Ok(found)
}

fn resolve(base: &Url, anchor: &ElementRef<'_>) -> Option<(String, String)> {
    let href = anchor.value().attr("href")?;
    let url = normalize_url(base.join(href.trim()).ok()?.as_str());
    if !has_extension(&url, FILE_EXTS) {
        return None;
    }
    let filename = filename_from_url(&url)?;
    Some((url, filename))
}

fn enclosing_block_text(anchor: &ElementRef<'_>) -> Option<String> {
    anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| matches!(el.value().name(), "td" | "p" | "li" | "div"))
        .map(|el| element_text(&el))
}

fn push_unique(found: &mut Vec<DolFile>, program: &'static str, url: String, filename: String) {
    if found.iter().any(|f| f.url == url) {
        return;
    }
    let year = extract_dol_year(&filename);
    found.push(DolFile {
        program,
        url,
        filename,
        year,
    });
}

/// DOL OFLC performance data disclosure files.
#[derive(Debug, Clone)]
pub struct DolScraper {
    config: ScraperConfig,
}

impl DolScraper {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SourceScraper for DolScraper {
    fn source_id(&self) -> &str {
        &self.config.source_id
    }

    fn file_type(&self) -> FileType {
        FileType::Dol
    }

    async fn enumerate(&self, pages: &dyn PageSource) -> Result<Vec<ScopeEnumeration>, ScraperError> {
        let root_url = self.config.first_listing_or(DOL_ROOT);
        let html = load_page(pages, self.source_id(), root_url).await?;
        let files = discover_files(&html, &parse_base(root_url)?)?;

        // Every program gets a scope, even an empty one, so a program whose
        // files all vanished still has its records marked missing.
        let mut scopes: BTreeMap<&'static str, ScopeEnumeration> = DOL_PROGRAMS
            .iter()
            .map(|program| {
                let scope = Scope::new(self.source_id(), FileType::Dol, Some(program.to_string()));
                (*program, ScopeEnumeration::complete(scope))
            })
            .collect();

        for file in &files {
            if let Some(enumeration) = scopes.get_mut(file.program) {
                enumeration.push(&file.url, &file.period(), &file.filename);
            }
        }

        Ok(DOL_PROGRAMS
            .iter()
            .filter_map(|program| scopes.remove(program))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_normalised_for_dedup() {
        assert_eq!(
            normalize_url("HTTPS://WWW.DOL.GOV/sites/PERM_FY2024.xlsx/"),
            "https://www.dol.gov/sites/PERM_FY2024.xlsx"
        );
    }

    #[test]
    fn year_prefers_fiscal_token() {
        assert_eq!(extract_dol_year("PERM_Disclosure_Data_FY2024_Q4.xlsx"), "2024");
        assert_eq!(extract_dol_year("H-2A_Disclosure_Data_FY23.xlsx"), "2023");
        assert_eq!(extract_dol_year("LCA_2019_layout.pdf"), "2019");
        assert_eq!(extract_dol_year("layout.pdf"), "unknown_year");
    }

    #[test]
    fn deprecated_reports_are_skipped_unless_record_layouts() {
        assert!(should_skip_file("oflc_annual_report.pdf", ""));
        assert!(should_skip_file("x.pdf", "FY 2015 Report"));
        assert!(!should_skip_file("PERM_Record_Layout_annual_report.pdf", "record layout"));
        assert!(!should_skip_file("PERM_FY2024.xlsx", "PERM"));
    }

    #[test]
    fn discovery_groups_by_table_label_then_heading() {
        let base = Url::parse(DOL_ROOT).unwrap();
        let html = r#"
            <table>
              <tr><td>PERM</td><td><a href="/files/Disclosure_FY2024_Q4.xlsx">Q4</a></td></tr>
              <tr><td>only one cell</td></tr>
            </table>
            <h3>H-2B Program</h3>
            <p><a href="/files/Disclosure_FY2023.xlsx">FY2023 data</a></p>
            <p><a href="/files/Disclosure_FY2024_Q4.xlsx">dup</a></p>
            <p><a href="/files/oflc_annual_report_2016.pdf">old</a></p>
        "#;
        let files = discover_files(html, &base).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].program, "PERM Program");
        assert_eq!(files[0].period(), "PERM Program/2024");
        assert_eq!(files[1].program, "H-2B Program");
        assert_eq!(files[1].url, "https://www.dol.gov/files/Disclosure_FY2023.xlsx");
    }
}
