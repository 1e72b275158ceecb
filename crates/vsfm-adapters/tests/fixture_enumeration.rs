use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use vsfm_adapters::{
    scraper_for_file_type, ScopeEnumeration, ScraperConfig, DOL_PROGRAMS, DOL_ROOT, USCIS_HUBS,
    VISA_STATISTICS_ROOT, YEARBOOK_ROOT,
};
use vsfm_core::{Completeness, FileType};
use vsfm_storage::PageSource;

/// Serves listing pages from `fixtures/`; unknown URLs fail like a 404.
struct FixturePages {
    pages: HashMap<String, PathBuf>,
}

impl FixturePages {
    fn new() -> Self {
        let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures");
        let visa = "https://travel.state.gov/content/visa-statistics";
        let mut pages = HashMap::new();
        let mut add = |url: String, file: &str| {
            pages.insert(url, root.join(file));
        };
        add(VISA_STATISTICS_ROOT.to_string(), "visastats/root.html");
        add(format!("{visa}/monthly-iv.html"), "visastats/monthly-iv.html");
        add(format!("{visa}/monthly-niv.html"), "visastats/monthly-niv.html");
        add(format!("{visa}/annual-reports.html"), "visastats/annual-reports.html");
        add(
            format!("{visa}/annual-reports/report-of-the-visa-office-2024.html"),
            "visastats/report-of-the-visa-office-2024.html",
        );
        add(DOL_ROOT.to_string(), "dolstats/performance.html");
        add(YEARBOOK_ROOT.to_string(), "dhsyearbook/yearbook.html");
        add(
            "https://ohss.dhs.gov/topics/immigration/yearbook/2022".to_string(),
            "dhsyearbook/yearbook-2022.html",
        );
        for (program, url) in USCIS_HUBS {
            add(url.to_string(), &format!("uscis/{program}.html"));
        }
        Self { pages }
    }
}

#[async_trait]
impl PageSource for FixturePages {
    async fn page_text(&self, _source_id: &str, url: &str) -> anyhow::Result<String> {
        let path = self
            .pages
            .get(url)
            .ok_or_else(|| anyhow::anyhow!("http status 404 for {url}"))?;
        Ok(std::fs::read_to_string(path)?)
    }
}

async fn enumerate(file_type: FileType, source_id: &str) -> Vec<ScopeEnumeration> {
    scraper_for_file_type(file_type, ScraperConfig::new(source_id))
        .enumerate(&FixturePages::new())
        .await
        .expect("enumeration succeeds")
}

fn periods(enumeration: &ScopeEnumeration) -> Vec<&str> {
    enumeration.candidates.iter().map(|c| c.period()).collect()
}

#[tokio::test]
async fn monthly_fixture_yields_iv_and_niv_scopes() {
    let scopes = enumerate(FileType::Monthly, "visastats").await;
    assert_eq!(scopes.len(), 2);

    let iv = &scopes[0];
    assert_eq!(iv.scope.key(), "visastats/monthly/IV");
    assert!(iv.is_clean());
    assert_eq!(iv.completeness, Completeness::Complete);
    assert_eq!(periods(iv), vec!["FY2024-10", "FY2024-10", "FY2024-11", "misc"]);
    assert_eq!(
        iv.candidates[0].filename(),
        "FY2024-October-IV-Issuances-by-FSC.pdf"
    );

    let niv = &scopes[1];
    assert_eq!(niv.scope.key(), "visastats/monthly/NIV");
    assert_eq!(periods(niv), vec!["FY2023-09", "FY2023"]);
}

#[tokio::test]
async fn annual_fixture_records_missing_year_page_as_error() {
    let scopes = enumerate(FileType::Annual, "visastats").await;
    assert_eq!(scopes.len(), 1);
    let annual = &scopes[0];
    assert_eq!(annual.scope.key(), "visastats/annual/-");
    assert_eq!(periods(annual), vec!["2024", "2024"]);
    assert_eq!(annual.errors.len(), 1);
    assert!(annual.errors[0].contains("report-of-the-visa-office-2023"));
}

#[tokio::test]
async fn dol_fixture_groups_files_into_every_program_scope() {
    let scopes = enumerate(FileType::Dol, "dolstats").await;
    assert_eq!(scopes.len(), DOL_PROGRAMS.len());

    let perm = &scopes[0];
    assert_eq!(perm.scope.program.as_deref(), Some("PERM Program"));
    assert_eq!(periods(perm), vec!["PERM Program/2024", "PERM Program/2024"]);

    let lca = &scopes[1];
    assert_eq!(periods(lca), vec!["LCA Program/2024"]);

    let h2a = scopes
        .iter()
        .find(|s| s.scope.program.as_deref() == Some("H-2A Program"))
        .expect("h-2a scope");
    assert_eq!(
        periods(h2a),
        vec!["H-2A Program/2023", "H-2A Program/unknown_year"]
    );

    let all_urls: Vec<&str> = scopes
        .iter()
        .flat_map(|s| s.candidates.iter().map(|c| c.url()))
        .collect();
    assert!(!all_urls.iter().any(|u| u.contains("Annual_Report")));
    assert!(scopes.iter().all(|s| s.is_clean()));
}

#[tokio::test]
async fn yearbook_fixture_dedupes_files_and_flags_unreachable_year() {
    let scopes = enumerate(FileType::Yearbook, "dhsyearbook").await;
    let yearbook = &scopes[0];
    assert_eq!(periods(yearbook), vec!["2022", "2022"]);
    assert_eq!(yearbook.errors.len(), 1);
}

#[tokio::test]
async fn uscis_fixture_yields_one_scope_per_hub() {
    let scopes = enumerate(FileType::Uscis, "uscis").await;
    let keys: Vec<String> = scopes.iter().map(|s| s.scope.key()).collect();
    assert_eq!(keys, vec!["uscis/uscis/h1b", "uscis/uscis/h2a", "uscis/uscis/h2b"]);
    assert_eq!(periods(&scopes[0]), vec!["h1b/2024", "h1b/2023", "h1b/misc"]);
    assert_eq!(periods(&scopes[1]), vec!["h2a/2022"]);
    assert!(scopes[2].candidates.is_empty());
    assert!(scopes[2].is_clean());
}

#[tokio::test]
async fn unreachable_root_fails_the_whole_source() {
    let config = ScraperConfig::new("visastats")
        .with_listing_urls(vec!["https://travel.state.gov/gone.html".to_string()]);
    let result = scraper_for_file_type(FileType::Monthly, config)
        .enumerate(&FixturePages::new())
        .await;
    assert!(result.is_err());
}
