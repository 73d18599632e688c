use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::record::VacancyRecord;
use crate::selectors;

/// Everything the crawler needs from one listings page.
pub struct ListingPage {
    pub records: Vec<VacancyRecord>,
    /// Page count advertised by the pagination widget, when present.
    pub last_page: Option<usize>,
}

/// Parse a whole listings page. The document is dropped before returning.
pub fn parse_listing_page(html: &str, page_url: &Url) -> ListingPage {
    let document = Html::parse_document(html);

    let records = document
        .select(&selectors::LISTING)
        .map(|node| extract(node, page_url))
        .collect();

    let last_page = document
        .select(&selectors::LAST_PAGE)
        .next()
        .and_then(|a| text_of(a).parse::<usize>().ok());

    ListingPage { records, last_page }
}

/// Pull one vacancy out of a listing node. Missing parts come back empty.
pub fn extract(node: ElementRef<'_>, page_url: &Url) -> VacancyRecord {
    let job_link = node
        .select(&selectors::TITLE_LINK)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(|href| resolve_url(page_url, href))
        .unwrap_or_default();

    VacancyRecord {
        job_type: first_text(node, &selectors::JOB_TYPE),
        job_country: first_text(node, &selectors::JOB_COUNTRY),
        university: first_text(node, &selectors::UNIVERSITY),
        posted_on: node
            .select(&selectors::POSTED_ON)
            .next()
            .map(own_text)
            .unwrap_or_default(),
        job_title: first_text(node, &selectors::TITLE_TEXT),
        job_link,
        job_description: first_text(node, &selectors::DESCRIPTION),
        department: first_text(node, &selectors::DEPARTMENT),
        job_location: first_text(node, &selectors::WORK_LOCATION),
        job_field: first_text(node, &selectors::RESEARCH_FIELD),
        job_profile: first_text(node, &selectors::RESEARCHER_PROFILE),
        funding_program: first_text(node, &selectors::FUNDING_PROGRAMME),
        application_deadline: first_text(node, &selectors::APPLICATION_DEADLINE),
        origin_page: page_url.to_string(),
    }
}

/// Absolute form of `href`, or `href` itself if it cannot be joined.
pub fn resolve_url(base: &Url, href: &str) -> String {
    match base.join(href.trim()) {
        Ok(u) => u.to_string(),
        Err(e) => {
            debug!("Cannot resolve '{}' against {}: {}", href, base, e);
            href.trim().to_string()
        }
    }
}

fn first_text(node: ElementRef<'_>, selector: &Selector) -> String {
    node.select(selector).next().map(text_of).unwrap_or_default()
}

/// All descendant text, whitespace-normalised.
fn text_of(el: ElementRef<'_>) -> String {
    normalize(el.text())
}

/// Only the element's direct text nodes.
fn own_text(el: ElementRef<'_>) -> String {
    normalize(
        el.children()
            .filter_map(|child| child.value().as_text())
            .map(|t| &**t),
    )
}

fn normalize<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> ListingPage {
        let html = std::fs::read_to_string("tests/fixtures/listing_page.html").unwrap();
        let url = Url::parse(
            "https://euraxess.ec.europa.eu/jobs/search?sort%5Bname%5D=created&sort%5Bdirection%5D=DESC&page=0",
        )
        .unwrap();
        parse_listing_page(&html, &url)
    }

    #[test]
    fn full_listing() {
        let page = fixture();
        assert_eq!(page.records.len(), 3);

        let r = &page.records[0];
        assert_eq!(r.job_type, "Job offer");
        assert_eq!(r.job_country, "Germany");
        assert_eq!(r.university, "Technical University of Munich");
        assert_eq!(r.posted_on, "Posted on: 24 January 2024");
        assert_eq!(r.job_title, "PhD position in Quantum Optics");
        assert_eq!(r.job_link, "https://euraxess.ec.europa.eu/jobs/198765");
        assert!(r.job_description.starts_with("The group of Prof. Example, in Munich, offers"));
        assert_eq!(r.department, "Faculty of Physics");
        assert_eq!(r.job_location, "Number of offers: 1, Germany, Munich");
        assert_eq!(r.job_field, "Research Field Physics » Optics");
        assert_eq!(r.job_profile, "First Stage Researcher (R1)");
        assert_eq!(r.funding_program, "Horizon Europe - MSCA");
        assert_eq!(r.application_deadline, "30 Apr 2024 - 23:59 (Europe/Brussels)");
        assert!(r.origin_page.ends_with("page=0"));
    }

    #[test]
    fn sparse_listing_keeps_what_it_has() {
        let page = fixture();
        let r = &page.records[1];
        assert_eq!(r.job_type, "Hosting");
        assert_eq!(r.job_link, "https://euraxess.ec.europa.eu/jobs/hosting/187001");
        assert_eq!(r.department, "");
        assert_eq!(r.application_deadline, "");
        assert_eq!(r.funding_program, "");
    }

    #[test]
    fn listing_without_link() {
        let page = fixture();
        let r = &page.records[2];
        assert_eq!(r.job_title, "Research Engineer");
        assert_eq!(r.job_link, "");
        assert_eq!(r.job_type, "");
        assert_eq!(r.posted_on, "Posted on: sometime soon");
    }

    #[test]
    fn pagination_last_page() {
        assert_eq!(fixture().last_page, Some(42));
    }

    #[test]
    fn page_without_listings() {
        let url = Url::parse("https://euraxess.ec.europa.eu/jobs/search?page=9").unwrap();
        let page = parse_listing_page("<html><body><p>No results</p></body></html>", &url);
        assert!(page.records.is_empty());
        assert_eq!(page.last_page, None);
    }

    #[test]
    fn resolves_relative_links() {
        let base = Url::parse("https://euraxess.ec.europa.eu/jobs/search?page=3").unwrap();
        assert_eq!(resolve_url(&base, "/jobs/1"), "https://euraxess.ec.europa.eu/jobs/1");
        assert_eq!(
            resolve_url(&base, "https://other.example/jobs/2"),
            "https://other.example/jobs/2"
        );
    }
}
