//! Every CSS path the crawler relies on. The listings markup changes from time
//! to time; this file is the only place that should need an edit when it does.

use std::sync::LazyLock;

use scraper::Selector;

fn sel(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

pub static LISTING: LazyLock<Selector> =
    LazyLock::new(|| sel("#oe-list-container > div:nth-of-type(3) > div > ul > li"));
pub static LAST_PAGE: LazyLock<Selector> = LazyLock::new(|| {
    sel("#oe-list-container > div:nth-of-type(3) > div > nav > ul > li:nth-of-type(7) > a")
});

// ── Relative to one listing node ──

pub static JOB_TYPE: LazyLock<Selector> =
    LazyLock::new(|| sel("div > div:nth-of-type(1) > ul > li:nth-of-type(1) > span"));
pub static JOB_COUNTRY: LazyLock<Selector> =
    LazyLock::new(|| sel("div > div:nth-of-type(1) > ul > li:nth-of-type(2) > span"));
pub static UNIVERSITY: LazyLock<Selector> =
    LazyLock::new(|| sel("article > div > ul:nth-of-type(1) > li:nth-of-type(1) > a"));
pub static POSTED_ON: LazyLock<Selector> =
    LazyLock::new(|| sel("article > div > ul:nth-of-type(1) > li:nth-of-type(2)"));
pub static TITLE_LINK: LazyLock<Selector> = LazyLock::new(|| sel("h3 > a"));
pub static TITLE_TEXT: LazyLock<Selector> = LazyLock::new(|| sel("h3 > a > span"));
pub static DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| sel("div.ecl-content-block__description > p"));
pub static DEPARTMENT: LazyLock<Selector> =
    LazyLock::new(|| sel(r#"div[class*="id-Department"] div:nth-of-type(2)"#));
pub static WORK_LOCATION: LazyLock<Selector> =
    LazyLock::new(|| sel(r#"div[class*="id-Work-Locations"] div:nth-of-type(2)"#));
pub static RESEARCH_FIELD: LazyLock<Selector> =
    LazyLock::new(|| sel(r#"div[class*="id-Research-Field"]"#));
pub static RESEARCHER_PROFILE: LazyLock<Selector> =
    LazyLock::new(|| sel(r#"div[class*="id-Researcher-Profile"] a"#));
pub static FUNDING_PROGRAMME: LazyLock<Selector> =
    LazyLock::new(|| sel(r#"div[class*="id-Funding-Programme"] a"#));
pub static APPLICATION_DEADLINE: LazyLock<Selector> =
    LazyLock::new(|| sel(r#"div[class*="id-Application-Deadline"] time"#));
