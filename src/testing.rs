//! Synthetic listings pages and an in-memory page source for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;

use crate::fetch::{FetchError, PageSource};

/// Minimal markup the listing selectors understand: (job_link, posted_on) per item.
pub fn listing_html(items: &[(&str, &str)]) -> String {
    render(items, "")
}

/// Same as `listing_html`, plus a pagination widget advertising `last_page` pages.
pub fn paginated_listing_html(items: &[(&str, &str)], last_page: usize) -> String {
    let mut nav = String::from("<nav><ul>");
    for label in ["First", "Prev", "1", "2", "3", "..."] {
        nav.push_str(&format!("<li><a>{label}</a></li>"));
    }
    nav.push_str(&format!("<li><a>{last_page}</a></li><li><a>Next</a></li></ul></nav>"));
    render(items, &nav)
}

fn render(items: &[(&str, &str)], nav: &str) -> String {
    let mut lis = String::new();
    for (link, posted) in items {
        lis.push_str(&format!(
            r#"<li><article><div>
                 <div><ul><li><span>Job offer</span></li><li><span>France</span></li></ul></div>
                 <ul><li><a href="/org/1">Some University</a></li><li>{posted}</li></ul>
                 <h3><a href="{link}"><span>Position {link}</span></a></h3>
               </div></article></li>"#
        ));
    }
    format!(
        r#"<html><body><div id="oe-list-container"><div></div><div></div>
           <div><div><ul>{lis}</ul>{nav}</div></div></div></body></html>"#
    )
}

/// Serves pre-baked HTML keyed by the `page` query parameter and records what was asked for.
pub struct StaticSource {
    pages: HashMap<usize, String>,
    failing: Option<usize>,
    requested: Mutex<Vec<usize>>,
}

impl StaticSource {
    pub fn new(pages: Vec<String>) -> Self {
        Self {
            pages: pages.into_iter().enumerate().collect(),
            failing: None,
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Every fetch of `page` fails with a 503.
    pub fn failing_at(mut self, page: usize) -> Self {
        self.failing = Some(page);
        self
    }

    pub fn requested(&self) -> Vec<usize> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for StaticSource {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        let page = url
            .query_pairs()
            .find(|(k, _)| k == "page")
            .and_then(|(_, v)| v.parse::<usize>().ok())
            .unwrap_or(0);
        self.requested.lock().unwrap().push(page);
        if self.failing == Some(page) {
            return Err(FetchError::Status {
                status: 503,
                url: url.to_string(),
            });
        }
        Ok(self
            .pages
            .get(&page)
            .cloned()
            .unwrap_or_else(|| listing_html(&[])))
    }
}
