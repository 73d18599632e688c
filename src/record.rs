use std::sync::LazyLock;

use regex::Regex;

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Raw snapshot columns, in the order they are written.
pub const RAW_COLUMNS: &[&str] = &[
    "job_type",
    "job_country",
    "university",
    "posted_on",
    "job_title",
    "job_link",
    "job_description",
    "department",
    "job_location",
    "job_field",
    "job_profile",
    "funding_program",
    "application_deadline",
    "origin_page",
];

/// One listing as scraped. Fields the page did not carry are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VacancyRecord {
    pub job_type: String,
    pub job_country: String,
    pub university: String,
    pub posted_on: String,
    pub job_title: String,
    pub job_link: String,
    pub job_description: String,
    pub department: String,
    pub job_location: String,
    pub job_field: String,
    pub job_profile: String,
    pub funding_program: String,
    pub application_deadline: String,
    pub origin_page: String,
}

impl VacancyRecord {
    /// Values in `RAW_COLUMNS` order.
    pub fn values(&self) -> [&str; 14] {
        [
            self.job_type.as_str(),
            self.job_country.as_str(),
            self.university.as_str(),
            self.posted_on.as_str(),
            self.job_title.as_str(),
            self.job_link.as_str(),
            self.job_description.as_str(),
            self.department.as_str(),
            self.job_location.as_str(),
            self.job_field.as_str(),
            self.job_profile.as_str(),
            self.funding_program.as_str(),
            self.application_deadline.as_str(),
            self.origin_page.as_str(),
        ]
    }
}

/// Make a scraped value safe for a single CSV cell: line breaks become spaces,
/// double quotes and commas are dropped, runs of whitespace collapse.
pub fn clean_text(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| *c != '"' && *c != ',')
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    WHITESPACE_RE.replace_all(&stripped, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_strips_csv_breakers() {
        assert_eq!(
            clean_text("  Berlin,\n Germany \"Mitte\"\r\n"),
            "Berlin Germany Mitte"
        );
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn values_follow_column_order() {
        let r = VacancyRecord {
            job_link: "https://example.org/jobs/1".into(),
            origin_page: "https://example.org/jobs/search?page=0".into(),
            ..Default::default()
        };
        let values = r.values();
        assert_eq!(values.len(), RAW_COLUMNS.len());
        let link_idx = RAW_COLUMNS.iter().position(|c| *c == "job_link").unwrap();
        assert_eq!(values[link_idx], "https://example.org/jobs/1");
        assert_eq!(values[13], "https://example.org/jobs/search?page=0");
    }
}
