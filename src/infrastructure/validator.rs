//! Merged-record validation
//!
//! Schema checks applied after the merge: required non-empty id/title/url,
//! numeric ranges for scores, well-formed URLs for links and images, and
//! non-blank tags. A validation failure never drops the record; the caller
//! annotates it with `validation_error` and persists it anyway, preserving
//! auditability.

use url::Url;

use crate::domain::case::CaseRecord;

const MIN_TITLE_LEN: usize = 2;
const MAX_TITLE_LEN: usize = 500;

/// Stateless validator for merged case records.
#[derive(Debug, Default, Clone, Copy)]
pub struct CaseValidator;

impl CaseValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate one merged record. Returns the first violation found.
    pub fn validate(&self, record: &CaseRecord) -> Result<(), String> {
        if record.case_id == 0 {
            return Err("invalid case_id: 0".to_string());
        }

        let title = record.title.as_deref().unwrap_or("").trim();
        if title.is_empty() {
            return Err("missing required field: title".to_string());
        }
        if title.chars().count() < MIN_TITLE_LEN {
            return Err(format!("title too short: {title:?}"));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(format!("title too long: {} chars", title.chars().count()));
        }

        let source_url = record.source_url.as_deref().unwrap_or("").trim();
        if source_url.is_empty() {
            return Err("missing required field: source_url".to_string());
        }
        if !is_http_url(source_url) {
            return Err(format!("invalid url format: {source_url}"));
        }

        if let Some(score) = record.score {
            if !(0.0..=5.0).contains(&score) {
                return Err(format!("invalid score: {score}, expected 0.0-5.0"));
            }
        }

        if let Some(score_decimal) = record.score_decimal.as_deref() {
            match score_decimal.trim().parse::<f64>() {
                Ok(v) if (0.0..=10.0).contains(&v) => {}
                _ => return Err(format!("invalid score_decimal: {score_decimal}")),
            }
        }

        for image in &record.images {
            if !is_http_url(image) {
                return Err(format!("invalid image url: {image}"));
            }
        }

        for tag in &record.tags {
            if tag.trim().is_empty() {
                return Err("invalid tag: blank".to_string());
            }
        }

        Ok(())
    }
}

fn is_http_url(candidate: &str) -> bool {
    match Url::parse(candidate) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.has_host(),
        Err(_) => false,
    }
}
