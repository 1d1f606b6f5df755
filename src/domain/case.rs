//! Case record types and the list/detail merge
//!
//! A case arrives in two halves: a `CaseSummary` from the paginated list
//! collaborator and a `CaseDetail` from the detail-page collaborator. The two
//! are combined by [`merge_case`], a pure function with a fixed field
//! precedence: list-page fields (score, favourite, company identity, thumb)
//! win over their detail-page equivalents, content fields come from the
//! detail fetch. Failed fetches become synthetic failure records so that no
//! attempted case is ever dropped from durable output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a list page, as returned by the list collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSummary {
    pub id: u64,
    pub url: Option<String>,
    pub title: Option<String>,
    pub score: Option<f64>,
    pub score_decimal: Option<String>,
    pub favourite: Option<u32>,
    pub company_name: Option<String>,
    pub company_logo: Option<String>,
    pub thumb: Option<String>,
}

impl CaseSummary {
    /// Minimal summary used by tests and callers that only have an id + url.
    pub fn new(id: u64, url: Option<String>, title: Option<String>) -> Self {
        Self {
            id,
            url,
            title,
            score: None,
            score_decimal: None,
            favourite: None,
            company_name: None,
            company_logo: None,
            thumb: None,
        }
    }
}

/// Structured fields extracted from a case detail page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseDetail {
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub main_image: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub video_url: Option<String>,
    pub author: Option<String>,
    pub publish_time: Option<String>,
    pub brand_name: Option<String>,
    pub brand_industry: Option<String>,
    pub activity_type: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub agency_name: Option<String>,
    // Fallbacks for fields the list page normally provides. Only consulted
    // when the summary is missing them.
    pub score: Option<f64>,
    pub score_decimal: Option<String>,
    pub favourite: Option<u32>,
    pub company_name: Option<String>,
    pub company_logo: Option<String>,
    pub thumb: Option<String>,
}

/// A processed case as it is persisted inside a batch file.
///
/// Either a merged (possibly validation-flagged) case or a synthetic failure
/// record carrying `error`. Field names match the on-disk batch format
/// consumed by the downstream import stage; `None` fields are omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    pub case_id: u64,

    // List-page precedence fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_decimal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favourite: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_logo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb: Option<String>,

    // Detail-page content fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand_industry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agency_name: Option<String>,

    // Failure / audit annotations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawl_time: Option<DateTime<Utc>>,
}

impl CaseRecord {
    fn empty(case_id: u64) -> Self {
        Self {
            case_id,
            score: None,
            score_decimal: None,
            favourite: None,
            company_name: None,
            company_logo: None,
            thumb: None,
            source_url: None,
            title: None,
            description: None,
            main_image: None,
            images: Vec::new(),
            video_url: None,
            author: None,
            publish_time: None,
            brand_name: None,
            brand_industry: None,
            activity_type: None,
            location: None,
            tags: Vec::new(),
            agency_name: None,
            url: None,
            error: None,
            validation_error: None,
            crawl_time: None,
        }
    }

    /// Synthetic failure record for a case whose fetch or parse failed.
    pub fn failure(
        case_id: u64,
        url: Option<String>,
        title: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        let mut record = Self::empty(case_id);
        record.url = url;
        record.title = title;
        record.error = Some(error.into());
        record.crawl_time = Some(Utc::now());
        record
    }

    /// Placeholder for an id that was attempted but never made it into a
    /// flushed batch, produced by reconciliation after the item loop ends.
    pub fn reconciliation_gap(case_id: u64) -> Self {
        let mut record = Self::failure(
            case_id,
            None,
            Some(format!("case {case_id}")),
            "attempted but not durably saved",
        );
        record.validation_error = Some("data lost".to_string());
        record
    }

    /// True when this record represents any kind of failure outcome.
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Merge a list summary with its detail fields into one record.
///
/// Pure function, no side effects. List-page fields take precedence over the
/// detail page's fallbacks for the same data; content fields always come
/// from the detail fetch.
pub fn merge_case(summary: &CaseSummary, detail: &CaseDetail) -> CaseRecord {
    let mut record = CaseRecord::empty(summary.id);

    record.score = summary.score.or(detail.score);
    record.score_decimal = summary
        .score_decimal
        .clone()
        .or_else(|| detail.score_decimal.clone());
    record.favourite = summary.favourite.or(detail.favourite);
    record.company_name = summary
        .company_name
        .clone()
        .or_else(|| detail.company_name.clone());
    record.company_logo = summary
        .company_logo
        .clone()
        .or_else(|| detail.company_logo.clone());
    record.thumb = summary.thumb.clone().or_else(|| detail.thumb.clone());

    record.source_url = detail.source_url.clone();
    record.title = detail.title.clone();
    record.description = detail.description.clone();
    record.main_image = detail.main_image.clone();
    record.images = detail.images.clone();
    record.video_url = detail.video_url.clone();
    record.author = detail.author.clone();
    record.publish_time = detail.publish_time.clone();
    record.brand_name = detail.brand_name.clone();
    record.brand_industry = detail.brand_industry.clone();
    record.activity_type = detail.activity_type.clone();
    record.location = detail.location.clone();
    record.tags = detail.tags.clone();
    record.agency_name = detail.agency_name.clone();

    record.crawl_time = Some(Utc::now());
    record
}
