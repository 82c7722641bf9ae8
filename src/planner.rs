//! Query cost analysis.
//!
//! Queries dominated by stop/common terms hit enormous posting lists, so the
//! planner classifies each query by its common-term ratio and caps the row
//! budget accordingly. Abusive queries are rejected before touching the
//! index.

use serde::Serialize;

use crate::filter;

/// Callers may ask for more, but no plan ever exceeds this many rows.
pub const MAX_REQUESTED_ROWS: usize = 100;

const HIGH_COST_CAP: usize = 50;
const MEDIUM_COST_CAP: usize = 200;
const REJECT_RATIO: f64 = 0.80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CostBucket {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    OnlyStopWords,
    TooCommon,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::OnlyStopWords => "only stop words",
            RejectReason::TooCommon => "too common",
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// The stop-word-stripped query text handed to the store.
    pub processed: String,
    pub cost_bucket: CostBucket,
    /// Rows the store is allowed to return for this query.
    pub row_cap: usize,
}

pub struct QueryPlanner;

impl QueryPlanner {
    /// Classify `raw` and produce the row budget for a caller asking for
    /// `requested_max` rows (silently clamped to [`MAX_REQUESTED_ROWS`]).
    pub fn plan(raw: &str, requested_max: usize) -> Result<QueryPlan, RejectReason> {
        let requested = requested_max.min(MAX_REQUESTED_ROWS);

        let processed = filter::filter_query(raw);
        if processed.is_empty() {
            return Err(RejectReason::OnlyStopWords);
        }

        let tokens: Vec<&str> = processed.split_whitespace().collect();
        let common = tokens
            .iter()
            .filter(|token| filter::is_common_term(token))
            .count();
        let ratio = common as f64 / tokens.len() as f64;

        if ratio > REJECT_RATIO {
            return Err(RejectReason::TooCommon);
        }

        let (cost_bucket, row_cap) = if ratio == 0.0 {
            (CostBucket::Low, requested)
        } else if ratio < 0.5 {
            (CostBucket::Medium, requested.min(MEDIUM_COST_CAP))
        } else {
            (CostBucket::High, requested.min(HIGH_COST_CAP))
        };

        Ok(QueryPlan {
            processed,
            cost_bucket,
            row_cap,
        })
    }
}
