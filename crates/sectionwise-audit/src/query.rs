//! Sorting, filtering and pagination of audit entries.

use serde::{Deserialize, Serialize};

use crate::{AuditEntry, AuditError, Category, Severity};

/// Page size used when the caller gives none.
pub const DEFAULT_LIMIT: usize = 50;

/// Largest accepted page size.
pub const MAX_LIMIT: usize = 100;

/// Parameters of an audit log query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    /// 1-based page number.
    pub page: Option<usize>,
    /// Entries per page.
    pub limit: Option<usize>,
    /// Keep only this severity.
    pub severity: Option<Severity>,
    /// Keep only this category.
    pub category: Option<Category>,
}

impl AuditQuery {
    /// Builds a query from loosely typed parameters, where `"all"` or an
    /// empty string means no filter.
    pub fn from_params(
        page: Option<usize>,
        limit: Option<usize>,
        severity: Option<&str>,
        category: Option<&str>,
    ) -> Result<Self, AuditError> {
        Ok(Self {
            page,
            limit,
            severity: wanted(severity).map(str::parse::<Severity>).transpose()?,
            category: wanted(category).map(str::parse::<Category>).transpose()?,
        })
    }

    /// Returns the effective page, at least 1.
    #[must_use]
    pub fn effective_page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    /// Returns the effective limit, within `1..=MAX_LIMIT`.
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        match self.limit {
            None | Some(0) => DEFAULT_LIMIT,
            Some(limit) => limit.min(MAX_LIMIT),
        }
    }

    fn matches(&self, entry: &AuditEntry) -> bool {
        self.severity.map_or(true, |s| entry.severity == s)
            && self.category.map_or(true, |c| entry.category == c)
    }
}

fn wanted(value: Option<&str>) -> Option<&str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

/// Pagination block of an [`AuditPage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Current page.
    pub page: usize,
    /// Page size.
    pub limit: usize,
    /// Entries matching the filters.
    pub total: usize,
    /// Number of pages.
    pub total_pages: usize,
}

/// Entry counts per severity, over the unfiltered log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeveritySummary {
    /// Info entries.
    pub info: usize,
    /// Warning entries.
    pub warning: usize,
    /// Critical entries.
    pub critical: usize,
}

impl SeveritySummary {
    fn count(entries: &[AuditEntry]) -> Self {
        entries
            .iter()
            .fold(Self::default(), |mut summary, entry| {
                match entry.severity {
                    Severity::Info => summary.info += 1,
                    Severity::Warning => summary.warning += 1,
                    Severity::Critical => summary.critical += 1,
                }
                summary
            })
    }
}

/// One page of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPage {
    /// Entries on this page, newest first.
    pub entries: Vec<AuditEntry>,
    /// Pagination details.
    pub pagination: Pagination,
    /// Severity counts before filtering.
    pub summary: SeveritySummary,
}

/// Sorts newest first, filters, and cuts out the requested page.
#[must_use]
pub fn apply_query(mut entries: Vec<AuditEntry>, query: &AuditQuery) -> AuditPage {
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let summary = SeveritySummary::count(&entries);

    let filtered: Vec<AuditEntry> = entries.into_iter().filter(|e| query.matches(e)).collect();

    let page = query.effective_page();
    let limit = query.effective_limit();
    let total = filtered.len();
    let entries = filtered
        .into_iter()
        .skip((page - 1).saturating_mul(limit))
        .take(limit)
        .collect();

    AuditPage {
        entries,
        pagination: Pagination {
            page,
            limit,
            total,
            total_pages: total.div_ceil(limit),
        },
        summary,
    }
}
