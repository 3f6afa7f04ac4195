//! List-view engine: status filter, name search and pagination over the
//! in-memory lead collection, plus the URL query state that drives it.
//!
//! Everything here is pure. The same collection and [`ListQuery`] always
//! derive the same [`ListView`].
use serde::Serialize;

use crate::{
    error::ValidationError,
    lead::{Lead, LeadStatus},
};

pub const PAGE_SIZE: usize = 10;

/// Navigation state carried in the `page`, `status` and `search` query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub page:   usize,
    pub status: Option<LeadStatus>,
    pub search: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self { page: 1, status: None, search: None }
    }
}

impl ListQuery {
    /// Parses a raw (undecoded) query string such as `page=2&status=pending&search=ana`.
    ///
    /// `page` is lenient: anything that is not a positive integer means page 1.
    /// `status` accepts `all` or an empty value as "no filter" and rejects unknown values.
    /// Unrelated parameters are ignored; the last occurrence of a key wins.
    pub fn from_query_str(raw: &str) -> Result<Self, ValidationError> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(raw)
            .map_err(|e| ValidationError::MalformedQuery(e.to_string()))?;

        let mut page   = None;
        let mut status = None;
        let mut search = None;
        for (key, value) in pairs {
            match key.as_str() {
                "page"   => page = Some(value),
                "status" => status = Some(value),
                "search" => search = Some(value),
                _        => {}
            }
        }

        let page = page
            .and_then(|page| page.trim().parse::<usize>().ok())
            .unwrap_or(1);
        let status = parse_status_filter(status.as_deref().unwrap_or_default())?;

        Ok(ListQuery { status, ..ListQuery::default() }
            .with_search(search.as_deref().unwrap_or_default())
            .with_page(page))
    }

    /// Canonical query string with defaults omitted; empty for the default view.
    pub fn to_query_string(&self) -> String {
        let mut pairs: Vec<String> = Vec::with_capacity(3);

        if self.page > 1 {
            pairs.push(format!("page={}", self.page));
        }
        if let Some(status) = self.status {
            pairs.push(format!("status={status}"));
        }
        if let Some(search) = &self.search {
            pairs.push(format!("search={}", urlencoding::encode(search)));
        }

        pairs.join("&")
    }

    pub fn with_page(&self, page: usize) -> Self {
        Self { page: page.max(1), ..self.clone() }
    }

    /// Changing the filter starts over from the first page.
    pub fn with_status(&self, status: Option<LeadStatus>) -> Self {
        Self { page: 1, status, search: self.search.clone() }
    }

    pub fn with_search(&self, search: &str) -> Self {
        Self { page: 1, status: self.status, search: normalize_search(search) }
    }

    pub fn without_search(&self) -> Self {
        Self { page: 1, status: self.status, search: None }
    }
}

fn parse_status_filter(value: &str) -> Result<Option<LeadStatus>, ValidationError> {
    match value.trim() {
        "" | "all" => Ok(None),
        other      => other.parse().map(Some),
    }
}

fn normalize_search(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// One derived page of the collection.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListView<'a> {
    pub items:       Vec<&'a Lead>,
    pub total_items: usize,
    pub total_pages: usize,
    /// Effective page after clamping.
    pub page:        usize,
    pub start_index: usize,
    pub end_index:   usize,
}

impl ListView<'_> {
    pub fn summary(&self) -> String {
        if self.total_items == 0 {
            return "No results".to_string();
        }
        format!(
            "Showing {} to {} of {} results",
            self.start_index + 1,
            self.end_index,
            self.total_items
        )
    }
}

/// Derives the visible page. Status filter applies first, then the
/// case-insensitive name search; fetch order is kept.
///
/// A page past the end is clamped to the last page. An empty result is
/// page 1 of 0 with no items.
pub fn derive_view<'a>(collection: &'a [Lead], query: &ListQuery) -> ListView<'a> {
    let needle = query.search.as_deref().map(str::to_lowercase);

    let filtered: Vec<&Lead> = collection
        .iter()
        .filter(|lead| query.status.map_or(true, |status| lead.status == status))
        .filter(|lead| needle.as_deref().map_or(true, |needle| lead.name_contains(needle)))
        .collect();

    let total_items = filtered.len();
    let total_pages = total_items.div_ceil(PAGE_SIZE);
    let page        = query.page.clamp(1, total_pages.max(1));
    let start_index = ((page - 1) * PAGE_SIZE).min(total_items);
    let end_index   = (start_index + PAGE_SIZE).min(total_items);

    ListView {
        items: filtered[start_index..end_index].to_vec(),
        total_items,
        total_pages,
        page,
        start_index,
        end_index,
    }
}
