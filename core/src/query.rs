//! List query parameters and their wire translation.
//!
//! `TodoQuery` doubles as the cache key for list results, so it is kept in
//! canonical form: trimmed strings, blank values collapsed to `None`, page
//! and page size at least 1. Two call sites that build "the same" query
//! therefore always hit the same cache entry.

use chrono::NaiveDate;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::types::{Todo, TodoStatus};

/// Characters left unescaped in query components (RFC 3986 unreserved).
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub const DEFAULT_PER_PAGE: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SortField {
    Title,
    CreatedAt,
    DueDate,
    Status,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::Title => "title",
            SortField::CreatedAt => "created_at",
            SortField::DueDate => "due_date",
            SortField::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sort {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Sort {
    /// `-field` for descending, `field` for ascending.
    pub fn to_param(&self) -> String {
        match self.direction {
            SortDirection::Asc => self.field.as_str().to_string(),
            SortDirection::Desc => format!("-{}", self.field.as_str()),
        }
    }
}

/// Filter, sort and pagination parameters for `GET /todos`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TodoQuery {
    pub page: u32,
    pub per_page: u32,
    /// Partial, case-insensitive match on the title.
    pub search: Option<String>,
    pub status: Option<TodoStatus>,
    pub category: Option<String>,
    pub sort: Option<Sort>,
    /// Inclusive due-date range; sent only when both bounds are set.
    pub due_from: Option<NaiveDate>,
    pub due_to: Option<NaiveDate>,
}

impl Default for TodoQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            search: None,
            status: None,
            category: None,
            sort: None,
            due_from: None,
            due_to: None,
        }
    }
}

impl TodoQuery {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page,
            per_page,
            ..Self::default()
        }
        .canonical()
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = non_blank(Some(search.into()));
        self
    }

    pub fn status(mut self, status: TodoStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = non_blank(Some(category.into()));
        self
    }

    pub fn sort_by(mut self, field: SortField, direction: SortDirection) -> Self {
        self.sort = Some(Sort { field, direction });
        self
    }

    pub fn due_between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.due_from = Some(from);
        self.due_to = Some(to);
        self
    }

    /// Normalized copy used as the cache key.
    pub fn canonical(&self) -> Self {
        // Half a due range is never sent, so it must not split the key either.
        let due_range = self.due_from.zip(self.due_to);
        Self {
            page: self.page.max(1),
            per_page: self.per_page.max(1),
            search: non_blank(self.search.clone()),
            status: self.status,
            category: non_blank(self.category.clone()),
            sort: self.sort,
            due_from: due_range.map(|(from, _)| from),
            due_to: due_range.map(|(_, to)| to),
        }
    }

    /// Key/value pairs in the server's `filter[...]` / `sort` convention.
    /// Unset values are omitted entirely.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let q = self.canonical();
        let mut pairs = Vec::new();
        if let Some(search) = q.search {
            pairs.push(("filter[title]".to_string(), search));
        }
        if let Some(status) = q.status {
            pairs.push(("filter[status]".to_string(), status.as_str().to_string()));
        }
        if let Some(category) = q.category {
            pairs.push(("filter[category]".to_string(), category));
        }
        if let (Some(from), Some(to)) = (q.due_from, q.due_to) {
            pairs.push(("filter[due_date_between]".to_string(), format!("{from},{to}")));
        }
        if let Some(sort) = q.sort {
            pairs.push(("sort".to_string(), sort.to_param()));
        }
        pairs.push(("page".to_string(), q.page.to_string()));
        pairs.push(("per_page".to_string(), q.per_page.to_string()));
        pairs
    }

    /// Whether `todo` would appear in this query's result set, ignoring
    /// pagination.
    pub fn matches(&self, todo: &Todo) -> bool {
        let q = self.canonical();
        if let Some(search) = &q.search {
            if !todo.title.to_lowercase().contains(&search.to_lowercase()) {
                return false;
            }
        }
        if q.status.is_some_and(|s| s != todo.status) {
            return false;
        }
        if q.category.as_ref().is_some_and(|c| c != &todo.category) {
            return false;
        }
        if let (Some(from), Some(to)) = (q.due_from, q.due_to) {
            match todo.due_date {
                Some(due) if due >= from && due <= to => {}
                _ => return false,
            }
        }
        true
    }
}

/// Encode pairs as `k=v&k=v`, percent-escaping both sides.
pub fn encode_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, QUERY_COMPONENT),
                utf8_percent_encode(v, QUERY_COMPONENT)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-escape a single path segment (e.g. a category name).
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, QUERY_COMPONENT).to_string()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
