//! Full Text Search (FTS) utilities for safe query handling.
//!
//! Turns free-text user input into an FTS5 `MATCH` expression. Supports
//! multi-keyword search, phrase matching, wildcards, column-specific
//! searches, and date range filtering on the archive's creation time.

use chrono::NaiveDate;

/// Result of parsing a user search query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    /// The FTS5 query string for MATCH clause.
    pub fts_query: String,
    /// Filter: archives created on this date or later.
    pub date_after: Option<NaiveDate>,
    /// Filter: archives created before this date.
    pub date_before: Option<NaiveDate>,
}

impl ParsedQuery {
    /// Returns true if there's no FTS query and no date filters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fts_query.is_empty() && !self.has_date_filters()
    }

    /// Returns true if there's an FTS query to execute.
    #[must_use]
    pub fn has_fts_query(&self) -> bool {
        !self.fts_query.is_empty()
    }

    /// Returns true if there are date filters.
    #[must_use]
    pub fn has_date_filters(&self) -> bool {
        self.date_after.is_some() || self.date_before.is_some()
    }
}

/// Column prefix mappings from user-facing names to FTS5 column names.
const COLUMN_MAPPINGS: &[(&str, &str)] = &[
    ("title:", "title:"),
    ("text:", "content:"),
    ("content:", "content:"),
];

/// Parse a user search query into FTS5 syntax with date filters.
///
/// # Supported syntax
///
/// - Multiple keywords: `rust web` finds both words (implicit AND)
/// - Quoted phrases: `"exact phrase"`
/// - OR operator: `rust OR python`
/// - Exclusion: `-beginner` or `NOT beginner` (needs a positive term before it)
/// - Wildcards: `rust*` prefix match
/// - Column search: `title:rust`, `text:rust`
/// - Date filters: `after:2024-01-01`, `before:2024-06` or `after:2024`
///
/// # Examples
///
/// ```
/// use url_archiver::db::parse_fts_query;
///
/// let result = parse_fts_query("rust web");
/// assert!(result.fts_query.contains("rust"));
/// assert!(result.fts_query.contains("web"));
///
/// let result = parse_fts_query("after:2024-01-01 rust");
/// assert!(result.date_after.is_some());
/// ```
#[must_use]
pub fn parse_fts_query(query: &str) -> ParsedQuery {
    let tokens = tokenize(query.trim());
    if tokens.is_empty() {
        return ParsedQuery::default();
    }

    let mut result = ParsedQuery::default();
    let mut fts_parts: Vec<String> = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        i += 1;

        if let Some(date_str) = token.strip_prefix("after:") {
            if let Some(date) = parse_date(date_str) {
                result.date_after = Some(date);
            }
            continue;
        }

        if let Some(date_str) = token.strip_prefix("before:") {
            if let Some(date) = parse_date(date_str) {
                result.date_before = Some(date);
            }
            continue;
        }

        if token.eq_ignore_ascii_case("OR") {
            let has_left = fts_parts.last().is_some_and(|p| p != "OR");
            if has_left && i < tokens.len() {
                fts_parts.push("OR".to_string());
            }
            continue;
        }

        // FTS5 NOT is binary; a leading exclusion has nothing to subtract from.
        let excluded = if token.eq_ignore_ascii_case("NOT") {
            let next = tokens.get(i);
            i += 1;
            next.map(String::as_str)
        } else {
            token.strip_prefix('-').filter(|rest| !rest.is_empty())
        };
        if token.eq_ignore_ascii_case("NOT") || excluded.is_some() {
            let has_left = fts_parts.last().is_some_and(|p| p != "OR");
            if let (true, Some(term)) = (has_left, excluded) {
                fts_parts.push(format!("NOT {}", process_term(term)));
            }
            continue;
        }

        let mut column_term = None;
        for (user_prefix, fts_prefix) in COLUMN_MAPPINGS {
            if let Some(rest) = token.strip_prefix(user_prefix) {
                column_term = Some(if rest.is_empty() {
                    None
                } else {
                    Some(format!("{fts_prefix}{}", process_term(rest)))
                });
                break;
            }
        }

        match column_term {
            Some(Some(term)) => fts_parts.push(term),
            Some(None) => {}
            None => fts_parts.push(process_term(token)),
        }
    }

    if fts_parts.last().is_some_and(|p| p == "OR") {
        fts_parts.pop();
    }

    result.fts_query = fts_parts.join(" ");
    result
}

/// Split the input on whitespace, keeping quoted phrases together.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in input.chars() {
        match ch {
            '"' if in_quotes => {
                current.push('"');
                tokens.push(std::mem::take(&mut current));
                in_quotes = false;
            }
            '"' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                current.push('"');
                in_quotes = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if !current.is_empty() {
        if in_quotes {
            // Unclosed quote - close it
            current.push('"');
        }
        tokens.push(current);
    }

    tokens.retain(|t| t != "\"\"");
    tokens
}

/// Process a single term for FTS5.
///
/// - Quoted phrases are passed through (with internal quotes escaped).
/// - Simple alphanumeric prefixes ending in `*` are left unquoted.
/// - Everything else is quoted.
fn process_term(term: &str) -> String {
    if term.len() > 1 && term.starts_with('"') && term.ends_with('"') {
        let inner = &term[1..term.len() - 1];
        return format!("\"{}\"", inner.replace('"', "\"\""));
    }

    if let Some(prefix) = term.strip_suffix('*') {
        if !prefix.is_empty() && prefix.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return term.to_string();
        }
    }

    format!("\"{}\"", term.replace('"', "\"\""))
}

/// Parse a date string in various formats.
fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(&format!("{s}-01-01"), "%Y-%m-%d"))
        .ok()
}
