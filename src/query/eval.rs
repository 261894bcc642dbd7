//! Query evaluation.
//!
//! Pure predicate application: given a validated [`QueryRequest`] and one
//! entry's `(message, timestamp)`, decide whether the entry matches. The
//! function is stateless and order-independent across entries, so the buffer
//! and the IRC `!query` path share it directly.

use crate::query::request::{KeywordOp, QueryRequest};

/// Test one entry against every present predicate in `request`.
///
/// Evaluation order, short-circuiting on the first miss: single keyword
/// substring, keyword list (AND: all, OR: any, empty list passes), regex
/// search, lower time bound, upper time bound. Both time bounds are
/// inclusive.
pub fn entry_matches(request: &QueryRequest, message: &str, timestamp: i64) -> bool {
    if let Some(keyword) = &request.keyword
        && !message.contains(keyword.as_str())
    {
        return false;
    }

    if !request.keywords.is_empty() {
        let hit = match request.operator {
            KeywordOp::And => request
                .keywords
                .iter()
                .all(|keyword| message.contains(keyword.as_str())),
            KeywordOp::Or => request
                .keywords
                .iter()
                .any(|keyword| message.contains(keyword.as_str())),
        };
        if !hit {
            return false;
        }
    }

    if let Some(regex) = &request.regex
        && !regex.is_match(message)
    {
        return false;
    }

    if let Some(from) = request.time_from
        && timestamp < from
    {
        return false;
    }
    if let Some(to) = request.time_to
        && timestamp > to
    {
        return false;
    }

    true
}
