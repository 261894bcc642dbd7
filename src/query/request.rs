//! Query parameter parsing.
//!
//! The input grammar is a space-separated list of `key=value` tokens; the
//! `keywords` value uses `,` as an inner delimiter. Recognized keys are
//! `keyword`, `keywords`, `operator`, `regex`, `time_from` and `time_to`.
//! Parsing is strict: unknown keys, duplicate keys, empty components and
//! inconsistent combinations are all rejected, and a rejected request leaves
//! no partial state behind.

use regex::Regex;

use crate::utils::error::{Result, ServerError};

/// How multiple `keywords` combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeywordOp {
    /// Every keyword must appear in the message (default).
    #[default]
    And,
    /// At least one keyword must appear.
    Or,
}

impl KeywordOp {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "AND" => Some(KeywordOp::And),
            "OR" => Some(KeywordOp::Or),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            KeywordOp::And => "AND",
            KeywordOp::Or => "OR",
        }
    }
}

/// A validated query. Absent fields mean "no constraint".
#[derive(Debug, Default)]
pub struct QueryRequest {
    pub keyword: Option<String>,
    pub keywords: Vec<String>,
    pub operator: KeywordOp,
    /// Whether `operator=` appeared explicitly; kept so re-serialization is
    /// lossless.
    operator_explicit: bool,
    pub regex: Option<Regex>,
    pub time_from: Option<i64>,
    pub time_to: Option<i64>,
}

fn parse_error(reason: impl Into<String>) -> ServerError {
    ServerError::QueryParse(reason.into())
}

fn parse_time(key: &str, value: &str) -> Result<i64> {
    match value.parse::<i64>() {
        Ok(seconds) if seconds >= 0 => Ok(seconds),
        _ => Err(parse_error(format!(
            "Invalid {} value '{}' (expected non-negative seconds)",
            key, value
        ))),
    }
}

impl QueryRequest {
    /// Parse the argument portion of a `QUERY` line or `!query` command.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::QueryParse` with a single-line, user-visible
    /// reason. Callers prepend `ERROR: ` before sending it to a client.
    pub fn parse(args: &str) -> Result<Self> {
        let mut request = QueryRequest::default();

        for token in args.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                return Err(parse_error(format!(
                    "Invalid token '{}' (expected key=value)",
                    token
                )));
            };

            match key {
                "keyword" => {
                    if request.keyword.is_some() {
                        return Err(parse_error("Duplicate parameter: keyword"));
                    }
                    if value.is_empty() {
                        return Err(parse_error("Empty value for parameter: keyword"));
                    }
                    request.keyword = Some(value.to_string());
                }
                "keywords" => {
                    if !request.keywords.is_empty() {
                        return Err(parse_error("Duplicate parameter: keywords"));
                    }
                    if value.is_empty() {
                        return Err(parse_error("Empty value for parameter: keywords"));
                    }
                    for part in value.split(',') {
                        if part.is_empty() {
                            return Err(parse_error("Empty keyword in keywords list"));
                        }
                        request.keywords.push(part.to_string());
                    }
                }
                "operator" => {
                    if request.operator_explicit {
                        return Err(parse_error("Duplicate parameter: operator"));
                    }
                    request.operator = KeywordOp::parse(value).ok_or_else(|| {
                        parse_error(format!(
                            "Invalid operator '{}' (expected AND or OR)",
                            value
                        ))
                    })?;
                    request.operator_explicit = true;
                }
                "regex" => {
                    if request.regex.is_some() {
                        return Err(parse_error("Duplicate parameter: regex"));
                    }
                    let compiled = Regex::new(value).map_err(|err| {
                        // Flatten the compiler's multi-line report into the
                        // single-line protocol error.
                        let detail = err
                            .to_string()
                            .split_whitespace()
                            .collect::<Vec<_>>()
                            .join(" ");
                        parse_error(format!("Invalid regex: {}", detail))
                    })?;
                    request.regex = Some(compiled);
                }
                "time_from" => {
                    if request.time_from.is_some() {
                        return Err(parse_error("Duplicate parameter: time_from"));
                    }
                    request.time_from = Some(parse_time("time_from", value)?);
                }
                "time_to" => {
                    if request.time_to.is_some() {
                        return Err(parse_error("Duplicate parameter: time_to"));
                    }
                    request.time_to = Some(parse_time("time_to", value)?);
                }
                _ => return Err(parse_error(format!("Unknown parameter: {}", key))),
            }
        }

        request.validate()?;
        Ok(request)
    }

    fn validate(&self) -> Result<()> {
        if self.operator_explicit && self.keywords.is_empty() {
            return Err(parse_error("operator requires keywords"));
        }
        if let (Some(from), Some(to)) = (self.time_from, self.time_to)
            && from > to
        {
            return Err(parse_error("time_from must not exceed time_to"));
        }
        if self.keyword.is_none()
            && self.keywords.is_empty()
            && self.regex.is_none()
            && self.time_from.is_none()
            && self.time_to.is_none()
        {
            return Err(parse_error("No filter parameters given"));
        }
        Ok(())
    }

    /// Re-serialize into the canonical argument string.
    ///
    /// Re-parsing the result yields an equivalent request; the round trip is
    /// pinned by tests.
    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::new();
        if let Some(keyword) = &self.keyword {
            parts.push(format!("keyword={}", keyword));
        }
        if !self.keywords.is_empty() {
            parts.push(format!("keywords={}", self.keywords.join(",")));
        }
        if self.operator_explicit {
            parts.push(format!("operator={}", self.operator.as_str()));
        }
        if let Some(regex) = &self.regex {
            parts.push(format!("regex={}", regex.as_str()));
        }
        if let Some(from) = self.time_from {
            parts.push(format!("time_from={}", from));
        }
        if let Some(to) = self.time_to {
            parts.push(format!("time_to={}", to));
        }
        parts.join(" ")
    }
}

impl PartialEq for QueryRequest {
    fn eq(&self, other: &Self) -> bool {
        self.keyword == other.keyword
            && self.keywords == other.keywords
            && self.operator == other.operator
            && self.operator_explicit == other.operator_explicit
            && self.regex.as_ref().map(Regex::as_str) == other.regex.as_ref().map(Regex::as_str)
            && self.time_from == other.time_from
            && self.time_to == other.time_to
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(args: &str) -> String {
        QueryRequest::parse(args).unwrap_err().to_string()
    }

    #[test]
    fn test_single_keyword() {
        let request = QueryRequest::parse("keyword=error").unwrap();
        assert_eq!(request.keyword.as_deref(), Some("error"));
        assert!(request.keywords.is_empty());
        assert_eq!(request.operator, KeywordOp::And);
    }

    #[test]
    fn test_keywords_with_operator() {
        let request = QueryRequest::parse("keywords=disk,error operator=OR").unwrap();
        assert_eq!(request.keywords, vec!["disk", "error"]);
        assert_eq!(request.operator, KeywordOp::Or);
    }

    #[test]
    fn test_operator_case_insensitive() {
        let request = QueryRequest::parse("keywords=a operator=or").unwrap();
        assert_eq!(request.operator, KeywordOp::Or);
        let request = QueryRequest::parse("keywords=a operator=And").unwrap();
        assert_eq!(request.operator, KeywordOp::And);
    }

    #[test]
    fn test_operator_without_keywords_rejected() {
        assert_eq!(reason("operator=OR"), "operator requires keywords");
        // keyword= alone does not satisfy the keywords requirement.
        assert_eq!(
            reason("keyword=x operator=OR"),
            "operator requires keywords"
        );
    }

    #[test]
    fn test_time_window() {
        let request = QueryRequest::parse("time_from=100 time_to=200").unwrap();
        assert_eq!(request.time_from, Some(100));
        assert_eq!(request.time_to, Some(200));
    }

    #[test]
    fn test_inverted_time_window_rejected() {
        assert_eq!(
            reason("time_from=200 time_to=100"),
            "time_from must not exceed time_to"
        );
    }

    #[test]
    fn test_equal_time_bounds_accepted() {
        assert!(QueryRequest::parse("time_from=100 time_to=100").is_ok());
    }

    #[test]
    fn test_invalid_times_rejected() {
        assert!(reason("time_from=abc").starts_with("Invalid time_from"));
        assert!(reason("time_to=-5").starts_with("Invalid time_to"));
    }

    #[test]
    fn test_empty_keyword_component_rejected() {
        assert_eq!(reason("keywords=a,,b"), "Empty keyword in keywords list");
        assert_eq!(reason("keywords=,"), "Empty keyword in keywords list");
    }

    #[test]
    fn test_duplicates_rejected() {
        assert_eq!(reason("keyword=a keyword=b"), "Duplicate parameter: keyword");
        assert_eq!(
            reason("keywords=a keywords=b"),
            "Duplicate parameter: keywords"
        );
        assert_eq!(
            reason("keywords=a operator=OR operator=AND"),
            "Duplicate parameter: operator"
        );
    }

    #[test]
    fn test_unknown_and_malformed_tokens_rejected() {
        assert_eq!(reason("level=error"), "Unknown parameter: level");
        assert!(reason("justaword keyword=x").starts_with("Invalid token"));
    }

    #[test]
    fn test_no_filters_rejected() {
        assert_eq!(reason(""), "No filter parameters given");
        assert_eq!(reason("   "), "No filter parameters given");
    }

    #[test]
    fn test_bad_regex_rejected() {
        assert!(reason("regex=[unclosed").starts_with("Invalid regex:"));
    }

    #[test]
    fn test_round_trip() {
        let inputs = [
            "keyword=error",
            "keywords=disk,error operator=OR",
            "keywords=a,b",
            "regex=^login time_from=10 time_to=20",
            "keyword=x keywords=y,z operator=AND regex=ab+ time_from=0 time_to=99",
        ];
        for input in inputs {
            let parsed = QueryRequest::parse(input).unwrap();
            let reparsed = QueryRequest::parse(&parsed.to_query_string()).unwrap();
            assert_eq!(parsed, reparsed, "round trip failed for '{}'", input);
        }
    }
}
