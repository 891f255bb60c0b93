//! Maps raw source failures onto [`ErrorKind`].
//!
//! Classification is pattern based: the PostgREST error `code` wins when it is
//! present, then message text, then the HTTP status.

use std::collections::BTreeSet;

use crate::error::{ErrorKind, ErrorPayload, SourceError};
use crate::models::Table;

#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    known_tables: BTreeSet<String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(Table::ALL.iter().map(|t| t.name()))
    }
}

impl ErrorClassifier {
    pub fn new<I, S>(known_tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_tables: known_tables.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn classify(&self, err: &SourceError) -> ErrorKind {
        match err {
            SourceError::Timeout(_) | SourceError::Transport(_) => ErrorKind::Connection,
            SourceError::InvalidQuery(_) => ErrorKind::Validation,
            SourceError::Decode(_) => ErrorKind::Unknown,
            SourceError::Status { status, payload } => self.classify_status(*status, payload),
        }
    }

    fn classify_status(&self, status: u16, payload: &ErrorPayload) -> ErrorKind {
        let code = payload.code.as_deref().unwrap_or("");
        let text = payload.haystack();

        if let Some(relation) = missing_relation(code, &text) {
            return if self.is_known_relation(&relation) {
                ErrorKind::MissingTable
            } else {
                ErrorKind::NotFound
            };
        }

        // Auth wording only counts on auth statuses; a 5xx mentioning a JWT
        // is still a server fault.
        let auth_status = matches!(status, 401 | 403) || code.starts_with("PGRST3");
        if status == 401
            || matches!(code, "PGRST301" | "PGRST302" | "PGRST303")
            || (auth_status && (text.contains("jwt") || text.contains("invalid api key")))
        {
            return ErrorKind::Authentication;
        }
        if status == 403 || code == "42501" || text.contains("permission denied") {
            return ErrorKind::Permission;
        }
        if status == 429 {
            return ErrorKind::RateLimit;
        }
        if status == 404 || code == "PGRST116" {
            return ErrorKind::NotFound;
        }
        if code.starts_with("23") || code.starts_with("22") || code.starts_with("PGRST1") {
            return ErrorKind::Validation;
        }
        match status {
            408 => ErrorKind::Connection,
            400 | 409 | 422 => ErrorKind::Validation,
            500..=599 => ErrorKind::Server,
            _ => ErrorKind::Unknown,
        }
    }

    fn is_known_relation(&self, relation: &str) -> bool {
        let relation = relation.strip_prefix("public.").unwrap_or(relation);
        self.known_tables.contains(relation)
    }
}

/// Extracts the relation name from a "relation does not exist" style error.
/// Returns an empty name when the payload says a table is missing without
/// naming it.
fn missing_relation(code: &str, text: &str) -> Option<String> {
    let mentions_missing = code == "42P01"
        || code == "PGRST205"
        || (text.contains("relation") && text.contains("does not exist"))
        || text.contains("could not find the table");
    if !mentions_missing {
        return None;
    }
    Some(first_quoted(text).unwrap_or_default())
}

fn first_quoted(text: &str) -> Option<String> {
    for quote in ['"', '\''] {
        let mut parts = text.splitn(3, quote);
        parts.next();
        if let (Some(name), Some(_)) = (parts.next(), parts.next()) {
            return Some(name.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn status(status: u16, code: Option<&str>, message: &str) -> SourceError {
        SourceError::Status {
            status,
            payload: ErrorPayload {
                code: code.map(str::to_string),
                message: Some(message.to_string()),
                details: None,
                hint: None,
            },
        }
    }

    #[test]
    fn test_transport_failures_are_connection() {
        let c = ErrorClassifier::default();
        assert_eq!(
            c.classify(&SourceError::Timeout(Duration::from_secs(15))),
            ErrorKind::Connection
        );
        assert_eq!(
            c.classify(&SourceError::Transport("connection refused".into())),
            ErrorKind::Connection
        );
        assert_eq!(c.classify(&status(408, None, "timeout")), ErrorKind::Connection);
    }

    #[test]
    fn test_authentication() {
        let c = ErrorClassifier::default();
        assert_eq!(
            c.classify(&status(401, None, "Unauthorized")),
            ErrorKind::Authentication
        );
        assert_eq!(
            c.classify(&status(400, Some("PGRST301"), "JWT expired")),
            ErrorKind::Authentication
        );
    }

    #[test]
    fn test_permission() {
        let c = ErrorClassifier::default();
        assert_eq!(
            c.classify(&status(403, Some("42501"), "permission denied for table recipes")),
            ErrorKind::Permission
        );
        assert_eq!(
            c.classify(&status(400, Some("42501"), "new row violates row-level security")),
            ErrorKind::Permission
        );
    }

    #[test]
    fn test_missing_known_table() {
        let c = ErrorClassifier::default();
        assert_eq!(
            c.classify(&status(
                404,
                Some("42P01"),
                "relation \"public.recipe_iterations\" does not exist"
            )),
            ErrorKind::MissingTable
        );
        assert_eq!(
            c.classify(&status(
                404,
                Some("PGRST205"),
                "Could not find the table 'public.recipes' in the schema cache"
            )),
            ErrorKind::MissingTable
        );
    }

    #[test]
    fn test_missing_unknown_table_is_plain_not_found() {
        let c = ErrorClassifier::default();
        assert_eq!(
            c.classify(&status(
                404,
                Some("42P01"),
                "relation \"public.meal_plans\" does not exist"
            )),
            ErrorKind::NotFound
        );
        assert_eq!(
            c.classify(&status(406, Some("PGRST116"), "JSON object requested, multiple (or no) rows returned")),
            ErrorKind::NotFound
        );
        assert_eq!(c.classify(&status(404, None, "Not Found")), ErrorKind::NotFound);
    }

    #[test]
    fn test_custom_known_tables() {
        let c = ErrorClassifier::new(["meal_plans"]);
        assert_eq!(
            c.classify(&status(
                404,
                Some("42P01"),
                "relation \"meal_plans\" does not exist"
            )),
            ErrorKind::MissingTable
        );
    }

    #[test]
    fn test_validation() {
        let c = ErrorClassifier::default();
        assert_eq!(
            c.classify(&status(409, Some("23505"), "duplicate key value violates unique constraint")),
            ErrorKind::Validation
        );
        assert_eq!(
            c.classify(&status(400, Some("22P02"), "invalid input syntax for type uuid")),
            ErrorKind::Validation
        );
        assert_eq!(
            c.classify(&status(400, Some("PGRST100"), "failed to parse filter")),
            ErrorKind::Validation
        );
        assert_eq!(
            c.classify(&SourceError::InvalidQuery("unknown column".into())),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_rate_limit_and_server() {
        let c = ErrorClassifier::default();
        assert_eq!(c.classify(&status(429, None, "Too Many Requests")), ErrorKind::RateLimit);
        assert_eq!(c.classify(&status(500, None, "boom")), ErrorKind::Server);
        assert_eq!(c.classify(&status(503, None, "unavailable")), ErrorKind::Server);
    }

    #[test]
    fn test_jwt_wording_outside_auth_statuses_is_not_authentication() {
        let c = ErrorClassifier::default();
        assert_eq!(
            c.classify(&status(500, None, "server misconfigured: JWT secret is missing")),
            ErrorKind::Server
        );
        assert_eq!(
            c.classify(&status(403, None, "invalid JWT signature")),
            ErrorKind::Authentication
        );
        assert_eq!(
            c.classify(&status(400, Some("PGRST302"), "anonymous access disabled")),
            ErrorKind::Authentication
        );
    }

    #[test]
    fn test_everything_else_is_unknown() {
        let c = ErrorClassifier::default();
        assert_eq!(c.classify(&status(418, None, "teapot")), ErrorKind::Unknown);
        assert_eq!(
            c.classify(&SourceError::Decode("expected array".into())),
            ErrorKind::Unknown
        );
    }
}
