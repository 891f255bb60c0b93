//! Construction-time checks on the backend URL and credential.
//!
//! Only public credentials are accepted: a JWT whose `role` claim is `anon`
//! or `authenticated`, or a publishable key. Service-level credentials are
//! refused before any client exists.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

const PUBLISHABLE_PREFIX: &str = "sb_publishable_";
const SECRET_PREFIX: &str = "sb_secret_";
const PUBLIC_ROLES: [&str; 2] = ["anon", "authenticated"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialKind {
    Jwt { role: String },
    Publishable,
}

#[derive(Deserialize)]
struct Claims {
    role: Option<String>,
}

pub fn check_credential(key: &str) -> Result<CredentialKind, ConfigError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(ConfigError::MissingCredential);
    }
    if key.starts_with(SECRET_PREFIX) {
        return Err(ConfigError::PrivilegedCredential("secret key".to_string()));
    }
    if let Some(rest) = key.strip_prefix(PUBLISHABLE_PREFIX) {
        if rest.is_empty() {
            return Err(ConfigError::MalformedCredential(
                "publishable key has no body".to_string(),
            ));
        }
        return Ok(CredentialKind::Publishable);
    }

    let role = jwt_role(key)?;
    if PUBLIC_ROLES.contains(&role.as_str()) {
        Ok(CredentialKind::Jwt { role })
    } else {
        Err(ConfigError::PrivilegedCredential(role))
    }
}

fn jwt_role(token: &str) -> Result<String, ConfigError> {
    let parts: Vec<&str> = token.split('.').collect();
    let [_, payload, _] = parts.as_slice() else {
        return Err(ConfigError::MalformedCredential(
            "expected a JWT or a publishable key".to_string(),
        ));
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| ConfigError::MalformedCredential(format!("JWT payload: {e}")))?;
    let claims: Claims = serde_json::from_slice(&bytes)
        .map_err(|e| ConfigError::MalformedCredential(format!("JWT claims: {e}")))?;
    claims
        .role
        .ok_or_else(|| ConfigError::MalformedCredential("JWT has no role claim".to_string()))
}

pub fn check_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt(payload: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload);
        format!("{header}.{body}.c2lnbmF0dXJl")
    }

    #[test]
    fn test_accepts_anon_jwt() {
        let key = jwt(r#"{"iss":"supabase","role":"anon","exp":1999999999}"#);
        assert_eq!(
            check_credential(&key).unwrap(),
            CredentialKind::Jwt {
                role: "anon".to_string()
            }
        );
    }

    #[test]
    fn test_accepts_publishable_key() {
        assert_eq!(
            check_credential("sb_publishable_abc123").unwrap(),
            CredentialKind::Publishable
        );
    }

    #[test]
    fn test_rejects_service_role() {
        let key = jwt(r#"{"iss":"supabase","role":"service_role"}"#);
        assert!(matches!(
            check_credential(&key),
            Err(ConfigError::PrivilegedCredential(role)) if role == "service_role"
        ));
        assert!(matches!(
            check_credential("sb_secret_abc123"),
            Err(ConfigError::PrivilegedCredential(_))
        ));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(check_credential("  "), Err(ConfigError::MissingCredential)));
        assert!(matches!(
            check_credential("not-a-key"),
            Err(ConfigError::MalformedCredential(_))
        ));
        assert!(matches!(
            check_credential("a.!!!.c"),
            Err(ConfigError::MalformedCredential(_))
        ));
        let no_role = jwt(r#"{"iss":"supabase"}"#);
        assert!(matches!(
            check_credential(&no_role),
            Err(ConfigError::MalformedCredential(_))
        ));
    }

    #[test]
    fn test_check_url() {
        assert!(check_url("https://abc.supabase.co").is_ok());
        assert!(check_url("http://127.0.0.1:54321").is_ok());
        assert!(check_url("ftp://example.com").is_err());
        assert!(check_url("not a url").is_err());
    }
}
