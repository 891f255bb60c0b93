use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::debug;
use url::Url;

use crate::error::{ConfigError, SourceError};
use crate::postgrest::{self, Method, REST_PATH};
use crate::query::{Query, Row};

/// Anything a table handle can send a [`Query`] to.
///
/// The remote backend and the in-process fallback store both implement this,
/// so the handle evaluates one query description against either path.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// One attempt. Retries, timeouts and classification happen above this.
    async fn run(&self, query: &Query) -> Result<Vec<Row>, SourceError>;
}

/// PostgREST-compatible backend reached over HTTP.
pub struct RemoteSource {
    client: reqwest::Client,
    rest_url: Url,
}

impl RemoteSource {
    pub fn new(base_url: &Url, api_key: &str) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key)
            .map_err(|e| ConfigError::MalformedCredential(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| ConfigError::MalformedCredential(e.to_string()))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .user_agent(format!(
                "larder/{} (recipe data access)",
                env!("CARGO_PKG_VERSION")
            ))
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ConfigError::Http(e.to_string()))?;

        Ok(Self {
            client,
            rest_url: rest_url(base_url)?,
        })
    }

    #[must_use]
    pub fn rest_url(&self) -> &Url {
        &self.rest_url
    }
}

/// `{base}/rest/v1/`, keeping any path the base URL already has.
pub fn rest_url(base_url: &Url) -> Result<Url, ConfigError> {
    let mut base = base_url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(REST_PATH).map_err(|e| ConfigError::InvalidUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn transport_error(err: &reqwest::Error) -> SourceError {
    if err.is_decode() {
        SourceError::Decode(err.to_string())
    } else {
        SourceError::Transport(err.to_string())
    }
}

#[async_trait]
impl DataSource for RemoteSource {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn run(&self, query: &Query) -> Result<Vec<Row>, SourceError> {
        let request = postgrest::encode(query);
        let url = self
            .rest_url
            .join(&request.path)
            .map_err(|e| SourceError::InvalidQuery(e.to_string()))?;
        debug!(method = request.method.as_str(), %url, "sending request");

        let mut builder = self
            .client
            .request(to_reqwest(request.method), url)
            .query(&request.params);
        if let Some(prefer) = request.prefer {
            builder = builder.header("Prefer", prefer);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(|e| transport_error(&e))?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| transport_error(&e))?;

        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                payload: postgrest::decode_error(status.as_u16(), &body),
            });
        }
        postgrest::decode_rows(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_url_without_trailing_slash() {
        let base = Url::parse("https://abc.supabase.co").unwrap();
        assert_eq!(
            rest_url(&base).unwrap().as_str(),
            "https://abc.supabase.co/rest/v1/"
        );
    }

    #[test]
    fn test_rest_url_keeps_base_path() {
        let base = Url::parse("http://localhost:54321/proxy").unwrap();
        assert_eq!(
            rest_url(&base).unwrap().as_str(),
            "http://localhost:54321/proxy/rest/v1/"
        );
    }

    #[test]
    fn test_rejects_unencodable_key() {
        let base = Url::parse("https://abc.supabase.co").unwrap();
        assert!(matches!(
            RemoteSource::new(&base, "bad\nkey"),
            Err(ConfigError::MalformedCredential(_))
        ));
    }
}
