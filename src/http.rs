//! HTTP transport for an ARM-style management API.
//!
//! Requests carry a bearer token, the configured `api-version` query
//! parameter, and a fresh `x-ms-client-request-id` so provider-side logs can
//! be correlated. List calls follow `nextLink` until the collection is
//! exhausted.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::config::CloudConfig;
use crate::error::{CloudError, TransportError};
use crate::identity::ResourceId;
use crate::payload::Payload;
use crate::transport::{ListScope, Transport};

const REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

/// One page of a list response.
#[derive(Debug, Deserialize)]
struct ListPage {
    #[serde(default)]
    value: Vec<Value>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

/// Error envelope returned by the provider on failure.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// Blocking HTTP [`Transport`].
///
/// Clones share the underlying connection pool.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Arc<str>,
    api_version: Arc<str>,
    token: Arc<str>,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Builds a transport from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Config`] when the HTTP client cannot be built.
    pub fn new(config: &CloudConfig) -> Result<Self, CloudError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs()))
            .build()
            .map_err(|err| CloudError::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            endpoint: Arc::from(config.endpoint.trim().trim_end_matches('/')),
            api_version: Arc::from(config.api_version.trim()),
            token: Arc::from(config.access_token.trim()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint)
    }

    fn authorised(&self, request: RequestBuilder, with_version: bool) -> RequestBuilder {
        let signed = request
            .bearer_auth(&*self.token)
            .header(REQUEST_ID_HEADER, Uuid::new_v4().to_string());
        if with_version {
            signed.query(&[("api-version", &*self.api_version)])
        } else {
            signed
        }
    }

    fn send(request: RequestBuilder) -> Result<Response, TransportError> {
        request
            .send()
            .map_err(|err| TransportError::new(err.status().map(|code| code.as_u16()), err.to_string()))
    }

    fn read_body(response: Response) -> Result<(StatusCode, Vec<u8>), TransportError> {
        let status = response.status();
        let body = response
            .bytes()
            .map_err(|err| TransportError::new(Some(status.as_u16()), err.to_string()))?;
        Ok((status, body.to_vec()))
    }

    fn list_page(&self, url: &str, first: bool) -> Result<ListPage, TransportError> {
        let request = self.authorised(self.client.get(url), first);
        let (status, body) = Self::read_body(Self::send(request)?)?;
        if !status.is_success() {
            return Err(failure(status, &body));
        }
        serde_json::from_slice(&body)
            .map_err(|err| TransportError::new(Some(status.as_u16()), err.to_string()))
    }
}

fn failure(status: StatusCode, body: &[u8]) -> TransportError {
    TransportError::new(Some(status.as_u16()), provider_message(body))
}

/// Extracts `code: message` from the provider's error envelope, falling back
/// to the raw body.
fn provider_message(body: &[u8]) -> String {
    let raw = || String::from_utf8_lossy(body).trim().to_owned();
    let Ok(ErrorEnvelope { error }) = serde_json::from_slice::<ErrorEnvelope>(body) else {
        return raw();
    };
    match (error.code, error.message) {
        (Some(code), Some(message)) => format!("{code}: {message}"),
        (Some(text), None) | (None, Some(text)) => text,
        (None, None) => raw(),
    }
}

fn parse_payload(status: StatusCode, body: &[u8]) -> Result<Option<Payload>, TransportError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| TransportError::new(Some(status.as_u16()), err.to_string()))?;
    Ok(Payload::from_value(value))
}

impl Transport for HttpTransport {
    fn get(&self, id: &ResourceId) -> Result<Option<Payload>, TransportError> {
        debug!(%id, "GET");
        let request = self.authorised(self.client.get(self.url(&id.to_string())), true);
        let (status, body) = Self::read_body(Self::send(request)?)?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(failure(status, &body));
        }
        parse_payload(status, &body)
    }

    fn list(&self, scope: &ListScope) -> Result<Vec<Payload>, TransportError> {
        let mut url = self.url(&scope.path());
        let mut first = true;
        let mut items = Vec::new();
        loop {
            debug!(%url, "LIST");
            let page = self.list_page(&url, first)?;
            items.extend(page.value.into_iter().filter_map(Payload::from_value));
            match page.next_link {
                Some(next) if !next.is_empty() => {
                    url = next;
                    first = false;
                }
                _ => return Ok(items),
            }
        }
    }

    fn put(&self, id: &ResourceId, payload: &Payload) -> Result<Option<Payload>, TransportError> {
        debug!(%id, "PUT");
        let request = self
            .authorised(self.client.put(self.url(&id.to_string())), true)
            .json(&payload.to_value());
        let (status, body) = Self::read_body(Self::send(request)?)?;
        if !status.is_success() {
            return Err(failure(status, &body));
        }
        parse_payload(status, &body)
    }

    fn delete(&self, id: &ResourceId) -> Result<(), TransportError> {
        debug!(%id, "DELETE");
        let request = self.authorised(self.client.delete(self.url(&id.to_string())), true);
        let (status, body) = Self::read_body(Self::send(request)?)?;
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(failure(status, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(
        br#"{"error":{"code":"Conflict","message":"name taken"}}"#.as_slice(),
        "Conflict: name taken"
    )]
    #[case(br#"{"error":{"message":"quota"}}"#.as_slice(), "quota")]
    #[case(br#"{"error":{"code":"Throttled"}}"#.as_slice(), "Throttled")]
    #[case(b" upstream timeout \n".as_slice(), "upstream timeout")]
    fn provider_messages_are_extracted(#[case] body: &[u8], #[case] expected: &str) {
        assert_eq!(provider_message(body), expected);
    }

    #[rstest]
    fn blank_bodies_parse_as_absent() {
        let parsed = parse_payload(StatusCode::ACCEPTED, b"  ")
            .unwrap_or_else(|err| panic!("parse: {err}"));
        assert!(parsed.is_none());
    }

    #[rstest]
    fn non_json_body_is_a_transport_error() {
        let Err(err) = parse_payload(StatusCode::OK, b"<html>") else {
            panic!("html should not parse");
        };
        assert_eq!(err.status, Some(200));
    }

    #[rstest]
    fn list_pages_expose_next_link() {
        let page: ListPage = serde_json::from_str(
            r#"{"value":[{"id":"a"}],"nextLink":"https://example.test/next"}"#,
        )
        .unwrap_or_else(|err| panic!("page: {err}"));
        assert_eq!(page.value.len(), 1);
        assert_eq!(page.next_link.as_deref(), Some("https://example.test/next"));
    }

    #[rstest]
    fn endpoint_trailing_slash_is_trimmed() {
        let config = CloudConfig {
            subscription_id: String::from("sub"),
            access_token: String::from("token"),
            endpoint: String::from("https://example.test/"),
            api_version: String::from("2015-06-15"),
            default_group: None,
            request_timeout_secs: Some(5),
        };
        let transport = HttpTransport::new(&config).unwrap_or_else(|err| panic!("client: {err}"));
        assert_eq!(
            transport.url("/subscriptions/sub/resourceGroups"),
            "https://example.test/subscriptions/sub/resourceGroups"
        );
        assert!(!format!("{transport:?}").contains("token"));
    }
}
