//! DNS-over-HTTPS upstream (RFC 8484, GET variant).
//!
//! The query is sent with its ID zeroed, base64url-encoded without padding
//! in the `dns` query parameter:
//!
//! ```text
//! GET /dns-query?dns=AAABAAABAAAAAAAAB2V4YW1wbGUDY29tAAABAAE HTTP/2
//! Accept: application/dns-message
//! ```
//!
//! The response body is the raw DNS wire format response.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hickory_proto::op::Message;
use reqwest::Url;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::debug;

use crate::dns;
use crate::error::{Error, Result};

/// Media type of DoH requests and responses.
const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

/// Something that can answer a DNS query.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Resolve `query`, returning a response carrying the query's ID.
    async fn exchange(&self, query: &Message) -> Result<Message>;

    /// Where queries go, for logging.
    fn endpoint(&self) -> &str;
}

/// DoH client bound to a single endpoint.
///
/// No timeout or retry is applied here; the HTTP client's defaults govern
/// how long a request may take.
pub struct DohClient {
    endpoint: Url,
    http: reqwest::Client,
}

impl DohClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        let url = Url::parse(endpoint).map_err(|e| Error::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "https" | "http") {
            return Err(Error::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }

        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(Error::Client)?;

        Ok(Self {
            endpoint: url,
            http,
        })
    }

    fn request_url(&self, query: &Message) -> Result<Url> {
        let mut wire = query.to_vec()?;
        // ID 0 keeps GET requests cache friendly for HTTP intermediaries.
        if wire.len() >= 2 {
            wire[0] = 0;
            wire[1] = 0;
        }

        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("dns", &URL_SAFE_NO_PAD.encode(wire));
        Ok(url)
    }
}

#[async_trait]
impl Upstream for DohClient {
    async fn exchange(&self, query: &Message) -> Result<Message> {
        let url = self.request_url(query)?;

        debug!(
            endpoint = %self.endpoint,
            domain = %dns::domain(query),
            "Sending DoH query"
        );

        let response = self
            .http
            .get(url)
            .header(ACCEPT, DNS_MESSAGE_CONTENT_TYPE)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamStatus(status));
        }

        if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default();
            if !content_type.starts_with(DNS_MESSAGE_CONTENT_TYPE) {
                return Err(Error::ContentType(content_type.to_string()));
            }
        }

        let body = response.bytes().await?;
        let mut message = Message::from_vec(&body)?;
        message.set_id(query.id());

        debug!(
            endpoint = %self.endpoint,
            response_len = body.len(),
            answers = message.answers().len(),
            "DoH response received"
        );

        Ok(message)
    }

    fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }
}
