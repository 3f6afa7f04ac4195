// src/gateway.rs --------------------------------------------------------------
use std::time::Duration;

use async_trait::async_trait;
use hyper::{
    body::Bytes,
    client::{connect::Connect, HttpConnector},
    header::{CONTENT_TYPE, LOCATION},
    Body, Client, Method, Request, StatusCode, Uri,
};
use hyper_rustls::HttpsConnector;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::lead::{Lead, NewLead, StatusUpdate};

/// Redirect hops followed before giving up; script endpoints answer with one.
const MAX_REDIRECTS: usize = 5;

// -----------------------------------------------------------------------------
// type aliases
type Https = HttpsConnector<HttpConnector>;

// -----------------------------------------------------------------------------
// errors
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Lead store responded with status {0}")]
    Status(StatusCode),

    #[error("Lead store request failed: {0}")]
    Network(#[from] hyper::Error),

    #[error("Lead store did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Lead store returned an unreadable response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Lead store redirected too many times")]
    TooManyRedirects,

    #[error("Invalid lead store request: {0}")]
    Request(#[from] hyper::http::Error),

    /// The store understood the request and refused it.
    #[error("{0}")]
    Rejected(String),
}

impl GatewayError {
    pub fn retryable(&self) -> bool {
        !matches!(self, GatewayError::Rejected(_) | GatewayError::Request(_))
    }
}

// -----------------------------------------------------------------------------
// trait
/// The only I/O boundary to the lead store. One attempt per call, no retries.
#[async_trait]
pub trait LeadGateway: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<Lead>, GatewayError>;
    async fn update_status(&self, update: &StatusUpdate) -> Result<Value, GatewayError>;
    async fn submit(&self, lead: &NewLead) -> Result<Value, GatewayError>;
}

// -----------------------------------------------------------------------------
// spreadsheet-backed store
pub struct SheetGateway<C = Https> {
    client:   Client<C>,
    base:     Uri,
    deadline: Duration,
}

fn https_client() -> Client<Https> {
    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .https_or_http()
        .enable_http1()
        .build();
    Client::builder().build(https)
}

impl SheetGateway<Https> {
    pub fn new(base: Uri, deadline: Duration) -> Self {
        Self::with_client(https_client(), base, deadline)
    }
}

impl<C> SheetGateway<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    pub fn with_client(client: Client<C>, base: Uri, deadline: Duration) -> Self {
        Self { client, base, deadline }
    }

    fn fetch_uri(&self) -> Result<Uri, GatewayError> {
        let joined = match self.base.query() {
            Some(_) => format!("{}&action=get", self.base),
            None    => format!("{}?action=get", self.base),
        };
        Uri::try_from(joined).map_err(|e| GatewayError::Request(e.into()))
    }

    async fn send(&self, method: Method, uri: Uri, body: Option<Bytes>) -> Result<Bytes, GatewayError> {
        timeout(self.deadline, self.send_following(method, uri, body))
            .await
            .map_err(|_| GatewayError::Timeout(self.deadline))?
    }

    async fn send_following(
        &self,
        mut method: Method,
        mut uri: Uri,
        mut body: Option<Bytes>,
    ) -> Result<Bytes, GatewayError> {
        for _ in 0..=MAX_REDIRECTS {
            let mut req = Request::builder().method(method.clone()).uri(uri.clone());
            if body.is_some() {
                req = req.header(CONTENT_TYPE, mime::APPLICATION_JSON.as_ref());
            }
            let req = req.body(body.clone().map(Body::from).unwrap_or_else(Body::empty))?;

            let resp   = self.client.request(req).await?;
            let status = resp.status();

            if status.is_redirection() {
                let next = resp
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|location| resolve_location(&uri, location))
                    .ok_or(GatewayError::Status(status))?;

                debug!("lead store redirected ({status})");
                if matches!(status, StatusCode::FOUND | StatusCode::SEE_OTHER | StatusCode::MOVED_PERMANENTLY) {
                    method = Method::GET;
                    body   = None;
                }
                uri = next;
                continue;
            }

            if !status.is_success() {
                warn!("lead store answered {status}");
                return Err(GatewayError::Status(status));
            }

            return Ok(hyper::body::to_bytes(resp.into_body()).await?);
        }

        Err(GatewayError::TooManyRedirects)
    }

    async fn post_json<T: Serialize + ?Sized>(&self, payload: &T) -> Result<Value, GatewayError> {
        let body  = Bytes::from(serde_json::to_vec(payload)?);
        let bytes = self.send(Method::POST, self.base.clone(), Some(body)).await?;
        check_result(decode(&bytes)?)
    }
}

#[async_trait]
impl<C> LeadGateway for SheetGateway<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    async fn fetch_all(&self) -> Result<Vec<Lead>, GatewayError> {
        let bytes = self.send(Method::GET, self.fetch_uri()?, None).await?;
        let leads: Vec<Lead> = decode(&bytes)?;
        info!("fetched {} leads from the store", leads.len());
        Ok(leads)
    }

    async fn update_status(&self, update: &StatusUpdate) -> Result<Value, GatewayError> {
        let payload = json!({
            "action": "updateStatus",
            "id":     update.id,
            "status": update.status,
        });
        let reply = self.post_json(&payload).await?;
        info!(id = %update.id, status = %update.status, "lead status updated in the store");
        Ok(reply)
    }

    async fn submit(&self, lead: &NewLead) -> Result<Value, GatewayError> {
        let reply = self.post_json(lead).await?;
        info!("new lead forwarded to the store");
        Ok(reply)
    }
}

// -----------------------------------------------------------------------------
// helpers
fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, GatewayError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[derive(Deserialize)]
struct StoreReply {
    result:  Option<String>,
    message: Option<String>,
}

/// The store reports refusals in the body, even with a 2xx status.
fn check_result(reply: Value) -> Result<Value, GatewayError> {
    if let Ok(StoreReply { result: Some(result), message }) = StoreReply::deserialize(&reply) {
        if result == "error" {
            return Err(GatewayError::Rejected(
                message.unwrap_or_else(|| "Lead store rejected the request".to_string()),
            ));
        }
    }
    Ok(reply)
}

/// Resolves a `Location` header against the URI that produced it.
fn resolve_location(current: &Uri, location: &str) -> Option<Uri> {
    let location = location.trim();

    if let Some(rest) = location.strip_prefix("//") {
        return format!("{}://{rest}", current.scheme_str()?).parse().ok();
    }
    if location.starts_with('/') {
        return with_path(current, location);
    }
    if location.starts_with('?') {
        return with_path(current, &format!("{}{location}", current.path()));
    }

    match location.parse::<Uri>() {
        Ok(next) if next.scheme().is_some() => Some(next),
        // path-relative, e.g. `exec2` from `/macros/s/abc/exec`
        _ => {
            let dir = current.path().rsplit_once('/').map_or("", |(dir, _)| dir);
            with_path(current, &format!("{dir}/{location}"))
        }
    }
}

fn with_path(current: &Uri, path_and_query: &str) -> Option<Uri> {
    let mut parts = current.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse().ok()?);
    Uri::from_parts(parts).ok()
}
