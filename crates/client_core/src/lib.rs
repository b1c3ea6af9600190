use async_trait::async_trait;
use reqwest::{Client, Response};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{
    domain::{CheckoutStep, Product, TransactionId},
    error::ApiFailure,
    protocol::{
        ConfirmInputs, CreateFlowRequest, Envelope, FlowIdentifiers, InitInputs, SelectInputs,
        TransactionRequest,
    },
};
use tracing::{debug, warn};
use url::Url;

pub mod cart;
pub mod checkout;

pub use cart::{CartEvent, CartSnapshot, CartStore, CART_STORAGE_KEY};
pub use checkout::{
    CheckoutError, CheckoutFlow, CheckoutReceipt, CheckoutTransaction, DEFAULT_USECASE_ID,
};

pub const DEFAULT_FEED_LIMIT: u32 = 10;

/// Remote half of the checkout protocol. Implemented over HTTP by
/// [`ApiClient`]; tests substitute scripted backends.
#[async_trait]
pub trait TransactionApi: Send + Sync {
    async fn create_flow(&self, usecase_id: &str) -> Result<FlowIdentifiers, ApiFailure>;
    async fn select(
        &self,
        request: &TransactionRequest<SelectInputs>,
    ) -> Result<Option<Value>, ApiFailure>;
    async fn init(
        &self,
        request: &TransactionRequest<InitInputs>,
    ) -> Result<Option<Value>, ApiFailure>;
    async fn confirm(
        &self,
        request: &TransactionRequest<ConfirmInputs>,
    ) -> Result<Option<Value>, ApiFailure>;
    async fn status(&self, transaction_id: &TransactionId) -> Result<Value, ApiFailure>;
}

/// Notifications for whatever front end is rendering the core.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    CheckoutStepChanged {
        step: CheckoutStep,
    },
    OrderPlaced {
        transaction_id: TransactionId,
        total_amount: Decimal,
    },
    /// Reset navigation to the buyer dashboard.
    NavigateHome,
    /// Dismissible error notification.
    Error(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProductListing {
    Bare(Vec<Product>),
    Wrapped(Envelope),
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        Self::with_http_client(base_url, Client::new())
    }

    pub fn with_http_client(base_url: &str, http: Client) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|err| anyhow::anyhow!("invalid api url '{base_url}': {err}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("api url '{base_url}' cannot carry request paths");
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiFailure> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiFailure::Transport(format!("invalid api url {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post_envelope<B: Serialize + ?Sized>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<Envelope, ApiFailure> {
        let url = self.endpoint(segments)?;
        debug!("api: POST {url}");
        let response = self
            .http
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|err| transport_failure(&url, err))?;
        read_envelope(&url, response).await
    }

    async fn get_text(&self, url: Url) -> Result<(u16, String), ApiFailure> {
        debug!("api: GET {url}");
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|err| transport_failure(&url, err))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| transport_failure(&url, err))?;
        Ok((status, body))
    }

    async fn get_envelope(&self, url: Url) -> Result<Envelope, ApiFailure> {
        let (status, body) = self.get_text(url.clone()).await?;
        envelope_from_body(&url, status, &body)
    }

    async fn get_products(&self, url: Url) -> Result<Vec<Product>, ApiFailure> {
        let (status, body) = self.get_text(url.clone()).await?;
        if !is_success(status) {
            return Err(envelope_from_body(&url, status, &body)
                .err()
                .unwrap_or_else(|| status_failure(status, None)));
        }
        match serde_json::from_str::<ProductListing>(&body) {
            Ok(ProductListing::Bare(products)) => Ok(products),
            Ok(ProductListing::Wrapped(envelope)) => envelope.into_typed(),
            Err(err) => {
                warn!("api: unreadable product listing url={url} error={err}");
                Err(ApiFailure::Decode(err.to_string()))
            }
        }
    }

    pub async fn health(&self) -> Result<Value, ApiFailure> {
        let url = self.endpoint(&["health"])?;
        let (status, body) = self.get_text(url.clone()).await?;
        if !is_success(status) {
            return Err(envelope_from_body(&url, status, &body)
                .err()
                .unwrap_or_else(|| status_failure(status, None)));
        }
        serde_json::from_str(&body).map_err(|err| ApiFailure::Decode(err.to_string()))
    }

    pub async fn list_products(&self) -> Result<Vec<Product>, ApiFailure> {
        self.get_products(self.endpoint(&["api", "products"])?).await
    }

    pub async fn search_products(&self, query: &str) -> Result<Vec<Product>, ApiFailure> {
        let query = query.trim();
        if query.is_empty() {
            return self.list_products().await;
        }
        let mut url = self.endpoint(&["api", "products", "search"])?;
        url.query_pairs_mut().append_pair("q", query);
        self.get_products(url).await
    }

    pub async fn product_feed(&self, limit: u32) -> Result<Vec<Product>, ApiFailure> {
        let mut url = self.endpoint(&["api", "products", "feed"])?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        self.get_products(url).await
    }
}

#[async_trait]
impl TransactionApi for ApiClient {
    async fn create_flow(&self, usecase_id: &str) -> Result<FlowIdentifiers, ApiFailure> {
        self.post_envelope(
            &["api", "checkout", "create-flow"],
            &CreateFlowRequest {
                usecase_id: usecase_id.to_string(),
            },
        )
        .await?
        .into_typed()
    }

    async fn select(
        &self,
        request: &TransactionRequest<SelectInputs>,
    ) -> Result<Option<Value>, ApiFailure> {
        self.post_envelope(&["api", "select"], request)
            .await?
            .into_data()
    }

    async fn init(
        &self,
        request: &TransactionRequest<InitInputs>,
    ) -> Result<Option<Value>, ApiFailure> {
        self.post_envelope(&["api", "init"], request)
            .await?
            .into_data()
    }

    async fn confirm(
        &self,
        request: &TransactionRequest<ConfirmInputs>,
    ) -> Result<Option<Value>, ApiFailure> {
        self.post_envelope(&["api", "confirm"], request)
            .await?
            .into_data()
    }

    async fn status(&self, transaction_id: &TransactionId) -> Result<Value, ApiFailure> {
        let url = self.endpoint(&["api", "status", transaction_id.as_str()])?;
        Ok(self
            .get_envelope(url)
            .await?
            .into_data()?
            .unwrap_or(Value::Null))
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn transport_failure(url: &Url, err: reqwest::Error) -> ApiFailure {
    warn!("api: request failed url={url} error={err}");
    ApiFailure::Transport(err.to_string())
}

fn status_failure(status: u16, message: Option<String>) -> ApiFailure {
    let message = message.unwrap_or_else(|| {
        reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or(shared::protocol::DEFAULT_FAILURE_MESSAGE)
            .to_string()
    });
    ApiFailure::Status { status, message }
}

async fn read_envelope(url: &Url, response: Response) -> Result<Envelope, ApiFailure> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|err| transport_failure(url, err))?;
    envelope_from_body(url, status, &body)
}

/// Non-2xx status and `success: false` are both failures; the message comes
/// from the body when it has one.
fn envelope_from_body(url: &Url, status: u16, body: &str) -> Result<Envelope, ApiFailure> {
    let parsed = serde_json::from_str::<Envelope>(body);
    if !is_success(status) {
        let message = parsed.ok().and_then(|envelope| envelope.error_message());
        warn!("api: server returned status={status} url={url}");
        return Err(status_failure(status, message));
    }
    let envelope = parsed.map_err(|err| {
        warn!("api: unreadable response body url={url} error={err}");
        ApiFailure::Decode(err.to_string())
    })?;
    if envelope.is_rejected() {
        warn!(
            "api: request rejected url={url} message={}",
            envelope.error_message().unwrap_or_default()
        );
    }
    Ok(envelope)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
