use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{BuyerId, CartEntry, ProductId, SellerId, ShippingInfo, TransactionId},
    error::ApiFailure,
};

pub const DEFAULT_FAILURE_MESSAGE: &str = "request failed";

/// `{success, data, message | error}` wrapper returned by every route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: Some(true),
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: Some(false),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// `message` wins over `error`; a non-string `error` is rendered as JSON.
    pub fn error_message(&self) -> Option<String> {
        if let Some(message) = self.message.as_ref().filter(|m| !m.trim().is_empty()) {
            return Some(message.clone());
        }
        match self.error.as_ref()? {
            Value::Null => None,
            Value::String(text) if text.trim().is_empty() => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.success == Some(false)
    }

    pub fn into_data(self) -> Result<Option<Value>, ApiFailure> {
        if self.is_rejected() {
            return Err(ApiFailure::rejected(
                self.error_message()
                    .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
            ));
        }
        Ok(self.data)
    }

    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T, ApiFailure> {
        let data = self
            .into_data()?
            .ok_or_else(|| ApiFailure::Decode("response is missing `data`".to_string()))?;
        serde_json::from_value(data).map_err(|err| ApiFailure::Decode(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlowRequest {
    pub usecase_id: String,
}

/// Identifiers minted by the backend when a checkout flow starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowIdentifiers {
    pub session_id: String,
    pub flow_id: String,
    pub transaction_id: TransactionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest<I> {
    pub transaction_id: TransactionId,
    pub inputs: I,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectInputs {
    pub item_id: ProductId,
    pub quantity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfillmentType {
    Delivery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fulfillment {
    #[serde(rename = "type")]
    pub kind: FulfillmentType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitInputs {
    pub billing: ShippingInfo,
    pub fulfillment: Fulfillment,
}

impl InitInputs {
    pub fn delivery(billing: ShippingInfo) -> Self {
        Self {
            billing,
            fulfillment: Fulfillment {
                kind: FulfillmentType::Delivery,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmItem {
    pub id: ProductId,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub quantity: u32,
}

impl From<&CartEntry> for ConfirmItem {
    fn from(entry: &CartEntry) -> Self {
        Self {
            id: entry.product_id.clone(),
            name: entry.name.clone(),
            price: entry.unit_price,
            quantity: entry.quantity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "COD")]
    CashOnDelivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    #[serde(rename = "type")]
    pub method: PaymentMethod,
    pub status: PaymentStatus,
}

impl Payment {
    pub fn cash_on_delivery() -> Self {
        Self {
            method: PaymentMethod::CashOnDelivery,
            status: PaymentStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmInputs {
    pub customer_name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    pub seller_id: SellerId,
    pub buyer_id: BuyerId,
    pub items: Vec<ConfirmItem>,
    pub payment: Payment,
}
