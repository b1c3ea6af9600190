use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(ProductId);
id_newtype!(SellerId);
id_newtype!(BuyerId);
id_newtype!(TransactionId);

/// Catalog record as served by the product routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub seller_id: SellerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock_quantity: Option<u32>,
}

impl Product {
    /// Whether `quantity` more units fit on top of `already_in_cart`. Products
    /// without a stock figure are not limited.
    pub fn has_stock_for(&self, already_in_cart: u32, quantity: u32) -> bool {
        match self.stock_quantity {
            Some(stock) => u64::from(already_in_cart) + u64::from(quantity) <= u64::from(stock),
            None => true,
        }
    }
}

/// One line of the cart. Field names on the wire follow the product JSON so a
/// persisted cart stays readable by older builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartEntry {
    #[serde(rename = "id")]
    pub product_id: ProductId,
    pub name: String,
    #[serde(rename = "price", with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub seller_id: SellerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl CartEntry {
    pub fn from_product(product: &Product, quantity: u32) -> Self {
        Self {
            product_id: product.id.clone(),
            name: product.name.clone(),
            unit_price: product.price,
            quantity,
            image_url: product.image_url.clone(),
            seller_id: product.seller_id.clone(),
            category: product.category.clone(),
        }
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingInfo {
    pub name: String,
    pub address: String,
    pub phone: String,
}

impl ShippingInfo {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            phone: phone.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerIdentity {
    pub id: BuyerId,
    pub name: String,
}

impl BuyerIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: BuyerId::new(id),
            name: name.into(),
        }
    }

    pub fn demo() -> Self {
        Self::new("buyer_default", "Demo Buyer")
    }
}

/// Progress of a checkout transaction. Only moves forward; `Failed` is
/// reserved for a transaction that never obtained an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStep {
    Created,
    Selected,
    Initialized,
    Confirmed,
    Failed,
}

impl CheckoutStep {
    /// The step a successful remote call moves to.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::Selected),
            Self::Selected => Some(Self::Initialized),
            Self::Initialized => Some(Self::Confirmed),
            Self::Confirmed | Self::Failed => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Selected => "selected",
            Self::Initialized => "initialized",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CheckoutStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
