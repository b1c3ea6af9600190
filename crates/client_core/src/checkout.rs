use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use rust_decimal::Decimal;
use serde_json::Value;
use shared::{
    domain::{BuyerIdentity, CheckoutStep, ShippingInfo, TransactionId},
    error::ApiFailure,
    protocol::{
        ConfirmInputs, ConfirmItem, FlowIdentifiers, InitInputs, Payment, SelectInputs,
        TransactionRequest,
    },
};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    cart::{CartSnapshot, CartStore},
    ClientEvent, TransactionApi,
};

pub const DEFAULT_USECASE_ID: &str = "agricultural_flow_1";

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("no transaction id yet; cannot {action} before the checkout flow is created")]
    MissingTransaction { action: &'static str },
    #[error("cannot {action} while checkout is {actual}; expected {expected}")]
    OutOfOrder {
        action: &'static str,
        expected: CheckoutStep,
        actual: CheckoutStep,
    },
    #[error("a checkout request is already in flight")]
    Busy,
    #[error("checkout was abandoned")]
    Cancelled,
    #[error("checkout could not be started ({0}); leave checkout and try again")]
    FlowUnavailable(String),
    #[error("cart is empty")]
    EmptyCart,
    #[error("missing shipping details")]
    MissingShipping,
    #[error(transparent)]
    Remote(#[from] ApiFailure),
}

impl CheckoutError {
    /// Whether re-invoking the same action can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote(_) | Self::Busy)
    }
}

/// State of one buyer transaction, owned by its [`CheckoutFlow`].
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutTransaction {
    pub flow: Option<FlowIdentifiers>,
    pub step: CheckoutStep,
    pub shipping: Option<ShippingInfo>,
    pub items: CartSnapshot,
    pub total_amount: Decimal,
}

impl CheckoutTransaction {
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.flow.as_ref().map(|flow| &flow.transaction_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutReceipt {
    pub transaction_id: TransactionId,
    pub total_amount: Decimal,
    pub item_count: usize,
    pub data: Option<Value>,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, CheckoutError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| CheckoutError::Busy)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives create-flow → select → init → confirm for a snapshot of the cart.
/// `step` only moves forward and only after the matching remote call
/// succeeded, so a failed step is retried by calling it again.
pub struct CheckoutFlow {
    api: Arc<dyn TransactionApi>,
    cart: Arc<CartStore>,
    buyer: BuyerIdentity,
    usecase_id: String,
    state: Mutex<CheckoutTransaction>,
    busy: AtomicBool,
    cancelled: AtomicBool,
    events: broadcast::Sender<ClientEvent>,
}

impl CheckoutFlow {
    pub fn new(
        api: Arc<dyn TransactionApi>,
        cart: Arc<CartStore>,
        buyer: BuyerIdentity,
    ) -> Result<Self, CheckoutError> {
        let items = cart.snapshot();
        if items.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        let total_amount = items.total();
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            api,
            cart,
            buyer,
            usecase_id: DEFAULT_USECASE_ID.to_string(),
            state: Mutex::new(CheckoutTransaction {
                flow: None,
                step: CheckoutStep::Created,
                shipping: None,
                items,
                total_amount,
            }),
            busy: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            events,
        })
    }

    pub fn with_usecase_id(mut self, usecase_id: impl Into<String>) -> Self {
        self.usecase_id = usecase_id.into();
        self
    }

    /// Confirms `amount` instead of the total computed from the snapshot.
    pub fn with_total_override(self, amount: Decimal) -> Self {
        self.lock_state().total_amount = amount;
        self
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn step(&self) -> CheckoutStep {
        self.lock_state().step
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.lock_state().transaction_id().cloned()
    }

    pub fn total_amount(&self) -> Decimal {
        self.lock_state().total_amount
    }

    pub fn transaction(&self) -> CheckoutTransaction {
        self.lock_state().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn is_abandoned(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Called when the checkout screen goes away. Results of calls still in
    /// flight are dropped instead of applied.
    pub fn abandon(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            info!(
                "checkout: abandoned step={} transaction={}",
                self.step(),
                self.transaction_id()
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
    }

    /// Asks the backend for session, flow and transaction identifiers. A
    /// failure here is terminal for this flow.
    pub async fn create_flow(&self) -> Result<FlowIdentifiers, CheckoutError> {
        self.ensure_not_abandoned()?;
        {
            let state = self.lock_state();
            if state.step == CheckoutStep::Failed {
                return Err(CheckoutError::FlowUnavailable(
                    "previous attempt failed".to_string(),
                ));
            }
            if let Some(flow) = &state.flow {
                return Ok(flow.clone());
            }
        }
        let _busy = BusyGuard::acquire(&self.busy)?;

        let result = self
            .api
            .create_flow(&self.usecase_id)
            .await
            .and_then(|flow| {
                if flow.transaction_id.is_empty() {
                    Err(ApiFailure::Decode(
                        "server did not issue a transaction id".to_string(),
                    ))
                } else {
                    Ok(flow)
                }
            });
        self.ensure_not_abandoned()?;

        match result {
            Ok(flow) => {
                info!(
                    "checkout: flow created transaction={} session={} flow={}",
                    flow.transaction_id, flow.session_id, flow.flow_id
                );
                self.lock_state().flow = Some(flow.clone());
                Ok(flow)
            }
            Err(err) => {
                warn!("checkout: create-flow failed error={err}");
                self.lock_state().step = CheckoutStep::Failed;
                self.notify(ClientEvent::CheckoutStepChanged {
                    step: CheckoutStep::Failed,
                });
                self.notify(ClientEvent::Error(format!(
                    "Failed to start checkout: {err}"
                )));
                Err(CheckoutError::FlowUnavailable(err.to_string()))
            }
        }
    }

    /// Selects the snapshot's first line. The protocol takes a single
    /// representative item here even for multi-line carts.
    pub async fn select(&self) -> Result<(), CheckoutError> {
        let (transaction_id, _busy) = self.begin_step("select", CheckoutStep::Created)?;
        let inputs = {
            let state = self.lock_state();
            let item = state.items.first().ok_or(CheckoutError::EmptyCart)?;
            SelectInputs {
                item_id: item.product_id.clone(),
                quantity: item.quantity,
            }
        };
        let request = TransactionRequest {
            transaction_id,
            inputs,
        };

        let result = self.api.select(&request).await;
        self.finish_step("select", result)?;
        self.advance(CheckoutStep::Created, |_| {});
        Ok(())
    }

    pub async fn init(&self, shipping: ShippingInfo) -> Result<(), CheckoutError> {
        let (transaction_id, _busy) = self.begin_step("initialize", CheckoutStep::Selected)?;
        let request = TransactionRequest {
            transaction_id,
            inputs: InitInputs::delivery(shipping.clone()),
        };

        let result = self.api.init(&request).await;
        self.finish_step("initialize", result)?;
        self.advance(CheckoutStep::Selected, |state| {
            state.shipping = Some(shipping);
        });
        Ok(())
    }

    /// Places the order for every snapshot line, then clears the cart and
    /// signals a return to the dashboard. A confirmation that lands after
    /// [`abandon`](Self::abandon) still clears the cart but emits no events.
    pub async fn confirm(&self) -> Result<CheckoutReceipt, CheckoutError> {
        let (transaction_id, _busy) = self.begin_step("confirm", CheckoutStep::Initialized)?;
        let inputs = {
            let state = self.lock_state();
            let shipping = state
                .shipping
                .as_ref()
                .ok_or(CheckoutError::MissingShipping)?;
            let first = state.items.first().ok_or(CheckoutError::EmptyCart)?;
            ConfirmInputs {
                customer_name: shipping.name.clone(),
                total_amount: state.total_amount,
                seller_id: first.seller_id.clone(),
                buyer_id: self.buyer.id.clone(),
                items: state.items.entries().iter().map(ConfirmItem::from).collect(),
                payment: Payment::cash_on_delivery(),
            }
        };
        let total_amount = inputs.total_amount;
        let item_count = inputs.items.len();
        let request = TransactionRequest {
            transaction_id: transaction_id.clone(),
            inputs,
        };

        // A placed order clears the session cart even if the screen is gone.
        let data = match self.api.confirm(&request).await {
            Ok(data) => data,
            Err(err) => return Err(self.fail_step("confirm", err)),
        };
        self.advance(CheckoutStep::Initialized, |_| {});

        self.cart.clear_cart();
        info!(
            "checkout: order placed transaction={transaction_id} total={total_amount} items={item_count}"
        );
        if self.is_abandoned() {
            debug!("checkout: order placed after abandon; skipping navigation");
        } else {
            self.notify(ClientEvent::OrderPlaced {
                transaction_id: transaction_id.clone(),
                total_amount,
            });
            self.notify(ClientEvent::NavigateHome);
        }

        Ok(CheckoutReceipt {
            transaction_id,
            total_amount,
            item_count,
            data,
        })
    }

    /// Reads the backend's view of the transaction. Does not change `step`.
    pub async fn status(&self) -> Result<Value, CheckoutError> {
        self.ensure_not_abandoned()?;
        let transaction_id = self
            .transaction_id()
            .ok_or(CheckoutError::MissingTransaction { action: "query status" })?;
        let result = self.api.status(&transaction_id).await;
        self.finish_step("query status", result)
    }

    fn lock_state(&self) -> MutexGuard<'_, CheckoutTransaction> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn ensure_not_abandoned(&self) -> Result<(), CheckoutError> {
        if self.is_abandoned() {
            return Err(CheckoutError::Cancelled);
        }
        Ok(())
    }

    /// Local checks shared by every step. Nothing here touches the network.
    fn begin_step(
        &self,
        action: &'static str,
        expected: CheckoutStep,
    ) -> Result<(TransactionId, BusyGuard<'_>), CheckoutError> {
        self.ensure_not_abandoned()?;
        let state = self.lock_state();
        if state.step == CheckoutStep::Failed {
            return Err(CheckoutError::FlowUnavailable(
                "no transaction was created".to_string(),
            ));
        }
        let transaction_id = state
            .transaction_id()
            .cloned()
            .ok_or(CheckoutError::MissingTransaction { action })?;
        let busy = BusyGuard::acquire(&self.busy)?;
        if state.step != expected {
            return Err(CheckoutError::OutOfOrder {
                action,
                expected,
                actual: state.step,
            });
        }
        debug!("checkout: {action} transaction={transaction_id}");
        Ok((transaction_id, busy))
    }

    fn finish_step<T>(
        &self,
        action: &'static str,
        result: Result<T, ApiFailure>,
    ) -> Result<T, CheckoutError> {
        if self.is_abandoned() {
            debug!("checkout: discarding {action} result after abandon");
            return Err(CheckoutError::Cancelled);
        }
        result.map_err(|err| self.fail_step(action, err))
    }

    fn fail_step(&self, action: &'static str, err: ApiFailure) -> CheckoutError {
        if self.is_abandoned() {
            debug!("checkout: dropping {action} failure after abandon error={err}");
            return CheckoutError::Cancelled;
        }
        warn!(
            "checkout: {action} failed step={} error={err}",
            self.step()
        );
        self.notify(ClientEvent::Error(format!("Failed to {action}: {err}")));
        CheckoutError::Remote(err)
    }

    fn advance(&self, from: CheckoutStep, update: impl FnOnce(&mut CheckoutTransaction)) {
        let Some(next) = from.next() else {
            return;
        };
        {
            let mut state = self.lock_state();
            if state.step != from {
                return;
            }
            update(&mut state);
            state.step = next;
        }
        debug!("checkout: advanced {from} -> {next}");
        if !self.is_abandoned() {
            self.notify(ClientEvent::CheckoutStepChanged { step: next });
        }
    }
}

#[cfg(test)]
#[path = "tests/checkout_tests.rs"]
mod tests;
