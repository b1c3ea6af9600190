use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use shared::domain::{CartEntry, Product, ProductId};
use storage::KeyValueStore;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Storage key the serialized cart lives under.
pub const CART_STORAGE_KEY: &str = "@bharatmandi_cart";

#[derive(Debug, Clone, PartialEq)]
pub enum CartEvent {
    Changed { count: u64, total: Decimal },
}

/// Copy of the cart contents, unaffected by later mutations of the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CartSnapshot {
    entries: Vec<CartEntry>,
}

impl CartSnapshot {
    pub fn new(entries: Vec<CartEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[CartEntry] {
        &self.entries
    }

    pub fn first(&self) -> Option<&CartEntry> {
        self.entries.first()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn total(&self) -> Decimal {
        total_of(&self.entries)
    }

    pub fn count(&self) -> u64 {
        count_of(&self.entries)
    }
}

enum PersistCommand {
    Write(String),
    Flush(oneshot::Sender<()>),
}

/// Session-wide cart. Mutations apply to memory immediately; the serialized
/// cart is queued to a single writer task so storage sees writes in order.
pub struct CartStore {
    entries: Mutex<Vec<CartEntry>>,
    persist_tx: mpsc::UnboundedSender<PersistCommand>,
    events: broadcast::Sender<CartEvent>,
}

impl CartStore {
    /// Loads the persisted cart, falling back to an empty one. Must be called
    /// inside a tokio runtime.
    pub async fn hydrate(store: Arc<dyn KeyValueStore>) -> Arc<Self> {
        let entries = load_entries(store.as_ref()).await;
        info!("cart: hydrated entries={}", entries.len());
        Self::spawn(store, entries)
    }

    /// Starts with nothing in the cart. Must be called inside a tokio runtime.
    pub fn empty(store: Arc<dyn KeyValueStore>) -> Arc<Self> {
        Self::spawn(store, Vec::new())
    }

    fn spawn(store: Arc<dyn KeyValueStore>, entries: Vec<CartEntry>) -> Arc<Self> {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);
        tokio::spawn(run_persistence(store, persist_rx));
        Arc::new(Self {
            entries: Mutex::new(entries),
            persist_tx,
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CartEvent> {
        self.events.subscribe()
    }

    /// Adds `quantity` to an existing line or appends a new one.
    pub fn add_to_cart(&self, product: &Product, quantity: u32) {
        if quantity == 0 {
            debug!("cart: ignoring zero-quantity add product={}", product.id);
            return;
        }
        self.mutate(|entries| {
            match entries.iter_mut().find(|entry| entry.product_id == product.id) {
                Some(entry) => entry.quantity = entry.quantity.saturating_add(quantity),
                None => entries.push(CartEntry::from_product(product, quantity)),
            }
        });
    }

    pub fn remove_from_cart(&self, product_id: &ProductId) {
        self.mutate(|entries| entries.retain(|entry| &entry.product_id != product_id));
    }

    /// Absolute set; zero or negative removes the line.
    pub fn update_quantity(&self, product_id: &ProductId, new_quantity: i64) {
        if new_quantity <= 0 {
            self.remove_from_cart(product_id);
            return;
        }
        let quantity = u32::try_from(new_quantity).unwrap_or(u32::MAX);
        self.mutate(|entries| {
            if let Some(entry) = entries
                .iter_mut()
                .find(|entry| &entry.product_id == product_id)
            {
                entry.quantity = quantity;
            }
        });
    }

    pub fn clear_cart(&self) {
        self.mutate(Vec::clear);
    }

    pub fn total(&self) -> Decimal {
        total_of(&self.lock_entries())
    }

    pub fn count(&self) -> u64 {
        count_of(&self.lock_entries())
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    pub fn entries(&self) -> Vec<CartEntry> {
        self.lock_entries().clone()
    }

    pub fn quantity_of(&self, product_id: &ProductId) -> Option<u32> {
        self.lock_entries()
            .iter()
            .find(|entry| &entry.product_id == product_id)
            .map(|entry| entry.quantity)
    }

    pub fn snapshot(&self) -> CartSnapshot {
        CartSnapshot::new(self.entries())
    }

    /// Resolves once every write queued before this call has been attempted.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.persist_tx.send(PersistCommand::Flush(done_tx)).is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    fn lock_entries(&self) -> MutexGuard<'_, Vec<CartEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate(&self, apply: impl FnOnce(&mut Vec<CartEntry>)) {
        let (count, total) = {
            let mut entries = self.lock_entries();
            apply(&mut entries);
            // Queue while still holding the lock so writes keep mutation order.
            match serde_json::to_string(&*entries) {
                Ok(json) => {
                    if self.persist_tx.send(PersistCommand::Write(json)).is_err() {
                        warn!("cart: persistence worker stopped; keeping in-memory cart only");
                    }
                }
                Err(err) => warn!("cart: failed to serialize cart error={err}"),
            }
            (count_of(&entries), total_of(&entries))
        };
        let _ = self.events.send(CartEvent::Changed { count, total });
    }
}

fn total_of(entries: &[CartEntry]) -> Decimal {
    entries.iter().map(CartEntry::line_total).sum()
}

fn count_of(entries: &[CartEntry]) -> u64 {
    entries.iter().map(|entry| u64::from(entry.quantity)).sum()
}

async fn load_entries(store: &dyn KeyValueStore) -> Vec<CartEntry> {
    let raw = match store.get(CART_STORAGE_KEY).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(err) => {
            warn!("cart: failed to load cart error={err:#}");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<CartEntry>>(&raw) {
        Ok(entries) => normalize(entries),
        Err(err) => {
            warn!("cart: discarding unreadable persisted cart error={err}");
            Vec::new()
        }
    }
}

/// Re-establishes the one-line-per-product and positive-quantity rules on
/// data that came from disk.
fn normalize(entries: Vec<CartEntry>) -> Vec<CartEntry> {
    let mut normalized: Vec<CartEntry> = Vec::with_capacity(entries.len());
    for entry in entries.into_iter().filter(|entry| entry.quantity > 0) {
        match normalized
            .iter_mut()
            .find(|existing| existing.product_id == entry.product_id)
        {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(entry.quantity),
            None => normalized.push(entry),
        }
    }
    normalized
}

async fn run_persistence(
    store: Arc<dyn KeyValueStore>,
    mut commands: mpsc::UnboundedReceiver<PersistCommand>,
) {
    while let Some(command) = commands.recv().await {
        let mut latest = match command {
            PersistCommand::Write(json) => json,
            PersistCommand::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };

        // Only the newest queued state needs to reach storage.
        let mut pending_flush = None;
        while let Ok(next) = commands.try_recv() {
            match next {
                PersistCommand::Write(json) => latest = json,
                PersistCommand::Flush(done) => {
                    pending_flush = Some(done);
                    break;
                }
            }
        }

        if let Err(err) = store.set(CART_STORAGE_KEY, &latest).await {
            warn!("cart: failed to persist cart error={err:#}");
        }
        if let Some(done) = pending_flush {
            let _ = done.send(());
        }
    }
    debug!("cart: persistence worker finished");
}

#[cfg(test)]
#[path = "tests/cart_tests.rs"]
mod tests;
