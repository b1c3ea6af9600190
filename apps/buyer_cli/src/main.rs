mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    ApiClient, CartStore, CheckoutError, CheckoutFlow, ClientEvent, TransactionApi,
    DEFAULT_FEED_LIMIT,
};
use rust_decimal::Decimal;
use shared::domain::{BuyerIdentity, Product, ProductId, ShippingInfo, TransactionId};
use storage::{KeyValueStore, Storage};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{load_settings, normalize_database_url, Settings};

#[derive(Parser, Debug)]
#[command(name = "buyer", about = "Browse the mandi catalog, keep a cart and check out")]
struct Args {
    /// TOML settings file; `buyer.toml` is read when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ping the backend.
    Health,
    /// List the catalog.
    Products {
        #[arg(long)]
        search: Option<String>,
        /// Show the short feed instead of the whole catalog.
        #[arg(long)]
        feed: bool,
        #[arg(long, default_value_t = DEFAULT_FEED_LIMIT)]
        limit: u32,
    },
    #[command(subcommand)]
    Cart(CartCommand),
    /// Run create-flow, select, init and confirm for the current cart.
    Checkout {
        #[arg(long)]
        name: String,
        #[arg(long)]
        address: String,
        #[arg(long)]
        phone: String,
        /// Confirm this amount instead of the cart total.
        #[arg(long)]
        total: Option<Decimal>,
    },
    /// Fetch the remote status of a transaction.
    Status { transaction_id: String },
}

#[derive(Subcommand, Debug)]
enum CartCommand {
    Show,
    Add {
        product_id: String,
        #[arg(long, default_value_t = 1)]
        qty: u32,
    },
    Remove {
        product_id: String,
    },
    Set {
        product_id: String,
        #[arg(allow_hyphen_values = true)]
        quantity: i64,
    },
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(api_url) = args.api_url {
        settings.api_url = api_url;
    }
    if let Some(database_url) = args.database_url {
        settings.database_url = database_url;
    }
    settings.database_url = normalize_database_url(&settings.database_url);

    let api = Arc::new(ApiClient::new(&settings.api_url)?);
    info!(api_url = %api.base_url(), "buyer: using backend");

    match args.command {
        Command::Health => {
            let body = api.health().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::Products {
            search,
            feed,
            limit,
        } => {
            let products = match search {
                Some(query) => api.search_products(&query).await?,
                None if feed => api.product_feed(limit).await?,
                None => api.list_products().await?,
            };
            print_products(&products);
        }
        Command::Cart(command) => {
            let cart = open_cart(&settings).await?;
            run_cart_command(&api, &cart, command).await?;
            print_cart(&cart);
            cart.flush().await;
        }
        Command::Checkout {
            name,
            address,
            phone,
            total,
        } => {
            let cart = open_cart(&settings).await?;
            let shipping = ShippingInfo::new(name, address, phone);
            let result = run_checkout(api, cart.clone(), &settings, shipping, total).await;
            cart.flush().await;
            result?;
        }
        Command::Status { transaction_id } => {
            let transaction_id = TransactionId::new(transaction_id);
            let body = api.status(&transaction_id).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

async fn open_cart(settings: &Settings) -> Result<Arc<CartStore>> {
    let storage = match Storage::new(&settings.database_url).await {
        Ok(storage) => storage,
        Err(err) => {
            let database_url = &settings.database_url;
            error!(%database_url, error = %err, "buyer: failed to open cart database");
            return Err(err);
        }
    };
    let store: Arc<dyn KeyValueStore> = Arc::new(storage);
    Ok(CartStore::hydrate(store).await)
}

async fn run_cart_command(api: &ApiClient, cart: &CartStore, command: CartCommand) -> Result<()> {
    match command {
        CartCommand::Show => {}
        CartCommand::Add { product_id, qty } => {
            let product_id = ProductId::new(product_id);
            let product = api
                .list_products()
                .await?
                .into_iter()
                .find(|product| product.id == product_id)
                .with_context(|| format!("no product with id '{product_id}'"))?;
            let in_cart = cart.quantity_of(&product.id).unwrap_or(0);
            if !product.has_stock_for(in_cart, qty) {
                bail!(
                    "only {} of '{}' in stock ({in_cart} already in cart)",
                    product.stock_quantity.unwrap_or(0),
                    product.name
                );
            }
            cart.add_to_cart(&product, qty);
        }
        CartCommand::Remove { product_id } => {
            cart.remove_from_cart(&ProductId::new(product_id));
        }
        CartCommand::Set {
            product_id,
            quantity,
        } => {
            cart.update_quantity(&ProductId::new(product_id), quantity);
        }
        CartCommand::Clear => cart.clear_cart(),
    }
    Ok(())
}

async fn run_checkout(
    api: Arc<ApiClient>,
    cart: Arc<CartStore>,
    settings: &Settings,
    shipping: ShippingInfo,
    total: Option<Decimal>,
) -> Result<()> {
    check_total_override(total)?;
    let buyer = BuyerIdentity::new(settings.buyer_id.clone(), settings.buyer_name.clone());
    let mut flow = match CheckoutFlow::new(api, cart, buyer) {
        Ok(flow) => flow,
        Err(CheckoutError::EmptyCart) => bail!("cart is empty; add products before checking out"),
        Err(err) => return Err(err.into()),
    };
    flow = flow.with_usecase_id(settings.usecase_id.clone());
    if let Some(total) = total {
        flow = flow.with_total_override(total);
    }

    let mut events = flow.subscribe_events();
    let reporter = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::CheckoutStepChanged { step } => println!("step: {step}"),
                ClientEvent::OrderPlaced {
                    transaction_id,
                    total_amount,
                } => println!("order placed: {transaction_id} (total {total_amount})"),
                ClientEvent::NavigateHome => break,
                ClientEvent::Error(message) => eprintln!("{message}"),
            }
        }
    });

    let outcome = async {
        let ids = flow.create_flow().await?;
        info!(transaction_id = %ids.transaction_id, "buyer: checkout flow created");
        flow.select().await?;
        flow.init(shipping).await?;
        flow.confirm().await
    }
    .await;

    // Dropping the flow closes the event channel so the reporter finishes.
    drop(flow);
    let _ = reporter.await;

    let receipt = outcome?;
    println!(
        "confirmed {} item(s), total {}, transaction {}",
        receipt.item_count, receipt.total_amount, receipt.transaction_id
    );
    Ok(())
}

fn check_total_override(total: Option<Decimal>) -> Result<()> {
    match total {
        Some(total) if total <= Decimal::ZERO => {
            bail!("--total must be greater than zero, got {total}")
        }
        _ => Ok(()),
    }
}

fn print_products(products: &[Product]) {
    if products.is_empty() {
        println!("no products");
        return;
    }
    for product in products {
        println!(
            "{:<12} {:<30} {:>10} {:>6} {}",
            product.id,
            product.name,
            product.price,
            product
                .stock_quantity
                .map(|stock| stock.to_string())
                .unwrap_or_else(|| "-".to_string()),
            product.category.as_deref().unwrap_or("-")
        );
    }
}

fn print_cart(cart: &CartStore) {
    let snapshot = cart.snapshot();
    if snapshot.is_empty() {
        println!("cart is empty");
        return;
    }
    for entry in snapshot.entries() {
        println!(
            "{:<12} {:<30} {:>4} x {:>10} = {:>10}",
            entry.product_id,
            entry.name,
            entry.quantity,
            entry.unit_price,
            entry.line_total()
        );
    }
    println!("{} item(s), total {}", snapshot.count(), snapshot.total());
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
