//! # Seed Data Generator
//!
//! Populates a development database with a catalog, a few stores, some
//! warehouse receipts and a handful of sales so every report has data.
//!
//! ## Usage
//! ```bash
//! # Defaults: ./stockbook_dev.db, 3 stores
//! cargo run -p stockbook-db --bin seed
//!
//! cargo run -p stockbook-db --bin seed -- --stores 5 --db ./data/stockbook.db
//! ```
//!
//! Set `RUST_LOG=stockbook_db=debug` to watch every engine call.

use std::env;

use stockbook_core::{CheckoutLine, CheckoutRequest, DateRange, Money, NewProduct, RestockRequest};
use stockbook_db::{Database, DbConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// (name, cost, price, restock hint)
const CATALOG: &[(&str, i64, i64, i64)] = &[
    ("Desk Lamp", 3000, 5000, 10),
    ("Office Chair", 42000, 69900, 4),
    ("Notebook A5", 150, 399, 50),
    ("Ballpoint Pen (10)", 220, 599, 40),
    ("Monitor Stand", 1800, 3499, 8),
    ("USB-C Cable", 300, 1299, 30),
    ("Whiteboard", 5200, 8999, 3),
    ("Stapler", 450, 1199, 12),
];

const STORE_NAMES: &[&str] = &["Downtown", "Harbor", "Airport", "Mall", "University"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let mut stores: usize = 3;
    let mut db_path = String::from("./stockbook_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--stores" | "-s" => {
                if i + 1 < args.len() {
                    stores = args[i + 1].parse().unwrap_or(3);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Stockbook Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -s, --stores <N>   Number of stores to create (default: 3, max: 5)");
                println!("  -d, --db <PATH>    Database file path (default: ./stockbook_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }
    let stores = stores.clamp(1, STORE_NAMES.len());

    let db = Database::new(DbConfig::new(&db_path)).await?;
    info!(path = %db_path, "Connected, migrations applied");

    if !db.catalog().list_products().await?.is_empty() {
        warn!("Database already has products, skipping seed. Delete the file to regenerate.");
        return Ok(());
    }

    // Catalog with zero opening stock; receipts below fill the warehouse.
    let rows: Vec<NewProduct> = CATALOG
        .iter()
        .map(|&(name, cost, price, restock_qty)| NewProduct {
            name: name.to_string(),
            cost: Money::from_cents(cost),
            price: Money::from_cents(price),
            warehouse_stock: 0,
            restock_qty,
        })
        .collect();
    let report = db.catalog().import_products(&rows).await?;
    info!(created = report.created, "Catalog imported");

    let products = db.catalog().list_products().await?;
    for (idx, product) in products.iter().enumerate() {
        let addition = db
            .stock()
            .receive_into_warehouse(&RestockRequest {
                product_id: product.id,
                qty: 60 + (idx as i64 * 7) % 30,
                cost: product.cost,
                price: product.price,
                received_by: "seed".into(),
            })
            .await?;
        info!(reference = %addition.reference, product = %product.name, qty = addition.qty, "Received");
    }

    for (s, name) in STORE_NAMES.iter().take(stores).enumerate() {
        let store = db.catalog().get_or_create_store(name).await?;
        for (p, product) in products.iter().enumerate() {
            let qty = 3 + ((s * 5 + p * 3) % 8) as i64;
            db.stock().move_warehouse_to_store(product.id, store.id, qty).await?;
        }

        // A couple of sales per store so the ledger and reports are populated.
        for round in 0..2usize {
            let lines = products
                .iter()
                .enumerate()
                .filter(|(p, _)| (p + s + round) % 3 == 0)
                .map(|(_, product)| CheckoutLine {
                    product_id: product.id,
                    qty: 1 + (round as i64),
                })
                .collect();
            let sale = db
                .checkout()
                .checkout(&CheckoutRequest {
                    transaction_id: None,
                    store_name: name.to_string(),
                    lines,
                })
                .await?;
            info!(store = %name, transaction_id = sale.transaction_id, total = %sale.total, "Sale rung up");
        }
    }

    let tb = db.reports().trial_balance(DateRange::all_time()).await?;
    let pnl = db.reports().profit_and_loss(DateRange::all_time()).await?;
    info!(
        balanced = tb.is_balanced,
        revenue = %pnl.total_revenue,
        net_income = %pnl.net_income,
        "Seed complete"
    );

    Ok(())
}
