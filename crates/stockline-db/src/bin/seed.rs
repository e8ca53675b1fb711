//! # Demo Channel Seeder
//!
//! Drives one event channel through its whole life so a fresh database has
//! something to look at.
//!
//! ## Usage
//! ```bash
//! # Uses STOCKLINE_DB_PATH or ./stockline.db
//! cargo run -p stockline-db --bin seed
//!
//! # Specify database path
//! cargo run -p stockline-db --bin seed -- --db ./data/demo.db
//! ```
//!
//! ## What It Creates
//! - An event channel with two staff members
//! - Its INITIAL request, allocated across 3 SKUs and received (one short)
//! - A handful of sales, one of them cancelled
//! - A close-out with damaged and missing stock, and the return shipment

use chrono::{Duration, Utc};
use std::env;
use stockline_core::channel::{ChannelType, StaffAssignment};
use stockline_core::request::{compose_barcode, AllocationRow, ReceivingLine};
use stockline_core::sale::{Adjustment, SaleLine};
use stockline_core::{CloseOutInput, Money, NewChannel, NewSale};
use stockline_db::{Database, StocklineConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// (product code, color, size, packed, price in minor units)
const SKUS: &[(&str, &str, &str, i64, i64)] = &[
    ("TS01", "BLK", "M", 40, 39_000),
    ("TS01", "WHT", "L", 35, 39_000),
    ("CAP7", "NVY", "F", 25, 59_000),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = StocklineConfig::load()?;

    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    config.db_path = args[i + 1].clone().into();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Stockline demo seeder");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: $STOCKLINE_DB_PATH)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("🌱 Stockline Demo Seeder");
    println!("========================");
    println!("Database: {}", config.db_path.display());
    println!();

    let db = Database::new(config.into_db_config()).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    // ---------------------------------------------------------------------
    // Channel + INITIAL request
    // ---------------------------------------------------------------------
    let today = Utc::now().date_naive();
    let (channel, initial) = db
        .channels()
        .create(&NewChannel {
            channel_type: ChannelType::Event,
            name: "Weekend Pop-up".into(),
            location: "Central Plaza Atrium".into(),
            start_date: Some(today),
            end_date: Some(today + Duration::days(3)),
            staff: vec![
                StaffAssignment {
                    staff_id: "EMP-014".into(),
                    role: "lead".into(),
                },
                StaffAssignment {
                    staff_id: "EMP-022".into(),
                    role: "cashier".into(),
                },
            ],
            initial_quantity: 100,
            notes: "Demo data".into(),
            sales_target: Some(Money::from_major(150_000, 0)),
        })
        .await?;
    println!("✓ Channel {} created", channel.code);

    db.channels().submit(&channel.id).await?;
    db.channels().approve(&channel.id).await?;

    // ---------------------------------------------------------------------
    // Warehouse pipeline
    // ---------------------------------------------------------------------
    let rows: Vec<AllocationRow> = SKUS
        .iter()
        .map(|(code, color, size, packed, price)| AllocationRow {
            barcode: compose_barcode(code, color, size),
            size: size.to_string(),
            packed_quantity: *packed,
            unit_price: Money::from_cents(*price),
            product_ref: Some(code.to_string()),
        })
        .collect();

    db.requests().submit(&initial.id).await?;
    db.requests().approve(&initial.id).await?;
    let allocation = db.requests().upload_allocation(&initial.id, &rows).await?;
    println!(
        "✓ Allocated {} SKUs ({} warnings)",
        allocation.value.len(),
        allocation.warnings.len()
    );
    db.requests().pack(&initial.id).await?;
    db.requests()
        .create_shipment(&initial.id, "Kerry Express", "KEX-0001-DEMO")
        .await?;

    // One piece of the last SKU goes astray in transit.
    let lines: Vec<ReceivingLine> = rows
        .iter()
        .enumerate()
        .map(|(index, row)| ReceivingLine {
            barcode: row.barcode.clone(),
            allocated_qty: row.packed_quantity,
            received_qty: if index + 1 == rows.len() {
                row.packed_quantity - 1
            } else {
                row.packed_quantity
            },
        })
        .collect();
    let receiving = db.requests().confirm_receiving(&initial.id, &lines).await?;
    println!(
        "✓ Received {} pieces, channel active: {}",
        receiving.total_received,
        receiving.activated_channel.is_some()
    );

    // ---------------------------------------------------------------------
    // Sales
    // ---------------------------------------------------------------------
    let mut sold = 0;
    for (round, row) in rows.iter().cycle().take(6).enumerate() {
        let basket = NewSale::new(
            channel.id.clone(),
            vec![SaleLine::new(row.barcode.clone(), 2, row.unit_price)],
        );
        let basket = if round % 3 == 0 {
            basket.with_adjustment(Adjustment::new("Gift wrap", Money::from_cents(2_000)))
        } else {
            basket
        };
        let sale = db.sales().create(&basket).await?;
        info!(sale_number = %sale.sale.sale_number, "Seeded sale");
        sold += 1;

        if round == 4 {
            db.sales().cancel(&sale.sale.id, "Wrong size").await?;
        }
    }
    println!("✓ Rang up {} sales (1 cancelled)", sold);

    // ---------------------------------------------------------------------
    // Close-out and return
    // ---------------------------------------------------------------------
    let closeout = db
        .closeouts()
        .close_channel_stock(
            &channel.id,
            &[
                CloseOutInput::new(rows[0].barcode.clone(), 2, 1),
                CloseOutInput::new(rows[2].barcode.clone(), 0, 1),
            ],
        )
        .await?;
    let returned: i64 = closeout.value.iter().map(|e| e.returned).sum();
    println!("✓ Closed out, {} pieces going back", returned);

    db.channels()
        .ship_return(&channel.id, "Kerry Express", "KEX-0002-DEMO")
        .await?;
    db.channels().confirm_return(&channel.id).await?;

    let gaps = db.closeouts().verify_conservation(&channel.id).await?;
    let totals = db.ledger().totals(&channel.id).await?;
    println!();
    println!(
        "Ledger: received {} / sold {} / remaining {}",
        totals.received, totals.sold, totals.remaining
    );
    println!("Conservation gaps: {}", gaps.len());

    db.close().await;
    Ok(())
}
