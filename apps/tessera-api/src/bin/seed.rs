//! # Seed Data Generator
//!
//! Populates the widget table for local testing.
//!
//! ## Usage
//! ```bash
//! # Generate 1,000 widgets (default)
//! cargo run -p tessera-api --bin seed
//!
//! # Generate custom amount
//! cargo run -p tessera-api --bin seed -- --count 10000
//!
//! # Specify database path
//! cargo run -p tessera-api --bin seed -- --db ./data/tessera.db
//! ```
//!
//! Each widget gets a unique SKU `{FAMILY}-{INDEX:05}`, a size-suffixed name,
//! a price, a stock level and a couple of tags. Inserts go through the same
//! repository and counters the server uses.

use std::env;
use std::sync::Arc;
use std::time::Instant;

use tessera_api::resources::Widget;
use tessera_core::{GenericRecord, ListQuery, SchemaRegistry, Value};
use tessera_db::{scoped, Database, DbConfig, DbError};

/// Widget families and their base names.
const FAMILIES: &[(&str, &[&str])] = &[
    ("BLT", &["Hex Bolt", "Carriage Bolt", "Eye Bolt", "U-Bolt", "Anchor Bolt"]),
    ("NUT", &["Hex Nut", "Lock Nut", "Wing Nut", "Cap Nut", "Flange Nut"]),
    ("WSH", &["Flat Washer", "Spring Washer", "Fender Washer", "Tab Washer"]),
    ("GER", &["Spur Gear", "Bevel Gear", "Worm Gear", "Helical Gear", "Rack Gear"]),
    ("SPR", &["Compression Spring", "Torsion Spring", "Extension Spring"]),
];

const SIZES: &[&str] = &["M3", "M4", "M5", "M6", "M8", "M10", "M12"];

const TAGS: &[&str] = &["steel", "zinc", "brass", "nylon", "stainless"];

/// Rows per transaction.
const CHUNK_SIZE: usize = 500;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 1000;
    let mut db_path = String::from("./tessera_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(1000);
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
                println!("Tessera Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of widgets to generate (default: 1000)");
                println!("  -d, --db <PATH>    Database file path (default: ./tessera_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Tessera Seed Data Generator");
    println!("==============================");
    println!("Database: {}", db_path);
    println!("Widgets:  {}", count);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");

    let registry = SchemaRegistry::default();
    let schema = registry.describe::<Widget>()?;
    db.register_resource(&schema).await?;
    println!("✓ Widget table ready");

    let repo = db.repository(Arc::clone(&schema));
    let probe = ListQuery::from_query_string(&schema, "page_size=1");
    let existing = {
        let mut conn = db.pool().acquire().await?;
        repo.list(&mut conn, &probe).await?.total
    };
    if existing > 0 {
        println!("⚠ Database already has {} widgets", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    println!();
    println!("Generating widgets...");

    let start = Instant::now();
    let records: Vec<GenericRecord> = (0..count).map(generate_widget).collect();

    let mut generated = 0;
    for chunk in records.chunks(CHUNK_SIZE) {
        let chunk = chunk.to_vec();
        let repo = repo.clone();
        let created = scoped(&db, |scope| async move {
            let mut conn = scope.connection().await?;
            let created = repo.create_many(&mut conn, chunk).await?;
            Ok::<_, DbError>(created.len())
        })
        .await?;

        generated += created;
        println!("  Generated {} widgets...", generated);
    }

    let elapsed = start.elapsed();
    println!();
    println!("✓ Generated {} widgets in {:?}", generated, elapsed);
    println!(
        "  Rate: {:.0} widgets/second",
        generated as f64 / elapsed.as_secs_f64()
    );

    db.close().await;
    println!();
    println!("✓ Seed complete!");

    Ok(())
}

/// Builds one widget record from its index.
fn generate_widget(seed: usize) -> GenericRecord {
    let (family, names) = FAMILIES[seed % FAMILIES.len()];
    let name = names[(seed / FAMILIES.len()) % names.len()];
    let size = SIZES[seed % SIZES.len()];

    // 0.19 to 8.18
    let price = (19 + (seed * 37) % 800) as f64 / 100.0;
    let stock = (seed % 251) as i64;
    let tags = vec![
        Value::from(TAGS[seed % TAGS.len()]),
        Value::from(size.to_lowercase()),
    ];

    GenericRecord::new()
        .with("name", format!("{} {}", name, size))
        .with("sku", format!("{}-{:05}", family, seed))
        .with("price", price)
        .with("stock", stock)
        .with("active", seed % 10 != 0)
        .with("tags", Value::List(tags))
}
