//! # stockline-db: Database Layer for Stockline
//!
//! Runs the channel stock lifecycle against SQLite through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockline Data Flow                              │
//! │                                                                         │
//! │  Back office / POS handler (out of scope)                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 stockline-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ ChannelRepo    │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ StockRequest.. │    │ 001_initial_ │  │   │
//! │  │   │ WAL + busy    │    │ LedgerRepo     │    │   schema.sql │  │   │
//! │  │   │   timeout     │    │ SaleRepo       │    │              │  │   │
//! │  │   │               │    │ CloseOutRepo   │    │              │  │   │
//! │  │   │               │    │ EventRepo      │    │              │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  │                              │                                  │   │
//! │  │                              ▼                                  │   │
//! │  │                stockline-core (rules, tables, types)           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   $STOCKLINE_DB_PATH (default ./stockline.db)                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Environment-driven runtime configuration
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - One repository per aggregate
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockline_db::{Database, StocklineConfig};
//!
//! let db = Database::new(StocklineConfig::load()?.into_db_config()).await?;
//!
//! let (channel, initial) = db.channels().create(&new_channel).await?;
//! db.channels().approve(&channel.id).await?;
//! let sale = db.sales().create(&basket).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ConfigError, StocklineConfig};
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::channel::ChannelRepository;
pub use repository::closeout::CloseOutRepository;
pub use repository::events::EventRepository;
pub use repository::ledger::{LedgerRepository, LedgerTotals};
pub use repository::sale::SaleRepository;
pub use repository::stock_request::{ReceivingSummary, StockRequestRepository};
