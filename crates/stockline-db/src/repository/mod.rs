//! # Repository Module
//!
//! Database repositories for Stockline.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Database                                                              │
//! │  ├── channels()   ChannelRepository       channel lifecycle, returns   │
//! │  ├── requests()   StockRequestRepository  warehouse pipeline           │
//! │  ├── ledger()     LedgerRepository        received / sold / remaining  │
//! │  ├── sales()      SaleRepository          POS sales, cancellation      │
//! │  ├── closeouts()  CloseOutRepository      end-of-channel reconciliation│
//! │  └── events()     EventRepository         outbox, status history       │
//! │       │                                                                 │
//! │       │  each mutating call = one SQLite transaction                    │
//! │       ▼                                                                 │
//! │  pub(crate) helpers taking &mut SqliteConnection                       │
//! │  (transition_channel, transition_request, ledger::credit, try_debit,   │
//! │   reverse, record_event) compose inside that transaction               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod channel;
pub mod closeout;
pub mod events;
pub mod ledger;
pub mod sale;
pub mod stock_request;
