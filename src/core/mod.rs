//! Core business logic abstractions

pub mod cache;
pub mod config;
pub mod holdings;
pub mod instrument;
pub mod ledger;
pub mod log;
pub mod nav;
pub mod quotes;
pub mod returns;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod valuation;

// Re-export main types for cleaner imports
pub use instrument::{Instrument, MasterList};
pub use ledger::{HoldingsRecord, Transaction, TransactionKind, TransactionLedger};
pub use nav::NavPoint;
pub use quotes::{NavHistorySource, QuoteStore};
pub use snapshot::{HoldingSnapshot, MonthlyReturn, PortfolioSnapshot, SnapshotRepository};
pub use sync::{NavSynchronizer, SyncOutcome, SyncSummary};
pub use valuation::{BatchSummary, Discrepancy, Valuation, ValuationEngine};
