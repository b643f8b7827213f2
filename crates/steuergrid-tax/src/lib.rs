//! German §23 EStG tax ledger for BTC spot trading.
//!
//! Every purchase becomes a [`TaxLot`]; every sale consumes lots in FIFO
//! order (oldest first, per BMF 10.05.2022) and produces [`Disposal`]
//! records with EUR cost basis. Lots held at least one year are tax-free
//! (Haltefrist), and realized gains up to the annual Freigrenze of
//! EUR 1,000 stay exempt — but the Freigrenze is all-or-nothing: crossing
//! it by a cent makes the entire year's gains taxable.
//!
//! The [`TaxAgent`] turns these rules into a veto gate the strategy
//! consults before every sell.

pub mod agent;
pub mod error;
pub mod ledger;
pub mod rates;
pub mod report;
pub mod store;

pub use agent::{HarvestRecommendation, SellEvaluation, TaxAgent, TaxAgentConfig};
pub use error::{Result, TaxError};
pub use ledger::{BuyFill, Disposal, FifoLedger, LotStatus, SellFill, TaxLot, HOLDING_PERIOD_DAYS};
pub use rates::{EurUsdRates, FixedRate, RateTable};
pub use report::{AnnualSummary, DisposalRow, TaxReport};
pub use store::{JsonLedgerStore, LedgerDocument, LedgerStore, LEDGER_VERSION};
