//! EUR/USD reference rate lookup.
//!
//! The Finanzamt accepts the ECB daily reference rate as the
//! authoritative EUR/USD rate for crypto tax. Rates are quoted as USD
//! per 1 EUR; converting USD to EUR divides by the rate. The ECB only
//! publishes on business days, so weekend and holiday lookups fall back
//! to the most recent preceding business day.
//!
//! Fetching the rates is a collaborator concern; the engine consumes
//! this trait and is wired with a table (preloaded at startup or from a
//! backtest file) or a fixed rate.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::error::{Result, TaxError};

/// Rate lookup seam. `rate_for` returns USD per 1 EUR valid on the
/// given UTC date.
pub trait EurUsdRates: Send + Sync {
    fn rate_for(&self, date: NaiveDate) -> Result<Decimal>;
}

/// Date-keyed rate table with previous-business-day fallback.
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    rates: BTreeMap<NaiveDate, Decimal>,
}

impl RateTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, date: NaiveDate, rate: Decimal) {
        self.rates.insert(date, rate);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

impl FromIterator<(NaiveDate, Decimal)> for RateTable {
    fn from_iter<T: IntoIterator<Item = (NaiveDate, Decimal)>>(iter: T) -> Self {
        Self {
            rates: iter.into_iter().collect(),
        }
    }
}

impl EurUsdRates for RateTable {
    fn rate_for(&self, date: NaiveDate) -> Result<Decimal> {
        // Most recent published rate on or before the date covers
        // weekends and holidays in one range lookup.
        self.rates
            .range(..=date)
            .next_back()
            .map(|(_, rate)| *rate)
            .ok_or(TaxError::RateUnavailable(date))
    }
}

/// Constant rate, used in tests and paper trading.
#[derive(Debug, Clone, Copy)]
pub struct FixedRate(pub Decimal);

impl EurUsdRates for FixedRate {
    fn rate_for(&self, _date: NaiveDate) -> Result<Decimal> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_exact_date_hit() {
        let table: RateTable = [(d("2025-06-06"), dec!(1.0810))].into_iter().collect();
        assert_eq!(table.rate_for(d("2025-06-06")).unwrap(), dec!(1.0810));
    }

    #[test]
    fn test_weekend_falls_back_to_friday() {
        let table: RateTable = [
            (d("2025-06-05"), dec!(1.0795)),
            (d("2025-06-06"), dec!(1.0810)),
        ]
        .into_iter()
        .collect();
        // Saturday and Sunday both resolve to Friday's rate.
        assert_eq!(table.rate_for(d("2025-06-07")).unwrap(), dec!(1.0810));
        assert_eq!(table.rate_for(d("2025-06-08")).unwrap(), dec!(1.0810));
    }

    #[test]
    fn test_no_rate_before_first_entry() {
        let table: RateTable = [(d("2025-06-06"), dec!(1.0810))].into_iter().collect();
        assert!(matches!(
            table.rate_for(d("2025-06-01")),
            Err(TaxError::RateUnavailable(_))
        ));
    }

    #[test]
    fn test_fixed_rate() {
        let fixed = FixedRate(dec!(1.10));
        assert_eq!(fixed.rate_for(d("2025-01-01")).unwrap(), dec!(1.10));
    }
}
