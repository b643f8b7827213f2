//! Precision-safe decimal types for trading.
//!
//! Uses `rust_decimal` for exact decimal arithmetic, avoiding
//! floating-point rounding errors in money calculations. Two scales
//! coexist: USD to 2 decimals for notionals, BTC to 8 decimals for
//! quantities. Floating point is confined to the volatility/momentum
//! estimators; their outputs are converted back to `Decimal` basis
//! points before they can touch a price.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

/// Venue price tick for XBT/USD.
pub const USD_TICK: Decimal = dec!(0.1);

/// Smallest BTC quantity increment (1 satoshi).
pub const BTC_LOT_STEP: Decimal = dec!(0.00000001);

/// Price with exact decimal precision.
///
/// Wraps `Decimal` to provide type safety and prevent mixing
/// prices with quantities in calculations.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Round down to the tick grid. Used for buy prices so a skewed
    /// quote can never cross the book under post-only.
    #[inline]
    pub fn floor_to_tick(&self, tick: Decimal) -> Self {
        if tick.is_zero() {
            return *self;
        }
        Self((self.0 / tick).floor() * tick)
    }

    /// Round up to the tick grid. Used for sell prices.
    #[inline]
    pub fn ceil_to_tick(&self, tick: Decimal) -> Self {
        if tick.is_zero() {
            return *self;
        }
        Self((self.0 / tick).ceil() * tick)
    }

    /// Basis points difference from another price.
    #[inline]
    pub fn bps_from(&self, other: Price) -> Option<Decimal> {
        if other.is_zero() {
            return None;
        }
        Some((self.0 - other.0) / other.0 * Decimal::from(10_000))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Price {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Price {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

/// BTC quantity with exact decimal precision.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Qty(pub Decimal);

impl Qty {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Round down to the lot step. Quantities are never rounded up —
    /// an over-sized sell could outrun the ledger.
    #[inline]
    pub fn floor_to_lot(&self, lot: Decimal) -> Self {
        if lot.is_zero() {
            return *self;
        }
        Self((self.0 / lot).floor() * lot)
    }

    /// Notional value in USD: qty * price.
    #[inline]
    pub fn notional(&self, price: Price) -> Decimal {
        self.0 * price.0
    }

    #[inline]
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Qty {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Qty {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Qty {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Qty {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Qty {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_bps() {
        let p1 = Price::new(dec!(100));
        let p2 = Price::new(dec!(101));

        let bps = p2.bps_from(p1).unwrap();
        assert_eq!(bps, dec!(100)); // 1% = 100 bps
    }

    #[test]
    fn test_price_floor_to_tick() {
        let price = Price::new(dec!(49999.97));
        assert_eq!(price.floor_to_tick(USD_TICK).inner(), dec!(49999.9));
    }

    #[test]
    fn test_price_ceil_to_tick() {
        let price = Price::new(dec!(50000.01));
        assert_eq!(price.ceil_to_tick(USD_TICK).inner(), dec!(50000.1));
    }

    #[test]
    fn test_on_grid_price_unchanged() {
        let price = Price::new(dec!(50000.1));
        assert_eq!(price.floor_to_tick(USD_TICK), price);
        assert_eq!(price.ceil_to_tick(USD_TICK), price);
    }

    #[test]
    fn test_qty_floor_to_lot() {
        let qty = Qty::new(dec!(0.012345678901));
        assert_eq!(qty.floor_to_lot(BTC_LOT_STEP).inner(), dec!(0.01234567));
    }

    #[test]
    fn test_notional() {
        let qty = Qty::new(dec!(0.01));
        let price = Price::new(dec!(50000));
        assert_eq!(qty.notional(price), dec!(500));
    }
}
