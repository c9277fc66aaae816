//! Conversion between wire amounts and backend-native units.
//!
//! Amounts exchanged with peers and the order book always carry 8 decimal
//! places (satoshi precision). Each backend settles in its own smallest unit,
//! e.g. wei for ether or 6-decimal units for a stablecoin token, so every leg
//! is converted before it reaches an adapter.

use crate::config::CurrencySettings;
use std::collections::HashMap;

/// Decimal places of an amount on the wire.
pub const WIRE_DECIMALS: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("no decimal precision configured for currency {0}")]
    UnknownCurrency(String),
    #[error("converting {value} for currency {currency} overflows")]
    Overflow { currency: String, value: u128 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scale {
    /// Backend units are finer than wire amounts by this factor.
    Finer(u128),
    /// Backend units are coarser than wire amounts by this factor.
    Coarser(u128),
}

#[derive(Debug, Clone, Default)]
pub struct UnitConverter {
    scales: HashMap<String, Scale>,
}

impl UnitConverter {
    pub fn new<'a>(currencies: impl IntoIterator<Item = &'a CurrencySettings>) -> Self {
        let scales = currencies
            .into_iter()
            .map(|currency| (currency.id.clone(), scale(currency.decimal_places)))
            .collect();

        Self { scales }
    }

    pub fn from_decimals<S: Into<String>>(decimals: impl IntoIterator<Item = (S, u32)>) -> Self {
        let scales = decimals
            .into_iter()
            .map(|(id, decimals)| (id.into(), scale(decimals)))
            .collect();

        Self { scales }
    }

    pub fn amount_to_units(&self, currency: &str, amount: u64) -> Result<u128, Error> {
        let amount = u128::from(amount);
        match self.scale(currency)? {
            Scale::Finer(factor) => amount.checked_mul(factor).ok_or_else(|| Error::Overflow {
                currency: currency.to_owned(),
                value: amount,
            }),
            Scale::Coarser(factor) => Ok(amount / factor),
        }
    }

    pub fn units_to_amount(&self, currency: &str, units: u128) -> Result<u64, Error> {
        let amount = match self.scale(currency)? {
            Scale::Finer(factor) => Some(units / factor),
            Scale::Coarser(factor) => units.checked_mul(factor),
        };

        amount
            .and_then(|amount| u64::try_from(amount).ok())
            .ok_or_else(|| Error::Overflow {
                currency: currency.to_owned(),
                value: units,
            })
    }

    pub fn is_configured(&self, currency: &str) -> bool {
        self.scales.contains_key(currency)
    }

    fn scale(&self, currency: &str) -> Result<Scale, Error> {
        self.scales
            .get(currency)
            .copied()
            .ok_or_else(|| Error::UnknownCurrency(currency.to_owned()))
    }
}

fn scale(decimals: u32) -> Scale {
    if decimals >= WIRE_DECIMALS {
        Scale::Finer(10u128.pow(decimals - WIRE_DECIMALS))
    } else {
        Scale::Coarser(10u128.pow(WIRE_DECIMALS - decimals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{quickcheck, TestResult};
    use spectral::prelude::*;

    fn converter() -> UnitConverter {
        UnitConverter::from_decimals(vec![("BTC", 8), ("ETH", 18), ("USDT", 6)])
    }

    #[test]
    fn ether_amounts_are_scaled_to_wei() {
        let converter = converter();

        assert_eq!(converter.amount_to_units("ETH", 1), Ok(10_000_000_000));
        assert_eq!(converter.units_to_amount("ETH", 25_000_000_000), Ok(2));
    }

    #[test]
    fn coarse_tokens_drop_sub_unit_precision() {
        let converter = converter();

        assert_eq!(converter.amount_to_units("USDT", 12_345), Ok(123));
        assert_eq!(converter.units_to_amount("USDT", 123), Ok(12_300));
    }

    #[test]
    fn unknown_currency_is_rejected() {
        let converter = converter();

        assert_eq!(
            converter.amount_to_units("LTC", 1),
            Err(Error::UnknownCurrency("LTC".to_owned()))
        );
        assert_that(&converter.is_configured("LTC")).is_false();
    }

    #[test]
    fn amount_that_does_not_fit_the_wire_overflows() {
        let converter = converter();

        let result = converter.units_to_amount("USDT", u128::from(u64::MAX));

        assert_that(&result).is_err();
    }

    #[test]
    fn units_round_trip_for_coarse_and_equal_precision() {
        fn prop(units: u32) -> bool {
            let converter = converter();
            let units = u128::from(units);

            ["BTC", "USDT"].iter().all(|currency| {
                let amount = converter.units_to_amount(currency, units).unwrap();
                converter.amount_to_units(currency, amount).unwrap() == units
            })
        }

        quickcheck(prop as fn(u32) -> bool);
    }

    #[test]
    fn representable_wei_amounts_round_trip() {
        fn prop(amount: u64) -> TestResult {
            let converter = converter();
            let units = match converter.amount_to_units("ETH", amount) {
                Ok(units) => units,
                Err(_) => return TestResult::discard(),
            };

            let back = converter.units_to_amount("ETH", units).unwrap();
            TestResult::from_bool(back == amount)
        }

        quickcheck(prop as fn(u64) -> TestResult);
    }
}
