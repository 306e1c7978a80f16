//! Pivot-relative exchange rate table.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ratewire_common::Currency;
use tracing::warn;

use crate::error::{RateError, RateResult};
use crate::provider::RateQuotes;

/// Exchange rates relative to a single pivot currency.
///
/// One unit of the pivot buys `rate[c]` units of `c`. The pivot's own rate
/// is always 1.0 and every rate is strictly positive and finite. A table is
/// immutable once built; refreshes publish a new table.
#[derive(Debug, Clone)]
pub struct RateTable {
    pivot: Currency,
    rates: HashMap<Currency, f64>,
    generation: u64,
    refreshed_at: DateTime<Utc>,
}

impl RateTable {
    /// Build a table, validating every rate.
    ///
    /// The pivot is inserted at 1.0 if missing; a pivot present at any
    /// other value is rejected.
    pub fn new(pivot: Currency, mut rates: HashMap<Currency, f64>) -> RateResult<Self> {
        for (&currency, &rate) in &rates {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(RateError::InvalidRate { currency, rate });
            }
        }

        match rates.get(&pivot) {
            Some(&rate) if rate != 1.0 => {
                return Err(RateError::ProviderMalformed(format!(
                    "pivot {} quoted at {} instead of 1",
                    pivot, rate
                )));
            }
            Some(_) => {}
            None => {
                rates.insert(pivot, 1.0);
            }
        }

        Ok(Self {
            pivot,
            rates,
            generation: 0,
            refreshed_at: Utc::now(),
        })
    }

    /// A table holding only the pivot.
    pub fn empty(pivot: Currency) -> Self {
        Self {
            pivot,
            rates: HashMap::from([(pivot, 1.0)]),
            generation: 0,
            refreshed_at: Utc::now(),
        }
    }

    /// Build a table from untrusted provider output.
    ///
    /// Codes outside the supported set are dropped with a warning; an
    /// unsupported pivot or an invalid rate rejects the whole table.
    pub fn from_quotes(quotes: &RateQuotes) -> RateResult<Self> {
        let pivot: Currency = quotes.base.parse().map_err(|_| {
            RateError::ProviderMalformed(format!("unsupported pivot currency {:?}", quotes.base))
        })?;

        if quotes.rates.is_empty() {
            return Err(RateError::ProviderMalformed("no rates in response".to_string()));
        }

        let mut rates = HashMap::with_capacity(quotes.rates.len() + 1);
        for (code, &rate) in &quotes.rates {
            match code.parse::<Currency>() {
                Ok(currency) => {
                    rates.insert(currency, rate);
                }
                Err(_) => warn!(code = %code, "Ignoring unsupported currency from provider"),
            }
        }

        if !rates.keys().any(|&currency| currency != pivot) {
            return Err(RateError::ProviderMalformed(format!(
                "no supported currencies quoted against {}",
                pivot
            )));
        }

        Self::new(pivot, rates)
    }

    /// Re-express the table against another pivot already in the table.
    pub fn rebased(&self, pivot: Currency) -> RateResult<Self> {
        if pivot == self.pivot {
            return Ok(self.clone());
        }

        let divisor = self.rate_for(pivot).ok_or(RateError::UnknownCurrency(pivot))?;
        let rates = self
            .rates
            .iter()
            .map(|(&currency, &rate)| {
                let rebased = if currency == pivot { 1.0 } else { rate / divisor };
                (currency, rebased)
            })
            .collect();

        let mut table = Self::new(pivot, rates)?;
        table.generation = self.generation;
        table.refreshed_at = self.refreshed_at;
        Ok(table)
    }

    /// Rate converting one unit of `base` into `destination`.
    pub fn get(&self, base: Currency, destination: Currency) -> RateResult<f64> {
        if base == destination {
            return Ok(1.0);
        }

        let base_rate = self.rate_for(base).ok_or(RateError::UnknownCurrency(base))?;
        let destination_rate = self
            .rate_for(destination)
            .ok_or(RateError::UnknownCurrency(destination))?;

        Ok(destination_rate / base_rate)
    }

    /// Pivot-relative rate of a single currency.
    pub fn rate_for(&self, currency: Currency) -> Option<f64> {
        self.rates.get(&currency).copied()
    }

    /// Quoted currencies in code order.
    pub fn currencies(&self) -> Vec<Currency> {
        let mut currencies: Vec<Currency> = self.rates.keys().copied().collect();
        currencies.sort_by_key(|c| c.code());
        currencies
    }

    /// Check whether `self` differs from `previous` by more than
    /// `min_change_ratio` in any rate, or quotes a different currency set.
    pub fn differs_from(&self, previous: &RateTable, min_change_ratio: f64) -> bool {
        if self.pivot != previous.pivot || self.rates.len() != previous.rates.len() {
            return true;
        }

        self.rates.iter().any(|(currency, &rate)| match previous.rates.get(currency) {
            Some(&old) => ((rate - old) / old).abs() > min_change_ratio,
            None => true,
        })
    }

    pub fn pivot(&self) -> Currency {
        self.pivot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.refreshed_at
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }
}
