//! Currency codes supported by Ratewire.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// ISO 4217 currency code from the closed reference set.
///
/// The set matches the currencies published in the ECB reference rate
/// feed. Anything outside it is rejected when parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Eur,
    Usd,
    Jpy,
    Bgn,
    Czk,
    Dkk,
    Gbp,
    Huf,
    Pln,
    Ron,
    Sek,
    Chf,
    Isk,
    Nok,
    Hrk,
    Rub,
    Try,
    Aud,
    Brl,
    Cad,
    Cny,
    Hkd,
    Idr,
    Ils,
    Inr,
    Krw,
    Mxn,
    Myr,
    Nzd,
    Php,
    Sgd,
    Thb,
    Zar,
}

impl Currency {
    /// Every supported currency, in feed order.
    pub const ALL: [Currency; 33] = [
        Currency::Eur,
        Currency::Usd,
        Currency::Jpy,
        Currency::Bgn,
        Currency::Czk,
        Currency::Dkk,
        Currency::Gbp,
        Currency::Huf,
        Currency::Pln,
        Currency::Ron,
        Currency::Sek,
        Currency::Chf,
        Currency::Isk,
        Currency::Nok,
        Currency::Hrk,
        Currency::Rub,
        Currency::Try,
        Currency::Aud,
        Currency::Brl,
        Currency::Cad,
        Currency::Cny,
        Currency::Hkd,
        Currency::Idr,
        Currency::Ils,
        Currency::Inr,
        Currency::Krw,
        Currency::Mxn,
        Currency::Myr,
        Currency::Nzd,
        Currency::Php,
        Currency::Sgd,
        Currency::Thb,
        Currency::Zar,
    ];

    /// Get the three-letter currency code.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
            Currency::Jpy => "JPY",
            Currency::Bgn => "BGN",
            Currency::Czk => "CZK",
            Currency::Dkk => "DKK",
            Currency::Gbp => "GBP",
            Currency::Huf => "HUF",
            Currency::Pln => "PLN",
            Currency::Ron => "RON",
            Currency::Sek => "SEK",
            Currency::Chf => "CHF",
            Currency::Isk => "ISK",
            Currency::Nok => "NOK",
            Currency::Hrk => "HRK",
            Currency::Rub => "RUB",
            Currency::Try => "TRY",
            Currency::Aud => "AUD",
            Currency::Brl => "BRL",
            Currency::Cad => "CAD",
            Currency::Cny => "CNY",
            Currency::Hkd => "HKD",
            Currency::Idr => "IDR",
            Currency::Ils => "ILS",
            Currency::Inr => "INR",
            Currency::Krw => "KRW",
            Currency::Mxn => "MXN",
            Currency::Myr => "MYR",
            Currency::Nzd => "NZD",
            Currency::Php => "PHP",
            Currency::Sgd => "SGD",
            Currency::Thb => "THB",
            Currency::Zar => "ZAR",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error returned when text is not a supported currency code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported currency code: {0:?}")]
pub struct ParseCurrencyError(pub String);

impl FromStr for Currency {
    type Err = ParseCurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        Currency::ALL
            .iter()
            .copied()
            .find(|c| c.code() == code)
            .ok_or_else(|| ParseCurrencyError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("eur".parse::<Currency>().unwrap(), Currency::Eur);
        assert_eq!(" GBP ".parse::<Currency>().unwrap(), Currency::Gbp);
    }

    #[test]
    fn test_parse_unknown() {
        let err = "XYZ".parse::<Currency>().unwrap_err();
        assert_eq!(err, ParseCurrencyError("XYZ".to_string()));
    }

    #[test]
    fn test_codes_round_trip() {
        for currency in Currency::ALL {
            assert_eq!(currency.code().parse::<Currency>().unwrap(), currency);
        }
    }

    #[test]
    fn test_serde_uses_code() {
        let json = serde_json::to_string(&Currency::Usd).unwrap();
        assert_eq!(json, "\"USD\"");
        let parsed: Currency = serde_json::from_str("\"JPY\"").unwrap();
        assert_eq!(parsed, Currency::Jpy);
    }
}
