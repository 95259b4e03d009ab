//! Fixed-precision money.
//!
//! All billing math routes through [`Money`]; nothing here touches floating
//! point. Amounts are `rust_decimal::Decimal` (28 significant digits) and
//! rounding is half-up (midpoint away from zero).

use core::fmt;
use core::str::FromStr;

use chrono::{Datelike, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value_object::ValueObject;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: Currency, right: Currency },

    #[error("division by zero")]
    DivisionByZero,

    #[error("invalid currency code: {0}")]
    InvalidCurrency(String),

    #[error("unsupported locale: {0}")]
    UnsupportedLocale(String),

    #[error("arithmetic overflow")]
    Overflow,

    #[error("invalid date range: {0}")]
    InvalidRange(String),
}

/// ISO-4217 alphabetic currency code.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    pub const USD: Currency = Currency(*b"USD");
    pub const EUR: Currency = Currency(*b"EUR");
    pub const GBP: Currency = Currency(*b"GBP");

    pub fn new(code: &str) -> Result<Self, MoneyError> {
        let code = code.trim();
        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_alphabetic) {
            return Err(MoneyError::InvalidCurrency(code.to_string()));
        }
        let mut out = [0u8; 3];
        for (slot, b) in out.iter_mut().zip(bytes) {
            *slot = b.to_ascii_uppercase();
        }
        Ok(Self(out))
    }

    pub fn as_str(&self) -> &str {
        // Only ASCII letters are ever stored.
        core::str::from_utf8(&self.0).unwrap_or("???")
    }

    fn symbol(&self, locale: Locale) -> Option<&'static str> {
        match (&self.0, locale) {
            (b"USD", Locale::EnGb) => Some("US$"),
            (b"USD", _) => Some("$"),
            (b"EUR", _) => Some("€"),
            (b"GBP", _) => Some("£"),
            _ => None,
        }
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::USD
    }
}

impl fmt::Debug for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Currency({})", self.as_str())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.as_str().to_string()
    }
}

impl ValueObject for Currency {}

/// Display locales supported by [`Money::format`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Locale {
    #[default]
    #[serde(rename = "en-US")]
    EnUs,
    #[serde(rename = "en-GB")]
    EnGb,
    #[serde(rename = "de-DE")]
    DeDe,
}

impl FromStr for Locale {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "en-US" | "en_US" => Ok(Self::EnUs),
            "en-GB" | "en_GB" => Ok(Self::EnGb),
            "de-DE" | "de_DE" => Ok(Self::DeDe),
            other => Err(MoneyError::UnsupportedLocale(other.to_string())),
        }
    }
}

/// Whether a tax rate is already contained in an amount.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaxMode {
    Inclusive,
    Exclusive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxBreakdown {
    pub tax: Money,
    pub total: Money,
}

/// A decimal amount tagged with its currency.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

impl ValueObject for Money {}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    fn ensure_same(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency,
                right: other.currency,
            });
        }
        Ok(())
    }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same(other)?;
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or(MoneyError::Overflow)?;
        Ok(Self::new(amount, self.currency))
    }

    pub fn sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same(other)?;
        let amount = self
            .amount
            .checked_sub(other.amount)
            .ok_or(MoneyError::Overflow)?;
        Ok(Self::new(amount, self.currency))
    }

    pub fn mul(&self, factor: Decimal) -> Result<Money, MoneyError> {
        let amount = self.amount.checked_mul(factor).ok_or(MoneyError::Overflow)?;
        Ok(Self::new(amount, self.currency))
    }

    pub fn div(&self, divisor: Decimal) -> Result<Money, MoneyError> {
        if divisor.is_zero() {
            return Err(MoneyError::DivisionByZero);
        }
        let amount = self.amount.checked_div(divisor).ok_or(MoneyError::Overflow)?;
        Ok(Self::new(amount, self.currency))
    }

    /// Round half-up to `dp` decimal places.
    pub fn round(&self, dp: u32) -> Money {
        Self::new(
            self.amount
                .round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero),
            self.currency,
        )
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn from_cents(cents: i64, currency: Currency) -> Self {
        Self::new(Decimal::new(cents, 2), currency)
    }

    pub fn to_cents(&self) -> Result<i64, MoneyError> {
        let cents = self
            .amount
            .checked_mul(Decimal::ONE_HUNDRED)
            .ok_or(MoneyError::Overflow)?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        i64::try_from(cents).map_err(|_| MoneyError::Overflow)
    }

    /// Sum amounts of a single currency. An empty input yields zero.
    pub fn sum<'a, I>(amounts: I, currency: Currency) -> Result<Money, MoneyError>
    where
        I: IntoIterator<Item = &'a Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::zero(currency), |acc, m| acc.add(m))
    }

    /// Split or add tax at `rate` (e.g. `0.2` for 20 %).
    pub fn tax(&self, rate: Decimal, mode: TaxMode) -> Result<TaxBreakdown, MoneyError> {
        match mode {
            TaxMode::Inclusive => {
                let net = self.div(Decimal::ONE + rate)?;
                Ok(TaxBreakdown {
                    tax: self.sub(&net)?,
                    total: *self,
                })
            }
            TaxMode::Exclusive => {
                let tax = self.mul(rate)?;
                Ok(TaxBreakdown {
                    total: self.add(&tax)?,
                    tax,
                })
            }
        }
    }

    /// Pro-rate a monthly amount over `start..=end`, using the length of
    /// `start`'s calendar month as the divisor.
    pub fn pro_rate_monthly(&self, start: NaiveDate, end: NaiveDate) -> Result<Money, MoneyError> {
        if start > end {
            return Err(MoneyError::InvalidRange(format!("{start} is after {end}")));
        }
        let days_in_month = days_in_month(start.year(), start.month())
            .ok_or_else(|| MoneyError::InvalidRange(format!("no month for {start}")))?;
        let billable = (end - start).num_days() + 1;
        self.div(Decimal::from(days_in_month))?
            .mul(Decimal::from(billable))
    }

    /// Locale-style currency display rounded to cents.
    pub fn format(&self, locale: Locale) -> String {
        let rounded = self
            .amount
            .abs()
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        let text = format!("{rounded:.2}");
        let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), "00"));

        let (group_sep, decimal_sep) = match locale {
            Locale::EnUs | Locale::EnGb => (',', '.'),
            Locale::DeDe => ('.', ','),
        };
        let digits = group_digits(int_part, group_sep);
        let sign = if self.is_negative() && !rounded.is_zero() {
            "-"
        } else {
            ""
        };

        match (locale, self.currency.symbol(locale)) {
            (Locale::DeDe, Some(sym)) => format!("{sign}{digits}{decimal_sep}{frac_part}\u{a0}{sym}"),
            (Locale::DeDe, None) => {
                format!("{sign}{digits}{decimal_sep}{frac_part}\u{a0}{}", self.currency)
            }
            (_, Some(sym)) => format!("{sign}{sym}{digits}{decimal_sep}{frac_part}"),
            (_, None) => format!("{sign}{}\u{a0}{digits}{decimal_sep}{frac_part}", self.currency),
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.amount, self.currency)
    }
}

fn group_digits(int_part: &str, sep: char) -> String {
    let len = int_part.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(ch);
    }
    out
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    u32::try_from((next - first).num_days()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn usd(amount: Decimal) -> Money {
        Money::new(amount, Currency::USD)
    }

    #[test]
    fn rounds_half_up() {
        assert_eq!(usd(dec!(10.005)).round(2).amount(), dec!(10.01));
        assert_eq!(usd(dec!(10.004)).round(2).amount(), dec!(10.00));
        assert_eq!(usd(dec!(-10.005)).round(2).amount(), dec!(-10.01));
    }

    #[test]
    fn mixed_currencies_are_rejected() {
        let err = usd(dec!(1)).add(&Money::new(dec!(1), Currency::EUR)).unwrap_err();
        assert_eq!(
            err,
            MoneyError::CurrencyMismatch {
                left: Currency::USD,
                right: Currency::EUR
            }
        );
    }

    #[test]
    fn division_by_zero_fails() {
        assert_eq!(usd(dec!(5)).div(Decimal::ZERO), Err(MoneyError::DivisionByZero));
    }

    #[test]
    fn cents_conversion() {
        let m = Money::from_cents(12_345, Currency::USD);
        assert_eq!(m.amount(), dec!(123.45));
        assert_eq!(usd(dec!(0.015)).to_cents().unwrap(), 2);
    }

    #[test]
    fn tax_inclusive_and_exclusive() {
        let exclusive = usd(dec!(100)).tax(dec!(0.2), TaxMode::Exclusive).unwrap();
        assert_eq!(exclusive.tax.amount(), dec!(20.0));
        assert_eq!(exclusive.total.amount(), dec!(120.0));

        let inclusive = usd(dec!(120)).tax(dec!(0.2), TaxMode::Inclusive).unwrap();
        assert_eq!(inclusive.tax.round(2).amount(), dec!(20.00));
        assert_eq!(inclusive.total.amount(), dec!(120));
    }

    #[test]
    fn pro_rates_over_days_of_start_month() {
        let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 2, 10).unwrap();
        let m = usd(dec!(290)).pro_rate_monthly(start, end).unwrap();
        assert_eq!(m.round(2).amount(), dec!(100.00));
        assert!(usd(dec!(1)).pro_rate_monthly(end, start).is_err());
    }

    #[test]
    fn sums_and_rejects_foreign_currency() {
        let items = [usd(dec!(1.10)), usd(dec!(2.20))];
        assert_eq!(Money::sum(&items, Currency::USD).unwrap().amount(), dec!(3.30));
        assert!(Money::sum(&items, Currency::GBP).is_err());
        assert!(Money::sum(std::iter::empty(), Currency::GBP).unwrap().is_zero());
    }

    #[test]
    fn formats_per_locale() {
        let m = usd(dec!(1234567.891));
        assert_eq!(m.format(Locale::EnUs), "$1,234,567.89");
        assert_eq!(m.format(Locale::EnGb), "US$1,234,567.89");
        let eur = Money::new(dec!(-1234.5), Currency::EUR);
        assert_eq!(eur.format(Locale::DeDe), "-1.234,50\u{a0}€");
        assert_eq!(
            Money::new(dec!(3), Currency::new("chf").unwrap()).format(Locale::EnUs),
            "CHF\u{a0}3.00"
        );
    }

    #[test]
    fn locales_parse_by_tag() {
        assert_eq!("en-GB".parse::<Locale>().unwrap(), Locale::EnGb);
        assert_eq!("de_DE".parse::<Locale>().unwrap(), Locale::DeDe);
        assert_eq!(
            "fr-FR".parse::<Locale>(),
            Err(MoneyError::UnsupportedLocale("fr-FR".into()))
        );
    }

    #[test]
    fn currency_codes_are_validated() {
        assert!(Currency::new("US").is_err());
        assert!(Currency::new("U$D").is_err());
        assert_eq!(Currency::new(" gbp ").unwrap(), Currency::GBP);
    }

    proptest! {
        #[test]
        fn rounding_to_cents_stays_within_half_a_cent(mills in -10_000_000i64..10_000_000i64) {
            let amount = Decimal::new(mills, 3);
            let rounded = usd(amount).round(2).amount();
            prop_assert!((rounded - amount).abs() <= dec!(0.005));
            prop_assert!(rounded.scale() <= 2);
            if mills.rem_euclid(10) == 5 {
                // Midpoints always move away from zero.
                prop_assert!(rounded.abs() > amount.abs());
            }
        }
    }
}
