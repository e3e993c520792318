use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Currency mismatch: {0} vs {1}")]
    CurrencyMismatch(Currency, Currency),

    #[error("Amount arithmetic overflowed")]
    Overflow,

    #[error("Invalid currency code: {0:?}")]
    InvalidCurrency(String),
}

/// Three-letter upper-case currency code, e.g. `USD`.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Currency([u8; 3]);

impl Currency {
    pub const USD: Currency = Currency(*b"USD");
    pub const GBP: Currency = Currency(*b"GBP");

    pub fn new(code: &str) -> Result<Self, MoneyError> {
        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_uppercase()) {
            return Err(MoneyError::InvalidCurrency(code.to_string()));
        }
        Ok(Currency([bytes[0], bytes[1], bytes[2]]))
    }

    pub fn code(&self) -> &str {
        // Only ever built from ASCII upper-case letters.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl fmt::Debug for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A quantity of minor currency units (cents for USD).
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Amount {
    pub quantity: u64,
    pub currency: Currency,
}

impl Amount {
    pub fn new(quantity: u64, currency: Currency) -> Self {
        Self { quantity, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    pub fn is_zero(&self) -> bool {
        self.quantity == 0
    }

    pub fn checked_add(&self, other: &Amount) -> Result<Amount, MoneyError> {
        self.same_currency(other)?;
        let quantity = self
            .quantity
            .checked_add(other.quantity)
            .ok_or(MoneyError::Overflow)?;
        Ok(Amount::new(quantity, self.currency))
    }

    pub fn checked_sub(&self, other: &Amount) -> Result<Amount, MoneyError> {
        self.same_currency(other)?;
        let quantity = self
            .quantity
            .checked_sub(other.quantity)
            .ok_or(MoneyError::Overflow)?;
        Ok(Amount::new(quantity, self.currency))
    }

    /// Sums `amounts`, all of which must be in `currency`.
    pub fn sum<'a, I>(currency: Currency, amounts: I) -> Result<Amount, MoneyError>
    where
        I: IntoIterator<Item = &'a Amount>,
    {
        amounts
            .into_iter()
            .try_fold(Amount::zero(currency), |acc, a| acc.checked_add(a))
    }

    fn same_currency(&self, other: &Amount) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch(self.currency, other.currency));
        }
        Ok(())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02} {}", self.quantity / 100, self.quantity % 100, self.currency)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.quantity, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_codes() {
        assert_eq!(Currency::new("USD").unwrap(), Currency::USD);
        assert!(Currency::new("usd").is_err());
        assert!(Currency::new("DOLLARS").is_err());
        assert_eq!(Currency::GBP.to_string(), "GBP");
    }

    #[test]
    fn test_arithmetic_is_exact() {
        let a = Amount::new(400, Currency::USD);
        let b = Amount::new(600, Currency::USD);
        assert_eq!(a.checked_add(&b).unwrap(), Amount::new(1000, Currency::USD));
        assert_eq!(b.checked_sub(&a).unwrap(), Amount::new(200, Currency::USD));
        assert_eq!(a.checked_sub(&b), Err(MoneyError::Overflow));
        assert_eq!(
            Amount::new(u64::MAX, Currency::USD).checked_add(&a),
            Err(MoneyError::Overflow)
        );
    }

    #[test]
    fn test_mixed_currencies_are_rejected() {
        let usd = Amount::new(5, Currency::USD);
        let gbp = Amount::new(5, Currency::GBP);
        assert_eq!(
            usd.checked_add(&gbp),
            Err(MoneyError::CurrencyMismatch(Currency::USD, Currency::GBP))
        );
        assert_eq!(
            Amount::sum(Currency::USD, [usd, gbp].iter()).unwrap_err().to_string(),
            "Currency mismatch: USD vs GBP"
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Amount::new(1005, Currency::USD).to_string(), "10.05 USD");
    }
}
