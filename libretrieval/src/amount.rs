use num_bigint::BigUint;
use num_traits::{CheckedSub, ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::Display;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

/// A non-negative amount of tokens, in the smallest denomination (attoFIL).
///
/// Amounts are arbitrary precision. They serialize as decimal strings so that no precision is lost in JSON or RON.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(BigUint);

impl TokenAmount {
    pub fn zero() -> Self {
        TokenAmount(BigUint::zero())
    }

    pub fn from_atto(atto: impl Into<BigUint>) -> Self {
        TokenAmount(atto.into())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn atto(&self) -> &BigUint {
        &self.0
    }

    /// Returns `self - other`, or `None` if the result would be negative.
    pub fn checked_sub(&self, other: &TokenAmount) -> Option<TokenAmount> {
        self.0.checked_sub(&other.0).map(TokenAmount)
    }

    /// Returns `self - other`, clamped at zero.
    pub fn saturating_sub(&self, other: &TokenAmount) -> TokenAmount {
        self.checked_sub(other).unwrap_or_default()
    }

    /// The price of `bytes` bytes, where `self` is a price per byte.
    pub fn for_bytes(&self, bytes: u64) -> TokenAmount {
        TokenAmount(&self.0 * BigUint::from(bytes))
    }

    /// The number of whole bytes that `self` pays for at `price_per_byte`. Returns `None` when the price is zero, since
    /// every byte is free and the quotient is unbounded. Quotients that do not fit in a `u64` saturate.
    pub fn bytes_at(&self, price_per_byte: &TokenAmount) -> Option<u64> {
        if price_per_byte.is_zero() {
            return None;
        }
        let bytes = &self.0 / &price_per_byte.0;
        Some(bytes.to_u64().unwrap_or(u64::MAX))
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(BigUint::from(value))
    }
}

impl From<BigUint> for TokenAmount {
    fn from(value: BigUint) -> Self {
        TokenAmount(value)
    }
}

impl Add for TokenAmount {
    type Output = TokenAmount;

    fn add(self, rhs: Self) -> Self::Output {
        TokenAmount(self.0 + rhs.0)
    }
}

impl<'a> Add<&'a TokenAmount> for &'a TokenAmount {
    type Output = TokenAmount;

    fn add(self, rhs: &'a TokenAmount) -> Self::Output {
        TokenAmount(&self.0 + &rhs.0)
    }
}

impl AddAssign<&TokenAmount> for TokenAmount {
    fn add_assign(&mut self, rhs: &TokenAmount) {
        self.0 += &rhs.0;
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TokenAmount {
    type Err = num_bigint::ParseBigIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<BigUint>().map(TokenAmount)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.0.to_string().serialize(s)
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let s = String::deserialize(de)?;
        TokenAmount::from_str(&s).map_err(|e| serde::de::Error::custom(format!("Invalid token amount {s}: {e}")))
    }
}
