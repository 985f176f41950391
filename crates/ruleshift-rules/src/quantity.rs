//! Kubernetes-style resource quantities.
//!
//! Metric values and rule limits arrive as decimal strings that may carry
//! an SI suffix (`250m`, `1.5k`), a binary suffix (`2Gi`), or a decimal
//! exponent (`1e3`). They are parsed exactly into milli-units, rounding
//! any sub-milli remainder away from zero.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{RuleError, RuleResult};

/// Longest digit string accepted in the numeric part of a quantity.
const MAX_DIGITS: usize = 30;

/// An exact decimal quantity stored as milli-units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Quantity {
    milli: i64,
}

impl Quantity {
    pub const ZERO: Quantity = Quantity { milli: 0 };

    pub fn from_milli(milli: i64) -> Self {
        Self { milli }
    }

    /// Whole units, saturating on overflow.
    pub fn from_units(units: i64) -> Self {
        Self {
            milli: units.saturating_mul(1000),
        }
    }

    /// The quantity in milli-units.
    pub fn milli_value(self) -> i64 {
        self.milli
    }

    /// The quantity in milli-units as a float, the unit the evaluation
    /// engine works in.
    pub fn as_milli_f64(self) -> f64 {
        self.milli as f64
    }

    /// Parse a quantity string.
    pub fn parse(input: &str) -> RuleResult<Self> {
        let trimmed = input.trim();
        let invalid = |reason: &str| RuleError::Quantity {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let (negative, body) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            Some(_) => (false, trimmed),
            None => return Err(invalid("empty quantity")),
        };

        let end = body
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(body.len());
        let (number, suffix) = body.split_at(end);

        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if frac_part.contains('.') {
            return Err(invalid("more than one decimal point"));
        }
        let digits = format!("{int_part}{frac_part}");
        if digits.is_empty() {
            return Err(invalid("missing digits"));
        }
        if digits.len() > MAX_DIGITS {
            return Err(invalid("too many digits"));
        }
        let mantissa: i128 = digits.parse().map_err(|_| invalid("malformed digits"))?;

        let (exp10, exp2) = suffix_exponents(suffix).ok_or_else(|| invalid("unknown suffix"))?;
        // Decimal places below one milli-unit; frac_part is bounded by MAX_DIGITS.
        let scale = exp10
            .checked_add(3)
            .and_then(|s| s.checked_sub(frac_part.len() as i32))
            .ok_or_else(|| invalid("out of range"))?;

        let mut numer = mantissa;
        let milli = if scale >= 0 {
            numer = pow10(scale.unsigned_abs())
                .and_then(|p| numer.checked_mul(p))
                .ok_or_else(|| invalid("out of range"))?;
            numer
                .checked_mul(1i128 << exp2)
                .ok_or_else(|| invalid("out of range"))?
        } else {
            numer = numer
                .checked_mul(1i128 << exp2)
                .ok_or_else(|| invalid("out of range"))?;
            match pow10(scale.unsigned_abs()) {
                Some(denom) => (numer + denom - 1) / denom,
                // Far below one milli-unit: any non-zero value rounds up to 1m.
                None => i128::from(numer != 0),
            }
        };

        let milli = i64::try_from(milli).map_err(|_| invalid("out of range"))?;
        Ok(Self {
            milli: if negative { -milli } else { milli },
        })
    }
}

/// Decimal and binary exponents for a quantity suffix.
fn suffix_exponents(suffix: &str) -> Option<(i32, u32)> {
    let exponents = match suffix {
        "" => (0, 0),
        "n" => (-9, 0),
        "u" => (-6, 0),
        "m" => (-3, 0),
        "k" => (3, 0),
        "M" => (6, 0),
        "G" => (9, 0),
        "T" => (12, 0),
        "P" => (15, 0),
        "E" => (18, 0),
        "Ki" => (0, 10),
        "Mi" => (0, 20),
        "Gi" => (0, 30),
        "Ti" => (0, 40),
        "Pi" => (0, 50),
        "Ei" => (0, 60),
        _ => {
            let exponent = suffix
                .strip_prefix('e')
                .or_else(|| suffix.strip_prefix('E'))?;
            (exponent.parse::<i32>().ok()?, 0)
        }
    };
    Some(exponents)
}

fn pow10(exponent: u32) -> Option<i128> {
    10i128.checked_pow(exponent)
}

impl FromStr for Quantity {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.milli % 1000 == 0 {
            write!(f, "{}", self.milli / 1000)
        } else {
            write!(f, "{}m", self.milli)
        }
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(QuantityVisitor)
    }
}

struct QuantityVisitor;

impl Visitor<'_> for QuantityVisitor {
    type Value = Quantity;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a quantity string such as \"250m\" or a number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Quantity, E> {
        Quantity::parse(v).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quantity, E> {
        v.checked_mul(1000)
            .map(Quantity::from_milli)
            .ok_or_else(|| E::custom(format!("quantity {v} out of range")))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quantity, E> {
        i64::try_from(v)
            .map_err(|_| E::custom(format!("quantity {v} out of range")))
            .and_then(|v| self.visit_i64(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Quantity, E> {
        Quantity::parse(&v.to_string()).map_err(E::custom)
    }
}
