//! Fixed-point amount handling and the display-side normalisation helpers.
//!
//! The contract stores every currency amount in wei (18 decimals). Amounts
//! crossing the API are wrapped in [`Amount`] so the scale travels with the
//! value; the threshold heuristics below exist only for token metadata, whose
//! upstream encoding is inconsistent.

use alloy_primitives::U256;
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Serialize, Serializer};

use crate::errors::{GatewayError, Result};

/// Decimals of the native currency (AVAX).
pub const DECIMALS: usize = 18;

/// Display values above this are assumed to be wei that was never scaled.
pub const PLAUSIBLE_AMOUNT_CEILING: f64 = 1_000_000.0;

/// Equity values above this are assumed to be basis points.
pub const PLAUSIBLE_EQUITY_CEILING: f64 = 100.0;

/// Simple interest charged on every loan.
pub const LOAN_INTEREST_RATE: f64 = 0.1;

/// Timestamps above this are milliseconds rather than seconds.
const MILLIS_THRESHOLD: u64 = 100_000_000_000;

/// Percent scaled by 10^6 so progress keeps six fractional digits.
const PROGRESS_SCALE: u64 = 100_000_000;
const PROGRESS_DIVISOR: f64 = 1_000_000.0;

const DAY_MILLIS: i64 = 24 * 3600 * 1000;

fn wei_per_unit() -> U256 {
    U256::from(10u64).pow(U256::from(DECIMALS))
}

/// Format a wei amount as a decimal string, ethers-style.
///
/// Always carries at least one fractional digit (`"60.0"`), trims trailing
/// zeros otherwise, and keeps full precision.
pub fn to_display_amount(wei: U256) -> String {
    let unit = wei_per_unit();
    let whole = wei / unit;
    let remainder = wei % unit;

    if remainder.is_zero() {
        return format!("{whole}.0");
    }

    let fraction = format!("{:0>width$}", remainder.to_string(), width = DECIMALS);
    format!("{whole}.{}", fraction.trim_end_matches('0'))
}

/// Parse a decimal display amount (`"1.5"`) into wei.
pub fn parse_display_amount(raw: &str) -> Result<U256> {
    let invalid = || GatewayError::InvalidAmount(raw.to_string());
    let trimmed = raw.trim();
    let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));

    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    let is_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !is_digits(whole) || !is_digits(fraction) || fraction.len() > DECIMALS {
        return Err(invalid());
    }

    let whole = if whole.is_empty() {
        U256::ZERO
    } else {
        whole.parse::<U256>().map_err(|_| invalid())?
    };
    let fraction = if fraction.is_empty() {
        U256::ZERO
    } else {
        format!("{fraction:0<width$}", width = DECIMALS)
            .parse::<U256>()
            .map_err(|_| invalid())?
    };

    whole
        .checked_mul(wei_per_unit())
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(invalid)
}

/// Principal plus [`LOAN_INTEREST_RATE`], in wei.
pub fn repayment_due(principal: U256) -> U256 {
    principal.saturating_add(principal / U256::from(10u64))
}

/// A wei amount with its scale made explicit on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Amount(pub U256);

impl Amount {
    pub fn wei(&self) -> U256 {
        self.0
    }

    pub fn display(&self) -> String {
        to_display_amount(self.0)
    }

    /// Lossy conversion for statistics and schedules.
    pub fn as_f64(&self) -> f64 {
        self.display().parse().unwrap_or(0.0)
    }
}

impl From<U256> for Amount {
    fn from(wei: U256) -> Self {
        Amount(wei)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire {
            wei: String,
            display: String,
        }

        Wire {
            wei: self.0.to_string(),
            display: self.display(),
        }
        .serialize(serializer)
    }
}

// ─────────────────────────────────────────────────────────
// Metadata heuristics
// ─────────────────────────────────────────────────────────

/// Turn an "Investment Amount" attribute (`"1.5 AVAX"`, `"1500000000000000000"`)
/// into display units.
///
/// Anything above [`PLAUSIBLE_AMOUNT_CEILING`] is taken to be wei and rescaled
/// by 10^-18. Unparseable input yields `0.0`.
pub fn normalize_investment_amount(raw: &str) -> f64 {
    let token = numeric_prefix(raw);

    let value = match token.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => return 0.0,
    };
    if value <= PLAUSIBLE_AMOUNT_CEILING {
        return value;
    }

    // Integer strings can be rescaled exactly.
    if let Ok(wei) = token.parse::<U256>() {
        return Amount(wei).as_f64();
    }
    value / 1e18
}

/// Turn an "Equity Percentage" attribute (`"2.5%"`, `"250"`) into percent.
///
/// Anything above [`PLAUSIBLE_EQUITY_CEILING`] is taken to be basis points.
pub fn normalize_equity(raw: &str) -> f64 {
    match parse_leading_f64(raw) {
        Some(v) if v > PLAUSIBLE_EQUITY_CEILING => v / 100.0,
        Some(v) => v,
        None => 0.0,
    }
}

/// The longest prefix of `raw` (after leading whitespace) that reads as a
/// decimal number, so `"1.5AVAX"` yields `"1.5"`. Empty when there is none.
pub fn numeric_prefix(raw: &str) -> &str {
    let s = raw.trim_start();
    let bytes = s.as_bytes();
    let digits_from = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let int_end = digits_from(end);
    let mut digits = int_end - end;
    end = int_end;

    if bytes.get(end) == Some(&b'.') {
        let frac_end = digits_from(end + 1);
        if digits > 0 || frac_end > end + 1 {
            digits += frac_end - (end + 1);
            end = frac_end;
        }
    }
    if digits == 0 {
        return "";
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_end = digits_from(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }
    &s[..end]
}

/// Leading decimal number of `raw`, ignoring whatever follows it.
pub fn parse_leading_f64(raw: &str) -> Option<f64> {
    numeric_prefix(raw)
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Leading integer of `raw`; a fraction or exponent after it is ignored.
pub fn parse_leading_i64(raw: &str) -> Option<i64> {
    let prefix = numeric_prefix(raw);
    let end = prefix
        .find(|c: char| matches!(c, '.' | 'e' | 'E'))
        .unwrap_or(prefix.len());
    prefix[..end].parse().ok()
}

// ─────────────────────────────────────────────────────────
// Progress and dates
// ─────────────────────────────────────────────────────────

/// Percentage of `target` covered by `collected`, clamped to `[0, 100]`.
/// A zero target has no progress to report and yields `0.0`.
pub fn funding_progress(collected: U256, target: U256) -> f64 {
    if target.is_zero() {
        return 0.0;
    }
    if collected >= target {
        return 100.0;
    }
    let scaled = collected.saturating_mul(U256::from(PROGRESS_SCALE)) / target;
    scaled.saturating_to::<u64>() as f64 / PROGRESS_DIVISOR
}

/// Interpret a stored deadline.
///
/// Values above 10^11 are milliseconds, anything else seconds. A value that
/// does not map to a date before 2100 falls back to thirty days from `now`.
pub fn normalize_deadline(raw: U256, now: DateTime<Utc>) -> DateTime<Utc> {
    let fallback = now + Duration::days(30);
    let Ok(value) = i64::try_from(raw.saturating_to::<u64>()) else {
        return fallback;
    };

    let parsed = if value as u64 > MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    };

    match parsed {
        Some(date) if date.year() <= 2100 => date,
        _ => fallback,
    }
}

/// Whole days left until `deadline`, rounded up, never negative.
pub fn days_remaining(deadline: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (deadline - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis + DAY_MILLIS - 1) / DAY_MILLIS
    }
}

/// Seconds-since-epoch timestamp; `None` for zero or out-of-range values.
pub fn timestamp_secs(raw: U256) -> Option<DateTime<Utc>> {
    if raw.is_zero() {
        return None;
    }
    let secs = i64::try_from(raw.saturating_to::<u64>()).ok()?;
    DateTime::from_timestamp(secs, 0)
}
