// src/math.rs
//! Money-stream arithmetic.
//!
//! All amounts are raw token units held in 256-bit signed integers so long
//! running streams never drift. Overflow is reported, never wrapped.

use alloy::primitives::I256;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::models::Flow;

/// Signed distance from `from` to `to` in seconds.
pub fn elapsed_seconds(from: u64, to: u64) -> i64 {
    if to >= from {
        i64::try_from(to - from).unwrap_or(i64::MAX)
    } else {
        i64::try_from(from - to).map(|d| -d).unwrap_or(i64::MIN)
    }
}

/// `base + rate * elapsed_seconds`.
pub fn accrued_amount(base: I256, rate: I256, elapsed_seconds: i64) -> Result<I256> {
    if elapsed_seconds < 0 {
        return Err(LedgerError::InvalidInterval(elapsed_seconds));
    }
    let elapsed = I256::try_from(elapsed_seconds).map_err(|_| LedgerError::AmountOverflow)?;

    rate.checked_mul(elapsed)
        .and_then(|streamed| base.checked_add(streamed))
        .ok_or(LedgerError::AmountOverflow)
}

/// Collateral the payer must hold for the liquidation grace period.
pub fn required_deposit(candidate_rate: I256, liquidation_period_seconds: u64) -> Result<I256> {
    if candidate_rate.is_negative() {
        return Err(LedgerError::NegativeRate(candidate_rate));
    }
    let period =
        I256::try_from(liquidation_period_seconds).map_err(|_| LedgerError::AmountOverflow)?;

    candidate_rate.checked_mul(period).ok_or(LedgerError::AmountOverflow)
}

/// Rate to submit when adding `requested_rate` on top of an edge that may
/// already carry an active flow. Contributions compose additively.
pub fn merged_flow_rate(existing: Option<&Flow>, requested_rate: I256) -> Result<I256> {
    let existing_rate = existing
        .filter(|flow| flow.is_active())
        .map(|flow| flow.flow_rate)
        .unwrap_or(I256::ZERO);

    let merged = existing_rate
        .checked_add(requested_rate)
        .ok_or(LedgerError::AmountOverflow)?;

    if merged.is_negative() {
        return Err(LedgerError::NegativeResultingRate {
            existing: existing_rate,
            requested: requested_rate,
        });
    }
    Ok(merged)
}

/// Value of `amount` (raw units) in the quote currency. `None` means no price
/// is known, which is different from a price of zero.
pub fn converted_amount(amount: I256, decimals: u8, rate: Option<Decimal>) -> Option<Decimal> {
    let rate = rate?;
    let Some(display) = from_decimals(amount, decimals) else {
        debug!("Amount {} with {} decimals exceeds Decimal range, no conversion", amount, decimals);
        return None;
    };
    display.checked_mul(rate)
}

/// Raw units to display units (`1500000000000000000` with 18 decimals is `1.5`).
///
/// `None` when the amount needs more than the 96-bit `Decimal` mantissa,
/// about 7.9e28 raw units.
pub fn from_decimals(amount: I256, decimals: u8) -> Option<Decimal> {
    let mantissa = i128::try_from(amount).ok()?;
    Decimal::try_from_i128_with_scale(mantissa, u32::from(decimals))
        .ok()
        .map(|d| d.normalize())
}

/// Display units to raw units, truncating toward zero.
pub fn to_decimals(value: Decimal, decimals: u8) -> Option<I256> {
    let factor = (0..decimals).try_fold(Decimal::ONE, |acc, _| acc.checked_mul(Decimal::TEN))?;
    let scaled = value.checked_mul(factor)?;
    let divisor = 10i128.checked_pow(scaled.scale())?;
    I256::try_from(scaled.mantissa() / divisor).ok()
}

/// Live balance at `now`, clamped at zero once depleted.
pub fn current_amount(balance: I256, net_flow: I256, last_update: u64, now: u64) -> Result<I256> {
    let amount = if now < last_update {
        balance
    } else {
        accrued_amount(balance, net_flow, elapsed_seconds(last_update, now))?
    };
    Ok(amount.max(I256::ZERO))
}

/// First second at which a depleting balance reaches zero.
pub fn depletion_timestamp(balance: I256, net_flow: I256, last_update: u64) -> Option<u64> {
    if !net_flow.is_negative() {
        return None;
    }
    if !balance.is_positive() {
        return Some(last_update);
    }
    let outflow = net_flow.checked_neg()?;
    // ceil(balance / outflow)
    let secs = balance
        .checked_add(outflow)?
        .checked_sub(I256::ONE)?
        .checked_div(outflow)?;

    last_update.checked_add(u64::try_from(secs).ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;
    use std::str::FromStr;

    fn amt(v: i64) -> I256 {
        I256::try_from(v).unwrap()
    }

    fn flow(rate: i64, cancelled: bool) -> Flow {
        Flow {
            entity: Address::repeat_byte(0x11),
            super_token_address: Address::repeat_byte(0x22),
            is_incoming: false,
            flow_rate: amt(rate),
            creation_timestamp: 1000,
            last_timestamp: 1000,
            accumulated_amount: I256::ZERO,
            is_cancelled: cancelled,
        }
    }

    #[test]
    fn accrues_linearly() {
        assert_eq!(accrued_amount(amt(0), amt(100), 100).unwrap(), amt(10_000));
        assert_eq!(accrued_amount(amt(1000), amt(-10), 50).unwrap(), amt(500));
        assert_eq!(accrued_amount(amt(7), amt(3), 0).unwrap(), amt(7));
    }

    #[test]
    fn negative_interval_is_rejected() {
        let err = accrued_amount(amt(0), amt(1), -1).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInterval(-1)));
    }

    #[test]
    fn accrual_overflow_is_reported() {
        let err = accrued_amount(I256::MAX, amt(1), 1).unwrap_err();
        assert!(matches!(err, LedgerError::AmountOverflow));
    }

    #[test]
    fn deposit_scales_with_period() {
        assert_eq!(required_deposit(amt(385), 14_400).unwrap(), amt(5_544_000));
        assert_eq!(required_deposit(amt(0), 14_400).unwrap(), I256::ZERO);
        assert!(matches!(
            required_deposit(amt(-1), 10),
            Err(LedgerError::NegativeRate(_))
        ));
    }

    #[test]
    fn merge_adds_to_active_flow_only() {
        assert_eq!(merged_flow_rate(None, amt(50)).unwrap(), amt(50));
        assert_eq!(merged_flow_rate(Some(&flow(100, false)), amt(50)).unwrap(), amt(150));
        assert_eq!(merged_flow_rate(Some(&flow(100, true)), amt(50)).unwrap(), amt(50));
    }

    #[test]
    fn merge_below_zero_fails() {
        let err = merged_flow_rate(Some(&flow(100, false)), amt(-150)).unwrap_err();
        match err {
            LedgerError::NegativeResultingRate { existing, requested } => {
                assert_eq!(existing, amt(100));
                assert_eq!(requested, amt(-150));
            }
            other => panic!("unexpected error {other:?}"),
        }
        // down to exactly zero is allowed
        assert_eq!(merged_flow_rate(Some(&flow(100, false)), amt(-100)).unwrap(), I256::ZERO);
    }

    #[test]
    fn conversion_distinguishes_missing_price() {
        let one_and_half = amt(1_500_000_000_000_000_000);
        assert_eq!(converted_amount(one_and_half, 18, None), None);
        assert_eq!(
            converted_amount(one_and_half, 18, Some(Decimal::from(2))),
            Some(Decimal::from(3))
        );
        assert_eq!(
            converted_amount(one_and_half, 18, Some(Decimal::ZERO)),
            Some(Decimal::ZERO)
        );
    }

    #[test]
    fn decimals_conversions() {
        assert_eq!(
            from_decimals(amt(1_500_000), 6),
            Some(Decimal::from_str("1.5").unwrap())
        );
        assert_eq!(
            to_decimals(Decimal::from_str("1.5").unwrap(), 18),
            Some(amt(1_500_000_000_000_000_000))
        );
        // sub-unit precision is truncated
        assert_eq!(to_decimals(Decimal::from_str("0.0000015").unwrap(), 6), Some(amt(1)));
    }

    #[test]
    fn conversion_limited_to_decimal_range() {
        let largest = I256::try_from((1i128 << 96) - 1).unwrap();
        assert!(from_decimals(largest, 18).is_some());

        let too_large = I256::try_from(1i128 << 96).unwrap();
        assert_eq!(from_decimals(too_large, 18), None);
        // reads as "no price" even with a known rate
        assert_eq!(converted_amount(too_large, 18, Some(Decimal::ONE)), None);
    }

    #[test]
    fn current_amount_clamps_at_zero() {
        assert_eq!(current_amount(amt(1000), amt(-10), 1000, 1050).unwrap(), amt(500));
        assert_eq!(current_amount(amt(1000), amt(-10), 1000, 1200).unwrap(), I256::ZERO);
        // clock behind the snapshot
        assert_eq!(current_amount(amt(1000), amt(-10), 1000, 900).unwrap(), amt(1000));
    }

    #[test]
    fn depletion_rounds_up() {
        assert_eq!(depletion_timestamp(amt(1000), amt(-10), 1000), Some(1100));
        assert_eq!(depletion_timestamp(amt(1001), amt(-10), 1000), Some(1101));
        assert_eq!(depletion_timestamp(amt(1000), amt(10), 1000), None);
        assert_eq!(depletion_timestamp(amt(0), amt(-10), 1000), Some(1000));
    }

    #[test]
    fn elapsed_is_signed() {
        assert_eq!(elapsed_seconds(1000, 1100), 100);
        assert_eq!(elapsed_seconds(1100, 1000), -100);
    }
}
