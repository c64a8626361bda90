// src/view.rs
use tracing::warn;

use crate::math;
use crate::models::{DisplayBalance, SuperToken};
use crate::sources::ConvertRates;

/// Key used to look a super token up in the price table: the symbol without
/// the `x` suffix, and without the faucet `f` prefix on test networks.
pub fn price_key(token: &SuperToken, is_test_network: bool) -> String {
    let symbol = token.symbol.trim();
    let symbol = symbol
        .strip_suffix('x')
        .filter(|s| !s.is_empty())
        .unwrap_or(symbol);
    let symbol = if is_test_network {
        symbol.strip_prefix('f').filter(|s| !s.is_empty()).unwrap_or(symbol)
    } else {
        symbol
    };
    symbol.to_uppercase()
}

/// Balances worth showing at `now`, in registry order, with converted
/// amounts when a price is known.
pub fn project(
    super_tokens: &[SuperToken],
    rates: &ConvertRates,
    currency: &str,
    is_test_network: bool,
    now: u64,
) -> Vec<DisplayBalance> {
    super_tokens
        .iter()
        .filter_map(|token| {
            let current_balance = match token.current_balance(now) {
                Ok(balance) => balance,
                Err(e) => {
                    warn!("Skipping {} in balance view: {}", token.symbol, e);
                    return None;
                }
            };
            if !current_balance.is_positive() {
                return None;
            }

            let rate = rates.rate(&price_key(token, is_test_network), currency);

            Some(DisplayBalance {
                address: token.address,
                name: token.name.clone(),
                symbol: token.symbol.clone(),
                decimals: token.decimals,
                balance: token.balance,
                current_balance,
                net_flow: token.net_flow,
                last_update_timestamp: token.last_update_timestamp,
                depletion_timestamp: token.depletion_timestamp(),
                converted_amount: math::converted_amount(current_balance, token.decimals, rate),
                converted_net_flow: math::converted_amount(token.net_flow, token.decimals, rate),
            })
        })
        .collect()
}
