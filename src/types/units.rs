//! Unit Conversion Utilities
//!
//! Exact conversions between minor units (satoshi, wei), whole coins and USD.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use super::chain::ChainType;

/// Satoshis per Bitcoin
pub const SATS_PER_BTC: u64 = 100_000_000;

/// Decimal places kept on a single payment's USD value (cents)
pub const USD_SCALE: u32 = 2;

/// Convert a minor-unit amount to whole coins without rounding
///
/// Returns `None` when the amount does not fit the decimal mantissa (96 bits).
pub fn to_major_unit(chain: ChainType, raw_amount: u128) -> Option<Decimal> {
    let raw = i128::try_from(raw_amount).ok()?;
    Decimal::try_from_i128_with_scale(raw, chain.minor_unit_scale()).ok()
}

/// Truncate a USD amount toward zero to whole cents
pub fn truncate_usd(usd: Decimal) -> Decimal {
    usd.round_dp_with_strategy(USD_SCALE, RoundingStrategy::ToZero)
}

/// Round a USD amount up to the next whole dollar
pub fn round_up_whole(usd: Decimal) -> i64 {
    usd.ceil().to_i64().unwrap_or(i64::MAX)
}

/// Convert minor units to a human-readable string
/// e.g., 100000 sats -> "100,000 sats (0.00100000 BTC)"
pub fn minor_units_to_display(chain: ChainType, raw_amount: u128) -> String {
    let unit = match chain {
        ChainType::Bitcoin => "sats",
        ChainType::Ethereum => "wei",
    };

    match to_major_unit(chain, raw_amount) {
        Some(major) => format!(
            "{} {} ({} {})",
            format_with_commas(raw_amount),
            unit,
            major.round_dp(8),
            chain.currency()
        ),
        None => format!("{} {}", format_with_commas(raw_amount), unit),
    }
}

/// Format number with thousands separators
fn format_with_commas(n: u128) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_sats_to_btc() {
        let btc = to_major_unit(ChainType::Bitcoin, 1_000_000).unwrap();
        assert_eq!(btc, Decimal::from_str("0.01").unwrap());

        let btc = to_major_unit(ChainType::Bitcoin, SATS_PER_BTC as u128).unwrap();
        assert_eq!(btc, Decimal::ONE);
    }

    #[test]
    fn test_wei_to_eth() {
        let eth = to_major_unit(ChainType::Ethereum, 2_000_000_000_000_000_000).unwrap();
        assert_eq!(eth, Decimal::from(2));

        let eth = to_major_unit(ChainType::Ethereum, 1).unwrap();
        assert_eq!(eth, Decimal::from_str("0.000000000000000001").unwrap());
    }

    #[test]
    fn test_amount_out_of_range() {
        assert!(to_major_unit(ChainType::Ethereum, u128::MAX).is_none());
    }

    #[test]
    fn test_truncate_usd() {
        assert_eq!(
            truncate_usd(Decimal::from_str("25.009").unwrap()),
            Decimal::from_str("25.00").unwrap()
        );
        assert_eq!(
            truncate_usd(Decimal::from_str("0.019999").unwrap()),
            Decimal::from_str("0.01").unwrap()
        );
    }

    #[test]
    fn test_round_up_whole() {
        assert_eq!(round_up_whole(Decimal::from_str("25.01").unwrap()), 26);
        assert_eq!(round_up_whole(Decimal::from_str("25.00").unwrap()), 25);
        assert_eq!(round_up_whole(Decimal::ZERO), 0);
    }

    #[test]
    fn test_display_format() {
        let display = minor_units_to_display(ChainType::Bitcoin, 1_000_000);
        assert!(display.contains("1,000,000 sats"));
        assert!(display.contains("BTC"));
    }
}
