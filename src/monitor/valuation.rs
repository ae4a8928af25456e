//! Valuation Service
//!
//! Converts a payment into USD with the historical rate in force when it
//! was made. Bitcoin payments are valued at the rate sampled at or before
//! their block time, Ethereum payments at or before their block height.

use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;

use crate::storage::{RateStore, StorageError};
use crate::types::{to_major_unit, truncate_usd, ChainType, ExchangeRateSample, RateKey};

/// Valuation errors
#[derive(Debug, Error)]
pub enum ValuationError {
    #[error("no {chain} exchange rate at or before {key}")]
    RateUnavailable { chain: ChainType, key: RateKey },

    #[error("no block time known for {0}")]
    MissingBlockTime(String),

    #[error("amount {0} out of range")]
    AmountOutOfRange(u128),

    #[error("rate lookup failed: {0}")]
    Lookup(#[from] StorageError),
}

/// USD value of a single payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Valuation {
    /// Sample the rate was taken from
    pub sample: ExchangeRateSample,
    /// Value truncated to cents
    pub usd: Decimal,
}

#[derive(Clone)]
pub struct ValuationService {
    rates: Arc<dyn RateStore>,
}

impl ValuationService {
    pub fn new(rates: Arc<dyn RateStore>) -> Self {
        Self { rates }
    }

    /// Rate of the sample with the greatest key at or before `key`
    pub async fn rate_at(
        &self,
        chain: ChainType,
        key: RateKey,
    ) -> Result<ExchangeRateSample, ValuationError> {
        self.rates
            .nearest_rate(chain, key)
            .await?
            .ok_or(ValuationError::RateUnavailable { chain, key })
    }

    /// `raw_amount` converted to whole coins, times the rate at `key`
    pub async fn value_in_usd(
        &self,
        chain: ChainType,
        raw_amount: u128,
        key: RateKey,
    ) -> Result<Valuation, ValuationError> {
        let major = to_major_unit(chain, raw_amount)
            .ok_or(ValuationError::AmountOutOfRange(raw_amount))?;
        let sample = self.rate_at(chain, key).await?;

        let usd = major
            .checked_mul(sample.usd_per_unit)
            .ok_or(ValuationError::AmountOutOfRange(raw_amount))?;

        Ok(Valuation {
            sample,
            usd: truncate_usd(usd),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, MockRateStore};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_bitcoin_value() {
        let store = MemoryStore::new();
        store.insert_rate(1_000, None, Some(dec("2500.00")), None).await;
        let service = ValuationService::new(Arc::new(store));

        let valuation = service
            .value_in_usd(ChainType::Bitcoin, 1_000_000, RateKey::Timestamp(1_500))
            .await
            .unwrap();
        assert_eq!(valuation.usd, dec("25.00"));
        assert_eq!(valuation.sample.key, RateKey::Timestamp(1_000));
    }

    #[tokio::test]
    async fn test_ethereum_value_picks_earlier_block() {
        let store = MemoryStore::new();
        store.insert_rate(1_000, Some(90), None, Some(dec("200.00"))).await;
        store.insert_rate(1_100, Some(110), None, Some(dec("210.00"))).await;
        let service = ValuationService::new(Arc::new(store));

        let valuation = service
            .value_in_usd(
                ChainType::Ethereum,
                2_000_000_000_000_000_000,
                RateKey::BlockHeight(100),
            )
            .await
            .unwrap();
        assert_eq!(valuation.usd, dec("400.00"));
        assert_eq!(valuation.sample.usd_per_unit, dec("200.00"));
    }

    #[tokio::test]
    async fn test_value_truncated_to_cents() {
        let store = MemoryStore::new();
        store.insert_rate(0, None, Some(dec("2999.99")), None).await;
        let service = ValuationService::new(Arc::new(store));

        // 0.00012345 BTC * 2999.99 = 0.3703487655
        let valuation = service
            .value_in_usd(ChainType::Bitcoin, 12_345, RateKey::Timestamp(10))
            .await
            .unwrap();
        assert_eq!(valuation.usd, dec("0.37"));
    }

    #[tokio::test]
    async fn test_rate_unavailable_before_first_sample() {
        let store = MemoryStore::new();
        store.insert_rate(5_000, None, Some(dec("2500")), None).await;
        let service = ValuationService::new(Arc::new(store));

        let err = service
            .value_in_usd(ChainType::Bitcoin, 1, RateKey::Timestamp(4_999))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ValuationError::RateUnavailable {
                chain: ChainType::Bitcoin,
                key: RateKey::Timestamp(4_999)
            }
        ));
    }

    #[tokio::test]
    async fn test_lookup_failure() {
        let mut rates = MockRateStore::new();
        rates
            .expect_nearest_rate()
            .returning(|_, _| Err(StorageError::Connection("pool exhausted".to_string())));
        let service = ValuationService::new(Arc::new(rates));

        let err = service
            .rate_at(ChainType::Ethereum, RateKey::BlockHeight(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ValuationError::Lookup(_)));
    }

    #[tokio::test]
    async fn test_amount_out_of_range() {
        let service = ValuationService::new(Arc::new(MemoryStore::new()));
        let err = service
            .value_in_usd(ChainType::Ethereum, u128::MAX, RateKey::BlockHeight(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ValuationError::AmountOutOfRange(_)));
    }
}
