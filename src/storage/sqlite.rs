//! SQLite Persistent Storage
//!
//! Durable store for the investor table, exchange rates, the payment log and
//! the address change feed. Uses connection pooling via r2d2 for concurrent
//! access.
//!
//! The change feed is an append-only `address_change` table. With schema
//! creation enabled, triggers on `investor` append one row per newly set
//! pay-in key, on channel `bitcoin` or `ether`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use super::traits::{
    ChangeFeed, ChangeNotification, InvestorStore, PaymentRecorder, RateStore, StorageError,
    StorageResult,
};
use crate::types::{ChainType, ExchangeRateSample, PayinAddressRow, PaymentRecord, RateKey};

/// Granularity of the change feed's bounded wait
const FEED_POLL_STEP: Duration = Duration::from_millis(50);

/// SQLite-backed store with connection pooling
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Create a new store with the given database path
    ///
    /// Creates the database file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Open from a configured path, `:memory:` selects the in-memory store
    pub fn open(db_path: &str) -> Result<Self, StorageError> {
        if db_path == ":memory:" {
            Self::in_memory()
        } else {
            Self::new(db_path)
        }
    }

    /// Get a connection from the pool
    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS investor (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT,
                pay_in_bitcoin_public_key TEXT,
                pay_in_ether_public_key TEXT,
                creation_date INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS exchange_rate (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                creation_date INTEGER NOT NULL,
                block_nr_eth INTEGER,
                rate_btc TEXT,
                rate_eth TEXT
            );

            CREATE TABLE IF NOT EXISTS payment_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tx_identifier TEXT NOT NULL,
                creation_date INTEGER NOT NULL,
                currency TEXT NOT NULL,
                paymentvalue TEXT NOT NULL,
                fx_rate TEXT NOT NULL,
                usd TEXT NOT NULL,
                email TEXT
            );

            CREATE TABLE IF NOT EXISTS address_change (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel TEXT NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_exchange_rate_creation_date ON exchange_rate(creation_date);
            CREATE INDEX IF NOT EXISTS idx_exchange_rate_block_nr_eth ON exchange_rate(block_nr_eth);
            CREATE INDEX IF NOT EXISTS idx_payment_log_tx_identifier ON payment_log(tx_identifier);
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    /// Install the triggers that publish new pay-in keys to the change feed
    pub fn install_change_triggers(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            DROP TRIGGER IF EXISTS notify_bitcoin_key_update;
            CREATE TRIGGER notify_bitcoin_key_update
                AFTER UPDATE OF pay_in_bitcoin_public_key ON investor
                FOR EACH ROW
                WHEN NEW.pay_in_bitcoin_public_key IS NOT NULL
                 AND NEW.pay_in_bitcoin_public_key IS NOT OLD.pay_in_bitcoin_public_key
            BEGIN
                INSERT INTO address_change (channel, payload)
                VALUES ('bitcoin', NEW.pay_in_bitcoin_public_key);
            END;

            DROP TRIGGER IF EXISTS notify_ether_key_update;
            CREATE TRIGGER notify_ether_key_update
                AFTER UPDATE OF pay_in_ether_public_key ON investor
                FOR EACH ROW
                WHEN NEW.pay_in_ether_public_key IS NOT NULL
                 AND NEW.pay_in_ether_public_key IS NOT OLD.pay_in_ether_public_key
            BEGIN
                INSERT INTO address_change (channel, payload)
                VALUES ('ether', NEW.pay_in_ether_public_key);
            END;

            DROP TRIGGER IF EXISTS notify_payin_keys_insert;
            CREATE TRIGGER notify_payin_keys_insert
                AFTER INSERT ON investor
                FOR EACH ROW
            BEGIN
                INSERT INTO address_change (channel, payload)
                SELECT 'bitcoin', NEW.pay_in_bitcoin_public_key
                WHERE NEW.pay_in_bitcoin_public_key IS NOT NULL;
                INSERT INTO address_change (channel, payload)
                SELECT 'ether', NEW.pay_in_ether_public_key
                WHERE NEW.pay_in_ether_public_key IS NOT NULL;
            END;
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    /// Change feed delivering rows appended after this call
    pub fn change_feed(&self) -> Result<SqliteChangeFeed, StorageError> {
        let conn = self.conn()?;
        let last_seen: i64 = conn
            .query_row("SELECT COALESCE(MAX(id), 0) FROM address_change", [], |row| {
                row.get(0)
            })
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(SqliteChangeFeed {
            store: self.clone(),
            last_seen: AtomicI64::new(last_seen),
        })
    }

    // Write helpers used by tooling and tests

    /// Insert an investor row, returns its id
    pub fn insert_investor(
        &self,
        email: Option<&str>,
        bitcoin_key: Option<&str>,
        ether_key: Option<&str>,
        created_at: u64,
    ) -> Result<i64, StorageError> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO investor (email, pay_in_bitcoin_public_key, pay_in_ether_public_key, creation_date)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![email, bitcoin_key, ether_key, created_at as i64],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(conn.last_insert_rowid())
    }

    /// Assign a pay-in key to an existing investor
    pub fn set_payin_key(
        &self,
        investor_id: i64,
        chain: ChainType,
        key: &str,
    ) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let sql = match chain {
            ChainType::Bitcoin => "UPDATE investor SET pay_in_bitcoin_public_key = ?2 WHERE id = ?1",
            ChainType::Ethereum => "UPDATE investor SET pay_in_ether_public_key = ?2 WHERE id = ?1",
        };

        let rows_affected = conn
            .execute(sql, params![investor_id, key])
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if rows_affected == 0 {
            return Err(StorageError::InvalidData(format!(
                "no investor with id {}",
                investor_id
            )));
        }

        Ok(())
    }

    /// Insert an exchange-rate sample
    pub fn insert_rate(
        &self,
        creation_date: u64,
        block_nr_eth: Option<u64>,
        rate_btc: Option<Decimal>,
        rate_eth: Option<Decimal>,
    ) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO exchange_rate (creation_date, block_nr_eth, rate_btc, rate_eth)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                creation_date as i64,
                block_nr_eth.map(|v| v as i64),
                rate_btc.map(|r| r.to_string()),
                rate_eth.map(|r| r.to_string()),
            ],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    /// Append a raw change notification
    pub fn publish_change(&self, channel: &str, payload: &str) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO address_change (channel, payload) VALUES (?1, ?2)",
            params![channel, payload],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    /// All payment log rows in insertion order
    pub fn payments(&self) -> Result<Vec<PaymentRecord>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                r#"
            SELECT tx_identifier, creation_date, currency, paymentvalue, fx_rate, usd, email
            FROM payment_log ORDER BY id ASC
            "#,
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        rows.into_iter()
            .map(|(identifier, created, currency, value, fx, usd, email)| {
                Ok(PaymentRecord {
                    identifier,
                    currency,
                    raw_amount: value
                        .parse()
                        .map_err(|_| StorageError::InvalidData(format!("payment value {}", value)))?,
                    fx_rate: parse_decimal(&fx)?,
                    usd_amount: parse_decimal(&usd)?,
                    recipient_email: email,
                    recorded_at: DateTime::<Utc>::from_timestamp(created, 0)
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    // Synchronous helper methods for the trait implementations

    fn payin_addresses_sync(&self) -> Result<Vec<PayinAddressRow>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                r#"
            SELECT pay_in_bitcoin_public_key, pay_in_ether_public_key, creation_date
            FROM investor ORDER BY creation_date ASC, id ASC
            "#,
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let mut addresses = Vec::new();
        for (bitcoin_key, ether_key, created) in rows {
            let created_at = created.max(0) as u64;
            if let Some(key) = bitcoin_key {
                addresses.push(PayinAddressRow {
                    chain: ChainType::Bitcoin,
                    origin_key: key,
                    created_at,
                });
            }
            if let Some(key) = ether_key {
                addresses.push(PayinAddressRow {
                    chain: ChainType::Ethereum,
                    origin_key: key,
                    created_at,
                });
            }
        }

        Ok(addresses)
    }

    fn email_for_origin_key_sync(
        &self,
        chain: ChainType,
        origin_key: &str,
    ) -> Result<Option<String>, StorageError> {
        let conn = self.conn()?;
        let sql = match chain {
            ChainType::Bitcoin => "SELECT email FROM investor WHERE pay_in_bitcoin_public_key = ?1",
            ChainType::Ethereum => "SELECT email FROM investor WHERE pay_in_ether_public_key = ?1",
        };

        let email = conn
            .query_row(sql, params![origin_key], |row| row.get::<_, Option<String>>(0))
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(email.flatten())
    }

    fn nearest_rate_sync(
        &self,
        chain: ChainType,
        key: RateKey,
    ) -> Result<Option<ExchangeRateSample>, StorageError> {
        let conn = self.conn()?;

        let sql = match (chain, key) {
            (ChainType::Bitcoin, RateKey::Timestamp(_)) => {
                r#"
                SELECT CAST(rate_btc AS TEXT), creation_date FROM exchange_rate
                WHERE rate_btc IS NOT NULL AND creation_date <= ?1
                ORDER BY creation_date DESC, id ASC LIMIT 1
                "#
            }
            (ChainType::Ethereum, RateKey::BlockHeight(_)) => {
                r#"
                SELECT CAST(rate_eth AS TEXT), block_nr_eth FROM exchange_rate
                WHERE rate_eth IS NOT NULL AND block_nr_eth IS NOT NULL AND block_nr_eth <= ?1
                ORDER BY block_nr_eth DESC, creation_date ASC, id ASC LIMIT 1
                "#
            }
            _ => {
                return Err(StorageError::InvalidData(format!(
                    "{} rates are not keyed by {}",
                    chain, key
                )))
            }
        };

        let row = conn
            .query_row(sql, params![key.value() as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        match row {
            Some((rate, sample_key)) => {
                let sample_key = sample_key.max(0) as u64;
                Ok(Some(ExchangeRateSample {
                    key: match key {
                        RateKey::Timestamp(_) => RateKey::Timestamp(sample_key),
                        RateKey::BlockHeight(_) => RateKey::BlockHeight(sample_key),
                    },
                    usd_per_unit: parse_decimal(&rate)?,
                }))
            }
            None => Ok(None),
        }
    }

    fn append_sync(&self, record: &PaymentRecord) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO payment_log (
                tx_identifier, creation_date, currency, paymentvalue, fx_rate, usd, email
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.identifier,
                record.recorded_at.timestamp(),
                record.currency,
                record.raw_amount.to_string(),
                record.fx_rate.to_string(),
                record.usd_amount.to_string(),
                record.recipient_email,
            ],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn recorded_identifiers_sync(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT DISTINCT tx_identifier FROM payment_log")
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let identifiers = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(identifiers)
    }

    fn changes_after_sync(&self, last_seen: i64) -> Result<Vec<(i64, ChangeNotification)>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT id, channel, payload FROM address_change WHERE id > ?1 ORDER BY id ASC")
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let changes = stmt
            .query_map(params![last_seen], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    ChangeNotification {
                        channel: row.get(1)?,
                        payload: row.get(2)?,
                    },
                ))
            })
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(changes)
    }
}

fn parse_decimal(value: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(value.trim())
        .or_else(|_| Decimal::from_scientific(value.trim()))
        .map_err(|_| StorageError::InvalidData(format!("not a decimal: {}", value)))
}

#[async_trait]
impl InvestorStore for SqliteStore {
    async fn payin_addresses(&self) -> StorageResult<Vec<PayinAddressRow>> {
        self.payin_addresses_sync()
    }

    async fn email_for_origin_key(
        &self,
        chain: ChainType,
        origin_key: &str,
    ) -> StorageResult<Option<String>> {
        self.email_for_origin_key_sync(chain, origin_key)
    }
}

#[async_trait]
impl RateStore for SqliteStore {
    async fn nearest_rate(
        &self,
        chain: ChainType,
        key: RateKey,
    ) -> StorageResult<Option<ExchangeRateSample>> {
        self.nearest_rate_sync(chain, key)
    }
}

#[async_trait]
impl PaymentRecorder for SqliteStore {
    async fn append(&self, record: &PaymentRecord) -> StorageResult<()> {
        self.append_sync(record)
    }

    async fn recorded_identifiers(&self) -> StorageResult<Vec<String>> {
        self.recorded_identifiers_sync()
    }
}

/// Change feed polling the `address_change` table
pub struct SqliteChangeFeed {
    store: SqliteStore,
    last_seen: AtomicI64,
}

#[async_trait]
impl ChangeFeed for SqliteChangeFeed {
    async fn poll(&self, wait: Duration) -> StorageResult<Vec<ChangeNotification>> {
        let deadline = Instant::now() + wait;

        loop {
            let changes = self
                .store
                .changes_after_sync(self.last_seen.load(Ordering::Acquire))?;

            if let Some((last_id, _)) = changes.last() {
                self.last_seen.store(*last_id, Ordering::Release);
                return Ok(changes.into_iter().map(|(_, n)| n).collect());
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(FEED_POLL_STEP.min(deadline - now)).await;
        }
    }
}
