//! Cooldown ledger: claim history plus the per-key cooldown table

use crate::error::{FaucetError, FaucetResult};
use faucet_common::Address;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{Db, Tree};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

const LAST_CLAIM_KEY: &[u8] = b"last_claim_ts";

/// One historical dispense. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub identity: String,
    pub address: String,
    /// Seconds since epoch, non-decreasing across inserts
    pub timestamp: i64,
    pub tx_hash: String,
    /// Amount dispensed (in wei)
    pub amount: String,
}

/// What the coordinator hands to [`Ledger::commit`] after a confirmed transfer.
#[derive(Debug, Clone)]
pub struct Dispense<'a> {
    pub identity: &'a str,
    pub address: &'a Address,
    pub tx_hash: &'a str,
    pub amount: u128,
    pub now: i64,
}

/// Key into the cooldown table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CooldownKey {
    Identity(String),
    Address(String),
}

impl CooldownKey {
    pub fn identity(identity: &str) -> Self {
        CooldownKey::Identity(identity.to_string())
    }

    pub fn address(address: &Address) -> Self {
        CooldownKey::Address(address.to_hex())
    }

    pub fn storage_key(&self) -> Vec<u8> {
        match self {
            CooldownKey::Identity(id) => format!("identity:{}", id).into_bytes(),
            CooldownKey::Address(addr) => format!("address:{}", addr).into_bytes(),
        }
    }
}

/// Faucet statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_claims: usize,
    pub unique_addresses: usize,
}

/// Durable eligibility state. `commit` must be all-or-nothing.
pub trait Ledger: Send + Sync {
    /// Timestamp of the latest eligible dispense for `key`, if any.
    fn last_dispense(&self, key: &CooldownKey) -> FaucetResult<Option<i64>>;

    /// Append the claim and upsert both cooldown entries in one transaction.
    /// Returns the stored record.
    fn commit(&self, dispense: &Dispense<'_>) -> FaucetResult<ClaimRecord>;

    /// Recent claim addresses, most recent first.
    fn recent_claims(&self, limit: usize) -> FaucetResult<Vec<String>>;

    fn stats(&self) -> FaucetResult<LedgerStats>;

    fn is_eligible(&self, identity: &str, address: &Address, now: i64, window_secs: u64) -> FaucetResult<bool> {
        for key in [CooldownKey::identity(identity), CooldownKey::address(address)] {
            if let Some(last) = self.last_dispense(&key)? {
                if within_window(last, now, window_secs) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

/// `now - last < window`, saturating so clock skew never reopens a key early.
pub fn within_window(last: i64, now: i64, window_secs: u64) -> bool {
    let window = i64::try_from(window_secs).unwrap_or(i64::MAX);
    now.saturating_sub(last) < window
}

/// Ledger backed by sled
pub struct SledLedger {
    db: Db,
    /// Claim history, keyed by big-endian timestamp then sled id
    claims: Tree,
    /// identity:/address: keys to big-endian timestamp
    cooldowns: Tree,
    meta: Tree,
}

impl SledLedger {
    /// Create or open the ledger database
    pub fn open(path: &str) -> FaucetResult<Self> {
        info!("Opening faucet ledger at: {}", path);

        let db = sled::Config::default()
            .path(path)
            .cache_capacity(64 * 1024 * 1024)
            .open()?;
        Self::from_db(db)
    }

    /// In-memory ledger removed on drop. Used by tests and dry runs.
    pub fn temporary() -> FaucetResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> FaucetResult<Self> {
        let claims = db.open_tree("claims")?;
        let cooldowns = db.open_tree("cooldowns")?;
        let meta = db.open_tree("meta")?;

        Ok(Self {
            db,
            claims,
            cooldowns,
            meta,
        })
    }

    fn decode_ts(bytes: &[u8]) -> FaucetResult<i64> {
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| FaucetError::Internal("Invalid timestamp format".to_string()))?;
        Ok(i64::from_be_bytes(arr))
    }

    /// All claims for an address, most recent first. Audit helper.
    pub fn claims_for_address(&self, address: &Address) -> FaucetResult<Vec<ClaimRecord>> {
        let wanted = address.to_hex();
        let mut records = Vec::new();

        for item in self.claims.iter().rev() {
            let (_, value) = item?;
            let record = decode_claim(&value)?;
            if record.address == wanted {
                records.push(record);
            }
        }
        Ok(records)
    }
}

fn decode_claim(bytes: &[u8]) -> FaucetResult<ClaimRecord> {
    bincode::deserialize(bytes).map_err(|e| FaucetError::Internal(e.to_string()))
}

impl Ledger for SledLedger {
    fn last_dispense(&self, key: &CooldownKey) -> FaucetResult<Option<i64>> {
        match self.cooldowns.get(key.storage_key())? {
            Some(bytes) => Ok(Some(Self::decode_ts(&bytes)?)),
            None => Ok(None),
        }
    }

    fn commit(&self, dispense: &Dispense<'_>) -> FaucetResult<ClaimRecord> {
        let identity_key = CooldownKey::identity(dispense.identity).storage_key();
        let address_key = CooldownKey::address(dispense.address).storage_key();
        let claim_id = self.db.generate_id()?;

        let result = (&self.claims, &self.cooldowns, &self.meta).transaction(|(claims, cooldowns, meta)| {
            let last = match meta.get(LAST_CLAIM_KEY)? {
                Some(bytes) => Self::decode_ts(&bytes).map_err(ConflictableTransactionError::Abort)?,
                None => i64::MIN,
            };
            let timestamp = dispense.now.max(last);

            let record = ClaimRecord {
                identity: dispense.identity.to_string(),
                address: dispense.address.to_hex(),
                timestamp,
                tx_hash: dispense.tx_hash.to_string(),
                amount: dispense.amount.to_string(),
            };
            let value = bincode::serialize(&record)
                .map_err(|e| ConflictableTransactionError::Abort(FaucetError::Internal(e.to_string())))?;

            let mut claim_key = timestamp.to_be_bytes().to_vec();
            claim_key.extend_from_slice(&claim_id.to_be_bytes());

            let ts = timestamp.to_be_bytes();
            claims.insert(claim_key, value)?;
            cooldowns.insert(identity_key.as_slice(), &ts[..])?;
            cooldowns.insert(address_key.as_slice(), &ts[..])?;
            meta.insert(LAST_CLAIM_KEY, &ts[..])?;

            Ok(record)
        });

        let record = result.map_err(|e| match e {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => FaucetError::Database(err),
        })?;
        self.db.flush()?;

        debug!("Recorded claim for {} from {}", record.address, record.identity);
        Ok(record)
    }

    fn recent_claims(&self, limit: usize) -> FaucetResult<Vec<String>> {
        self.claims
            .iter()
            .rev()
            .take(limit)
            .map(|item| {
                let (_, value) = item?;
                Ok(decode_claim(&value)?.address)
            })
            .collect()
    }

    fn stats(&self) -> FaucetResult<LedgerStats> {
        Ok(LedgerStats {
            total_claims: self.claims.len(),
            unique_addresses: self.cooldowns.scan_prefix(b"address:").count(),
        })
    }
}

/// Plain in-memory ledger. No durability; a single mutex makes `commit` atomic.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    claims: Vec<ClaimRecord>,
    cooldowns: HashMap<CooldownKey, i64>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> FaucetResult<std::sync::MutexGuard<'_, MemoryState>> {
        self.inner
            .lock()
            .map_err(|_| FaucetError::Internal("ledger mutex poisoned".to_string()))
    }
}

impl Ledger for MemoryLedger {
    fn last_dispense(&self, key: &CooldownKey) -> FaucetResult<Option<i64>> {
        Ok(self.state()?.cooldowns.get(key).copied())
    }

    fn commit(&self, dispense: &Dispense<'_>) -> FaucetResult<ClaimRecord> {
        let mut state = self.state()?;
        let last = state.claims.last().map_or(i64::MIN, |c| c.timestamp);
        let timestamp = dispense.now.max(last);

        let record = ClaimRecord {
            identity: dispense.identity.to_string(),
            address: dispense.address.to_hex(),
            timestamp,
            tx_hash: dispense.tx_hash.to_string(),
            amount: dispense.amount.to_string(),
        };
        state.claims.push(record.clone());
        state.cooldowns.insert(CooldownKey::identity(dispense.identity), timestamp);
        state.cooldowns.insert(CooldownKey::address(dispense.address), timestamp);
        Ok(record)
    }

    fn recent_claims(&self, limit: usize) -> FaucetResult<Vec<String>> {
        let state = self.state()?;
        Ok(state.claims.iter().rev().take(limit).map(|c| c.address.clone()).collect())
    }

    fn stats(&self) -> FaucetResult<LedgerStats> {
        let state = self.state()?;
        Ok(LedgerStats {
            total_claims: state.claims.len(),
            unique_addresses: state
                .cooldowns
                .keys()
                .filter(|k| matches!(k, CooldownKey::Address(_)))
                .count(),
        })
    }
}
