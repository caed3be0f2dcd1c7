//! Dispatch coordinator: shape check, verification, eligibility, transfer, commit

use crate::chain::TransferCapability;
use crate::config::FaucetConfig;
use crate::error::{FaucetError, FaucetResult};
use crate::gate::{check_address, Decision, EligibilityGate};
use crate::ledger::{CooldownKey, Dispense, Ledger};
use crate::locks::KeyLocks;
use crate::metrics::FaucetMetrics;
use crate::verifier::HumanVerifier;
use chrono::Utc;
use faucet_common::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Source of "now" in seconds since epoch.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Inbound dispense request, already stripped of transport details.
#[derive(Debug, Clone, Default)]
pub struct DispenseRequest {
    /// Requester identity, normally the client IP
    pub identity: String,
    pub address: Option<String>,
    /// Human-verification token
    pub token: Option<String>,
}

/// Dispense response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispenseReceipt {
    pub tx_hash: String,
    /// Address as the requester spelled it
    pub address: String,
    /// Payout as shown to users, e.g. `0.001 MONAD`
    pub amount: String,
    pub timestamp: i64,
}

impl DispenseReceipt {
    pub fn message(&self) -> String {
        format!("Sent {} to {}", self.amount, self.address)
    }
}

/// Faucet status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaucetStatus {
    pub address: String,
    /// `None` when the node could not be reached
    pub balance: Option<String>,
    pub dispense_amount: String,
    pub cooldown_secs: u64,
    pub total_claims: usize,
    pub unique_addresses: usize,
}

/// Progress of a single request. Terminal failures leave from any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    Received,
    ShapeChecked,
    Verified,
    Eligible,
    Submitted,
    Committed,
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchStage::Received => "received",
            DispatchStage::ShapeChecked => "shape_checked",
            DispatchStage::Verified => "verified",
            DispatchStage::Eligible => "eligible",
            DispatchStage::Submitted => "submitted",
            DispatchStage::Committed => "committed",
        };
        f.write_str(name)
    }
}

/// Faucet service
pub struct FaucetService {
    gate: EligibilityGate,
    ledger: Arc<dyn Ledger>,
    verifier: Arc<dyn HumanVerifier>,
    transfer: Arc<dyn TransferCapability>,
    locks: KeyLocks,
    metrics: FaucetMetrics,
    clock: Clock,
    amount: u128,
    amount_display: String,
    recent_limit: usize,
    site_key: String,
}

impl FaucetService {
    /// Create new faucet service
    pub fn new(
        config: &FaucetConfig,
        ledger: Arc<dyn Ledger>,
        verifier: Arc<dyn HumanVerifier>,
        transfer: Arc<dyn TransferCapability>,
    ) -> FaucetResult<Self> {
        let metrics = FaucetMetrics::new().map_err(|e| FaucetError::Internal(e.to_string()))?;

        Ok(Self {
            gate: EligibilityGate::new(config.cooldown_duration()),
            ledger,
            verifier,
            transfer,
            locks: KeyLocks::new(),
            metrics,
            clock: Arc::new(|| Utc::now().timestamp()),
            amount: config.dispense_amount_wei()?,
            amount_display: config.dispense_display()?,
            recent_limit: config.recent_claims_limit,
            site_key: config.captcha_site_key.clone(),
        })
    }

    /// Replace the wall clock
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run one request to a terminal state.
    ///
    /// Once the request is verified, the rest runs on its own task. Dropping
    /// the returned future after that point does not stop the transfer or
    /// the ledger commit.
    pub async fn dispense(self: &Arc<Self>, request: &DispenseRequest) -> FaucetResult<DispenseReceipt> {
        let address = match self.screen(request).await {
            Ok(address) => address,
            Err(e) => {
                self.metrics.record_outcome(e.reason());
                return Err(e);
            }
        };

        let service = Arc::clone(self);
        let identity = request.identity.clone();
        let raw_address = request.address.clone().unwrap_or_default();

        let settled = tokio::spawn(async move {
            let result = service.settle(&identity, &raw_address, address).await;
            let outcome = match &result {
                Ok(_) => "committed",
                Err(e) => e.reason(),
            };
            service.metrics.record_outcome(outcome);
            result
        });

        settled.await.map_err(|e| {
            error!("Dispatch task for {} did not finish: {}", request.identity, e);
            FaucetError::Internal(e.to_string())
        })?
    }

    /// Shape check and human verification. Nothing here is held or written.
    async fn screen(&self, request: &DispenseRequest) -> FaucetResult<Address> {
        let identity = request.identity.as_str();
        let raw_address = request.address.as_deref().unwrap_or_default();
        info!("Dispense request from {}: address={}", identity, raw_address);
        debug!(stage = %DispatchStage::Received, identity);

        // Malformed input never costs a verifier call
        let address = check_address(raw_address).map_err(|reason| {
            info!("Rejected {} from {}: {}", raw_address, identity, reason);
            FaucetError::from(reason)
        })?;
        debug!(stage = %DispatchStage::ShapeChecked, identity);

        let verified = match request.token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => self.verifier.verify(token, Some(identity)).await,
            None => false,
        };
        if !verified {
            info!("Verification failed for {} ({})", identity, address);
            return Err(FaucetError::VerificationFailed);
        }
        debug!(stage = %DispatchStage::Verified, identity);

        Ok(address)
    }

    /// Eligibility, transfer and commit under the per-key locks.
    async fn settle(&self, identity: &str, raw_address: &str, address: Address) -> FaucetResult<DispenseReceipt> {
        // Held until the ledger is committed or the request fails
        let _guard = self
            .locks
            .lock_all(vec![CooldownKey::identity(identity), CooldownKey::address(&address)])
            .await;

        let now = (self.clock)();
        if let Decision::Reject(reason) = self.gate.evaluate(self.ledger.as_ref(), identity, raw_address, true, now)? {
            warn!("Rejected {} from {}: {}", address, identity, reason);
            return Err(reason.into());
        }
        debug!(stage = %DispatchStage::Eligible, identity);

        let timer = self.metrics.transfer_duration.start_timer();
        let submitted = self.transfer.transfer(&address, self.amount).await;
        timer.observe_duration();

        let tx_hash = submitted.map_err(|e| {
            error!("Transfer to {} for {} failed: {}", address, identity, e);
            FaucetError::Submission(e.0)
        })?;
        debug!(stage = %DispatchStage::Submitted, identity, tx_hash = %tx_hash);

        let record = self
            .ledger
            .commit(&Dispense {
                identity,
                address: &address,
                tx_hash: &tx_hash,
                amount: self.amount,
                now,
            })
            .map_err(|source| {
                error!(
                    identity,
                    address = %address,
                    tx_hash = %tx_hash,
                    timestamp = now,
                    "Funds sent but cooldown not recorded, manual reconciliation required: {}",
                    source
                );
                FaucetError::Consistency {
                    identity: identity.to_string(),
                    address: address.to_hex(),
                    tx_hash: tx_hash.clone(),
                    timestamp: now,
                    source: Box::new(source),
                }
            })?;
        debug!(stage = %DispatchStage::Committed, identity);

        info!("Successfully dispensed to {}, tx: {}", address, tx_hash);

        Ok(DispenseReceipt {
            tx_hash,
            address: raw_address.to_string(),
            amount: self.amount_display.clone(),
            timestamp: record.timestamp,
        })
    }

    /// Recently funded addresses, most recent first
    pub fn recent_claims(&self) -> FaucetResult<Vec<String>> {
        self.ledger.recent_claims(self.recent_limit)
    }

    /// Get faucet status
    pub async fn status(&self) -> FaucetResult<FaucetStatus> {
        let balance = match self.transfer.balance().await {
            Ok(balance) => Some(balance.to_string()),
            Err(e) => {
                warn!("Balance lookup failed: {}", e);
                None
            }
        };
        let stats = self.ledger.stats()?;

        Ok(FaucetStatus {
            address: self.transfer.source().to_hex(),
            balance,
            dispense_amount: self.amount_display.clone(),
            cooldown_secs: self.gate.window_secs(),
            total_claims: stats.total_claims,
            unique_addresses: stats.unique_addresses,
        })
    }

    pub fn metrics(&self) -> &FaucetMetrics {
        &self.metrics
    }

    pub fn site_key(&self) -> &str {
        &self.site_key
    }

    pub fn amount_display(&self) -> &str {
        &self.amount_display
    }
}
