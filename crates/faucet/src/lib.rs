//! Single-endpoint testnet faucet
//!
//! A request is shape-checked, human-verified, checked against the
//! per-requester and per-address cooldowns, and only then paid out. The
//! cooldown ledger is committed in one transaction after the transfer is
//! accepted by the node, with per-key locks held from the eligibility check
//! through the commit.

pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod locks;
pub mod metrics;
pub mod service;
pub mod verifier;

pub use chain::{ChainTransfer, TransferCapability, TransferError};
pub use config::FaucetConfig;
pub use error::{CooldownKind, FaucetError, FaucetResult};
pub use gate::{Decision, EligibilityGate, RejectReason};
pub use ledger::{ClaimRecord, CooldownKey, Ledger, LedgerStats, MemoryLedger, SledLedger};
pub use service::{DispenseReceipt, DispenseRequest, FaucetService, FaucetStatus};
pub use verifier::{DisabledVerifier, HumanVerifier, RecaptchaVerifier};
