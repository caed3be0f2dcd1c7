//! Eligibility decision made before any chain interaction

use crate::error::{CooldownKind, FaucetError, FaucetResult};
use crate::ledger::{within_window, CooldownKey, Ledger};
use faucet_common::Address;
use std::fmt;
use std::time::Duration;

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidAddress,
    VerificationFailed,
    CooldownIdentity,
    CooldownAddress,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InvalidAddress => "invalid_address",
            RejectReason::VerificationFailed => "verification_failed",
            RejectReason::CooldownIdentity => "cooldown_identity",
            RejectReason::CooldownAddress => "cooldown_address",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RejectReason> for FaucetError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::InvalidAddress => FaucetError::InvalidAddress("malformed address".to_string()),
            RejectReason::VerificationFailed => FaucetError::VerificationFailed,
            RejectReason::CooldownIdentity => FaucetError::Cooldown(CooldownKind::Identity),
            RejectReason::CooldownAddress => FaucetError::Cooldown(CooldownKind::Address),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow(Address),
    Reject(RejectReason),
}

/// Shape check shared by the gate and the coordinator's early exit.
pub fn check_address(raw: &str) -> Result<Address, RejectReason> {
    Address::parse(raw).map_err(|_| RejectReason::InvalidAddress)
}

/// Runs the checks cheapest first and stops at the first failure.
#[derive(Debug, Clone)]
pub struct EligibilityGate {
    window_secs: u64,
}

impl EligibilityGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window_secs: window.as_secs(),
        }
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub fn evaluate<L: Ledger + ?Sized>(
        &self,
        ledger: &L,
        identity: &str,
        address: &str,
        verified: bool,
        now: i64,
    ) -> FaucetResult<Decision> {
        let address = match check_address(address) {
            Ok(address) => address,
            Err(reason) => return Ok(Decision::Reject(reason)),
        };

        if !verified {
            return Ok(Decision::Reject(RejectReason::VerificationFailed));
        }

        if ledger.is_eligible(identity, &address, now, self.window_secs)? {
            return Ok(Decision::Allow(address));
        }

        // Blocked; name the key, identity first
        if self.cooling_down(ledger, &CooldownKey::identity(identity), now)? {
            return Ok(Decision::Reject(RejectReason::CooldownIdentity));
        }

        if self.cooling_down(ledger, &CooldownKey::address(&address), now)? {
            return Ok(Decision::Reject(RejectReason::CooldownAddress));
        }

        Ok(Decision::Allow(address))
    }

    fn cooling_down<L: Ledger + ?Sized>(&self, ledger: &L, key: &CooldownKey, now: i64) -> FaucetResult<bool> {
        Ok(ledger
            .last_dispense(key)?
            .is_some_and(|last| within_window(last, now, self.window_secs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{ClaimRecord, Dispense, LedgerStats, MemoryLedger};

    const DAY: i64 = 86400;
    const ADDR: &str = "0x111111111111111111111111111111111111111d";
    const OTHER: &str = "0x222222222222222222222222222222222222222e";

    fn gate() -> EligibilityGate {
        EligibilityGate::new(Duration::from_secs(DAY as u64))
    }

    fn seeded(identity: &str, address: &str, at: i64) -> MemoryLedger {
        let ledger = MemoryLedger::new();
        let address = Address::parse(address).unwrap();
        ledger
            .commit(&Dispense {
                identity,
                address: &address,
                tx_hash: "0x01",
                amount: 1,
                now: at,
            })
            .unwrap();
        ledger
    }

    #[test]
    fn test_allow_fresh_request() {
        let ledger = MemoryLedger::new();
        let decision = gate().evaluate(&ledger, "203.0.113.5", ADDR, true, 0).unwrap();
        assert_eq!(decision, Decision::Allow(Address::parse(ADDR).unwrap()));
    }

    #[test]
    fn test_invalid_address_checked_first() {
        let ledger = seeded("203.0.113.5", ADDR, 0);
        for bad in ["not-an-address", "", "0x1234", "111111111111111111111111111111111111111d"] {
            let decision = gate().evaluate(&ledger, "203.0.113.5", bad, false, 1).unwrap();
            assert_eq!(decision, Decision::Reject(RejectReason::InvalidAddress), "{}", bad);
        }
    }

    #[test]
    fn test_verification_before_cooldown() {
        let ledger = seeded("203.0.113.5", ADDR, 0);
        let decision = gate().evaluate(&ledger, "203.0.113.5", ADDR, false, 1).unwrap();
        assert_eq!(decision, Decision::Reject(RejectReason::VerificationFailed));
    }

    #[test]
    fn test_identity_cooldown_regardless_of_address() {
        let ledger = seeded("203.0.113.5", ADDR, 100);
        let decision = gate().evaluate(&ledger, "203.0.113.5", OTHER, true, 101).unwrap();
        assert_eq!(decision, Decision::Reject(RejectReason::CooldownIdentity));
    }

    #[test]
    fn test_identity_reported_before_address() {
        let ledger = seeded("203.0.113.5", ADDR, 100);
        let decision = gate().evaluate(&ledger, "203.0.113.5", ADDR, true, 101).unwrap();
        assert_eq!(decision, Decision::Reject(RejectReason::CooldownIdentity));
    }

    #[test]
    fn test_address_cooldown_regardless_of_identity() {
        let ledger = seeded("203.0.113.5", ADDR, 100);
        let decision = gate().evaluate(&ledger, "198.51.100.7", ADDR, true, 101).unwrap();
        assert_eq!(decision, Decision::Reject(RejectReason::CooldownAddress));

        // mixed-case spelling of the same address
        let upper = ADDR.to_uppercase().replacen("0X", "0x", 1);
        let decision = gate().evaluate(&ledger, "198.51.100.7", &upper, true, 101).unwrap();
        assert_eq!(decision, Decision::Reject(RejectReason::CooldownAddress));
    }

    #[test]
    fn test_window_boundary() {
        let ledger = seeded("203.0.113.5", ADDR, 1_000);
        let g = gate();

        let just_before = g.evaluate(&ledger, "203.0.113.5", ADDR, true, 1_000 + DAY - 1).unwrap();
        assert!(matches!(just_before, Decision::Reject(_)));

        let at_window = g.evaluate(&ledger, "203.0.113.5", ADDR, true, 1_000 + DAY).unwrap();
        assert!(matches!(at_window, Decision::Allow(_)));
    }

    /// Answers the combined check on its own and ignores the cooldown rows.
    struct Waived(MemoryLedger);

    impl Ledger for Waived {
        fn last_dispense(&self, key: &CooldownKey) -> FaucetResult<Option<i64>> {
            self.0.last_dispense(key)
        }

        fn commit(&self, dispense: &Dispense<'_>) -> FaucetResult<ClaimRecord> {
            self.0.commit(dispense)
        }

        fn recent_claims(&self, limit: usize) -> FaucetResult<Vec<String>> {
            self.0.recent_claims(limit)
        }

        fn stats(&self) -> FaucetResult<LedgerStats> {
            self.0.stats()
        }

        fn is_eligible(&self, _: &str, _: &Address, _: i64, _: u64) -> FaucetResult<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_gate_defers_to_ledger_eligibility() {
        let ledger = Waived(seeded("203.0.113.5", ADDR, 100));
        let decision = gate().evaluate(&ledger, "203.0.113.5", ADDR, true, 101).unwrap();
        assert_eq!(decision, Decision::Allow(Address::parse(ADDR).unwrap()));
    }

    #[test]
    fn test_reject_reason_maps_to_error() {
        let err: FaucetError = RejectReason::CooldownAddress.into();
        assert_eq!(err.reason(), RejectReason::CooldownAddress.as_str());
        let err: FaucetError = RejectReason::InvalidAddress.into();
        assert_eq!(err.reason(), "invalid_address");
    }
}
