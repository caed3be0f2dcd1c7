//! Faucet configuration

use crate::error::{FaucetError, FaucetResult};
use faucet_common::utils::{load_layered, LoggingConfig};
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix, e.g. `FAUCET_RPC_URL`.
pub const ENV_PREFIX: &str = "FAUCET";

/// Faucet service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaucetConfig {
    /// Server address
    pub server_addr: String,

    /// RPC endpoint for blockchain
    pub rpc_url: String,

    /// Chain id for EIP-155 signing; queried from the node when unset
    pub chain_id: Option<u64>,

    /// Faucet account private key
    pub private_key: Option<String>,

    /// Amount to dispense per request (in wei)
    pub dispense_amount: String,

    /// Display symbol of the dispensed token
    pub token_symbol: String,

    /// Decimals used to render the dispensed amount
    pub token_decimals: u32,

    /// Cooldown per requester and per address (seconds)
    pub cooldown_secs: u64,

    /// Gas limit for transfers
    pub gas_limit: u64,

    /// Fixed gas price (in wei); queried per transfer when unset
    pub gas_price: Option<String>,

    /// Enable captcha verification
    pub captcha_enabled: bool,

    /// Captcha secret key
    pub captcha_secret: Option<String>,

    /// Captcha site key rendered into the form
    pub captcha_site_key: String,

    /// Captcha verification endpoint
    pub captcha_verify_url: String,

    /// Timeout for outbound HTTP calls (seconds)
    pub http_timeout_secs: u64,

    /// Behind a reverse proxy: use the last X-Forwarded-For entry as requester identity
    pub trust_forwarded_for: bool,

    /// Database path
    pub db_path: String,

    /// Number of recent claims shown on the landing page
    pub recent_claims_limit: usize,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Enable /metrics
    pub metrics_enabled: bool,

    pub logging: LoggingConfig,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:5000".to_string(),
            rpc_url: "https://testnet-rpc.monad.xyz".to_string(),
            chain_id: None,
            private_key: None,
            dispense_amount: "1000000000000000".to_string(), // 0.001 MONAD
            token_symbol: "MONAD".to_string(),
            token_decimals: 18,
            cooldown_secs: 86400, // 24 hours
            gas_limit: 21000,
            gas_price: None,
            captcha_enabled: true,
            captcha_secret: None,
            captcha_site_key: String::new(),
            captcha_verify_url: "https://www.google.com/recaptcha/api/siteverify".to_string(),
            http_timeout_secs: 10,
            trust_forwarded_for: false,
            db_path: "./faucet_data".to_string(),
            recent_claims_limit: 10,
            cors_enabled: true,
            metrics_enabled: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl FaucetConfig {
    /// Defaults, then the optional file, then `FAUCET_*` environment variables.
    pub fn load(path: Option<&Path>) -> FaucetResult<Self> {
        load_layered(path, ENV_PREFIX).map_err(|e| FaucetError::Config(format!("{:#}", e)))
    }

    /// Check everything that would otherwise fail at the first request.
    pub fn validate(&self) -> FaucetResult<()> {
        self.signing_key()?;

        if self.dispense_amount_wei()? == 0 {
            return Err(FaucetError::Config("dispense_amount must be positive".to_string()));
        }
        if self.cooldown_secs == 0 {
            return Err(FaucetError::Config("cooldown_secs must be positive".to_string()));
        }
        if self.captcha_enabled && self.captcha_secret.as_deref().map_or(true, str::is_empty) {
            return Err(FaucetError::Config(
                "captcha_secret is required when captcha is enabled".to_string(),
            ));
        }
        if let Some(price) = &self.gas_price {
            parse_wei(price, "gas_price")?;
        }
        Ok(())
    }

    /// Decode the configured private key into a signing key
    pub fn signing_key(&self) -> FaucetResult<SigningKey> {
        let raw = self
            .private_key
            .as_deref()
            .ok_or_else(|| FaucetError::Config("private_key is not set".to_string()))?;
        let private_key_hex = raw.trim().strip_prefix("0x").unwrap_or(raw.trim());

        let bytes = hex::decode(private_key_hex)
            .map_err(|e| FaucetError::Config(format!("Invalid private key: {}", e)))?;
        SigningKey::from_slice(&bytes)
            .map_err(|_| FaucetError::Config("Invalid signing key".to_string()))
    }

    pub fn dispense_amount_wei(&self) -> FaucetResult<u128> {
        parse_wei(&self.dispense_amount, "dispense_amount")
    }

    pub fn gas_price_wei(&self) -> FaucetResult<Option<u128>> {
        self.gas_price
            .as_deref()
            .map(|p| parse_wei(p, "gas_price"))
            .transpose()
    }

    /// Get cooldown duration
    pub fn cooldown_duration(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Human-readable payout, e.g. `0.001 MONAD`
    pub fn dispense_display(&self) -> FaucetResult<String> {
        Ok(format!(
            "{} {}",
            format_units(self.dispense_amount_wei()?, self.token_decimals),
            self.token_symbol
        ))
    }
}

fn parse_wei(value: &str, field: &str) -> FaucetResult<u128> {
    value
        .trim()
        .parse::<u128>()
        .map_err(|_| FaucetError::Config(format!("{} is not a wei amount: {}", field, value)))
}

/// Render an integer amount with `decimals` fractional digits, trimming trailing zeros.
pub fn format_units(amount: u128, decimals: u32) -> String {
    let Some(base) = 10u128.checked_pow(decimals) else {
        return amount.to_string();
    };
    let whole = amount / base;
    let frac = amount % base;
    if frac == 0 {
        return whole.to_string();
    }

    let frac = format!("{:0width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> FaucetConfig {
        FaucetConfig {
            private_key: Some(
                "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318".to_string(),
            ),
            captcha_secret: Some("secret".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(1_000_000_000_000_000, 18), "0.001");
        assert_eq!(format_units(1_000_000_000_000_000_000, 18), "1");
        assert_eq!(format_units(1_500_000_000_000_000_000, 18), "1.5");
        assert_eq!(format_units(1, 18), "0.000000000000000001");
        assert_eq!(format_units(42, 0), "42");
    }

    #[test]
    fn test_default_payout_display() {
        let config = FaucetConfig::default();
        assert_eq!(config.dispense_display().unwrap(), "0.001 MONAD");
        assert_eq!(config.cooldown_duration(), Duration::from_secs(86400));
        assert!(!config.trust_forwarded_for);
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_private_key() {
        let config = FaucetConfig {
            private_key: None,
            ..valid_config()
        };
        assert!(matches!(config.validate(), Err(FaucetError::Config(_))));

        let config = FaucetConfig {
            private_key: Some("0x1234".to_string()),
            ..valid_config()
        };
        assert!(matches!(config.validate(), Err(FaucetError::Config(_))));
    }

    #[test]
    fn test_validate_captcha_secret() {
        let config = FaucetConfig {
            captcha_secret: None,
            ..valid_config()
        };
        assert!(config.validate().is_err());

        let config = FaucetConfig {
            captcha_enabled: false,
            captcha_secret: None,
            ..valid_config()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_amounts() {
        let config = FaucetConfig {
            dispense_amount: "0".to_string(),
            ..valid_config()
        };
        assert!(config.validate().is_err());

        let config = FaucetConfig {
            gas_price: Some("fast".to_string()),
            ..valid_config()
        };
        assert!(config.validate().is_err());

        let config = FaucetConfig {
            gas_price: Some("1000000000".to_string()),
            ..valid_config()
        };
        assert_eq!(config.gas_price_wei().unwrap(), Some(1_000_000_000));
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "server_addr = \"127.0.0.1:8080\"\ncooldown_secs = 60\n\n[logging]\nlevel = \"debug\""
        )
        .unwrap();

        let config = FaucetConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.server_addr, "127.0.0.1:8080");
        assert_eq!(config.cooldown_secs, 60);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.token_symbol, "MONAD");
    }
}
