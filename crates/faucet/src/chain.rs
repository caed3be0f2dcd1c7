//! Transfer capability backed by an EVM JSON-RPC node

use crate::config::FaucetConfig;
use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use faucet_common::Address;
use k256::ecdsa::SigningKey;
use rlp::RlpStream;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Why a transfer did not reach the network. The message is for logs only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransferError(pub String);

/// Sends a fixed amount to an address and returns the transaction hash.
#[async_trait]
pub trait TransferCapability: Send + Sync {
    async fn transfer(&self, to: &Address, amount: u128) -> Result<String, TransferError>;

    /// Address funds are sent from.
    fn source(&self) -> Address;

    /// Spendable balance of the source account, in wei.
    async fn balance(&self) -> Result<u128, TransferError>;
}

/// RPC client for interacting with blockchain
pub struct RpcClient {
    rpc_url: String,
    client: reqwest::Client,
}

impl RpcClient {
    pub fn new(rpc_url: String, timeout: Duration) -> FaucetResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FaucetError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { rpc_url, client })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, TransferError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TransferError(format!("{} request failed: {}", method, e)))?;

        let json: Value = response
            .json()
            .await
            .map_err(|e| TransferError(format!("{} invalid response: {}", method, e)))?;

        if let Some(error) = json.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(TransferError(format!("{}: {}", method, message)));
        }

        Ok(json.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<u128, TransferError> {
        let value = self.call(method, params).await?;
        parse_quantity(&value).ok_or_else(|| TransferError(format!("{}: bad quantity {}", method, value)))
    }

    pub async fn get_balance(&self, address: &Address) -> Result<u128, TransferError> {
        self.quantity("eth_getBalance", json!([address.to_hex(), "latest"])).await
    }

    pub async fn get_transaction_count(&self, address: &Address) -> Result<u64, TransferError> {
        let count = self
            .quantity("eth_getTransactionCount", json!([address.to_hex(), "pending"]))
            .await?;
        u64::try_from(count).map_err(|_| TransferError("nonce out of range".to_string()))
    }

    pub async fn gas_price(&self) -> Result<u128, TransferError> {
        self.quantity("eth_gasPrice", json!([])).await
    }

    pub async fn get_chain_id(&self) -> Result<u64, TransferError> {
        let id = self.quantity("eth_chainId", json!([])).await?;
        u64::try_from(id).map_err(|_| TransferError("chain id out of range".to_string()))
    }

    pub async fn send_raw_transaction(&self, tx_data: &str) -> Result<String, TransferError> {
        let result = self.call("eth_sendRawTransaction", json!([tx_data])).await?;
        Ok(result.as_str().unwrap_or_default().to_string())
    }
}

/// `0x`-prefixed hex quantity
fn parse_quantity(value: &Value) -> Option<u128> {
    let digits = value.as_str()?.strip_prefix("0x")?;
    if digits.is_empty() {
        return Some(0);
    }
    u128::from_str_radix(digits, 16).ok()
}

/// Derive the account address from a secp256k1 key
pub fn address_of(signing_key: &SigningKey) -> Address {
    let public_key = signing_key.verifying_key().to_encoded_point(false);
    // Skip the 0x04 uncompressed marker
    let hash = keccak_hash::keccak(&public_key.as_bytes()[1..]);
    Address::from_slice(&hash.0[12..])
}

/// Big-endian integer with leading zero bytes removed, as RLP expects.
fn be_trimmed(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

/// Legacy (pre-1559) value transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransfer {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: u128,
    pub chain_id: u64,
}

impl LegacyTransfer {
    fn append_body(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&be_trimmed(&self.gas_price.to_be_bytes()));
        stream.append(&self.gas_limit);
        stream.append(&self.to.0.to_vec());
        stream.append(&be_trimmed(&self.value.to_be_bytes()));
        stream.append_empty_data(); // data
    }

    /// EIP-155 signing payload
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&self.chain_id);
        stream.append_empty_data();
        stream.append_empty_data();
        keccak_hash::keccak(stream.out()).0
    }

    /// Signed, RLP-encoded transaction ready for `eth_sendRawTransaction`
    pub fn sign(&self, signing_key: &SigningKey) -> Result<Vec<u8>, TransferError> {
        let (signature, recovery_id) = signing_key
            .sign_prehash_recoverable(&self.signing_hash())
            .map_err(|e| TransferError(format!("signing failed: {}", e)))?;

        let v = self
            .chain_id
            .checked_mul(2)
            .and_then(|v| v.checked_add(35 + u64::from(recovery_id.to_byte())))
            .ok_or_else(|| TransferError(format!("chain id {} out of range for EIP-155", self.chain_id)))?;
        let r_bytes = signature.r().to_bytes();
        let s_bytes = signature.s().to_bytes();

        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&v);
        stream.append(&be_trimmed(&r_bytes));
        stream.append(&be_trimmed(&s_bytes));
        Ok(stream.out().to_vec())
    }
}

/// Signs and broadcasts transfers from the faucet account.
pub struct ChainTransfer {
    rpc: RpcClient,
    signing_key: SigningKey,
    address: Address,
    chain_id: u64,
    gas_limit: u64,
    gas_price: Option<u128>,
    /// Next nonce to hand out; `None` means re-read from the node.
    next_nonce: Mutex<Option<u64>>,
}

impl ChainTransfer {
    /// Build the client and resolve the chain id if it was not configured.
    pub async fn connect(config: &FaucetConfig) -> FaucetResult<Self> {
        let rpc = RpcClient::new(config.rpc_url.clone(), config.http_timeout())?;
        let signing_key = config.signing_key()?;
        let address = address_of(&signing_key);

        let chain_id = match config.chain_id {
            Some(id) => id,
            None => rpc
                .get_chain_id()
                .await
                .map_err(|e| FaucetError::Rpc(e.to_string()))?,
        };

        info!("Faucet address: {}, chain id: {}", address, chain_id);

        Ok(Self {
            rpc,
            signing_key,
            address,
            chain_id,
            gas_limit: config.gas_limit,
            gas_price: config.gas_price_wei()?,
            next_nonce: Mutex::new(None),
        })
    }

    async fn reserve_nonce(&self) -> Result<u64, TransferError> {
        let mut next = self.next_nonce.lock().await;
        let nonce = match *next {
            Some(nonce) => nonce,
            None => self.rpc.get_transaction_count(&self.address).await?,
        };
        *next = Some(nonce + 1);
        Ok(nonce)
    }

    async fn reset_nonce(&self) {
        *self.next_nonce.lock().await = None;
    }

    async fn build_and_send(&self, to: &Address, amount: u128) -> Result<String, TransferError> {
        let gas_price = match self.gas_price {
            Some(price) => price,
            None => self.rpc.gas_price().await?,
        };
        let nonce = self.reserve_nonce().await?;

        let tx = LegacyTransfer {
            nonce,
            gas_price,
            gas_limit: self.gas_limit,
            to: *to,
            value: amount,
            chain_id: self.chain_id,
        };
        let raw = tx.sign(&self.signing_key)?;
        let local_hash = format!("0x{}", hex::encode(keccak_hash::keccak(&raw).0));
        debug!("Broadcasting nonce {} to {}, local hash {}", nonce, to, local_hash);

        let tx_hash = self
            .rpc
            .send_raw_transaction(&format!("0x{}", hex::encode(&raw)))
            .await?;

        Ok(if tx_hash.is_empty() { local_hash } else { tx_hash })
    }
}

#[async_trait]
impl TransferCapability for ChainTransfer {
    async fn transfer(&self, to: &Address, amount: u128) -> Result<String, TransferError> {
        match self.build_and_send(to, amount).await {
            Ok(tx_hash) => {
                info!("Transaction sent: {}", tx_hash);
                Ok(tx_hash)
            }
            Err(e) => {
                warn!("Transfer to {} failed, nonce will be re-read: {}", to, e);
                self.reset_nonce().await;
                Err(e)
            }
        }
    }

    fn source(&self) -> Address {
        self.address
    }

    async fn balance(&self) -> Result<u128, TransferError> {
        self.rpc.get_balance(&self.address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

    fn key(hex_key: &str) -> SigningKey {
        SigningKey::from_slice(&hex::decode(hex_key).unwrap()).unwrap()
    }

    #[test]
    fn test_address_derivation() {
        let signing_key = key("0000000000000000000000000000000000000000000000000000000000000001");
        assert_eq!(
            address_of(&signing_key).to_hex(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&json!("0x0")), Some(0));
        assert_eq!(parse_quantity(&json!("0x")), Some(0));
        assert_eq!(parse_quantity(&json!("0x279f")), Some(10143));
        assert_eq!(parse_quantity(&json!("279f")), None);
        assert_eq!(parse_quantity(&json!(12)), None);
        assert_eq!(parse_quantity(&Value::Null), None);
    }

    #[test]
    fn test_be_trimmed() {
        assert_eq!(be_trimmed(&0u128.to_be_bytes()), Vec::<u8>::new());
        assert_eq!(be_trimmed(&1_000_000_000_000_000u128.to_be_bytes()), vec![0x03, 0x8d, 0x7e, 0xa4, 0xc6, 0x80, 0x00]);
        assert_eq!(be_trimmed(&[0, 0, 1, 0]), vec![1, 0]);
    }

    #[test]
    fn test_signed_transfer_recovers_to_sender() {
        let signing_key = key("4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318");
        let tx = LegacyTransfer {
            nonce: 7,
            gas_price: 50_000_000_000,
            gas_limit: 21000,
            to: Address::parse("0x111111111111111111111111111111111111111d").unwrap(),
            value: 1_000_000_000_000_000,
            chain_id: 10143,
        };

        let raw = tx.sign(&signing_key).unwrap();
        let decoded = rlp::Rlp::new(&raw);
        assert_eq!(decoded.item_count().unwrap(), 9);
        assert_eq!(decoded.val_at::<u64>(0).unwrap(), 7);
        assert_eq!(decoded.val_at::<Vec<u8>>(3).unwrap(), tx.to.0.to_vec());

        let v: u64 = decoded.val_at(6).unwrap();
        let recid = v - 10143 * 2 - 35;
        assert!(recid <= 1);

        let mut sig = [0u8; 64];
        let r: Vec<u8> = decoded.val_at(7).unwrap();
        let s: Vec<u8> = decoded.val_at(8).unwrap();
        sig[32 - r.len()..32].copy_from_slice(&r);
        sig[64 - s.len()..].copy_from_slice(&s);

        let signature = Signature::from_slice(&sig).unwrap();
        let recovered = VerifyingKey::recover_from_prehash(
            &tx.signing_hash(),
            &signature,
            RecoveryId::from_byte(recid as u8).unwrap(),
        )
        .unwrap();
        assert_eq!(&recovered, signing_key.verifying_key());
    }

    #[test]
    fn test_oversized_chain_id_is_rejected() {
        let signing_key = key("4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318");
        let mut tx = LegacyTransfer {
            nonce: 0,
            gas_price: 1,
            gas_limit: 21000,
            to: Address::parse("0x111111111111111111111111111111111111111d").unwrap(),
            value: 1,
            chain_id: u64::MAX,
        };

        let err = tx.sign(&signing_key).unwrap_err();
        assert!(err.0.contains("out of range"));

        // doubling fits but the +35 offset does not
        tx.chain_id = u64::MAX / 2;
        assert!(tx.sign(&signing_key).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_node_is_transfer_error() {
        let rpc = RpcClient::new("http://127.0.0.1:1".to_string(), Duration::from_millis(500)).unwrap();
        let err = rpc.get_chain_id().await.unwrap_err();
        assert!(err.0.contains("eth_chainId"));
    }
}
