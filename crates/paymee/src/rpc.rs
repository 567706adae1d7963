//! JSON-RPC access to EVM chains.
//!
//! [`ChainClient`] is the seam the rest of the crate talks to. The real
//! implementation is [`EthersChainClient`], which wraps an `ethers`
//! [`Provider`], optionally behind a [`SignerMiddleware`] holding a
//! [`LocalWallet`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{JsonRpcClient, JsonRpcError, Middleware, MiddlewareError, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{TransactionRequest, H160, H256, U256 as EthersU256};
use serde_json::Value;
use tracing::{debug, warn};

use crate::abi::U256;
use crate::address::Address;
use crate::chain::ChainEndpoint;
use crate::error::{Error, RpcError};

/// JSON-RPC error code geth and most providers use for reverts.
const EXECUTION_REVERTED_CODE: i64 = 3;

/// Gas estimate headroom, in percent.
const GAS_ESTIMATE_MARGIN: u64 = 20;

/// What a caller wants executed; nonce, gas and fees are filled in by the
/// client that submits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub to: Address,
    pub data: Vec<u8>,
    pub value: U256,
}

impl TxRequest {
    pub fn call(to: Address, data: Vec<u8>) -> Self {
        Self {
            to,
            data,
            value: U256::default(),
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

/// An event log from a transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<[u8; 32]>,
    pub data: Vec<u8>,
}

/// The subset of a transaction receipt the send flow reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub success: bool,
    pub logs: Vec<Log>,
}

/// Chain operations used by the balance reader and the send orchestrator.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Account that signs submitted transactions.
    fn sender(&self) -> Address;

    /// `eth_call` against the latest block.
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, RpcError>;

    async fn native_balance(&self, owner: Address) -> Result<U256, RpcError>;

    /// Sign and broadcast; returns the transaction hash.
    async fn submit(&self, tx: TxRequest) -> Result<String, Error>;

    /// `None` while the transaction is pending.
    async fn receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, RpcError>;
}

/// Opens a [`ChainClient`] for an endpoint.
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &ChainEndpoint) -> Result<Arc<dyn ChainClient>, Error>;
}

/// Poll for a receipt until it appears or `timeout` elapses.
///
/// The transaction is already broadcast, so every failure names it:
/// transport errors are retried until the deadline, anything else ends the
/// wait with [`Error::ReceiptUnavailable`].
pub async fn wait_for_receipt(
    client: &dyn ChainClient,
    tx_hash: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<TxReceipt, Error> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match client.receipt(tx_hash).await {
            Ok(Some(receipt)) => return Ok(receipt),
            Ok(None) => {}
            Err(err) => {
                let err = Error::from(err);
                if !err.is_transient() {
                    return Err(Error::ReceiptUnavailable {
                        tx_hash: tx_hash.to_string(),
                        message: err.to_string(),
                    });
                }
                warn!(tx_hash, error = %err, "receipt poll failed");
            }
        }
        if tokio::time::Instant::now() + poll_interval > deadline {
            return Err(Error::ConfirmationTimeout {
                tx_hash: tx_hash.to_string(),
            });
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Parse a hex private key into a wallet signing for `chain_id`.
///
/// The key itself never appears in the returned error.
pub fn wallet_from_key(private_key: &str, chain_id: u64) -> Result<LocalWallet, Error> {
    private_key
        .trim()
        .parse::<LocalWallet>()
        .map(|wallet| wallet.with_chain_id(chain_id))
        .map_err(|_| Error::Signer("invalid private key".to_string()))
}

/// [`ChainClient`] over any `ethers` middleware stack.
#[derive(Debug)]
pub struct EthersChainClient<M> {
    middleware: M,
    sender: Option<Address>,
}

impl<P: JsonRpcClient + 'static> EthersChainClient<SignerMiddleware<Provider<P>, LocalWallet>> {
    pub fn with_wallet(provider: Provider<P>, wallet: LocalWallet) -> Self {
        let sender = Address(wallet.address().0);
        Self {
            middleware: SignerMiddleware::new(provider, wallet),
            sender: Some(sender),
        }
    }
}

impl<P: JsonRpcClient + 'static> EthersChainClient<Provider<P>> {
    /// Reads only; [`ChainClient::submit`] fails with [`Error::Signer`].
    pub fn read_only(provider: Provider<P>) -> Self {
        Self {
            middleware: provider,
            sender: None,
        }
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainClient for EthersChainClient<M> {
    fn sender(&self) -> Address {
        self.sender.unwrap_or(Address::ZERO)
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        let mut request = TransactionRequest::new().to(h160(to)).data(data);
        if let Some(from) = self.sender {
            request = request.from(h160(from));
        }
        let typed: TypedTransaction = request.into();
        let out = self.middleware.call(&typed, None).await.map_err(rpc_error)?;
        Ok(out.to_vec())
    }

    async fn native_balance(&self, owner: Address) -> Result<U256, RpcError> {
        let balance = self
            .middleware
            .get_balance(h160(owner), None)
            .await
            .map_err(rpc_error)?;
        Ok(from_ethers_u256(balance))
    }

    async fn submit(&self, tx: TxRequest) -> Result<String, Error> {
        let from = self
            .sender
            .ok_or_else(|| Error::Signer("no signing key configured".to_string()))?;

        let request = TransactionRequest::new()
            .from(h160(from))
            .to(h160(tx.to))
            .data(tx.data)
            .value(to_ethers_u256(&tx.value)?);
        let mut typed: TypedTransaction = request.into();
        self.middleware
            .fill_transaction(&mut typed, None)
            .await
            .map_err(rpc_error)?;
        if let Some(estimate) = typed.gas().copied() {
            typed.set_gas(padded_gas(estimate));
        }
        debug!(
            %from,
            to = %tx.to,
            nonce = ?typed.nonce(),
            gas = ?typed.gas(),
            gas_price = ?typed.gas_price(),
            "signing transaction"
        );

        let pending = self
            .middleware
            .send_transaction(typed, None)
            .await
            .map_err(rpc_error)?;
        Ok(format!("{:?}", pending.tx_hash()))
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, RpcError> {
        let hash: H256 = tx_hash
            .parse()
            .map_err(|_| RpcError::UnexpectedResponse(format!("invalid tx hash {tx_hash}")))?;
        let receipt = self
            .middleware
            .get_transaction_receipt(hash)
            .await
            .map_err(rpc_error)?;
        let Some(receipt) = receipt else {
            return Ok(None);
        };
        let Some(block_number) = receipt.block_number else {
            return Ok(None);
        };

        Ok(Some(TxReceipt {
            transaction_hash: format!("{:?}", receipt.transaction_hash),
            block_number: block_number.as_u64(),
            // Pre-Byzantium receipts have no status; treat them as successful.
            success: receipt.status.map_or(true, |s| s.as_u64() == 1),
            logs: receipt
                .logs
                .into_iter()
                .map(|log| Log {
                    address: Address(log.address.0),
                    topics: log.topics.into_iter().map(|t| t.0).collect(),
                    data: log.data.to_vec(),
                })
                .collect(),
        }))
    }
}

/// Interpret a JSON-RPC error object.
pub(crate) fn classify_response(response: &JsonRpcError) -> RpcError {
    let message = response.message.clone();
    if response.code == EXECUTION_REVERTED_CODE || message.contains("revert") {
        let data = response
            .data
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|s| hex::decode(s.trim_start_matches("0x")).ok());
        RpcError::Reverted { message, data }
    } else {
        RpcError::Node {
            code: response.code,
            message,
        }
    }
}

/// Fold a middleware error into [`RpcError`].
fn rpc_error<E: MiddlewareError>(err: E) -> RpcError {
    if let Some(response) = err.as_error_response() {
        return classify_response(response);
    }
    if err.as_serde_error().is_some() {
        return RpcError::UnexpectedResponse(err.to_string());
    }
    RpcError::Transport(err.to_string())
}

fn padded_gas(estimate: EthersU256) -> EthersU256 {
    estimate + estimate * GAS_ESTIMATE_MARGIN / 100
}

fn h160(address: Address) -> H160 {
    H160(address.0)
}

fn to_ethers_u256(value: &U256) -> Result<EthersU256, Error> {
    if value.bits() > 256 {
        return Err(Error::InvalidRequest(format!("{value} does not fit in uint256")));
    }
    Ok(EthersU256::from_big_endian(&value.to_bytes_be()))
}

fn from_ethers_u256(value: EthersU256) -> U256 {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    U256::from_bytes_be(&buf)
}

#[cfg(feature = "http")]
pub use http::HttpConnector;

#[cfg(feature = "http")]
mod http {
    use std::sync::Arc;
    use std::time::Duration;

    use ethers::providers::{Http, Provider};
    use ethers::signers::{LocalWallet, Signer};
    use tracing::debug;

    use super::{wallet_from_key, ChainClient, Connector, EthersChainClient};
    use crate::chain::ChainEndpoint;
    use crate::error::Error;

    /// Opens [`EthersChainClient`]s over HTTP(S), sharing one signing key.
    pub struct HttpConnector {
        wallet: Option<LocalWallet>,
        timeout: Duration,
    }

    impl HttpConnector {
        /// Fails if `private_key` is present but not a valid secp256k1 key.
        pub fn new(private_key: Option<String>, timeout: Duration) -> Result<Self, Error> {
            // Rebound per endpoint in `connect`.
            let wallet = private_key
                .as_deref()
                .map(|key| wallet_from_key(key, 1))
                .transpose()?;
            Ok(Self { wallet, timeout })
        }
    }

    impl Connector for HttpConnector {
        fn connect(&self, endpoint: &ChainEndpoint) -> Result<Arc<dyn ChainClient>, Error> {
            let client = reqwest::Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| Error::Config(format!("cannot build http client: {e}")))?;
            let url = reqwest::Url::parse(&endpoint.rpc_url)
                .map_err(|e| Error::Config(format!("invalid rpc url {}: {e}", endpoint.rpc_url)))?;
            debug!(eid = endpoint.eid, chain_id = endpoint.chain_id, %url, "connecting");

            let provider = Provider::new(Http::new_with_client(url, client));
            let client: Arc<dyn ChainClient> = match &self.wallet {
                Some(wallet) => Arc::new(EthersChainClient::with_wallet(
                    provider,
                    wallet.clone().with_chain_id(endpoint.chain_id),
                )),
                None => Arc::new(EthersChainClient::read_only(provider)),
            };
            Ok(client)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::abi::keccak256;
    use crate::testing::{mined_receipt, node_error, ScriptedNode};

    const KEY: &str = "0x4f3edf983ac636a65a842ce7c78d9aa706d3b113bce9c46f30d7d21715b23b1d";

    type Signing = SignerMiddleware<Provider<ScriptedNode>, LocalWallet>;

    fn signing_client(node: &ScriptedNode) -> EthersChainClient<Signing> {
        let wallet = wallet_from_key(KEY, 11155111).unwrap();
        EthersChainClient::with_wallet(Provider::new(node.clone()), wallet)
    }

    fn word(n: u8) -> String {
        format!("0x{}{:02x}", "00".repeat(31), n)
    }

    #[test]
    fn test_classify_revert() {
        let err = classify_response(&JsonRpcError {
            code: 3,
            message: "execution reverted".to_string(),
            data: Some(json!("0x6c1ccdb5")),
        });
        match err {
            RpcError::Reverted { data, .. } => {
                assert_eq!(data, Some(vec![0x6c, 0x1c, 0xcd, 0xb5]))
            }
            other => panic!("expected revert, got {other:?}"),
        }

        let err = classify_response(&node_error(-32000, "nonce too low"));
        assert!(matches!(err, RpcError::Node { code: -32000, .. }));
    }

    #[test]
    fn test_wallet_from_key() {
        let wallet = wallet_from_key(KEY, 11155111).unwrap();
        assert_eq!(
            Address(wallet.address().0),
            Address::parse("0x90F8bf6A479f320ead074411a4B0e7944Ea8c9C1").unwrap()
        );
        assert_eq!(wallet.chain_id(), 11155111);

        let zero = "00".repeat(32);
        for bad in ["nothex", "0x00", zero.as_str()] {
            match wallet_from_key(bad, 1) {
                Err(Error::Signer(message)) => assert!(!message.contains(bad)),
                other => panic!("expected signer error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_padded_gas() {
        assert_eq!(padded_gas(EthersU256::from(100_000u64)), EthersU256::from(120_000u64));
        assert_eq!(padded_gas(EthersU256::from(21_000u64)), EthersU256::from(25_200u64));
    }

    #[test]
    fn test_u256_conversion() {
        let value = U256::from(10u64).pow(30);
        assert_eq!(from_ethers_u256(to_ethers_u256(&value).unwrap()), value);
        assert!(to_ethers_u256(&(U256::from(1u8) << 256)).is_err());
    }

    #[tokio::test]
    async fn test_call_sends_from_and_decodes() {
        let node = ScriptedNode::new(|method, _| match method {
            "eth_call" => Ok(json!(word(18))),
            other => Err(node_error(-32601, &format!("method {other} not found"))),
        });
        let client = signing_client(&node);
        let out = client
            .call(Address([2; 20]), vec![0x31, 0x3c, 0xe5, 0x67])
            .await
            .unwrap();
        assert_eq!(out[31], 18);

        let requests = node.requests();
        assert_eq!(requests[0].0, "eth_call");
        assert_eq!(requests[0].1[0]["data"], "0x313ce567");
        assert_eq!(
            requests[0].1[0]["from"],
            "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1"
        );
        assert_eq!(requests[0].1[1], "latest");
    }

    #[tokio::test]
    async fn test_call_revert_keeps_data() {
        let node = ScriptedNode::new(|_, _| {
            Err(JsonRpcError {
                code: 3,
                message: "execution reverted".to_string(),
                data: Some(json!("0x6c1ccdb5")),
            })
        });
        let client = EthersChainClient::read_only(Provider::new(node));
        let err = client.call(Address([2; 20]), vec![1, 2, 3, 4]).await.unwrap_err();
        assert!(matches!(err, RpcError::Reverted { data: Some(ref d), .. } if d.len() == 4));
    }

    #[tokio::test]
    async fn test_submit_signs_and_broadcasts() {
        let node = ScriptedNode::new(|method, params| match method {
            "eth_getTransactionCount" => Ok(json!("0x5")),
            "eth_gasPrice" => Ok(json!("0x3b9aca00")),
            "eth_estimateGas" => Ok(json!("0x5208")),
            "eth_sendRawTransaction" => {
                let raw = params[0].as_str().unwrap_or_default().trim_start_matches("0x");
                let raw = hex::decode(raw).unwrap_or_default();
                Ok(json!(format!("0x{}", hex::encode(keccak256(&raw)))))
            }
            other => Err(node_error(-32601, &format!("method {other} not found"))),
        });
        let client = signing_client(&node);
        let hash = client
            .submit(TxRequest::call(Address([9; 20]), vec![]).with_value(U256::from(1u8)))
            .await
            .unwrap();

        let requests = node.requests();
        let estimate = requests
            .iter()
            .find(|(m, _)| m == "eth_estimateGas")
            .expect("gas estimated");
        assert_eq!(estimate.1[0]["value"], "0x1");

        let raws: Vec<&Value> = requests
            .iter()
            .filter(|(m, _)| m == "eth_sendRawTransaction")
            .map(|(_, p)| p)
            .collect();
        assert_eq!(raws.len(), 1);
        let raw = hex::decode(raws[0][0].as_str().unwrap().trim_start_matches("0x")).unwrap();
        assert_eq!(hash, format!("0x{}", hex::encode(keccak256(&raw))));
        assert_eq!(node.methods().last().map(String::as_str), Some("eth_sendRawTransaction"));
    }

    #[tokio::test]
    async fn test_submit_without_signer_fails() {
        let node = ScriptedNode::new(|_, _| Ok(Value::Null));
        let client = EthersChainClient::read_only(Provider::new(node.clone()));
        assert_eq!(client.sender(), Address::ZERO);
        let err = client.submit(TxRequest::call(Address::ZERO, vec![])).await.unwrap_err();
        assert!(matches!(err, Error::Signer(_)));
        assert!(node.requests().is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejected_by_node() {
        let node = ScriptedNode::new(|method, _| match method {
            "eth_getTransactionCount" => Ok(json!("0x0")),
            _ => Err(node_error(-32000, "insufficient funds for gas * price + value")),
        });
        let err = signing_client(&node)
            .submit(TxRequest::call(Address([9; 20]), vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NodeRejected { code: -32000, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_receipt_pending_then_mined() {
        let hash = format!("0x{}", "ab".repeat(32));
        let node = ScriptedNode::new(|_, _| Ok(Value::Null));
        let client = EthersChainClient::read_only(Provider::new(node));
        assert_eq!(client.receipt(&hash).await.unwrap(), None);

        let node = ScriptedNode::new(|_, params| {
            let mut receipt = mined_receipt(&params[0], 16, true);
            receipt["logs"] = json!([{
                "address": "0x2f26c64514f40833f5b01e1feeb2db35167a1028",
                "topics": [format!("0x{}", "11".repeat(32))],
                "data": "0x"
            }]);
            Ok(receipt)
        });
        let client = EthersChainClient::read_only(Provider::new(node));
        let receipt = client.receipt(&hash).await.unwrap().unwrap();
        assert_eq!(receipt.transaction_hash, hash);
        assert_eq!(receipt.block_number, 16);
        assert!(receipt.success);
        assert_eq!(receipt.logs.len(), 1);
        assert_eq!(receipt.logs[0].topics[0], [0x11; 32]);
    }

    #[tokio::test]
    async fn test_failed_receipt_status() {
        let hash = format!("0x{}", "cd".repeat(32));
        let node = ScriptedNode::new(|_, params| Ok(mined_receipt(&params[0], 7, false)));
        let client = EthersChainClient::read_only(Provider::new(node));
        assert!(!client.receipt(&hash).await.unwrap().unwrap().success);
    }

    #[tokio::test]
    async fn test_node_rejection_is_not_transient() {
        let node = ScriptedNode::new(|_, _| Err(node_error(-32601, "method not found")));
        let client = EthersChainClient::read_only(Provider::new(node));
        let err = client.native_balance(Address([1; 20])).await.unwrap_err();
        assert!(matches!(err, RpcError::Node { code: -32601, .. }));
        assert!(!Error::from(err).is_transient());
    }
}
