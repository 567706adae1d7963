//! In-memory chain doubles for exercising the send flow without a node.

use std::collections::{HashMap, VecDeque};
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, JsonRpcError, ProviderError, RpcError as EthersRpcError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::abi::{self, AbiValue, ParamType, U256};
use crate::address::Address;
use crate::chain::ChainEndpoint;
use crate::error::{Error, RpcError};
use crate::rpc::{ChainClient, Connector, Log, TxReceipt, TxRequest};

#[derive(Debug, Clone)]
enum Reply {
    Return(Vec<u8>),
    Revert(Option<Vec<u8>>),
    Unavailable,
}

/// Scripted [`ChainClient`]: `eth_call` answers are keyed by contract and
/// function signature, unknown calls revert, submissions are recorded.
#[derive(Debug)]
pub struct StaticChainClient {
    sender: Address,
    replies: HashMap<(Address, [u8; 4]), Reply>,
    native_balances: HashMap<Address, U256>,
    failing_targets: Vec<Address>,
    receipt_success: bool,
    receipt_pending: bool,
    receipt_logs: Vec<Log>,
    receipt_failures: Mutex<VecDeque<RpcError>>,
    unreadable_receipts: Option<RpcError>,
    calls: Mutex<Vec<(Address, Vec<u8>)>>,
    submitted: Mutex<Vec<TxRequest>>,
    network_calls: AtomicUsize,
}

impl StaticChainClient {
    pub fn new(sender: Address) -> Self {
        Self {
            sender,
            replies: HashMap::new(),
            native_balances: HashMap::new(),
            failing_targets: Vec::new(),
            receipt_success: true,
            receipt_pending: false,
            receipt_logs: Vec::new(),
            receipt_failures: Mutex::new(VecDeque::new()),
            unreadable_receipts: None,
            calls: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            network_calls: AtomicUsize::new(0),
        }
    }

    /// Answer `signature` on `contract` with the ABI encoding of `values`.
    pub fn with_return(self, contract: Address, signature: &str, values: &[AbiValue]) -> Self {
        let types: Vec<ParamType> = values.iter().map(infer_type).collect();
        let data = abi::encode(&types, values).unwrap_or_default();
        self.with_raw(contract, signature, data)
    }

    pub fn with_raw(self, contract: Address, signature: &str, data: Vec<u8>) -> Self {
        self.with_reply(contract, signature, Reply::Return(data))
    }

    pub fn with_revert(self, contract: Address, signature: &str) -> Self {
        self.with_reply(contract, signature, Reply::Revert(None))
    }

    pub fn with_revert_data(self, contract: Address, signature: &str, data: Vec<u8>) -> Self {
        self.with_reply(contract, signature, Reply::Revert(Some(data)))
    }

    pub fn with_unavailable(self, contract: Address, signature: &str) -> Self {
        self.with_reply(contract, signature, Reply::Unavailable)
    }

    pub fn with_native_balance(mut self, owner: Address, balance: U256) -> Self {
        self.native_balances.insert(owner, balance);
        self
    }

    /// Submissions to `target` are rejected as reverted.
    pub fn with_failing_target(mut self, target: Address) -> Self {
        self.failing_targets.push(target);
        self
    }

    /// Mined receipts report status 0.
    pub fn with_failed_receipts(mut self) -> Self {
        self.receipt_success = false;
        self
    }

    /// Receipts never appear.
    pub fn with_pending_receipts(mut self) -> Self {
        self.receipt_pending = true;
        self
    }

    pub fn with_receipt_logs(mut self, logs: Vec<Log>) -> Self {
        self.receipt_logs = logs;
        self
    }

    /// The first receipt polls fail with `errors`, in order.
    pub fn with_receipt_failures(mut self, errors: Vec<RpcError>) -> Self {
        self.receipt_failures = Mutex::new(errors.into());
        self
    }

    /// Every receipt poll fails with `error`.
    pub fn with_unreadable_receipts(mut self, error: RpcError) -> Self {
        self.unreadable_receipts = Some(error);
        self
    }

    /// `eth_call`s made so far, as (contract, calldata).
    pub async fn calls(&self) -> Vec<(Address, Vec<u8>)> {
        self.calls.lock().await.clone()
    }

    /// Transactions submitted so far, in order.
    pub async fn submitted(&self) -> Vec<TxRequest> {
        self.submitted.lock().await.clone()
    }

    /// Number of calls, balance reads, submissions and receipt polls made.
    pub fn network_calls(&self) -> usize {
        self.network_calls.load(Ordering::SeqCst)
    }

    fn with_reply(mut self, contract: Address, signature: &str, reply: Reply) -> Self {
        self.replies
            .insert((contract, abi::selector_from_signature(signature)), reply);
        self
    }

    fn touch(&self) {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainClient for StaticChainClient {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        self.touch();
        self.calls.lock().await.push((to, data.clone()));
        let mut selector = [0u8; 4];
        if data.len() >= 4 {
            selector.copy_from_slice(&data[..4]);
        }
        match self.replies.get(&(to, selector)) {
            Some(Reply::Return(out)) => Ok(out.clone()),
            Some(Reply::Revert(data)) => Err(RpcError::Reverted {
                message: "execution reverted".to_string(),
                data: data.clone(),
            }),
            Some(Reply::Unavailable) => {
                Err(RpcError::Transport("connection refused".to_string()))
            }
            None => Err(RpcError::Reverted {
                message: "execution reverted".to_string(),
                data: None,
            }),
        }
    }

    async fn native_balance(&self, owner: Address) -> Result<U256, RpcError> {
        self.touch();
        Ok(self.native_balances.get(&owner).cloned().unwrap_or_default())
    }

    async fn submit(&self, tx: TxRequest) -> Result<String, Error> {
        self.touch();
        if self.failing_targets.contains(&tx.to) {
            return Err(Error::reverted("execution reverted", None));
        }
        let mut submitted = self.submitted.lock().await;
        submitted.push(tx);
        Ok(format!("0x{:064x}", submitted.len()))
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, RpcError> {
        self.touch();
        if let Some(err) = &self.unreadable_receipts {
            return Err(err.clone());
        }
        if let Some(err) = self.receipt_failures.lock().await.pop_front() {
            return Err(err);
        }
        if self.receipt_pending {
            return Ok(None);
        }
        Ok(Some(TxReceipt {
            transaction_hash: tx_hash.to_string(),
            block_number: 100,
            success: self.receipt_success,
            logs: self.receipt_logs.clone(),
        }))
    }
}

/// [`Connector`] handing out preconfigured clients by endpoint id.
#[derive(Default)]
pub struct StaticConnector {
    clients: HashMap<u32, Arc<dyn ChainClient>>,
    connections: AtomicUsize,
}

impl StaticConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, eid: u32, client: Arc<dyn ChainClient>) -> Self {
        self.clients.insert(eid, client);
        self
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Connector for StaticConnector {
    fn connect(&self, endpoint: &ChainEndpoint) -> Result<Arc<dyn ChainClient>, Error> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        self.clients
            .get(&endpoint.eid)
            .cloned()
            .ok_or_else(|| Error::RpcUnavailable(format!("no client for {}", endpoint.rpc_url)))
    }
}

type Handler = dyn Fn(&str, &Value) -> Result<Value, JsonRpcError> + Send + Sync;

/// JSON-RPC client answering every request from a handler closure and
/// recording what was asked. Plugs into an `ethers` `Provider`, so signing
/// and transaction filling run for real.
#[derive(Clone)]
pub struct ScriptedNode {
    handler: Arc<Handler>,
    requests: Arc<std::sync::Mutex<Vec<(String, Value)>>>,
}

impl ScriptedNode {
    pub fn new(
        handler: impl Fn(&str, &Value) -> Result<Value, JsonRpcError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Arc::new(handler),
            requests: Arc::default(),
        }
    }

    /// Requests received so far, as (method, params).
    pub fn requests(&self) -> Vec<(String, Value)> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.requests().into_iter().map(|(method, _)| method).collect()
    }
}

impl Debug for ScriptedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedNode")
            .field("requests", &self.requests().len())
            .finish()
    }
}

#[async_trait]
impl JsonRpcClient for ScriptedNode {
    type Error = NodeError;

    async fn request<T, R>(&self, method: &str, params: T) -> Result<R, NodeError>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        let params = serde_json::to_value(params)?;
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((method.to_string(), params.clone()));
        let result = (self.handler)(method, &params).map_err(NodeError::Response)?;
        Ok(serde_json::from_value(result)?)
    }
}

/// Failure surfaced by [`ScriptedNode`].
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("node error {}: {}", .0.code, .0.message)]
    Response(JsonRpcError),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl EthersRpcError for NodeError {
    fn as_error_response(&self) -> Option<&JsonRpcError> {
        match self {
            NodeError::Response(response) => Some(response),
            NodeError::Serde(_) => None,
        }
    }

    fn as_serde_error(&self) -> Option<&serde_json::Error> {
        match self {
            NodeError::Serde(err) => Some(err),
            NodeError::Response(_) => None,
        }
    }
}

impl From<NodeError> for ProviderError {
    fn from(err: NodeError) -> Self {
        ProviderError::JsonRpcClientError(Box::new(err))
    }
}

/// JSON-RPC error object with no data.
pub fn node_error(code: i64, message: &str) -> JsonRpcError {
    JsonRpcError {
        code,
        message: message.to_string(),
        data: None,
    }
}

/// A mined `eth_getTransactionReceipt` result for `tx_hash` with no logs.
pub fn mined_receipt(tx_hash: &Value, block: u64, success: bool) -> Value {
    json!({
        "transactionHash": tx_hash,
        "transactionIndex": "0x0",
        "blockHash": format!("0x{}", "0b".repeat(32)),
        "blockNumber": format!("0x{block:x}"),
        "from": format!("0x{}", "00".repeat(20)),
        "to": format!("0x{}", "00".repeat(20)),
        "cumulativeGasUsed": "0x5208",
        "gasUsed": "0x5208",
        "contractAddress": null,
        "logs": [],
        "status": if success { "0x1" } else { "0x0" },
        "logsBloom": format!("0x{}", "00".repeat(256)),
        "type": "0x0"
    })
}

fn infer_type(value: &AbiValue) -> ParamType {
    match value {
        AbiValue::Address(_) => ParamType::Address,
        AbiValue::Uint(_) => ParamType::Uint(256),
        AbiValue::Bool(_) => ParamType::Bool,
        AbiValue::Bytes(_) => ParamType::Bytes,
        AbiValue::FixedBytes(b) => ParamType::FixedBytes(b.len()),
        AbiValue::String(_) => ParamType::String,
        AbiValue::Array(items) => ParamType::Array(Box::new(
            items.first().map(infer_type).unwrap_or(ParamType::Uint(256)),
        )),
        AbiValue::Tuple(items) => ParamType::Tuple(items.iter().map(infer_type).collect()),
    }
}
