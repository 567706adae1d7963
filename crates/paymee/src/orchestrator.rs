//! The cross-chain send flow: validate, resolve, approve, quote, check,
//! submit, confirm.
//!
//! A run moves forward through [`SendStage`]s and never revisits one. Every
//! failure ends the run; callers wanting another attempt invoke
//! [`SendOrchestrator::send`] again, which re-quotes from scratch.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::abi::{u256_max, U256};
use crate::address::Address;
use crate::amount::{format_units, parse_units};
use crate::balance::ChainBalances;
use crate::chain::{ChainEntry, ChainRegistry, TokenBinding};
use crate::contracts::{oft_sent_guid, Erc20, MessagingFee, OftBridge, SendParam, TokenKind};
use crate::error::Error;
use crate::options::{ExecutorOption, OptionsBuilder, DEFAULT_RECEIVE_GAS};
use crate::rpc::{wait_for_receipt, ChainClient, Connector};

/// Decimals of every EVM chain's native currency.
const NATIVE_DECIMALS: u8 = 18;

/// Named stages of a send, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SendStage {
    Validate,
    ResolveBridge,
    ResolveToken,
    ResolveDecimals,
    Approve,
    BuildOptions,
    Quote,
    Preflight,
    Submit,
    Confirm,
    Done,
}

impl SendStage {
    pub const ALL: [SendStage; 11] = [
        SendStage::Validate,
        SendStage::ResolveBridge,
        SendStage::ResolveToken,
        SendStage::ResolveDecimals,
        SendStage::Approve,
        SendStage::BuildOptions,
        SendStage::Quote,
        SendStage::Preflight,
        SendStage::Submit,
        SendStage::Confirm,
        SendStage::Done,
    ];

    /// The only stage that may follow this one.
    pub fn next(self) -> Option<SendStage> {
        let i = SendStage::ALL.iter().position(|s| *s == self)?;
        SendStage::ALL.get(i + 1).copied()
    }

    /// Stages that can put a transaction on chain. Re-running them blindly
    /// may approve or send twice; every other stage is a pure read.
    pub fn has_external_effects(self) -> bool {
        matches!(self, SendStage::Approve | SendStage::Submit)
    }
}

impl fmt::Display for SendStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SendStage::Validate => "validate",
            SendStage::ResolveBridge => "resolve-bridge",
            SendStage::ResolveToken => "resolve-token",
            SendStage::ResolveDecimals => "resolve-decimals",
            SendStage::Approve => "approve",
            SendStage::BuildOptions => "build-options",
            SendStage::Quote => "quote",
            SendStage::Preflight => "preflight",
            SendStage::Submit => "submit",
            SendStage::Confirm => "confirm",
            SendStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// One user-initiated transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub source_eid: u32,
    pub destination_eid: u32,
    /// Human decimal amount, e.g. `"0.01"`.
    pub amount: String,
    pub recipient: String,
    /// Slippage floor; defaults to `amount`.
    pub min_amount: Option<String>,
    /// Overrides the registry's bridge for the source chain.
    pub bridge_address: Option<Address>,
    pub compose_message: Option<Vec<u8>>,
    pub executor_options: Vec<ExecutorOption>,
}

impl SendRequest {
    pub fn new(
        source_eid: u32,
        destination_eid: u32,
        amount: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            source_eid,
            destination_eid,
            amount: amount.into(),
            recipient: recipient.into(),
            min_amount: None,
            bridge_address: None,
            compose_message: None,
            executor_options: Vec::new(),
        }
    }

    pub fn with_min_amount(mut self, min_amount: impl Into<String>) -> Self {
        self.min_amount = Some(min_amount.into());
        self
    }

    pub fn with_bridge(mut self, bridge: Address) -> Self {
        self.bridge_address = Some(bridge);
        self
    }

    pub fn with_compose_message(mut self, message: Vec<u8>) -> Self {
        self.compose_message = Some(message);
        self
    }

    pub fn with_option(mut self, option: ExecutorOption) -> Self {
        self.executor_options.push(option);
        self
    }

    /// Append options given as flat string lists: `gas,value` pairs for
    /// receive, `index,gas,value` triplets for compose and `amount,recipient`
    /// pairs for native drops.
    pub fn with_flat_options<S: AsRef<str>>(
        mut self,
        receive: &[S],
        compose: &[S],
        native_drop: &[S],
    ) -> Result<Self, Error> {
        for pair in chunks(receive, 2, "receive")? {
            self.executor_options.push(ExecutorOption::LzReceive {
                gas: parse_number(pair[0].as_ref(), "receive gas")?,
                value: parse_number(pair[1].as_ref(), "receive value")?,
            });
        }
        for triplet in chunks(compose, 3, "compose")? {
            self.executor_options.push(ExecutorOption::Compose {
                index: parse_number(triplet[0].as_ref(), "compose index")?,
                gas: parse_number(triplet[1].as_ref(), "compose gas")?,
                value: parse_number(triplet[2].as_ref(), "compose value")?,
            });
        }
        for pair in chunks(native_drop, 2, "native drop")? {
            self.executor_options
                .push(ExecutorOption::native_drop(pair[0].as_ref(), pair[1].as_ref())?);
        }
        Ok(self)
    }
}

fn chunks<'a, S>(
    items: &'a [S],
    arity: usize,
    what: &str,
) -> Result<std::slice::ChunksExact<'a, S>, Error> {
    if items.len() % arity != 0 {
        return Err(Error::InvalidRequest(format!(
            "{what} options must come in groups of {arity}, got {} values",
            items.len()
        )));
    }
    Ok(items.chunks_exact(arity))
}

fn parse_number<N: std::str::FromStr>(s: &str, what: &str) -> Result<N, Error> {
    s.trim()
        .parse()
        .map_err(|_| Error::InvalidRequest(format!("invalid {what}: {s:?}")))
}

/// Tunables for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendSettings {
    /// Receive option applied when a request carries none.
    pub default_receive: Option<(u128, u128)>,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SendSettings {
    fn default() -> Self {
        Self {
            default_receive: Some((DEFAULT_RECEIVE_GAS, 0)),
            confirmation_timeout: Duration::from_secs(180),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// A committed source-chain send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub transaction_hash: String,
    pub explorer_link: String,
    pub scan_link: String,
    pub block_number: u64,
    /// LayerZero message GUID, when the bridge emitted `OFTSent`.
    pub guid: Option<String>,
    pub approval_tx: Option<String>,
    pub token: Address,
    pub decimals: u8,
    pub amount_ld: U256,
    pub min_amount_ld: U256,
    pub fee: MessagingFee,
}

/// Flat outcome of a run, as handed to UI callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<Result<SendReceipt, Error>> for SendResult {
    fn from(outcome: Result<SendReceipt, Error>) -> Self {
        match outcome {
            Ok(receipt) => SendResult {
                success: true,
                transaction_hash: Some(receipt.transaction_hash),
                explorer_link: Some(receipt.explorer_link),
                scan_link: Some(receipt.scan_link),
                error_message: None,
            },
            Err(e) => SendResult {
                success: false,
                transaction_hash: e.submitted_transaction().map(str::to_string),
                error_message: Some(e.to_string()),
                ..SendResult::default()
            },
        }
    }
}

/// Forward-only stage tracker shared with an optional observer.
struct Progress<'o> {
    current: SendStage,
    observer: &'o mut (dyn FnMut(SendStage) + Send),
}

impl Progress<'_> {
    fn enter(&mut self, stage: SendStage) {
        debug_assert_eq!(self.current.next(), Some(stage), "stages run in order");
        self.current = stage;
        debug!(%stage, "entering stage");
        (self.observer)(stage);
    }
}

/// What the read-only stages resolved for a request.
struct Prepared {
    source: ChainEntry,
    /// The source chain's binding, when it describes the bridge in use.
    binding: Option<TokenBinding>,
    client: Arc<dyn ChainClient>,
    bridge_address: Address,
    sender: Address,
    recipient: Address,
    token: Address,
    decimals: u8,
    amount_ld: U256,
    min_amount_ld: U256,
}

impl Prepared {
    fn wraps_native(&self) -> bool {
        self.binding
            .as_ref()
            .is_some_and(|b| b.wraps_native && b.token_address.map_or(true, |t| t == self.token))
    }
}

/// Runs sends against the chains of a registry.
pub struct SendOrchestrator {
    registry: Arc<ChainRegistry>,
    connector: Arc<dyn Connector>,
    settings: SendSettings,
}

impl SendOrchestrator {
    pub fn new(registry: Arc<ChainRegistry>, connector: Arc<dyn Connector>) -> Self {
        Self {
            registry,
            connector,
            settings: SendSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: SendSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &SendSettings {
        &self.settings
    }

    pub async fn send(&self, request: &SendRequest) -> Result<SendReceipt, Error> {
        self.send_observed(request, &mut |_| {}).await
    }

    /// [`send`](Self::send) as a [`SendResult`].
    pub async fn execute(&self, request: &SendRequest) -> SendResult {
        self.send(request).await.into()
    }

    /// Run a send, reporting each stage to `observer` as it is entered.
    pub async fn send_observed(
        &self,
        request: &SendRequest,
        observer: &mut (dyn FnMut(SendStage) + Send),
    ) -> Result<SendReceipt, Error> {
        (observer)(SendStage::Validate);
        let mut progress = Progress {
            current: SendStage::Validate,
            observer,
        };
        let outcome = self.run(request, &mut progress).await;
        match &outcome {
            Ok(receipt) => {
                progress.enter(SendStage::Done);
                info!(
                    tx = %receipt.transaction_hash,
                    scan = %receipt.scan_link,
                    "send committed on source chain"
                );
            }
            Err(e) => warn!(stage = %progress.current, error = %e, "send failed"),
        }
        outcome
    }

    /// Quote a send without approving or submitting anything.
    ///
    /// Runs the same validation, resolution and option building as
    /// [`send`](Self::send), so the fee matches what a send would pay.
    pub async fn quote(&self, request: &SendRequest) -> Result<MessagingFee, Error> {
        let mut observer = |_: SendStage| {};
        let mut progress = Progress {
            current: SendStage::Validate,
            observer: &mut observer,
        };
        let prepared = self.prepare(request, &mut progress).await?;
        let param = self.send_param(request, &prepared)?;
        let bridge = OftBridge::new(prepared.client.as_ref(), prepared.bridge_address);
        let fee = bridge.quote_send(&param, false).await?;
        debug!(native_fee = %fee.native_fee, "fee quoted");
        Ok(fee)
    }

    async fn run(
        &self,
        request: &SendRequest,
        progress: &mut Progress<'_>,
    ) -> Result<SendReceipt, Error> {
        let prepared = self.prepare(request, progress).await?;
        let client = prepared.client.as_ref();
        let (sender, token, decimals) = (prepared.sender, prepared.token, prepared.decimals);
        let bridge = OftBridge::new(client, prepared.bridge_address);

        progress.enter(SendStage::Approve);
        let approval_tx = self
            .approve_if_needed(client, &bridge, token, &prepared.amount_ld)
            .await?;

        progress.enter(SendStage::BuildOptions);
        let param = self.send_param(request, &prepared)?;

        progress.enter(SendStage::Quote);
        let fee = bridge.quote_send(&param, false).await?;
        info!(native_fee = %format_units(&fee.native_fee, NATIVE_DECIMALS), "fee quoted");

        progress.enter(SendStage::Preflight);
        let wraps_native = prepared.wraps_native();
        preflight(client, sender, token, decimals, &param.amount_ld, &fee, wraps_native).await?;

        progress.enter(SendStage::Submit);
        let tx = bridge.send_tx(&param, &fee, sender)?;
        let tx_hash = client.submit(tx).await.map_err(send_failure)?;
        info!(tx = %tx_hash, "send submitted");

        progress.enter(SendStage::Confirm);
        let receipt = wait_for_receipt(
            client,
            &tx_hash,
            self.settings.confirmation_timeout,
            self.settings.poll_interval,
        )
        .await?;
        if !receipt.success {
            return Err(Error::SendTransactionFailed {
                message: format!(
                    "transaction {tx_hash} reverted in block {}",
                    receipt.block_number
                ),
                data: None,
            });
        }
        let guid = oft_sent_guid(&receipt, prepared.bridge_address)
            .map(|g| format!("0x{}", hex::encode(g)));

        Ok(SendReceipt {
            explorer_link: prepared.source.explorer_link(&tx_hash),
            scan_link: prepared.source.scan_link(&tx_hash),
            transaction_hash: tx_hash,
            block_number: receipt.block_number,
            guid,
            approval_tx,
            token,
            decimals,
            amount_ld: param.amount_ld,
            min_amount_ld: param.min_amount_ld,
            fee,
        })
    }

    /// Validate through ResolveDecimals: everything before the first write.
    async fn prepare(
        &self,
        request: &SendRequest,
        progress: &mut Progress<'_>,
    ) -> Result<Prepared, Error> {
        let recipient = validate(request)?;

        progress.enter(SendStage::ResolveBridge);
        let source = self.registry.get(request.source_eid)?.clone();
        let bridge_address = match request.bridge_address {
            Some(address) => address,
            None => self.registry.bridge_address(request.source_eid)?,
        };
        let client = self.connector.connect(&source.endpoint)?;
        let sender = client.sender();
        let bridge = OftBridge::new(client.as_ref(), bridge_address);
        info!(
            source = request.source_eid,
            destination = request.destination_eid,
            bridge = %bridge_address,
            %sender,
            "starting send"
        );
        self.check_peer(&bridge, request.destination_eid).await;

        progress.enter(SendStage::ResolveToken);
        let kind = bridge.resolve_token().await?;
        let token = kind.token_address(bridge_address);
        match kind {
            TokenKind::Adapter { underlying } => debug!(%underlying, "bridge is an adapter"),
            TokenKind::NativeOft => debug!("bridge is a native OFT"),
        }

        progress.enter(SendStage::ResolveDecimals);
        let binding = source
            .binding
            .clone()
            .filter(|b| b.bridge_address == bridge_address);
        let decimals = match binding.as_ref().and_then(|b| b.decimals) {
            Some(pinned) => pinned,
            None => Erc20::new(client.as_ref(), token).decimals().await?,
        };
        let amount_ld = parse_units(&request.amount, decimals)?;
        if amount_ld == U256::default() {
            return Err(Error::InvalidAmountFormat(
                "amount must be greater than zero".to_string(),
            ));
        }
        let min_amount_ld = match &request.min_amount {
            Some(min) => parse_units(min, decimals)?,
            None => amount_ld.clone(),
        };
        if min_amount_ld > amount_ld {
            return Err(Error::InvalidRequest(format!(
                "minimum amount {} exceeds amount {}",
                format_units(&min_amount_ld, decimals),
                format_units(&amount_ld, decimals)
            )));
        }
        debug!(decimals, %amount_ld, %min_amount_ld, "amount resolved");

        Ok(Prepared {
            source,
            binding,
            client,
            bridge_address,
            sender,
            recipient,
            token,
            decimals,
            amount_ld,
            min_amount_ld,
        })
    }

    /// The BuildOptions stage: executor options plus the `SendParam` quoted
    /// and sent.
    fn send_param(&self, request: &SendRequest, prepared: &Prepared) -> Result<SendParam, Error> {
        let mut builder =
            OptionsBuilder::new().with_default_receive(self.settings.default_receive);
        for option in &request.executor_options {
            builder.add(option)?;
        }
        let extra_options = builder.to_wire_format();
        debug!(options = %hex::encode(&extra_options), "executor options built");

        Ok(SendParam {
            dst_eid: request.destination_eid,
            to: prepared.recipient.to_bytes32(),
            amount_ld: prepared.amount_ld.clone(),
            min_amount_ld: prepared.min_amount_ld.clone(),
            extra_options,
            compose_msg: request.compose_message.clone().unwrap_or_default(),
            oft_cmd: Vec::new(),
        })
    }

    async fn check_peer(&self, bridge: &OftBridge<'_>, destination_eid: u32) {
        match bridge.peer(destination_eid).await {
            Ok(Some(_)) => {}
            Ok(None) => warn!(
                destination = destination_eid,
                "bridge has no peer for destination; the message will not be delivered"
            ),
            Err(e) => debug!(error = %e, "peer lookup unavailable"),
        }
    }

    async fn approve_if_needed(
        &self,
        client: &dyn ChainClient,
        bridge: &OftBridge<'_>,
        token: Address,
        amount: &U256,
    ) -> Result<Option<String>, Error> {
        if !bridge.approval_required().await? {
            debug!("bridge does not require approval");
            return Ok(None);
        }

        let erc20 = Erc20::new(client, token);
        let allowance = erc20.allowance(client.sender(), bridge.address()).await?;
        if &allowance >= amount {
            debug!(%allowance, "allowance covers amount");
            return Ok(None);
        }

        info!(%token, spender = %bridge.address(), "approving bridge");
        let tx = erc20.approve_tx(bridge.address(), u256_max())?;
        let tx_hash = client
            .submit(tx)
            .await
            .map_err(|e| Error::ApprovalFailed(e.to_string()))?;
        let receipt = wait_for_receipt(
            client,
            &tx_hash,
            self.settings.confirmation_timeout,
            self.settings.poll_interval,
        )
        .await?;
        if !receipt.success {
            return Err(Error::ApprovalFailed(format!("approval {tx_hash} reverted")));
        }
        info!(tx = %tx_hash, "approval confirmed");
        Ok(Some(tx_hash))
    }
}

fn validate(request: &SendRequest) -> Result<Address, Error> {
    if request.source_eid == 0 {
        return Err(Error::InvalidRequest("source chain is required".to_string()));
    }
    if request.destination_eid == 0 {
        return Err(Error::InvalidRequest("destination chain is required".to_string()));
    }
    if request.amount.trim().is_empty() {
        return Err(Error::InvalidRequest("amount is required".to_string()));
    }
    if request.recipient.trim().is_empty() {
        return Err(Error::InvalidRequest("recipient is required".to_string()));
    }
    Address::parse(request.recipient.trim())
}

async fn preflight(
    client: &dyn ChainClient,
    sender: Address,
    token: Address,
    decimals: u8,
    amount: &U256,
    fee: &MessagingFee,
    wraps_native: bool,
) -> Result<(), Error> {
    let balances = ChainBalances::new(client);

    let token_balance = balances.token_balance(token, sender).await?;
    if &token_balance < amount {
        return Err(Error::InsufficientBalance {
            asset: format!("token {token}"),
            required: format_units(amount, decimals),
            available: format_units(&token_balance, decimals),
        });
    }

    let mut required = fee.native_fee.clone();
    if wraps_native {
        required += amount;
    }
    let native_balance = balances.native_balance(sender).await?;
    if native_balance < required {
        return Err(Error::InsufficientBalance {
            asset: "native".to_string(),
            required: format_units(&required, NATIVE_DECIMALS),
            available: format_units(&native_balance, NATIVE_DECIMALS),
        });
    }
    Ok(())
}

fn send_failure(err: Error) -> Error {
    match err {
        Error::ContractCallReverted { message, data } => {
            Error::SendTransactionFailed { message, data }
        }
        Error::RpcUnavailable(message) | Error::NodeRejected { message, .. } => {
            Error::SendTransactionFailed {
                message,
                data: None,
            }
        }
        other => other,
    }
}
