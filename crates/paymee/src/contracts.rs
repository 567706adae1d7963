//! Typed wrappers for the ERC20 and OFT bridge contracts.

use crate::abi::{self, AbiValue, ParamType, U256};
use crate::address::Address;
use crate::error::{Error, RpcError};
use crate::rpc::{ChainClient, TxReceipt, TxRequest};

const BALANCE_OF: &str = "balanceOf(address)";
const DECIMALS: &str = "decimals()";
const ALLOWANCE: &str = "allowance(address,address)";
const APPROVE: &str = "approve(address,uint256)";

const TOKEN: &str = "token()";
const APPROVAL_REQUIRED: &str = "approvalRequired()";
const QUOTE_SEND: &str = "quoteSend((uint32,bytes32,uint256,uint256,bytes,bytes,bytes),bool)";
const SEND: &str =
    "send((uint32,bytes32,uint256,uint256,bytes,bytes,bytes),(uint256,uint256),address)";
const PEERS: &str = "peers(uint32)";
const OWNER: &str = "owner()";

const OFT_SENT_EVENT: &str = "OFTSent(bytes32,uint32,address,uint256,uint256)";

/// Parameters of an OFT `send`, in wire field order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendParam {
    pub dst_eid: u32,
    /// Recipient as a left-padded 32-byte word.
    pub to: [u8; 32],
    pub amount_ld: U256,
    pub min_amount_ld: U256,
    pub extra_options: Vec<u8>,
    pub compose_msg: Vec<u8>,
    pub oft_cmd: Vec<u8>,
}

impl SendParam {
    pub fn to_abi(&self) -> AbiValue {
        AbiValue::Tuple(vec![
            AbiValue::uint(self.dst_eid),
            AbiValue::bytes32(self.to),
            AbiValue::Uint(self.amount_ld.clone()),
            AbiValue::Uint(self.min_amount_ld.clone()),
            AbiValue::Bytes(self.extra_options.clone()),
            AbiValue::Bytes(self.compose_msg.clone()),
            AbiValue::Bytes(self.oft_cmd.clone()),
        ])
    }
}

/// Fee returned by `quoteSend` and paid with `send`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagingFee {
    pub native_fee: U256,
    pub lz_token_fee: U256,
}

pub type FeeQuote = MessagingFee;

impl MessagingFee {
    pub fn to_abi(&self) -> AbiValue {
        AbiValue::Tuple(vec![
            AbiValue::Uint(self.native_fee.clone()),
            AbiValue::Uint(self.lz_token_fee.clone()),
        ])
    }
}

/// What `token()` revealed about a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Locks an existing ERC20.
    Adapter { underlying: Address },
    /// The bridge is itself the token.
    NativeOft,
}

impl TokenKind {
    /// Address whose balance, decimals and allowance apply.
    pub fn token_address(&self, bridge: Address) -> Address {
        match self {
            TokenKind::Adapter { underlying } => *underlying,
            TokenKind::NativeOft => bridge,
        }
    }
}

/// ERC20 view calls and approval building.
pub struct Erc20<'a> {
    client: &'a dyn ChainClient,
    address: Address,
}

impl<'a> Erc20<'a> {
    pub fn new(client: &'a dyn ChainClient, address: Address) -> Self {
        Self { client, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn balance_of(&self, owner: Address) -> Result<U256, Error> {
        let data = call_data(BALANCE_OF, &[AbiValue::Address(owner)])?;
        let out = self.client.call(self.address, data).await?;
        decode_uint(BALANCE_OF, &out)
    }

    pub async fn decimals(&self) -> Result<u8, Error> {
        read_decimals(self.client, self.address).await
    }

    pub async fn allowance(&self, owner: Address, spender: Address) -> Result<U256, Error> {
        let data = call_data(ALLOWANCE, &[AbiValue::Address(owner), AbiValue::Address(spender)])?;
        let out = self.client.call(self.address, data).await?;
        decode_uint(ALLOWANCE, &out)
    }

    pub fn approve_tx(&self, spender: Address, amount: U256) -> Result<TxRequest, Error> {
        let data = call_data(APPROVE, &[AbiValue::Address(spender), AbiValue::Uint(amount)])?;
        Ok(TxRequest::call(self.address, data))
    }
}

/// An OFT or OFT adapter contract.
pub struct OftBridge<'a> {
    client: &'a dyn ChainClient,
    address: Address,
}

impl<'a> OftBridge<'a> {
    pub fn new(client: &'a dyn ChainClient, address: Address) -> Self {
        Self { client, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn token(&self) -> Result<Address, Error> {
        let out = self.client.call(self.address, call_data(TOKEN, &[])?).await?;
        decode_address(TOKEN, &out)
    }

    /// Query `token()`. A revert or an unreadable answer means the bridge is
    /// a native OFT; transport failures still propagate.
    pub async fn resolve_token(&self) -> Result<TokenKind, Error> {
        let out = match self.client.call(self.address, call_data(TOKEN, &[])?).await {
            Ok(out) => out,
            Err(RpcError::Reverted { .. }) => return Ok(TokenKind::NativeOft),
            Err(e) => return Err(e.into()),
        };
        match decode_address(TOKEN, &out) {
            Ok(token) if !token.is_zero() && token != self.address => {
                Ok(TokenKind::Adapter { underlying: token })
            }
            _ => Ok(TokenKind::NativeOft),
        }
    }

    /// Query `approvalRequired()`; absence means no approval is needed.
    pub async fn approval_required(&self) -> Result<bool, Error> {
        let data = call_data(APPROVAL_REQUIRED, &[])?;
        let out = match self.client.call(self.address, data).await {
            Ok(out) => out,
            Err(RpcError::Reverted { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let values = abi::decode(&[ParamType::Bool], &out).ok();
        Ok(values
            .as_deref()
            .and_then(|v| v.first())
            .and_then(AbiValue::as_bool)
            .unwrap_or(false))
    }

    pub async fn decimals(&self) -> Result<u8, Error> {
        read_decimals(self.client, self.address).await
    }

    /// `quoteSend`; any revert becomes [`Error::QuoteFailed`].
    pub async fn quote_send(
        &self,
        param: &SendParam,
        pay_in_lz_token: bool,
    ) -> Result<MessagingFee, Error> {
        let data = call_data(QUOTE_SEND, &[param.to_abi(), AbiValue::Bool(pay_in_lz_token)])?;
        let out = match self.client.call(self.address, data).await {
            Ok(out) => out,
            Err(RpcError::Reverted { message, data }) => {
                return Err(Error::QuoteFailed { message, data })
            }
            Err(e) => return Err(e.into()),
        };
        let values = abi::decode(&[ParamType::Uint(256), ParamType::Uint(256)], &out).map_err(|e| {
            Error::QuoteFailed {
                message: format!("undecodable quote: {e}"),
                data: Some(out.clone()),
            }
        })?;
        let word = |i: usize| {
            values
                .get(i)
                .and_then(AbiValue::as_uint)
                .cloned()
                .unwrap_or_default()
        };
        Ok(MessagingFee {
            native_fee: word(0),
            lz_token_fee: word(1),
        })
    }

    /// The `send` transaction, carrying the native fee as value.
    pub fn send_tx(
        &self,
        param: &SendParam,
        fee: &MessagingFee,
        refund: Address,
    ) -> Result<TxRequest, Error> {
        let data = call_data(SEND, &[param.to_abi(), fee.to_abi(), AbiValue::Address(refund)])?;
        Ok(TxRequest::call(self.address, data).with_value(fee.native_fee.clone()))
    }

    /// Configured peer for `eid`, `None` when unset.
    pub async fn peer(&self, eid: u32) -> Result<Option<[u8; 32]>, Error> {
        let data = call_data(PEERS, &[AbiValue::uint(eid)])?;
        let out = self.client.call(self.address, data).await?;
        let values = abi::decode(&[ParamType::FixedBytes(32)], &out)
            .map_err(|e| Error::reverted(format!("{PEERS}: {e}"), Some(out.clone())))?;
        let word = values.first().and_then(AbiValue::as_word).unwrap_or([0u8; 32]);
        Ok((word != [0u8; 32]).then_some(word))
    }

    pub async fn owner(&self) -> Result<Address, Error> {
        let out = self.client.call(self.address, call_data(OWNER, &[])?).await?;
        decode_address(OWNER, &out)
    }
}

/// LayerZero message GUID from the bridge's `OFTSent` log, if present.
pub fn oft_sent_guid(receipt: &TxReceipt, bridge: Address) -> Option<[u8; 32]> {
    let topic = abi::keccak256(OFT_SENT_EVENT.as_bytes());
    receipt
        .logs
        .iter()
        .find(|log| log.address == bridge && log.topics.first() == Some(&topic))
        .and_then(|log| log.topics.get(1).copied())
}

pub(crate) fn call_data(signature: &str, args: &[AbiValue]) -> Result<Vec<u8>, Error> {
    let sig = abi::parse_signature(signature)?;
    Ok(abi::encode_call(&sig, args)?)
}

async fn read_decimals(client: &dyn ChainClient, address: Address) -> Result<u8, Error> {
    let out = client.call(address, call_data(DECIMALS, &[])?).await?;
    let n = decode_uint(DECIMALS, &out)?;
    u8::try_from(&n)
        .map_err(|_| Error::reverted(format!("{DECIMALS}: {n} out of range"), Some(out)))
}

fn decode_uint(what: &str, out: &[u8]) -> Result<U256, Error> {
    abi::decode(&[ParamType::Uint(256)], out)
        .ok()
        .and_then(|v| v.first().and_then(AbiValue::as_uint).cloned())
        .ok_or_else(|| Error::reverted(format!("{what}: undecodable return"), Some(out.to_vec())))
}

fn decode_address(what: &str, out: &[u8]) -> Result<Address, Error> {
    abi::decode(&[ParamType::Address], out)
        .ok()
        .and_then(|v| v.first().and_then(AbiValue::as_address))
        .ok_or_else(|| Error::reverted(format!("{what}: undecodable return"), Some(out.to_vec())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::Log;
    use crate::testing::StaticChainClient;

    const BRIDGE: Address = Address([0xb0; 20]);
    const TOKEN_ADDR: Address = Address([0x70; 20]);
    const OWNER_ADDR: Address = Address([0x0a; 20]);

    #[test]
    fn test_selectors() {
        let sel = |s: &str| hex::encode(abi::parse_signature(s).unwrap().selector);
        assert_eq!(sel(BALANCE_OF), "70a08231");
        assert_eq!(sel(APPROVE), "095ea7b3");
        assert_eq!(sel(ALLOWANCE), "dd62ed3e");
        assert_eq!(sel(DECIMALS), "313ce567");
        assert_eq!(sel(OWNER), "8da5cb5b");
        assert_eq!(sel(TOKEN), "fc0c546a");
    }

    #[test]
    fn test_send_param_layout() {
        let param = SendParam {
            dst_eid: 40232,
            to: OWNER_ADDR.to_bytes32(),
            amount_ld: U256::from(10u8),
            min_amount_ld: U256::from(9u8),
            extra_options: vec![0x00, 0x03],
            compose_msg: vec![],
            oft_cmd: vec![],
        };
        let types = abi::parse_types("(uint32,bytes32,uint256,uint256,bytes,bytes,bytes)").unwrap();
        let encoded = abi::encode(&types, &[param.to_abi()]).unwrap();
        // Dynamic tuple: one offset word, then the tuple body.
        assert_eq!(encoded[31], 0x20);
        assert_eq!(&encoded[32 + 28..32 + 32], &40232u32.to_be_bytes());
        assert_eq!(&encoded[64 + 12..64 + 32], &OWNER_ADDR.0);

        let decoded = abi::decode(&types, &encoded).unwrap();
        assert_eq!(decoded[0], param.to_abi());
    }

    #[test]
    fn test_send_tx_attaches_native_fee() {
        let client = StaticChainClient::new(OWNER_ADDR);
        let bridge = OftBridge::new(&client, BRIDGE);
        let fee = MessagingFee {
            native_fee: U256::from(12345u32),
            lz_token_fee: U256::default(),
        };
        let param = SendParam {
            dst_eid: 1,
            to: [0u8; 32],
            amount_ld: U256::from(1u8),
            min_amount_ld: U256::from(1u8),
            extra_options: vec![],
            compose_msg: vec![],
            oft_cmd: vec![],
        };
        let tx = bridge.send_tx(&param, &fee, OWNER_ADDR).unwrap();
        assert_eq!(tx.to, BRIDGE);
        assert_eq!(tx.value, U256::from(12345u32));
        assert_eq!(&tx.data[..4], &abi::parse_signature(SEND).unwrap().selector);
    }

    #[tokio::test]
    async fn test_resolve_token_adapter() {
        let client = StaticChainClient::new(OWNER_ADDR)
            .with_return(BRIDGE, TOKEN, &[AbiValue::Address(TOKEN_ADDR)]);
        let bridge = OftBridge::new(&client, BRIDGE);
        assert_eq!(
            bridge.resolve_token().await.unwrap(),
            TokenKind::Adapter { underlying: TOKEN_ADDR }
        );
    }

    #[tokio::test]
    async fn test_resolve_token_native_on_revert() {
        let client = StaticChainClient::new(OWNER_ADDR).with_revert(BRIDGE, TOKEN);
        let bridge = OftBridge::new(&client, BRIDGE);
        let kind = bridge.resolve_token().await.unwrap();
        assert_eq!(kind, TokenKind::NativeOft);
        assert_eq!(kind.token_address(BRIDGE), BRIDGE);
    }

    #[tokio::test]
    async fn test_resolve_token_self_is_native() {
        let client = StaticChainClient::new(OWNER_ADDR)
            .with_return(BRIDGE, TOKEN, &[AbiValue::Address(BRIDGE)]);
        let bridge = OftBridge::new(&client, BRIDGE);
        assert_eq!(bridge.resolve_token().await.unwrap(), TokenKind::NativeOft);
    }

    #[tokio::test]
    async fn test_token_lookup_propagates_transport_failure() {
        let client = StaticChainClient::new(OWNER_ADDR).with_unavailable(BRIDGE, TOKEN);
        let bridge = OftBridge::new(&client, BRIDGE);
        assert!(matches!(bridge.resolve_token().await, Err(Error::RpcUnavailable(_))));
    }

    #[tokio::test]
    async fn test_approval_required_absent_means_false() {
        let client = StaticChainClient::new(OWNER_ADDR);
        let bridge = OftBridge::new(&client, BRIDGE);
        assert!(!bridge.approval_required().await.unwrap());

        let client = StaticChainClient::new(OWNER_ADDR)
            .with_return(BRIDGE, APPROVAL_REQUIRED, &[AbiValue::Bool(true)]);
        let bridge = OftBridge::new(&client, BRIDGE);
        assert!(bridge.approval_required().await.unwrap());
    }

    #[tokio::test]
    async fn test_quote_revert_keeps_data() {
        let client = StaticChainClient::new(OWNER_ADDR).with_revert_data(
            BRIDGE,
            QUOTE_SEND,
            vec![0x6c, 0x1c, 0xcd, 0xb5],
        );
        let bridge = OftBridge::new(&client, BRIDGE);
        let param = SendParam {
            dst_eid: 1,
            to: [0u8; 32],
            amount_ld: U256::from(1u8),
            min_amount_ld: U256::from(1u8),
            extra_options: vec![],
            compose_msg: vec![],
            oft_cmd: vec![],
        };
        match bridge.quote_send(&param, false).await {
            Err(Error::QuoteFailed { data, .. }) => {
                assert_eq!(data, Some(vec![0x6c, 0x1c, 0xcd, 0xb5]))
            }
            other => panic!("expected QuoteFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_erc20_reads() {
        let client = StaticChainClient::new(OWNER_ADDR)
            .with_return(TOKEN_ADDR, BALANCE_OF, &[AbiValue::uint(500u32)])
            .with_return(TOKEN_ADDR, DECIMALS, &[AbiValue::uint(6u8)])
            .with_return(TOKEN_ADDR, ALLOWANCE, &[AbiValue::uint(7u8)]);
        let token = Erc20::new(&client, TOKEN_ADDR);
        assert_eq!(token.balance_of(OWNER_ADDR).await.unwrap(), U256::from(500u32));
        assert_eq!(token.decimals().await.unwrap(), 6);
        assert_eq!(token.allowance(OWNER_ADDR, BRIDGE).await.unwrap(), U256::from(7u8));
    }

    #[tokio::test]
    async fn test_erc20_undecodable_is_revert() {
        let client = StaticChainClient::new(OWNER_ADDR).with_raw(TOKEN_ADDR, DECIMALS, vec![]);
        let token = Erc20::new(&client, TOKEN_ADDR);
        assert!(matches!(
            token.decimals().await,
            Err(Error::ContractCallReverted { .. })
        ));
    }

    #[tokio::test]
    async fn test_peer_zero_is_none() {
        let client = StaticChainClient::new(OWNER_ADDR)
            .with_return(BRIDGE, PEERS, &[AbiValue::bytes32([0u8; 32])]);
        let bridge = OftBridge::new(&client, BRIDGE);
        assert_eq!(bridge.peer(40232).await.unwrap(), None);

        let client = StaticChainClient::new(OWNER_ADDR)
            .with_return(BRIDGE, PEERS, &[AbiValue::bytes32(TOKEN_ADDR.to_bytes32())]);
        let bridge = OftBridge::new(&client, BRIDGE);
        assert_eq!(bridge.peer(40232).await.unwrap(), Some(TOKEN_ADDR.to_bytes32()));
    }

    #[test]
    fn test_oft_sent_guid() {
        let topic = abi::keccak256(OFT_SENT_EVENT.as_bytes());
        let receipt = TxReceipt {
            transaction_hash: "0x1".to_string(),
            block_number: 1,
            success: true,
            logs: vec![
                Log {
                    address: TOKEN_ADDR,
                    topics: vec![[0x01; 32]],
                    data: vec![],
                },
                Log {
                    address: BRIDGE,
                    topics: vec![topic, [0x42; 32], OWNER_ADDR.to_bytes32()],
                    data: vec![],
                },
            ],
        };
        assert_eq!(oft_sent_guid(&receipt, BRIDGE), Some([0x42; 32]));
        assert_eq!(oft_sent_guid(&receipt, TOKEN_ADDR), None);
    }
}
