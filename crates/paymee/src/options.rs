//! Executor options in the LayerZero type-3 layout.
//!
//! Wire format: a big-endian `u16` header (`3`), then one record per
//! instruction: `worker_id: u8 | size: u16 | option_type: u8 | params`, with
//! `size = params.len() + 1`. All integers are big-endian.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::Error;

pub const OPTIONS_TYPE_3: u16 = 3;
pub const EXECUTOR_WORKER_ID: u8 = 1;

const OPTION_TYPE_LZ_RECEIVE: u8 = 1;
const OPTION_TYPE_NATIVE_DROP: u8 = 2;
const OPTION_TYPE_LZ_COMPOSE: u8 = 3;
const OPTION_TYPE_ORDERED_EXECUTION: u8 = 4;

/// Receive option applied when the caller supplies none: 500k gas, no value.
///
/// Sized for adapters that unwrap or mint on delivery. Override with
/// [`OptionsBuilder::with_default_receive`].
pub const DEFAULT_RECEIVE_GAS: u128 = 500_000;

/// A single executor instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExecutorOption {
    LzReceive { gas: u128, value: u128 },
    Compose { index: u16, gas: u128, value: u128 },
    NativeDrop { amount: u128, receiver: [u8; 32] },
    OrderedExecution,
}

impl ExecutorOption {
    /// Build a native drop from its string form (wei amount, hex address).
    pub fn native_drop(amount_wei: &str, recipient: &str) -> Result<Self, Error> {
        let amount_wei = amount_wei.trim();
        let recipient = recipient.trim();
        if amount_wei.is_empty() || recipient.is_empty() {
            return Err(Error::InvalidNativeDropArgument(
                "both amount and recipient must be provided".to_string(),
            ));
        }
        let amount: u128 = amount_wei.parse().map_err(|_| {
            Error::InvalidNativeDropArgument(format!("invalid wei amount: {amount_wei}"))
        })?;
        let receiver = Address::parse(recipient).map_err(|_| {
            Error::InvalidNativeDropArgument(format!("invalid recipient: {recipient}"))
        })?;
        Ok(ExecutorOption::NativeDrop {
            amount,
            receiver: receiver.to_bytes32(),
        })
    }
}

/// Accumulates executor instructions in call order.
#[derive(Debug, Clone)]
pub struct OptionsBuilder {
    options: Vec<ExecutorOption>,
    compose_indices: BTreeSet<u16>,
    default_receive: Option<(u128, u128)>,
}

impl Default for OptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionsBuilder {
    pub fn new() -> Self {
        Self {
            options: Vec::new(),
            compose_indices: BTreeSet::new(),
            default_receive: Some((DEFAULT_RECEIVE_GAS, 0)),
        }
    }

    /// Replace the fallback receive option; `None` disables it.
    pub fn with_default_receive(mut self, default: Option<(u128, u128)>) -> Self {
        self.default_receive = default;
        self
    }

    pub fn add_receive_option(&mut self, gas: u128, value: u128) -> &mut Self {
        self.options.push(ExecutorOption::LzReceive { gas, value });
        self
    }

    /// Append a compose instruction; each index may appear once.
    pub fn add_compose_option(
        &mut self,
        index: u16,
        gas: u128,
        value: u128,
    ) -> Result<&mut Self, Error> {
        if !self.compose_indices.insert(index) {
            return Err(Error::InvalidRequest(format!(
                "duplicate compose option index {index}"
            )));
        }
        self.options.push(ExecutorOption::Compose { index, gas, value });
        Ok(self)
    }

    /// Append a native drop of `amount_wei` to `recipient`, both as strings.
    pub fn add_native_drop_option(
        &mut self,
        amount_wei: &str,
        recipient: &str,
    ) -> Result<&mut Self, Error> {
        self.options
            .push(ExecutorOption::native_drop(amount_wei, recipient)?);
        Ok(self)
    }

    pub fn add_ordered_execution_option(&mut self) -> &mut Self {
        self.options.push(ExecutorOption::OrderedExecution);
        self
    }

    /// Append an already-typed instruction, with the same checks as the
    /// dedicated methods.
    pub fn add(&mut self, option: &ExecutorOption) -> Result<&mut Self, Error> {
        match option {
            ExecutorOption::LzReceive { gas, value } => Ok(self.add_receive_option(*gas, *value)),
            ExecutorOption::Compose { index, gas, value } => {
                self.add_compose_option(*index, *gas, *value)
            }
            ExecutorOption::NativeDrop { .. } => {
                self.options.push(option.clone());
                Ok(self)
            }
            ExecutorOption::OrderedExecution => Ok(self.add_ordered_execution_option()),
        }
    }

    /// Instructions as they will be serialized, default receive included.
    pub fn instructions(&self) -> Vec<ExecutorOption> {
        let has_receive = self
            .options
            .iter()
            .any(|o| matches!(o, ExecutorOption::LzReceive { .. }));

        let mut out = Vec::with_capacity(self.options.len() + 1);
        if !has_receive {
            if let Some((gas, value)) = self.default_receive {
                out.push(ExecutorOption::LzReceive { gas, value });
            }
        }
        out.extend(self.options.iter().cloned());
        out
    }

    pub fn to_wire_format(&self) -> Vec<u8> {
        let mut out = OPTIONS_TYPE_3.to_be_bytes().to_vec();
        for option in self.instructions() {
            encode_option(&option, &mut out);
        }
        out
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_wire_format()))
    }
}

fn encode_option(option: &ExecutorOption, out: &mut Vec<u8>) {
    let (option_type, params) = match option {
        ExecutorOption::LzReceive { gas, value } => {
            let mut p = gas.to_be_bytes().to_vec();
            if *value != 0 {
                p.extend_from_slice(&value.to_be_bytes());
            }
            (OPTION_TYPE_LZ_RECEIVE, p)
        }
        ExecutorOption::NativeDrop { amount, receiver } => {
            let mut p = amount.to_be_bytes().to_vec();
            p.extend_from_slice(receiver);
            (OPTION_TYPE_NATIVE_DROP, p)
        }
        ExecutorOption::Compose { index, gas, value } => {
            let mut p = index.to_be_bytes().to_vec();
            p.extend_from_slice(&gas.to_be_bytes());
            if *value != 0 {
                p.extend_from_slice(&value.to_be_bytes());
            }
            (OPTION_TYPE_LZ_COMPOSE, p)
        }
        ExecutorOption::OrderedExecution => (OPTION_TYPE_ORDERED_EXECUTION, Vec::new()),
    };

    out.push(EXECUTOR_WORKER_ID);
    out.extend_from_slice(&((params.len() + 1) as u16).to_be_bytes());
    out.push(option_type);
    out.extend(params);
}

/// Parse a type-3 options blob back into instructions.
pub fn decode_options(bytes: &[u8]) -> Result<Vec<ExecutorOption>, Error> {
    let malformed =
        |msg: String| Error::InvalidRequest(format!("malformed executor options: {msg}"));

    if bytes.len() < 2 {
        return Err(malformed("missing header".to_string()));
    }
    let header = u16::from_be_bytes([bytes[0], bytes[1]]);
    if header != OPTIONS_TYPE_3 {
        return Err(malformed(format!("unsupported options type {header}")));
    }

    let mut options = Vec::new();
    let mut cursor = 2;
    while cursor < bytes.len() {
        if bytes.len() < cursor + 4 {
            return Err(malformed(format!("truncated record at byte {cursor}")));
        }
        let worker = bytes[cursor];
        if worker != EXECUTOR_WORKER_ID {
            return Err(malformed(format!("unsupported worker id {worker}")));
        }
        let size = u16::from_be_bytes([bytes[cursor + 1], bytes[cursor + 2]]) as usize;
        if size == 0 || bytes.len() < cursor + 3 + size {
            return Err(malformed(format!("record at byte {cursor} overruns input")));
        }
        let option_type = bytes[cursor + 3];
        let params = &bytes[cursor + 4..cursor + 3 + size];

        let option = match (option_type, params.len()) {
            (OPTION_TYPE_LZ_RECEIVE, 16) => ExecutorOption::LzReceive {
                gas: read_u128(&params[..16]),
                value: 0,
            },
            (OPTION_TYPE_LZ_RECEIVE, 32) => ExecutorOption::LzReceive {
                gas: read_u128(&params[..16]),
                value: read_u128(&params[16..]),
            },
            (OPTION_TYPE_NATIVE_DROP, 48) => {
                let mut receiver = [0u8; 32];
                receiver.copy_from_slice(&params[16..]);
                ExecutorOption::NativeDrop {
                    amount: read_u128(&params[..16]),
                    receiver,
                }
            }
            (OPTION_TYPE_LZ_COMPOSE, 18) | (OPTION_TYPE_LZ_COMPOSE, 34) => ExecutorOption::Compose {
                index: u16::from_be_bytes([params[0], params[1]]),
                gas: read_u128(&params[2..18]),
                value: if params.len() == 34 { read_u128(&params[18..]) } else { 0 },
            },
            (OPTION_TYPE_ORDERED_EXECUTION, 0) => ExecutorOption::OrderedExecution,
            (t, len) => {
                return Err(malformed(format!("unknown option type {t} with {len} param bytes")))
            }
        };
        options.push(option);
        cursor += 3 + size;
    }

    Ok(options)
}

fn read_u128(bytes: &[u8]) -> u128 {
    let mut buf = [0u8; 16];
    buf.copy_from_slice(bytes);
    u128::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_receive_option() {
        let builder = OptionsBuilder::new();
        // 500_000 = 0x07a120
        assert_eq!(
            builder.to_hex(),
            "0x0003010011010000000000000000000000000007a120"
        );
        let decoded = decode_options(&builder.to_wire_format()).unwrap();
        assert_eq!(
            decoded,
            vec![ExecutorOption::LzReceive { gas: 500_000, value: 0 }]
        );
    }

    #[test]
    fn test_explicit_receive_replaces_default() {
        let mut builder = OptionsBuilder::new();
        builder.add_receive_option(200_000, 0);
        assert_eq!(
            builder.to_hex(),
            "0x00030100110100000000000000000000000000030d40"
        );
    }

    #[test]
    fn test_receive_with_value_and_order() {
        let mut builder = OptionsBuilder::new();
        builder.add_receive_option(100, 5).add_receive_option(200, 0);
        let wire = builder.to_wire_format();
        // header + (4 + 32) + (4 + 16)
        assert_eq!(wire.len(), 2 + 36 + 20);
        assert_eq!(&wire[2..6], &[1, 0, 33, 1]);
        assert_eq!(
            decode_options(&wire).unwrap(),
            vec![
                ExecutorOption::LzReceive { gas: 100, value: 5 },
                ExecutorOption::LzReceive { gas: 200, value: 0 },
            ]
        );
    }

    #[test]
    fn test_compose_option_layout() {
        let mut builder = OptionsBuilder::new().with_default_receive(None);
        builder.add_compose_option(0, 300_000, 0).unwrap();
        let wire = builder.to_wire_format();
        assert_eq!(&wire[..6], &[0, 3, 1, 0, 19, 3]);
        assert_eq!(&wire[6..8], &[0, 0]);
        assert_eq!(wire.len(), 2 + 4 + 18);
    }

    #[test]
    fn test_duplicate_compose_index_rejected() {
        let mut builder = OptionsBuilder::new();
        builder.add_compose_option(1, 10, 0).unwrap();
        assert!(matches!(
            builder.add_compose_option(1, 20, 0),
            Err(Error::InvalidRequest(_))
        ));
        builder.add_compose_option(2, 20, 0).unwrap();
    }

    #[test]
    fn test_native_drop() {
        let mut builder = OptionsBuilder::new();
        builder
            .add_native_drop_option("1000", "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed")
            .unwrap();
        let decoded = decode_options(&builder.to_wire_format()).unwrap();
        assert_eq!(decoded.len(), 2);
        match &decoded[1] {
            ExecutorOption::NativeDrop { amount, receiver } => {
                assert_eq!(*amount, 1000);
                assert_eq!(
                    hex::encode(&receiver[12..]),
                    "5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"
                );
            }
            other => panic!("expected NativeDrop, got {other:?}"),
        }
    }

    #[test]
    fn test_native_drop_rejects_bad_arguments() {
        let mut builder = OptionsBuilder::new();
        for (amount, recipient) in [
            ("", "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"),
            ("1000", ""),
            ("ten", "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"),
            ("1000", "0x1234"),
        ] {
            assert!(matches!(
                builder.add_native_drop_option(amount, recipient),
                Err(Error::InvalidNativeDropArgument(_))
            ));
        }
    }

    #[test]
    fn test_ordered_execution() {
        let mut builder = OptionsBuilder::new().with_default_receive(None);
        builder.add_ordered_execution_option();
        assert_eq!(builder.to_hex(), "0x000301000104");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_options(&[]).is_err());
        assert!(decode_options(&[0, 1]).is_err());
        assert!(decode_options(&[0, 3, 2, 0, 1, 1]).is_err());
        assert!(decode_options(&[0, 3, 1, 0, 17, 1, 0]).is_err());
    }
}
