use num_bigint::BigUint;
use tiny_keccak::{Hasher, Keccak};

use crate::address::Address;
use crate::error::AbiError;

/// Unsigned 256-bit integer as used on the wire.
pub type U256 = BigUint;

/// Largest value representable in a `uint256`.
pub fn u256_max() -> U256 {
    (BigUint::from(1u8) << 256u32) - 1u8
}

/// Parsed function signature.
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<ParamType>,
    pub canonical: String,
    pub selector: [u8; 4],
}

/// ABI parameter types, recursive for tuples and arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Address,
    Uint(usize),
    Bool,
    Bytes,
    FixedBytes(usize),
    String,
    Array(Box<ParamType>),
    FixedArray(Box<ParamType>, usize),
    Tuple(Vec<ParamType>),
}

impl ParamType {
    /// Whether this type is dynamically-sized in ABI encoding.
    pub fn is_dynamic(&self) -> bool {
        match self {
            ParamType::Bytes | ParamType::String => true,
            ParamType::Array(_) => true,
            ParamType::FixedArray(inner, _) => inner.is_dynamic(),
            ParamType::Tuple(members) => members.iter().any(|m| m.is_dynamic()),
            _ => false,
        }
    }

    /// Size of this type's slot in the head of an enclosing tuple.
    fn head_size(&self) -> usize {
        if self.is_dynamic() {
            return 32;
        }
        match self {
            ParamType::FixedArray(inner, len) => inner.head_size() * len,
            ParamType::Tuple(members) => members.iter().map(|m| m.head_size()).sum(),
            _ => 32,
        }
    }
}

/// An ABI value, either an argument to encode or a decoded return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Address(Address),
    Uint(U256),
    Bool(bool),
    Bytes(Vec<u8>),
    FixedBytes(Vec<u8>),
    String(String),
    Array(Vec<AbiValue>),
    Tuple(Vec<AbiValue>),
}

impl AbiValue {
    pub fn uint(n: impl Into<U256>) -> Self {
        AbiValue::Uint(n.into())
    }

    pub fn bytes32(word: [u8; 32]) -> Self {
        AbiValue::FixedBytes(word.to_vec())
    }

    pub fn as_uint(&self) -> Option<&U256> {
        match self {
            AbiValue::Uint(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            AbiValue::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AbiValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_word(&self) -> Option<[u8; 32]> {
        match self {
            AbiValue::FixedBytes(b) if b.len() == 32 => {
                let mut word = [0u8; 32];
                word.copy_from_slice(b);
                Some(word)
            }
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[AbiValue]> {
        match self {
            AbiValue::Tuple(items) => Some(items),
            _ => None,
        }
    }
}

/// Keccak-256 digest.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);
    hash
}

/// Parse a function signature string into a `FunctionSignature`.
///
/// Example: `"approve(address,uint256)"` → name="approve", params=[Address, Uint(256)]
pub fn parse_signature(sig: &str) -> Result<FunctionSignature, AbiError> {
    let sig = sig.trim();
    let open = sig
        .find('(')
        .ok_or_else(|| AbiError::InvalidSignature(format!("missing '(' in: {sig}")))?;

    if !sig.ends_with(')') {
        return Err(AbiError::InvalidSignature(format!("missing ')' in: {sig}")));
    }

    let name = sig[..open].to_string();
    if name.is_empty() {
        return Err(AbiError::InvalidSignature("empty function name".to_string()));
    }

    let params = parse_types(&sig[open + 1..sig.len() - 1])?;
    let canonical = format!("{}({})", name, canonical_params(&params));
    let selector = selector_from_signature(&canonical);

    Ok(FunctionSignature {
        name,
        params,
        canonical,
        selector,
    })
}

/// Parse a comma-separated list of param types, respecting nested parentheses for tuples.
pub fn parse_types(s: &str) -> Result<Vec<ParamType>, AbiError> {
    let mut result = Vec::new();
    if s.trim().is_empty() {
        return Ok(result);
    }

    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| AbiError::InvalidSignature("unbalanced ')'".to_string()))?;
            }
            ',' if depth == 0 => {
                result.push(parse_param_type(s[start..i].trim())?);
                start = i + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(AbiError::InvalidSignature("unbalanced parentheses".to_string()));
    }

    let last = s[start..].trim();
    if !last.is_empty() {
        result.push(parse_param_type(last)?);
    }

    Ok(result)
}

fn parse_param_type(s: &str) -> Result<ParamType, AbiError> {
    let s = s.trim();

    if let Some(bracket_pos) = s.rfind('[') {
        if s.ends_with(']') {
            let inner = parse_param_type(&s[..bracket_pos])?;
            let size_str = &s[bracket_pos + 1..s.len() - 1];
            if size_str.is_empty() {
                return Ok(ParamType::Array(Box::new(inner)));
            }
            let size: usize = size_str.parse().map_err(|_| {
                AbiError::InvalidSignature(format!("invalid array size: {size_str}"))
            })?;
            return Ok(ParamType::FixedArray(Box::new(inner), size));
        }
    }

    if s.starts_with('(') && s.ends_with(')') {
        return Ok(ParamType::Tuple(parse_types(&s[1..s.len() - 1])?));
    }

    match s {
        "address" => Ok(ParamType::Address),
        "bool" => Ok(ParamType::Bool),
        "string" => Ok(ParamType::String),
        "bytes" => Ok(ParamType::Bytes),
        "uint" => Ok(ParamType::Uint(256)),
        _ if s.starts_with("uint") => {
            let bits = s[4..]
                .parse::<usize>()
                .ok()
                .filter(|b| *b > 0 && *b <= 256 && b % 8 == 0)
                .ok_or_else(|| AbiError::InvalidSignature(format!("invalid uint width: {s}")))?;
            Ok(ParamType::Uint(bits))
        }
        _ if s.starts_with("bytes") => {
            let size = s[5..]
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0 && *n <= 32)
                .ok_or_else(|| AbiError::InvalidSignature(format!("invalid bytes width: {s}")))?;
            Ok(ParamType::FixedBytes(size))
        }
        _ => Err(AbiError::InvalidSignature(format!("unknown type: {s}"))),
    }
}

fn canonical_params(params: &[ParamType]) -> String {
    params
        .iter()
        .map(canonical_param)
        .collect::<Vec<_>>()
        .join(",")
}

fn canonical_param(p: &ParamType) -> String {
    match p {
        ParamType::Address => "address".to_string(),
        ParamType::Uint(bits) => format!("uint{bits}"),
        ParamType::Bool => "bool".to_string(),
        ParamType::Bytes => "bytes".to_string(),
        ParamType::FixedBytes(size) => format!("bytes{size}"),
        ParamType::String => "string".to_string(),
        ParamType::Array(inner) => format!("{}[]", canonical_param(inner)),
        ParamType::FixedArray(inner, size) => format!("{}[{size}]", canonical_param(inner)),
        ParamType::Tuple(members) => format!("({})", canonical_params(members)),
    }
}

/// Compute the 4-byte selector from a canonical function signature.
pub fn selector_from_signature(canonical: &str) -> [u8; 4] {
    let hash = keccak256(canonical.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Encode a call: selector followed by the ABI-encoded argument tuple.
pub fn encode_call(sig: &FunctionSignature, args: &[AbiValue]) -> Result<Vec<u8>, AbiError> {
    let mut out = sig.selector.to_vec();
    out.extend(encode(&sig.params, args)?);
    Ok(out)
}

/// ABI-encode a list of values as if they were the members of a tuple.
pub fn encode(types: &[ParamType], values: &[AbiValue]) -> Result<Vec<u8>, AbiError> {
    if types.len() != values.len() {
        return Err(AbiError::ArgumentCount {
            expected: types.len(),
            actual: values.len(),
        });
    }

    let head_len: usize = types.iter().map(|t| t.head_size()).sum();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for (ty, value) in types.iter().zip(values) {
        let encoded = encode_value(ty, value)?;
        if ty.is_dynamic() {
            head.extend_from_slice(&usize_word(head_len + tail.len()));
            tail.extend(encoded);
        } else {
            head.extend(encoded);
        }
    }

    head.extend(tail);
    Ok(head)
}

fn encode_value(ty: &ParamType, value: &AbiValue) -> Result<Vec<u8>, AbiError> {
    let mismatch = || AbiError::TypeMismatch {
        expected: canonical_param(ty),
    };

    match (ty, value) {
        (ParamType::Address, AbiValue::Address(addr)) => Ok(addr.to_bytes32().to_vec()),
        (ParamType::Uint(bits), AbiValue::Uint(n)) => {
            if n.bits() > *bits as u64 {
                return Err(AbiError::InvalidEncoding(format!(
                    "{n} does not fit in uint{bits}"
                )));
            }
            Ok(uint_word(n).to_vec())
        }
        (ParamType::Bool, AbiValue::Bool(b)) => {
            let mut word = [0u8; 32];
            word[31] = u8::from(*b);
            Ok(word.to_vec())
        }
        (ParamType::FixedBytes(size), AbiValue::FixedBytes(bytes)) => {
            if bytes.len() != *size {
                return Err(mismatch());
            }
            let mut word = [0u8; 32];
            word[..*size].copy_from_slice(bytes);
            Ok(word.to_vec())
        }
        (ParamType::Bytes, AbiValue::Bytes(bytes)) => Ok(encode_packed_bytes(bytes)),
        (ParamType::String, AbiValue::String(s)) => Ok(encode_packed_bytes(s.as_bytes())),
        (ParamType::Array(inner), AbiValue::Array(items)) => {
            let mut out = usize_word(items.len()).to_vec();
            let types = vec![(**inner).clone(); items.len()];
            out.extend(encode(&types, items)?);
            Ok(out)
        }
        (ParamType::FixedArray(inner, len), AbiValue::Array(items)) => {
            if items.len() != *len {
                return Err(mismatch());
            }
            let types = vec![(**inner).clone(); *len];
            encode(&types, items)
        }
        (ParamType::Tuple(members), AbiValue::Tuple(items)) => encode(members, items),
        _ => Err(mismatch()),
    }
}

fn encode_packed_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = usize_word(bytes.len()).to_vec();
    out.extend_from_slice(bytes);
    let padding = (32 - bytes.len() % 32) % 32;
    out.extend(vec![0u8; padding]);
    out
}

/// Big-endian 32-byte word of a value known to fit in 256 bits.
pub(crate) fn uint_word(n: &U256) -> [u8; 32] {
    let bytes = n.to_bytes_be();
    let mut word = [0u8; 32];
    let start = 32usize.saturating_sub(bytes.len());
    let copy_len = bytes.len().min(32);
    word[start..].copy_from_slice(&bytes[bytes.len() - copy_len..]);
    word
}

fn usize_word(n: usize) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&(n as u64).to_be_bytes());
    word
}

/// Decode ABI-encoded data (e.g. `eth_call` return data) into values.
pub fn decode(types: &[ParamType], data: &[u8]) -> Result<Vec<AbiValue>, AbiError> {
    decode_tuple(types, data, 0)
}

fn decode_tuple(types: &[ParamType], data: &[u8], base: usize) -> Result<Vec<AbiValue>, AbiError> {
    let mut values = Vec::with_capacity(types.len());
    let mut head = base;

    for ty in types {
        let value = if ty.is_dynamic() {
            let offset = read_usize(data, head)?;
            decode_value_at(ty, data, base + offset)?
        } else {
            decode_value_at(ty, data, head)?
        };
        values.push(value);
        head += ty.head_size();
    }

    Ok(values)
}

fn decode_value_at(ty: &ParamType, data: &[u8], offset: usize) -> Result<AbiValue, AbiError> {
    match ty {
        ParamType::Address => {
            let word = read_word(data, offset)?;
            if word[..12].iter().any(|b| *b != 0) {
                return Err(AbiError::InvalidEncoding("dirty address padding".to_string()));
            }
            Ok(AbiValue::Address(Address::from_bytes32(&word)))
        }
        ParamType::Uint(_) => Ok(AbiValue::Uint(BigUint::from_bytes_be(&read_word(data, offset)?))),
        ParamType::Bool => {
            let word = read_word(data, offset)?;
            Ok(AbiValue::Bool(word[31] != 0))
        }
        ParamType::FixedBytes(size) => {
            let word = read_word(data, offset)?;
            Ok(AbiValue::FixedBytes(word[..*size].to_vec()))
        }
        ParamType::Bytes => Ok(AbiValue::Bytes(read_dynamic_bytes(data, offset)?)),
        ParamType::String => {
            let bytes = read_dynamic_bytes(data, offset)?;
            let s = String::from_utf8(bytes)
                .map_err(|e| AbiError::InvalidEncoding(format!("invalid UTF-8: {e}")))?;
            Ok(AbiValue::String(s))
        }
        ParamType::Array(inner) => {
            let len = read_usize(data, offset)?;
            let types = vec![(**inner).clone(); len];
            Ok(AbiValue::Array(decode_tuple(&types, data, offset + 32)?))
        }
        ParamType::FixedArray(inner, len) => {
            let types = vec![(**inner).clone(); *len];
            Ok(AbiValue::Array(decode_tuple(&types, data, offset)?))
        }
        ParamType::Tuple(members) => Ok(AbiValue::Tuple(decode_tuple(members, data, offset)?)),
    }
}

fn read_dynamic_bytes(data: &[u8], offset: usize) -> Result<Vec<u8>, AbiError> {
    let len = read_usize(data, offset)?;
    let start = offset + 32;
    ensure_bytes(data, start, len)?;
    Ok(data[start..start + len].to_vec())
}

fn read_word(data: &[u8], offset: usize) -> Result<[u8; 32], AbiError> {
    ensure_bytes(data, offset, 32)?;
    let mut word = [0u8; 32];
    word.copy_from_slice(&data[offset..offset + 32]);
    Ok(word)
}

fn read_usize(data: &[u8], offset: usize) -> Result<usize, AbiError> {
    let word = read_word(data, offset)?;
    if word[..24].iter().any(|b| *b != 0) {
        return Err(AbiError::InvalidEncoding("offset too large for usize".to_string()));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&word[24..32]);
    usize::try_from(u64::from_be_bytes(bytes))
        .map_err(|_| AbiError::InvalidEncoding("offset too large for usize".to_string()))
}

fn ensure_bytes(data: &[u8], offset: usize, len: usize) -> Result<(), AbiError> {
    match offset.checked_add(len) {
        Some(end) if end <= data.len() => Ok(()),
        _ => Err(AbiError::DataTooShort {
            expected: offset.saturating_add(len),
            actual: data.len(),
        }),
    }
}
