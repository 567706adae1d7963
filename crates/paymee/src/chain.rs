use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::Error;

/// PayMee OFT adapter on Ethereum Sepolia, peered with the Optimism Sepolia
/// bridge registered under eid 11155420. Pass it as a bridge override; the
/// registry's Sepolia entry points at the WETH adapter used by payment links.
pub const SEPOLIA_PAYMEE_OFT: &str = "0x7a411471724e12Bd057652B1FF7c52c068e1C9b7";

const LAYERZERO_SCAN: &str = "https://layerzeroscan.com";
const LAYERZERO_SCAN_TESTNET: &str = "https://testnet.layerzeroscan.com";

/// Connection parameters for one LayerZero endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEndpoint {
    pub eid: u32,
    pub name: String,
    pub rpc_url: String,
    /// EVM chain id used for transaction signing.
    pub chain_id: u64,
    #[serde(default)]
    pub is_testnet: bool,
    pub explorer_base_url: String,
}

/// The token moved on a chain and the bridge contract that moves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBinding {
    pub bridge_address: Address,
    /// Known token address; when absent it is discovered from the bridge.
    #[serde(default)]
    pub token_address: Option<Address>,
    /// Pinned decimals; when absent they are read from the token contract.
    #[serde(default)]
    pub decimals: Option<u8>,
    /// The token is the chain's wrapped native asset (e.g. WETH).
    #[serde(default)]
    pub wraps_native: bool,
}

/// A registry entry: endpoint plus its token binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    #[serde(flatten)]
    pub endpoint: ChainEndpoint,
    pub binding: Option<TokenBinding>,
}

impl ChainEntry {
    pub fn explorer_link(&self, tx_hash: &str) -> String {
        format!(
            "{}/tx/{}",
            self.endpoint.explorer_base_url.trim_end_matches('/'),
            tx_hash
        )
    }

    pub fn scan_link(&self, tx_hash: &str) -> String {
        let base = if self.endpoint.is_testnet {
            LAYERZERO_SCAN_TESTNET
        } else {
            LAYERZERO_SCAN
        };
        format!("{base}/tx/{tx_hash}")
    }
}

/// Read-only lookup from endpoint id to chain configuration.
///
/// Built once and injected; tests construct their own registries.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    entries: BTreeMap<u32, ChainEntry>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = ChainEntry>) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            registry.insert(entry);
        }
        registry
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, entry: ChainEntry) {
        self.entries.insert(entry.endpoint.eid, entry);
    }

    pub fn get(&self, eid: u32) -> Result<&ChainEntry, Error> {
        self.entries
            .get(&eid)
            .ok_or(Error::UnsupportedChain { eid })
    }

    pub fn endpoint(&self, eid: u32) -> Result<&ChainEndpoint, Error> {
        self.get(eid).map(|e| &e.endpoint)
    }

    pub fn token_binding(&self, eid: u32) -> Result<&TokenBinding, Error> {
        self.get(eid)?
            .binding
            .as_ref()
            .ok_or(Error::UnsupportedChain { eid })
    }

    pub fn bridge_address(&self, eid: u32) -> Result<Address, Error> {
        self.token_binding(eid).map(|b| b.bridge_address)
    }

    pub fn contains(&self, eid: u32) -> bool {
        self.entries.contains_key(&eid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainEntry> {
        self.entries.values()
    }

    /// Human-readable name, falling back to `Chain {eid}`.
    pub fn name(&self, eid: u32) -> String {
        self.entries
            .get(&eid)
            .map(|e| e.endpoint.name.clone())
            .unwrap_or_else(|| format!("Chain {eid}"))
    }

    /// The Sepolia / Optimism Sepolia deployment used by the payment flow.
    pub fn testnets() -> Self {
        let sepolia = ChainEndpoint {
            eid: 40161,
            name: "Ethereum Sepolia".to_string(),
            rpc_url: "https://ethereum-sepolia-rpc.publicnode.com".to_string(),
            chain_id: 11155111,
            is_testnet: true,
            explorer_base_url: "https://sepolia.etherscan.io".to_string(),
        };
        let op_sepolia = |eid| ChainEndpoint {
            eid,
            name: "Optimism Sepolia".to_string(),
            rpc_url: "https://sepolia.optimism.io".to_string(),
            chain_id: 11155420,
            is_testnet: true,
            explorer_base_url: "https://sepolia-optimism.etherscan.io".to_string(),
        };

        Self::from_entries([
            ChainEntry {
                endpoint: sepolia,
                binding: Some(TokenBinding {
                    bridge_address: known_address("0x2F26C64514f40833F5b01e1FeEB2db35167a1028"),
                    token_address: Some(known_address(
                        "0xfFf9976782d46CC05630D1f6eBAb18b2324d6B14",
                    )),
                    decimals: Some(18),
                    wraps_native: true,
                }),
            },
            // The payment pages address Optimism Sepolia by its chain id.
            ChainEntry {
                endpoint: op_sepolia(11155420),
                binding: Some(TokenBinding {
                    bridge_address: known_address("0xaDd23f5D0Ec63245D3b33051dbFCE0CF81F49076"),
                    token_address: None,
                    decimals: None,
                    wraps_native: false,
                }),
            },
            ChainEntry {
                endpoint: op_sepolia(40232),
                binding: Some(TokenBinding {
                    bridge_address: known_address("0x1b421839E647953739D30e2EE06eb80b8A141BAB"),
                    token_address: Some(known_address(
                        "0x4200000000000000000000000000000000000006",
                    )),
                    decimals: Some(18),
                    wraps_native: true,
                }),
            },
        ])
    }
}

fn known_address(s: &str) -> Address {
    // Literals above are 40 hex chars; a typo would show up in the tests.
    Address::parse(s).unwrap_or(Address::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_eid_is_unsupported() {
        let registry = ChainRegistry::testnets();
        assert!(matches!(
            registry.get(1),
            Err(Error::UnsupportedChain { eid: 1 })
        ));
    }

    #[test]
    fn test_testnet_addresses_parse() {
        let registry = ChainRegistry::testnets();
        for entry in registry.iter() {
            let binding = entry.binding.as_ref().unwrap();
            assert!(!binding.bridge_address.is_zero(), "eid {}", entry.endpoint.eid);
            if let Some(token) = binding.token_address {
                assert!(!token.is_zero());
            }
        }
        assert_eq!(
            registry.bridge_address(40161).unwrap().to_checksum(),
            "0x2F26C64514f40833F5b01e1FeEB2db35167a1028"
        );
    }

    #[test]
    fn test_links() {
        let registry = ChainRegistry::testnets();
        let entry = registry.get(40161).unwrap();
        assert_eq!(entry.explorer_link("0xabc"), "https://sepolia.etherscan.io/tx/0xabc");
        assert_eq!(entry.scan_link("0xabc"), "https://testnet.layerzeroscan.com/tx/0xabc");
    }

    #[test]
    fn test_name_fallback() {
        let registry = ChainRegistry::testnets();
        assert_eq!(registry.name(40161), "Ethereum Sepolia");
        assert_eq!(registry.name(30101), "Chain 30101");
    }

    #[test]
    fn test_missing_binding_is_unsupported() {
        let registry = ChainRegistry::from_entries([ChainEntry {
            endpoint: ChainEndpoint {
                eid: 7,
                name: "Local".to_string(),
                rpc_url: "http://127.0.0.1:8545".to_string(),
                chain_id: 31337,
                is_testnet: true,
                explorer_base_url: "http://localhost".to_string(),
            },
            binding: None,
        }]);
        assert!(registry.endpoint(7).is_ok());
        assert!(matches!(
            registry.bridge_address(7),
            Err(Error::UnsupportedChain { eid: 7 })
        ));
    }
}
