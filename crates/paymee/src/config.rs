//! TOML configuration.
//!
//! ```toml
//! [signer]
//! private_key_env = "PAYMEE_PRIVATE_KEY"
//!
//! [send]
//! default_receive_gas = 500000
//! confirmation_timeout_secs = 180
//!
//! [[chains]]
//! eid = 40161
//! name = "Ethereum Sepolia"
//! rpc_url = "https://ethereum-sepolia-rpc.publicnode.com"
//! chain_id = 11155111
//! is_testnet = true
//! explorer_base_url = "https://sepolia.etherscan.io"
//!
//! [chains.binding]
//! bridge_address = "0x2F26C64514f40833F5b01e1FeEB2db35167a1028"
//! decimals = 18
//! wraps_native = true
//! ```
//!
//! With no `[[chains]]` the built-in testnet table is used. Keys never live
//! in the file; `private_key_env` names the variable that holds one.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chain::{ChainEntry, ChainRegistry};
use crate::error::Error;
use crate::options::DEFAULT_RECEIVE_GAS;
use crate::orchestrator::SendSettings;

pub const DEFAULT_PRIVATE_KEY_ENV: &str = "PAYMEE_PRIVATE_KEY";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub signer: SignerConfig,
    #[serde(default)]
    pub send: SendConfig,
    #[serde(default)]
    pub links: LinksConfig,
    #[serde(default)]
    pub chains: Vec<ChainEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    pub private_key_env: String,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            private_key_env: DEFAULT_PRIVATE_KEY_ENV.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendConfig {
    pub default_receive_gas: u64,
    pub default_receive_value: u64,
    /// Send no receive option at all when a request carries none.
    pub disable_default_receive: bool,
    pub confirmation_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub rpc_timeout_ms: u64,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            default_receive_gas: DEFAULT_RECEIVE_GAS as u64,
            default_receive_value: 0,
            disable_default_receive: false,
            confirmation_timeout_secs: 180,
            poll_interval_ms: 2_000,
            rpc_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinksConfig {
    pub store_path: PathBuf,
    /// Origin used to render shareable `/pay/{id}` URLs.
    pub base_url: String,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("payment-links.json"),
            base_url: "http://localhost:3000".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, Error> {
        let config: Config = toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Built-in defaults over the testnet deployment.
    pub fn testnets() -> Self {
        Self {
            chains: ChainRegistry::testnets().iter().cloned().collect(),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), Error> {
        let mut seen = BTreeSet::new();
        for entry in &self.chains {
            if !seen.insert(entry.endpoint.eid) {
                return Err(Error::Config(format!(
                    "endpoint id {} configured twice",
                    entry.endpoint.eid
                )));
            }
        }
        if self.send.poll_interval_ms == 0 {
            return Err(Error::Config("send.poll_interval_ms must be positive".to_string()));
        }
        if self.signer.private_key_env.trim().is_empty() {
            return Err(Error::Config("signer.private_key_env is empty".to_string()));
        }
        Ok(())
    }

    pub fn registry(&self) -> ChainRegistry {
        if self.chains.is_empty() {
            return ChainRegistry::testnets();
        }
        ChainRegistry::from_entries(self.chains.iter().cloned())
    }

    pub fn send_settings(&self) -> SendSettings {
        let send = &self.send;
        SendSettings {
            default_receive: (!send.disable_default_receive)
                .then(|| (send.default_receive_gas as u128, send.default_receive_value as u128)),
            confirmation_timeout: Duration::from_secs(send.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(send.poll_interval_ms),
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.send.rpc_timeout_ms)
    }

    /// Signing key from the configured environment variable, if set.
    pub fn private_key(&self) -> Result<Option<String>, Error> {
        match std::env::var(&self.signer.private_key_env) {
            Ok(key) if key.trim().is_empty() => Ok(None),
            Ok(key) => Ok(Some(key)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => Err(Error::Config(format!(
                "{} is not valid unicode",
                self.signer.private_key_env
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[send]
default_receive_gas = 200000
confirmation_timeout_secs = 60

[links]
base_url = "https://paymee.app"

[[chains]]
eid = 40161
name = "Ethereum Sepolia"
rpc_url = "http://127.0.0.1:8545"
chain_id = 11155111
is_testnet = true
explorer_base_url = "https://sepolia.etherscan.io"

[chains.binding]
bridge_address = "0x2F26C64514f40833F5b01e1FeEB2db35167a1028"
decimals = 18
wraps_native = true

[[chains]]
eid = 40232
name = "Optimism Sepolia"
rpc_url = "http://127.0.0.1:9545"
chain_id = 11155420
explorer_base_url = "https://sepolia-optimism.etherscan.io"
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.signer.private_key_env, DEFAULT_PRIVATE_KEY_ENV);
        assert_eq!(config.send.poll_interval_ms, 2_000);
        assert_eq!(config.links.base_url, "https://paymee.app");

        let registry = config.registry();
        let sepolia = registry.get(40161).unwrap();
        assert_eq!(sepolia.endpoint.rpc_url, "http://127.0.0.1:8545");
        let binding = sepolia.binding.as_ref().unwrap();
        assert_eq!(binding.decimals, Some(18));
        assert!(binding.wraps_native);
        assert_eq!(binding.token_address, None);

        let op = registry.get(40232).unwrap();
        assert!(!op.endpoint.is_testnet);
        assert!(op.binding.is_none());
    }

    #[test]
    fn test_send_settings() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        let settings = config.send_settings();
        assert_eq!(settings.default_receive, Some((200_000, 0)));
        assert_eq!(settings.confirmation_timeout, Duration::from_secs(60));

        let config = Config::from_toml_str("[send]\ndisable_default_receive = true").unwrap();
        assert_eq!(config.send_settings().default_receive, None);
    }

    #[test]
    fn test_empty_config_uses_testnets() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.send_settings(), SendSettings::default());
        assert!(config.registry().contains(40161));
        assert_eq!(Config::testnets().chains.len(), 3);
    }

    #[test]
    fn test_rejects_duplicates_and_bad_values() {
        let dup = format!(
            "{SAMPLE}\n[[chains]]\neid = 40161\nname = \"x\"\nrpc_url = \"x\"\n\
             chain_id = 1\nexplorer_base_url = \"x\"\n"
        );
        assert!(matches!(Config::from_toml_str(&dup), Err(Error::Config(_))));
        assert!(matches!(
            Config::from_toml_str("[send]\npoll_interval_ms = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[send]\nconfirmation_timeout_secs = \"soon\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_testnets_round_trip_through_toml() {
        let rendered = toml::to_string(&Config::testnets()).unwrap();
        let parsed = Config::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed, Config::testnets());
    }

    #[test]
    fn test_private_key_from_env() {
        let var = format!("PAYMEE_TEST_KEY_{}", uuid::Uuid::new_v4().simple());
        let config = Config {
            signer: SignerConfig {
                private_key_env: var.clone(),
            },
            ..Config::default()
        };
        assert_eq!(config.private_key().unwrap(), None);
        std::env::set_var(&var, "0xabc");
        assert_eq!(config.private_key().unwrap().as_deref(), Some("0xabc"));
        std::env::remove_var(&var);
    }
}
