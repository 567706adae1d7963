//! Native balance, token balance and allowance reads.
//!
//! [`BalanceReader`] resolves chains through the registry; [`ChainBalances`]
//! performs the same reads over an already-open client.

use std::sync::Arc;

use crate::abi::U256;
use crate::address::Address;
use crate::chain::ChainRegistry;
use crate::contracts::{Erc20, OftBridge};
use crate::error::Error;
use crate::rpc::{ChainClient, Connector};

/// Reads over one open chain client.
pub struct ChainBalances<'a> {
    client: &'a dyn ChainClient,
}

impl<'a> ChainBalances<'a> {
    pub fn new(client: &'a dyn ChainClient) -> Self {
        Self { client }
    }

    pub async fn native_balance(&self, owner: Address) -> Result<U256, Error> {
        Ok(self.client.native_balance(owner).await?)
    }

    pub async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, Error> {
        Erc20::new(self.client, token).balance_of(owner).await
    }

    pub async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, Error> {
        Erc20::new(self.client, token).allowance(owner, spender).await
    }
}

/// Balance and allowance queries addressed by endpoint id.
pub struct BalanceReader {
    registry: Arc<ChainRegistry>,
    connector: Arc<dyn Connector>,
}

impl BalanceReader {
    pub fn new(registry: Arc<ChainRegistry>, connector: Arc<dyn Connector>) -> Self {
        Self { registry, connector }
    }

    fn client(&self, eid: u32) -> Result<Arc<dyn ChainClient>, Error> {
        let endpoint = self.registry.endpoint(eid)?;
        self.connector.connect(endpoint)
    }

    pub async fn native_balance(&self, owner: Address, eid: u32) -> Result<U256, Error> {
        let client = self.client(eid)?;
        ChainBalances::new(client.as_ref()).native_balance(owner).await
    }

    /// Balance of the token bound to `eid`, discovering it from the bridge
    /// when the binding does not name it.
    pub async fn token_balance(&self, owner: Address, eid: u32) -> Result<U256, Error> {
        let client = self.client(eid)?;
        let token = self.bound_token(client.as_ref(), eid).await?;
        ChainBalances::new(client.as_ref()).token_balance(token, owner).await
    }

    pub async fn token_balance_of(
        &self,
        token: Address,
        owner: Address,
        eid: u32,
    ) -> Result<U256, Error> {
        let client = self.client(eid)?;
        ChainBalances::new(client.as_ref()).token_balance(token, owner).await
    }

    /// Decimals of the token bound to `eid`: pinned in the binding, or read
    /// from the token contract.
    pub async fn token_decimals(&self, eid: u32) -> Result<u8, Error> {
        if let Some(pinned) = self.registry.token_binding(eid)?.decimals {
            return Ok(pinned);
        }
        let client = self.client(eid)?;
        let token = self.bound_token(client.as_ref(), eid).await?;
        Erc20::new(client.as_ref(), token).decimals().await
    }

    /// Allowance on the token bound to `eid`.
    pub async fn allowance(
        &self,
        owner: Address,
        spender: Address,
        eid: u32,
    ) -> Result<U256, Error> {
        let client = self.client(eid)?;
        let token = self.bound_token(client.as_ref(), eid).await?;
        ChainBalances::new(client.as_ref())
            .allowance(token, owner, spender)
            .await
    }

    async fn bound_token(&self, client: &dyn ChainClient, eid: u32) -> Result<Address, Error> {
        let binding = self.registry.token_binding(eid)?;
        if let Some(token) = binding.token_address {
            return Ok(token);
        }
        let bridge = OftBridge::new(client, binding.bridge_address);
        Ok(bridge.resolve_token().await?.token_address(binding.bridge_address))
    }
}
