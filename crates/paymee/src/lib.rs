//! PayMee: payment links settled by cross-chain OFT transfers over LayerZero.
//!
//! The entry point is [`SendOrchestrator`], which runs a [`SendRequest`]
//! against the chains of an injected [`ChainRegistry`] through a
//! [`rpc::Connector`]. [`checkout::pay_link`] wraps it for stored
//! [`payment_link::PaymentLink`]s.

pub mod abi;
pub mod address;
pub mod amount;
pub mod balance;
pub mod chain;
pub mod checkout;
pub mod config;
pub mod contracts;
pub mod error;
pub mod options;
pub mod orchestrator;
pub mod payment_link;
pub mod rpc;
pub mod testing;

use std::sync::Arc;

// Re-exports for convenience
pub use address::Address;
pub use chain::{ChainEndpoint, ChainEntry, ChainRegistry, TokenBinding};
pub use error::Error;
pub use options::{ExecutorOption, OptionsBuilder};
pub use orchestrator::{SendOrchestrator, SendReceipt, SendRequest, SendResult, SendStage};

/// Run one send with default settings and flatten the outcome.
pub async fn send(
    registry: Arc<ChainRegistry>,
    connector: Arc<dyn rpc::Connector>,
    request: &SendRequest,
) -> SendResult {
    SendOrchestrator::new(registry, connector).execute(request).await
}

/// Quote a send without approving or submitting anything.
pub async fn quote(
    registry: Arc<ChainRegistry>,
    connector: Arc<dyn rpc::Connector>,
    request: &SendRequest,
) -> Result<contracts::FeeQuote, Error> {
    SendOrchestrator::new(registry, connector).quote(request).await
}
