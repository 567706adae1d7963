//! Settling a payment link with a cross-chain send.

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::orchestrator::{SendOrchestrator, SendReceipt, SendRequest};
use crate::payment_link::PaymentLinkStore;

/// Chains a payment travels between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentRoute {
    pub source_eid: u32,
    pub destination_eid: u32,
}

impl PaymentRoute {
    pub fn new(source_eid: u32, destination_eid: u32) -> Self {
        Self {
            source_eid,
            destination_eid,
        }
    }
}

impl Default for PaymentRoute {
    /// Ethereum Sepolia to Optimism Sepolia.
    fn default() -> Self {
        Self::new(40161, 11155420)
    }
}

/// Pay link `id` over `route`; the link is marked paid only once the send
/// is committed on the source chain.
///
/// If the store then fails to record the payment, the error is
/// [`Error::PaymentNotRecorded`], carrying the committed transaction hash.
pub async fn pay_link(
    store: &dyn PaymentLinkStore,
    orchestrator: &SendOrchestrator,
    id: Uuid,
    route: PaymentRoute,
) -> Result<SendReceipt, Error> {
    let link = store.get_by_id(id).await?;
    if !link.is_payable() {
        return Err(Error::LinkNotPayable {
            id,
            status: link.status.to_string(),
        });
    }

    let request = SendRequest::new(
        route.source_eid,
        route.destination_eid,
        link.amount.clone(),
        link.recipient_address.clone(),
    );
    let receipt = orchestrator.send(&request).await?;

    if let Err(e) = store.mark_paid(id).await {
        warn!(
            %id,
            tx = %receipt.transaction_hash,
            error = %e,
            "send committed but link not marked paid"
        );
        return Err(Error::PaymentNotRecorded {
            id,
            tx_hash: receipt.transaction_hash,
            message: e.to_string(),
        });
    }
    info!(%id, tx = %receipt.transaction_hash, "payment link paid");
    Ok(receipt)
}
