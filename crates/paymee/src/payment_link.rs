//! Payment links: the record a payer settles, and where links are kept.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::abi::U256;
use crate::address::Address;
use crate::amount::parse_units;
use crate::error::Error;

/// Precision accepted for link amounts.
const LINK_DECIMALS: u8 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Expired,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Expired => "expired",
        })
    }
}

/// A request for payment that can be shared as a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLink {
    pub id: Uuid,
    /// Human decimal amount, e.g. `"0.01"`.
    pub amount: String,
    pub concept: String,
    pub client_name: String,
    pub recipient_address: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
    pub status: PaymentStatus,
}

impl PaymentLink {
    /// A new pending link with a fresh id.
    pub fn new(
        amount: impl Into<String>,
        concept: impl Into<String>,
        client_name: impl Into<String>,
        recipient: &str,
    ) -> Result<Self, Error> {
        let amount = amount.into().trim().to_string();
        if parse_units(&amount, LINK_DECIMALS)? == U256::default() {
            return Err(Error::InvalidAmountFormat("amount must be greater than zero".to_string()));
        }
        let recipient = Address::parse(recipient.trim())?;
        let created_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| Error::Store(format!("cannot format timestamp: {e}")))?;

        Ok(Self {
            id: Uuid::new_v4(),
            amount,
            concept: concept.into(),
            client_name: client_name.into(),
            recipient_address: recipient.to_checksum(),
            created_at,
            status: PaymentStatus::Pending,
        })
    }

    /// Shareable URL under `origin`, e.g. `https://paymee.app/pay/{id}`.
    pub fn pay_url(&self, origin: &str) -> String {
        format!("{}/pay/{}", origin.trim_end_matches('/'), self.id)
    }

    pub fn is_payable(&self) -> bool {
        self.status == PaymentStatus::Pending
    }
}

/// Moves a link to paid. Paying twice is a no-op; expired links refuse.
fn settle(link: &mut PaymentLink) -> Result<(), Error> {
    match link.status {
        PaymentStatus::Pending => {
            link.status = PaymentStatus::Paid;
            Ok(())
        }
        PaymentStatus::Paid => Ok(()),
        PaymentStatus::Expired => Err(Error::LinkNotPayable {
            id: link.id,
            status: link.status.to_string(),
        }),
    }
}

/// Where payment links live. The send flow only reads a link and marks it
/// paid; creation and listing serve the surrounding application.
#[async_trait]
pub trait PaymentLinkStore: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<PaymentLink, Error>;

    async fn mark_paid(&self, id: Uuid) -> Result<(), Error>;

    async fn insert(&self, link: PaymentLink) -> Result<(), Error>;

    async fn list(&self) -> Result<Vec<PaymentLink>, Error>;
}

/// Links held in memory, in insertion order.
#[derive(Debug, Default)]
pub struct MemoryLinkStore {
    links: RwLock<Vec<PaymentLink>>,
}

impl MemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentLinkStore for MemoryLinkStore {
    async fn get_by_id(&self, id: Uuid) -> Result<PaymentLink, Error> {
        self.links
            .read()
            .await
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .ok_or(Error::NotFound(id))
    }

    async fn mark_paid(&self, id: Uuid) -> Result<(), Error> {
        let mut links = self.links.write().await;
        let link = links.iter_mut().find(|l| l.id == id).ok_or(Error::NotFound(id))?;
        settle(link)
    }

    async fn insert(&self, link: PaymentLink) -> Result<(), Error> {
        let mut links = self.links.write().await;
        if links.iter().any(|l| l.id == link.id) {
            return Err(Error::Store(format!("payment link {} already exists", link.id)));
        }
        links.push(link);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<PaymentLink>, Error> {
        Ok(self.links.read().await.clone())
    }
}

/// Links kept as a JSON array in a single file.
///
/// Every operation reads the whole file; writes go through a temporary file
/// and a rename. A missing file is an empty store.
#[derive(Debug)]
pub struct JsonFileLinkStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileLinkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<PaymentLink>, Error> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Store(format!("cannot read {}: {e}", self.path.display()))),
        };
        serde_json::from_slice(&raw)
            .map_err(|e| Error::Store(format!("corrupt link file {}: {e}", self.path.display())))
    }

    async fn save(&self, links: &[PaymentLink]) -> Result<(), Error> {
        let json = serde_json::to_vec_pretty(links)
            .map_err(|e| Error::Store(format!("cannot serialize links: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Error::Store(format!("cannot write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Store(format!("cannot replace {}: {e}", self.path.display())))?;
        debug!(path = %self.path.display(), count = links.len(), "link file saved");
        Ok(())
    }
}

#[async_trait]
impl PaymentLinkStore for JsonFileLinkStore {
    async fn get_by_id(&self, id: Uuid) -> Result<PaymentLink, Error> {
        let _guard = self.lock.lock().await;
        self.load()
            .await?
            .into_iter()
            .find(|l| l.id == id)
            .ok_or(Error::NotFound(id))
    }

    async fn mark_paid(&self, id: Uuid) -> Result<(), Error> {
        let _guard = self.lock.lock().await;
        let mut links = self.load().await?;
        let link = links.iter_mut().find(|l| l.id == id).ok_or(Error::NotFound(id))?;
        if link.status == PaymentStatus::Paid {
            return Ok(());
        }
        settle(link)?;
        self.save(&links).await
    }

    async fn insert(&self, link: PaymentLink) -> Result<(), Error> {
        let _guard = self.lock.lock().await;
        let mut links = self.load().await?;
        if links.iter().any(|l| l.id == link.id) {
            return Err(Error::Store(format!("payment link {} already exists", link.id)));
        }
        links.push(link);
        self.save(&links).await
    }

    async fn list(&self) -> Result<Vec<PaymentLink>, Error> {
        let _guard = self.lock.lock().await;
        self.load().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECIPIENT: &str = "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1";

    fn link() -> PaymentLink {
        PaymentLink::new("0.01", "Design work", "Acme", RECIPIENT).unwrap()
    }

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("paymee-links-{}.json", Uuid::new_v4()))
    }

    #[test]
    fn test_new_link_is_pending_and_normalized() {
        let link = link();
        assert_eq!(link.status, PaymentStatus::Pending);
        assert_eq!(link.recipient_address, "0x90F8bf6A479f320ead074411a4B0e7944Ea8c9C1");
        assert!(OffsetDateTime::parse(&link.created_at, &Rfc3339).is_ok());
    }

    #[test]
    fn test_new_link_validation() {
        assert!(matches!(
            PaymentLink::new("abc", "x", "y", RECIPIENT),
            Err(Error::InvalidAmountFormat(_))
        ));
        assert!(matches!(
            PaymentLink::new("0", "x", "y", RECIPIENT),
            Err(Error::InvalidAmountFormat(_))
        ));
        assert!(matches!(
            PaymentLink::new("1", "x", "y", "0x1234"),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_serde_field_names() {
        let link = link();
        let json = serde_json::to_value(&link).unwrap();
        assert_eq!(json["clientName"], "Acme");
        assert_eq!(json["recipientAddress"], link.recipient_address);
        assert_eq!(json["status"], "pending");
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn test_pay_url() {
        let link = link();
        assert_eq!(
            link.pay_url("https://paymee.app/"),
            format!("https://paymee.app/pay/{}", link.id)
        );
    }

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = MemoryLinkStore::new();
        let link = link();
        store.insert(link.clone()).await.unwrap();
        assert!(matches!(store.insert(link.clone()).await, Err(Error::Store(_))));

        assert_eq!(store.get_by_id(link.id).await.unwrap(), link);
        store.mark_paid(link.id).await.unwrap();
        store.mark_paid(link.id).await.unwrap();
        assert_eq!(store.get_by_id(link.id).await.unwrap().status, PaymentStatus::Paid);

        let missing = Uuid::new_v4();
        assert!(matches!(
            store.get_by_id(missing).await,
            Err(Error::NotFound(id)) if id == missing
        ));
        assert!(matches!(store.mark_paid(missing).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_expired_link_cannot_be_paid() {
        let store = MemoryLinkStore::new();
        let mut link = link();
        link.status = PaymentStatus::Expired;
        store.insert(link.clone()).await.unwrap();
        assert!(matches!(
            store.mark_paid(link.id).await,
            Err(Error::LinkNotPayable { .. })
        ));
    }

    #[tokio::test]
    async fn test_json_file_store_persists() {
        let path = temp_path();
        let first = link();
        let second = link();
        {
            let store = JsonFileLinkStore::new(&path);
            assert!(store.list().await.unwrap().is_empty());
            store.insert(first.clone()).await.unwrap();
            store.insert(second.clone()).await.unwrap();
            store.mark_paid(first.id).await.unwrap();
        }

        let reopened = JsonFileLinkStore::new(&path);
        let links = reopened.list().await.unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].status, PaymentStatus::Paid);
        assert_eq!(links[1], second);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"clientName\""));
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_json_file_store_rejects_corrupt_file() {
        let path = temp_path();
        std::fs::write(&path, b"not json").unwrap();
        let store = JsonFileLinkStore::new(&path);
        assert!(matches!(store.list().await, Err(Error::Store(_))));
        std::fs::remove_file(&path).unwrap();
    }
}
