//! # Dispenser
//!
//! Issuance flow driven by the chat transport. The transport maps incoming
//! commands to these calls and renders the returned outcome; purchase
//! sessions live here, keyed by user id, and never reach the inventory.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::dao::key_record::KeyPool;
use crate::error::InventoryError;
use crate::inventory::{InventoryStats, KeyInventory};
use crate::logger::ISSUANCE_TARGET;

/// A payment receipt must carry a check link of this form.
pub const RECEIPT_MARKER: &str = "t.me/send?start=";

/// Who is asking, as reported by the chat transport
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRef {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl UserRef {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn handle(&self) -> String {
        match &self.username {
            Some(name) => format!("@{}", name),
            None => "-".to_string(),
        }
    }

    pub fn full_name(&self) -> String {
        let first = self.first_name.as_deref().unwrap_or_default();
        let last = self.last_name.as_deref().unwrap_or_default();
        format!("{} {}", first, last).trim().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    Issued(String),
    OutOfKeys,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// User has no open purchase; the message is not for us.
    NoSession,
    InvalidReceipt,
    Issued(String),
    OutOfKeys,
    Failed,
}

pub struct Dispenser {
    inventory: Arc<KeyInventory>,
    // users who asked to buy and whose receipt is still awaited
    awaiting_payment: RwLock<HashSet<i64>>,
}

impl Dispenser {
    pub fn new(inventory: Arc<KeyInventory>) -> Self {
        Self {
            inventory,
            awaiting_payment: RwLock::new(HashSet::new()),
        }
    }

    pub fn inventory(&self) -> &Arc<KeyInventory> {
        &self.inventory
    }

    pub async fn request_trial(&self, user: &UserRef) -> Issue {
        match self.inventory.try_take(KeyPool::Trial).await {
            Ok(key) => {
                info!(
                    target: ISSUANCE_TARGET,
                    pool = %KeyPool::Trial,
                    user_id = user.id,
                    username = %user.handle(),
                    full_name = %user.full_name(),
                    "Trial key issued"
                );
                Issue::Issued(key)
            }
            Err(InventoryError::PoolExhausted(_)) => {
                warn!(user_id = user.id, "Trial requested but no trial keys left");
                Issue::OutOfKeys
            }
            Err(e) => {
                error!(user_id = user.id, error = %e, "Failed to issue trial key");
                Issue::Failed
            }
        }
    }

    /// Open a purchase for `user_id`, replacing any previous one.
    pub async fn begin_purchase(&self, user_id: i64) {
        self.awaiting_payment.write().await.insert(user_id);
        info!(user_id, "Purchase started, awaiting payment receipt");
    }

    pub async fn cancel_purchase(&self, user_id: i64) -> bool {
        self.awaiting_payment.write().await.remove(&user_id)
    }

    pub async fn has_pending_purchase(&self, user_id: i64) -> bool {
        self.awaiting_payment.read().await.contains(&user_id)
    }

    /// Handle free text from a user. The session is consumed by every outcome except `NoSession`.
    pub async fn submit_payment(&self, user: &UserRef, text: &str) -> PaymentOutcome {
        if !self.awaiting_payment.write().await.remove(&user.id) {
            return PaymentOutcome::NoSession;
        }

        if !text.contains(RECEIPT_MARKER) {
            warn!(user_id = user.id, "Payment message without a receipt link");
            return PaymentOutcome::InvalidReceipt;
        }

        match self.inventory.try_take(KeyPool::Paid).await {
            Ok(key) => {
                info!(
                    target: ISSUANCE_TARGET,
                    pool = %KeyPool::Paid,
                    user_id = user.id,
                    username = %user.handle(),
                    full_name = %user.full_name(),
                    receipt = %text.trim(),
                    "Paid key issued"
                );
                PaymentOutcome::Issued(key)
            }
            Err(InventoryError::PoolExhausted(_)) => {
                warn!(user_id = user.id, "Payment received but no paid keys left");
                PaymentOutcome::OutOfKeys
            }
            Err(e) => {
                error!(user_id = user.id, error = %e, "Failed to issue paid key");
                PaymentOutcome::Failed
            }
        }
    }

    pub async fn stats(&self) -> Option<InventoryStats> {
        self.inventory.stats().await
    }

    /// Drop open sessions and release storage.
    pub async fn shutdown(&self) {
        let pending = {
            let mut awaiting = self.awaiting_payment.write().await;
            let n = awaiting.len();
            awaiting.clear();
            n
        };
        if pending > 0 {
            info!(pending, "Discarded open purchase sessions");
        }
        self.inventory.close().await;
    }
}

/// Hand a key to an operator outside the chat flow. Exhaustion and storage failure stay distinct.
pub async fn issue_to_operator(inventory: &KeyInventory, pool: KeyPool) -> Result<String, InventoryError> {
    let key = inventory.try_take(pool).await?;
    info!(
        target: ISSUANCE_TARGET,
        pool = %pool,
        issued_by = "operator",
        "Key issued manually"
    );
    Ok(key)
}
