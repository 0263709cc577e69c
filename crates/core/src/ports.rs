//! Seams between the submission workflow, the notifier and their collaborators.

use async_trait::async_trait;

use crate::email::OutboundEmail;
use crate::types::{CostCenterRecord, Expense};

/// Error type returned by collaborator implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Resolves the approver and cost center for a submitter.
///
/// Implementations swallow transport failures: any problem is reported as a
/// miss (`None`) after being logged.
#[async_trait]
pub trait CostCenterLookup: Send + Sync {
    async fn lookup(&self, submitter_email: &str) -> Option<CostCenterRecord>;
}

/// Durable storage for submitted expenses.
#[async_trait]
pub trait ExpenseStore: Send + Sync {
    async fn insert(&self, expense: &Expense) -> Result<(), BoxError>;
}

/// Producer side of the notification queue.
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    /// Enqueues a copy of `expense`, returning the queue message id.
    async fn publish(&self, expense: &Expense) -> Result<String, BoxError>;
}

/// Outbound mail transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), BoxError>;
}
