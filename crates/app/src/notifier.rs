use std::sync::Arc;

use futures::StreamExt;
use metrics::counter;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use contoso_expenses_core::ports::{BoxError, Mailer};
use contoso_expenses_core::{Expense, OutboundEmail};
use contoso_expenses_storage::{Delivery, QueueConsumer};

/// Turns expenses into approval emails.
#[derive(Clone)]
pub struct EmailNotifier {
    mailer: Arc<dyn Mailer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    /// The lookup never resolved an approver, so there is nobody to mail.
    NoApprover,
}

impl EmailNotifier {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    pub async fn notify(&self, expense: &Expense) -> Result<NotifyOutcome, NotifyError> {
        if expense.has_unknown_approver() {
            warn!(
                stage = "notifier",
                expense_id = %expense.id,
                submitter_email = %expense.submitter_email,
                "expense has no approver; skipping email"
            );
            return Ok(NotifyOutcome::NoApprover);
        }

        let email = OutboundEmail::approval_request(expense);
        self.mailer.send(&email).await.map_err(NotifyError::Send)?;
        info!(
            stage = "notifier",
            expense_id = %expense.id,
            to = %email.to,
            subject = %email.subject,
            "approval email sent"
        );
        Ok(NotifyOutcome::Sent)
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to send email: {0}")]
    Send(BoxError),
}

/// What happened to a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acknowledged,
    /// Left on the queue; it becomes visible again after the visibility timeout.
    Retained,
}

/// Long-running consumer that feeds queued expenses to an [`EmailNotifier`].
pub struct NotifierWorker {
    consumer: QueueConsumer,
    notifier: EmailNotifier,
    concurrency: usize,
}

impl NotifierWorker {
    pub fn new(consumer: QueueConsumer, notifier: EmailNotifier, concurrency: usize) -> Self {
        Self {
            consumer,
            notifier,
            concurrency: concurrency.max(1),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Consumes the queue until the task is cancelled.
    pub async fn run(self) {
        info!(
            stage = "notifier",
            queue = %self.consumer.queue_name(),
            concurrency = self.concurrency,
            "notifier started"
        );
        let worker = &self;
        self.consumer
            .stream()
            .for_each_concurrent(self.concurrency, |item| async move {
                match item {
                    Ok(delivery) => {
                        worker.handle_delivery(delivery).await;
                    }
                    Err(err) => {
                        error!(stage = "notifier", error = %err, "failed to receive from queue");
                    }
                }
            })
            .await;
    }

    /// Processes one delivery and acknowledges it only if it was handled.
    pub async fn handle_delivery(&self, delivery: Delivery) -> DeliveryOutcome {
        let expense: Expense = match delivery.json() {
            Ok(expense) => expense,
            Err(err) => {
                counter!("notifier_messages_total", "result" => "undecodable").increment(1);
                warn!(
                    stage = "notifier",
                    message_id = %delivery.message_id,
                    dequeue_count = delivery.dequeue_count,
                    error = %err,
                    "queued message is not an expense"
                );
                return DeliveryOutcome::Retained;
            }
        };

        let result = match self.notifier.notify(&expense).await {
            Ok(NotifyOutcome::Sent) => "sent",
            Ok(NotifyOutcome::NoApprover) => "skipped",
            Err(err) => {
                counter!("notifier_messages_total", "result" => "failed").increment(1);
                warn!(
                    stage = "notifier",
                    message_id = %delivery.message_id,
                    expense_id = %expense.id,
                    dequeue_count = delivery.dequeue_count,
                    error = %err,
                    "notification failed; message will be redelivered"
                );
                return DeliveryOutcome::Retained;
            }
        };

        if let Err(err) = self.consumer.ack(&delivery).await {
            counter!("notifier_messages_total", "result" => "ack_failed").increment(1);
            warn!(
                stage = "notifier",
                message_id = %delivery.message_id,
                expense_id = %expense.id,
                error = %err,
                "failed to acknowledge message"
            );
            return DeliveryOutcome::Retained;
        }

        counter!("notifier_messages_total", "result" => result).increment(1);
        DeliveryOutcome::Acknowledged
    }
}
