use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use contoso_expenses_core::ports::{BoxError, CostCenterLookup, ExpenseStore, NotificationPublisher};
use contoso_expenses_core::{Expense, ExpenseForm, ValidationErrors};
use contoso_expenses_storage::Clock;

/// Steps a submission moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStage {
    Validating,
    LookingUp,
    Persisting,
    Publishing,
    Done,
}

impl SubmissionStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::LookingUp => "looking_up",
            Self::Persisting => "persisting",
            Self::Publishing => "publishing",
            Self::Done => "done",
        }
    }
}

/// Validates, enriches, stores and announces a single expense submission.
#[derive(Clone)]
pub struct ExpenseSubmissionWorkflow {
    lookup: Arc<dyn CostCenterLookup>,
    store: Arc<dyn ExpenseStore>,
    publisher: Arc<dyn NotificationPublisher>,
    clock: Clock,
}

impl ExpenseSubmissionWorkflow {
    pub fn new(
        lookup: Arc<dyn CostCenterLookup>,
        store: Arc<dyn ExpenseStore>,
        publisher: Arc<dyn NotificationPublisher>,
    ) -> Self {
        Self {
            lookup,
            store,
            publisher,
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Runs the submission.
    ///
    /// Invalid input is rejected before any collaborator is called. A failed
    /// lookup stores the expense with unknown approver and cost center. The
    /// store write and the queue publish run concurrently; only a failed write
    /// fails the submission.
    pub async fn submit(&self, form: &ExpenseForm) -> Result<Expense, SubmissionError> {
        trace_stage(SubmissionStage::Validating);
        let draft = form.validate().map_err(|errors| {
            counter!("expense_submissions_total", "result" => "invalid").increment(1);
            info!(stage = "submission", errors = %errors, "expense rejected by validation");
            SubmissionError::Validation(errors)
        })?;

        trace_stage(SubmissionStage::LookingUp);
        let record = self.lookup.lookup(&draft.submitter_email).await;
        let lookup_result = if record.is_some() { "found" } else { "not_found" };
        counter!("cost_center_lookups_total", "result" => lookup_result).increment(1);

        let expense = Expense::from_draft(draft, record, (self.clock)());

        trace_stage(SubmissionStage::Persisting);
        // join! polls in argument order, so the write is issued before the publish.
        let (stored, published) = tokio::join!(
            self.store.insert(&expense),
            async {
                trace_stage(SubmissionStage::Publishing);
                self.publisher.publish(&expense).await
            }
        );

        match published {
            Ok(message_id) => {
                debug!(stage = "submission", expense_id = %expense.id, %message_id, "expense published")
            }
            Err(err) => {
                counter!("queue_publish_failures_total").increment(1);
                warn!(
                    stage = "submission",
                    expense_id = %expense.id,
                    error = %err,
                    "failed to publish expense notification"
                );
            }
        }

        if let Err(err) = stored {
            counter!("expense_submissions_total", "result" => "storage_error").increment(1);
            error!(
                stage = "submission",
                expense_id = %expense.id,
                error = %err,
                "failed to persist expense"
            );
            return Err(SubmissionError::Storage(err));
        }

        trace_stage(SubmissionStage::Done);
        counter!("expense_submissions_total", "result" => "accepted").increment(1);
        info!(
            stage = "submission",
            expense_id = %expense.id,
            submitter_email = %expense.submitter_email,
            approver_email = %expense.approver_email,
            cost_center = %expense.cost_center,
            amount = %expense.amount,
            "expense submitted"
        );
        Ok(expense)
    }
}

fn trace_stage(step: SubmissionStage) {
    debug!(stage = "submission", step = step.as_str(), "submission step");
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("expense failed validation: {0}")]
    Validation(ValidationErrors),
    #[error("failed to store expense: {0}")]
    Storage(BoxError),
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use contoso_expenses_core::CostCenterRecord;

    /// Shared, ordered record of collaborator calls.
    pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

    #[derive(Default)]
    pub struct FakeDirectory {
        pub records: HashMap<String, CostCenterRecord>,
        pub calls: CallLog,
    }

    impl FakeDirectory {
        pub fn with(records: &[(&str, &str, &str)], calls: CallLog) -> Self {
            let records = records
                .iter()
                .map(|(submitter, approver, cost_center)| {
                    (
                        submitter.to_string(),
                        CostCenterRecord {
                            submitter_email: submitter.to_string(),
                            approver_email: approver.to_string(),
                            cost_center_name: cost_center.to_string(),
                        },
                    )
                })
                .collect();
            Self { records, calls }
        }
    }

    #[async_trait]
    impl CostCenterLookup for FakeDirectory {
        async fn lookup(&self, submitter_email: &str) -> Option<CostCenterRecord> {
            self.calls.lock().expect("calls").push("lookup");
            self.records.get(submitter_email).cloned()
        }
    }

    #[derive(Default)]
    pub struct RecordingStore {
        pub fail: bool,
        pub stored: Mutex<Vec<Expense>>,
        pub calls: CallLog,
    }

    #[async_trait]
    impl ExpenseStore for RecordingStore {
        async fn insert(&self, expense: &Expense) -> Result<(), BoxError> {
            self.calls.lock().expect("calls").push("store");
            tokio::task::yield_now().await;
            if self.fail {
                return Err("disk full".into());
            }
            self.stored.lock().expect("stored").push(expense.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct RecordingPublisher {
        pub fail: bool,
        pub published: Mutex<Vec<Expense>>,
        pub calls: CallLog,
    }

    #[async_trait]
    impl NotificationPublisher for RecordingPublisher {
        async fn publish(&self, expense: &Expense) -> Result<String, BoxError> {
            self.calls.lock().expect("calls").push("publish");
            if self.fail {
                return Err("queue unavailable".into());
            }
            self.published.lock().expect("published").push(expense.clone());
            Ok(format!("msg-{}", expense.id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use chrono::{DateTime, Utc};
    use contoso_expenses_core::UNKNOWN;

    struct Harness {
        workflow: ExpenseSubmissionWorkflow,
        store: Arc<RecordingStore>,
        publisher: Arc<RecordingPublisher>,
        calls: CallLog,
    }

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .expect("fixed time")
            .with_timezone(&Utc)
    }

    fn harness(store_fails: bool, publish_fails: bool) -> Harness {
        let calls = CallLog::default();
        let directory = FakeDirectory::with(&[("a@x.com", "b@x.com", "Eng")], calls.clone());
        let store = Arc::new(RecordingStore {
            fail: store_fails,
            calls: calls.clone(),
            ..RecordingStore::default()
        });
        let publisher = Arc::new(RecordingPublisher {
            fail: publish_fails,
            calls: calls.clone(),
            ..RecordingPublisher::default()
        });
        let now = fixed_now();
        let workflow = ExpenseSubmissionWorkflow::new(
            Arc::new(directory),
            store.clone(),
            publisher.clone(),
        )
        .with_clock(Arc::new(move || now));

        Harness {
            workflow,
            store,
            publisher,
            calls,
        }
    }

    fn form(email: &str, purpose: &str, amount: &str) -> ExpenseForm {
        ExpenseForm {
            submitter_email: email.into(),
            purpose: purpose.into(),
            amount: amount.into(),
        }
    }

    #[tokio::test]
    async fn known_submitter_gets_directory_values() {
        let h = harness(false, false);
        let expense = h
            .workflow
            .submit(&form("a@x.com", "travel", "42.50"))
            .await
            .expect("submitted");

        assert_eq!(expense.approver_email, "b@x.com");
        assert_eq!(expense.cost_center, "Eng");
        assert_eq!(expense.amount.to_string(), "42.50");
        assert_eq!(expense.submitted_at, fixed_now());

        let stored = h.store.stored.lock().expect("stored").clone();
        let published = h.publisher.published.lock().expect("published").clone();
        assert_eq!(stored, vec![expense.clone()]);
        assert_eq!(published, vec![expense]);
    }

    #[tokio::test]
    async fn unknown_submitter_gets_sentinels() {
        let h = harness(false, false);
        let expense = h
            .workflow
            .submit(&form("stranger@x.com", "lunch", "12"))
            .await
            .expect("submitted");

        assert_eq!(expense.approver_email, UNKNOWN);
        assert_eq!(expense.cost_center, UNKNOWN);
        assert_eq!(h.store.stored.lock().expect("stored").len(), 1);
    }

    #[tokio::test]
    async fn invalid_input_has_no_side_effects() {
        let h = harness(false, false);
        for input in [form("", "travel", "10"), form("a@x.com", "travel", "-5")] {
            let err = h.workflow.submit(&input).await.expect_err("rejected");
            assert!(matches!(err, SubmissionError::Validation(_)));
        }
        assert!(h.calls.lock().expect("calls").is_empty());
    }

    #[tokio::test]
    async fn write_is_issued_before_publish() {
        let h = harness(false, false);
        h.workflow
            .submit(&form("a@x.com", "travel", "1"))
            .await
            .expect("submitted");
        assert_eq!(
            *h.calls.lock().expect("calls"),
            vec!["lookup", "store", "publish"]
        );
    }

    #[tokio::test]
    async fn publish_failure_still_reports_success() {
        let h = harness(false, true);
        let expense = h
            .workflow
            .submit(&form("a@x.com", "travel", "1"))
            .await
            .expect("submission succeeds despite publish failure");
        assert_eq!(*h.store.stored.lock().expect("stored"), vec![expense]);
        assert!(h.publisher.published.lock().expect("published").is_empty());
    }

    #[tokio::test]
    async fn storage_failure_fails_submission_after_both_attempts() {
        let h = harness(true, false);
        let err = h
            .workflow
            .submit(&form("a@x.com", "travel", "1"))
            .await
            .expect_err("storage failure");
        assert!(matches!(err, SubmissionError::Storage(_)));
        assert!(err.to_string().contains("disk full"));
        assert_eq!(
            *h.calls.lock().expect("calls"),
            vec!["lookup", "store", "publish"]
        );
    }
}
