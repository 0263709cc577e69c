use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placeholder stored when the approver or cost center cannot be resolved.
pub const UNKNOWN: &str = "Unknown";

/// Expense report as persisted and placed on the notification queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: Uuid,
    pub submitter_email: String,
    pub approver_email: String,
    pub purpose: String,
    pub amount: Decimal,
    pub cost_center: String,
    pub submitted_at: DateTime<Utc>,
}

impl Expense {
    /// Builds a new expense from validated input and the directory entry, if any.
    ///
    /// Approver and cost center fall back to [`UNKNOWN`] so a stored expense
    /// never lacks either value.
    pub fn from_draft(
        draft: ExpenseDraft,
        cost_center: Option<CostCenterRecord>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        let (approver_email, cost_center) = match cost_center {
            Some(record) => (record.approver_email, record.cost_center_name),
            None => (UNKNOWN.to_string(), UNKNOWN.to_string()),
        };
        Self {
            id: Uuid::new_v4(),
            submitter_email: draft.submitter_email,
            approver_email,
            purpose: draft.purpose,
            amount: draft.amount,
            cost_center,
            submitted_at,
        }
    }

    /// Returns `true` when the approver lookup did not resolve a real address.
    pub fn has_unknown_approver(&self) -> bool {
        self.approver_email == UNKNOWN
    }
}

/// Validated submission input, prior to the cost-center lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpenseDraft {
    pub submitter_email: String,
    pub purpose: String,
    pub amount: Decimal,
}

/// Directory entry mapping a submitter to their approver and cost center.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostCenterRecord {
    pub submitter_email: String,
    pub approver_email: String,
    pub cost_center_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn draft() -> ExpenseDraft {
        ExpenseDraft {
            submitter_email: "a@x.com".into(),
            purpose: "travel".into(),
            amount: Decimal::from_str("42.50").expect("decimal"),
        }
    }

    #[test]
    fn from_draft_uses_directory_entry() {
        let record = CostCenterRecord {
            submitter_email: "a@x.com".into(),
            approver_email: "b@x.com".into(),
            cost_center_name: "Eng".into(),
        };
        let expense = Expense::from_draft(draft(), Some(record), Utc::now());
        assert_eq!(expense.approver_email, "b@x.com");
        assert_eq!(expense.cost_center, "Eng");
        assert!(!expense.has_unknown_approver());
    }

    #[test]
    fn from_draft_defaults_to_unknown() {
        let expense = Expense::from_draft(draft(), None, Utc::now());
        assert_eq!(expense.approver_email, UNKNOWN);
        assert_eq!(expense.cost_center, UNKNOWN);
        assert!(expense.has_unknown_approver());
    }

    #[test]
    fn expense_serializes_with_camel_case_and_exact_amount() {
        let submitted_at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        let expense = Expense::from_draft(draft(), None, submitted_at);
        let value = serde_json::to_value(&expense).expect("serialize");
        assert_eq!(value["submitterEmail"], json!("a@x.com"));
        assert_eq!(value["costCenter"], json!("Unknown"));
        assert_eq!(value["amount"], json!("42.50"));
        assert_eq!(value["submittedAt"], json!("2024-05-01T12:00:00Z"));

        let decoded: Expense = serde_json::from_value(value).expect("deserialize");
        assert_eq!(decoded, expense);
    }

    #[test]
    fn cost_center_record_reads_api_shape() {
        let record: CostCenterRecord = serde_json::from_value(json!({
            "submitterEmail": "a@x.com",
            "approverEmail": "b@x.com",
            "costCenterName": "Eng"
        }))
        .expect("deserialize");
        assert_eq!(record.cost_center_name, "Eng");
    }
}
