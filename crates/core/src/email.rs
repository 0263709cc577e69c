use crate::types::Expense;

/// Approval request email derived from a submitted expense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub html_body: String,
}

impl OutboundEmail {
    /// Formats the notification sent to the approver of `expense`.
    pub fn approval_request(expense: &Expense) -> Self {
        let subject = format!(
            "New Expense for the amount of ${} submitted",
            expense.amount
        );
        let html_body = format!(
            "Hello {approver}, <br/> New Expense report submitted for the purpose of: {purpose}. \
             <br/> Please review as soon as possible. <br/> <br/> <br/> \
             This is an automatically generated email, please do not reply to this email",
            approver = escape_html(&expense.approver_email),
            purpose = escape_html(&expense.purpose),
        );

        Self {
            to: expense.approver_email.clone(),
            from: expense.submitter_email.clone(),
            subject,
            html_body,
        }
    }
}

/// Escapes the characters that are significant in HTML text and attribute values.
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
