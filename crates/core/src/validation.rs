use std::{fmt, str::FromStr};

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::ExpenseDraft;

const MAX_PURPOSE_LEN: usize = 500;

/// Raw expense form input as posted by the browser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExpenseForm {
    pub submitter_email: String,
    pub purpose: String,
    pub amount: String,
}

impl ExpenseForm {
    /// Checks every field and returns the validated draft, or all problems found.
    pub fn validate(&self) -> Result<ExpenseDraft, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let submitter_email = self.submitter_email.trim();
        if submitter_email.is_empty() {
            errors.push("submitterEmail", "Submitter email is required.");
        } else if !looks_like_email(submitter_email) {
            errors.push("submitterEmail", "Submitter email is not a valid email address.");
        }

        let purpose = self.purpose.trim();
        if purpose.is_empty() {
            errors.push("purpose", "Purpose is required.");
        } else if purpose.chars().count() > MAX_PURPOSE_LEN {
            errors.push(
                "purpose",
                format!("Purpose must be at most {MAX_PURPOSE_LEN} characters."),
            );
        }

        let amount = match parse_amount(&self.amount) {
            Ok(amount) => Some(amount),
            Err(message) => {
                errors.push("amount", message);
                None
            }
        };

        match amount {
            Some(amount) if errors.is_empty() => Ok(ExpenseDraft {
                submitter_email: submitter_email.to_string(),
                purpose: purpose.to_string(),
                amount,
            }),
            _ => Err(errors),
        }
    }
}

fn parse_amount(raw: &str) -> Result<Decimal, &'static str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("Amount is required.");
    }
    let amount = Decimal::from_str(trimmed).map_err(|_| "Amount must be a number.")?;
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err("Amount must not be negative.");
    }
    Ok(amount)
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Collection of validation failures for one submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }

    /// Returns the messages attached to `field`.
    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.errors
            .iter()
            .filter(move |error| error.field == field)
            .map(|error| error.message.as_str())
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in &self.errors {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", error.field, error.message)?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(email: &str, purpose: &str, amount: &str) -> ExpenseForm {
        ExpenseForm {
            submitter_email: email.into(),
            purpose: purpose.into(),
            amount: amount.into(),
        }
    }

    #[test]
    fn accepts_valid_input_and_trims() {
        let draft = form("  a@x.com ", " travel ", "42.50")
            .validate()
            .expect("valid form");
        assert_eq!(draft.submitter_email, "a@x.com");
        assert_eq!(draft.purpose, "travel");
        assert_eq!(draft.amount.to_string(), "42.50");
    }

    #[test]
    fn accepts_zero_amount() {
        let draft = form("a@x.com", "coffee", "0").validate().expect("zero is allowed");
        assert!(draft.amount.is_zero());
    }

    #[test]
    fn rejects_empty_submitter() {
        let errors = form("", "travel", "10").validate().expect_err("missing email");
        assert_eq!(
            errors.for_field("submitterEmail").collect::<Vec<_>>(),
            vec!["Submitter email is required."]
        );
    }

    #[test]
    fn rejects_negative_amount() {
        let errors = form("a@x.com", "travel", "-1.00")
            .validate()
            .expect_err("negative amount");
        assert_eq!(
            errors.for_field("amount").collect::<Vec<_>>(),
            vec!["Amount must not be negative."]
        );
    }

    #[test]
    fn reports_every_invalid_field() {
        let errors = form("not-an-email", "", "ten").validate().expect_err("invalid");
        let fields: Vec<_> = errors.iter().map(|error| error.field).collect();
        assert_eq!(fields, vec!["submitterEmail", "purpose", "amount"]);
        assert!(errors.to_string().contains("amount: Amount must be a number."));
    }
}
