//! Domain types shared by the web front end, the lookup API and the notifier.

pub mod email;
pub mod ports;
pub mod types;
pub mod validation;

pub use email::OutboundEmail;
pub use types::{CostCenterRecord, Expense, ExpenseDraft, UNKNOWN};
pub use validation::{ExpenseForm, FieldError, ValidationErrors};
