pub mod costcenter;
pub mod sendgrid;

pub use costcenter::{CostCenterClient, CostCenterError};
pub use sendgrid::{MailError, SendGridClient};
