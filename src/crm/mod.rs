// Zoho CRM integration
// Record creation, field metadata, attachments, and form normalization

mod client;
mod error;
pub mod records;

pub use client::CrmClient;
pub use error::CrmError;
