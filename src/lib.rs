// Zoho CRM relay - library root for testing

pub mod auth;
pub mod config;
pub mod crm;
pub mod error;
pub mod middleware;
pub mod partner;
pub mod routes;
