// STS Session Provider - library root

pub mod auth;
pub mod config;
pub mod error;
pub mod provider;

pub use auth::{CredentialBundle, CredentialManager, RefreshOutcome, RefreshPolicy, StsCommand};
pub use error::{CredentialError, Result};
pub use provider::{CredentialsProvider, DynamicSessionProvider};
