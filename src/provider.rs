// Host-facing credentials provider

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::auth::{
    CredentialBundle, CredentialManager, CredentialState, RefreshOutcome, RefreshPolicy,
    StsCommand,
};
use crate::error::Result;

/// What the hosting system sees of a credential source
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    /// Current credentials; never refreshes as a side effect
    fn get_credentials(&self) -> Result<Arc<CredentialBundle>>;

    /// Ask for new credentials, subject to the refresh cooldown
    async fn refresh_credentials(&self) -> Result<RefreshOutcome>;

    /// True when fewer than `threshold_secs` seconds of validity remain
    fn is_token_expiring_soon(&self, threshold_secs: i64) -> bool;

    /// Session token of the current credentials
    fn session_token(&self) -> Result<String> {
        Ok(self.get_credentials()?.session_token().to_string())
    }
}

/// Provider bound to one configured STS command
pub struct DynamicSessionProvider {
    command: StsCommand,
    manager: CredentialManager,
}

impl DynamicSessionProvider {
    pub fn new(command: StsCommand, manager: CredentialManager) -> Self {
        Self { command, manager }
    }

    /// Build a subprocess-backed provider and run the first acquisition.
    /// Fails if that acquisition fails, since there is nothing to fall back on.
    pub async fn connect(command: StsCommand, policy: RefreshPolicy) -> Result<Self> {
        let provider = Self::new(command, CredentialManager::new(policy));
        provider.initialize().await?;
        Ok(provider)
    }

    pub async fn initialize(&self) -> Result<Arc<CredentialBundle>> {
        self.manager.initialize(&self.command).await
    }

    pub fn command(&self) -> &StsCommand {
        &self.command
    }

    pub fn manager(&self) -> &CredentialManager {
        &self.manager
    }

    pub fn state(&self) -> CredentialState {
        self.manager.state()
    }
}

#[async_trait]
impl CredentialsProvider for DynamicSessionProvider {
    fn get_credentials(&self) -> Result<Arc<CredentialBundle>> {
        self.manager.get_credentials()
    }

    async fn refresh_credentials(&self) -> Result<RefreshOutcome> {
        self.manager.refresh(&self.command).await
    }

    fn is_token_expiring_soon(&self, threshold_secs: i64) -> bool {
        self.manager.is_expiring_soon(threshold_secs)
    }
}

impl fmt::Display for DynamicSessionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DynamicSessionProvider[program={}]", self.command.program())
    }
}
