// Credential types

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{CredentialError, Result};

/// Variable carrying the access key id in the command output
pub const ACCESS_KEY_VAR: &str = "ACCESS_KEY";
/// Variable carrying the secret access key in the command output
pub const SECRET_KEY_VAR: &str = "SECRET_KEY";
/// Variable carrying the session token in the command output
pub const SESSION_TOKEN_VAR: &str = "SESSION_TOKEN";

/// Default validity of a freshly issued bundle (5 minutes)
pub const DEFAULT_LIFETIME_SECS: i64 = 5 * 60;
/// Default renew-early margin
pub const DEFAULT_RENEW_EARLY_SECS: i64 = 90;
/// Longest accepted lifetime (7 days); session tokens never live longer
pub const MAX_LIFETIME_SECS: i64 = 7 * 24 * 60 * 60;

/// Session-based credential triple
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct SessionCredentials {
    pub access_key_id: String,
    pub secret_key: String,
    pub session_token: String,
}

impl SessionCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_key: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_key: secret_key.into(),
            session_token: session_token.into(),
        }
    }

    /// Build credentials from parsed `export` declarations.
    /// Every required variable that is absent is reported at once.
    pub fn from_exports(exports: &HashMap<String, String>) -> Result<Self> {
        let missing: Vec<&'static str> = [ACCESS_KEY_VAR, SECRET_KEY_VAR, SESSION_TOKEN_VAR]
            .into_iter()
            .filter(|name| !exports.contains_key(*name))
            .collect();

        if !missing.is_empty() {
            return Err(CredentialError::AcquisitionIncomplete { missing });
        }

        Ok(Self::new(
            exports[ACCESS_KEY_VAR].clone(),
            exports[SECRET_KEY_VAR].clone(),
            exports[SESSION_TOKEN_VAR].clone(),
        ))
    }
}

// Secrets never end up in logs
impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_key", &"***")
            .field("session_token", &"***")
            .finish()
    }
}

/// Immutable snapshot of credentials plus the instant they were issued.
/// Published as a whole, so readers never see a token paired with another
/// bundle's timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialBundle {
    #[serde(flatten)]
    pub credentials: SessionCredentials,
    /// Seconds since the Unix epoch
    pub issued_at: i64,
}

impl CredentialBundle {
    pub fn new(credentials: SessionCredentials, issued_at: i64) -> Self {
        Self {
            credentials,
            issued_at,
        }
    }

    pub fn access_key_id(&self) -> &str {
        &self.credentials.access_key_id
    }

    pub fn secret_key(&self) -> &str {
        &self.credentials.secret_key
    }

    pub fn session_token(&self) -> &str {
        &self.credentials.session_token
    }

    /// Issuance instant as a calendar time, for logs
    pub fn issued_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.issued_at, 0).single()
    }

    /// Render as `export NAME=VALUE` lines, the same shape the STS command emits
    pub fn to_export_lines(&self) -> String {
        format!(
            "export {}={}\nexport {}={}\nexport {}={}\n",
            ACCESS_KEY_VAR,
            self.credentials.access_key_id,
            SECRET_KEY_VAR,
            self.credentials.secret_key,
            SESSION_TOKEN_VAR,
            self.credentials.session_token,
        )
    }
}

/// Validity window and renew-early margin, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    lifetime: i64,
    renew_early: i64,
}

impl RefreshPolicy {
    pub fn new(lifetime_secs: i64, renew_early_secs: i64) -> Result<Self> {
        if lifetime_secs <= 0 || lifetime_secs > MAX_LIFETIME_SECS {
            return Err(CredentialError::InvalidPolicy(format!(
                "lifetime must be within 1..={}s, got {}s",
                MAX_LIFETIME_SECS, lifetime_secs
            )));
        }
        if renew_early_secs < 0 || renew_early_secs > lifetime_secs {
            return Err(CredentialError::InvalidPolicy(format!(
                "renew-early margin must be within 0..={}s, got {}s",
                lifetime_secs, renew_early_secs
            )));
        }

        Ok(Self {
            lifetime: lifetime_secs,
            renew_early: renew_early_secs,
        })
    }

    pub fn lifetime(&self) -> i64 {
        self.lifetime
    }

    pub fn renew_early(&self) -> i64 {
        self.renew_early
    }

    /// Minimum age a bundle must reach before a routine refresh replaces it
    pub fn cooldown(&self) -> i64 {
        self.lifetime - self.renew_early
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            lifetime: DEFAULT_LIFETIME_SECS,
            renew_early: DEFAULT_RENEW_EARLY_SECS,
        }
    }
}

/// Lifecycle state of the cached credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// No successful acquisition yet
    Uninitialized,
    /// Bundle present with more than the renew-early margin left
    Valid,
    /// Bundle present but inside the renew-early margin or past its lifetime
    Stale,
}

/// Result of a refresh request
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// The command ran and a new bundle was published
    Refreshed(Arc<CredentialBundle>),
    /// The current bundle is younger than the cooldown, nothing was run
    SkippedCooldown,
}

impl RefreshOutcome {
    pub fn is_refreshed(&self) -> bool {
        matches!(self, RefreshOutcome::Refreshed(_))
    }
}
