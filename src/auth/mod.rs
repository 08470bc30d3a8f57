// Session credential module
// Acquires credentials from the STS command and manages their lifecycle

mod acquirer;
mod clock;
mod command;
mod manager;
mod types;

pub use acquirer::{CommandAcquirer, TokenAcquirer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{parse_exports, run_command, CommandOutput, StsCommand, MAX_STDERR_BYTES};
pub use manager::CredentialManager;
pub use types::{
    CredentialBundle, CredentialState, RefreshOutcome, RefreshPolicy, SessionCredentials,
    ACCESS_KEY_VAR, DEFAULT_LIFETIME_SECS, DEFAULT_RENEW_EARLY_SECS, MAX_LIFETIME_SECS,
    SECRET_KEY_VAR, SESSION_TOKEN_VAR,
};
