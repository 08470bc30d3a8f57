use arc_swap::ArcSwapOption;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::acquirer::{CommandAcquirer, TokenAcquirer};
use super::clock::{Clock, SystemClock};
use super::command::StsCommand;
use super::types::{CredentialBundle, CredentialState, RefreshOutcome, RefreshPolicy};
use crate::error::{CredentialError, Result};

/// Credential cache manager
/// Owns the published bundle, decides when a refresh is due and makes sure
/// only one refresh runs at a time
pub struct CredentialManager {
    /// Published bundle; the issuance time lives inside it
    current: ArcSwapOption<CredentialBundle>,

    /// Serializes initialize/refresh, never taken by readers
    refresh_lock: Mutex<()>,

    acquirer: Arc<dyn TokenAcquirer>,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
}

impl CredentialManager {
    /// Create a manager that runs the STS command as a subprocess
    pub fn new(policy: RefreshPolicy) -> Self {
        Self::with_parts(policy, Arc::new(CommandAcquirer), Arc::new(SystemClock))
    }

    /// Create a manager with a custom acquirer and time source
    pub fn with_parts(
        policy: RefreshPolicy,
        acquirer: Arc<dyn TokenAcquirer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            current: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
            acquirer,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// First acquisition. Runs unconditionally; on failure nothing is
    /// published and the error goes back to the caller.
    pub async fn initialize(&self, command: &StsCommand) -> Result<Arc<CredentialBundle>> {
        tracing::info!("Initializing session credentials...");
        let _guard = self.refresh_lock.lock().await;
        self.acquire_and_publish(command).await
    }

    /// Current bundle, without blocking and without triggering a refresh
    pub fn get_credentials(&self) -> Result<Arc<CredentialBundle>> {
        self.current.load_full().ok_or(CredentialError::NotInitialized)
    }

    /// Session token of the current bundle
    pub fn session_token(&self) -> Result<String> {
        Ok(self.get_credentials()?.session_token().to_string())
    }

    /// Seconds of validity left; negative once expired, `None` before initialization
    pub fn remaining_secs(&self) -> Option<i64> {
        self.current
            .load_full()
            .map(|bundle| {
                bundle
                    .issued_at
                    .saturating_add(self.policy.lifetime())
                    .saturating_sub(self.clock.now())
            })
    }

    /// True when fewer than `threshold_secs` seconds of validity remain.
    /// Always true before initialization.
    pub fn is_expiring_soon(&self, threshold_secs: i64) -> bool {
        match self.remaining_secs() {
            None => true,
            Some(remaining) => remaining < threshold_secs,
        }
    }

    /// True once the full lifetime has elapsed
    pub fn is_expired(&self) -> bool {
        self.is_expiring_soon(1)
    }

    pub fn state(&self) -> CredentialState {
        match self.remaining_secs() {
            None => CredentialState::Uninitialized,
            Some(remaining) if remaining < self.policy.renew_early() => CredentialState::Stale,
            Some(_) => CredentialState::Valid,
        }
    }

    /// Refresh unless the current bundle is younger than the cooldown.
    /// Concurrent callers queue on the refresh guard and re-check the cooldown
    /// once they hold it, so overlapping requests run the command only once.
    /// A failed refresh keeps the previous bundle published.
    pub async fn refresh(&self, command: &StsCommand) -> Result<RefreshOutcome> {
        if let Some(age) = self.cooling_down() {
            tracing::debug!(
                age_secs = age,
                cooldown_secs = self.policy.cooldown(),
                "Last refresh too recent, skipping"
            );
            return Ok(RefreshOutcome::SkippedCooldown);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(age) = self.cooling_down() {
            tracing::debug!(age_secs = age, "Refreshed concurrently, skipping");
            return Ok(RefreshOutcome::SkippedCooldown);
        }

        tracing::info!("Refreshing session credentials...");
        match self.acquire_and_publish(command).await {
            Ok(bundle) => Ok(RefreshOutcome::Refreshed(bundle)),
            Err(e) => {
                if self.current.load().is_some() {
                    tracing::warn!("Credential refresh failed, keeping previous credentials: {}", e);
                } else {
                    tracing::error!("Credential refresh failed and no credentials are available: {}", e);
                }
                Err(e)
            }
        }
    }

    /// Age of the current bundle if it is still inside the cooldown window
    fn cooling_down(&self) -> Option<i64> {
        let bundle = self.current.load_full()?;
        let age = self.clock.now().saturating_sub(bundle.issued_at);
        (age < self.policy.cooldown()).then_some(age)
    }

    /// Must be called with `refresh_lock` held
    async fn acquire_and_publish(&self, command: &StsCommand) -> Result<Arc<CredentialBundle>> {
        // Lifetime counts from the moment the request went out
        let issued_at = self.clock.now();
        let credentials = self.acquirer.acquire(command).await?;

        let bundle = Arc::new(CredentialBundle::new(credentials, issued_at));
        self.current.store(Some(Arc::clone(&bundle)));

        let issued = bundle
            .issued_at_utc()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| bundle.issued_at.to_string());
        tracing::info!(
            issued_at = %issued,
            lifetime_secs = self.policy.lifetime(),
            "Session credentials published"
        );

        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::types::SessionCredentials;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const START: i64 = 1_700_000_000;

    /// Hands out numbered credentials and counts invocations
    struct CountingAcquirer {
        calls: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
        delay: Duration,
    }

    impl CountingAcquirer {
        fn new() -> Arc<Self> {
            Self::with_delay(Duration::ZERO)
        }

        fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: std::sync::atomic::AtomicBool::new(false),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl TokenAcquirer for CountingAcquirer {
        async fn acquire(&self, _command: &StsCommand) -> Result<SessionCredentials> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(CredentialError::AcquisitionIncomplete {
                    missing: vec!["SESSION_TOKEN"],
                });
            }
            Ok(SessionCredentials::new(
                format!("AK{}", n),
                format!("SK{}", n),
                format!("TOK{}", n),
            ))
        }
    }

    fn command() -> StsCommand {
        StsCommand::parse("sts-helper --role etl").unwrap()
    }

    fn manager_with(acquirer: Arc<CountingAcquirer>) -> (Arc<CredentialManager>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let manager = CredentialManager::with_parts(
            RefreshPolicy::default(),
            acquirer,
            clock.clone(),
        );
        (Arc::new(manager), clock)
    }

    #[tokio::test]
    async fn test_uninitialized_manager() {
        let (manager, _clock) = manager_with(CountingAcquirer::new());

        assert_eq!(manager.state(), CredentialState::Uninitialized);
        assert!(matches!(
            manager.get_credentials(),
            Err(CredentialError::NotInitialized)
        ));
        assert!(matches!(
            manager.session_token(),
            Err(CredentialError::NotInitialized)
        ));
        assert!(manager.is_expiring_soon(0));
        assert!(manager.remaining_secs().is_none());
    }

    #[tokio::test]
    async fn test_initialize_publishes_bundle() {
        let acquirer = CountingAcquirer::new();
        let (manager, _clock) = manager_with(acquirer.clone());

        let bundle = manager.initialize(&command()).await.unwrap();
        assert_eq!(bundle.session_token(), "TOK1");
        assert_eq!(bundle.issued_at, START);

        assert_eq!(manager.get_credentials().unwrap().access_key_id(), "AK1");
        assert_eq!(manager.session_token().unwrap(), "TOK1");
        assert_eq!(manager.state(), CredentialState::Valid);
        assert_eq!(acquirer.calls(), 1);
    }

    #[tokio::test]
    async fn test_initialize_failure_publishes_nothing() {
        let acquirer = CountingAcquirer::new();
        acquirer.set_failing(true);
        let (manager, _clock) = manager_with(acquirer);

        let err = manager.initialize(&command()).await.unwrap_err();
        assert!(matches!(err, CredentialError::AcquisitionIncomplete { .. }));
        assert!(matches!(
            manager.get_credentials(),
            Err(CredentialError::NotInitialized)
        ));
        assert_eq!(manager.state(), CredentialState::Uninitialized);
    }

    #[tokio::test]
    async fn test_expiring_soon_boundaries() {
        let (manager, clock) = manager_with(CountingAcquirer::new());
        manager.initialize(&command()).await.unwrap();

        clock.advance(100);
        let remaining = 300 - 100;
        assert_eq!(manager.remaining_secs(), Some(remaining));
        assert!(!manager.is_expiring_soon(remaining));
        assert!(manager.is_expiring_soon(remaining + 1));
    }

    #[tokio::test]
    async fn test_state_transitions_with_time() {
        let (manager, clock) = manager_with(CountingAcquirer::new());
        manager.initialize(&command()).await.unwrap();

        clock.advance(210);
        // Exactly 90s left is not yet inside the margin
        assert_eq!(manager.state(), CredentialState::Valid);

        clock.advance(1);
        assert_eq!(manager.state(), CredentialState::Stale);
        assert!(!manager.is_expired());

        clock.advance(89);
        assert!(manager.is_expired());
        assert_eq!(manager.state(), CredentialState::Stale);
    }

    #[tokio::test]
    async fn test_refresh_respects_cooldown() {
        let acquirer = CountingAcquirer::new();
        let (manager, clock) = manager_with(acquirer.clone());
        manager.initialize(&command()).await.unwrap();

        let outcome = manager.refresh(&command()).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::SkippedCooldown));

        clock.advance(209);
        let outcome = manager.refresh(&command()).await.unwrap();
        assert!(!outcome.is_refreshed());
        assert_eq!(acquirer.calls(), 1);

        clock.advance(1);
        match manager.refresh(&command()).await.unwrap() {
            RefreshOutcome::Refreshed(bundle) => {
                assert_eq!(bundle.session_token(), "TOK2");
                assert_eq!(bundle.issued_at, START + 210);
            }
            other => panic!("expected a refresh, got {:?}", other),
        }
        assert_eq!(acquirer.calls(), 2);
        assert_eq!(manager.session_token().unwrap(), "TOK2");
    }

    #[tokio::test]
    async fn test_refresh_before_initialize_acquires() {
        let acquirer = CountingAcquirer::new();
        let (manager, _clock) = manager_with(acquirer.clone());

        let outcome = manager.refresh(&command()).await.unwrap();
        assert!(outcome.is_refreshed());
        assert_eq!(acquirer.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_bundle() {
        let acquirer = CountingAcquirer::new();
        let (manager, clock) = manager_with(acquirer.clone());
        let original = manager.initialize(&command()).await.unwrap();

        clock.advance(250);
        acquirer.set_failing(true);
        let err = manager.refresh(&command()).await.unwrap_err();
        assert!(matches!(err, CredentialError::AcquisitionIncomplete { .. }));

        let current = manager.get_credentials().unwrap();
        assert!(Arc::ptr_eq(&original, &current));
        assert_eq!(current.issued_at, START);
        assert_eq!(manager.state(), CredentialState::Stale);

        // The failure did not start a new cooldown
        acquirer.set_failing(false);
        let outcome = manager.refresh(&command()).await.unwrap();
        assert!(outcome.is_refreshed());
        assert_eq!(manager.session_token().unwrap(), "TOK3");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_runs_command_once() {
        let acquirer = CountingAcquirer::with_delay(Duration::from_millis(50));
        let (manager, clock) = manager_with(acquirer.clone());
        manager.initialize(&command()).await.unwrap();

        // Inside the cooldown nobody runs the command
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.refresh(&command()).await })
            })
            .collect();
        for outcome in futures::future::join_all(tasks).await {
            assert!(!outcome.unwrap().unwrap().is_refreshed());
        }
        assert_eq!(acquirer.calls(), 1);

        // Past the cooldown exactly one of the overlapping callers does
        clock.advance(210);
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.refresh(&command()).await })
            })
            .collect();
        let refreshed = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|outcome| outcome.as_ref().unwrap().as_ref().unwrap().is_refreshed())
            .count();
        assert_eq!(refreshed, 1);
        assert_eq!(acquirer.calls(), 2);

        // And again after the next cooldown
        clock.advance(210);
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.refresh(&command()).await })
            })
            .collect();
        futures::future::join_all(tasks).await;
        assert_eq!(acquirer.calls(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_not_blocked_by_refresh() {
        let acquirer = CountingAcquirer::with_delay(Duration::from_millis(200));
        let (manager, clock) = manager_with(acquirer.clone());
        manager.initialize(&command()).await.unwrap();
        clock.advance(210);

        let refresher = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.refresh(&command()).await })
        };

        // Wait until the slow refresh is in flight
        while acquirer.calls() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let started = std::time::Instant::now();
        let bundle = manager.get_credentials().unwrap();
        assert!(!manager.is_expiring_soon(0));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(bundle.session_token(), "TOK1");

        assert!(refresher.await.unwrap().unwrap().is_refreshed());
        assert_eq!(manager.session_token().unwrap(), "TOK2");
    }

    #[tokio::test]
    async fn test_time_math_saturates_at_clock_extremes() {
        let acquirer = CountingAcquirer::new();
        let clock = Arc::new(ManualClock::new(i64::MAX - 10));
        let policy = RefreshPolicy::new(crate::auth::MAX_LIFETIME_SECS, 90).unwrap();
        let manager = CredentialManager::with_parts(policy, acquirer.clone(), clock.clone());
        manager.initialize(&command()).await.unwrap();

        // issued_at + lifetime would pass i64::MAX
        assert_eq!(manager.remaining_secs(), Some(10));
        assert!(manager.is_expiring_soon(90));
        assert_eq!(manager.state(), CredentialState::Stale);

        // A clock jump far into the past must not underflow the age
        clock.set(i64::MIN);
        assert!(!manager.is_expired());
        let outcome = manager.refresh(&command()).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::SkippedCooldown));
        assert_eq!(acquirer.calls(), 1);
    }
}
