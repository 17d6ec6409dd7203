// src/middleware/rate_limit.rs
use crate::errors::{ApiError, ApiResult};
use crate::AppState;
use axum::{
    extract::{ConnectInfo, Extension, Request},
    middleware::Next,
    response::Response,
};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Credential requests a single client address may make per window.
const CLIENT_REQUESTS_PER_WINDOW: usize = 20;
/// Failed sign-ins tolerated for one account per window.
const FAILED_LOGINS_PER_WINDOW: usize = 5;
const WINDOW: Duration = Duration::from_secs(15 * 60);

/// Sliding window of attempt timestamps per key.
pub struct AttemptWindow {
    attempts: Mutex<HashMap<String, VecDeque<Instant>>>,
    limit: usize,
    window: Duration,
}

impl AttemptWindow {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            limit,
            window,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Instant>>> {
        match self.attempts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Time until `key` may try again, or `None` when it is under the limit.
    fn blocked_for(entries: &mut VecDeque<Instant>, limit: usize, window: Duration, now: Instant) -> Option<Duration> {
        while entries.front().is_some_and(|at| now.duration_since(*at) >= window) {
            entries.pop_front();
        }
        if entries.len() < limit {
            return None;
        }
        entries.front().map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
    }

    pub fn retry_after(&self, key: &str) -> Option<Duration> {
        let mut attempts = self.lock();
        let entries = attempts.get_mut(key)?;
        Self::blocked_for(entries, self.limit, self.window, Instant::now())
    }

    pub fn record(&self, key: &str) {
        self.lock().entry(key.to_string()).or_default().push_back(Instant::now());
    }

    /// Records an attempt unless the key is already over the limit.
    pub fn try_acquire(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut attempts = self.lock();
        let entries = attempts.entry(key.to_string()).or_default();
        if let Some(wait) = Self::blocked_for(entries, self.limit, self.window, now) {
            return Err(wait);
        }
        entries.push_back(now);
        Ok(())
    }

    pub fn clear(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Drops keys whose attempts have all aged out.
    pub fn purge_idle(&self) {
        let now = Instant::now();
        let window = self.window;
        self.lock()
            .retain(|_, entries| entries.back().is_some_and(|last| now.duration_since(*last) < window));
    }
}

/// Throttles the public credential routes: per client address for every
/// request, and per account for failed sign-ins.
pub struct CredentialGuard {
    clients: AttemptWindow,
    failed_logins: AttemptWindow,
}

impl Default for CredentialGuard {
    fn default() -> Self {
        Self::new(CLIENT_REQUESTS_PER_WINDOW, FAILED_LOGINS_PER_WINDOW, WINDOW)
    }
}

fn too_many(message: &str, wait: Duration) -> ApiError {
    ApiError::TooManyRequests {
        message: message.to_string(),
        retry_after: wait.as_secs().max(1),
    }
}

impl CredentialGuard {
    pub fn new(client_limit: usize, failed_login_limit: usize, window: Duration) -> Self {
        Self {
            clients: AttemptWindow::new(client_limit, window),
            failed_logins: AttemptWindow::new(failed_login_limit, window),
        }
    }

    pub fn admit_client(&self, client_ip: &str) -> ApiResult<()> {
        self.clients
            .try_acquire(client_ip)
            .map_err(|wait| too_many("Too many attempts. Please try again later.", wait))
    }

    /// Rejects a sign-in for an account that has failed too often recently.
    /// `email` must already be normalized.
    pub fn ensure_login_allowed(&self, email: &str) -> ApiResult<()> {
        match self.failed_logins.retry_after(email) {
            Some(wait) => Err(too_many(
                "Too many failed sign-in attempts for this account. Please try again later.",
                wait,
            )),
            None => Ok(()),
        }
    }

    pub fn record_failed_login(&self, email: &str) {
        self.failed_logins.record(email);
    }

    pub fn clear_failed_logins(&self, email: &str) {
        self.failed_logins.clear(email);
    }

    pub fn purge_idle(&self) {
        self.clients.purge_idle();
        self.failed_logins.purge_idle();
    }
}

pub async fn credential_rate_limit(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let client_ip = addr.ip().to_string();
    if let Err(err) = state.credential_guard.admit_client(&client_ip) {
        tracing::warn!(client_ip = %client_ip, path = %request.uri().path(), "credential rate limit exceeded");
        return Err(err);
    }

    // Occasionally clean up expired entries
    if rand::random::<u8>() < 10 {
        state.credential_guard.purge_idle();
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_limit_is_per_address() {
        let guard = CredentialGuard::new(2, 5, Duration::from_secs(60));
        assert!(guard.admit_client("10.0.0.1").is_ok());
        assert!(guard.admit_client("10.0.0.1").is_ok());
        match guard.admit_client("10.0.0.1") {
            Err(ApiError::TooManyRequests { retry_after, .. }) => assert!((1..=60).contains(&retry_after)),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(guard.admit_client("10.0.0.2").is_ok());
    }

    #[test]
    fn test_failed_logins_lock_only_that_account() {
        let guard = CredentialGuard::new(100, 3, Duration::from_secs(60));
        for _ in 0..2 {
            guard.record_failed_login("patient@rcr.rw");
        }
        assert!(guard.ensure_login_allowed("patient@rcr.rw").is_ok());

        guard.record_failed_login("patient@rcr.rw");
        assert!(matches!(
            guard.ensure_login_allowed("patient@rcr.rw"),
            Err(ApiError::TooManyRequests { .. })
        ));
        assert!(guard.ensure_login_allowed("counselor@rcr.rw").is_ok());

        guard.clear_failed_logins("patient@rcr.rw");
        assert!(guard.ensure_login_allowed("patient@rcr.rw").is_ok());
    }

    #[test]
    fn test_attempts_age_out() {
        let window = AttemptWindow::new(1, Duration::from_millis(1));
        assert!(window.try_acquire("10.0.0.1").is_ok());
        std::thread::sleep(Duration::from_millis(5));
        assert!(window.retry_after("10.0.0.1").is_none());
        assert!(window.try_acquire("10.0.0.1").is_ok());

        std::thread::sleep(Duration::from_millis(5));
        window.purge_idle();
        assert!(window.lock().is_empty());
    }
}
