use async_trait::async_trait;
use tracing::{debug, error, warn};

use super::session::{CredentialStore, SessionCookies};
use super::{Probe, ProbeResult};
use crate::error::Result;

const SITE: &str = "dmm";

const CODE_OK: i64 = 100;
const CODE_SESSION_INVALID: i64 = 203;
const CODE_BLOCKED: i64 = 803;
/// Result codes accepted when validating a cached session: a blocked
/// account still proves the session itself is alive.
const VALID_SESSION_CODES: [i64; 2] = [CODE_OK, CODE_BLOCKED];

/// One authenticated API call, already shape-checked at the boundary.
#[derive(Debug, Clone)]
pub struct ApiOutcome {
    pub result_code: i64,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// The external surface the stateful probe talks to: the authenticated
/// userinfo endpoint and the interactive login flow.
#[async_trait]
pub trait DmmApi: Send + Sync {
    /// Authenticated userinfo call, bound to `interface` when given.
    /// `None` on transport failure or a body that fails the shape check.
    async fn userinfo(
        &self,
        interface: Option<&str>,
        cookies: &SessionCookies,
    ) -> Option<ApiOutcome>;

    /// Interactive login; returns a fresh cookie pair.
    async fn login(&self) -> Result<SessionCookies>;
}

/// Stateful session probe. Requires a valid session before testing; a
/// "session invalid" answer during a test triggers exactly one re-init and
/// one retry, never more.
pub struct DmmProbe {
    api: Box<dyn DmmApi>,
    store: CredentialStore,
    cookies: Option<SessionCookies>,
}

impl DmmProbe {
    pub fn new(api: Box<dyn DmmApi>, store: CredentialStore) -> Self {
        Self { api, store, cookies: None }
    }

    /// Load-and-validate a persisted session, falling back to the
    /// interactive login. On success the cookies are held and persisted.
    async fn establish_session(&mut self) -> bool {
        match self.store.load().await {
            Ok(cookies) => {
                // Validate on the default route, not the tunnel.
                match self.api.userinfo(None, &cookies).await {
                    Some(outcome) if VALID_SESSION_CODES.contains(&outcome.result_code) => {
                        debug!("loaded session from cache");
                        self.cookies = Some(cookies);
                        return true;
                    }
                    Some(outcome) => {
                        debug!(code = outcome.result_code, "cached session rejected")
                    }
                    None => debug!("cached session could not be validated"),
                }
            }
            Err(err) => debug!(%err, "no usable cached session"),
        }

        match self.api.login().await {
            Ok(cookies) => {
                if let Err(err) = self.store.save(&cookies).await {
                    warn!(%err, "failed to persist session");
                }
                self.cookies = Some(cookies);
                true
            }
            Err(err) => {
                error!(%err, "login failed");
                false
            }
        }
    }
}

#[async_trait]
impl Probe for DmmProbe {
    fn site(&self) -> &'static str {
        SITE
    }

    async fn init(&mut self) -> bool {
        self.establish_session().await
    }

    async fn test(&mut self, interface: &str) -> ProbeResult {
        for retried in [false, true] {
            let Some(cookies) = self.cookies.clone() else {
                warn!("probe used without an established session");
                return ProbeResult::unreachable(SITE);
            };

            let Some(outcome) = self.api.userinfo(Some(interface), &cookies).await else {
                return ProbeResult::unreachable(SITE);
            };

            match outcome.result_code {
                CODE_OK => return ProbeResult::reached(SITE, outcome.duration_ms),
                CODE_SESSION_INVALID if !retried => {
                    debug!("session invalid, re-initializing once");
                    if !self.establish_session().await {
                        return ProbeResult::unreachable(SITE);
                    }
                }
                CODE_SESSION_INVALID => {
                    debug!("session still invalid after re-init");
                    return ProbeResult::unreachable(SITE);
                }
                CODE_BLOCKED => {
                    debug!("blocked");
                    return ProbeResult::unreachable(SITE);
                }
                code => {
                    warn!(code, error = ?outcome.error, "unexpected result code");
                    return ProbeResult::unreachable(SITE);
                }
            }
        }

        ProbeResult::unreachable(SITE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Scripted API double. Interface-bound calls pop one answer per call;
    /// default-route validation calls get a fixed answer; logins are
    /// counted.
    struct ScriptedApi {
        validation: Option<ApiOutcome>,
        answers: Mutex<VecDeque<Option<ApiOutcome>>>,
        logins: Arc<AtomicUsize>,
        login_fails: bool,
    }

    impl ScriptedApi {
        fn new(answers: Vec<Option<ApiOutcome>>) -> (Self, Arc<AtomicUsize>) {
            let logins = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    validation: None,
                    answers: Mutex::new(answers.into()),
                    logins: Arc::clone(&logins),
                    login_fails: false,
                },
                logins,
            )
        }
    }

    fn code(result_code: i64) -> Option<ApiOutcome> {
        Some(ApiOutcome { result_code, error: None, duration_ms: 7 })
    }

    #[async_trait]
    impl DmmApi for ScriptedApi {
        async fn userinfo(
            &self,
            interface: Option<&str>,
            _cookies: &SessionCookies,
        ) -> Option<ApiOutcome> {
            match interface {
                None => self.validation.clone(),
                Some(_) => self.answers.lock().unwrap().pop_front().flatten(),
            }
        }

        async fn login(&self) -> Result<SessionCookies> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            if self.login_fails {
                return Err(crate::error::GateError::Session("login refused".to_string()));
            }
            Ok(SessionCookies {
                login_session_id: "fresh-sid".to_string(),
                login_secure_id: "fresh-sec".to_string(),
            })
        }
    }

    fn probe_with(api: ScriptedApi, dir: &tempfile::TempDir) -> DmmProbe {
        DmmProbe::new(Box::new(api), CredentialStore::new(dir.path().join("session.json")))
    }

    #[tokio::test]
    async fn init_logs_in_when_no_cached_session() {
        let dir = tempfile::TempDir::new().unwrap();
        let (api, logins) = ScriptedApi::new(vec![]);
        let mut probe = probe_with(api, &dir);

        assert!(probe.init().await);
        assert_eq!(logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn init_accepts_valid_cached_session_without_login() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("session.json"));
        store
            .save(&SessionCookies {
                login_session_id: "cached".to_string(),
                login_secure_id: "cached".to_string(),
            })
            .await
            .unwrap();

        // Validation answers 803: blocked, but the session itself is alive.
        let (mut api, logins) = ScriptedApi::new(vec![]);
        api.validation = code(CODE_BLOCKED);
        let mut probe = probe_with(api, &dir);

        assert!(probe.init().await);
        assert_eq!(logins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn init_persists_fresh_cookies() {
        let dir = tempfile::TempDir::new().unwrap();
        let (api, _) = ScriptedApi::new(vec![]);
        let mut probe = probe_with(api, &dir);
        assert!(probe.init().await);

        let saved = CredentialStore::new(dir.path().join("session.json")).load().await.unwrap();
        assert_eq!(saved.login_session_id, "fresh-sid");
    }

    #[tokio::test]
    async fn init_fails_when_login_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let (mut api, _) = ScriptedApi::new(vec![]);
        api.login_fails = true;
        let mut probe = probe_with(api, &dir);
        assert!(!probe.init().await);
    }

    #[tokio::test]
    async fn test_succeeds_with_measured_duration() {
        let dir = tempfile::TempDir::new().unwrap();
        let (api, _) = ScriptedApi::new(vec![code(CODE_OK)]);
        let mut probe = probe_with(api, &dir);
        probe.cookies = Some(SessionCookies {
            login_session_id: "s".to_string(),
            login_secure_id: "s".to_string(),
        });

        assert_eq!(probe.test("tun0").await, ProbeResult::reached(SITE, 7));
    }

    #[tokio::test]
    async fn session_invalid_reinitializes_once_and_retries_once() {
        let dir = tempfile::TempDir::new().unwrap();
        // init validation login, 203 on the first test, then 100 on retry.
        let (api, logins) = ScriptedApi::new(vec![code(CODE_SESSION_INVALID), code(CODE_OK)]);
        let mut probe = probe_with(api, &dir);
        assert!(probe.init().await);

        let result = probe.test("tun0").await;
        assert_eq!(result, ProbeResult::reached(SITE, 7));
        // One login from init, one from the single re-init.
        assert_eq!(logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_session_invalid_does_not_loop() {
        let dir = tempfile::TempDir::new().unwrap();
        let (api, logins) =
            ScriptedApi::new(vec![code(CODE_SESSION_INVALID), code(CODE_SESSION_INVALID)]);
        let mut probe = probe_with(api, &dir);
        assert!(probe.init().await);

        let result = probe.test("tun0").await;
        assert_eq!(result, ProbeResult::unreachable(SITE));
        assert_eq!(logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn blocked_fails_without_retry() {
        let dir = tempfile::TempDir::new().unwrap();
        let (api, logins) = ScriptedApi::new(vec![code(CODE_BLOCKED)]);
        let mut probe = probe_with(api, &dir);
        assert!(probe.init().await);

        assert_eq!(probe.test("tun0").await, ProbeResult::unreachable(SITE));
        assert_eq!(logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unexpected_code_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let (api, _) = ScriptedApi::new(vec![code(999)]);
        let mut probe = probe_with(api, &dir);
        assert!(probe.init().await);

        assert_eq!(probe.test("tun0").await, ProbeResult::unreachable(SITE));
    }

    #[tokio::test]
    async fn transport_failure_fails_without_duration() {
        let dir = tempfile::TempDir::new().unwrap();
        let (api, _) = ScriptedApi::new(vec![None]);
        let mut probe = probe_with(api, &dir);
        assert!(probe.init().await);

        let result = probe.test("tun0").await;
        assert!(!result.success);
        assert!(result.duration_ms.is_none());
    }
}
