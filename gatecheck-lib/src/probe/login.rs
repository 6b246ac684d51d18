//! Real DMM API surface: the authenticated userinfo endpoint plus the
//! WebDriver-driven interactive login.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thirtyfour::error::WebDriverError;
use thirtyfour::prelude::*;
use tracing::{debug, warn};

use super::dmm::{ApiOutcome, DmmApi};
use super::session::SessionCookies;
use super::{fetch, FetchRequest};
use crate::config::DmmConfig;
use crate::error::{GateError, Result};

const USERINFO_URL: &str = "https://apidgp-gameplayer.games.dmm.com/v5/userinfo";
const LOGINURL_URL: &str = "https://apidgp-gameplayer.games.dmm.com/v5/loginurl";

const COOKIE_SESSION_ID: &str = "login_session_id";
const COOKIE_SECURE_ID: &str = "login_secure_id";
const COOKIE_POLL_ATTEMPTS: u32 = 10;
const COOKIE_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    result_code: i64,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginUrlResponse {
    result_code: i64,
    data: LoginUrlData,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginUrlData {
    url: String,
}

pub struct HttpDmmApi {
    timeout: Duration,
    cfg: DmmConfig,
}

impl HttpDmmApi {
    pub fn new(timeout: Duration, cfg: DmmConfig) -> Self {
        Self { timeout, cfg }
    }

    async fn login_url(&self) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| GateError::Session(format!("failed to build client: {e}")))?;
        let response: LoginUrlResponse = client
            .get(LOGINURL_URL)
            .send()
            .await
            .map_err(|e| GateError::Session(format!("login url request failed: {e}")))?
            .json()
            .await
            .map_err(|e| GateError::Session(format!("unexpected login url body: {e}")))?;

        if let Some(error) = response.error {
            return Err(GateError::Session(format!(
                "login url error {}: {error}",
                response.result_code
            )));
        }
        Ok(response.data.url)
    }

    async fn drive_login(&self, driver: &WebDriver, url: &str) -> Result<SessionCookies> {
        let user = std::env::var(&self.cfg.user_env)
            .map_err(|_| GateError::Session(format!("{} is not set", self.cfg.user_env)))?;
        let pass = std::env::var(&self.cfg.pass_env)
            .map_err(|_| GateError::Session(format!("{} is not set", self.cfg.pass_env)))?;

        driver.goto(url).await.map_err(webdriver_err)?;
        driver
            .find(By::Id("login_id"))
            .await
            .map_err(webdriver_err)?
            .send_keys(user.as_str())
            .await
            .map_err(webdriver_err)?;
        driver
            .find(By::Id("password"))
            .await
            .map_err(webdriver_err)?
            .send_keys(pass.as_str())
            .await
            .map_err(webdriver_err)?;
        driver
            .find(By::XPath(r#"//input[@data-e2e="login_button"]"#))
            .await
            .map_err(webdriver_err)?
            .click()
            .await
            .map_err(webdriver_err)?;

        // Both cookies appear only once the post-login redirects settle.
        for attempt in 0..COOKIE_POLL_ATTEMPTS {
            let mut session_id = None;
            let mut secure_id = None;
            for cookie in driver.get_all_cookies().await.map_err(webdriver_err)? {
                match cookie.name.as_str() {
                    COOKIE_SESSION_ID => session_id = Some(cookie.value.to_string()),
                    COOKIE_SECURE_ID => secure_id = Some(cookie.value.to_string()),
                    _ => {}
                }
            }

            if let (Some(login_session_id), Some(login_secure_id)) = (session_id, secure_id) {
                debug!(attempt, "login cookies extracted");
                return Ok(SessionCookies { login_session_id, login_secure_id });
            }
            tokio::time::sleep(COOKIE_POLL_INTERVAL).await;
        }

        Err(GateError::Session("login cookies never appeared".to_string()))
    }
}

#[async_trait]
impl DmmApi for HttpDmmApi {
    async fn userinfo(
        &self,
        interface: Option<&str>,
        cookies: &SessionCookies,
    ) -> Option<ApiOutcome> {
        let fetched = fetch(FetchRequest {
            url: USERINFO_URL,
            method: reqwest::Method::POST,
            interface,
            cookie: Some(cookies.header()),
            timeout: self.timeout,
        })
        .await?;

        // Fail closed on any body that does not match the expected shape.
        let body: UserInfoResponse = match serde_json::from_str(&fetched.body) {
            Ok(body) => body,
            Err(err) => {
                debug!(%err, status = %fetched.status, "unexpected userinfo body");
                return None;
            }
        };

        Some(ApiOutcome {
            result_code: body.result_code,
            error: body.error,
            duration_ms: fetched.duration_ms,
        })
    }

    async fn login(&self) -> Result<SessionCookies> {
        let url = self.login_url().await?;

        let mut caps = DesiredCapabilities::firefox();
        caps.set_headless().map_err(webdriver_err)?;
        let driver = WebDriver::new(&self.cfg.webdriver_url, caps)
            .await
            .map_err(webdriver_err)?;

        let result = self.drive_login(&driver, &url).await;
        if let Err(err) = driver.quit().await {
            warn!(%err, "failed to quit webdriver session");
        }
        result
    }
}

fn webdriver_err(err: WebDriverError) -> GateError {
    GateError::Session(format!("webdriver: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn userinfo_body_shape_is_enforced() {
        let ok: UserInfoResponse =
            serde_json::from_str(r#"{"result_code": 100, "error": null}"#).unwrap();
        assert_eq!(ok.result_code, 100);
        assert!(ok.error.is_none());

        assert!(serde_json::from_str::<UserInfoResponse>(r#"{"status": "ok"}"#).is_err());
    }

    #[test]
    fn login_url_body_shape_is_enforced() {
        let ok: LoginUrlResponse = serde_json::from_str(
            r#"{"result_code": 100, "data": {"url": "https://example.com/login"}}"#,
        )
        .unwrap();
        assert_eq!(ok.data.url, "https://example.com/login");

        assert!(serde_json::from_str::<LoginUrlResponse>(r#"{"result_code": 100}"#).is_err());
    }
}
