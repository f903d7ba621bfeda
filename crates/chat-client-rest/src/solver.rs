//! Captcha challenge handling
//!
//! The service interrupts suspicious requests with a captcha challenge in
//! the error body. Applications supply a solver; the pipeline retries the
//! request with the solution attached.

use async_trait::async_trait;
use serde::Deserialize;

/// Challenge reasons the pipeline will attempt to solve
///
/// Anything else (e.g. a hard block) is surfaced to the caller as an API
/// error instead of burning solver budget.
const SOLVABLE_CAPTCHA_KEYS: [&str; 9] = [
    "incorrect-captcha",
    "response-already-used",
    "captcha-required",
    "invalid-input-response",
    "invalid-response",
    "needs-update",
    "response-already-used-error",
    "rqkey-mismatch",
    "sitekey-secret-mismatch",
];

/// Captcha challenge extracted from a 4xx error body
#[derive(Debug, Clone, Deserialize)]
pub struct CaptchaChallenge {
    /// Reason keys explaining why the captcha was demanded
    #[serde(default)]
    pub captcha_key: Vec<String>,
    #[serde(default)]
    pub captcha_sitekey: Option<String>,
    #[serde(default)]
    pub captcha_service: Option<String>,
    #[serde(default)]
    pub captcha_rqdata: Option<String>,
    #[serde(default)]
    pub captcha_rqtoken: Option<String>,
}

impl CaptchaChallenge {
    /// Parse a challenge out of an error body, if one is present
    #[must_use]
    pub fn from_body(body: &serde_json::Value) -> Option<Self> {
        if body.get("captcha_key").is_none() && body.get("captcha_sitekey").is_none() {
            return None;
        }
        serde_json::from_value(body.clone()).ok()
    }

    /// Whether every reason key is one the solver can act on
    #[must_use]
    pub fn is_solvable(&self) -> bool {
        !self.captcha_key.is_empty()
            && self.captcha_key.iter().all(|key| {
                SOLVABLE_CAPTCHA_KEYS
                    .iter()
                    .any(|known| key == known || key.starts_with(known))
            })
    }
}

/// A solved challenge
#[derive(Debug, Clone)]
pub struct CaptchaSolution {
    /// Token attached as `X-Captcha-Key`
    pub key: String,
    /// Request token echoed back as `X-Captcha-Rqtoken`, when the
    /// challenge carried one
    pub rqtoken: Option<String>,
}

/// Application-supplied captcha solver
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// Solve a challenge, returning the token to retry with
    async fn solve(
        &self,
        challenge: &CaptchaChallenge,
        user_agent: &str,
    ) -> Result<CaptchaSolution, anyhow::Error>;
}
