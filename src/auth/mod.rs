//! Google OAuth2 login flow: consent-URL construction, code→token exchange,
//! and token refresh.
//!
//! The flow requests offline (refresh-token) access with forced consent and
//! carries a PKCE S256 challenge. State generation and validation live with
//! the caller's session (`session::PendingLogin`); this module is stateless
//! HTTP plumbing against the provider's endpoints.

pub mod credentials;
pub mod session;

use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::{Config, GMAIL_SCOPE};
use crate::error::AppError;

use credentials::Credential;

/// Everything the login handler needs to redirect the browser and later
/// validate the callback.
#[derive(Debug, Clone)]
pub struct LoginTicket {
    pub auth_url: String,
    pub state: String,
    pub pkce_verifier: String,
}

#[derive(Debug, Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    auth_url: String,
    token_url: String,
    redirect_uri: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

fn random_verifier() -> String {
    format!("{}{}{}", Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
}

fn code_challenge_s256(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    URL_SAFE_NO_PAD.encode(digest)
}

impl AuthClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client_id = config
            .google_client_id
            .clone()
            .ok_or_else(|| AppError::Config("missing GOOGLE_CLIENT_ID".into()))?;
        let client_secret = config
            .google_client_secret
            .clone()
            .ok_or_else(|| AppError::Config("missing GOOGLE_CLIENT_SECRET".into()))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Auth(format!("failed building HTTP client: {e}")))?;

        Ok(Self {
            http,
            auth_url: config.oauth.auth_url.clone(),
            token_url: config.oauth.token_url.clone(),
            redirect_uri: config.oauth.redirect_uri.clone(),
            client_id,
            client_secret,
        })
    }

    /// Build the provider consent URL plus the state/verifier pair the
    /// caller must park in the session until the callback arrives.
    pub fn begin_login(&self) -> Result<LoginTicket, AppError> {
        let state = Uuid::new_v4().to_string();
        let verifier = random_verifier();
        let challenge = code_challenge_s256(&verifier);

        let mut url = Url::parse(&self.auth_url)
            .map_err(|e| AppError::Auth(format!("invalid auth URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", GMAIL_SCOPE)
            .append_pair("state", &state)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("include_granted_scopes", "true")
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "S256");

        Ok(LoginTicket {
            auth_url: url.into(),
            state,
            pkce_verifier: verifier,
        })
    }

    /// Exchange the callback's authorization code for a credential.
    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<Credential, AppError> {
        let form: Vec<(&str, String)> = vec![
            ("client_id", self.client_id.clone()),
            ("client_secret", self.client_secret.clone()),
            ("code", code.to_string()),
            ("code_verifier", pkce_verifier.to_string()),
            ("redirect_uri", self.redirect_uri.clone()),
            ("grant_type", "authorization_code".to_string()),
        ];

        let token = self.post_token(&form, "token exchange").await?;
        Ok(self.credential_from(token))
    }

    /// Refresh an expired access token. The provider does not always echo the
    /// refresh token back, so the old one is preserved when absent.
    pub async fn refresh(&self, credential: &Credential) -> Result<Credential, AppError> {
        let refresh_token = credential
            .refresh_token
            .clone()
            .ok_or_else(|| AppError::Auth("credential has no refresh token".into()))?;

        let form: Vec<(&str, String)> = vec![
            ("client_id", self.client_id.clone()),
            ("client_secret", self.client_secret.clone()),
            ("refresh_token", refresh_token.clone()),
            ("grant_type", "refresh_token".to_string()),
        ];

        let mut token = self.post_token(&form, "token refresh").await?;
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token);
        }
        Ok(self.credential_from(token))
    }

    async fn post_token(
        &self,
        form: &[(&str, String)],
        what: &str,
    ) -> Result<TokenResponse, AppError> {
        let res = self
            .http
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::Auth(format!("{what} request failed: {e}")))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(AppError::Auth(format!("{what} failed: HTTP {status}: {body}")));
        }

        res.json::<TokenResponse>()
            .await
            .map_err(|e| AppError::Auth(format!("{what} parse failed: {e}")))
    }

    fn credential_from(&self, token: TokenResponse) -> Credential {
        let scopes = token
            .scope
            .as_deref()
            .unwrap_or(GMAIL_SCOPE)
            .split_whitespace()
            .map(str::to_string)
            .collect();

        Credential {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            token_uri: self.token_url.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            scopes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    fn default_config() -> Config {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("empty.toml");
        std::fs::write(&path, "").expect("write empty config");
        let mut cfg =
            config::load_from(&path, Some("/tmp/ms-auth-test"), None).expect("default config");
        cfg.google_client_id = Some("client-123".to_string());
        cfg.google_client_secret = Some("secret-456".to_string());
        cfg
    }

    fn test_client() -> AuthClient {
        AuthClient::new(&default_config()).expect("auth client")
    }

    #[test]
    fn missing_client_id_is_config_error() {
        let mut cfg = default_config();
        cfg.google_client_id = None;
        assert!(AuthClient::new(&cfg).is_err());
    }

    #[test]
    fn login_ticket_carries_required_params() {
        let client = test_client();
        let ticket = client.begin_login().expect("ticket");
        let url = Url::parse(&ticket.auth_url).expect("valid url");
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().collect();

        assert_eq!(pairs.get("client_id").map(|v| v.as_ref()), Some("client-123"));
        assert_eq!(pairs.get("access_type").map(|v| v.as_ref()), Some("offline"));
        assert_eq!(pairs.get("prompt").map(|v| v.as_ref()), Some("consent"));
        assert_eq!(pairs.get("state").map(|v| v.as_ref()), Some(ticket.state.as_str()));
        assert_eq!(
            pairs.get("code_challenge_method").map(|v| v.as_ref()),
            Some("S256")
        );
        assert_eq!(
            pairs.get("code_challenge").map(|v| v.to_string()),
            Some(code_challenge_s256(&ticket.pkce_verifier))
        );
        assert!(pairs.get("scope").map(|v| v.contains("gmail.readonly")).unwrap_or(false));
    }

    #[test]
    fn each_ticket_is_unique() {
        let client = test_client();
        let a = client.begin_login().unwrap();
        let b = client.begin_login().unwrap();
        assert_ne!(a.state, b.state);
        assert_ne!(a.pkce_verifier, b.pkce_verifier);
    }

    #[test]
    fn challenge_is_base64url_of_sha256() {
        // RFC 7636 appendix B test vector
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            code_challenge_s256(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }
}
