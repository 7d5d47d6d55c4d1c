//! OAuth identity provider exchange.
//!
//! The provider itself is an external service; this module only knows how to
//! send the user there and how to turn the callback's authorization code into
//! a verified identity.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

pub const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

const OAUTH_SCOPE: &str = "openid email profile";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("identity provider is not configured")]
    NotConfigured,
    #[error("identity provider request failed: {0}")]
    Http(String),
    #[error("identity provider rejected the code: {0}")]
    Rejected(String),
    #[error("malformed identity provider response: {0}")]
    Malformed(String),
}

/// Who the provider says completed the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderIdentity {
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
}

impl ProviderIdentity {
    /// The email, unless the provider explicitly marked it unverified.
    pub fn verified_email(&self) -> Option<&str> {
        match self.email_verified {
            Some(false) => None,
            _ => self.email.as_deref().filter(|e| !e.trim().is_empty()),
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser to start a sign-in.
    fn authorize_url(&self, redirect_uri: &str) -> Result<String, ProviderError>;

    /// Exchange an authorization code for the identity behind it.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<ProviderIdentity, ProviderError>;
}

/// Client credentials and endpoints for an OAuth 2 / OpenID provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

impl OAuthSettings {
    /// Google endpoints with the given client credentials.
    pub fn google(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorize_url: GOOGLE_AUTHORIZE_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Authorization-code exchange against a real provider over HTTPS.
/// `None` settings leave sign-in disabled.
pub struct OAuthProvider {
    settings: Option<OAuthSettings>,
}

impl OAuthProvider {
    pub fn new(settings: Option<OAuthSettings>) -> Self {
        Self { settings }
    }

    fn settings(&self) -> Result<&OAuthSettings, ProviderError> {
        self.settings.as_ref().ok_or(ProviderError::NotConfigured)
    }
}

#[async_trait]
impl IdentityProvider for OAuthProvider {
    fn authorize_url(&self, redirect_uri: &str) -> Result<String, ProviderError> {
        let s = self.settings()?;
        let url = url::Url::parse_with_params(
            &s.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", s.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", OAUTH_SCOPE),
            ],
        )
        .map_err(|e| ProviderError::Malformed(format!("authorize url: {e}")))?;
        Ok(url.into())
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<ProviderIdentity, ProviderError> {
        let settings = self.settings()?.clone();
        let code = code.to_string();
        let redirect_uri = redirect_uri.to_string();
        tokio::task::spawn_blocking(move || exchange_blocking(&settings, &code, &redirect_uri))
            .await
            .map_err(|e| ProviderError::Http(format!("exchange task failed: {e}")))?
    }
}

fn exchange_blocking(
    s: &OAuthSettings,
    code: &str,
    redirect_uri: &str,
) -> Result<ProviderIdentity, ProviderError> {
    let resp = ureq::post(&s.token_url).send_form(&[
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", s.client_id.as_str()),
        ("client_secret", s.client_secret.as_str()),
    ]);
    let token: TokenResponse = match resp {
        Ok(r) => r
            .into_json()
            .map_err(|e| ProviderError::Malformed(format!("token response: {e}")))?,
        Err(ureq::Error::Status(code, r)) => {
            let body: Option<TokenResponse> = r.into_json().ok();
            let reason = body
                .and_then(|b| b.error_description.or(b.error))
                .unwrap_or_else(|| format!("status {code}"));
            return Err(ProviderError::Rejected(reason));
        }
        Err(e) => return Err(ProviderError::Http(e.to_string())),
    };

    let access_token = match token.access_token {
        Some(t) if !t.is_empty() => t,
        _ => {
            let reason = token
                .error_description
                .or(token.error)
                .unwrap_or_else(|| "no access token".to_string());
            return Err(ProviderError::Rejected(reason));
        }
    };

    ureq::get(&s.userinfo_url)
        .set("Authorization", &format!("Bearer {access_token}"))
        .call()
        .map_err(|e| ProviderError::Http(format!("userinfo: {e}")))?
        .into_json::<ProviderIdentity>()
        .map_err(|e| ProviderError::Malformed(format!("userinfo: {e}")))
}
