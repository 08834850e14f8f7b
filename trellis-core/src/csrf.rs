//! CSRF protection stage.
//!
//! Double-submit scheme: the token lives in a signed cookie and every
//! unsafe request (POST, PUT, PATCH, DELETE) must echo it back through the
//! configured header or a form/JSON field of the same name as the cookie.
//! Safe requests without a valid cookie get a fresh token, set as a cookie
//! on the way back and exposed to resources through `tweaks.csrf_token`.

use crate::application::Application;
use crate::chain::{Handler, Outcome};
use crate::error::{Result, SecurityError};
use crate::http::{Request, Response};
use crate::logging::{debug, warn};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use trellis_config::{ConfigError, Settings};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_TTL_KEY: &str = "tangled.app.csrf.token_ttl";

/// Upper bound for `tangled.app.csrf.token_ttl`: one year
pub const MAX_TOKEN_TTL: i64 = 365 * 24 * 60 * 60;

/// A random token with an expiry
#[derive(Debug, Clone, PartialEq)]
pub struct CsrfToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl CsrfToken {
    pub fn generate(ttl_seconds: i64) -> std::result::Result<Self, SecurityError> {
        let expires_at = Duration::try_seconds(ttl_seconds)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| SecurityError::InvalidToken(format!("token lifetime out of range: {}s", ttl_seconds)))?;

        let mut rng = rand::thread_rng();
        let random_bytes: [u8; 32] = rng.r#gen();

        Ok(Self {
            value: URL_SAFE_NO_PAD.encode(random_bytes),
            expires_at,
        })
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Encode to `payload.signature`, both URL-safe base64
    pub fn encode(&self, secret: &[u8]) -> std::result::Result<String, SecurityError> {
        let payload = URL_SAFE_NO_PAD.encode(format!("{}:{}", self.value, self.expires_at.timestamp()));
        let signature = URL_SAFE_NO_PAD.encode(mac(secret, &payload)?.finalize().into_bytes());
        Ok(format!("{}.{}", payload, signature))
    }

    /// Verify the signature and expiry of an encoded token
    pub fn decode(encoded: &str, secret: &[u8]) -> std::result::Result<Self, SecurityError> {
        let invalid = |detail: &str| SecurityError::InvalidToken(detail.to_string());

        let (payload, signature) = encoded.split_once('.').ok_or_else(|| invalid("malformed"))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| invalid("bad signature encoding"))?;
        mac(secret, payload)?
            .verify_slice(&signature)
            .map_err(|_| invalid("bad signature"))?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| invalid("bad payload"))?;
        let (value, expires) = payload.rsplit_once(':').ok_or_else(|| invalid("bad payload"))?;
        let expires_at = expires
            .parse::<i64>()
            .ok()
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .ok_or_else(|| invalid("bad expiry"))?;

        let token = Self {
            value: value.to_string(),
            expires_at,
        };
        if token.is_expired() {
            return Err(SecurityError::TokenExpired);
        }
        Ok(token)
    }
}

fn mac(secret: &[u8], payload: &str) -> std::result::Result<HmacSha256, SecurityError> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| SecurityError::InvalidToken(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// CSRF settings read from `tangled.app.csrf.*`
#[derive(Clone)]
pub struct CsrfConfig {
    pub enabled: bool,
    /// Cookie and form field name
    pub token_name: String,
    pub header_name: String,
    pub token_ttl: i64,
    secret: Vec<u8>,
}

impl CsrfConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let secret = match settings.get_opt_str("tangled.app.csrf.secret")? {
            Some(secret) if !secret.is_empty() => secret.as_bytes().to_vec(),
            _ => Self::generate_secret(),
        };

        Ok(Self {
            enabled: settings.app_bool("csrf.enabled")?,
            token_name: settings.app_str("csrf.token")?.to_string(),
            header_name: settings.app_str("csrf.header")?.to_string(),
            token_ttl: Self::token_ttl(settings)?,
            secret,
        })
    }

    fn token_ttl(settings: &Settings) -> Result<i64> {
        let ttl = settings.get_int(TOKEN_TTL_KEY)?;
        if !(1..=MAX_TOKEN_TTL).contains(&ttl) {
            return Err(ConfigError::invalid(TOKEN_TTL_KEY, "seconds between 1 and 31536000", ttl).into());
        }
        Ok(ttl)
    }

    /// 32 random bytes, used when no secret is configured
    pub fn generate_secret() -> Vec<u8> {
        let mut rng = rand::thread_rng();
        (0..32).map(|_| rng.r#gen::<u8>()).collect()
    }

    pub fn mint(&self) -> std::result::Result<String, SecurityError> {
        CsrfToken::generate(self.token_ttl)?.encode(&self.secret)
    }

    /// Check an unsafe request, returning the token in effect
    pub fn validate_request(&self, request: &Request) -> std::result::Result<String, SecurityError> {
        let cookie = request
            .cookie(&self.token_name)
            .ok_or(SecurityError::MissingCookie)?;
        CsrfToken::decode(&cookie, &self.secret)?;

        let submitted = self
            .token_from_header(request)
            .or_else(|| self.token_from_body(request))
            .ok_or(SecurityError::MissingToken)?;

        if submitted != cookie {
            return Err(SecurityError::TokenMismatch);
        }
        Ok(cookie)
    }

    fn token_from_header(&self, request: &Request) -> Option<String> {
        request
            .header(&self.header_name)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn token_from_body(&self, request: &Request) -> Option<String> {
        if request.is_json() {
            let body: serde_json::Value = request.json().ok()?;
            return body.get(&self.token_name)?.as_str().map(str::to_string);
        }
        request.form_param(&self.token_name)
    }

    fn cookie_header(&self, token: &str) -> String {
        format!("{}={}; Path=/; SameSite=Lax", self.token_name, token)
    }
}

impl std::fmt::Debug for CsrfConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfConfig")
            .field("enabled", &self.enabled)
            .field("token_name", &self.token_name)
            .field("header_name", &self.header_name)
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}

/// The `csrf` system stage
#[derive(Debug, Clone, Copy, Default)]
pub struct CsrfHandler;

#[async_trait]
impl Handler for CsrfHandler {
    async fn handle(&self, app: &Application, request: &mut Request) -> Outcome {
        let config = app.csrf();
        if !config.enabled {
            return Outcome::Continue;
        }

        if request.method.is_unsafe() {
            return match config.validate_request(request) {
                Ok(token) => {
                    request.tweaks.csrf_token = Some(token);
                    Outcome::Continue
                }
                Err(error) => {
                    warn!(
                        request_id = request.request_id(),
                        method = %request.method,
                        path = %request.path,
                        error = %error,
                        "CSRF check failed"
                    );
                    Outcome::Halt(Response::forbidden().with_text(format!("Forbidden: {}", error)))
                }
            };
        }

        let existing = request
            .cookie(&config.token_name)
            .filter(|cookie| CsrfToken::decode(cookie, &config.secret).is_ok());
        match existing {
            Some(token) => request.tweaks.csrf_token = Some(token),
            None => match config.mint() {
                Ok(token) => {
                    debug!(request_id = request.request_id(), "Minted CSRF token");
                    request.tweaks.csrf_token = Some(token);
                    request.tweaks.csrf_token_minted = true;
                }
                Err(error) => return Outcome::Fail(error.into()),
            },
        }
        Outcome::Continue
    }

    async fn on_response(&self, app: &Application, request: &mut Request, mut response: Response) -> Result<Response> {
        if request.tweaks.csrf_token_minted {
            if let Some(token) = &request.tweaks.csrf_token {
                response.set_header("Set-Cookie", app.csrf().cookie_header(token));
            }
        }
        Ok(response)
    }
}
