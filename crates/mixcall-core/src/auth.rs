use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;

use crate::config::SessionConfig;
use crate::errors::MixcallError;

/// Short-lived credential authorizing exactly one join.
#[derive(Debug, Clone)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Token {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    room: &'a str,
    username: &'a str,
    role: &'a str,
}

/// Requests a session token from the signaling server.
pub struct TokenClient {
    http: reqwest::Client,
}

impl TokenClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// One `POST {base}createToken/`; the response body is base64-encoded
    /// UTF-8 text holding the token.
    ///
    /// No retry. Transport and server errors surface as `Transport`, an
    /// undecodable body as `Decoding`. An empty server base fails with
    /// `Configuration` before any request is made.
    pub async fn request_token(&self, config: &SessionConfig) -> Result<Token, MixcallError> {
        let base = config.server_base();
        if base.is_empty() {
            return Err(MixcallError::Configuration(
                "server base URL is not set".into(),
            ));
        }

        let url = format!("{base}createToken/");
        let body = TokenRequest {
            room: config.room().unwrap_or(""),
            username: config.username(),
            role: config.role(),
        };

        tracing::info!("requesting token from {url}");

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| MixcallError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(MixcallError::Transport(format!(
                "token endpoint returned status {}",
                resp.status()
            )));
        }

        let raw = resp
            .bytes()
            .await
            .map_err(|e| MixcallError::Transport(e.to_string()))?;

        let decoded = BASE64
            .decode(raw.as_ref())
            .map_err(|e| MixcallError::Decoding(format!("token body is not base64: {e}")))?;
        let token = String::from_utf8(decoded)
            .map_err(|e| MixcallError::Decoding(format!("token is not UTF-8: {e}")))?;

        Ok(Token(token))
    }
}
