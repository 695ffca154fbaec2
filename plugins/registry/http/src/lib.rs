//! Confluent-compatible schema registry client.
//!
//! `register` is `POST {url}/subjects/{subject}/versions`; the registry
//! returns the existing id when the same schema is already registered.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use reelz_api::{BackendError, SchemaRegistry};

const CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

/// `[schema_registry]` section when `kind = "http"`.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpRegistryConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5_000
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    schema: &'a str,
}

#[derive(Deserialize)]
struct RegisterResponse {
    id: i32,
}

#[derive(Debug, Deserialize)]
struct RegistryErrorBody {
    #[serde(default)]
    error_code: i32,
    #[serde(default)]
    message: String,
}

/// HTTP status → error kind. 409 is an incompatible schema, 422 an invalid one.
fn classify(status: u16, body: &str) -> BackendError {
    let detail = match serde_json::from_str::<RegistryErrorBody>(body) {
        Ok(e) => format!("{} ({})", e.message, e.error_code),
        Err(_) => body.to_string(),
    };
    let msg = format!("schema registry {status}: {detail}");
    match status {
        401 | 403 => BackendError::config(msg),
        409 | 422 => BackendError::format_err(msg),
        404 => BackendError::not_found(msg),
        408 | 429 | 500..=599 => BackendError::io(msg),
        _ => BackendError::new(msg),
    }
}

pub struct HttpSchemaRegistry {
    http: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpSchemaRegistry {
    pub fn new(config: &HttpRegistryConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| BackendError::config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn versions_url(&self, subject: &str) -> String {
        format!("{}/subjects/{subject}/versions", self.base_url)
    }
}

impl SchemaRegistry for HttpSchemaRegistry {
    fn register<'a>(&'a self, subject: &'a str, schema: &'a str)
        -> Pin<Box<dyn Future<Output = Result<i32, BackendError>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut req = self
                .http
                .post(self.versions_url(subject))
                .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
                .json(&RegisterRequest { schema });
            if let Some(user) = &self.username {
                req = req.basic_auth(user, self.password.as_ref());
            }

            let resp = req
                .send()
                .await
                .map_err(|e| BackendError::io(format!("schema registry request: {e}")))?;
            let status = resp.status();
            let body = resp
                .text()
                .await
                .map_err(|e| BackendError::io(format!("schema registry read: {e}")))?;
            if !status.is_success() {
                return Err(classify(status.as_u16(), &body));
            }

            let parsed: RegisterResponse = serde_json::from_str(&body)
                .map_err(|e| BackendError::format_err(format!("schema registry response: {e}")))?;
            tracing::debug!(%subject, id = parsed.id, "schema registered");
            Ok(parsed.id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelz_api::ErrorKind;

    #[test]
    fn error_statuses() {
        let incompatible = classify(409, r#"{"error_code":409,"message":"Schema being registered is incompatible"}"#);
        assert_eq!(incompatible.kind(), ErrorKind::Format);
        assert!(incompatible.message().contains("incompatible (409)"));

        assert!(classify(503, "upstream down").is_transient());
        assert_eq!(classify(401, "").kind(), ErrorKind::Config);
        assert_eq!(classify(422, "{}").kind(), ErrorKind::Format);
    }

    #[test]
    fn request_body_shape() {
        let body = serde_json::to_value(RegisterRequest { schema: r#"{"type":"string"}"# }).unwrap();
        assert_eq!(body, serde_json::json!({ "schema": "{\"type\":\"string\"}" }));
    }

    #[test]
    fn versions_url_for_subject() {
        let cfg = HttpRegistryConfig {
            url: "http://registry:8081/".into(),
            username: None,
            password: None,
            timeout_ms: 1_000,
        };
        let registry = HttpSchemaRegistry::new(&cfg).unwrap();
        assert_eq!(
            registry.versions_url("media_processing-value"),
            "http://registry:8081/subjects/media_processing-value/versions"
        );
    }
}
