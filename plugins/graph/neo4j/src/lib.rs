//! Neo4j follow graph over the HTTP transactional endpoint
//! (`POST {url}/db/{database}/tx/commit`).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use uuid::Uuid;

use reelz_api::{
    BackendError, FollowedAuthor, GraphCandidateSource, PostId, RecentPost, UserId,
};

const CYPHER_FOLLOWED: &str = include_str!("../cypher/followed.cypher");
const CYPHER_RECENT_POSTS: &str = include_str!("../cypher/recent_posts.cypher");

/// `[graph]` section when `kind = "neo4j"`.
#[derive(Debug, Clone, Deserialize)]
pub struct Neo4jConfig {
    /// e.g. `http://localhost:7474`
    pub url: String,
    #[serde(default = "default_database")]
    pub database: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_database() -> String {
    "neo4j".to_string()
}

fn default_timeout_ms() -> u64 {
    5_000
}

// ════════════════════════════════════════════════════════════════
//  Wire format
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

/// `Neo.TransientError.*` можно повторить, остальное нет.
fn classify(err: &TxError) -> BackendError {
    let msg = format!("{}: {}", err.code, err.message);
    if err.code.starts_with("Neo.TransientError.") {
        BackendError::io(msg)
    } else if err.code.starts_with("Neo.ClientError.Security.") {
        BackendError::config(msg)
    } else if err.code.starts_with("Neo.ClientError.") {
        BackendError::format_err(msg)
    } else {
        BackendError::new(msg)
    }
}

/// Rows of the first statement, each row decoded as a tuple.
fn decode_rows<T: DeserializeOwned>(resp: TxResponse) -> Result<Vec<T>, BackendError> {
    if let Some(err) = resp.errors.first() {
        return Err(classify(err));
    }
    let Some(result) = resp.results.into_iter().next() else {
        return Ok(Vec::new());
    };
    result
        .data
        .into_iter()
        .map(|r| {
            serde_json::from_value(Value::Array(r.row))
                .map_err(|e| BackendError::format_err(format!("neo4j row: {e}")))
        })
        .collect()
}

fn to_followed(rows: Vec<(Uuid, f64)>) -> Vec<FollowedAuthor> {
    rows.into_iter()
        .map(|(id, weight)| FollowedAuthor { user_id: UserId(id), weight })
        .collect()
}

fn to_recent(rows: Vec<(Uuid, Uuid, i64)>) -> Result<Vec<RecentPost>, BackendError> {
    rows.into_iter()
        .map(|(post, author, ms)| {
            let created_at = DateTime::<Utc>::from_timestamp_millis(ms)
                .ok_or_else(|| BackendError::format_err(format!("createdAt out of range: {ms}")))?;
            Ok(RecentPost { post_id: PostId(post), author_id: UserId(author), created_at })
        })
        .collect()
}

// ════════════════════════════════════════════════════════════════
//  Neo4jGraph
// ════════════════════════════════════════════════════════════════

pub struct Neo4jGraph {
    http: reqwest::Client,
    endpoint: String,
    user: String,
    password: String,
}

impl Neo4jGraph {
    pub fn new(config: &Neo4jConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| BackendError::config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: format!("{}/db/{}/tx/commit", config.url.trim_end_matches('/'), config.database),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    async fn run(&self, statement: &str, parameters: Value) -> Result<TxResponse, BackendError> {
        let body = json!({ "statements": [{ "statement": statement, "parameters": parameters }] });
        let resp = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::io(format!("neo4j request: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(BackendError::config(format!("neo4j auth rejected: {status}")));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::io(format!("neo4j {status}: {text}")));
        }
        resp.json::<TxResponse>()
            .await
            .map_err(|e| BackendError::format_err(format!("neo4j response: {e}")))
    }

    async fn fetch_followed(&self, user: UserId) -> Result<Vec<FollowedAuthor>, BackendError> {
        let resp = self.run(CYPHER_FOLLOWED, json!({ "userId": user.to_string() })).await?;
        Ok(to_followed(decode_rows(resp)?))
    }
}

impl GraphCandidateSource for Neo4jGraph {
    // Верхняя доля выбирается на клиенте (`select_top_followed`):
    // LIMIT ceil(n * f) в Cypher даёт 4 для 30 × 0.1.
    fn followed(&self, user: UserId)
        -> Pin<Box<dyn Future<Output = Result<Vec<FollowedAuthor>, BackendError>> + Send + '_>>
    {
        Box::pin(self.fetch_followed(user))
    }

    fn recent_posts_by_authors<'a>(
        &'a self,
        authors: &'a [UserId],
        since: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecentPost>, BackendError>> + Send + 'a>> {
        Box::pin(async move {
            if authors.is_empty() {
                return Ok(Vec::new());
            }
            let ids: Vec<String> = authors.iter().map(|a| a.to_string()).collect();
            let params = json!({ "authorIds": ids, "sinceMs": since.timestamp_millis() });
            let resp = self.run(CYPHER_RECENT_POSTS, params).await?;
            let posts = to_recent(decode_rows(resp)?)?;
            tracing::debug!(authors = authors.len(), posts = posts.len(), "neo4j recent posts");
            Ok(posts)
        })
    }
}
