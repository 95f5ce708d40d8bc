//! Client for solving services speaking the createTask/getTaskResult protocol.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CaptchaConfig;

use super::{CaptchaResolver, Challenge, ChallengeKind, ResolverError, SolvedChallenge};

/// Remote solving service client.
pub struct TaskApiResolver {
    client: Client,
    api_url: String,
    api_key: String,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskResponse {
    #[serde(default)]
    error_id: i64,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskResultResponse {
    #[serde(default)]
    error_id: i64,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    solution: Option<TaskSolution>,
}

#[derive(Debug, Deserialize, Serialize)]
struct TaskSolution {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    offset: Option<serde_json::Value>,
}

/// State of a submitted task after one poll.
#[derive(Debug, PartialEq, Eq)]
enum TaskPoll {
    Pending,
    Ready(SolvedChallenge),
}

impl TaskApiResolver {
    pub fn new(config: &CaptchaConfig, api_key: String) -> Result<Self, ResolverError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ResolverError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(100)),
        })
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<T, ResolverError> {
        let url = format!("{}/{}", self.api_url, endpoint);
        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ResolverError::Timeout(Duration::from_secs(30))
            } else {
                ResolverError::ConnectionFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolverError::InvalidResponse(format!("HTTP {}", status)));
        }

        response
            .json()
            .await
            .map_err(|e| ResolverError::InvalidResponse(e.to_string()))
    }

    async fn create_task(&self, challenge: &Challenge) -> Result<String, ResolverError> {
        let body = json!({
            "clientKey": self.api_key,
            "task": task_payload(challenge),
        });
        let response: CreateTaskResponse = self.post("createTask", &body).await?;

        if response.error_id != 0 {
            return Err(ResolverError::Rejected(
                response
                    .error_description
                    .unwrap_or_else(|| format!("error id {}", response.error_id)),
            ));
        }
        response
            .task_id
            .ok_or_else(|| ResolverError::InvalidResponse("createTask returned no taskId".into()))
    }

    async fn poll(&self, task_id: &str) -> Result<TaskPoll, ResolverError> {
        let body = json!({ "clientKey": self.api_key, "taskId": task_id });
        let response: TaskResultResponse = self.post("getTaskResult", &body).await?;
        interpret_result(response)
    }
}

fn task_payload(challenge: &Challenge) -> serde_json::Value {
    match challenge.kind {
        ChallengeKind::ImageText => json!({
            "type": "ImageToTextTask",
            "body": challenge.image_base64,
            "websiteURL": challenge.page_url,
        }),
        ChallengeKind::Puzzle => json!({
            "type": "AntiSliderTask",
            "image": challenge.image_base64,
            "websiteURL": challenge.page_url,
        }),
    }
}

fn interpret_result(response: TaskResultResponse) -> Result<TaskPoll, ResolverError> {
    if response.error_id != 0 {
        return Err(ResolverError::Rejected(
            response
                .error_description
                .unwrap_or_else(|| format!("error id {}", response.error_id)),
        ));
    }

    match response.status.as_deref() {
        Some("ready") => {
            let solution = response
                .solution
                .ok_or_else(|| ResolverError::InvalidResponse("ready without solution".into()))?;
            let answer = match (solution.text, solution.offset) {
                (Some(text), _) if !text.is_empty() => text,
                (_, Some(offset)) => offset.to_string(),
                _ => {
                    return Err(ResolverError::InvalidResponse(
                        "solution carries no answer".into(),
                    ))
                }
            };
            Ok(TaskPoll::Ready(SolvedChallenge { answer }))
        }
        Some("idle") | Some("processing") | None => Ok(TaskPoll::Pending),
        Some(other) => Err(ResolverError::InvalidResponse(format!(
            "unknown task status '{}'",
            other
        ))),
    }
}

#[async_trait]
impl CaptchaResolver for TaskApiResolver {
    fn name(&self) -> &str {
        "task-api"
    }

    async fn solve(
        &self,
        challenge: &Challenge,
        timeout: Duration,
    ) -> Result<SolvedChallenge, ResolverError> {
        let deadline = Instant::now() + timeout;

        info!("Submitting {:?} challenge to solver", challenge.kind);
        let task_id = self.create_task(challenge).await?;
        debug!("Solver task created: {}", task_id);

        loop {
            if Instant::now() + self.poll_interval > deadline {
                warn!("Solver task {} timed out after {:?}", task_id, timeout);
                return Err(ResolverError::Timeout(timeout));
            }
            tokio::time::sleep(self.poll_interval).await;

            match self.poll(&task_id).await? {
                TaskPoll::Ready(solved) => {
                    info!("Challenge solved");
                    return Ok(solved);
                }
                TaskPoll::Pending => debug!("Solver task {} still processing", task_id),
            }
        }
    }
}
