use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::PollerConfig,
    errors::AppError,
    providers::registry::{Provider, ProviderRegistry},
};

/// Handle to a provider-side long-running video-generation job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskHandle {
    pub task_id: String,
    pub provider: Provider,
    pub created_at: DateTime<Utc>,
}

impl TaskHandle {
    /// Project a video-creation response (`{id, status, ...}`) into a handle.
    pub fn from_creation_response(provider: Provider, body: &Value) -> Result<Self, AppError> {
        let task_id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::internal("Video task response carried no task id"))?
            .to_string();

        Ok(Self {
            task_id,
            provider,
            created_at: Utc::now(),
        })
    }
}

/// Upstream task lifecycle. Transitions are monotonic: once a terminal
/// state is reached no further transition is valid.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn parse(status: &str) -> Option<Self> {
        match status {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// Media metadata a finished task may report alongside its video URL.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct VideoMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

/// Raw task-status payload as the Ark endpoint reports it.
#[derive(Deserialize, Debug, Clone)]
pub struct TaskSnapshot {
    #[serde(default)]
    pub id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub content: Option<TaskContent>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub video_params: Option<Value>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TaskContent {
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub video_parameters: Option<Value>,
}

impl TaskSnapshot {
    /// Human-readable detail from the upstream error payload, which may be
    /// a `{code, message}` object or a bare string.
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(Value::String(s)) => s.clone(),
            Some(value) => value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
            None => "Task failed without error detail".to_string(),
        }
    }
}

/// Events emitted while driving a task to completion. A poll run emits any
/// number of `Progress` events followed by exactly one terminal event.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Progress { state: TaskState, elapsed_secs: u64 },
    Succeeded { video_url: String, meta: Option<VideoMeta> },
    Failed { error: String },
}

impl TaskEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

/// Fixed-interval poller for one video-generation task.
///
/// Decoupled from the request that created the task: cancelling the
/// original HTTP call does not stop an already-started poll loop, only a
/// terminal status, a poll failure, or the attempts guard does. Any
/// transport or parse error fails the loop immediately; there is no retry
/// past a single bad poll.
pub struct TaskPoller {
    client: reqwest::Client,
    status_url: String,
    api_key: String,
    interval: Duration,
    max_attempts: u32,
}

struct PollLoop {
    poller: TaskPoller,
    attempts: u32,
    started: Instant,
    finished: bool,
}

impl TaskPoller {
    pub fn new(
        client: reqwest::Client,
        registry: &ProviderRegistry,
        handle: &TaskHandle,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            status_url: registry.task_status_url(&handle.task_id),
            api_key: api_key.into(),
            interval: Duration::from_secs(2),
            max_attempts: 900,
        }
    }

    pub fn with_config(self, config: &PollerConfig) -> Self {
        self.with_interval(Duration::from_secs(config.interval_seconds))
            .with_max_attempts(config.max_attempts)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Guard against a task that never leaves `running`; exceeding the
    /// budget is a terminal failure.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Poll until a terminal state. The stream ends after its single
    /// terminal event.
    pub fn events(self) -> impl Stream<Item = TaskEvent> + Send {
        let state = PollLoop {
            poller: self,
            attempts: 0,
            started: Instant::now(),
            finished: false,
        };

        futures::stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }

            state.attempts += 1;
            if state.attempts > state.poller.max_attempts {
                state.finished = true;
                let error = format!(
                    "Task did not reach a terminal state within {} polls",
                    state.poller.max_attempts
                );
                tracing::warn!(%error, "giving up on video task");
                return Some((TaskEvent::Failed { error }, state));
            }

            tokio::time::sleep(state.poller.interval).await;

            let event = match state.poller.poll_once().await {
                Ok(snapshot) => event_for(&snapshot, state.started.elapsed().as_secs()),
                Err(e) => TaskEvent::Failed {
                    error: e.to_string(),
                },
            };

            if event.is_terminal() {
                state.finished = true;
            }
            Some((event, state))
        })
    }

    /// Convenience wrapper: drive the poll loop and return its terminal
    /// event, discarding progress updates.
    pub async fn run_to_terminal(self) -> TaskEvent {
        use futures::StreamExt;

        let stream = self
            .events()
            .filter(|e| futures::future::ready(e.is_terminal()));
        let mut stream = std::pin::pin!(stream);
        let terminal = stream.next().await;

        terminal.unwrap_or(TaskEvent::Failed {
            error: "Poll loop ended without a terminal event".to_string(),
        })
    }

    async fn poll_once(&self) -> Result<TaskSnapshot, AppError> {
        let response = self
            .client
            .get(&self.status_url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| AppError::TaskPoll(format!("Transport error while polling task: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::TaskPoll(format!(
                "Task status endpoint returned {}: {}",
                status, body
            )));
        }

        response
            .json::<TaskSnapshot>()
            .await
            .map_err(|e| AppError::TaskPoll(format!("Failed to parse task status: {}", e)))
    }
}

fn event_for(snapshot: &TaskSnapshot, elapsed_secs: u64) -> TaskEvent {
    let Some(state) = TaskState::parse(&snapshot.status) else {
        return TaskEvent::Failed {
            error: format!("Unknown task status '{}'", snapshot.status),
        };
    };

    match state {
        TaskState::Queued | TaskState::Running => TaskEvent::Progress {
            state,
            elapsed_secs,
        },
        TaskState::Succeeded => {
            let content = snapshot.content.as_ref();
            TaskEvent::Succeeded {
                video_url: content
                    .and_then(|c| c.video_url.clone())
                    .unwrap_or_default(),
                meta: content
                    .and_then(|c| c.video_parameters.clone())
                    .and_then(|v| serde_json::from_value(v).ok()),
            }
        }
        TaskState::Failed => TaskEvent::Failed {
            error: snapshot.error_message(),
        },
    }
}
