use std::time::Duration;

use chat_proxy::{
    config::EndpointOverrides,
    providers::{Provider, ProviderRegistry, TaskEvent, TaskHandle, TaskPoller, TaskState},
};
use futures::stream::StreamExt;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

/// Tests for the video task poller state machine.

const TASK_PATH: &str = "/api/v3/contents/generations/tasks/cgt-test-1";

fn poller_for(server: &MockServer) -> TaskPoller {
    let overrides = EndpointOverrides {
        doubao: Some(server.uri()),
        ..Default::default()
    };
    let registry = ProviderRegistry::new(&overrides);
    let handle = TaskHandle {
        task_id: "cgt-test-1".to_string(),
        provider: Provider::Doubao,
        created_at: chrono::Utc::now(),
    };

    TaskPoller::new(reqwest::Client::new(), &registry, &handle, "test-api-key")
        .with_interval(Duration::from_millis(10))
}

fn status_body(status: &str) -> serde_json::Value {
    json!({"id": "cgt-test-1", "status": status})
}

#[tokio::test]
async fn polls_through_queued_running_to_success() {
    let server = MockServer::start().await;

    // One queued poll, one running poll, then success.
    Mock::given(method("GET"))
        .and(path(TASK_PATH))
        .and(header("authorization", "Bearer test-api-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("queued")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TASK_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("running")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TASK_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cgt-test-1",
            "status": "succeeded",
            "content": {"video_url": "https://x/y.mp4"}
        })))
        .mount(&server)
        .await;

    let events: Vec<TaskEvent> = poller_for(&server).events().collect().await;

    assert_eq!(events.len(), 3);
    assert!(matches!(
        events[0],
        TaskEvent::Progress {
            state: TaskState::Queued,
            ..
        }
    ));
    assert!(matches!(
        events[1],
        TaskEvent::Progress {
            state: TaskState::Running,
            ..
        }
    ));
    match &events[2] {
        TaskEvent::Succeeded { video_url, .. } => assert_eq!(video_url, "https://x/y.mp4"),
        other => panic!("expected terminal success, got {:?}", other),
    }

    // Exactly one terminal event, and the stream stopped after it
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn success_carries_media_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TASK_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cgt-test-1",
            "status": "succeeded",
            "content": {
                "video_url": "https://x/y.mp4",
                "video_parameters": {"duration": 5, "fps": 24, "resolution": "720p"}
            }
        })))
        .mount(&server)
        .await;

    match poller_for(&server).run_to_terminal().await {
        TaskEvent::Succeeded { meta, .. } => {
            let meta = meta.unwrap();
            assert_eq!(meta.duration, Some(5));
            assert_eq!(meta.fps, Some(24));
            assert_eq!(meta.resolution.as_deref(), Some("720p"));
        }
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn failed_task_stops_after_one_terminal_event() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TASK_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cgt-test-1",
            "status": "failed",
            "error": {"code": "OutputVideoSensitiveContentDetected", "message": "nsfw content detected"}
        })))
        .mount(&server)
        .await;

    let events: Vec<TaskEvent> = poller_for(&server).events().collect().await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        TaskEvent::Failed { error } => assert!(error.contains("nsfw content detected")),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn upstream_http_error_fails_the_loop_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TASK_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("ark exploded"))
        .expect(1)
        .mount(&server)
        .await;

    let events: Vec<TaskEvent> = poller_for(&server).events().collect().await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        TaskEvent::Failed { error } => {
            assert!(error.contains("500"));
            assert!(error.contains("ark exploded"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn malformed_status_payload_fails_the_loop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TASK_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let events: Vec<TaskEvent> = poller_for(&server).events().collect().await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], TaskEvent::Failed { .. }));
}

#[tokio::test]
async fn attempts_guard_bounds_a_task_stuck_in_running() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TASK_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("running")))
        .mount(&server)
        .await;

    let events: Vec<TaskEvent> = poller_for(&server)
        .with_max_attempts(2)
        .events()
        .collect()
        .await;

    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], TaskEvent::Progress { .. }));
    assert!(matches!(events[1], TaskEvent::Progress { .. }));
    match &events[2] {
        TaskEvent::Failed { error } => assert!(error.contains("2 polls")),
        other => panic!("expected failure, got {:?}", other),
    }
}
