//! Integration tests for the interactive surface over a real socket.

mod support;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use support::{FakeExtractor, sample_metadata};
use tempfile::TempDir;
use tokio::net::TcpListener;
use ytgrab_core::web::{self, AppState, DEFAULT_MAX_SESSIONS, FormState};
use ytgrab_core::TransferOptions;

const VIDEO_URL: &str = "https://www.youtube.com/watch?v=abc123";

async fn start_server(extractor: FakeExtractor, directory: &Path) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(
        Arc::new(extractor),
        FormState::with_defaults(directory, TransferOptions::default()),
    );
    tokio::spawn(web::serve(listener, state, std::future::pending()));
    format!("http://{addr}")
}

async fn session_view(client: &reqwest::Client, base: &str, id: &str) -> Value {
    client
        .get(format!("{base}/api/sessions/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn new_session(client: &reqwest::Client, base: &str) -> String {
    let response = client
        .post(format!("{base}/api/sessions"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

async fn post_json(client: &reqwest::Client, url: String, body: Value) -> (u16, Value) {
    let response = client.post(url).json(&body).send().await.unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_formats_lists_catalog_rows() {
    let temp = TempDir::new().unwrap();
    let base = start_server(FakeExtractor::new(sample_metadata("Clip")), temp.path()).await;
    let client = reqwest::Client::new();
    let id = new_session(&client, &base).await;

    let (status, body) = post_json(
        &client,
        format!("{base}/api/sessions/{id}/formats"),
        json!({ "url": VIDEO_URL }),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["title"], "Clip");
    assert_eq!(body["duration"], "03:32");
    assert_eq!(body["views"], "1234567");
    assert_eq!(body["rows"].as_array().unwrap().len(), 5);
    assert_eq!(body["default_selection"], 3);
}

#[tokio::test]
async fn test_formats_rejects_unsupported_url() {
    let temp = TempDir::new().unwrap();
    let extractor = FakeExtractor::new(sample_metadata("Clip"));
    let base = start_server(extractor, temp.path()).await;
    let client = reqwest::Client::new();
    let id = new_session(&client, &base).await;

    let (status, body) = post_json(
        &client,
        format!("{base}/api/sessions/{id}/formats"),
        json!({ "url": "https://vimeo.com/123" }),
    )
    .await;

    assert_eq!(status, 422);
    assert_eq!(body["error"], "unsupported_url");
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .contains("please enter a valid YouTube URL")
    );
}

#[tokio::test]
async fn test_formats_resolution_failure_is_bad_gateway() {
    let temp = TempDir::new().unwrap();
    let extractor = FakeExtractor::new(sample_metadata("Clip")).failing_resolve("Video unavailable");
    let base = start_server(extractor, temp.path()).await;
    let client = reqwest::Client::new();
    let id = new_session(&client, &base).await;

    let (status, body) = post_json(
        &client,
        format!("{base}/api/sessions/{id}/formats"),
        json!({ "url": VIDEO_URL }),
    )
    .await;

    assert_eq!(status, 502);
    assert_eq!(body["error"], "resolution_failure");
    assert!(body["message"].as_str().unwrap().contains("Video unavailable"));

    let session: Value = client
        .get(format!("{base}/api/sessions/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["rows"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_directory_endpoint_creates_missing_directory() {
    let temp = TempDir::new().unwrap();
    let base = start_server(FakeExtractor::new(sample_metadata("Clip")), temp.path()).await;
    let client = reqwest::Client::new();
    let id = new_session(&client, &base).await;
    let target = temp.path().join("videos");

    let (status, body) = post_json(
        &client,
        format!("{base}/api/sessions/{id}/directory"),
        json!({ "directory": target }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["created"], true);
    assert!(target.is_dir());

    let (_, body) = post_json(
        &client,
        format!("{base}/api/sessions/{id}/directory"),
        json!({ "directory": target }),
    )
    .await;
    assert_eq!(body["created"], false);
}

#[tokio::test]
async fn test_directory_endpoint_rejects_file_path() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("not-a-dir");
    fs::write(&file, b"x").unwrap();
    let base = start_server(FakeExtractor::new(sample_metadata("Clip")), temp.path()).await;
    let client = reqwest::Client::new();
    let id = new_session(&client, &base).await;

    let (status, body) = post_json(
        &client,
        format!("{base}/api/sessions/{id}/directory"),
        json!({ "directory": file }),
    )
    .await;

    assert_eq!(status, 400);
    assert_eq!(body["error"], "directory_creation_failure");
}

#[tokio::test]
async fn test_download_completes_and_progress_reaches_processing() {
    let temp = TempDir::new().unwrap();
    let base = start_server(FakeExtractor::new(sample_metadata("Clip")), temp.path()).await;
    let client = reqwest::Client::new();
    let id = new_session(&client, &base).await;

    let (status, body) = post_json(
        &client,
        format!("{base}/api/sessions/{id}/download"),
        json!({ "url": VIDEO_URL }),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["status"], "completed");
    assert!(temp.path().join("Clip.mp4").is_file());

    let progress: Value = client
        .get(format!("{base}/api/sessions/{id}/progress"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(progress["busy"], false);
    assert_eq!(progress["percent"], "100.0%");
    assert_eq!(progress["status"], "Download complete, now processing...");
}

#[tokio::test]
async fn test_collision_prompt_then_rename_resumes_from_session() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("Clip.mp4"), b"original").unwrap();
    let base = start_server(FakeExtractor::new(sample_metadata("Clip")), temp.path()).await;
    let client = reqwest::Client::new();
    let id = new_session(&client, &base).await;
    let download_url = format!("{base}/api/sessions/{id}/download");

    let (status, body) = post_json(&client, download_url.clone(), json!({ "url": VIDEO_URL })).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "collision");
    let choices: Vec<&str> = body["choices"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["value"].as_str().unwrap())
        .collect();
    assert_eq!(choices, vec!["redownload", "new_name", "skip"]);

    let session: Value = client
        .get(format!("{base}/api/sessions/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(session["collision"].is_object());

    let (status, body) = post_json(
        &client,
        download_url,
        json!({ "url": VIDEO_URL, "decision": "new_name" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "completed");
    let path = body["path"].as_str().unwrap();
    assert!(path.contains("Clip_"));
    assert_eq!(fs::read(temp.path().join("Clip.mp4")).unwrap(), b"original");
}

#[tokio::test]
async fn test_collision_skip_keeps_existing_file() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("Clip.mp4"), b"original").unwrap();
    let base = start_server(FakeExtractor::new(sample_metadata("Clip")), temp.path()).await;
    let client = reqwest::Client::new();
    let id = new_session(&client, &base).await;
    let download_url = format!("{base}/api/sessions/{id}/download");

    let (_, body) = post_json(&client, download_url.clone(), json!({ "url": VIDEO_URL })).await;
    assert_eq!(body["status"], "collision");

    let (status, body) = post_json(
        &client,
        download_url,
        json!({ "url": VIDEO_URL, "decision": "skip" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "skipped");
    assert_eq!(fs::read(temp.path().join("Clip.mp4")).unwrap(), b"original");
    let entries = fs::read_dir(temp.path()).unwrap().count();
    assert_eq!(entries, 1);
}

#[tokio::test]
async fn test_force_overwrites_without_prompt() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("Clip.mp4"), b"original").unwrap();
    let base = start_server(FakeExtractor::new(sample_metadata("Clip")), temp.path()).await;
    let client = reqwest::Client::new();
    let id = new_session(&client, &base).await;

    let (status, body) = post_json(
        &client,
        format!("{base}/api/sessions/{id}/download"),
        json!({ "url": VIDEO_URL, "force": true }),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["status"], "completed");
    assert_eq!(
        fs::read(temp.path().join("Clip.mp4")).unwrap(),
        b"fake video payload"
    );
}

#[tokio::test]
async fn test_download_failure_reports_collaborator_message() {
    let temp = TempDir::new().unwrap();
    let extractor =
        FakeExtractor::new(sample_metadata("Clip")).failing_transfer("ERROR: unable to merge");
    let base = start_server(extractor, temp.path()).await;
    let client = reqwest::Client::new();
    let id = new_session(&client, &base).await;

    let (status, body) = post_json(
        &client,
        format!("{base}/api/sessions/{id}/download"),
        json!({ "url": VIDEO_URL }),
    )
    .await;

    assert_eq!(status, 502);
    assert_eq!(body["error"], "download_failure");
    assert!(body["message"].as_str().unwrap().contains("unable to merge"));

    let progress: Value = client
        .get(format!("{base}/api/sessions/{id}/progress"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(progress["busy"], false, "busy flag is released after failure");
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let temp = TempDir::new().unwrap();
    let base = start_server(FakeExtractor::new(sample_metadata("Clip")), temp.path()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/api/sessions/does-not-exist/progress"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "session_not_found");
}

#[tokio::test]
async fn test_transfer_survives_client_disconnect() {
    let temp = TempDir::new().unwrap();
    let extractor =
        FakeExtractor::new(sample_metadata("Clip")).with_delay(Duration::from_millis(600));
    let base = start_server(extractor, temp.path()).await;
    let client = reqwest::Client::new();
    let id = new_session(&client, &base).await;

    let impatient = reqwest::Client::builder()
        .timeout(Duration::from_millis(150))
        .build()
        .unwrap();
    let result = impatient
        .post(format!("{base}/api/sessions/{id}/download"))
        .json(&json!({ "url": VIDEO_URL }))
        .send()
        .await;
    assert!(result.is_err(), "request should time out mid-transfer");

    let (status, body) = post_json(
        &client,
        format!("{base}/api/sessions/{id}/download"),
        json!({ "url": VIDEO_URL }),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"], "busy");

    let mut session = session_view(&client, &base, &id).await;
    for _ in 0..50 {
        if session["busy"] == false {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        session = session_view(&client, &base, &id).await;
    }

    assert_eq!(session["busy"], false);
    assert_eq!(session["last_outcome"]["status"], "completed");
    assert!(temp.path().join("Clip.mp4").is_file());
}

#[tokio::test]
async fn test_unprompted_decision_does_not_overwrite() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("Clip.mp4"), b"original").unwrap();
    let base = start_server(FakeExtractor::new(sample_metadata("Clip")), temp.path()).await;
    let client = reqwest::Client::new();
    let id = new_session(&client, &base).await;

    let (status, body) = post_json(
        &client,
        format!("{base}/api/sessions/{id}/download"),
        json!({ "url": VIDEO_URL, "decision": "redownload" }),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["status"], "collision");
    assert_eq!(fs::read(temp.path().join("Clip.mp4")).unwrap(), b"original");
}

#[tokio::test]
async fn test_decision_request_reuses_remembered_selection() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("Clip.m4a"), b"original").unwrap();
    let extractor = FakeExtractor::new(sample_metadata("Clip")).writing("m4a");
    let base = start_server(extractor, temp.path()).await;
    let client = reqwest::Client::new();
    let id = new_session(&client, &base).await;
    let download_url = format!("{base}/api/sessions/{id}/download");

    // index 2 is the audio-only m4a stream
    let (_, body) = post_json(
        &client,
        download_url.clone(),
        json!({ "url": VIDEO_URL, "selection": 2 }),
    )
    .await;
    assert_eq!(body["status"], "collision");

    let (status, body) = post_json(
        &client,
        download_url,
        json!({ "url": VIDEO_URL, "decision": "new_name" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "completed");
    let path = body["path"].as_str().unwrap();
    assert!(path.contains("Clip_"));
    assert!(path.ends_with(".m4a"));
}

#[tokio::test]
async fn test_session_map_stays_bounded() {
    let temp = TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let state = AppState::new(
        Arc::new(FakeExtractor::new(sample_metadata("Clip"))),
        FormState::with_defaults(temp.path(), TransferOptions::default()),
    );
    let store = Arc::clone(&state.store);
    tokio::spawn(web::serve(listener, state, std::future::pending()));
    let client = reqwest::Client::new();

    for _ in 0..DEFAULT_MAX_SESSIONS + 100 {
        new_session(&client, &base).await;
    }

    assert_eq!(store.len(), DEFAULT_MAX_SESSIONS);
}
