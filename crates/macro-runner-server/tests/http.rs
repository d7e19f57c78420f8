//! HTTP surface tests against a scripted executor. No Excel involved.

use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use excel_macro_runner::{CellValue, MacroError};
use macro_runner_server::{router, MacroExecutor, MacroService, ServerConfig};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

const BOUNDARY: &str = "macro-runner-test-boundary";

/// Behaves like a macro that writes 42 to C2 and marks the file.
#[derive(Default)]
struct ScriptedExecutor {
    seen: Mutex<Vec<PathBuf>>,
    running: AtomicUsize,
    peak: AtomicUsize,
    hold: Option<Duration>,
}

impl MacroExecutor for ScriptedExecutor {
    fn run(&self, path: &Path, macro_name: &str) -> Result<CellValue, MacroError> {
        self.seen.lock().unwrap().push(path.to_path_buf());

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(hold) = self.hold {
            std::thread::sleep(hold);
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if !path.exists() {
            return Err(MacroError::FileNotFound(path.to_path_buf()));
        }
        match macro_name {
            "Module1.Missing" => Err(MacroError::MacroNotFound(format!(
                "Cannot run the macro '{macro_name}'."
            ))),
            "Module1.Explode" => Err(MacroError::MacroFailed("Division by zero".into())),
            _ => {
                let mut file = std::fs::OpenOptions::new()
                    .append(true)
                    .open(path)
                    .map_err(|e| MacroError::SaveFailed(e.to_string()))?;
                write!(file, "|ran {macro_name}")
                    .map_err(|e| MacroError::SaveFailed(e.to_string()))?;
                Ok(CellValue::from(42.0))
            }
        }
    }
}

struct Harness {
    app: Router,
    executor: Arc<ScriptedExecutor>,
    work_dir: tempfile::TempDir,
}

fn harness_with(executor: ScriptedExecutor, tweak: impl FnOnce(&mut ServerConfig)) -> Harness {
    let work_dir = tempfile::tempdir().unwrap();
    let mut config = ServerConfig {
        work_dir: work_dir.path().to_path_buf(),
        ..ServerConfig::default()
    };
    tweak(&mut config);

    let executor = Arc::new(executor);
    let service = Arc::new(MacroService::new(executor.clone(), &config));
    Harness {
        app: router(service, config.max_upload_bytes),
        executor,
        work_dir,
    }
}

fn harness() -> Harness {
    harness_with(ScriptedExecutor::default(), |_| {})
}

fn json_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart_request(file: Option<(&str, &[u8])>, macro_name: Option<&str>) -> Request<Body> {
    let mut body = Vec::new();
    if let Some((filename, contents)) = file {
        write!(
            body,
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .unwrap();
        body.extend_from_slice(contents);
        body.extend_from_slice(b"\r\n");
    }
    if let Some(macro_name) = macro_name {
        write!(
            body,
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"macro_name\"\r\n\r\n{macro_name}\r\n"
        )
        .unwrap();
    }
    write!(body, "--{BOUNDARY}--\r\n").unwrap();

    Request::builder()
        .method("POST")
        .uri("/run-macro-upload/")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn workbook_in(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"PK-original").unwrap();
    path
}

#[tokio::test]
async fn run_by_path_returns_c2_value() {
    let h = harness();
    let book = workbook_in(h.work_dir.path(), "book.xlsm");

    let response = h
        .app
        .oneshot(json_request(
            "/run-macro/",
            json!({ "file_path": book.display().to_string(), "macro_name": "Module1.Run" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "status": "success", "c2_value": 42.0 })
    );
    // Modified in place
    assert_eq!(std::fs::read(&book).unwrap(), b"PK-original|ran Module1.Run");
}

#[tokio::test]
async fn run_by_path_accepts_route_without_trailing_slash() {
    let h = harness();
    let book = workbook_in(h.work_dir.path(), "book.xlsm");

    let response = h
        .app
        .oneshot(json_request(
            "/run-macro",
            json!({ "file_path": book.display().to_string(), "macro_name": "Module1.Run" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_file_is_404_with_path_in_detail() {
    let h = harness();
    let missing = h.work_dir.path().join("nope.xlsm");

    let response = h
        .app
        .oneshot(json_request(
            "/run-macro/",
            json!({ "file_path": missing.display().to_string(), "macro_name": "Module1.Run" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "file_not_found");
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.starts_with("File not found:"), "{detail}");
    assert!(detail.contains("nope.xlsm"), "{detail}");
}

#[tokio::test]
async fn unknown_macro_is_422() {
    let h = harness();
    let book = workbook_in(h.work_dir.path(), "book.xlsm");

    let response = h
        .app
        .oneshot(json_request(
            "/run-macro/",
            json!({ "file_path": book.display().to_string(), "macro_name": "Module1.Missing" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "macro_not_found");
    assert!(body["detail"].as_str().unwrap().contains("Cannot run the macro"));
}

#[tokio::test]
async fn macro_runtime_error_is_500() {
    let h = harness();
    let book = workbook_in(h.work_dir.path(), "book.xlsm");

    let response = h
        .app
        .oneshot(json_request(
            "/run-macro/",
            json!({ "file_path": book.display().to_string(), "macro_name": "Module1.Explode" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        json!({ "detail": "Division by zero", "kind": "macro_failed" })
    );
}

#[tokio::test]
async fn malformed_json_is_rejected_before_running() {
    let h = harness();

    let request = Request::builder()
        .method("POST")
        .uri("/run-macro/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"file_path\": "))
        .unwrap();
    let response = h.app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["kind"], "bad_request");
    assert!(h.executor.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_json_field_is_rejected() {
    let h = harness();

    let response = h
        .app
        .oneshot(json_request("/run-macro/", json!({ "file_path": "/tmp/a.xlsm" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["kind"], "invalid_body");
    assert!(h.executor.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn json_without_content_type_is_415() {
    let h = harness();

    let request = Request::builder()
        .method("POST")
        .uri("/run-macro/")
        .body(Body::from(
            json!({ "file_path": "/tmp/a.xlsm", "macro_name": "Module1.Run" }).to_string(),
        ))
        .unwrap();
    let response = h.app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body_json(response).await["kind"], "unsupported_media_type");
    assert!(h.executor.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn upload_returns_processed_workbook() {
    let h = harness();

    let response = h
        .app
        .oneshot(multipart_request(
            Some(("report.xlsm", b"PK-upload")),
            Some("Module1.Run"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/vnd.ms-excel.sheet.macroEnabled.12"
    );
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"processed_report.xlsm\""
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"PK-upload|ran Module1.Run");
}

#[tokio::test]
async fn upload_is_staged_under_work_dir_and_removed() {
    let h = harness();

    let response = h
        .app
        .oneshot(multipart_request(
            Some(("report.xlsm", b"PK-upload")),
            Some("Module1.Run"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let seen = h.executor.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    let staged = &seen[0];
    assert_eq!(staged.parent(), Some(h.work_dir.path()));
    let name = staged.file_name().unwrap().to_string_lossy();
    assert!(name.starts_with("temp_") && name.ends_with(".xlsm"), "{name}");
    assert!(!staged.exists());
}

#[tokio::test]
async fn upload_is_removed_when_macro_fails() {
    let h = harness();

    let response = h
        .app
        .oneshot(multipart_request(
            Some(("report.xlsm", b"PK-upload")),
            Some("Module1.Missing"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let seen = h.executor.seen.lock().unwrap().clone();
    assert!(!seen[0].exists());
}

#[tokio::test]
async fn keep_uploads_leaves_staged_file() {
    let h = harness_with(ScriptedExecutor::default(), |config| {
        config.keep_uploads = true;
    });

    let response = h
        .app
        .oneshot(multipart_request(
            Some(("report.xlsm", b"PK-upload")),
            Some("Module1.Run"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let seen = h.executor.seen.lock().unwrap().clone();
    assert_eq!(std::fs::read(&seen[0]).unwrap(), b"PK-upload|ran Module1.Run");
}

#[tokio::test]
async fn upload_without_macro_name_is_400() {
    let h = harness();

    let response = h
        .app
        .oneshot(multipart_request(Some(("report.xlsm", b"PK")), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "bad_request");
    assert!(body["detail"].as_str().unwrap().contains("macro_name"));
    assert!(h.executor.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn upload_without_file_is_400() {
    let h = harness();

    let response = h
        .app
        .oneshot(multipart_request(None, Some("Module1.Run")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["detail"]
        .as_str()
        .unwrap()
        .contains("'file'"));
}

#[tokio::test]
async fn max_sessions_caps_concurrent_runs() {
    let executor = ScriptedExecutor {
        hold: Some(Duration::from_millis(50)),
        ..ScriptedExecutor::default()
    };
    let h = harness_with(executor, |config| config.max_sessions = NonZeroUsize::new(1));

    let books: Vec<PathBuf> = (0..4)
        .map(|i| workbook_in(h.work_dir.path(), &format!("book{i}.xlsm")))
        .collect();
    let requests = books.iter().map(|book| {
        h.app.clone().oneshot(json_request(
            "/run-macro/",
            json!({ "file_path": book.display().to_string(), "macro_name": "Module1.Run" }),
        ))
    });

    let handles: Vec<_> = requests.map(tokio::spawn).collect();
    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(h.executor.seen.lock().unwrap().len(), 4);
    assert_eq!(h.executor.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn health_reports_ok() {
    let h = harness();

    let response = h
        .app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "status": "ok" }));
}
