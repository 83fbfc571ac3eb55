//! `HttpSink` against a local HTTP responder.

use beacon_gateway::telemetry::UploadResult;
use beacon_gateway::{
    HttpSink, Reading, TelemetryPayload, TelemetrySink, ThrottleGate, ThrottledUploader,
    UploadError, UploadOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

const TIMEOUT: Duration = Duration::from_secs(2);

/// A request as seen by the responder.
#[derive(Debug)]
struct Captured {
    request_line: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Captured {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

async fn read_request(stream: &mut TcpStream) -> Captured {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before headers were complete");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8(buf[..header_end].to_vec()).unwrap();
    let mut lines = head.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines.next().unwrap().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
        .map(|(_, value)| value.parse::<usize>().unwrap())
        .unwrap_or(0);

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before body was complete");
        body.extend_from_slice(&chunk[..n]);
    }

    Captured {
        request_line,
        headers,
        body,
    }
}

/// Serve one request with `status` and hand back what was received.
async fn respond_once(status: u16) -> (String, oneshot::Receiver<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/api/v1", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let captured = read_request(&mut stream).await;
        let response = format!(
            "HTTP/1.1 {status} Status\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
        let _ = tx.send(captured);
    });

    (base_url, rx)
}

async fn post(base_url: &str, payload: &TelemetryPayload) -> UploadResult {
    let sink = HttpSink::new(base_url, "test-token", TIMEOUT).unwrap();
    sink.post(payload).await
}

fn payload(group_id: Option<u8>) -> TelemetryPayload {
    TelemetryPayload {
        temperature: 23.58,
        group_id,
    }
}

#[tokio::test]
async fn accepted_on_200() {
    let (base_url, captured) = respond_once(200).await;

    let result = post(&base_url, &payload(Some(7))).await;
    assert_eq!(result, Ok(UploadOutcome::Accepted));

    let request = captured.await.unwrap();
    assert_eq!(request.request_line, "POST /api/v1/test-token/telemetry HTTP/1.1");
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(
        request.json(),
        serde_json::json!({"temperature": 23.58, "group_id": 7})
    );
}

#[tokio::test]
async fn body_omits_missing_group_id() {
    let (base_url, captured) = respond_once(200).await;

    post(&base_url, &payload(None)).await.unwrap();

    let request = captured.await.unwrap();
    assert_eq!(request.json(), serde_json::json!({"temperature": 23.58}));
}

#[tokio::test]
async fn bad_request_on_400() {
    let (base_url, _captured) = respond_once(400).await;
    assert_eq!(
        post(&base_url, &payload(None)).await,
        Ok(UploadOutcome::BadRequest)
    );
}

#[tokio::test]
async fn invalid_token_on_404() {
    let (base_url, _captured) = respond_once(404).await;
    assert_eq!(
        post(&base_url, &payload(None)).await,
        Ok(UploadOutcome::InvalidToken)
    );
}

#[tokio::test]
async fn other_status_is_rejected() {
    let (base_url, _captured) = respond_once(500).await;
    assert_eq!(
        post(&base_url, &payload(None)).await,
        Ok(UploadOutcome::Rejected(500))
    );
}

#[tokio::test]
async fn connection_refused_is_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/api/v1", listener.local_addr().unwrap());
    drop(listener);

    let result = post(&base_url, &payload(None)).await;
    assert!(matches!(result, Err(UploadError::Connect(_))), "{result:?}");
}

#[tokio::test]
async fn connect_error_does_not_leak_access_token() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/api/v1", listener.local_addr().unwrap());
    drop(listener);

    let sink = HttpSink::new(&base_url, "SECRET-TOKEN", TIMEOUT).unwrap();
    let error = sink.post(&payload(None)).await.unwrap_err();

    assert!(matches!(error, UploadError::Connect(_)), "{error:?}");
    assert!(!error.to_string().contains("SECRET-TOKEN"), "{error}");
}

#[tokio::test]
async fn silent_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/api/v1", listener.local_addr().unwrap());

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _request = read_request(&mut stream).await;
        // Hold the connection open without answering
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let sink = HttpSink::new(&base_url, "SECRET-TOKEN", Duration::from_millis(200)).unwrap();
    let error = sink.post(&payload(None)).await.unwrap_err();
    assert!(matches!(error, UploadError::Timeout(_)), "{error:?}");
    assert!(!error.to_string().contains("SECRET-TOKEN"), "{error}");
}

#[tokio::test]
async fn rejected_upload_still_closes_the_window() {
    let (base_url, captured) = respond_once(404).await;
    let sink = HttpSink::new(&base_url, "wrong-token", TIMEOUT).unwrap();
    let uploader = ThrottledUploader::new(ThrottleGate::new(Duration::from_secs(60)), Arc::new(sink));

    let reading = Reading {
        temperature_celsius: 23.58,
        group_id: Some(7),
    };

    let task = uploader.handle(&reading).unwrap();
    assert_eq!(task.await, Ok(UploadOutcome::InvalidToken));
    assert!(captured.await.unwrap().request_line.contains("/wrong-token/telemetry"));

    // No retry and no second attempt inside the window.
    assert!(uploader.handle(&reading).is_none());
}
