use base64::Engine;
use image::{Rgba, RgbaImage};
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use pinsmith::ai::{fallback_analysis, placeholder_image, AiService, GeminiClient};
use pinsmith::config::{self, Config};
use pinsmith::model::AspectRatio;
use pinsmith::publisher::{GithubPublisher, Publisher};

/// HTTP server answering every request with the same canned response and
/// logging each request line.
struct StubServer {
    url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    async fn start(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let line = read_request_line(&mut socket).await;
                log.lock().await.push(line);
                let response = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        Self { url, requests }
    }

    async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }
}

/// Reads a whole request (head plus `Content-Length` body) and returns its
/// request line.
async fn read_request_line(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf)
        .lines()
        .next()
        .unwrap_or_default()
        .trim_end_matches(" HTTP/1.1")
        .to_string()
}

/// Address with nothing listening on it.
async fn closed_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/", addr)
}

fn base_config() -> Config {
    serde_yaml::from_str(config::example()).unwrap()
}

fn gemini(base_url: &str) -> GeminiClient {
    let mut cfg = base_config();
    cfg.ai.base_url = base_url.to_string();
    GeminiClient::from_config(&cfg.ai).unwrap()
}

fn github(api_base: &str) -> GithubPublisher {
    let mut cfg = base_config();
    cfg.publisher.api_base = api_base.to_string();
    GithubPublisher::from_config(&cfg.publisher).unwrap()
}

fn inline_image(bytes: &[u8]) -> String {
    json!({
        "candidates": [ { "content": { "parts": [ {
            "inlineData": {
                "mimeType": "image/png",
                "data": base64::engine::general_purpose::STANDARD.encode(bytes)
            }
        } ] } } ]
    })
    .to_string()
}

fn png_bytes() -> Vec<u8> {
    let img = RgbaImage::from_pixel(8, 6, Rgba([10, 120, 30, 255]));
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
    buffer.into_inner()
}

#[tokio::test]
async fn analysis_falls_back_when_service_errors() {
    let server = StubServer::start(500, "{\"error\": oops").await;
    let analysis = gemini(&server.url).analyze("https://food.example/stew").await;

    assert_eq!(analysis, fallback_analysis());
    assert_eq!(
        server.requests().await,
        vec!["POST /v1beta/models/gemini-2.5-flash:generateContent"]
    );
}

#[tokio::test]
async fn analysis_falls_back_on_unreadable_answer() {
    let body = json!({
        "candidates": [ { "content": { "parts": [ { "text": "Sure! Here is a pin." } ] } } ]
    });
    let server = StubServer::start(200, body.to_string()).await;
    let analysis = gemini(&server.url).analyze("https://food.example/stew").await;
    assert_eq!(analysis, fallback_analysis());
}

#[tokio::test]
async fn analysis_is_parsed_from_first_text_part() {
    let answer = json!({
        "keyword": "Beef Stew",
        "title": "Cozy Beef Stew",
        "description": "Slow simmered.",
        "seoKeywords": ["stew", "beef"]
    });
    let body = json!({
        "candidates": [ { "content": { "parts": [ { "text": answer.to_string() } ] } } ]
    });
    let server = StubServer::start(200, body.to_string()).await;
    let analysis = gemini(&server.url).analyze("https://food.example/stew").await;
    assert_eq!(analysis.keyword, "Beef Stew");
    assert_eq!(analysis.seo_keywords, "stew, beef");
}

#[tokio::test]
async fn image_falls_back_when_service_errors() {
    let server = StubServer::start(500, "not json at all").await;
    let bytes = gemini(&server.url)
        .generate_image("Plated dish", "stew", AspectRatio::TwoByThree)
        .await;

    assert_eq!(bytes, placeholder_image());
    assert_eq!(
        server.requests().await,
        vec!["POST /v1beta/models/gemini-2.5-flash-image:generateContent"]
    );
}

#[tokio::test]
async fn undecodable_image_payload_falls_back_to_placeholder() {
    let server = StubServer::start(200, inline_image(b"GIF89a\x01\x00\x01\x00garbage")).await;
    let bytes = gemini(&server.url)
        .generate_image("Plated dish", "stew", AspectRatio::TwoByThree)
        .await;

    assert_eq!(bytes, placeholder_image());
    assert!(image::load_from_memory(&bytes).is_ok());
}

#[tokio::test]
async fn decodable_image_payload_is_returned_as_is() {
    let png = png_bytes();
    let server = StubServer::start(200, inline_image(&png)).await;
    let bytes = gemini(&server.url)
        .generate_image("Plated dish", "stew", AspectRatio::OneByTwo)
        .await;
    assert_eq!(bytes.as_ref(), png.as_slice());
}

#[tokio::test]
async fn unreachable_ai_service_degrades_to_fallbacks() {
    let client = gemini(&closed_url().await);
    assert_eq!(client.analyze("https://food.example/x").await, fallback_analysis());
    assert_eq!(
        client
            .generate_image("Plated dish", "x", AspectRatio::TwoByThree)
            .await,
        placeholder_image()
    );
}

#[tokio::test]
async fn verify_connection_is_false_when_refused() {
    assert!(!github(&closed_url().await).verify_connection().await);
}

#[tokio::test]
async fn verify_connection_is_false_on_rejection() {
    let server = StubServer::start(404, r#"{"message":"Not Found"}"#).await;
    assert!(!github(&server.url).verify_connection().await);
    assert_eq!(server.requests().await, vec!["GET /repos/your-account/pin-images"]);
}

#[tokio::test]
async fn verify_connection_accepts_reachable_repository() {
    let server = StubServer::start(200, r#"{"full_name":"your-account/pin-images"}"#).await;
    assert!(github(&server.url).verify_connection().await);
}

#[tokio::test]
async fn publish_surfaces_provider_message_verbatim() {
    let server = StubServer::start(401, r#"{"message":"Bad credentials"}"#).await;
    let err = github(&server.url)
        .publish("stew-1.jpg", b"jpeg")
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Bad credentials");
    assert_eq!(
        server.requests().await,
        vec!["PUT /repos/your-account/pin-images/contents/pins/stew-1.jpg"]
    );
}

#[tokio::test]
async fn publish_returns_download_url_or_raw_url() {
    let server = StubServer::start(
        201,
        r#"{"content":{"download_url":"https://raw.example/pins/stew-1.jpg"}}"#,
    )
    .await;
    let url = github(&server.url).publish("stew-1.jpg", b"jpeg").await.unwrap();
    assert_eq!(url, "https://raw.example/pins/stew-1.jpg");

    let server = StubServer::start(201, r#"{"content":{}}"#).await;
    let url = github(&server.url).publish("stew-2.jpg", b"jpeg").await.unwrap();
    assert_eq!(
        url,
        "https://raw.githubusercontent.com/your-account/pin-images/main/pins/stew-2.jpg"
    );
}
