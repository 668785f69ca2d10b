mod support;

use base64::Engine as _;
use mip_agent::{InlineDispatcher, UnconfiguredComputation};
use mip_storage::{JobStore as _, MemoryJobStore};
use serde_json::{Value, json};
use std::sync::Arc;
use support::{Fixture, HELLO_B64, HELLO_SHA256, RecordingComputation, T0_MS};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

const JSON: Option<&str> = Some("application/json");
const HOOK_TOKEN: &str = "hook-token-1";

fn body(value: Value) -> Vec<u8> {
    serde_json::to_vec(&value).expect("encode body")
}

#[test]
fn start_job_hello_example() {
    let (fx, _dispatcher) = Fixture::deferred();
    let protocol = fx.protocol(None);

    let reply = protocol.start_job(
        JSON,
        &body(json!({
            "identifier_from_purchaser": "job123",
            "input_data": { "html_file": HELLO_B64 }
        })),
    );
    assert_eq!(reply.status, 200, "{}", reply.body);
    let b = &reply.body;
    assert_eq!(b["status"], "success");
    assert_eq!(b["job_id"], "job_000001");
    assert_eq!(b["id"], "status-000001");
    assert_eq!(b["blockchainIdentifier"], "block_000001");
    assert_eq!(b["input_hash"], HELLO_SHA256);
    assert_eq!(b["identifierFromPurchaser"], "job123");
    assert_eq!(b["agentIdentifier"], Value::Null);
    assert_eq!(b["sellerVKey"], Value::Null);

    let t0 = T0_MS / 1_000;
    assert_eq!(b["payByTime"], t0 + 3_600);
    assert_eq!(b["submitResultTime"], t0 + 7_200);
    assert_eq!(b["unlockTime"], t0 + 10_800);
    assert_eq!(b["externalDisputeUnlockTime"], t0 + 14_400);

    let again = protocol.start_job(
        JSON,
        &body(json!({
            "identifier_from_purchaser": "job123",
            "input_data": { "html_file": HELLO_B64 }
        })),
    );
    assert_ne!(again.body["job_id"], b["job_id"]);
}

#[test]
fn start_job_rejections() {
    let (fx, _dispatcher) = Fixture::deferred();
    let protocol = fx.protocol(None);
    let valid = body(json!({
        "identifier_from_purchaser": "job123",
        "input_data": { "html_file": HELLO_B64 }
    }));

    let reply = protocol.start_job(Some("text/plain"), &valid);
    assert_eq!(reply.status, 415);
    assert_eq!(
        reply.body,
        json!({ "status": "error", "message": "Content-Type must be application/json" })
    );
    assert_eq!(protocol.start_job(None, &valid).status, 415);

    let reply = protocol.start_job(JSON, &body(json!({ "input_data": { "html_file": HELLO_B64 } })));
    assert_eq!(reply.status, 400);
    assert_eq!(reply.body["message"], "identifier_from_purchaser required");

    let reply = protocol.start_job(JSON, &body(json!({ "identifier_from_purchaser": "x" })));
    assert_eq!(reply.status, 400);
    assert_eq!(reply.body["message"], "html_file required");

    let reply = protocol.start_job(
        JSON,
        &body(json!({
            "identifier_from_purchaser": "x",
            "input_data": { "html_file": "***" }
        })),
    );
    assert_eq!(reply.status, 400);
    assert!(
        reply.body["message"]
            .as_str()
            .unwrap_or_default()
            .starts_with("Invalid base64 file"),
        "{}",
        reply.body
    );

    let oversized = base64::engine::general_purpose::STANDARD.encode(vec![b'a'; 5_000_001]);
    let reply = protocol.start_job(
        JSON,
        &body(json!({
            "identifier_from_purchaser": "x",
            "input_data": { "html_file": oversized }
        })),
    );
    assert_eq!(reply.status, 400);
    assert_eq!(fx.store.len().unwrap(), 0);
}

#[test]
fn status_reports_lifecycle_and_schema() {
    let (fx, dispatcher) = Fixture::deferred();
    let protocol = fx.protocol(Some(HOOK_TOKEN));

    let reply = protocol.status(None);
    assert_eq!(reply.status, 400);
    assert_eq!(reply.body["message"], "job_id required");
    let reply = protocol.status(Some("job_nope"));
    assert_eq!(reply.status, 404);
    assert_eq!(reply.body["message"], "Job not found");

    let started = protocol.start_job(
        JSON,
        &body(json!({
            "identifier_from_purchaser": "job123",
            "input_data": { "html_file": HELLO_B64 }
        })),
    );
    let job_id = started.body["job_id"].as_str().unwrap().to_string();
    let status_id = started.body["id"].as_str().unwrap().to_string();

    let reply = protocol.status(Some(&job_id));
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["status"], "awaiting_payment");
    assert_eq!(reply.body["result"], Value::Null);
    assert!(reply.body.get("input_schema").is_none());
    let response_id = reply.body["id"].as_str().unwrap();
    assert_ne!(response_id, status_id);
    assert_eq!(response_id.len(), 36);

    let paid = protocol.payment_confirmed(
        Some(&format!("Bearer {HOOK_TOKEN}")),
        JSON,
        &body(json!({ "job_id": job_id })),
    );
    assert_eq!(paid.status, 200, "{}", paid.body);
    assert_eq!(paid.body["job_status"], "awaiting_input");

    let reply = protocol.status(Some(&job_id));
    assert_eq!(reply.body["status"], "awaiting_input");
    assert_eq!(reply.body["input_schema"], fx.controller.schema().to_json());

    let reply = protocol.provide_input(
        JSON,
        &body(json!({
            "job_id": job_id,
            "status_id": status_id,
            "input_data": { "month": "june" }
        })),
    );
    assert_eq!(reply.status, 200, "{}", reply.body);
    assert_eq!(reply.body["status"], "success");
    assert_eq!(protocol.status(Some(&job_id)).body["status"], "running");

    for work in dispatcher.take() {
        work.completion.finish(Ok(json!({ "summary": "ok" })));
    }
    let reply = protocol.status(Some(&job_id));
    assert_eq!(reply.body["status"], "completed");
    assert_eq!(reply.body["result"], json!({ "summary": "ok" }));
}

#[test]
fn provide_input_errors_map_to_status_codes() {
    let (fx, _dispatcher) = Fixture::deferred();
    let protocol = fx.protocol(None);
    let (job_id, status_id) = fx.job_awaiting_input();

    let call = |payload: Value| protocol.provide_input(JSON, &body(payload));

    let reply = call(json!({ "job_id": job_id, "status_id": status_id }));
    assert_eq!(reply.status, 400);
    let reply = call(json!({
        "job_id": job_id, "status_id": status_id,
        "input_data": {}, "input_groups": []
    }));
    assert_eq!(reply.status, 400);

    let reply = call(json!({ "job_id": "job_unknown", "status_id": status_id, "input_data": {} }));
    assert_eq!(reply.status, 404);

    let reply = call(json!({ "job_id": job_id, "status_id": "status-999", "input_data": {} }));
    assert_eq!(reply.status, 403);
    assert_eq!(protocol.status(Some(&job_id)).body["status"], "awaiting_input");

    let reply = call(json!({ "job_id": job_id, "status_id": status_id, "input_data": { "a": 1 } }));
    assert_eq!(reply.status, 200);
    let first_hash = reply.body["input_hash"].clone();

    let reply = call(json!({ "job_id": job_id, "status_id": status_id, "input_data": { "a": 2 } }));
    assert_eq!(reply.status, 409);
    assert_eq!(reply.body["status"], "error");
    assert_eq!(
        first_hash,
        json!(mip_agent::integrity::fingerprint_json(&json!({ "a": 1 })).as_str())
    );

    let reply = protocol.provide_input(Some("text/html"), b"{}");
    assert_eq!(reply.status, 415);
}

#[test]
fn failed_jobs_carry_a_message() {
    let computation = Arc::new(RecordingComputation::new(|_| Err("empty statement".to_string())));
    let fx = Fixture::new(
        Arc::new(MemoryJobStore::new(8)),
        Arc::new(InlineDispatcher::new(computation)),
    );
    let protocol = fx.protocol(None);
    let (job_id, status_id) = fx.job_awaiting_input();
    protocol.provide_input(
        JSON,
        &body(json!({ "job_id": job_id, "status_id": status_id, "input_data": {} })),
    );

    let reply = protocol.status(Some(&job_id));
    assert_eq!(reply.body["status"], "failed");
    assert_eq!(reply.body["message"], "empty statement");
    assert_eq!(reply.body["result"], Value::Null);
}

#[test]
fn service_endpoints() {
    let (fx, _dispatcher) = Fixture::deferred();
    let protocol = fx.protocol(None);

    let reply = protocol.availability();
    assert_eq!(reply.body["status"], "available");
    assert_eq!(reply.body["type"], "masumi-agent");

    let reply = protocol.input_schema();
    assert_eq!(reply.body["input_data"][0]["id"], "identifier_from_purchaser");
    assert_eq!(reply.body["input_data"][1]["data"]["maxSize"], 5_000_000);

    let reply = protocol.health();
    assert_eq!(reply.body["status"], "healthy");
    assert_eq!(reply.body["service"], mip_agent::SERVICE_NAME);
    assert_eq!(protocol.root().status, 200);

    let unconfigured = Fixture::new(
        Arc::new(MemoryJobStore::new(8)),
        Arc::new(InlineDispatcher::new(Arc::new(UnconfiguredComputation))),
    );
    let reply = unconfigured.protocol(None).availability();
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["status"], "unavailable");
}

async fn http_exchange(addr: std::net::SocketAddr, request: String) -> String {
    let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    stream.write_all(request.as_bytes()).await.expect("write");
    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read");
    response
}

#[tokio::test(flavor = "multi_thread")]
async fn http_binding_serves_the_protocol() {
    let (fx, _dispatcher) = Fixture::deferred();
    let protocol = Arc::new(fx.protocol(None));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(mip_agent::http::serve(listener, protocol, async move {
        let _ = stopped.await;
    }));

    let response = http_exchange(
        addr,
        "GET /availability HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n".to_string(),
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains("masumi-agent"), "{response}");

    let payload = serde_json::to_string(&json!({
        "identifier_from_purchaser": "job123",
        "input_data": { "html_file": HELLO_B64 }
    }))
    .unwrap();
    let response = http_exchange(
        addr,
        format!(
            "POST /start_job HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{payload}",
            payload.len()
        ),
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains(HELLO_SHA256), "{response}");

    let response = http_exchange(
        addr,
        "POST /start_job HTTP/1.1\r\nHost: localhost\r\nContent-Type: text/plain\r\n\
         Content-Length: 2\r\nConnection: close\r\n\r\n{}"
            .to_string(),
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 415"), "{response}");

    let response = http_exchange(
        addr,
        "GET /status?job_id=job_000001 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
            .to_string(),
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains("awaiting_payment"), "{response}");

    let _ = stop.send(());
    server.await.expect("join").expect("serve");
}

/// Streams `body_len` filler bytes after `head` while reading the reply; the server may answer
/// and hang up before the body is fully sent.
async fn http_exchange_streaming(
    addr: std::net::SocketAddr,
    head: String,
    body_len: usize,
) -> String {
    let stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    let (mut reader, mut writer) = stream.into_split();
    let sender = tokio::spawn(async move {
        if writer.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        let chunk = vec![b'a'; 64 * 1024];
        let mut left = body_len;
        while left > 0 {
            let n = left.min(chunk.len());
            if writer.write_all(&chunk[..n]).await.is_err() {
                return;
            }
            left -= n;
        }
    });

    let mut response = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => response.extend_from_slice(&buf[..n]),
        }
    }
    sender.abort();
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test(flavor = "multi_thread")]
async fn http_binding_accepts_files_up_to_the_schema_limit() {
    let (fx, _dispatcher) = Fixture::deferred();
    let protocol = Arc::new(fx.protocol(None));
    let limit = protocol.controller().schema().max_request_bytes();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(mip_agent::http::serve(listener, protocol, async move {
        let _ = stopped.await;
    }));

    let file = base64::engine::general_purpose::STANDARD.encode(vec![b'a'; 3_000_000]);
    let payload = serde_json::to_string(&json!({
        "identifier_from_purchaser": "big-upload",
        "input_data": { "html_file": file }
    }))
    .unwrap();
    assert!(payload.len() > 2 * 1024 * 1024);
    let response = http_exchange(
        addr,
        format!(
            "POST /start_job HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{payload}",
            payload.len()
        ),
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"), "{}", &response[..response.len().min(200)]);
    assert_eq!(fx.store.len().unwrap(), 1);

    let response = http_exchange_streaming(
        addr,
        format!(
            "POST /start_job HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n",
            limit + 1
        ),
        limit + 1,
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 413"), "{response}");
    let envelope = response.split("\r\n\r\n").nth(1).unwrap_or_default();
    let envelope: Value = serde_json::from_str(envelope).expect("json error body");
    assert_eq!(envelope["status"], "error");
    assert_eq!(envelope["message"], "Request body too large");
    assert_eq!(fx.store.len().unwrap(), 1);

    let _ = stop.send(());
    server.await.expect("join").expect("serve");
}
