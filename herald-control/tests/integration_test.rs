//! Integration tests for control socket client/server communication
//!
//! These tests verify the full request/response cycle between the control
//! client and server, including error handling, timeouts, and socket hygiene.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::unreachable
)]

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use herald_common::Signal;
use herald_control::{
    ControlClient, ControlError, ControlServer, Result,
    protocol::{
        QueueCommand, QueueMessage, QueueStats, Request, RequestCommand, Response, ResponseData,
        ResponsePayload, SystemCommand, SystemStatus,
    },
    server::CommandHandler,
};
use tempfile::TempDir;
use tokio::{
    io::AsyncWriteExt,
    net::UnixStream,
    sync::broadcast,
};

/// Mock command handler for testing
#[derive(Default)]
struct MockHandler {
    failed: AtomicUsize,
}

impl MockHandler {
    fn with_failed(failed: usize) -> Self {
        Self {
            failed: AtomicUsize::new(failed),
        }
    }

    fn stats(&self) -> QueueStats {
        let failed = self.failed.load(Ordering::SeqCst);
        QueueStats {
            total: 3 + failed,
            pending: 2,
            processing: 0,
            sent: 1,
            failed,
        }
    }
}

#[async_trait]
impl CommandHandler for MockHandler {
    async fn handle_request(&self, request: Request) -> Result<Response> {
        match request.command {
            RequestCommand::System(SystemCommand::Ping) => Ok(Response::ok()),
            RequestCommand::System(SystemCommand::Status) => {
                Ok(Response::data(ResponseData::SystemStatus(SystemStatus {
                    version: "0.1.0".to_string(),
                    uptime_secs: 12345,
                    queue: self.stats(),
                })))
            }
            RequestCommand::Queue(QueueCommand::Stats) => {
                Ok(Response::data(ResponseData::QueueStats(self.stats())))
            }
            RequestCommand::Queue(QueueCommand::List { status }) => {
                let status = status.unwrap_or_else(|| "pending".to_string());
                Ok(Response::data(ResponseData::QueueList(vec![QueueMessage {
                    id: "01HZZZZZZZZZZZZZZZZZZZZZZZ".to_string(),
                    recipients: vec!["reader@example.com".to_string()],
                    subject: "New post".to_string(),
                    template: Some("post-published".to_string()),
                    status,
                    attempts: 0,
                    created_at: 1_700_000_000,
                    processed_at: None,
                }])))
            }
            RequestCommand::Queue(QueueCommand::RetryAllFailed) => {
                let reset = self.failed.swap(0, Ordering::SeqCst);
                Ok(Response::data(ResponseData::Affected(reset)))
            }
            RequestCommand::Queue(QueueCommand::Retry { message_id }) => {
                Ok(Response::error(format!("Message {message_id} is not failed")))
            }
            RequestCommand::Queue(_) => Err(ControlError::ServerError(
                "Queue command not implemented in mock".to_string(),
            )),
        }
    }
}

/// Helper to start a test control server
async fn start_test_server(
    socket_path: &Path,
    handler: Arc<dyn CommandHandler>,
) -> (
    tokio::task::JoinHandle<Result<()>>,
    broadcast::Sender<Signal>,
) {
    let server = ControlServer::new(socket_path, handler).expect("Failed to create server");
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let server_handle = tokio::spawn(async move { server.serve(shutdown_rx).await });

    // Give server time to bind
    for _ in 0..50 {
        if socket_path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    (server_handle, shutdown_tx)
}

fn data(response: Response) -> ResponseData {
    match response.payload {
        ResponsePayload::Data(data) => *data,
        other => panic!("Expected Data response, got {other:?}"),
    }
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_system_ping() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");

    let (_server_handle, _shutdown_tx) =
        start_test_server(&socket_path, Arc::new(MockHandler::default())).await;

    let client = ControlClient::new(&socket_path);
    let response = client
        .send_request(Request::system(SystemCommand::Ping))
        .await
        .unwrap();

    assert_eq!(response.payload, ResponsePayload::Ok);
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_system_status() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");

    let (_server_handle, _shutdown_tx) =
        start_test_server(&socket_path, Arc::new(MockHandler::with_failed(2))).await;

    let client = ControlClient::new(&socket_path);
    let response = client
        .send_request(Request::system(SystemCommand::Status))
        .await
        .unwrap();

    let ResponseData::SystemStatus(status) = data(response) else {
        panic!("Expected SystemStatus response");
    };
    assert_eq!(status.version, "0.1.0");
    assert_eq!(status.uptime_secs, 12345);
    assert_eq!(status.queue.failed, 2);
    assert!(status.to_string().contains("Failed:    2"));
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_queue_list_with_filter() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");

    let (_server_handle, _shutdown_tx) =
        start_test_server(&socket_path, Arc::new(MockHandler::default())).await;

    let client = ControlClient::new(&socket_path);
    let response = client
        .send_request(Request::queue(QueueCommand::List {
            status: Some("failed".to_string()),
        }))
        .await
        .unwrap();

    let ResponseData::QueueList(messages) = data(response) else {
        panic!("Expected QueueList response");
    };
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, "failed");
    assert_eq!(messages[0].template.as_deref(), Some("post-published"));
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_retry_all_failed_then_stats() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");

    let (_server_handle, _shutdown_tx) =
        start_test_server(&socket_path, Arc::new(MockHandler::with_failed(2))).await;

    let client = ControlClient::new(&socket_path);

    let response = client
        .send_request(Request::queue(QueueCommand::RetryAllFailed))
        .await
        .unwrap();
    assert_eq!(data(response), ResponseData::Affected(2));

    let response = client
        .send_request(Request::queue(QueueCommand::Stats))
        .await
        .unwrap();
    let ResponseData::QueueStats(stats) = data(response) else {
        panic!("Expected QueueStats response");
    };
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_server_error_responses_become_client_errors() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");

    let (_server_handle, _shutdown_tx) =
        start_test_server(&socket_path, Arc::new(MockHandler::default())).await;

    let client = ControlClient::new(&socket_path);

    let result = client
        .send_request(Request::queue(QueueCommand::Retry {
            message_id: "abc".to_string(),
        }))
        .await;
    assert!(matches!(result, Err(ControlError::ServerError(msg)) if msg.contains("not failed")));

    // Handler errors are reported the same way
    let result = client
        .send_request(Request::queue(QueueCommand::ClearFailed))
        .await;
    assert!(matches!(result, Err(ControlError::ServerError(msg)) if msg.contains("not implemented")));
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_incompatible_version_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");

    let (_server_handle, _shutdown_tx) =
        start_test_server(&socket_path, Arc::new(MockHandler::default())).await;

    let client = ControlClient::new(&socket_path);
    let request = Request {
        version: 999,
        command: RequestCommand::System(SystemCommand::Ping),
    };

    let result = client.send_request(request).await;
    assert!(
        matches!(result, Err(ControlError::ServerError(msg)) if msg.contains("Incompatible protocol version"))
    );
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_oversized_request_closes_connection() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");

    let (_server_handle, _shutdown_tx) =
        start_test_server(&socket_path, Arc::new(MockHandler::default())).await;

    let mut stream = UnixStream::connect(&socket_path).await.unwrap();
    stream.write_all(&2_000_000u32.to_be_bytes()).await.unwrap();

    // The server drops the connection without answering
    let mut buf = [0u8; 4];
    let read = tokio::time::timeout(
        Duration::from_secs(5),
        tokio::io::AsyncReadExt::read(&mut stream, &mut buf),
    )
    .await
    .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));

    // And keeps serving others
    let client = ControlClient::new(&socket_path);
    assert!(
        client
            .send_request(Request::system(SystemCommand::Ping))
            .await
            .is_ok()
    );
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_socket_permissions_and_cleanup() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");

    let (server_handle, shutdown_tx) =
        start_test_server(&socket_path, Arc::new(MockHandler::default())).await;

    let mode = std::fs::metadata(&socket_path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    shutdown_tx.send(Signal::Shutdown).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server_handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(!socket_path.exists());
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_stale_socket_is_replaced() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");

    // A socket file nobody listens on
    drop(std::os::unix::net::UnixListener::bind(&socket_path).unwrap());
    assert!(socket_path.exists());

    let (_server_handle, _shutdown_tx) =
        start_test_server(&socket_path, Arc::new(MockHandler::default())).await;

    let client = ControlClient::new(&socket_path);
    assert!(
        client
            .send_request(Request::system(SystemCommand::Ping))
            .await
            .is_ok()
    );
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_second_server_refuses_active_socket() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");

    let (_server_handle, _shutdown_tx) =
        start_test_server(&socket_path, Arc::new(MockHandler::default())).await;

    let second = ControlServer::new(&socket_path, Arc::new(MockHandler::default())).unwrap();
    let (_tx, rx) = broadcast::channel(1);
    let result = second.serve(rx).await;

    assert!(matches!(
        result,
        Err(ControlError::Io(e)) if e.kind() == std::io::ErrorKind::AddrInUse
    ));
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_client_without_server() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("missing.sock");

    let client = ControlClient::new(&socket_path).with_timeout(Duration::from_secs(1));
    assert!(client.check_socket_exists().is_err());

    let result = client
        .send_request(Request::system(SystemCommand::Ping))
        .await;
    assert!(matches!(result, Err(ControlError::Io(_))));
}
