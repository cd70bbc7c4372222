use std::{fs, path::PathBuf, sync::Arc, time::Duration};

use serde_json::{Value, json};
use studyquest::{progression::ProgressionEngine, server::SocketServer};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        UnixStream,
        unix::{OwnedReadHalf, OwnedWriteHalf},
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Harness {
    dir: PathBuf,
    socket_path: PathBuf,
    shutdown: CancellationToken,
    server: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    fn start() -> Self {
        let dir = std::env::temp_dir().join(format!("studyquest-server-{}", Uuid::now_v7()));
        let socket_path = dir.join("studyquest.sock");
        let server = SocketServer::bind(socket_path.clone()).expect("socket should bind");
        let shutdown = CancellationToken::new();
        let engine = Arc::new(ProgressionEngine::in_memory());
        let server = tokio::spawn(server.serve(engine, shutdown.clone()));
        Self {
            dir,
            socket_path,
            shutdown,
            server,
        }
    }

    async fn connect(&self) -> Client {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("client should connect");
        let (read_half, write_half) = stream.into_split();
        Client {
            lines: BufReader::new(read_half).lines(),
            writer: write_half,
        }
    }

    async fn stop(self) {
        tokio::time::timeout(Duration::from_secs(5), self.server)
            .await
            .expect("server should stop in time")
            .expect("server task should not panic")
            .expect("server should stop cleanly");
        assert!(!self.socket_path.exists(), "socket file should be removed");
        let _ = fs::remove_dir_all(&self.dir);
    }
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn send(&mut self, message: Value) {
        let mut line = message.to_string();
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .expect("request should be written");
    }

    async fn request(&mut self, message: Value) -> Value {
        self.send(message).await;
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("response should arrive in time")
            .expect("response should be readable")
            .expect("connection should stay open");
        serde_json::from_str(&line).expect("response should be json")
    }
}

#[tokio::test]
async fn given_socket_client_when_task_created_and_completed_then_responses_carry_progress() {
    let harness = Harness::start();
    let mut client = harness.connect().await;

    let created = client
        .request(json!({
            "type": "create_task",
            "request_id": "r-1",
            "user_id": "user-a",
            "title": "Read chapter 1",
            "duration_minutes": 30
        }))
        .await;
    assert_eq!(created["type"], "ok");
    assert_eq!(created["request_id"], "r-1");
    let task_id = created["result"]["task"]["id"]
        .as_str()
        .expect("task id should be a string")
        .to_string();

    let completed = client
        .request(json!({ "type": "complete_task", "request_id": "r-2", "task_id": task_id }))
        .await;
    let completion = &completed["result"]["completion"];
    assert_eq!(completion["user"]["level"], 2);
    assert_eq!(completion["user"]["money"], 10);
    assert_eq!(completion["reward"]["amount"], 10);

    let repeated = client
        .request(json!({ "type": "complete_task", "request_id": "r-3", "task_id": task_id }))
        .await;
    assert_eq!(repeated["type"], "error");
    assert_eq!(repeated["error"]["kind"], "invalid_state");
    assert_eq!(repeated["error"]["retryable"], false);

    let tiers = client
        .request(json!({ "type": "wealth_tiers", "user_id": "user-a" }))
        .await;
    let rows = tiers["result"]["wealth_tiers"]["tiers"]
        .as_array()
        .expect("tiers should be an array");
    let current: Vec<_> = rows.iter().filter(|row| row["current"] == true).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0]["title"], "Scraping By");

    client.send(json!({ "type": "exit" })).await;
    harness.stop().await;
}

#[tokio::test]
async fn given_malformed_line_when_sent_then_validation_error_and_connection_survives() {
    let harness = Harness::start();
    let mut client = harness.connect().await;

    let rejected = client.request(json!({ "type": "ping" })).await;
    assert_eq!(rejected["type"], "error");
    assert_eq!(rejected["error"]["kind"], "validation");

    let user = client
        .request(json!({ "type": "get_user", "user_id": "user-b" }))
        .await;
    assert_eq!(user["result"]["user"]["level"], 1);
    assert_eq!(user["result"]["user"]["money"], 0);

    harness.shutdown.cancel();
    harness.stop().await;
}
