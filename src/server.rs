use std::{
    fs,
    io::ErrorKind,
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
    signal::unix::{SignalKind, signal},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ServerConfig,
    progression::{ProgressionEngine, ProgressionError, WealthTierTable, error::validation_error},
    protocol::{
        ClientMessage, ProgressionRequest, ProgressionResponse, ServerMessage, TierQuery,
        TierStatus, encode_server_message, parse_client_message,
    },
};

/// Serves the configured socket until SIGINT, SIGTERM or an `exit` message.
pub async fn run(config: &ServerConfig, engine: Arc<ProgressionEngine>) -> Result<()> {
    let shutdown = CancellationToken::new();
    let mut sigint =
        signal(SignalKind::interrupt()).context("unable to listen for SIGINT (Ctrl+C)")?;
    let mut sigterm = signal(SignalKind::terminate()).context("unable to listen for SIGTERM")?;

    let signal_shutdown = shutdown.clone();
    let signal_task = tokio::spawn(async move {
        let signal_name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
            _ = signal_shutdown.cancelled() => return,
        };
        tracing::info!(target: "server", signal = signal_name, "signal_received");
        signal_shutdown.cancel();
    });

    let server = SocketServer::bind(config.socket_path.clone())?;
    let result = server.serve(engine, shutdown.clone()).await;
    shutdown.cancel();
    let _ = signal_task.await;
    result
}

pub struct SocketServer {
    socket_path: PathBuf,
    listener: UnixListener,
}

impl SocketServer {
    pub fn bind(socket_path: PathBuf) -> Result<Self> {
        prepare_socket_path(&socket_path)?;
        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("unable to bind socket {}", socket_path.display()))?;
        Ok(Self {
            socket_path,
            listener,
        })
    }

    pub async fn serve(
        self,
        engine: Arc<ProgressionEngine>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        tracing::info!(
            target: "server",
            socket_path = %self.socket_path.display(),
            "server_listening"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => {
                            let engine = Arc::clone(&engine);
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                if let Err(err) = handle_client(stream, engine, shutdown).await {
                                    tracing::warn!(
                                        target: "server",
                                        error = %format!("{err:#}"),
                                        "client_handling_failed"
                                    );
                                }
                            });
                        }
                        Err(err) => {
                            tracing::warn!(target: "server", error = %err, "accept_failed");
                        }
                    }
                }
            }
        }

        cleanup_socket_path(&self.socket_path)?;
        tracing::info!(target: "server", socket_path = %self.socket_path.display(), "server_stopped");
        Ok(())
    }
}

async fn handle_client(
    stream: UnixStream,
    engine: Arc<ProgressionEngine>,
    shutdown: CancellationToken,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match parse_client_message(line) {
            Ok(ClientMessage::Exit) => {
                tracing::info!(target: "server", "exit_requested");
                shutdown.cancel();
                break;
            }
            Ok(ClientMessage::Request {
                request_id,
                request,
            }) => match handle_request(&engine, request).await {
                Ok(result) => ServerMessage::ok(request_id, result),
                Err(err) => {
                    tracing::debug!(
                        target: "server",
                        kind = ?err.kind,
                        message = %err.message,
                        "request_rejected"
                    );
                    ServerMessage::error(request_id, &err)
                }
            },
            Err(err) => {
                tracing::warn!(target: "server", error = %err, "invalid_protocol_message");
                ServerMessage::error(None, &validation_error(err.to_string()))
            }
        };

        let encoded = encode_server_message(&response)?;
        write_half.write_all(encoded.as_bytes()).await?;
        write_half.flush().await?;
    }

    Ok(())
}

pub async fn handle_request(
    engine: &ProgressionEngine,
    request: ProgressionRequest,
) -> Result<ProgressionResponse, ProgressionError> {
    let response = match request {
        ProgressionRequest::CreateTask(new_task) => {
            ProgressionResponse::Task(engine.create_task(new_task).await?)
        }
        ProgressionRequest::ListTasks { user_id } => {
            ProgressionResponse::Tasks(engine.list_tasks(&user_id).await?)
        }
        ProgressionRequest::CompleteTask { task_id } => {
            ProgressionResponse::Completion(engine.complete_task(&task_id).await?)
        }
        ProgressionRequest::GetUser { user_id } => {
            ProgressionResponse::User(engine.get_user(&user_id).await?)
        }
        ProgressionRequest::UserSummary { user_id } => {
            ProgressionResponse::Summary(engine.user_summary(&user_id).await?)
        }
        ProgressionRequest::ListRewards { user_id } => {
            ProgressionResponse::Rewards(engine.rewards(&user_id).await?)
        }
        ProgressionRequest::WealthTiers(query) => {
            let money = match query {
                TierQuery::Money(money) => Some(money),
                TierQuery::User(user_id) => Some(engine.get_user(&user_id).await?.money),
                TierQuery::Table => None,
            };
            ProgressionResponse::WealthTiers {
                money,
                tiers: tier_statuses(engine.tiers(), money),
            }
        }
    };
    Ok(response)
}

fn tier_statuses(table: &WealthTierTable, money: Option<u64>) -> Vec<TierStatus> {
    table
        .tiers()
        .iter()
        .enumerate()
        .map(|(index, tier)| TierStatus {
            index,
            tier: tier.clone(),
            current: money.is_some_and(|money| table.is_current_tier(money, index)),
            achieved: money.is_some_and(|money| table.is_achieved(money, index)),
        })
        .collect()
}

fn prepare_socket_path(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("unable to create {}", parent.display()))?;
    }

    match fs::symlink_metadata(path) {
        Ok(metadata) => {
            if metadata.file_type().is_socket() || metadata.is_file() {
                fs::remove_file(path)
                    .with_context(|| format!("unable to remove stale socket {}", path.display()))?;
            } else {
                bail!(
                    "socket path exists but is not removable as file/socket: {}",
                    path.display()
                );
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("unable to inspect {}", path.display()));
        }
    }

    Ok(())
}

fn cleanup_socket_path(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("unable to remove {}", path.display())),
    }
}
