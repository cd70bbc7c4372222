use serde::{Deserialize, Serialize};

use crate::progression::{
    CompletionOutcome, NewTask, ProgressionError, ProgressionErrorKind, Reward, StudyTask, User,
    UserSummary, WealthTier,
};

/// One decoded NDJSON line from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Request {
        request_id: Option<String>,
        request: ProgressionRequest,
    },
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressionRequest {
    CreateTask(NewTask),
    ListTasks { user_id: String },
    CompleteTask { task_id: String },
    GetUser { user_id: String },
    UserSummary { user_id: String },
    ListRewards { user_id: String },
    WealthTiers(TierQuery),
}

/// Balance a tier listing is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierQuery {
    Money(u64),
    User(String),
    Table,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
enum WireClientMessage {
    CreateTask {
        #[serde(default)]
        request_id: Option<String>,
        user_id: String,
        title: String,
        #[serde(default)]
        description: Option<String>,
        duration_minutes: u32,
    },
    ListTasks {
        #[serde(default)]
        request_id: Option<String>,
        user_id: String,
    },
    CompleteTask {
        #[serde(default)]
        request_id: Option<String>,
        task_id: String,
    },
    GetUser {
        #[serde(default)]
        request_id: Option<String>,
        user_id: String,
    },
    UserSummary {
        #[serde(default)]
        request_id: Option<String>,
        user_id: String,
    },
    ListRewards {
        #[serde(default)]
        request_id: Option<String>,
        user_id: String,
    },
    WealthTiers {
        #[serde(default)]
        request_id: Option<String>,
        #[serde(default)]
        money: Option<u64>,
        #[serde(default)]
        user_id: Option<String>,
    },
    Exit,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("wealth_tiers accepts either money or user_id, not both")]
    AmbiguousTierQuery,
}

pub fn parse_client_message(line: &str) -> Result<ClientMessage, ProtocolError> {
    let wire: WireClientMessage = serde_json::from_str(line)?;
    let message = match wire {
        WireClientMessage::CreateTask {
            request_id,
            user_id,
            title,
            description,
            duration_minutes,
        } => request(
            request_id,
            ProgressionRequest::CreateTask(NewTask {
                user_id,
                title,
                description,
                duration_minutes,
            }),
        ),
        WireClientMessage::ListTasks {
            request_id,
            user_id,
        } => request(request_id, ProgressionRequest::ListTasks { user_id }),
        WireClientMessage::CompleteTask {
            request_id,
            task_id,
        } => request(request_id, ProgressionRequest::CompleteTask { task_id }),
        WireClientMessage::GetUser {
            request_id,
            user_id,
        } => request(request_id, ProgressionRequest::GetUser { user_id }),
        WireClientMessage::UserSummary {
            request_id,
            user_id,
        } => request(request_id, ProgressionRequest::UserSummary { user_id }),
        WireClientMessage::ListRewards {
            request_id,
            user_id,
        } => request(request_id, ProgressionRequest::ListRewards { user_id }),
        WireClientMessage::WealthTiers {
            request_id,
            money,
            user_id,
        } => {
            let query = match (money, user_id) {
                (Some(_), Some(_)) => return Err(ProtocolError::AmbiguousTierQuery),
                (Some(money), None) => TierQuery::Money(money),
                (None, Some(user_id)) => TierQuery::User(user_id),
                (None, None) => TierQuery::Table,
            };
            request(request_id, ProgressionRequest::WealthTiers(query))
        }
        WireClientMessage::Exit => ClientMessage::Exit,
    };
    Ok(message)
}

fn request(request_id: Option<String>, request: ProgressionRequest) -> ClientMessage {
    ClientMessage::Request {
        request_id,
        request,
    }
}

/// A tier row annotated against one balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierStatus {
    pub index: usize,
    #[serde(flatten)]
    pub tier: WealthTier,
    pub current: bool,
    pub achieved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressionResponse {
    Task(StudyTask),
    Tasks(Vec<StudyTask>),
    Completion(CompletionOutcome),
    User(User),
    Summary(UserSummary),
    Rewards(Vec<Reward>),
    WealthTiers {
        #[serde(default)]
        money: Option<u64>,
        tiers: Vec<TierStatus>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ProgressionErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&ProgressionError> for WireError {
    fn from(error: &ProgressionError) -> Self {
        Self {
            kind: error.kind,
            message: error.message.clone(),
            retryable: error.retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        result: ProgressionResponse,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        error: WireError,
    },
}

impl ServerMessage {
    pub fn ok(request_id: Option<String>, result: ProgressionResponse) -> Self {
        Self::Ok { request_id, result }
    }

    pub fn error(request_id: Option<String>, error: &ProgressionError) -> Self {
        Self::Error {
            request_id,
            error: WireError::from(error),
        }
    }
}

pub fn encode_server_message(message: &ServerMessage) -> Result<String, serde_json::Error> {
    let mut encoded = serde_json::to_string(message)?;
    encoded.push('\n');
    Ok(encoded)
}
