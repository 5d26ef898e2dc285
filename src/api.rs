// src/api.rs
//
// Request/response surface for viewers. Each request maps onto one
// SessionManager call; every outcome comes back as an `ApiResponse`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::device::SentenceType;
use crate::io::serial::PortEnumerator;
use crate::io::IoError;
use crate::sessions::{SessionCommand, SessionManager};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ApiRequest {
    ListPorts,
    Connect {
        /// Defaults to the configured port
        #[serde(default)]
        port: Option<String>,
        /// Defaults to the configured baud rate
        #[serde(default)]
        baud_rate: Option<u32>,
    },
    Disconnect,
    ChangeBaud {
        baud_rate: u32,
    },
    StopTransmissions,
    StartTransmissions,
    SetMessageRate {
        sentence: String,
        #[serde(default)]
        rate: Option<u32>,
    },
    SendCommand {
        command: String,
    },
    ConfigureDevice,
    Status,
    History,
}

impl ApiRequest {
    /// Convert a mutating request into its typed command.
    pub fn into_command(self, default_port: &str, default_baud: u32) -> Result<SessionCommand, IoError> {
        Ok(match self {
            ApiRequest::Connect { port, baud_rate } => SessionCommand::Connect {
                port: port.unwrap_or_else(|| default_port.to_string()),
                baud_rate: baud_rate.unwrap_or(default_baud),
            },
            ApiRequest::Disconnect => SessionCommand::Disconnect,
            ApiRequest::ChangeBaud { baud_rate } => SessionCommand::ChangeBaud(baud_rate),
            ApiRequest::StopTransmissions => SessionCommand::StopTransmissions,
            ApiRequest::StartTransmissions => SessionCommand::StartTransmissions,
            ApiRequest::SetMessageRate { sentence, rate } => SessionCommand::SetRate {
                sentence: sentence.parse::<SentenceType>()?,
                rate,
            },
            ApiRequest::SendCommand { command } => SessionCommand::SendRaw(command),
            ApiRequest::ConfigureDevice => SessionCommand::ConfigureDevice,
            ApiRequest::ListPorts | ApiRequest::Status | ApiRequest::History => {
                return Err(IoError::Validation("Query is not a session command".to_string()))
            }
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ApiResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            error_kind: None,
            data: None,
        }
    }

    pub fn with_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::ok()
        }
    }

    pub fn failure(error: &IoError) -> Self {
        // Cancellation is internal; the caller only learns the request did not complete
        let message = match error {
            IoError::Cancelled => None,
            other => Some(other.to_string()),
        };
        Self {
            success: false,
            error: message,
            error_kind: Some(error.kind()),
            data: None,
        }
    }

    fn from_result(result: Result<(), IoError>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::failure(&e),
        }
    }
}

/// Run one request against the session.
pub async fn dispatch(
    manager: &SessionManager,
    enumerator: &dyn PortEnumerator,
    request: ApiRequest,
) -> ApiResponse {
    match request {
        ApiRequest::ListPorts => match enumerator.list_ports() {
            Ok(ports) => ApiResponse::with_data(json!(ports)),
            Err(e) => ApiResponse::failure(&e),
        },
        ApiRequest::Status => ApiResponse::with_data(json!(manager.status())),
        ApiRequest::History => ApiResponse::with_data(json!(manager.history())),
        request => {
            let result = match request.into_command(manager.default_port(), manager.default_baud()) {
                Ok(command) => manager.execute(command).await,
                Err(e) => Err(e),
            };
            if let Err(ref e) = result {
                tlog!("[api] Request failed: {}", e);
            }
            ApiResponse::from_result(result)
        }
    }
}
