use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

mod http;

pub use http::JsonRPCClient;

const JSON_RPC_VERSION: &str = "2.0";

const PARSE_ERROR_CODE: i64 = -32700;
const INVALID_REQUEST_CODE: i64 = -32600;
const METHOD_NOT_FOUND_CODE: i64 = -32601;
const INVALID_PARAMS_CODE: i64 = -32602;
const INTERNAL_ERROR_CODE: i64 = -32603;

pub type JsonRPCResult<T> = Result<T, JsonRPCError>;

#[derive(Debug, Deserialize)]
struct JsonRPCErrorResponse {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Error)]
pub enum JsonRPCError {
    #[error("Server failed to parse request JSON data")]
    ParseError,
    #[error("Server received invalid JSON-RPC request")]
    InvalidRequest,
    #[error("Unknown method requested to the server")]
    MethodNotFound,
    #[error("Invalid parameters were provided: {}", message)]
    InvalidParams {
        message: String
    },
    #[error("Server internal JSON-RPC error: {}", message)]
    InternalError {
        message: String,
        data: Option<String>,
    },
    #[error("Server returned error: [{}] {}", code, message)]
    ServerError {
        code: i64,
        message: String,
        data: Option<String>,
    },
    #[error("Server answered with HTTP status {}: {}", status, body)]
    HttpStatus {
        status: u16,
        body: String
    },
    #[error("Server returned a response without result")]
    MissingResult,
    #[error("Error while (de)serializing JSON data: {}", _0)]
    SerializationError(#[from] serde_json::Error),
    #[error("HTTP error during JSON-RPC communication: {}", _0)]
    HttpError(#[from] reqwest::Error),
}

impl JsonRPCError {
    // Transport level failures: the request may never have reached the node
    // Everything else is an answer from the node itself
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::HttpError(_) | Self::HttpStatus { .. })
    }
}
