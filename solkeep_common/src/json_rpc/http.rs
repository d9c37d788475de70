use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration
};
use log::trace;
use reqwest::Client as HttpClient;
use serde::{
    Serialize,
    de::DeserializeOwned
};
use serde_json::{json, Value};
use super::{
    JsonRPCResult, JsonRPCErrorResponse, JsonRPCError,
    JSON_RPC_VERSION, PARSE_ERROR_CODE, INVALID_REQUEST_CODE,
    METHOD_NOT_FOUND_CODE, INVALID_PARAMS_CODE, INTERNAL_ERROR_CODE
};

// Upper bound for a single request, the node is never retried by this client
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct JsonRPCClient {
    http: HttpClient,
    target: String,
    count: AtomicUsize,
}

impl JsonRPCClient {
    pub fn new(target: String) -> JsonRPCResult<Self> {
        let http = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(JsonRPCClient {
            http,
            target,
            count: AtomicUsize::new(0),
        })
    }

    pub fn get_target(&self) -> &str {
        &self.target
    }

    pub async fn call_with<P, R>(&self, method: &str, params: &P) -> JsonRPCResult<R>
        where P: Serialize + ?Sized, R: DeserializeOwned
    {
        let id = self.count.fetch_add(1, Ordering::SeqCst);
        self.send(json!({
            "jsonrpc": JSON_RPC_VERSION,
            "method": method,
            "id": id,
            "params": params
        })).await
    }

    pub async fn send<R: DeserializeOwned>(&self, value: Value) -> JsonRPCResult<R> {
        trace!("JSON-RPC request to {}: {}", self.target, value);
        let response = self.http.post(&self.target)
            .json(&value)
            .send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JsonRPCError::HttpStatus {
                status: status.as_u16(),
                body
            })
        }

        let mut response: Value = response.json().await?;
        parse_response(&mut response)
    }
}

// Extract the result from a JSON-RPC response or map its error object
fn parse_response<R: DeserializeOwned>(response: &mut Value) -> JsonRPCResult<R> {
    if let Some(error) = response.get_mut("error") {
        if !error.is_null() {
            let error: JsonRPCErrorResponse = serde_json::from_value(error.take())?;
            let data = match error.data {
                Some(content) => Some(serde_json::to_string_pretty(&content)?),
                None => None,
            };

            return Err(match error.code {
                PARSE_ERROR_CODE => JsonRPCError::ParseError,
                INVALID_REQUEST_CODE => JsonRPCError::InvalidRequest,
                METHOD_NOT_FOUND_CODE => JsonRPCError::MethodNotFound,
                INVALID_PARAMS_CODE => JsonRPCError::InvalidParams {
                    message: error.message
                },
                INTERNAL_ERROR_CODE => JsonRPCError::InternalError {
                    message: error.message,
                    data,
                },
                code => JsonRPCError::ServerError {
                    code,
                    message: error.message,
                    data,
                },
            });
        }
    }

    Ok(serde_json::from_value(
        response
            .get_mut("result")
            .ok_or(JsonRPCError::MissingResult)?
            .take(),
    )?)
}
