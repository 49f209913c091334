//! Raw HTTP wrapper the WSG client builds every call on
//!
//! Callers supply the full URL, every header and the body. Non-success
//! statuses are turned into errors, everything else comes back untouched.

use std::time::Duration;

use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// One fully specified request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl RequestOptions {
    pub fn new(method: Method, timeout: Duration) -> Self {
        Self {
            method,
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Replace a header (case-insensitive) or add it
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => *existing = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Response from a call, capturing everything the WSG client reads
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Option<Value>,
    pub raw_body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Body as JSON, or a no-data error naming `operation`
    pub fn json(&self, operation: &str) -> ClientResult<&Value> {
        match &self.body {
            Some(body) => Ok(body),
            None if self.raw_body.trim().is_empty() => Err(ClientError::no_data(operation)),
            None => Err(ClientError::parse(operation, "body is not JSON")),
        }
    }
}

/// Thin request wrapper around a shared reqwest client
#[derive(Clone)]
pub struct HttpRequester {
    client: Client,
}

impl HttpRequester {
    pub fn new() -> ClientResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| ClientError::transport("build http client", e))?;
        Ok(Self { client })
    }

    /// Send a request; transport failures and non-success statuses are errors
    pub async fn request(
        &self,
        operation: &str,
        url: &str,
        options: RequestOptions,
    ) -> ClientResult<ApiResponse> {
        debug!(operation, method = %options.method, url, "WSG request");

        let mut request = self
            .client
            .request(options.method, url)
            .timeout(options.timeout);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::transport(operation, e))?;
        let response = Self::parse_response(operation, response).await?;

        if !response.is_success() {
            return Err(ClientError::Status {
                operation: operation.to_string(),
                status: response.status,
                body: response.raw_body,
            });
        }
        Ok(response)
    }

    async fn parse_response(operation: &str, response: Response) -> ClientResult<ApiResponse> {
        let status = response.status();
        let raw_body = response
            .text()
            .await
            .map_err(|e| ClientError::transport(operation, e))?;
        let body = serde_json::from_str(&raw_body).ok();

        Ok(ApiResponse {
            status,
            body,
            raw_body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut options = RequestOptions::new(Method::GET, Duration::from_secs(1))
            .header("continuationToken", "");
        options.set_header("ContinuationToken", "abc");
        assert_eq!(options.headers.len(), 1);
        assert_eq!(options.headers[0].1, "abc");
    }

    #[test]
    fn test_json_distinguishes_empty_from_garbage() {
        let empty = ApiResponse {
            status: StatusCode::OK,
            body: None,
            raw_body: String::new(),
        };
        assert!(matches!(empty.json("op"), Err(ClientError::NoData { .. })));

        let garbage = ApiResponse {
            raw_body: "<html>".into(),
            ..empty.clone()
        };
        assert!(matches!(garbage.json("op"), Err(ClientError::Parse { .. })));
    }
}
