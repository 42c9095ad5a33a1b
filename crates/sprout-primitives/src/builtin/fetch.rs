// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::primitive::{ExecEnv, Primitive, PrimitiveResult};

pub struct FetchPrimitive;

#[async_trait]
impl Primitive for FetchPrimitive {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "HTTP round-trip. method defaults to GET; headers is an object of\n\
         string values; body is sent verbatim. Success iff the response\n\
         status is 2xx. The response body is returned as text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Absolute URL to request"
                },
                "method": {
                    "type": "string",
                    "description": "HTTP method (default GET)"
                },
                "headers": {
                    "type": "object",
                    "description": "Request headers as string key/value pairs"
                },
                "body": {
                    "type": "string",
                    "description": "Request body"
                }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        args: &Value,
        _env: &ExecEnv,
        cancel: &CancellationToken,
    ) -> PrimitiveResult {
        let Some(url) = args.get("url").and_then(|v| v.as_str()) else {
            return PrimitiveResult::fail("missing required parameter 'url'");
        };
        let method_str = args
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("GET")
            .to_uppercase();
        let method = match reqwest::Method::from_bytes(method_str.as_bytes()) {
            Ok(m) => m,
            Err(_) => return PrimitiveResult::fail(format!("invalid method {method_str:?}")),
        };

        debug!(url, method = %method, "fetch");

        let client = reqwest::Client::new();
        let mut req = client.request(method, url);
        if let Some(headers) = args.get("headers").and_then(|v| v.as_object()) {
            for (k, v) in headers {
                if let Some(v) = v.as_str() {
                    req = req.header(k, v);
                }
            }
        }
        if let Some(body) = args.get("body").and_then(|v| v.as_str()) {
            req = req.body(body.to_string());
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return PrimitiveResult::fail("cancelled"),
            r = req.send() => r,
        };
        let response = match response {
            Ok(r) => r,
            Err(e) => return PrimitiveResult::fail(format!("request error: {e}")),
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let output = format!("HTTP {status}\n\n{body}");
        if status.is_success() {
            PrimitiveResult::ok(output)
        } else {
            PrimitiveResult::fail_with_output(output, format!("HTTP {status}"))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
