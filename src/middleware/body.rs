//! Size-limited body parsing.
//!
//! Reads the whole body (up to the configured limit), decodes JSON and
//! URL-encoded content, decodes the query string and stores everything in a
//! [`RequestContext`] extension. The raw bytes are handed on unchanged.
//!
//! # Failures
//!
//! - Declared or actual size above the limit: `413 PayloadTooLarge`
//! - JSON that does not parse, or whose top level is not an object or
//!   array: `400 MalformedBody`

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde_json::Value;
use tracing::debug;

use super::pollution::parse_urlencoded;
use crate::config::Config;
use crate::context::{BodyKind, RequestContext};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy)]
pub struct BodyParser {
    limit: usize,
}

impl BodyParser {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.body_limit)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Parse `req` and return it with a [`RequestContext`] attached.
    pub async fn prepare(&self, req: Request) -> AppResult<Request> {
        if let Some(declared) = content_length(req.headers())
            && declared > self.limit
        {
            debug!(declared, limit = self.limit, "Rejecting oversized body");
            return Err(AppError::PayloadTooLarge { limit: self.limit });
        }

        let (mut parts, body) = req.into_parts();
        let bytes = self.read(body).await?;

        let mut ctx = RequestContext::new(
            parts.method.clone(),
            parts.uri.path(),
            parts.headers.clone(),
        );
        if let Some(query) = parts.uri.query() {
            ctx.query = Value::Object(parse_urlencoded(query.as_bytes()));
        }
        let (kind, body) = decode(&parts.headers, &bytes)?;
        ctx.body_kind = kind;
        ctx.body = body;

        parts.extensions.insert(ctx);
        Ok(Request::from_parts(parts, Body::from(bytes)))
    }

    async fn read(&self, body: Body) -> AppResult<Bytes> {
        match Limited::new(body, self.limit).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.is::<LengthLimitError>() => {
                Err(AppError::PayloadTooLarge { limit: self.limit })
            }
            Err(e) => Err(AppError::MalformedBody(format!(
                "Failed to read request body: {e}"
            ))),
        }
    }
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Media type without parameters, lower-cased.
fn media_type(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    let essence = raw.split(';').next()?.trim().to_ascii_lowercase();
    (!essence.is_empty()).then_some(essence)
}

fn is_json(media_type: &str) -> bool {
    media_type == "application/json" || media_type.ends_with("+json")
}

fn decode(headers: &HeaderMap, bytes: &[u8]) -> AppResult<(BodyKind, Value)> {
    if bytes.is_empty() {
        return Ok((BodyKind::Empty, Value::Null));
    }

    match media_type(headers).as_deref() {
        Some(media) if is_json(media) => {
            let value: Value = serde_json::from_slice(bytes)?;
            if !(value.is_object() || value.is_array()) {
                return Err(AppError::MalformedBody(
                    "Request body must be a JSON object or array".to_string(),
                ));
            }
            Ok((BodyKind::Json, value))
        }
        Some("application/x-www-form-urlencoded") => {
            Ok((BodyKind::Form, Value::Object(parse_urlencoded(bytes))))
        }
        _ => Ok((BodyKind::Other, Value::Null)),
    }
}

/// Middleware entry point for the body parser.
pub async fn parse_body(State(parser): State<BodyParser>, req: Request, next: Next) -> Response {
    match parser.prepare(req).await {
        Ok(req) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}
