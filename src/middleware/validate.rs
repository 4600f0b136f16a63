//! Per-route schema validation stage.
//!
//! ```rust,ignore
//! post(create_user).layer(ValidateLayer::new().body(schemas::create_user()))
//! ```
//!
//! Each configured target (params, query, body) is validated in that order.
//! Violations from every target are collected before failing, so a request
//! with a bad path id and a bad body reports both. On success each target in
//! the [`RequestContext`] is replaced by its coerced value.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{FromRequestParts, RawPathParams};
use axum::http::request::Parts;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use serde_json::{Map, Value};
use tower::{Layer, Service};
use tracing::debug;

use crate::context::{RequestContext, Target};
use crate::error::{AppError, AppResult};
use crate::validation::Schema;

#[derive(Clone, Debug, Default)]
pub struct ValidateLayer {
    rules: Arc<Vec<(Target, Schema)>>,
}

impl ValidateLayer {
    pub fn new() -> Self {
        Self::default()
    }

    fn with(mut self, target: Target, schema: Schema) -> Self {
        let mut rules = Arc::unwrap_or_clone(self.rules);
        rules.push((target, schema));
        rules.sort_by_key(|(target, _)| order(*target));
        self.rules = Arc::new(rules);
        self
    }

    pub fn params(self, schema: Schema) -> Self {
        self.with(Target::Params, schema)
    }

    pub fn query(self, schema: Schema) -> Self {
        self.with(Target::Query, schema)
    }

    pub fn body(self, schema: Schema) -> Self {
        self.with(Target::Body, schema)
    }
}

fn order(target: Target) -> u8 {
    match target {
        Target::Params => 0,
        Target::Query => 1,
        Target::Body => 2,
    }
}

impl<S> Layer<S> for ValidateLayer {
    type Service = ValidateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ValidateService {
            inner,
            rules: self.rules.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ValidateService<S> {
    inner: S,
    rules: Arc<Vec<(Target, Schema)>>,
}

impl<S> Service<Request<Body>> for ValidateService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let rules = self.rules.clone();

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();
            if let Err(e) = validate_parts(&mut parts, &rules).await {
                return Ok(e.into_response());
            }
            inner.call(Request::from_parts(parts, body)).await
        })
    }
}

async fn validate_parts(parts: &mut Parts, rules: &[(Target, Schema)]) -> AppResult<()> {
    let params = path_params(parts).await;
    let ctx = parts
        .extensions
        .get_mut::<RequestContext>()
        .ok_or_else(|| AppError::Internal("validation ran before body parsing".to_string()))?;
    ctx.params = params;

    let mut coerced = Vec::with_capacity(rules.len());
    for (target, schema) in rules {
        match schema.validate(ctx.target(*target)) {
            Ok(value) => coerced.push((*target, value)),
            Err(violations) => ctx.violations.extend(violations),
        }
    }

    if !ctx.violations.is_empty() {
        debug!(
            path = %ctx.path,
            violations = ctx.violations.len(),
            "Request failed validation"
        );
        return Err(AppError::Validation(ctx.violations.clone()));
    }

    for (target, value) in coerced {
        ctx.set_target(target, value);
    }
    Ok(())
}

async fn path_params(parts: &mut Parts) -> Value {
    let mut map = Map::new();
    if let Ok(raw) = RawPathParams::from_request_parts(parts, &()).await {
        for (key, value) in &raw {
            map.insert(key.to_string(), Value::String(value.to_string()));
        }
    }
    Value::Object(map)
}
