//! HTTP parameter pollution protection.
//!
//! `?role=user&role=admin` decodes to `{"role": ["user", "admin"]}`. Unless
//! the key is whitelisted, the guard collapses such arrays to their last
//! element so every later stage sees a scalar. The transform applies to the
//! query string and to URL-encoded bodies; JSON bodies are left alone since
//! arrays there are explicit.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::Config;
use crate::context::{BodyKind, RequestContext};

/// Decode `application/x-www-form-urlencoded` input into a JSON object.
///
/// Repeated keys become arrays in submission order.
pub fn parse_urlencoded(input: &[u8]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in form_urlencoded::parse(input) {
        let value = Value::String(value.into_owned());
        match map.get_mut(key.as_ref()) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key.into_owned(), value);
            }
        }
    }
    map
}

/// Replace every array value with its last element, except for keys in
/// `whitelist`. Returns the keys that were collapsed.
pub fn collapse_repeated(map: &mut Map<String, Value>, whitelist: &[String]) -> Vec<String> {
    let mut collapsed = Vec::new();
    for (key, value) in map.iter_mut() {
        if whitelist.iter().any(|allowed| allowed == key) {
            continue;
        }
        if let Value::Array(values) = value {
            *value = values.pop().unwrap_or(Value::Null);
            collapsed.push(key.clone());
        }
    }
    collapsed
}

/// Shared state of the pollution guard stage.
#[derive(Debug, Clone, Default)]
pub struct PollutionGuard {
    whitelist: Arc<Vec<String>>,
}

impl PollutionGuard {
    pub fn new(whitelist: Vec<String>) -> Self {
        Self {
            whitelist: Arc::new(whitelist),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.parameter_whitelist.clone())
    }

    /// Normalize the query and, for form bodies, the body of `ctx`.
    pub fn apply(&self, ctx: &mut RequestContext) {
        if let Value::Object(query) = &mut ctx.query {
            let collapsed = collapse_repeated(query, &self.whitelist);
            if !collapsed.is_empty() {
                debug!(keys = ?collapsed, "Collapsed repeated query parameters");
            }
        }
        if ctx.body_kind == BodyKind::Form
            && let Value::Object(body) = &mut ctx.body
        {
            let collapsed = collapse_repeated(body, &self.whitelist);
            if !collapsed.is_empty() {
                debug!(keys = ?collapsed, "Collapsed repeated form fields");
            }
        }
    }
}

/// Middleware entry point for the pollution guard.
pub async fn guard_pollution(
    State(guard): State<PollutionGuard>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(ctx) = req.extensions_mut().get_mut::<RequestContext>() {
        guard.apply(ctx);
    }
    next.run(req).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method};
    use serde_json::json;

    #[test]
    fn test_parse_keeps_repeats_in_order() {
        let map = parse_urlencoded(b"a=1&b=x&a=2&a=3");
        assert_eq!(map["a"], json!(["1", "2", "3"]));
        assert_eq!(map["b"], json!("x"));
    }

    #[test]
    fn test_parse_decodes_percent_and_plus() {
        let map = parse_urlencoded(b"name=Jane+Doe&note=a%26b");
        assert_eq!(map["name"], "Jane Doe");
        assert_eq!(map["note"], "a&b");
    }

    #[test]
    fn test_last_value_wins() {
        let mut two = parse_urlencoded(b"sort=a&sort=b");
        collapse_repeated(&mut two, &[]);
        assert_eq!(two["sort"], "b");

        let mut three = parse_urlencoded(b"sort=a&sort=b&sort=c");
        let collapsed = collapse_repeated(&mut three, &[]);
        assert_eq!(three["sort"], "c");
        assert_eq!(collapsed, vec!["sort".to_string()]);
    }

    #[test]
    fn test_collapse_is_idempotent() {
        let mut map = parse_urlencoded(b"a=1&a=2");
        collapse_repeated(&mut map, &[]);
        let once = map.clone();
        collapse_repeated(&mut map, &[]);
        assert_eq!(map, once);
    }

    #[test]
    fn test_whitelisted_keys_stay_arrays() {
        let mut map = parse_urlencoded(b"tag=a&tag=b&sort=x&sort=y");
        collapse_repeated(&mut map, &["tag".to_string()]);
        assert_eq!(map["tag"], json!(["a", "b"]));
        assert_eq!(map["sort"], "y");
    }

    #[test]
    fn test_json_body_untouched() {
        let guard = PollutionGuard::default();
        let mut ctx = RequestContext::new(Method::POST, "/", HeaderMap::new());
        ctx.body_kind = BodyKind::Json;
        ctx.body = json!({"ids": [1, 2]});
        ctx.query = Value::Object(parse_urlencoded(b"x=1&x=2"));

        guard.apply(&mut ctx);
        assert_eq!(ctx.body, json!({"ids": [1, 2]}));
        assert_eq!(ctx.query, json!({"x": "2"}));
    }

    #[test]
    fn test_form_body_collapsed() {
        let guard = PollutionGuard::default();
        let mut ctx = RequestContext::new(Method::POST, "/", HeaderMap::new());
        ctx.body_kind = BodyKind::Form;
        ctx.body = Value::Object(parse_urlencoded(b"email=a@x.io&email=b@x.io"));

        guard.apply(&mut ctx);
        assert_eq!(ctx.body, json!({"email": "b@x.io"}));
    }
}
