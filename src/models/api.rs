use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{FieldViolation, RedactedViolation};

// =============================================================================
// Envelopes
// =============================================================================

/// Success envelope: `{"success": true, "data": ...}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Failure envelope: `{"success": false, "error": {...}}`.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorBody,
}

/// Client-facing failure detail.
///
/// `name` and `stack` are only ever populated in development mode.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    pub status_code: u16,
    pub reference_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<ValidationErrors>,
}

/// Per-field validation detail, full or redacted.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ValidationErrors {
    Full(Vec<FieldViolation>),
    Redacted(Vec<RedactedViolation>),
}

impl ValidationErrors {
    pub fn len(&self) -> usize {
        match self {
            ValidationErrors::Full(v) => v.len(),
            ValidationErrors::Redacted(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Body of the 404/405 fallback.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteNotFound {
    pub message: &'static str,
    pub status_code: u16,
    pub path: String,
    pub method: String,
}

// =============================================================================
// Health
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok`, or `shutting_down` once the drain has begun
    pub status: &'static str,
    /// Seconds since startup
    pub uptime: f64,
    pub timestamp: DateTime<Utc>,
    pub memory: MemoryUsage,
}

/// Process memory summary in bytes; fields are `null` where unavailable.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub rss_bytes: Option<u64>,
    pub virtual_bytes: Option<u64>,
    pub peak_rss_bytes: Option<u64>,
}

// =============================================================================
// Users
// =============================================================================

/// Pagination and filter parameters after validation.
#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub page: i64,
    pub limit: i64,
    pub sort: String,
    pub order: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Path parameter for user routes; format depends on configuration.
#[derive(Debug, Deserialize)]
pub struct UserPath {
    pub id: String,
}

/// Public view of a user. Never carries a password.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: u64,
    pub sort: String,
    pub order: String,
}

#[derive(Debug, Serialize)]
pub struct UserList {
    pub users: Vec<User>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub id: String,
    pub deleted: bool,
}

// =============================================================================
// Items
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ItemPath {
    pub id: u64,
}

#[derive(Debug, Serialize)]
pub struct Item {
    pub id: u64,
    pub name: String,
}

// =============================================================================
// Contact
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub message: String,
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactReceipt {
    pub ticket_id: Uuid,
    pub name: String,
    /// Address the reply will be sent to
    pub reply_to: String,
    pub received_at: DateTime<Utc>,
    pub subject: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::validation::{Field, Schema};
    use serde_json::json;

    #[test]
    fn test_error_body_omits_development_fields() {
        let envelope = ErrorEnvelope {
            success: false,
            error: ErrorBody {
                message: "Invalid request".to_string(),
                status_code: 400,
                reference_id: "0011223344556677".to_string(),
                name: None,
                stack: None,
                validation_errors: None,
            },
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({
                "success": false,
                "error": {
                    "message": "Invalid request",
                    "statusCode": 400,
                    "referenceId": "0011223344556677",
                }
            })
        );
    }

    #[test]
    fn test_redacted_validation_errors_serialize_flat() {
        let violations = Schema::new()
            .field(Field::email("email"))
            .validate(&json!({"email": "nope"}))
            .unwrap_err();
        let redacted =
            ValidationErrors::Redacted(violations.iter().map(|v| v.redacted()).collect());

        let value = serde_json::to_value(&redacted).unwrap();
        assert_eq!(value[0]["field"], "email");
        assert_eq!(value[0]["type"], "format");
        assert_eq!(value[0]["value"], "[REDACTED]");
    }

    #[test]
    fn test_user_list_query_defaults_role() {
        let query: ListUsersQuery = serde_json::from_value(json!({
            "page": 1, "limit": 10, "sort": "createdAt", "order": "desc"
        }))
        .unwrap();
        assert!(query.role.is_none());
    }

    #[test]
    fn test_user_never_serializes_password_field() {
        let user = User {
            id: "7c9e6679-7425-40de-944b-e07fc1f90ae7".to_string(),
            username: "ada".to_string(),
            email: "ada@example.com".to_string(),
            name: None,
            role: "user".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password"));
        assert!(json.contains("\"createdAt\""));
    }
}
