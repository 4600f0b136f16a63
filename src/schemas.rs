//! Validation schemas for the API routes.

use crate::validation::{Field, IdFormat, Rule, Schema, pagination};

/// Roles accepted by the user list filter.
pub const USER_ROLES: &[&str] = &["user", "admin", "moderator"];

/// Bounds of the contact form message.
pub const CONTACT_MESSAGE_MIN: usize = 10;
pub const CONTACT_MESSAGE_MAX: usize = 1000;

/// Bounds of the contact form subject.
pub const CONTACT_SUBJECT_MIN: usize = 1;
pub const CONTACT_SUBJECT_MAX: usize = 200;

pub fn user_id(format: IdFormat) -> Schema {
    Schema::new().field(Field::identifier("id", format))
}

pub fn item_id() -> Schema {
    Schema::new().field(Field::identifier("id", IdFormat::PositiveInteger))
}

pub fn list_users() -> Schema {
    Schema::new()
        .fields(pagination())
        .field(Field::new("role", Rule::OneOf(USER_ROLES)).optional())
}

pub fn create_user() -> Schema {
    Schema::new()
        .field(Field::username("username"))
        .field(Field::email("email"))
        .field(Field::password("password"))
        .field(Field::name("name").optional())
}

pub fn update_user() -> Schema {
    Schema::new()
        .field(Field::name("name").optional())
        .field(Field::email("email").optional())
        .require_any(&["name", "email"])
}

pub fn contact() -> Schema {
    Schema::new()
        .field(Field::name("name"))
        .field(Field::email("email"))
        .field(Field::text(
            "message",
            CONTACT_MESSAGE_MIN,
            CONTACT_MESSAGE_MAX,
        ))
        .field(Field::text("subject", CONTACT_SUBJECT_MIN, CONTACT_SUBJECT_MAX).optional())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_user_reports_every_violation() {
        let violations = create_user()
            .validate(&json!({
                "username": "ab",
                "email": "not-an-email",
                "password": "weak",
            }))
            .unwrap_err();

        let fields: Vec<_> = violations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["username", "email", "password"]);
    }

    #[test]
    fn test_list_users_defaults_and_role() {
        let value = list_users().validate(&json!({"role": "admin"})).unwrap();
        assert_eq!(value["page"], 1);
        assert_eq!(value["limit"], 10);
        assert_eq!(value["order"], "desc");
        assert_eq!(value["role"], "admin");

        assert!(list_users().validate(&json!({"role": "root"})).is_err());
    }

    #[test]
    fn test_user_id_follows_format() {
        let uuid = json!({"id": "7C9E6679-7425-40DE-944B-E07FC1F90AE7"});
        let value = user_id(IdFormat::UuidV4).validate(&uuid).unwrap();
        assert_eq!(value["id"], "7c9e6679-7425-40de-944b-e07fc1f90ae7");
        assert!(user_id(IdFormat::Hex24).validate(&uuid).is_err());

        let hex = json!({"id": "507f1f77bcf86cd799439011"});
        assert!(user_id(IdFormat::Hex24).validate(&hex).is_ok());
        assert!(user_id(IdFormat::UuidV4).validate(&hex).is_err());
    }

    #[test]
    fn test_item_id_must_be_positive() {
        let violations = item_id().validate(&json!({"id": "-5"})).unwrap_err();
        assert!(violations[0].message.contains("positive integer"));
        assert_eq!(item_id().validate(&json!({"id": "123"})).unwrap()["id"], 123);
    }

    #[test]
    fn test_contact_message_bounds() {
        let short = contact()
            .validate(&json!({"name": "Ada", "email": "ada@example.com", "message": "hi"}))
            .unwrap_err();
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].field, "message");

        let ok = contact().validate(&json!({
            "name": "Ada",
            "email": "ada@example.com",
            "message": "Hello there, friend",
        }));
        assert!(ok.is_ok());
    }
}
