//! Declarative request validation.
//!
//! A [`Schema`] is an immutable list of [`Field`]s built once at startup and
//! attached to a route. Validating a JSON value against it either yields the
//! coerced value (trimmed strings, lower-cased emails, parsed integers,
//! applied defaults, unknown keys rejected) or the complete list of
//! [`FieldViolation`]s.
//!
//! # Collection Policy
//!
//! Every field is checked, so a payload breaking `k` fields reports `k`
//! violations. Within one field, checking stops at the first broken rule.
//!
//! # Field Factories
//!
//! | Factory              | Rules                                                    |
//! |----------------------|----------------------------------------------------------|
//! | [`Field::email`]     | valid address, at most 254 characters, lower-cased       |
//! | [`Field::password`]  | 8-128 characters, lower + upper + digit                  |
//! | [`Field::name`]      | 2-100 characters, letters, spaces, hyphens, apostrophes  |
//! | [`Field::username`]  | 3-30 alphanumeric characters                             |
//! | [`Field::identifier`]| one [`IdFormat`] per resource type                       |
//! | [`pagination`]       | `page`, `limit`, `sort`, `order` with defaults           |

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum length of an email address (RFC 5321 path limit).
pub const MAX_EMAIL_LENGTH: usize = 254;

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;

pub const MIN_NAME_LENGTH: usize = 2;
pub const MAX_NAME_LENGTH: usize = 100;

pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 30;

/// Largest page size a client may request.
pub const MAX_PAGE_LIMIT: i64 = 100;

pub const DEFAULT_PAGE_LIMIT: i64 = 10;

/// Sort keys accepted by [`pagination`].
pub const SORT_FIELDS: &[&str] = &["createdAt", "updatedAt", "name", "email"];

pub const SORT_ORDERS: &[&str] = &["asc", "desc"];

/// Length of a hexadecimal object identifier.
pub const HEX_ID_LENGTH: usize = 24;

const PASSWORD_MIX: &str =
    "must contain at least one lowercase letter, one uppercase letter, and one number";

#[allow(clippy::expect_used)]
static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+",
        r"@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?",
        r"(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$",
    ))
    .expect("email pattern is a valid literal")
});

// =============================================================================
// Violations
// =============================================================================

/// Rule category of a violation, safe to show in any environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Required,
    Type,
    Length,
    Format,
    Range,
    Enum,
    Unknown,
}

/// One broken rule on one field.
#[derive(Debug, Clone, Serialize)]
pub struct FieldViolation {
    /// Field path (top-level key, or empty for the whole target)
    pub field: String,
    /// Human-readable message; never embeds the submitted value
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ViolationKind,
    /// The submitted value, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Placeholder substituted for submitted values in redacted output.
pub const REDACTED_VALUE: &str = "[REDACTED]";

/// A violation with the submitted value replaced by [`REDACTED_VALUE`].
#[derive(Debug, Clone, Serialize)]
pub struct RedactedViolation {
    pub field: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ViolationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<&'static str>,
}

impl FieldViolation {
    fn new(field: &str, kind: ViolationKind, detail: &str, value: Option<&Value>) -> Self {
        let message = if field.is_empty() {
            format!("Request {detail}")
        } else {
            format!("\"{field}\" {detail}")
        };
        Self {
            field: field.to_string(),
            message,
            kind,
            value: value.cloned(),
        }
    }

    /// Strip the submitted value for production responses.
    pub fn redacted(&self) -> RedactedViolation {
        RedactedViolation {
            field: self.field.clone(),
            message: self.message.clone(),
            kind: self.kind,
            value: self.value.as_ref().map(|_| REDACTED_VALUE),
        }
    }
}

// =============================================================================
// Rules
// =============================================================================

/// Identifier format for a resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdFormat {
    /// Random (version 4) UUID, normalized to lower-case hyphenated form
    UuidV4,
    /// 24 hexadecimal characters, normalized to lower case
    Hex24,
    /// Integer greater than zero
    PositiveInteger,
}

impl FromStr for IdFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uuid" | "uuidv4" => Ok(IdFormat::UuidV4),
            "hex" | "hex24" | "objectid" => Ok(IdFormat::Hex24),
            "integer" | "int" => Ok(IdFormat::PositiveInteger),
            other => Err(format!(
                "unknown identifier format '{other}' (expected uuid, hex24 or integer)"
            )),
        }
    }
}

impl fmt::Display for IdFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdFormat::UuidV4 => write!(f, "uuid"),
            IdFormat::Hex24 => write!(f, "hex24"),
            IdFormat::PositiveInteger => write!(f, "integer"),
        }
    }
}

/// What a single field must look like.
#[derive(Debug, Clone)]
pub enum Rule {
    /// Trimmed string with length bounds
    Text { min: usize, max: usize },
    Username,
    Name,
    Email,
    Password,
    /// Integer (strings are parsed) with optional bounds
    Integer { min: Option<i64>, max: Option<i64> },
    /// One of a fixed set of strings
    OneOf(&'static [&'static str]),
    Identifier(IdFormat),
}

type Checked = Result<Value, (ViolationKind, String)>;

impl Rule {
    fn check(&self, value: &Value) -> Checked {
        match self {
            Rule::Text { min, max } => check_text(value, *min, *max).map(Value::String),
            Rule::Username => {
                let s = check_text(value, MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH)?;
                if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err((
                        ViolationKind::Format,
                        "must only contain alpha-numeric characters".to_string(),
                    ));
                }
                Ok(Value::String(s))
            }
            Rule::Name => {
                let s = check_text(value, MIN_NAME_LENGTH, MAX_NAME_LENGTH)?;
                if !s
                    .chars()
                    .all(|c| c.is_alphabetic() || c == ' ' || c == '-' || c == '\'')
                {
                    return Err((
                        ViolationKind::Format,
                        "must only contain letters, spaces, hyphens, and apostrophes".to_string(),
                    ));
                }
                Ok(Value::String(s))
            }
            Rule::Email => {
                let s = as_string(value)?.trim().to_lowercase();
                if s.len() > MAX_EMAIL_LENGTH {
                    return Err((
                        ViolationKind::Length,
                        format!("must be at most {MAX_EMAIL_LENGTH} characters long"),
                    ));
                }
                if !EMAIL_PATTERN.is_match(&s) {
                    return Err((
                        ViolationKind::Format,
                        "must be a valid email address".to_string(),
                    ));
                }
                Ok(Value::String(s))
            }
            Rule::Password => {
                // Passwords are never trimmed
                let s = as_string(value)?;
                let len = s.chars().count();
                if len < MIN_PASSWORD_LENGTH {
                    return Err((
                        ViolationKind::Length,
                        format!("must be at least {MIN_PASSWORD_LENGTH} characters long"),
                    ));
                }
                if len > MAX_PASSWORD_LENGTH {
                    return Err((
                        ViolationKind::Length,
                        format!("must be at most {MAX_PASSWORD_LENGTH} characters long"),
                    ));
                }
                let lower = s.chars().any(|c| c.is_ascii_lowercase());
                let upper = s.chars().any(|c| c.is_ascii_uppercase());
                let digit = s.chars().any(|c| c.is_ascii_digit());
                if !(lower && upper && digit) {
                    return Err((ViolationKind::Format, PASSWORD_MIX.to_string()));
                }
                Ok(Value::String(s.to_string()))
            }
            Rule::Integer { min, max } => {
                let n = as_integer(value).ok_or_else(|| {
                    (ViolationKind::Type, "must be an integer".to_string())
                })?;
                if let Some(min) = min
                    && n < *min
                {
                    return Err((
                        ViolationKind::Range,
                        format!("must be greater than or equal to {min}"),
                    ));
                }
                if let Some(max) = max
                    && n > *max
                {
                    return Err((
                        ViolationKind::Range,
                        format!("must be less than or equal to {max}"),
                    ));
                }
                Ok(Value::from(n))
            }
            Rule::OneOf(allowed) => {
                let s = as_string(value)?.trim();
                if !allowed.contains(&s) {
                    return Err((
                        ViolationKind::Enum,
                        format!("must be one of [{}]", allowed.join(", ")),
                    ));
                }
                Ok(Value::String(s.to_string()))
            }
            Rule::Identifier(format) => check_identifier(value, *format),
        }
    }
}

fn as_string(value: &Value) -> Result<&str, (ViolationKind, String)> {
    value
        .as_str()
        .ok_or_else(|| (ViolationKind::Type, "must be a string".to_string()))
}

fn check_text(value: &Value, min: usize, max: usize) -> Result<String, (ViolationKind, String)> {
    let s = as_string(value)?.trim();
    let len = s.chars().count();
    if len < min {
        return Err((
            ViolationKind::Length,
            format!("must be at least {min} characters long"),
        ));
    }
    if len > max {
        return Err((
            ViolationKind::Length,
            format!("must be at most {max} characters long"),
        ));
    }
    Ok(s.to_string())
}

/// Integers arrive as JSON numbers (body) or strings (query, path, forms).
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn check_identifier(value: &Value, format: IdFormat) -> Checked {
    match format {
        IdFormat::PositiveInteger => match as_integer(value) {
            Some(n) if n > 0 => Ok(Value::from(n)),
            _ => Err((
                ViolationKind::Format,
                "must be a positive integer".to_string(),
            )),
        },
        IdFormat::UuidV4 => {
            let s = as_string(value)?.trim();
            match Uuid::parse_str(s) {
                Ok(id) if id.get_version_num() == 4 => {
                    Ok(Value::String(id.hyphenated().to_string()))
                }
                _ => Err((ViolationKind::Format, "must be a valid UUID".to_string())),
            }
        }
        IdFormat::Hex24 => {
            let s = as_string(value)?.trim();
            if s.len() != HEX_ID_LENGTH || !s.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err((
                    ViolationKind::Format,
                    format!("must be a {HEX_ID_LENGTH}-character hexadecimal identifier"),
                ));
            }
            Ok(Value::String(s.to_ascii_lowercase()))
        }
    }
}

// =============================================================================
// Fields and Schemas
// =============================================================================

/// A named field with its rule, presence requirement and optional default.
#[derive(Debug, Clone)]
pub struct Field {
    name: &'static str,
    rule: Rule,
    required: bool,
    default: Option<Value>,
}

impl Field {
    /// A required field with an arbitrary rule.
    pub fn new(name: &'static str, rule: Rule) -> Self {
        Self {
            name,
            rule,
            required: true,
            default: None,
        }
    }

    pub fn email(name: &'static str) -> Self {
        Self::new(name, Rule::Email)
    }

    pub fn password(name: &'static str) -> Self {
        Self::new(name, Rule::Password)
    }

    pub fn name(name: &'static str) -> Self {
        Self::new(name, Rule::Name)
    }

    pub fn username(name: &'static str) -> Self {
        Self::new(name, Rule::Username)
    }

    pub fn text(name: &'static str, min: usize, max: usize) -> Self {
        Self::new(name, Rule::Text { min, max })
    }

    pub fn identifier(name: &'static str, format: IdFormat) -> Self {
        Self::new(name, Rule::Identifier(format))
    }

    /// Make the field optional; absent values are left out of the output.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Substitute `default` when the field is absent (implies optional).
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.required = false;
        self.default = Some(default.into());
        self
    }

    pub fn field_name(&self) -> &'static str {
        self.name
    }
}

/// Pagination fields: `page` (default 1), `limit` (1-100, default 10),
/// `sort` (default `createdAt`) and `order` (default `desc`).
pub fn pagination() -> Vec<Field> {
    vec![
        Field::new(
            "page",
            Rule::Integer {
                min: Some(1),
                max: None,
            },
        )
        .with_default(1),
        Field::new(
            "limit",
            Rule::Integer {
                min: Some(1),
                max: Some(MAX_PAGE_LIMIT),
            },
        )
        .with_default(DEFAULT_PAGE_LIMIT),
        Field::new("sort", Rule::OneOf(SORT_FIELDS)).with_default("createdAt"),
        Field::new("order", Rule::OneOf(SORT_ORDERS)).with_default("desc"),
    ]
}

/// Immutable description of the shape a request target must have.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
    allow_unknown: bool,
    any_of: Option<&'static [&'static str]>,
}

impl Schema {
    /// An empty schema that rejects unknown keys.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Keep keys the schema does not describe instead of rejecting them.
    pub fn allow_unknown(mut self) -> Self {
        self.allow_unknown = true;
        self
    }

    /// Require at least one of `names` to be present.
    pub fn require_any(mut self, names: &'static [&'static str]) -> Self {
        self.any_of = Some(names);
        self
    }

    /// Validate `input` and return the coerced value or every violation.
    ///
    /// A missing target (`null`) validates as an empty object. Empty strings
    /// count as absent, matching how HTML forms submit untouched inputs.
    pub fn validate(&self, input: &Value) -> Result<Value, Vec<FieldViolation>> {
        let empty = Map::new();
        let object = match input {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(vec![FieldViolation::new(
                    "",
                    ViolationKind::Type,
                    "must be an object",
                    Some(other),
                )]);
            }
        };

        let mut output = Map::new();
        let mut violations = Vec::new();

        for field in &self.fields {
            let present = object
                .get(field.name)
                .filter(|v| !v.is_null() && v.as_str() != Some(""));

            match present {
                Some(value) => match field.rule.check(value) {
                    Ok(coerced) => {
                        output.insert(field.name.to_string(), coerced);
                    }
                    Err((kind, detail)) => {
                        violations.push(FieldViolation::new(
                            field.name,
                            kind,
                            &detail,
                            Some(value),
                        ));
                    }
                },
                None => {
                    if let Some(default) = &field.default {
                        output.insert(field.name.to_string(), default.clone());
                    } else if field.required {
                        violations.push(FieldViolation::new(
                            field.name,
                            ViolationKind::Required,
                            "is required",
                            None,
                        ));
                    }
                }
            }
        }

        for (key, value) in object {
            if self.fields.iter().any(|f| f.name == key) {
                continue;
            }
            if self.allow_unknown {
                output.insert(key.clone(), value.clone());
            } else {
                violations.push(FieldViolation::new(
                    key,
                    ViolationKind::Unknown,
                    "is not allowed",
                    Some(value),
                ));
            }
        }

        if let Some(names) = self.any_of
            && !names.iter().any(|name| output.contains_key(*name))
        {
            violations.push(FieldViolation::new(
                "",
                ViolationKind::Required,
                &format!("must contain at least one of: {}", names.join(", ")),
                None,
            ));
        }

        if violations.is_empty() {
            Ok(Value::Object(output))
        } else {
            Err(violations)
        }
    }
}
