//! Request bodies for account writes.
//!
//! Bodies arrive as JSON, `multipart/form-data` or urlencoded forms. All
//! three are flattened into one string map with dotted keys for nested
//! objects (`password.password`), so the same rules apply whatever the
//! client sent. A `profile_image` file part is kept aside as raw bytes.

use axum::{
    async_trait,
    extract::{FromRequest, Multipart, Request},
    http::header::CONTENT_TYPE,
    Form, Json,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    normalize_email, validate_email, validate_name, validate_password, validate_phone_number,
    validate_username, PasswordContext,
};
use crate::db::{Account, AccountChanges, DbPool, UniqueField};
use crate::AppState;

const REQUIRED: &str = "This field is required.";
const BLANK: &str = "This field may not be blank.";
const PASSWORDS_MUST_MATCH: &str = "The two passwords must match";
const NON_FIELD_ERRORS: &str = "non_field_errors";

pub const PROFILE_IMAGE_FIELD: &str = "profile_image";

/// A flattened request body
#[derive(Debug, Default, Clone)]
pub struct FormPayload {
    fields: HashMap<String, String>,
    pub profile_image: Option<Vec<u8>>,
}

impl FormPayload {
    pub fn from_fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            profile_image: None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    fn from_json(value: Value) -> Result<Self, ApiError> {
        let Value::Object(map) = value else {
            return Err(ApiError::bad_request("Expected a JSON object"));
        };
        let mut fields = HashMap::new();
        flatten_json("", map, &mut fields);
        Ok(Self {
            fields,
            profile_image: None,
        })
    }
}

fn flatten_json(prefix: &str, map: serde_json::Map<String, Value>, out: &mut HashMap<String, String>) {
    for (key, value) in map {
        let key = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(inner) => flatten_json(&key, inner, out),
            Value::Null => {}
            Value::String(s) => {
                out.insert(key, s);
            }
            other => {
                out.insert(key, other.to_string());
            }
        }
    }
}

#[async_trait]
impl FromRequest<Arc<AppState>> for FormPayload {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::from_rejection(e.status(), e.body_text()))?;
            return read_multipart(multipart).await;
        }

        if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| ApiError::from_rejection(e.status(), e.body_text()))?;
            return Ok(Self {
                fields,
                profile_image: None,
            });
        }

        let Json(value) = Json::<Value>::from_request(req, state)
            .await
            .map_err(|e| ApiError::from_rejection(e.status(), e.body_text()))?;
        Self::from_json(value)
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<FormPayload, ApiError> {
    let mut payload = FormPayload::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::from_rejection(e.status(), e.body_text()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == PROFILE_IMAGE_FIELD {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::from_rejection(e.status(), e.body_text()))?;
            // Browsers send an empty part when no file was picked
            if !bytes.is_empty() {
                payload.profile_image = Some(bytes.to_vec());
            }
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| ApiError::from_rejection(e.status(), e.body_text()))?;
            payload.fields.insert(name, text);
        }
    }

    Ok(payload)
}

// -------------------------------------------------------------------------
// Account create / update
// -------------------------------------------------------------------------

/// A validated registration
#[derive(Debug)]
pub struct AccountRegistration {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: i64,
    pub password: String,
    pub profile_image: Option<Vec<u8>>,
}

/// PUT replaces every field, PATCH only the ones sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Replace,
    Partial,
}

/// A validated update; the image is stored by the caller
#[derive(Debug)]
pub struct AccountUpdate {
    pub changes: AccountChanges,
    pub profile_image: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct ProfileFields {
    username: Option<String>,
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    phone_number: Option<i64>,
}

/// Validate the non-password account fields.
///
/// `required` makes absent fields an error; otherwise they are skipped.
/// Uniqueness is checked against every account except `exclude_id`.
async fn validate_profile_fields(
    pool: &DbPool,
    form: &FormPayload,
    required: bool,
    exclude_id: Option<&str>,
    errors: &mut ValidationErrorBuilder,
) -> Result<ProfileFields, ApiError> {
    let mut out = ProfileFields::default();

    let text = |key: &str, errors: &mut ValidationErrorBuilder| -> Option<String> {
        match form.get(key).map(str::trim) {
            None if required => {
                errors.add(key, REQUIRED);
                None
            }
            None => None,
            Some("") => {
                errors.add(key, BLANK);
                None
            }
            Some(value) => Some(value.to_string()),
        }
    };

    let username = text("username", errors);
    let email = text("email", errors);
    let first_name = text("first_name", errors);
    let last_name = text("last_name", errors);
    let phone = text("phone_number", errors);

    if let Some(username) = username {
        if let Err(e) = validate_username(&username) {
            errors.add("username", e);
        } else if Account::is_taken(pool, UniqueField::Username, &username, exclude_id).await? {
            errors.add("username", "The username entered is already registered by another user");
        } else {
            out.username = Some(username);
        }
    }

    if let Some(email) = email.map(|e| normalize_email(&e)) {
        if let Err(e) = validate_email(&email) {
            errors.add("email", e);
        } else if Account::is_taken(pool, UniqueField::Email, &email, exclude_id).await? {
            errors.add("email", "The email entered is already registered by another user");
        } else {
            out.email = Some(email);
        }
    }

    for (key, value, slot) in [
        ("first_name", first_name, &mut out.first_name),
        ("last_name", last_name, &mut out.last_name),
    ] {
        if let Some(value) = value {
            match validate_name(&value) {
                Err(e) => {
                    errors.add(key, e);
                }
                Ok(()) => *slot = Some(value),
            }
        }
    }

    if let Some(phone) = phone {
        match validate_phone_number(&phone) {
            Err(e) => {
                errors.add("phone_number", e);
            }
            Ok(number) => {
                if Account::is_taken(pool, UniqueField::PhoneNumber, &number.to_string(), exclude_id).await? {
                    errors.add("phone_number", "The entered phone number is already registered");
                } else {
                    out.phone_number = Some(number);
                }
            }
        }
    }

    Ok(out)
}

/// Run the password validators on the blocking pool; returns every message
async fn password_errors(password: &str, context: PasswordContext<'_>) -> Result<Vec<String>, ApiError> {
    let password = password.to_string();
    let [username, first_name, last_name, email] =
        [context.username, context.first_name, context.last_name, context.email]
            .map(|v| v.map(str::to_string));

    tokio::task::spawn_blocking(move || {
        let context = PasswordContext {
            username: username.as_deref(),
            first_name: first_name.as_deref(),
            last_name: last_name.as_deref(),
            email: email.as_deref(),
        };
        validate_password(&password, context).err().unwrap_or_default()
    })
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "Password validation task failed");
        ApiError::internal("Failed to validate password")
    })
}

/// Validate `password` / `password_confirm` found under `prefix`.
///
/// Field errors land on `<prefix>.password` and friends; a mismatch is
/// reported as `<prefix>.non_field_errors`.
async fn validate_password_pair(
    form: &FormPayload,
    prefix: Option<&str>,
    context: PasswordContext<'_>,
    errors: &mut ValidationErrorBuilder,
) -> Result<Option<String>, ApiError> {
    let key = |name: &str| match prefix {
        Some(p) => format!("{p}.{name}"),
        None => name.to_string(),
    };

    let mut read = |name: &str| -> Option<String> {
        match form.get(&key(name)) {
            None => {
                errors.add(key(name), REQUIRED);
                None
            }
            Some("") => {
                errors.add(key(name), BLANK);
                None
            }
            Some(value) => Some(value.to_string()),
        }
    };

    let password = read("password");
    let confirm = read("password_confirm");

    let mut valid = None;
    if let Some(password) = password {
        let messages = password_errors(&password, context).await?;
        if messages.is_empty() {
            valid = Some(password);
        } else {
            for message in messages {
                errors.add(key("password"), message);
            }
        }
    }

    let (Some(password), Some(confirm)) = (valid, confirm) else {
        return Ok(None);
    };
    if password != confirm {
        errors.add(key(NON_FIELD_ERRORS), PASSWORDS_MUST_MATCH);
        return Ok(None);
    }
    Ok(Some(password))
}

/// Validate a registration: all fields required, password nested
pub async fn validate_registration(
    pool: &DbPool,
    mut form: FormPayload,
) -> Result<AccountRegistration, ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    let fields = validate_profile_fields(pool, &form, true, None, &mut errors).await?;

    let password = if !form.fields.keys().any(|k| k.starts_with("password.")) {
        errors.add("password", REQUIRED);
        None
    } else {
        // Only values that passed their own rules are compared
        let context = PasswordContext {
            username: fields.username.as_deref(),
            first_name: fields.first_name.as_deref(),
            last_name: fields.last_name.as_deref(),
            email: fields.email.as_deref(),
        };
        validate_password_pair(&form, Some("password"), context, &mut errors).await?
    };

    if let Some(err) = errors.build() {
        return Err(err);
    }

    match (
        fields.username,
        fields.email,
        fields.first_name,
        fields.last_name,
        fields.phone_number,
        password,
    ) {
        (Some(username), Some(email), Some(first_name), Some(last_name), Some(phone_number), Some(password)) => {
            Ok(AccountRegistration {
                username,
                email,
                first_name,
                last_name,
                phone_number,
                password,
                profile_image: form.profile_image.take(),
            })
        }
        _ => Err(ApiError::internal("Registration validation incomplete")),
    }
}

/// Validate an update of `account`. Password fields are ignored.
pub async fn validate_update(
    pool: &DbPool,
    account: &Account,
    mut form: FormPayload,
    mode: UpdateMode,
) -> Result<AccountUpdate, ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    let fields = validate_profile_fields(
        pool,
        &form,
        mode == UpdateMode::Replace,
        Some(&account.id),
        &mut errors,
    )
    .await?;

    errors.finish()?;

    Ok(AccountUpdate {
        changes: AccountChanges {
            username: fields.username,
            email: fields.email,
            first_name: fields.first_name,
            last_name: fields.last_name,
            phone_number: fields.phone_number,
            profile_image: None,
        },
        profile_image: form.profile_image.take(),
    })
}

/// Validate a new password for `account` (reset and change)
pub async fn validate_new_password(account: &Account, form: &FormPayload) -> Result<String, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    let context = PasswordContext {
        username: Some(&account.username),
        first_name: Some(&account.first_name),
        last_name: Some(&account.last_name),
        email: Some(&account.email),
    };

    match validate_password_pair(form, None, context, &mut errors).await? {
        Some(password) if errors.is_empty() => Ok(password),
        _ => Err(errors
            .build()
            .unwrap_or_else(|| ApiError::bad_request("Invalid password"))),
    }
}

/// Validate the reset request email and resolve it to an active account.
/// Failures are reported as 404, with field errors.
pub async fn validate_reset_request(pool: &DbPool, form: &FormPayload) -> Result<Account, ApiError> {
    let not_found = |message: &str| {
        ApiError::validation_field("email", message).with_status(axum::http::StatusCode::NOT_FOUND)
    };

    let email = match form.get("email").map(str::trim) {
        None => return Err(not_found(REQUIRED)),
        Some("") => return Err(not_found(BLANK)),
        Some(email) => normalize_email(email),
    };
    validate_email(&email).map_err(|e| not_found(&e))?;

    let account = Account::find_by_email(pool, &email)
        .await?
        .ok_or_else(|| not_found("The email provided does not match any registered on the website"))?;

    if !account.is_active {
        return Err(not_found("The account associated with this e-mail isn't active"));
    }

    Ok(account)
}
