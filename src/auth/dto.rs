use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Special characters accepted (and one required) in a password.
const PASSWORD_SPECIALS: &str = "@$!%*?&^#";
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", .0.join("; "))]
pub struct ValidationError(pub Vec<String>);

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref FIRST_NAME_RE: Regex = Regex::new(r"^[a-zA-Z]+$").unwrap();
    static ref LAST_NAME_RE: Regex = Regex::new(r"^[a-zA-Z\s]+$").unwrap();
    static ref PHONE_RE: Regex = Regex::new(r"^\+[1-9]\d{1,14}$").unwrap();
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_email(email: &str, errors: &mut Vec<String>) {
    if email.is_empty() {
        errors.push("Email is required!".into());
    } else if !EMAIL_RE.is_match(email) {
        errors.push("Invalid email address!".into());
    }
}

fn check_strong_password(password: &str, errors: &mut Vec<String>) {
    if password.is_empty() {
        errors.push("Password is required!".into());
        return;
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.push("Password should be at least 8 characters long".into());
    }
    let strong = password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| PASSWORD_SPECIALS.contains(c))
        && password
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || PASSWORD_SPECIALS.contains(c));
    if !strong {
        errors.push(
            "Password should include at least 1 uppercase, 1 lowercase, 1 number, and 1 special character"
                .into(),
        );
    }
}

fn check_confirmation(password: &str, confirm: &str, errors: &mut Vec<String>) {
    if confirm.is_empty() {
        errors.push("Confirm password is required!".into());
    } else if password != confirm {
        errors.push("Confirm password does not match the password".into());
    }
}

fn finish<T>(value: T, errors: Vec<String>) -> Result<T, ValidationError> {
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(ValidationError(errors))
    }
}

/// Request body for signup.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone_number: String,
}

/// Signup input that passed validation; passwords already matched.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
}

impl SignUpRequest {
    pub fn validate(self) -> Result<NewAccount, ValidationError> {
        let email = normalize_email(&self.email);
        let first_name = self.first_name.trim().to_string();
        let last_name = self.last_name.trim().to_string();
        let phone_number = self.phone_number.trim().to_string();

        let mut errors = Vec::new();
        check_email(&email, &mut errors);
        check_strong_password(&self.password, &mut errors);
        check_confirmation(&self.password, &self.confirm_password, &mut errors);
        if first_name.is_empty() {
            errors.push("First name is required!".into());
        } else if !FIRST_NAME_RE.is_match(&first_name) {
            errors.push("First name should only contain alphabetic characters (A-Z, a-z)".into());
        }
        if last_name.is_empty() {
            errors.push("Last name is required!".into());
        } else if !LAST_NAME_RE.is_match(&last_name) {
            errors.push("Last name should only contain alphabetic characters and spaces".into());
        }
        if phone_number.is_empty() {
            errors.push("Phone number is required!".into());
        } else if !PHONE_RE.is_match(&phone_number) {
            errors.push("Invalid phone number format".into());
        }

        finish(
            NewAccount {
                email,
                password: self.password,
                first_name,
                last_name,
                phone_number,
            },
            errors,
        )
    }
}

/// Request body for sign-in.
#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl SignInRequest {
    /// Only presence is checked: password rules must not narrow who can log in.
    pub fn validate(self) -> Result<Credentials, ValidationError> {
        let email = normalize_email(&self.email);
        let mut errors = Vec::new();
        check_email(&email, &mut errors);
        if self.password.is_empty() {
            errors.push("Password is required!".into());
        }
        finish(
            Credentials {
                email,
                password: self.password,
            },
            errors,
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    #[serde(default)]
    pub code: String,
}

impl VerifyEmailRequest {
    pub fn validate(self) -> Result<String, ValidationError> {
        let code = self.code.trim().to_string();
        if code.is_empty() {
            return Err(ValidationError(vec!["Verification code is required!".into()]));
        }
        Ok(code)
    }
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: String,
}

impl ForgotPasswordRequest {
    pub fn validate(self) -> Result<String, ValidationError> {
        let email = normalize_email(&self.email);
        let mut errors = Vec::new();
        check_email(&email, &mut errors);
        finish(email, errors)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub confirm_password: String,
}

/// New password that passed strength and confirmation checks.
#[derive(Debug, Clone)]
pub struct NewPassword(pub String);

impl ResetPasswordRequest {
    pub fn validate(self) -> Result<NewPassword, ValidationError> {
        let mut errors = Vec::new();
        check_strong_password(&self.new_password, &mut errors);
        check_confirmation(&self.new_password, &self.confirm_password, &mut errors);
        finish(NewPassword(self.new_password), errors)
    }
}

/// Envelope every auth endpoint answers with.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }
}

/// `data` payload for endpoints that return nothing.
#[derive(Debug, Default, Serialize)]
pub struct Empty {}
