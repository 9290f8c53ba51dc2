use serde::Serialize;

pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_PASSWORD_LENGTH: usize = 1024;
pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 30;

/// A single failed field check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Structural check: every listed field must be present and non-blank.
/// Returns the names of the missing fields.
pub fn require(fields: &[(&'static str, &str)]) -> Result<(), Vec<&'static str>> {
    let missing: Vec<&'static str> = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing)
    }
}

pub fn check_length(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), FieldError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(FieldError::new(
            field,
            format!("{field} must be between {min} and {max} characters (got {len})"),
        ));
    }
    Ok(())
}

pub fn check_email(value: &str) -> Result<(), FieldError> {
    check_length("email", value, 3, 254)?;
    let invalid = || FieldError::new("email", "invalid email address");

    if value.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = value.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(invalid());
    }
    Ok(())
}

pub fn check_username(value: &str) -> Result<(), FieldError> {
    if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(FieldError::new(
            "username",
            "Alpha-numeric characters only",
        ));
    }
    if value.len() < MIN_USERNAME_LENGTH || value.len() > MAX_USERNAME_LENGTH {
        return Err(FieldError::new(
            "username",
            format!("Between {MIN_USERNAME_LENGTH} to {MAX_USERNAME_LENGTH} characters"),
        ));
    }
    Ok(())
}

pub fn check_password(field: &'static str, value: &str) -> Result<(), FieldError> {
    if value.is_empty() {
        return Err(FieldError::new(field, "This field cannot be left blank"));
    }
    if value.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(FieldError::new(field, "Password too short"));
    }
    if value.len() > MAX_PASSWORD_LENGTH {
        return Err(FieldError::new(field, "Password too long"));
    }
    Ok(())
}

pub fn check_confirmation(
    field: &'static str,
    password: &str,
    confirm: &str,
) -> Result<(), FieldError> {
    if password != confirm {
        return Err(FieldError::new(field, "Passwords don't match"));
    }
    Ok(())
}

/// Collects field errors so a request reports every problem at once.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, result: Result<(), FieldError>) -> &mut Self {
        if let Err(e) = result {
            // First failure per field wins, matching how forms display errors.
            if !self.errors.iter().any(|existing| existing.field == e.field) {
                self.errors.push(e);
            }
        }
        self
    }

    pub fn finish(self) -> Result<(), Vec<FieldError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}
