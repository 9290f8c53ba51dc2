//! Validation scoped to each lifecycle operation. An operation checks only
//! the fields it writes, so bad data elsewhere on a legacy record never
//! blocks it.

use crate::member::error::MemberError;
use crate::member::model::{
    ChangePasswordRequest, ForgotPasswordRequest, Member, RegisterRequest, RejectDetailsRequest,
    ResetPasswordRequest, SetupDetailsRequest, SetupLoginRequest,
};
use crate::validation::{
    FieldError, Validator, check_confirmation, check_email, check_length, check_password,
    check_username, require,
};

const MAX_NAME_LENGTH: usize = 100;
const MAX_ADDRESS_LENGTH: usize = 100;
const MAX_POSTCODE_LENGTH: usize = 16;
const MAX_CONTACT_LENGTH: usize = 30;
const MAX_SUBJECT_LENGTH: usize = 200;
const MAX_MESSAGE_LENGTH: usize = 10_000;

fn required(fields: &[(&'static str, &str)]) -> Result<(), MemberError> {
    require(fields).map_err(MemberError::Incomplete)
}

fn finish(v: Validator) -> Result<(), MemberError> {
    v.finish().map_err(MemberError::Validation)
}

fn check_contact_number(value: &str) -> Result<(), FieldError> {
    check_length("contact_number", value, 1, MAX_CONTACT_LENGTH)?;
    let allowed = |c: char| c.is_ascii_digit() || " +-()".contains(c);
    if !value.chars().all(allowed) || !value.chars().any(|c| c.is_ascii_digit()) {
        return Err(FieldError::new(
            "contact_number",
            "Only digits, spaces and + - ( ) are allowed",
        ));
    }
    Ok(())
}

fn check_new_password(
    v: &mut Validator,
    field: &'static str,
    confirm_field: &'static str,
    password: &str,
    confirm: &str,
) {
    v.check(check_password(field, password))
        .check(check_password(confirm_field, confirm))
        .check(check_confirmation(confirm_field, password, confirm));
}

// -- register -----------------------------------------------------------------

pub fn require_register(req: &RegisterRequest) -> Result<(), MemberError> {
    required(&[("email", req.email.as_str())])
}

pub fn validate_register(req: &RegisterRequest) -> Result<(), MemberError> {
    let mut v = Validator::new();
    v.check(check_email(req.email.trim()));
    finish(v)
}

// -- login --------------------------------------------------------------------

pub fn require_login(req: &SetupLoginRequest) -> Result<(), MemberError> {
    required(&[
        ("name", req.name.as_str()),
        ("username", req.username.as_str()),
        ("email", req.email.as_str()),
        ("password", req.password.as_str()),
        ("password_confirm", req.password_confirm.as_str()),
    ])
}

/// `merged` is the stored record with the request applied; `stored_email`
/// is the address the member registered with.
pub fn validate_login(
    merged: &Member,
    req: &SetupLoginRequest,
    stored_email: &str,
    username_taken: bool,
) -> Result<(), MemberError> {
    let name = merged.name.as_deref().unwrap_or_default();
    let username = merged.username.as_deref().unwrap_or_default();

    let mut v = Validator::new();
    v.check(check_length("name", name, 1, MAX_NAME_LENGTH))
        .check(check_username(username));
    if username_taken {
        v.check(Err(FieldError::new("username", "That username is already taken")));
    }
    v.check(check_email(req.email.trim()));
    if !req.email.trim().eq_ignore_ascii_case(stored_email) {
        v.check(Err(FieldError::new(
            "email",
            "Email does not match the registered address",
        )));
    }
    check_new_password(
        &mut v,
        "password",
        "password_confirm",
        &req.password,
        &req.password_confirm,
    );
    finish(v)
}

// -- details ------------------------------------------------------------------

pub fn require_details(req: &SetupDetailsRequest) -> Result<(), MemberError> {
    required(&[
        ("address_1", req.address_1.as_str()),
        ("address_city", req.address_city.as_str()),
        ("address_postcode", req.address_postcode.as_str()),
        ("contact_number", req.contact_number.as_str()),
    ])
}

pub fn validate_details(merged: &Member) -> Result<(), MemberError> {
    let address_1 = merged.address_1.as_deref().unwrap_or_default();
    let address_2 = merged.address_2.as_deref().unwrap_or_default();
    let city = merged.address_city.as_deref().unwrap_or_default();
    let postcode = merged.address_postcode.as_deref().unwrap_or_default();
    let contact = merged.contact_number.as_deref().unwrap_or_default();

    let mut v = Validator::new();
    v.check(check_length("address_1", address_1, 1, MAX_ADDRESS_LENGTH))
        .check(check_length("address_2", address_2, 0, MAX_ADDRESS_LENGTH))
        .check(check_length("address_city", city, 1, MAX_ADDRESS_LENGTH))
        .check(check_length("address_postcode", postcode, 1, MAX_POSTCODE_LENGTH))
        .check(check_contact_number(contact));
    finish(v)
}

// -- rejection notice ---------------------------------------------------------

pub fn require_notice(req: &RejectDetailsRequest) -> Result<(), MemberError> {
    required(&[("subject", req.subject.as_str()), ("message", req.message.as_str())])
}

pub fn validate_notice(req: &RejectDetailsRequest) -> Result<(), MemberError> {
    let mut v = Validator::new();
    v.check(check_length("subject", req.subject.trim(), 1, MAX_SUBJECT_LENGTH))
        .check(check_length("message", req.message.trim(), 1, MAX_MESSAGE_LENGTH));
    finish(v)
}

// -- passwords ----------------------------------------------------------------

pub fn require_password_change(req: &ChangePasswordRequest) -> Result<(), MemberError> {
    required(&[
        ("current_password", req.current_password.as_str()),
        ("new_password", req.new_password.as_str()),
        ("new_password_confirm", req.new_password_confirm.as_str()),
    ])
}

pub fn validate_password_change(req: &ChangePasswordRequest) -> Result<(), MemberError> {
    let mut v = Validator::new();
    check_new_password(
        &mut v,
        "new_password",
        "new_password_confirm",
        &req.new_password,
        &req.new_password_confirm,
    );
    finish(v)
}

pub fn require_forgot(req: &ForgotPasswordRequest) -> Result<(), MemberError> {
    required(&[("email", req.email.as_str())])
}

pub fn validate_forgot(req: &ForgotPasswordRequest) -> Result<(), MemberError> {
    let mut v = Validator::new();
    v.check(check_email(req.email.trim()));
    finish(v)
}

pub fn require_reset(req: &ResetPasswordRequest) -> Result<(), MemberError> {
    required(&[
        ("email", req.email.as_str()),
        ("new_password", req.new_password.as_str()),
        ("new_password_confirm", req.new_password_confirm.as_str()),
    ])
}

pub fn validate_reset(req: &ResetPasswordRequest) -> Result<(), MemberError> {
    let mut v = Validator::new();
    v.check(check_email(req.email.trim()));
    check_new_password(
        &mut v,
        "new_password",
        "new_password_confirm",
        &req.new_password,
        &req.new_password_confirm,
    );
    finish(v)
}
