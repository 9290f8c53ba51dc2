use std::fmt;

use crate::auth::CredentialError;
use crate::member::model::MemberId;
use crate::member::status::Status;
use crate::store::StoreError;
use crate::validation::FieldError;

/// The status an operation needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedStatus {
    Is(Status),
    Not(Status),
}

impl ExpectedStatus {
    pub fn allows(self, found: Status) -> bool {
        match self {
            Self::Is(s) => found == s,
            Self::Not(s) => found != s,
        }
    }
}

impl fmt::Display for ExpectedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Is(s) => write!(f, "{s}"),
            Self::Not(s) => write!(f, "not {s}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MemberError {
    #[error("member {0} not found")]
    NotFound(MemberId),

    #[error("member {member_id} is {found}, expected {expected}")]
    InvalidStateTransition {
        member_id: MemberId,
        expected: ExpectedStatus,
        found: Status,
    },

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("an acting member is required")]
    ActorRequired,

    #[error("missing required fields: {}", .0.join(", "))]
    Incomplete(Vec<&'static str>),

    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("member {0} was changed concurrently")]
    Conflict(MemberId),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MemberError {
    pub(crate) fn guard(
        member_id: MemberId,
        expected: ExpectedStatus,
        found: Status,
    ) -> Result<(), Self> {
        if expected.allows(found) {
            Ok(())
        } else {
            Err(Self::InvalidStateTransition {
                member_id,
                expected,
                found,
            })
        }
    }
}
