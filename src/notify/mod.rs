use async_trait::async_trait;
use serde::Serialize;

use crate::member::model::MemberId;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    DetailsRejected,
    DetailsAccepted,
    MemberApproved,
    PasswordReset,
}

impl NoticeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DetailsRejected => "details_rejected",
            Self::DetailsAccepted => "details_accepted",
            Self::MemberApproved => "member_approved",
            Self::PasswordReset => "password_reset",
        }
    }
}

/// A message for a member, handed over after the change it describes has
/// been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub member_id: MemberId,
    pub email: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Delivery is someone else's job; the engine only hands notices over.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notice: Notice) -> Result<(), NotifyError>;
}

/// Writes every notice to the log and drops it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notice: Notice) -> Result<(), NotifyError> {
        tracing::info!(
            kind = notice.kind.as_str(),
            member_id = notice.member_id,
            subject = %notice.subject,
            "member notice"
        );
        Ok(())
    }
}
