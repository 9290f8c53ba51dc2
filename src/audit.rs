use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::member::model::MemberId;
use crate::member::status::Status;
use crate::store::{MemberStore, StoreError, StoreTx};

/// Who requested an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// The member acting on their own record, unauthenticated or otherwise.
    SelfService,
    Member(MemberId),
}

impl Actor {
    /// Id `0` is the legacy encoding of self-service.
    pub fn from_id(id: MemberId) -> Self {
        if id == 0 {
            Self::SelfService
        } else {
            Self::Member(id)
        }
    }

    /// The member id recorded for an action on `subject`.
    pub fn resolve(self, subject: MemberId) -> MemberId {
        match self {
            Self::SelfService => subject,
            Self::Member(id) => id,
        }
    }

    pub fn member_id(self) -> Option<MemberId> {
        match self {
            Self::SelfService => None,
            Self::Member(id) => Some(id),
        }
    }
}

/// One immutable status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub id: i64,
    pub member_id: MemberId,
    pub actor_id: MemberId,
    /// `None` when the record was created by this change.
    pub from_status: Option<Status>,
    pub to_status: Status,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStatusUpdate {
    pub member_id: MemberId,
    pub actor_id: MemberId,
    pub from_status: Option<Status>,
    pub to_status: Status,
    pub at: DateTime<Utc>,
}

/// Append an audit record inside `tx`. It becomes visible only if the
/// transaction commits.
#[tracing::instrument(skip(tx), fields(from = ?from, %to), err)]
pub async fn record(
    tx: &mut dyn StoreTx,
    member_id: MemberId,
    actor: Actor,
    from: Option<Status>,
    to: Status,
    at: DateTime<Utc>,
) -> Result<i64, StoreError> {
    let update = NewStatusUpdate {
        member_id,
        actor_id: actor.resolve(member_id),
        from_status: from,
        to_status: to,
        at,
    };
    tx.insert_status_update(&update).await
}

/// A member's status history, oldest first.
pub async fn history(
    store: &dyn MemberStore,
    member_id: MemberId,
) -> Result<Vec<StatusUpdate>, StoreError> {
    store.status_updates_for_member(member_id).await
}
