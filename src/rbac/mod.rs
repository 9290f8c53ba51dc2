pub mod types;

use async_trait::async_trait;

use crate::member::model::{GroupId, MemberId};
use crate::store::StoreError;

pub use types::Group;

/// Groups whose members may act on another member's account.
pub const ADMIN_GROUPS: [Group; 2] = [Group::MemberAdmin, Group::FullAccess];

/// External capability check consulted for admin-gated operations.
#[async_trait]
pub trait CapabilityCheck: Send + Sync {
    async fn is_member_in_group(
        &self,
        member_id: MemberId,
        group_id: GroupId,
    ) -> Result<bool, StoreError>;
}

/// Whether `actor_id` holds one of [`ADMIN_GROUPS`].
pub async fn is_admin(check: &dyn CapabilityCheck, actor_id: MemberId) -> Result<bool, StoreError> {
    for group in ADMIN_GROUPS {
        if check.is_member_in_group(actor_id, group.id()).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether `actor_id` may manage `target_id`'s account: either it is their
/// own, or the actor holds one of [`ADMIN_GROUPS`].
#[tracing::instrument(skip(check), err)]
pub async fn can_manage_member(
    check: &dyn CapabilityCheck,
    actor_id: MemberId,
    target_id: MemberId,
) -> Result<bool, StoreError> {
    if actor_id == target_id || is_admin(check, actor_id).await? {
        return Ok(true);
    }
    tracing::warn!(actor_id, target_id, "actor lacks member admin capability");
    Ok(false)
}
