use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::member::model::{GroupId, MemberId};
use crate::member::status::Status;
use crate::rbac::{CapabilityCheck, Group};
use crate::store::{MemberStore, StoreError};

/// Groups the pipeline itself grants. A member leaving `Current` loses these
/// and keeps anything granted by hand.
pub fn pipeline_groups() -> BTreeSet<GroupId> {
    BTreeSet::from([Group::CurrentMembers.id()])
}

/// Group set implied by moving to `new_status`: empty unless the member is
/// becoming `Current`, in which case their existing groups plus
/// `CurrentMembers`.
pub fn derive_groups(existing: &BTreeSet<GroupId>, new_status: Status) -> BTreeSet<GroupId> {
    if new_status != Status::Current {
        return BTreeSet::new();
    }
    let mut groups = existing.clone();
    groups.insert(Group::CurrentMembers.id());
    groups
}

/// Group writes needed for one status change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupChange {
    pub add: BTreeSet<GroupId>,
    pub remove: BTreeSet<GroupId>,
}

impl GroupChange {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    pub fn plan(existing: &BTreeSet<GroupId>, from: Status, to: Status) -> Self {
        if from == to {
            return Self::default();
        }
        if to == Status::Current {
            let add = derive_groups(existing, to)
                .difference(existing)
                .copied()
                .collect();
            Self {
                add,
                remove: BTreeSet::new(),
            }
        } else {
            let remove = pipeline_groups().intersection(existing).copied().collect();
            Self {
                add: BTreeSet::new(),
                remove,
            }
        }
    }
}

/// Group membership as seen through the member store.
#[derive(Clone)]
pub struct GroupMembership {
    store: Arc<dyn MemberStore>,
}

impl GroupMembership {
    pub fn new(store: Arc<dyn MemberStore>) -> Self {
        Self { store }
    }

    pub async fn groups_for_member(
        &self,
        member_id: MemberId,
    ) -> Result<BTreeSet<GroupId>, StoreError> {
        self.store.group_ids_for_member(member_id).await
    }

    pub async fn is_member_in_group(
        &self,
        member_id: MemberId,
        group_id: GroupId,
    ) -> Result<bool, StoreError> {
        Ok(self.groups_for_member(member_id).await?.contains(&group_id))
    }

    pub async fn derive_groups_for_transition(
        &self,
        member_id: MemberId,
        new_status: Status,
    ) -> Result<BTreeSet<GroupId>, StoreError> {
        if new_status != Status::Current {
            return Ok(BTreeSet::new());
        }
        let existing = self.groups_for_member(member_id).await?;
        Ok(derive_groups(&existing, new_status))
    }

    /// Read the member's groups and plan the writes for `from -> to`. Must
    /// be called before the transaction that applies the change is opened.
    pub async fn plan_transition(
        &self,
        member_id: MemberId,
        from: Status,
        to: Status,
    ) -> Result<GroupChange, StoreError> {
        if from == to {
            return Ok(GroupChange::default());
        }
        let existing = self.groups_for_member(member_id).await?;
        Ok(GroupChange::plan(&existing, from, to))
    }
}

#[async_trait]
impl CapabilityCheck for GroupMembership {
    async fn is_member_in_group(
        &self,
        member_id: MemberId,
        group_id: GroupId,
    ) -> Result<bool, StoreError> {
        GroupMembership::is_member_in_group(self, member_id, group_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    const CURRENT: GroupId = 2;
    const GATEKEEPER: GroupId = 3;

    #[test]
    fn derive_is_empty_unless_current() {
        let existing = BTreeSet::from([GATEKEEPER]);
        for status in Status::ALL {
            let derived = derive_groups(&existing, status);
            if status == Status::Current {
                assert_eq!(derived, BTreeSet::from([CURRENT, GATEKEEPER]));
            } else {
                assert!(derived.is_empty(), "{status}");
            }
        }
    }

    #[test]
    fn becoming_current_adds_only_missing_groups() {
        let change = GroupChange::plan(&BTreeSet::new(), Status::PreMember3, Status::Current);
        assert_eq!(change.add, BTreeSet::from([CURRENT]));
        assert!(change.remove.is_empty());

        let change = GroupChange::plan(
            &BTreeSet::from([CURRENT]),
            Status::ExMember,
            Status::Current,
        );
        assert!(change.is_empty());
    }

    #[test]
    fn leaving_current_keeps_manual_groups() {
        let existing = BTreeSet::from([CURRENT, GATEKEEPER]);
        let change = GroupChange::plan(&existing, Status::Current, Status::ExMember);
        assert_eq!(change.remove, BTreeSet::from([CURRENT]));
        assert!(change.add.is_empty());
    }

    #[test]
    fn unchanged_status_plans_nothing() {
        let existing = BTreeSet::from([CURRENT]);
        assert!(GroupChange::plan(&existing, Status::Current, Status::Current).is_empty());
    }

    #[tokio::test]
    async fn reads_through_the_store() {
        let store = MemoryStore::new();
        store.grant_group(9, GATEKEEPER).await;
        let groups = GroupMembership::new(Arc::new(store));

        assert!(groups.is_member_in_group(9, GATEKEEPER).await.unwrap());
        assert!(!groups.is_member_in_group(9, CURRENT).await.unwrap());
        assert_eq!(
            groups
                .derive_groups_for_transition(9, Status::Current)
                .await
                .unwrap(),
            BTreeSet::from([CURRENT, GATEKEEPER])
        );
        assert!(
            groups
                .derive_groups_for_transition(9, Status::PreMember2)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
