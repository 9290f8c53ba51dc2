use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::member::model::MemberId;

/// One async mutex per member, so operations on the same member run one at
/// a time within this process. Entries live only while some task holds or
/// waits on them.
#[derive(Default)]
pub struct MemberLocks {
    locks: DashMap<MemberId, Arc<Mutex<()>>>,
}

/// Held for the duration of an operation on one member.
pub struct MemberGuard<'a> {
    locks: &'a DashMap<MemberId, Arc<Mutex<()>>>,
    member_id: MemberId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for MemberGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left: nobody holds or awaits it.
        self.locks
            .remove_if(&self.member_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl MemberLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, member_id: MemberId) -> MemberGuard<'_> {
        // Clone the Arc out so the shard lock is released before awaiting.
        let lock = Arc::clone(self.locks.entry(member_id).or_default().value());
        let guard = lock.lock_owned().await;
        MemberGuard {
            locks: &self.locks,
            member_id,
            guard: Some(guard),
        }
    }
}
