use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{MemberFilter, MemberStore, StoreError, StoreTx, bootstrap, constraint};
use crate::audit::{NewStatusUpdate, StatusUpdate};
use crate::member::model::{
    Account, AccountId, GroupId, GroupInfo, Member, MemberId, MemberPatch, NewPin, Pin,
};
use crate::member::status::Status;

/// Points at which a transaction can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertMember,
    UpdateMember,
    AddGroups,
    RemoveGroups,
    InsertStatusUpdate,
    InsertAccount,
    InsertPin,
    Commit,
}

impl FailPoint {
    fn as_str(self) -> &'static str {
        match self {
            Self::InsertMember => "insert_member",
            Self::UpdateMember => "update_member",
            Self::AddGroups => "add_groups",
            Self::RemoveGroups => "remove_groups",
            Self::InsertStatusUpdate => "insert_status_update",
            Self::InsertAccount => "insert_account",
            Self::InsertPin => "insert_pin",
            Self::Commit => "commit",
        }
    }
}

#[derive(Debug, Clone)]
struct ResetToken {
    member_id: MemberId,
    token_hash: String,
    expires_at: DateTime<Utc>,
    used: bool,
}

#[derive(Debug, Clone, Default)]
struct State {
    last_id: i64,
    members: BTreeMap<MemberId, Member>,
    groups: BTreeMap<GroupId, String>,
    member_groups: BTreeSet<(MemberId, GroupId)>,
    status_updates: Vec<StatusUpdate>,
    accounts: BTreeMap<AccountId, Account>,
    pins: Vec<Pin>,
    reset_tokens: Vec<ResetToken>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn email_taken(&self, email: &str, except: Option<MemberId>) -> bool {
        self.members
            .values()
            .any(|m| Some(m.id) != except && m.email.eq_ignore_ascii_case(email))
    }

    fn username_taken(&self, username: &str, except: Option<MemberId>) -> bool {
        self.members.values().any(|m| {
            Some(m.id) != except
                && m.username
                    .as_deref()
                    .is_some_and(|u| u.eq_ignore_ascii_case(username))
        })
    }
}

/// Primary store held in process memory. Transactions take an exclusive
/// lock and work on a copy of the state, so uncommitted writes are never
/// visible and a dropped transaction leaves nothing behind.
///
/// Reads block while a transaction is open.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    faults: Arc<DashSet<FailPoint>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// An empty store with the system groups seeded.
    pub fn new() -> Self {
        let mut state = State::default();
        for (id, description) in bootstrap::SYSTEM_GROUPS {
            state.groups.insert(*id, (*description).to_owned());
        }
        Self {
            state: Arc::new(Mutex::new(state)),
            faults: Arc::new(DashSet::new()),
        }
    }

    /// Make every later transaction fail at `point` until cleared.
    pub fn fail_on(&self, point: FailPoint) {
        self.faults.insert(point);
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    // -- fixtures -----------------------------------------------------------

    pub async fn add_group(&self, id: GroupId, description: &str) {
        self.state
            .lock()
            .await
            .groups
            .insert(id, description.to_owned());
    }

    /// Grant a group outside the lifecycle, as an administrator would.
    pub async fn grant_group(&self, member_id: MemberId, group_id: GroupId) {
        self.state
            .lock()
            .await
            .member_groups
            .insert((member_id, group_id));
    }

    /// Stand-in for the ledger process, the only writer of balances.
    pub async fn set_balance(&self, member_id: MemberId, balance: i64) {
        if let Some(member) = self.state.lock().await.members.get_mut(&member_id) {
            member.balance = balance;
        }
    }

    /// Move every reset token issued to `member_id` into the past.
    pub async fn expire_reset_tokens(&self, member_id: MemberId) {
        let mut state = self.state.lock().await;
        for token in state
            .reset_tokens
            .iter_mut()
            .filter(|t| t.member_id == member_id)
        {
            token.expires_at = DateTime::<Utc>::MIN_UTC;
        }
    }
}

#[async_trait]
impl MemberStore for MemoryStore {
    async fn find_member(&self, id: MemberId) -> Result<Option<Member>, StoreError> {
        Ok(self.state.lock().await.members.get(&id).cloned())
    }

    async fn find_member_by_email(&self, email: &str) -> Result<Option<Member>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .members
            .values()
            .find(|m| m.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn username_taken(
        &self,
        username: &str,
        except: Option<MemberId>,
    ) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.username_taken(username, except))
    }

    async fn list_members(&self, filter: MemberFilter) -> Result<Vec<Member>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .members
            .values()
            .filter(|m| filter.matches(m.status))
            .cloned()
            .collect())
    }

    async fn count_members(&self, filter: MemberFilter) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        let count = state
            .members
            .values()
            .filter(|m| filter.matches(m.status))
            .count();
        i64::try_from(count).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn members_for_account(&self, account_id: AccountId) -> Result<Vec<Member>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .members
            .values()
            .filter(|m| m.account_id == Some(account_id))
            .cloned()
            .collect())
    }

    async fn group_ids_for_member(&self, id: MemberId) -> Result<BTreeSet<GroupId>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .member_groups
            .iter()
            .filter(|(m, _)| *m == id)
            .map(|(_, g)| *g)
            .collect())
    }

    async fn groups_for_member(&self, id: MemberId) -> Result<Vec<GroupInfo>, StoreError> {
        let state = self.state.lock().await;
        state
            .member_groups
            .iter()
            .filter(|(m, _)| *m == id)
            .map(|(_, g)| {
                let description = state
                    .groups
                    .get(g)
                    .ok_or_else(|| StoreError::Corrupt(format!("unknown group {g}")))?;
                Ok(GroupInfo {
                    id: *g,
                    description: description.clone(),
                })
            })
            .collect()
    }

    async fn member_ids_in_group(&self, group_id: GroupId) -> Result<Vec<MemberId>, StoreError> {
        let state = self.state.lock().await;
        let mut ids: Vec<MemberId> = state
            .member_groups
            .iter()
            .filter(|(_, g)| *g == group_id)
            .map(|(m, _)| *m)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.state.lock().await.accounts.get(&id).cloned())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self.state.lock().await.accounts.values().cloned().collect())
    }

    async fn find_pin_for_member(&self, id: MemberId) -> Result<Option<Pin>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .pins
            .iter()
            .rev()
            .find(|p| p.member_id == id)
            .cloned())
    }

    async fn status_updates_for_member(
        &self,
        id: MemberId,
    ) -> Result<Vec<StatusUpdate>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .status_updates
            .iter()
            .filter(|u| u.member_id == id)
            .cloned()
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            faults: Arc::clone(&self.faults),
        }))
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    working: State,
    faults: Arc<DashSet<FailPoint>>,
}

impl MemoryTx {
    fn check(&self, point: FailPoint) -> Result<(), StoreError> {
        if self.faults.contains(&point) {
            return Err(StoreError::Injected(point.as_str()));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_member(&mut self, email: &str, status: Status) -> Result<MemberId, StoreError> {
        self.check(FailPoint::InsertMember)?;
        if self.working.email_taken(email, None) {
            return Err(StoreError::UniqueViolation(constraint::MEMBER_EMAIL.into()));
        }
        let id = self.working.next_id();
        self.working.members.insert(
            id,
            Member {
                id,
                name: None,
                email: email.to_owned(),
                username: None,
                handle: None,
                account_id: None,
                address_1: None,
                address_2: None,
                address_city: None,
                address_postcode: None,
                contact_number: None,
                balance: 0,
                credit_limit: 0,
                unlock_text: None,
                status,
                join_date: None,
            },
        );
        Ok(id)
    }

    async fn update_member(
        &mut self,
        id: MemberId,
        expected: Status,
        patch: &MemberPatch,
    ) -> Result<bool, StoreError> {
        self.check(FailPoint::UpdateMember)?;
        if let Some(username) = patch.username.as_deref()
            && self.working.username_taken(username, Some(id))
        {
            return Err(StoreError::UniqueViolation(
                constraint::MEMBER_USERNAME.into(),
            ));
        }
        if let Some(account_id) = patch.account_id
            && !self.working.accounts.contains_key(&account_id)
        {
            return Err(StoreError::Corrupt(format!("unknown account {account_id}")));
        }
        match self.working.members.get_mut(&id) {
            Some(member) if member.status == expected => {
                patch.apply_to(member);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn add_groups(
        &mut self,
        member_id: MemberId,
        groups: &BTreeSet<GroupId>,
    ) -> Result<(), StoreError> {
        self.check(FailPoint::AddGroups)?;
        for group in groups {
            if !self.working.groups.contains_key(group) {
                return Err(StoreError::Corrupt(format!("unknown group {group}")));
            }
            self.working.member_groups.insert((member_id, *group));
        }
        Ok(())
    }

    async fn remove_groups(
        &mut self,
        member_id: MemberId,
        groups: &BTreeSet<GroupId>,
    ) -> Result<(), StoreError> {
        self.check(FailPoint::RemoveGroups)?;
        self.working
            .member_groups
            .retain(|(m, g)| *m != member_id || !groups.contains(g));
        Ok(())
    }

    async fn insert_status_update(&mut self, update: &NewStatusUpdate) -> Result<i64, StoreError> {
        self.check(FailPoint::InsertStatusUpdate)?;
        let id = self.working.next_id();
        self.working.status_updates.push(StatusUpdate {
            id,
            member_id: update.member_id,
            actor_id: update.actor_id,
            from_status: update.from_status,
            to_status: update.to_status,
            at: update.at,
        });
        Ok(id)
    }

    async fn payment_ref_exists(&mut self, payment_ref: &str) -> Result<bool, StoreError> {
        Ok(self
            .working
            .accounts
            .values()
            .any(|a| a.payment_ref == payment_ref))
    }

    async fn insert_account(&mut self, payment_ref: &str) -> Result<AccountId, StoreError> {
        self.check(FailPoint::InsertAccount)?;
        if self.payment_ref_exists(payment_ref).await? {
            return Err(StoreError::UniqueViolation(constraint::PAYMENT_REF.into()));
        }
        let id = self.working.next_id();
        self.working.accounts.insert(
            id,
            Account {
                id,
                payment_ref: payment_ref.to_owned(),
            },
        );
        Ok(id)
    }

    async fn pin_exists(&mut self, pin: &str) -> Result<bool, StoreError> {
        Ok(self.working.pins.iter().any(|p| p.pin == pin))
    }

    async fn insert_pin(&mut self, pin: &NewPin<'_>) -> Result<i64, StoreError> {
        self.check(FailPoint::InsertPin)?;
        if self.pin_exists(pin.pin).await? {
            return Err(StoreError::UniqueViolation(constraint::PIN.into()));
        }
        let id = self.working.next_id();
        self.working.pins.push(Pin {
            id,
            pin: pin.pin.to_owned(),
            unlock_text: Some(pin.unlock_text.to_owned()),
            state: pin.state,
            member_id: pin.member_id,
        });
        Ok(id)
    }

    async fn insert_reset_token(
        &mut self,
        member_id: MemberId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.working.reset_tokens.push(ResetToken {
            member_id,
            token_hash: token_hash.to_owned(),
            expires_at,
            used: false,
        });
        Ok(())
    }

    async fn consume_reset_token(
        &mut self,
        token_hash: &str,
        member_id: MemberId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let token = self.working.reset_tokens.iter_mut().find(|t| {
            t.token_hash == token_hash && t.member_id == member_id && !t.used && t.expires_at > now
        });
        match token {
            Some(token) => {
                token.used = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.check(FailPoint::Commit)?;
        let MemoryTx {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{self, Actor};
    use crate::rbac::Group;

    #[tokio::test]
    async fn dropped_transaction_leaves_nothing_behind() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_member("ada@example.org", Status::Prospective)
                .await
                .unwrap();
        }
        assert_eq!(store.count_members(MemberFilter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let id = tx
            .insert_member("ada@example.org", Status::Prospective)
            .await
            .unwrap();
        audit::record(
            tx.as_mut(),
            id,
            Actor::SelfService,
            None,
            Status::Prospective,
            Utc::now(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let found = store.find_member_by_email("ADA@example.org").await.unwrap();
        assert_eq!(found.map(|m| m.id), Some(id));
        let history = audit::history(&store, id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].actor_id, id);
        assert_eq!(history[0].from_status, None);
    }

    #[tokio::test]
    async fn email_is_unique_ignoring_case() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_member("ada@example.org", Status::Prospective)
            .await
            .unwrap();
        let err = tx
            .insert_member("Ada@Example.org", Status::Prospective)
            .await
            .unwrap_err();
        assert!(
            matches!(err, StoreError::UniqueViolation(ref c) if c == constraint::MEMBER_EMAIL)
        );
    }

    #[tokio::test]
    async fn update_checks_expected_status() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let id = tx
            .insert_member("ada@example.org", Status::Prospective)
            .await
            .unwrap();
        let patch = MemberPatch {
            status: Some(Status::PreMember1),
            ..MemberPatch::default()
        };
        assert!(!tx.update_member(id, Status::PreMember2, &patch).await.unwrap());
        assert!(tx.update_member(id, Status::Prospective, &patch).await.unwrap());
        assert!(!tx.update_member(id + 100, Status::Prospective, &patch).await.unwrap());
    }

    #[tokio::test]
    async fn injected_fault_fails_the_write() {
        let store = MemoryStore::new();
        store.fail_on(FailPoint::InsertStatusUpdate);
        let mut tx = store.begin().await.unwrap();
        let id = tx
            .insert_member("ada@example.org", Status::Prospective)
            .await
            .unwrap();
        let err = audit::record(
            tx.as_mut(),
            id,
            Actor::SelfService,
            None,
            Status::Prospective,
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::Injected("insert_status_update")));

        store.clear_faults();
        drop(tx);
        assert_eq!(store.count_members(MemberFilter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_groups_keeps_others() {
        let store = MemoryStore::new();
        store.grant_group(1, Group::CurrentMembers.id()).await;
        store.grant_group(1, Group::MemberAdmin.id()).await;

        let mut tx = store.begin().await.unwrap();
        tx.remove_groups(1, &BTreeSet::from([Group::CurrentMembers.id()]))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let groups = store.group_ids_for_member(1).await.unwrap();
        assert_eq!(groups, BTreeSet::from([Group::MemberAdmin.id()]));
    }

    #[tokio::test]
    async fn reset_token_is_single_use() {
        let store = MemoryStore::new();
        let expires = Utc::now() + chrono::Duration::minutes(5);
        let mut tx = store.begin().await.unwrap();
        tx.insert_reset_token(1, "hash", expires).await.unwrap();
        assert!(!tx.consume_reset_token("hash", 2, Utc::now()).await.unwrap());
        assert!(tx.consume_reset_token("hash", 1, Utc::now()).await.unwrap());
        assert!(!tx.consume_reset_token("hash", 1, Utc::now()).await.unwrap());
    }
}
