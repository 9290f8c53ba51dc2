pub mod bootstrap;
pub mod memory;
pub mod pool;
pub mod postgres;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::audit::{NewStatusUpdate, StatusUpdate};
use crate::config::Config;
use crate::member::lifecycle::LifecycleEngine;
use crate::member::model::{
    Account, AccountId, GroupId, GroupInfo, Member, MemberId, MemberPatch, NewPin, Pin,
};
use crate::member::query::MemberQuery;
use crate::member::status::Status;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique index rejected the write. Carries the constraint name.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// A failure injected by the in-memory store's fault hooks.
    #[error("injected failure at {0}")]
    Injected(&'static str),

    #[error("stored data is inconsistent: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Db(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err
            && db_err.code().as_deref() == Some("23505")
        {
            return Self::UniqueViolation(db_err.constraint().unwrap_or("unknown").to_owned());
        }
        Self::Db(err)
    }
}

/// Constraint names shared by both stores so unique violations can be
/// attributed to a field.
pub mod constraint {
    pub const MEMBER_EMAIL: &str = "members_email_lower_key";
    pub const MEMBER_USERNAME: &str = "members_username_lower_key";
    pub const PAYMENT_REF: &str = "accounts_payment_ref_key";
    pub const PIN: &str = "pins_pin_key";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberFilter {
    All,
    Status(Status),
}

impl MemberFilter {
    pub fn matches(self, status: Status) -> bool {
        match self {
            Self::All => true,
            Self::Status(s) => s == status,
        }
    }
}

/// Read access to the primary store plus the ability to open a transaction.
/// Every write goes through [`StoreTx`].
#[async_trait]
pub trait MemberStore: Send + Sync {
    async fn find_member(&self, id: MemberId) -> Result<Option<Member>, StoreError>;

    /// Case-insensitive lookup.
    async fn find_member_by_email(&self, email: &str) -> Result<Option<Member>, StoreError>;

    /// Whether any member other than `except` holds `username`, compared
    /// case-insensitively.
    async fn username_taken(
        &self,
        username: &str,
        except: Option<MemberId>,
    ) -> Result<bool, StoreError>;

    /// Members ordered by id.
    async fn list_members(&self, filter: MemberFilter) -> Result<Vec<Member>, StoreError>;

    async fn count_members(&self, filter: MemberFilter) -> Result<i64, StoreError>;

    /// Members sharing an account, ordered by id.
    async fn members_for_account(&self, account_id: AccountId) -> Result<Vec<Member>, StoreError>;

    async fn group_ids_for_member(&self, id: MemberId) -> Result<BTreeSet<GroupId>, StoreError>;

    /// Groups with descriptions, ordered by group id.
    async fn groups_for_member(&self, id: MemberId) -> Result<Vec<GroupInfo>, StoreError>;

    async fn member_ids_in_group(&self, group_id: GroupId) -> Result<Vec<MemberId>, StoreError>;

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError>;

    /// The member's most recently created PIN.
    async fn find_pin_for_member(&self, id: MemberId) -> Result<Option<Pin>, StoreError>;

    /// Audit records for a member, oldest first.
    async fn status_updates_for_member(
        &self,
        id: MemberId,
    ) -> Result<Vec<StatusUpdate>, StoreError>;

    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

/// An open transaction. Dropping it without [`StoreTx::commit`] discards
/// every write made through it.
#[async_trait]
pub trait StoreTx: Send {
    async fn insert_member(&mut self, email: &str, status: Status) -> Result<MemberId, StoreError>;

    /// Apply `patch` only if the stored status is still `expected`. Returns
    /// false when the row was missing or its status had moved on.
    async fn update_member(
        &mut self,
        id: MemberId,
        expected: Status,
        patch: &MemberPatch,
    ) -> Result<bool, StoreError>;

    async fn add_groups(
        &mut self,
        member_id: MemberId,
        groups: &BTreeSet<GroupId>,
    ) -> Result<(), StoreError>;

    async fn remove_groups(
        &mut self,
        member_id: MemberId,
        groups: &BTreeSet<GroupId>,
    ) -> Result<(), StoreError>;

    async fn insert_status_update(&mut self, update: &NewStatusUpdate) -> Result<i64, StoreError>;

    async fn payment_ref_exists(&mut self, payment_ref: &str) -> Result<bool, StoreError>;

    async fn insert_account(&mut self, payment_ref: &str) -> Result<AccountId, StoreError>;

    async fn pin_exists(&mut self, pin: &str) -> Result<bool, StoreError>;

    async fn insert_pin(&mut self, pin: &NewPin<'_>) -> Result<i64, StoreError>;

    async fn insert_reset_token(
        &mut self,
        member_id: MemberId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Mark the token used if it belongs to `member_id`, is unused and has
    /// not expired at `now`. Returns whether a token was consumed.
    async fn consume_reset_token(
        &mut self,
        token_hash: &str,
        member_id: MemberId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<LifecycleEngine>,
    pub query: MemberQuery,
    pub config: Arc<Config>,
}
