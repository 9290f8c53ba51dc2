use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use super::{MemberFilter, MemberStore, StoreError, StoreTx};
use crate::audit::{NewStatusUpdate, StatusUpdate};
use crate::member::model::{
    Account, AccountId, GroupId, GroupInfo, Member, MemberId, MemberPatch, NewPin, Pin, PinState,
};
use crate::member::status::Status;

const MEMBER_COLUMNS: &str = "id, name, email, username, handle, account_id, address_1, \
     address_2, address_city, address_postcode, contact_number, balance, credit_limit, \
     unlock_text, status_id, join_date";

#[derive(sqlx::FromRow)]
struct MemberRow {
    id: i64,
    name: Option<String>,
    email: String,
    username: Option<String>,
    handle: Option<String>,
    account_id: Option<i64>,
    address_1: Option<String>,
    address_2: Option<String>,
    address_city: Option<String>,
    address_postcode: Option<String>,
    contact_number: Option<String>,
    balance: i64,
    credit_limit: i64,
    unlock_text: Option<String>,
    status_id: i32,
    join_date: Option<NaiveDate>,
}

impl TryFrom<MemberRow> for Member {
    type Error = StoreError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        let status = Status::from_id(row.status_id).ok_or_else(|| {
            StoreError::Corrupt(format!("member {} has unknown status {}", row.id, row.status_id))
        })?;
        Ok(Self {
            id: row.id,
            name: row.name,
            email: row.email,
            username: row.username,
            handle: row.handle,
            account_id: row.account_id,
            address_1: row.address_1,
            address_2: row.address_2,
            address_city: row.address_city,
            address_postcode: row.address_postcode,
            contact_number: row.contact_number,
            balance: row.balance,
            credit_limit: row.credit_limit,
            unlock_text: row.unlock_text,
            status,
            join_date: row.join_date,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StatusUpdateRow {
    id: i64,
    member_id: i64,
    actor_id: i64,
    from_status: Option<i32>,
    to_status: i32,
    at: DateTime<Utc>,
}

impl TryFrom<StatusUpdateRow> for StatusUpdate {
    type Error = StoreError;

    fn try_from(row: StatusUpdateRow) -> Result<Self, Self::Error> {
        let status = |id: i32| {
            Status::from_id(id)
                .ok_or_else(|| StoreError::Corrupt(format!("status update {} has status {id}", row.id)))
        };
        Ok(Self {
            id: row.id,
            member_id: row.member_id,
            actor_id: row.actor_id,
            from_status: row.from_status.map(status).transpose()?,
            to_status: status(row.to_status)?,
            at: row.at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PinRow {
    id: i64,
    pin: String,
    unlock_text: Option<String>,
    state: i32,
    member_id: i64,
}

fn members_from_rows(rows: Vec<MemberRow>) -> Result<Vec<Member>, StoreError> {
    rows.into_iter().map(Member::try_from).collect()
}

fn status_param(filter: MemberFilter) -> Option<i32> {
    match filter {
        MemberFilter::All => None,
        MemberFilter::Status(s) => Some(s.id()),
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgMemberStore {
    pool: PgPool,
}

impl PgMemberStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemberStore for PgMemberStore {
    async fn find_member(&self, id: MemberId) -> Result<Option<Member>, StoreError> {
        let row: Option<MemberRow> =
            sqlx::query_as(&format!("SELECT {MEMBER_COLUMNS} FROM members WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Member::try_from).transpose()
    }

    async fn find_member_by_email(&self, email: &str) -> Result<Option<Member>, StoreError> {
        let row: Option<MemberRow> = sqlx::query_as(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Member::try_from).transpose()
    }

    async fn username_taken(
        &self,
        username: &str,
        except: Option<MemberId>,
    ) -> Result<bool, StoreError> {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM members
             WHERE lower(username) = lower($1) AND ($2::BIGINT IS NULL OR id <> $2))",
        )
        .bind(username)
        .bind(except)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken)
    }

    async fn list_members(&self, filter: MemberFilter) -> Result<Vec<Member>, StoreError> {
        let rows: Vec<MemberRow> = sqlx::query_as(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members
             WHERE ($1::INTEGER IS NULL OR status_id = $1)
             ORDER BY id"
        ))
        .bind(status_param(filter))
        .fetch_all(&self.pool)
        .await?;
        members_from_rows(rows)
    }

    async fn count_members(&self, filter: MemberFilter) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM members WHERE ($1::INTEGER IS NULL OR status_id = $1)",
        )
        .bind(status_param(filter))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn members_for_account(&self, account_id: AccountId) -> Result<Vec<Member>, StoreError> {
        let rows: Vec<MemberRow> = sqlx::query_as(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE account_id = $1 ORDER BY id"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        members_from_rows(rows)
    }

    async fn group_ids_for_member(&self, id: MemberId) -> Result<BTreeSet<GroupId>, StoreError> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT group_id FROM member_groups WHERE member_id = $1")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().collect())
    }

    async fn groups_for_member(&self, id: MemberId) -> Result<Vec<GroupInfo>, StoreError> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT g.id, g.description
             FROM member_groups mg
             JOIN access_groups g ON g.id = mg.group_id
             WHERE mg.member_id = $1
             ORDER BY g.id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, description)| GroupInfo { id, description })
            .collect())
    }

    async fn member_ids_in_group(&self, group_id: GroupId) -> Result<Vec<MemberId>, StoreError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT member_id FROM member_groups WHERE group_id = $1 ORDER BY member_id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT id, payment_ref FROM accounts WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, payment_ref)| Account { id, payment_ref }))
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, payment_ref FROM accounts ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id, payment_ref)| Account { id, payment_ref })
            .collect())
    }

    async fn find_pin_for_member(&self, id: MemberId) -> Result<Option<Pin>, StoreError> {
        let row: Option<PinRow> = sqlx::query_as(
            "SELECT id, pin, unlock_text, state, member_id FROM pins
             WHERE member_id = $1 ORDER BY id DESC LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            let state = PinState::from_id(r.state)
                .ok_or_else(|| StoreError::Corrupt(format!("pin {} has state {}", r.id, r.state)))?;
            Ok(Pin {
                id: r.id,
                pin: r.pin,
                unlock_text: r.unlock_text,
                state,
                member_id: r.member_id,
            })
        })
        .transpose()
    }

    async fn status_updates_for_member(
        &self,
        id: MemberId,
    ) -> Result<Vec<StatusUpdate>, StoreError> {
        let rows: Vec<StatusUpdateRow> = sqlx::query_as(
            "SELECT id, member_id, actor_id, from_status, to_status, at
             FROM status_updates WHERE member_id = $1 ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(StatusUpdate::try_from).collect()
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Wraps a sqlx transaction; sqlx rolls it back when dropped uncommitted.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert_member(&mut self, email: &str, status: Status) -> Result<MemberId, StoreError> {
        let id: i64 =
            sqlx::query_scalar("INSERT INTO members (email, status_id) VALUES ($1, $2) RETURNING id")
                .bind(email)
                .bind(status.id())
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(id)
    }

    async fn update_member(
        &mut self,
        id: MemberId,
        expected: Status,
        patch: &MemberPatch,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE members SET
                name = COALESCE($3, name),
                username = COALESCE($4, username),
                handle = COALESCE($5, handle),
                address_1 = COALESCE($6, address_1),
                address_2 = CASE WHEN $16 THEN $7 ELSE address_2 END,
                address_city = COALESCE($8, address_city),
                address_postcode = COALESCE($9, address_postcode),
                contact_number = COALESCE($10, contact_number),
                account_id = COALESCE($11, account_id),
                credit_limit = COALESCE($12, credit_limit),
                unlock_text = COALESCE($13, unlock_text),
                join_date = COALESCE(join_date, $14),
                status_id = COALESCE($15, status_id),
                updated_at = now()
             WHERE id = $1 AND status_id = $2",
        )
        .bind(id)
        .bind(expected.id())
        .bind(patch.name.as_deref())
        .bind(patch.username.as_deref())
        .bind(patch.handle.as_deref())
        .bind(patch.address_1.as_deref())
        .bind(patch.address_2.as_ref().and_then(Option::as_deref))
        .bind(patch.address_city.as_deref())
        .bind(patch.address_postcode.as_deref())
        .bind(patch.contact_number.as_deref())
        .bind(patch.account_id)
        .bind(patch.credit_limit)
        .bind(patch.unlock_text.as_deref())
        .bind(patch.join_date)
        .bind(patch.status.map(Status::id))
        .bind(patch.address_2.is_some())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn add_groups(
        &mut self,
        member_id: MemberId,
        groups: &BTreeSet<GroupId>,
    ) -> Result<(), StoreError> {
        let ids: Vec<i64> = groups.iter().copied().collect();
        sqlx::query(
            "INSERT INTO member_groups (member_id, group_id)
             SELECT $1, unnest($2::BIGINT[])
             ON CONFLICT DO NOTHING",
        )
        .bind(member_id)
        .bind(&ids)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn remove_groups(
        &mut self,
        member_id: MemberId,
        groups: &BTreeSet<GroupId>,
    ) -> Result<(), StoreError> {
        let ids: Vec<i64> = groups.iter().copied().collect();
        sqlx::query("DELETE FROM member_groups WHERE member_id = $1 AND group_id = ANY($2)")
            .bind(member_id)
            .bind(&ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_status_update(&mut self, update: &NewStatusUpdate) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO status_updates (member_id, actor_id, from_status, to_status, at)
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(update.member_id)
        .bind(update.actor_id)
        .bind(update.from_status.map(Status::id))
        .bind(update.to_status.id())
        .bind(update.at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn payment_ref_exists(&mut self, payment_ref: &str) -> Result<bool, StoreError> {
        let found: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM accounts WHERE payment_ref = $1)")
                .bind(payment_ref)
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(found)
    }

    async fn insert_account(&mut self, payment_ref: &str) -> Result<AccountId, StoreError> {
        let id: i64 =
            sqlx::query_scalar("INSERT INTO accounts (payment_ref) VALUES ($1) RETURNING id")
                .bind(payment_ref)
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(id)
    }

    async fn pin_exists(&mut self, pin: &str) -> Result<bool, StoreError> {
        let found: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pins WHERE pin = $1)")
            .bind(pin)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(found)
    }

    async fn insert_pin(&mut self, pin: &NewPin<'_>) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO pins (pin, unlock_text, state, member_id)
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(pin.pin)
        .bind(pin.unlock_text)
        .bind(pin.state.id())
        .bind(pin.member_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn insert_reset_token(
        &mut self,
        member_id: MemberId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO forgot_passwords (member_id, token_hash, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(member_id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn consume_reset_token(
        &mut self,
        token_hash: &str,
        member_id: MemberId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE forgot_passwords SET used_at = $3
             WHERE token_hash = $1 AND member_id = $2 AND used_at IS NULL AND expires_at > $3",
        )
        .bind(token_hash)
        .bind(member_id)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
