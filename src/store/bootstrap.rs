use std::collections::BTreeSet;

use chrono::Utc;
use sqlx::PgPool;

use super::{MemberFilter, MemberStore};
use crate::audit::{self, Actor};
use crate::auth::CredentialStore;
use crate::member::model::{GroupId, MemberPatch};
use crate::member::status::Status;
use crate::rbac::Group;

/// Groups every installation starts with. Ids 1, 2 and 5 carry meaning to
/// the lifecycle; the rest are granted by hand.
pub const SYSTEM_GROUPS: &[(GroupId, &str)] = &[
    (1, "Full Access"),
    (2, "Current Members"),
    (3, "Gatekeeper Admin"),
    (4, "Snackspace Admin"),
    (5, "Member Admin"),
];

/// First administrator, created on an empty database.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub name: String,
    pub email: String,
    pub username: String,
    pub password: String,
}

/// Insert the status and group reference rows. Safe to run on every start.
#[tracing::instrument(skip(pool), err)]
pub async fn seed_reference_data(pool: &PgPool) -> anyhow::Result<()> {
    for status in Status::ALL {
        sqlx::query(
            "INSERT INTO statuses (id, name, title) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(status.id())
        .bind(status.as_str())
        .bind(status.title())
        .execute(pool)
        .await?;
    }

    for (id, description) in SYSTEM_GROUPS {
        sqlx::query(
            "INSERT INTO access_groups (id, description) VALUES ($1, $2)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(*id)
        .bind(*description)
        .execute(pool)
        .await?;
    }

    tracing::info!(
        statuses = Status::ALL.len(),
        groups = SYSTEM_GROUPS.len(),
        "reference data seeded"
    );
    Ok(())
}

/// Create the first administrator if the member table is empty.
#[tracing::instrument(skip(store, credentials, admin), err)]
pub async fn run(
    store: &dyn MemberStore,
    credentials: &dyn CredentialStore,
    admin: Option<&AdminSeed>,
) -> anyhow::Result<()> {
    let count = store.count_members(MemberFilter::All).await?;
    if count > 0 {
        tracing::info!("bootstrap skipped, members already exist");
        return Ok(());
    }
    let Some(admin) = admin else {
        tracing::info!("no admin configured, skipping bootstrap");
        return Ok(());
    };

    let now = Utc::now();
    let mut tx = store.begin().await?;
    let id = tx.insert_member(&admin.email, Status::Current).await?;
    let patch = MemberPatch {
        name: Some(admin.name.clone()),
        username: Some(admin.username.clone()),
        handle: Some(admin.username.clone()),
        join_date: Some(now.date_naive()),
        ..MemberPatch::default()
    };
    tx.update_member(id, Status::Current, &patch).await?;
    let groups: BTreeSet<GroupId> = [Group::FullAccess, Group::CurrentMembers, Group::MemberAdmin]
        .into_iter()
        .map(Group::id)
        .collect();
    tx.add_groups(id, &groups).await?;
    audit::record(tx.as_mut(), id, Actor::SelfService, None, Status::Current, now).await?;
    tx.commit().await?;

    credentials
        .set_password(&admin.username, &admin.password, true)
        .await?;

    tracing::info!(member_id = id, username = %admin.username, "admin member created");
    Ok(())
}
