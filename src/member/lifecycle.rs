use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::audit::{self, Actor};
use crate::auth::CredentialStore;
use crate::auth::token::{generate_payment_ref, generate_pin, generate_reset_token, hash_token, is_reset_token};
use crate::member::error::{ExpectedStatus, MemberError};
use crate::member::groups::{GroupChange, GroupMembership};
use crate::member::locks::MemberLocks;
use crate::member::model::{
    AcceptDetailsRequest, AccountId, AccountLink, ApproveDetails, ChangePasswordRequest,
    ForgotPasswordRequest, ForgotPasswordTicket, Member, MemberId, MemberPatch, NewPin, PinState,
    RegisterRequest, Registration, RejectDetailsRequest, ResetPasswordRequest, SetupDetailsRequest,
    SetupLoginRequest, SoDetails,
};
use crate::member::query::MemberQuery;
use crate::member::rules;
use crate::member::status::Status;
use crate::notify::{Notice, NoticeKind, Notifier};
use crate::rbac::{self, CapabilityCheck};
use crate::store::{MemberStore, StoreError, StoreTx, constraint};
use crate::validation::FieldError;

pub const DEFAULT_CREDIT_LIMIT: i64 = 5000;
pub const DEFAULT_RESET_TOKEN_TTL_MINUTES: i64 = 120;

/// Attempts at drawing an unused PIN or payment reference before giving up.
const MAX_UNIQUE_ATTEMPTS: usize = 16;

/// Text shown on a new member's PIN entry.
const PIN_UNLOCK_TEXT: &str = "Welcome";

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub default_credit_limit: i64,
    pub reset_token_ttl: TimeDelta,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_credit_limit: DEFAULT_CREDIT_LIMIT,
            reset_token_ttl: TimeDelta::minutes(DEFAULT_RESET_TOKEN_TTL_MINUTES),
        }
    }
}

/// Attribute a unique-index violation to the field that caused it.
fn from_store(err: StoreError) -> MemberError {
    match &err {
        StoreError::UniqueViolation(c) if c == constraint::MEMBER_USERNAME => {
            MemberError::Validation(vec![FieldError::new(
                "username",
                "That username is already taken",
            )])
        }
        StoreError::UniqueViolation(c) if c == constraint::MEMBER_EMAIL => {
            MemberError::Validation(vec![FieldError::new(
                "email",
                "That email address is already registered",
            )])
        }
        _ => MemberError::Store(err),
    }
}

/// Write the member patch and, when the status changes, the group changes
/// and the audit record. Everything goes through `tx`; nothing else may be
/// read or written while it is open.
async fn apply_transition(
    tx: &mut dyn StoreTx,
    member: &Member,
    actor: Actor,
    patch: &MemberPatch,
    groups: &GroupChange,
    now: DateTime<Utc>,
) -> Result<(), MemberError> {
    let updated = tx
        .update_member(member.id, member.status, patch)
        .await
        .map_err(from_store)?;
    if !updated {
        return Err(MemberError::Conflict(member.id));
    }

    if let Some(to) = patch.status
        && to != member.status
    {
        if !groups.add.is_empty() {
            tx.add_groups(member.id, &groups.add).await?;
        }
        if !groups.remove.is_empty() {
            tx.remove_groups(member.id, &groups.remove).await?;
        }
        audit::record(tx, member.id, actor, Some(member.status), to, now).await?;
    }
    Ok(())
}

/// Drives members through the pipeline. Every status change, group change
/// and audit record for a member is written by this type.
pub struct LifecycleEngine {
    store: Arc<dyn MemberStore>,
    credentials: Arc<dyn CredentialStore>,
    groups: GroupMembership,
    query: MemberQuery,
    capabilities: Arc<dyn CapabilityCheck>,
    notifier: Arc<dyn Notifier>,
    locks: MemberLocks,
    settings: EngineSettings,
}

impl LifecycleEngine {
    /// Capability checks default to the member store's own group table.
    pub fn new(
        store: Arc<dyn MemberStore>,
        credentials: Arc<dyn CredentialStore>,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> Self {
        let groups = GroupMembership::new(Arc::clone(&store));
        Self {
            capabilities: Arc::new(groups.clone()),
            query: MemberQuery::new(Arc::clone(&store)),
            store,
            credentials,
            groups,
            notifier,
            locks: MemberLocks::new(),
            settings,
        }
    }

    /// Use an external authorization service for admin checks.
    #[must_use]
    pub fn with_capability_check(mut self, check: Arc<dyn CapabilityCheck>) -> Self {
        self.capabilities = check;
        self
    }

    pub fn groups(&self) -> &GroupMembership {
        &self.groups
    }

    pub fn query(&self) -> &MemberQuery {
        &self.query
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    async fn load(&self, id: MemberId) -> Result<Member, MemberError> {
        self.query.member(id).await
    }

    /// The actor must be a member of an admin group. Acting on yourself
    /// does not count.
    async fn require_admin(&self, actor: Actor, action: &str) -> Result<MemberId, MemberError> {
        let actor_id = actor.member_id().ok_or(MemberError::ActorRequired)?;
        if rbac::is_admin(self.capabilities.as_ref(), actor_id).await? {
            return Ok(actor_id);
        }
        tracing::warn!(actor_id, action, "admin action refused");
        Err(MemberError::NotAuthorized(format!(
            "only member admins may {action}"
        )))
    }

    /// Set a credential after the member record has been committed. A failure
    /// here leaves the two stores out of step, which is logged for repair.
    async fn sync_credential(
        &self,
        member_id: MemberId,
        username: &str,
        password: &str,
        allow_create: bool,
    ) -> Result<(), MemberError> {
        if let Err(e) = self
            .credentials
            .set_password(username, password, allow_create)
            .await
        {
            tracing::error!(
                member_id,
                username,
                error = %e,
                "credential store diverged from committed member record"
            );
            return Err(MemberError::Credential(e));
        }
        Ok(())
    }

    async fn notify(&self, notice: Notice) {
        let kind = notice.kind.as_str();
        let member_id = notice.member_id;
        if let Err(e) = self.notifier.send(notice).await {
            tracing::warn!(kind, member_id, error = %e, "failed to hand notice to notifier");
        }
    }

    /// Commit a status change for `member` carrying `patch`.
    async fn transition(
        &self,
        member: &Member,
        actor: Actor,
        patch: &MemberPatch,
        now: DateTime<Utc>,
    ) -> Result<(), MemberError> {
        let to = patch.status.unwrap_or(member.status);
        let groups = self
            .groups
            .plan_transition(member.id, member.status, to)
            .await?;

        let mut tx = self.store.begin().await?;
        apply_transition(tx.as_mut(), member, actor, patch, &groups, now).await?;
        tx.commit().await.map_err(from_store)?;

        tracing::info!(
            member_id = member.id,
            from = %member.status,
            %to,
            actor_id = actor.resolve(member.id),
            "member status changed"
        );
        Ok(())
    }

    // -- registration -------------------------------------------------------

    /// Create a prospective member for `email`, or return the member who
    /// already holds it.
    #[tracing::instrument(skip(self, req), err)]
    pub async fn register_member(
        &self,
        req: RegisterRequest,
    ) -> Result<Registration, MemberError> {
        rules::require_register(&req)?;
        rules::validate_register(&req)?;
        let email = req.email.trim();

        if let Some(existing) = self.store.find_member_by_email(email).await? {
            return Ok(Registration {
                member_id: existing.id,
                email: existing.email,
                status: existing.status,
                created: false,
            });
        }

        match self.insert_prospective(email).await {
            Ok(member_id) => {
                tracing::info!(member_id, "prospective member registered");
                Ok(Registration {
                    member_id,
                    email: email.to_owned(),
                    status: Status::Prospective,
                    created: true,
                })
            }
            // Lost a race with a concurrent registration of the same email.
            Err(StoreError::UniqueViolation(c)) if c == constraint::MEMBER_EMAIL => {
                let existing = self.store.find_member_by_email(email).await?.ok_or_else(|| {
                    MemberError::Store(StoreError::Corrupt(format!(
                        "email {email} reported taken but not found"
                    )))
                })?;
                Ok(Registration {
                    member_id: existing.id,
                    email: existing.email,
                    status: existing.status,
                    created: false,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_prospective(&self, email: &str) -> Result<MemberId, StoreError> {
        let mut tx = self.store.begin().await?;
        let id = tx.insert_member(email, Status::Prospective).await?;
        audit::record(
            tx.as_mut(),
            id,
            Actor::SelfService,
            None,
            Status::Prospective,
            Utc::now(),
        )
        .await?;
        tx.commit().await?;
        Ok(id)
    }

    // -- pipeline -----------------------------------------------------------

    /// Prospective -> PreMember1. The credential is written after the member
    /// record commits.
    #[tracing::instrument(skip(self, req), err)]
    pub async fn setup_login(
        &self,
        member_id: MemberId,
        req: SetupLoginRequest,
    ) -> Result<(), MemberError> {
        let _lock = self.locks.acquire(member_id).await;
        let member = self.load(member_id).await?;
        MemberError::guard(member_id, ExpectedStatus::Is(Status::Prospective), member.status)?;
        rules::require_login(&req)?;

        let username = req.username.trim().to_owned();
        let patch = MemberPatch {
            name: Some(req.name.trim().to_owned()),
            username: Some(username.clone()),
            handle: Some(username.clone()),
            status: Some(Status::PreMember1),
            ..MemberPatch::default()
        };
        let taken = self.store.username_taken(&username, Some(member_id)).await?;
        rules::validate_login(&patch.merged_over(&member), &req, &member.email, taken)?;

        self.transition(&member, Actor::SelfService, &patch, Utc::now())
            .await?;
        self.sync_credential(member_id, &username, &req.password, true)
            .await
    }

    /// PreMember1 -> PreMember2.
    #[tracing::instrument(skip(self, req), err)]
    pub async fn setup_details(
        &self,
        member_id: MemberId,
        req: SetupDetailsRequest,
    ) -> Result<(), MemberError> {
        let _lock = self.locks.acquire(member_id).await;
        let member = self.load(member_id).await?;
        MemberError::guard(member_id, ExpectedStatus::Is(Status::PreMember1), member.status)?;
        rules::require_details(&req)?;

        let patch = MemberPatch {
            address_1: Some(req.address_1.trim().to_owned()),
            address_2: Some(
                req.address_2
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned),
            ),
            address_city: Some(req.address_city.trim().to_owned()),
            address_postcode: Some(req.address_postcode.trim().to_owned()),
            contact_number: Some(req.contact_number.trim().to_owned()),
            status: Some(Status::PreMember2),
            ..MemberPatch::default()
        };
        rules::validate_details(&patch.merged_over(&member))?;

        self.transition(&member, Actor::SelfService, &patch, Utc::now())
            .await
    }

    /// PreMember2 -> PreMember1. The notifier receives the message once the
    /// change has committed.
    #[tracing::instrument(skip(self, req), err)]
    pub async fn reject_details(
        &self,
        member_id: MemberId,
        actor: Actor,
        req: RejectDetailsRequest,
    ) -> Result<(), MemberError> {
        let _lock = self.locks.acquire(member_id).await;
        let member = self.load(member_id).await?;
        MemberError::guard(member_id, ExpectedStatus::Is(Status::PreMember2), member.status)?;
        self.require_admin(actor, "reject contact details").await?;
        rules::require_notice(&req)?;
        rules::validate_notice(&req)?;

        let patch = MemberPatch {
            status: Some(Status::PreMember1),
            ..MemberPatch::default()
        };
        self.transition(&member, actor, &patch, Utc::now()).await?;

        self.notify(Notice {
            kind: NoticeKind::DetailsRejected,
            member_id,
            email: member.email,
            subject: req.subject.trim().to_owned(),
            body: req.message.trim().to_owned(),
        })
        .await;
        Ok(())
    }

    /// PreMember2 -> PreMember3, optionally linking or creating a payment
    /// account. Returns what the member needs to set up a standing order.
    #[tracing::instrument(skip(self, req), err)]
    pub async fn accept_details(
        &self,
        member_id: MemberId,
        actor: Actor,
        req: AcceptDetailsRequest,
    ) -> Result<SoDetails, MemberError> {
        let _lock = self.locks.acquire(member_id).await;
        let member = self.load(member_id).await?;
        MemberError::guard(member_id, ExpectedStatus::Is(Status::PreMember2), member.status)?;
        self.require_admin(actor, "accept contact details").await?;

        let mut payment_ref = None;
        let linked = match req.account {
            Some(AccountLink::Existing(account_id)) => Some(account_id),
            _ => member.account_id,
        };
        if let Some(account_id) = linked {
            let account = self.store.find_account(account_id).await?.ok_or_else(|| {
                MemberError::Validation(vec![FieldError::new("account", "No such account")])
            })?;
            payment_ref = Some(account.payment_ref);
        }

        let mut patch = MemberPatch {
            account_id: linked,
            status: Some(Status::PreMember3),
            ..MemberPatch::default()
        };
        let to = Status::PreMember3;
        let groups = self
            .groups
            .plan_transition(member_id, member.status, to)
            .await?;
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        if req.account == Some(AccountLink::CreateNew) {
            let (account_id, reference) = create_account(tx.as_mut()).await?;
            patch.account_id = Some(account_id);
            payment_ref = Some(reference);
        }
        apply_transition(tx.as_mut(), &member, actor, &patch, &groups, now).await?;
        tx.commit().await.map_err(from_store)?;
        tracing::info!(member_id, account_id = ?patch.account_id, "contact details accepted");

        let name = member.display_name().to_owned();
        self.notify(Notice {
            kind: NoticeKind::DetailsAccepted,
            member_id,
            email: member.email.clone(),
            subject: "Membership details accepted".into(),
            body: match &payment_ref {
                Some(r) => format!("Please set up a standing order with reference {r}"),
                None => "Please set up a standing order".into(),
            },
        })
        .await;

        Ok(SoDetails {
            name,
            email: member.email,
            payment_ref,
        })
    }

    /// PreMember3 -> Current. Sets the join date, credit limit and unlock
    /// text, grants CurrentMembers and issues an enrolment PIN.
    #[tracing::instrument(skip(self), err)]
    pub async fn approve_member(
        &self,
        member_id: MemberId,
        actor: Actor,
    ) -> Result<ApproveDetails, MemberError> {
        let _lock = self.locks.acquire(member_id).await;
        let member = self.load(member_id).await?;
        MemberError::guard(member_id, ExpectedStatus::Is(Status::PreMember3), member.status)?;
        self.require_admin(actor, "approve members").await?;

        let name = member.display_name().to_owned();
        let now = Utc::now();
        let patch = MemberPatch {
            unlock_text: Some(format!("Welcome {name}")),
            credit_limit: Some(self.settings.default_credit_limit),
            join_date: Some(now.date_naive()),
            status: Some(Status::Current),
            ..MemberPatch::default()
        };
        let groups = self
            .groups
            .plan_transition(member_id, member.status, Status::Current)
            .await?;

        let mut tx = self.store.begin().await?;
        apply_transition(tx.as_mut(), &member, actor, &patch, &groups, now).await?;
        let pin = issue_pin(tx.as_mut(), member_id).await?;
        tx.commit().await.map_err(from_store)?;
        tracing::info!(member_id, "member approved");

        self.notify(Notice {
            kind: NoticeKind::MemberApproved,
            member_id,
            email: member.email.clone(),
            subject: "Membership approved".into(),
            body: format!("Welcome {name}. Your enrolment PIN is ready."),
        })
        .await;

        Ok(ApproveDetails {
            name,
            email: member.email,
            pin,
        })
    }

    // -- passwords ----------------------------------------------------------

    /// Change `member_id`'s password. The actor must be the member or an
    /// admin, and must supply their own current password.
    #[tracing::instrument(skip(self, req), err)]
    pub async fn change_password(
        &self,
        member_id: MemberId,
        actor: Actor,
        req: ChangePasswordRequest,
    ) -> Result<(), MemberError> {
        let _lock = self.locks.acquire(member_id).await;
        let member = self.load(member_id).await?;
        MemberError::guard(
            member_id,
            ExpectedStatus::Not(Status::Prospective),
            member.status,
        )?;
        let actor_id = actor.member_id().ok_or(MemberError::ActorRequired)?;
        if !rbac::can_manage_member(self.capabilities.as_ref(), actor_id, member_id).await? {
            return Err(MemberError::NotAuthorized(
                "only member admins may change another member's password".into(),
            ));
        }
        rules::require_password_change(&req)?;
        rules::validate_password_change(&req)?;

        let actor_username = if actor_id == member_id {
            member.username.clone()
        } else {
            self.store
                .find_member(actor_id)
                .await?
                .and_then(|m| m.username)
        };
        let actor_username = actor_username
            .ok_or_else(|| MemberError::NotAuthorized("acting member has no login".into()))?;

        if !self
            .credentials
            .check_password(&actor_username, &req.current_password)
            .await?
        {
            return Err(MemberError::Validation(vec![FieldError::new(
                "current_password",
                "Incorrect password",
            )]));
        }

        let username = member.username.as_deref().ok_or_else(|| {
            StoreError::Corrupt(format!("member {member_id} is past login setup without a username"))
        })?;
        self.credentials
            .set_password(username, &req.new_password, false)
            .await?;
        tracing::info!(member_id, actor_id, "password changed");
        Ok(())
    }

    /// Issue a single-use reset token for the member holding `email`.
    /// Returns `None` when no member has that address.
    #[tracing::instrument(skip(self, req), err)]
    pub async fn create_forgot_password(
        &self,
        req: ForgotPasswordRequest,
    ) -> Result<Option<ForgotPasswordTicket>, MemberError> {
        rules::require_forgot(&req)?;
        rules::validate_forgot(&req)?;
        let email = req.email.trim();
        let Some(found) = self.store.find_member_by_email(email).await? else {
            tracing::info!("password reset requested for unknown email");
            return Ok(None);
        };

        let _lock = self.locks.acquire(found.id).await;
        let member = self.load(found.id).await?;
        MemberError::guard(
            member.id,
            ExpectedStatus::Not(Status::Prospective),
            member.status,
        )?;

        let (token, token_hash) = generate_reset_token();
        let expires_at = Utc::now() + self.settings.reset_token_ttl;
        let mut tx = self.store.begin().await?;
        tx.insert_reset_token(member.id, &token_hash, expires_at)
            .await?;
        tx.commit().await?;
        tracing::info!(member_id = member.id, %expires_at, "password reset token issued");

        self.notify(Notice {
            kind: NoticeKind::PasswordReset,
            member_id: member.id,
            email: member.email.clone(),
            subject: "Password reset".into(),
            body: format!("Use this token to reset your password: {token}"),
        })
        .await;

        Ok(Some(ForgotPasswordTicket {
            member_id: member.id,
            email: member.email,
            token,
            expires_at,
        }))
    }

    /// Spend a reset token and set a new password. The token must be unused,
    /// unexpired and issued to the member holding `req.email`.
    #[tracing::instrument(skip(self, token, req), err)]
    pub async fn complete_forgot_password(
        &self,
        token: &str,
        req: ResetPasswordRequest,
    ) -> Result<(), MemberError> {
        rules::require_reset(&req)?;
        rules::validate_reset(&req)?;
        if !is_reset_token(token) {
            return Err(MemberError::InvalidToken);
        }
        let Some(found) = self.store.find_member_by_email(req.email.trim()).await? else {
            return Err(MemberError::InvalidToken);
        };

        let _lock = self.locks.acquire(found.id).await;
        let member = self.load(found.id).await?;
        MemberError::guard(
            member.id,
            ExpectedStatus::Not(Status::Prospective),
            member.status,
        )?;
        let username = member.username.as_deref().ok_or_else(|| {
            StoreError::Corrupt(format!("member {} is past login setup without a username", member.id))
        })?;

        let mut tx = self.store.begin().await?;
        if !tx
            .consume_reset_token(&hash_token(token), member.id, Utc::now())
            .await?
        {
            tracing::warn!(member_id = member.id, "reset token rejected");
            return Err(MemberError::InvalidToken);
        }
        tx.commit().await?;

        self.sync_credential(member.id, username, &req.new_password, true)
            .await?;
        tracing::info!(member_id = member.id, "password reset completed");
        Ok(())
    }
}

async fn create_account(tx: &mut dyn StoreTx) -> Result<(AccountId, String), MemberError> {
    for _ in 0..MAX_UNIQUE_ATTEMPTS {
        let reference = generate_payment_ref();
        if !tx.payment_ref_exists(&reference).await? {
            let id = tx.insert_account(&reference).await?;
            return Ok((id, reference));
        }
    }
    Err(StoreError::UniqueViolation(constraint::PAYMENT_REF.into()).into())
}

async fn issue_pin(tx: &mut dyn StoreTx, member_id: MemberId) -> Result<String, MemberError> {
    for _ in 0..MAX_UNIQUE_ATTEMPTS {
        let pin = generate_pin();
        if !tx.pin_exists(&pin).await? {
            tx.insert_pin(&NewPin {
                pin: &pin,
                unlock_text: PIN_UNLOCK_TEXT,
                state: PinState::Enroll,
                member_id,
            })
            .await?;
            return Ok(pin);
        }
    }
    Err(StoreError::UniqueViolation(constraint::PIN.into()).into())
}
