use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::member::status::Status;

pub type MemberId = i64;
pub type GroupId = i64;
pub type AccountId = i64;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A member record as held by the primary store. Passwords never live here;
/// they belong to the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub id: MemberId,
    pub name: Option<String>,
    pub email: String,
    pub username: Option<String>,
    pub handle: Option<String>,
    pub account_id: Option<AccountId>,
    pub address_1: Option<String>,
    pub address_2: Option<String>,
    pub address_city: Option<String>,
    pub address_postcode: Option<String>,
    pub contact_number: Option<String>,
    /// Maintained by the ledger process only.
    pub balance: i64,
    pub credit_limit: i64,
    pub unlock_text: Option<String>,
    pub status: Status,
    pub join_date: Option<NaiveDate>,
}

impl Member {
    /// Name to greet the member with, falling back to handle then email.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.handle.as_deref())
            .unwrap_or(&self.email)
    }
}

/// Columns a lifecycle operation may write. `None` leaves the stored value
/// alone. `address_2` is optional on the member, so `Some(None)` clears it.
/// The ledger owns `balance`, so it has no slot here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberPatch {
    pub name: Option<String>,
    pub username: Option<String>,
    pub handle: Option<String>,
    pub address_1: Option<String>,
    pub address_2: Option<Option<String>>,
    pub address_city: Option<String>,
    pub address_postcode: Option<String>,
    pub contact_number: Option<String>,
    pub account_id: Option<AccountId>,
    pub credit_limit: Option<i64>,
    pub unlock_text: Option<String>,
    /// Only written when the stored join date is still empty.
    pub join_date: Option<NaiveDate>,
    pub status: Option<Status>,
}

impl MemberPatch {
    /// Overlay the patch on a snapshot, with the same semantics the stores
    /// use when applying it.
    pub fn merged_over(&self, snapshot: &Member) -> Member {
        let mut merged = snapshot.clone();
        self.apply_to(&mut merged);
        merged
    }

    pub fn apply_to(&self, member: &mut Member) {
        fn set<T: Clone>(slot: &mut Option<T>, value: Option<&T>) {
            if let Some(v) = value {
                *slot = Some(v.clone());
            }
        }

        set(&mut member.name, self.name.as_ref());
        set(&mut member.username, self.username.as_ref());
        set(&mut member.handle, self.handle.as_ref());
        set(&mut member.address_1, self.address_1.as_ref());
        if let Some(address_2) = &self.address_2 {
            member.address_2.clone_from(address_2);
        }
        set(&mut member.address_city, self.address_city.as_ref());
        set(&mut member.address_postcode, self.address_postcode.as_ref());
        set(&mut member.contact_number, self.contact_number.as_ref());
        set(&mut member.account_id, self.account_id.as_ref());
        set(&mut member.unlock_text, self.unlock_text.as_ref());
        if let Some(limit) = self.credit_limit {
            member.credit_limit = limit;
        }
        if member.join_date.is_none() {
            member.join_date = self.join_date;
        }
        if let Some(status) = self.status {
            member.status = status;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub payment_ref: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinState {
    Active,
    Expired,
    Cancelled,
    Enroll,
}

impl PinState {
    pub fn id(self) -> i32 {
        match self {
            Self::Active => 10,
            Self::Expired => 20,
            Self::Cancelled => 30,
            Self::Enroll => 40,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            10 => Some(Self::Active),
            20 => Some(Self::Expired),
            30 => Some(Self::Cancelled),
            40 => Some(Self::Enroll),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pin {
    pub id: i64,
    pub pin: String,
    pub unlock_text: Option<String>,
    pub state: PinState,
    pub member_id: MemberId,
}

pub struct NewPin<'a> {
    pub pin: &'a str,
    pub unlock_text: &'a str,
    pub state: PinState,
    pub member_id: MemberId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupInfo {
    pub id: GroupId,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Operation requests
// ---------------------------------------------------------------------------
//
// Every field defaults to empty so that a missing field reaches the engine's
// structural check instead of failing deserialization. Unknown fields (such
// as `balance`) are ignored.

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegisterRequest {
    pub email: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SetupLoginRequest {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SetupDetailsRequest {
    pub address_1: String,
    pub address_2: Option<String>,
    pub address_city: String,
    pub address_postcode: String,
    pub contact_number: String,
}

/// Message explaining why contact details were rejected. Delivered by the
/// notifier; the engine only checks it is well formed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RejectDetailsRequest {
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountLink {
    Existing(AccountId),
    CreateNew,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AcceptDetailsRequest {
    pub account: Option<AccountLink>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub new_password_confirm: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub new_password: String,
    pub new_password_confirm: String,
}

// ---------------------------------------------------------------------------
// Operation results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub member_id: MemberId,
    pub email: String,
    pub status: Status,
    /// False when a member with this email already existed.
    pub created: bool,
}

/// Details a new member needs to set up their standing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoDetails {
    pub name: String,
    pub email: String,
    pub payment_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApproveDetails {
    pub name: String,
    pub email: String,
    pub pin: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForgotPasswordTicket {
    pub member_id: MemberId,
    pub email: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}
