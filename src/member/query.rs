use std::borrow::Cow;
use std::sync::Arc;

use serde::Serialize;

use crate::audit::{self, StatusUpdate};
use crate::member::error::MemberError;
use crate::member::model::{
    AccountId, ApproveDetails, GroupId, GroupInfo, Member, MemberId, SoDetails,
};
use crate::member::status::Status;
use crate::store::{MemberFilter, MemberStore};

/// A member either already loaded or known only by id. Lookups on an id
/// fetch the record; lookups on a record use it as is.
#[derive(Debug, Clone, Copy)]
pub enum MemberRef<'a> {
    Id(MemberId),
    Record(&'a Member),
}

impl From<MemberId> for MemberRef<'_> {
    fn from(id: MemberId) -> Self {
        Self::Id(id)
    }
}

impl<'a> From<&'a Member> for MemberRef<'a> {
    fn from(member: &'a Member) -> Self {
        Self::Record(member)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub id: i32,
    pub name: &'static str,
}

impl From<Status> for StatusSummary {
    fn from(status: Status) -> Self {
        Self {
            id: status.id(),
            name: status.title(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberSummary {
    pub id: MemberId,
    pub name: Option<String>,
    pub email: String,
    pub status: StatusSummary,
    pub groups: Vec<GroupInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountListing {
    pub account_id: AccountId,
    pub payment_ref: String,
    /// Names of the members sharing the account, e.g. "Ada, Bob and Cy".
    pub members: String,
}

/// Join names as "a", "a and b", "a, b and c".
pub fn to_list<S: AsRef<str>>(names: &[S]) -> String {
    match names {
        [] => String::new(),
        [only] => only.as_ref().to_owned(),
        [init @ .., last] => {
            let head: Vec<&str> = init.iter().map(AsRef::as_ref).collect();
            format!("{} and {}", head.join(", "), last.as_ref())
        }
    }
}

/// Read-side projections over the member store. Nothing is cached.
#[derive(Clone)]
pub struct MemberQuery {
    store: Arc<dyn MemberStore>,
}

impl MemberQuery {
    pub fn new(store: Arc<dyn MemberStore>) -> Self {
        Self { store }
    }

    /// The full record, or `NotFound`.
    pub async fn member(&self, id: MemberId) -> Result<Member, MemberError> {
        self.store
            .find_member(id)
            .await?
            .ok_or(MemberError::NotFound(id))
    }

    async fn resolve<'a>(&self, member: MemberRef<'a>) -> Result<Cow<'a, Member>, MemberError> {
        match member {
            MemberRef::Record(m) => Ok(Cow::Borrowed(m)),
            MemberRef::Id(id) => Ok(Cow::Owned(self.member(id).await?)),
        }
    }

    pub async fn status_for(&self, member: MemberRef<'_>) -> Result<Status, MemberError> {
        Ok(self.resolve(member).await?.status)
    }

    pub async fn email_for(&self, member: MemberRef<'_>) -> Result<String, MemberError> {
        Ok(self.resolve(member).await?.email.clone())
    }

    pub async fn username_for(&self, member: MemberRef<'_>) -> Result<Option<String>, MemberError> {
        Ok(self.resolve(member).await?.username.clone())
    }

    pub async fn id_for(&self, member: MemberRef<'_>) -> Result<MemberId, MemberError> {
        Ok(self.resolve(member).await?.id)
    }

    async fn summarize(&self, member: Member) -> Result<MemberSummary, MemberError> {
        let groups = self.store.groups_for_member(member.id).await?;
        Ok(MemberSummary {
            id: member.id,
            name: member.name,
            email: member.email,
            status: member.status.into(),
            groups,
        })
    }

    async fn summarize_all(&self, filter: MemberFilter) -> Result<Vec<MemberSummary>, MemberError> {
        let members = self.store.list_members(filter).await?;
        let mut summaries = Vec::with_capacity(members.len());
        for member in members {
            summaries.push(self.summarize(member).await?);
        }
        Ok(summaries)
    }

    pub async fn summary_for_member(&self, id: MemberId) -> Result<MemberSummary, MemberError> {
        let member = self.member(id).await?;
        self.summarize(member).await
    }

    pub async fn summary_all(&self) -> Result<Vec<MemberSummary>, MemberError> {
        self.summarize_all(MemberFilter::All).await
    }

    pub async fn summary_for_status(
        &self,
        status: Status,
    ) -> Result<Vec<MemberSummary>, MemberError> {
        self.summarize_all(MemberFilter::Status(status)).await
    }

    pub async fn count(&self) -> Result<i64, MemberError> {
        Ok(self.store.count_members(MemberFilter::All).await?)
    }

    pub async fn count_for_status(&self, status: Status) -> Result<i64, MemberError> {
        Ok(self.store.count_members(MemberFilter::Status(status)).await?)
    }

    pub async fn exists_with_email(&self, email: &str) -> Result<bool, MemberError> {
        Ok(self.store.find_member_by_email(email).await?.is_some())
    }

    pub async fn emails_for_group(&self, group_id: GroupId) -> Result<Vec<String>, MemberError> {
        let mut emails = Vec::new();
        for id in self.store.member_ids_in_group(group_id).await? {
            if let Some(member) = self.store.find_member(id).await? {
                emails.push(member.email);
            }
        }
        Ok(emails)
    }

    /// Standing-order details. `None` until the member has a name.
    pub async fn so_details(&self, id: MemberId) -> Result<Option<SoDetails>, MemberError> {
        let member = self.member(id).await?;
        let Some(name) = member.name else {
            return Ok(None);
        };
        let payment_ref = match member.account_id {
            Some(account_id) => self
                .store
                .find_account(account_id)
                .await?
                .map(|a| a.payment_ref),
            None => None,
        };
        Ok(Some(SoDetails {
            name,
            email: member.email,
            payment_ref,
        }))
    }

    /// Name, email and PIN. `None` until the member has been approved.
    pub async fn approve_details(
        &self,
        id: MemberId,
    ) -> Result<Option<ApproveDetails>, MemberError> {
        let member = self.member(id).await?;
        let pin = self.store.find_pin_for_member(id).await?;
        Ok(match (member.name, pin) {
            (Some(name), Some(pin)) => Some(ApproveDetails {
                name,
                email: member.email,
                pin: pin.pin,
            }),
            _ => None,
        })
    }

    /// Accounts that have at least one member, ordered by account id.
    pub async fn account_list(&self) -> Result<Vec<AccountListing>, MemberError> {
        let mut listings = Vec::new();
        for account in self.store.list_accounts().await? {
            let members = self.store.members_for_account(account.id).await?;
            if members.is_empty() {
                continue;
            }
            let names: Vec<&str> = members.iter().map(Member::display_name).collect();
            listings.push(AccountListing {
                account_id: account.id,
                payment_ref: account.payment_ref,
                members: to_list(&names),
            });
        }
        Ok(listings)
    }

    pub async fn history(&self, id: MemberId) -> Result<Vec<StatusUpdate>, MemberError> {
        self.member(id).await?;
        Ok(audit::history(self.store.as_ref(), id).await?)
    }
}
