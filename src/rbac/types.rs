use std::fmt;
use std::str::FromStr;

use crate::member::model::GroupId;

/// Groups with a fixed meaning to the membership pipeline. Ids must match the
/// `access_groups` table seeded by `store::bootstrap`. Other groups may exist
/// and be granted by hand; they are addressed by raw [`GroupId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    FullAccess,
    CurrentMembers,
    MemberAdmin,
}

impl Group {
    pub const ALL: [Self; 3] = [Self::FullAccess, Self::CurrentMembers, Self::MemberAdmin];

    pub fn id(self) -> GroupId {
        match self {
            Self::FullAccess => 1,
            Self::CurrentMembers => 2,
            Self::MemberAdmin => 5,
        }
    }

    pub fn from_id(id: GroupId) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.id() == id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullAccess => "full_access",
            Self::CurrentMembers => "current_members",
            Self::MemberAdmin => "member_admin",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::FullAccess => "Full Access",
            Self::CurrentMembers => "Current Members",
            Self::MemberAdmin => "Member Admin",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Group {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full_access" => Ok(Self::FullAccess),
            "current_members" => Ok(Self::CurrentMembers),
            "member_admin" => Ok(Self::MemberAdmin),
            other => anyhow::bail!("unknown group: {other}"),
        }
    }
}

impl serde::Serialize for Group {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for Group {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_groups() {
        for group in Group::ALL {
            let parsed: Group = group.as_str().parse().unwrap();
            assert_eq!(group, parsed);
            assert_eq!(Group::from_id(group.id()), Some(group));
        }
    }

    #[test]
    fn ids_are_distinct() {
        let mut ids: Vec<GroupId> = Group::ALL.iter().map(|g| g.id()).collect();
        ids.dedup();
        assert_eq!(ids.len(), Group::ALL.len());
    }

    #[test]
    fn unknown_group_errors() {
        assert!("snackspace".parse::<Group>().is_err());
        assert_eq!(Group::from_id(99), None);
    }

    #[test]
    fn serde_roundtrip() {
        let json = serde_json::to_string(&Group::MemberAdmin).unwrap();
        assert_eq!(json, "\"member_admin\"");
        let parsed: Group = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Group::MemberAdmin);
    }
}
