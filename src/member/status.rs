use std::fmt;
use std::str::FromStr;

/// Lifecycle stage of a member record. Ids must match the `statuses` table
/// seeded by `store::bootstrap`.
///
/// Variants are declared in pipeline order, so the derived `Ord` is the
/// pipeline ordering: `Prospective < PreMember1 < ... < Current`. `ExMember`
/// sorts last and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Status {
    Prospective,
    PreMember1,
    PreMember2,
    PreMember3,
    Current,
    ExMember,
}

impl Status {
    pub const ALL: [Self; 6] = [
        Self::Prospective,
        Self::PreMember1,
        Self::PreMember2,
        Self::PreMember3,
        Self::Current,
        Self::ExMember,
    ];

    /// Database id of the status.
    pub fn id(self) -> i32 {
        match self {
            Self::Prospective => 1,
            Self::PreMember1 => 2,
            Self::PreMember2 => 3,
            Self::PreMember3 => 4,
            Self::Current => 5,
            Self::ExMember => 6,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn is_valid(id: i32) -> bool {
        Self::from_id(id).is_some()
    }

    /// Position in the pipeline, for ordering comparisons.
    pub fn ordinal(self) -> i32 {
        match self {
            Self::Prospective => 0,
            Self::PreMember1 => 1,
            Self::PreMember2 => 2,
            Self::PreMember3 => 3,
            Self::Current => 4,
            Self::ExMember => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::ExMember
    }

    /// Human-readable title, as stored in `statuses.title`.
    pub fn title(self) -> &'static str {
        match self {
            Self::Prospective => "Prospective Member",
            Self::PreMember1 => "Waiting for contact details",
            Self::PreMember2 => "Waiting for Membership Admin to approve contact details",
            Self::PreMember3 => "Waiting for standing order payment",
            Self::Current => "Current Member",
            Self::ExMember => "Ex Member",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prospective => "prospective",
            Self::PreMember1 => "pre_member_1",
            Self::PreMember2 => "pre_member_2",
            Self::PreMember3 => "pre_member_3",
            Self::Current => "current",
            Self::ExMember => "ex_member",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prospective" => Ok(Self::Prospective),
            "pre_member_1" => Ok(Self::PreMember1),
            "pre_member_2" => Ok(Self::PreMember2),
            "pre_member_3" => Ok(Self::PreMember3),
            "current" => Ok(Self::Current),
            "ex_member" => Ok(Self::ExMember),
            other => anyhow::bail!("unknown status: {other}"),
        }
    }
}

impl serde::Serialize for Status {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for Status {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}
