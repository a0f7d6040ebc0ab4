//! Action kinds and action sets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What a caller wants to do with a distributed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Destroy,
    Read,
    Put,
    Remove,
    Listen,
    Administer,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        Self::Create,
        Self::Destroy,
        Self::Read,
        Self::Put,
        Self::Remove,
        Self::Listen,
        Self::Administer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Destroy => "destroy",
            Self::Read => "read",
            Self::Put => "put",
            Self::Remove => "remove",
            Self::Listen => "listen",
            Self::Administer => "administer",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action '{0}'")]
pub struct UnknownAction(pub String);

impl FromStr for ActionKind {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// Compact set of actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ActionSet(u8);

impl ActionSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        ActionKind::ALL.into_iter().collect()
    }

    pub fn insert(&mut self, action: ActionKind) {
        self.0 |= action.bit();
    }

    pub fn contains(&self, action: ActionKind) -> bool {
        self.0 & action.bit() != 0
    }

    pub fn union(self, other: ActionSet) -> ActionSet {
        ActionSet(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Parse action names; `all` expands to every action.
    pub fn parse<I, S>(names: I) -> Result<Self, UnknownAction>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::empty();
        for name in names {
            let name = name.as_ref();
            if name.eq_ignore_ascii_case("all") {
                set = set.union(Self::all());
            } else {
                set.insert(name.parse()?);
            }
        }
        Ok(set)
    }
}

impl FromIterator<ActionKind> for ActionSet {
    fn from_iter<T: IntoIterator<Item = ActionKind>>(iter: T) -> Self {
        let mut set = Self::empty();
        for action in iter {
            set.insert(action);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_actions() {
        let set = ActionSet::parse(["read", "PUT"]).unwrap();
        assert!(set.contains(ActionKind::Read));
        assert!(set.contains(ActionKind::Put));
        assert!(!set.contains(ActionKind::Remove));
    }

    #[test]
    fn parse_all_expands() {
        let set = ActionSet::parse(["all"]).unwrap();
        for action in ActionKind::ALL {
            assert!(set.contains(action), "missing {action}");
        }
    }

    #[test]
    fn parse_rejects_unknown_action() {
        let err = ActionSet::parse(["read", "fly"]).unwrap_err();
        assert_eq!(err, UnknownAction("fly".to_string()));
    }

    #[test]
    fn empty_set_contains_nothing() {
        let set = ActionSet::empty();
        assert!(set.is_empty());
        assert!(ActionKind::ALL.iter().all(|a| !set.contains(*a)));
    }
}
