//! Capability requirements and caller contexts.

use std::collections::HashMap;
use std::fmt;

use super::action::{ActionKind, ActionSet};

/// What a request needs to be allowed to do: `action` on `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapabilityRequirement {
    target: String,
    action: ActionKind,
}

impl CapabilityRequirement {
    pub fn new(target: impl Into<String>, action: ActionKind) -> Self {
        Self {
            target: target.into(),
            action,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn action(&self) -> ActionKind {
        self.action
    }
}

impl fmt::Display for CapabilityRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on '{}'", self.action, self.target)
    }
}

/// Distributed-object name pattern used by grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPattern {
    /// `*`
    Any,
    /// `orders*`
    Prefix(String),
    /// `orders`
    Exact(String),
}

impl TargetPattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            Self::Any
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            Self::Prefix(prefix.to_string())
        } else {
            Self::Exact(pattern.to_string())
        }
    }

    pub fn matches(&self, target: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Prefix(prefix) => target.starts_with(prefix.as_str()),
            Self::Exact(name) => name == target,
        }
    }
}

/// A set of actions permitted on every target matching a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub pattern: TargetPattern,
    pub actions: ActionSet,
}

impl Grant {
    pub fn new(pattern: TargetPattern, actions: ActionSet) -> Self {
        Self { pattern, actions }
    }
}

/// Capabilities granted to one authenticated connection.
///
/// Exact-name grants are kept in a map so the hot-path check is a single
/// lookup; wildcard grants are scanned in order.
#[derive(Debug, Clone)]
pub struct CallerContext {
    principal: String,
    unrestricted: bool,
    exact: HashMap<String, ActionSet>,
    patterns: Vec<Grant>,
}

impl CallerContext {
    pub fn new(principal: impl Into<String>, grants: impl IntoIterator<Item = Grant>) -> Self {
        let mut exact: HashMap<String, ActionSet> = HashMap::new();
        let mut patterns = Vec::new();
        for grant in grants {
            match grant.pattern {
                TargetPattern::Exact(name) => {
                    let entry = exact.entry(name).or_default();
                    *entry = entry.union(grant.actions);
                }
                _ => patterns.push(grant),
            }
        }
        Self {
            principal: principal.into(),
            unrestricted: false,
            exact,
            patterns,
        }
    }

    /// Context used when security is disabled: everything is granted.
    pub fn unrestricted(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            unrestricted: true,
            exact: HashMap::new(),
            patterns: Vec::new(),
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn is_unrestricted(&self) -> bool {
        self.unrestricted
    }

    pub fn grants(&self, requirement: &CapabilityRequirement) -> bool {
        if self.unrestricted {
            return true;
        }
        let action = requirement.action();
        if self
            .exact
            .get(requirement.target())
            .is_some_and(|actions| actions.contains(action))
        {
            return true;
        }
        self.patterns
            .iter()
            .any(|grant| grant.actions.contains(action) && grant.pattern.matches(requirement.target()))
    }
}
