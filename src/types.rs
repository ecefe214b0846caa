/// Shared types used across the codebase

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Principal access level, ordered from least to most privileged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Deny,
    Read,
    Edit,
    Full,
    Root,
}

impl Access {
    /// Full and root may bypass owner checks, see deleted rows and change roles
    pub fn is_elevated(&self) -> bool {
        matches!(self, Access::Full | Access::Root)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Access::Deny => "deny",
            Access::Read => "read",
            Access::Edit => "edit",
            Access::Full => "full",
            Access::Root => "root",
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Access {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deny" => Ok(Access::Deny),
            "read" => Ok(Access::Read),
            "edit" => Ok(Access::Edit),
            "full" => Ok(Access::Full),
            "root" => Ok(Access::Root),
            other => Err(format!("unknown access level: {}", other)),
        }
    }
}

/// Operations a principal can attempt against a resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    List,
    Read,
    Create,
    Update,
    Delete,
    Restore, // Undo soft-delete by clearing deleted_at
}

impl Action {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Action::Create | Action::Update | Action::Delete | Action::Restore)
    }

    /// Lowest access level allowed to attempt the action
    pub fn required_access(&self) -> Access {
        match self {
            Action::List | Action::Read => Access::Read,
            Action::Create | Action::Update | Action::Delete => Access::Edit,
            Action::Restore => Access::Full,
        }
    }
}
