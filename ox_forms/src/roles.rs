//! Role-based visibility and configuration pruning.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::{FormConfig, RoleList, RoleRules};
use crate::tree;

/// `maxRole` ceiling used when the named role is unknown: no ceiling.
const UNBOUNDED_LEVEL: u32 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    User,
    Sales,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Guest, Role::User, Role::Sales, Role::Admin];

    pub fn level(self) -> u32 {
        match self {
            Role::Guest => 1,
            Role::User => 2,
            Role::Sales => 3,
            Role::Admin => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::User => "user",
            Role::Sales => "sales",
            Role::Admin => "admin",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Role::Guest => "Guest User",
            Role::User => "Regular User",
            Role::Sales => "Sales Representative",
            Role::Admin => "Administrator",
        }
    }

    /// All roles, highest level first.
    pub fn available() -> Vec<Role> {
        let mut roles = Role::ALL.to_vec();
        roles.sort_by_key(|r| std::cmp::Reverse(r.level()));
        roles
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Numeric level of a role name; unknown names are level 0.
pub fn role_level(role: &str) -> u32 {
    role.parse::<Role>().map_or(0, Role::level)
}

fn active_role(role: Option<&str>) -> Option<&str> {
    role.filter(|r| !r.is_empty())
}

/// No requirement grants access; a requirement with no user role denies.
/// Hierarchical mode compares levels (an unknown required role never
/// matches), otherwise the role name must match exactly.
pub fn has_role_access(user_role: Option<&str>, required: Option<&RoleList>, hierarchical: bool) -> bool {
    let Some(required) = required else {
        return true;
    };
    let Some(user_role) = active_role(user_role) else {
        return false;
    };
    let user_level = role_level(user_role);

    required.as_slice().iter().any(|role| {
        if hierarchical {
            let required_level = role_level(role);
            required_level > 0 && user_level >= required_level
        } else {
            user_role == role
        }
    })
}

pub fn is_role_denied(user_role: Option<&str>, denied: Option<&RoleList>) -> bool {
    match (active_role(user_role), denied) {
        (Some(user_role), Some(denied)) => denied.as_slice().iter().any(|r| r == user_role),
        _ => false,
    }
}

/// Deny list, then allow list, then `minRole`, then `maxRole`.
pub fn is_role_visible(user_role: Option<&str>, rules: &RoleRules) -> bool {
    if is_role_denied(user_role, rules.denied_roles.as_ref()) {
        return false;
    }

    let hierarchical = rules.role_hierarchical.unwrap_or(true);
    if rules.allowed_roles.is_some() && !has_role_access(user_role, rules.allowed_roles.as_ref(), hierarchical) {
        return false;
    }

    if let Some(min_role) = &rules.min_role {
        let min = RoleList::One(min_role.clone());
        if !has_role_access(user_role, Some(&min), true) {
            return false;
        }
    }

    if let Some(max_role) = &rules.max_role {
        let user_level = active_role(user_role).map_or(0, role_level);
        let max_level = match role_level(max_role) {
            0 => UNBOUNDED_LEVEL,
            level => level,
        };
        if user_level > max_level {
            return false;
        }
    }

    true
}

/// Returns a copy of `config` with every node the role may not see removed,
/// at every nesting level. Without a role the configuration is returned
/// unchanged.
pub fn filter_config_by_role(config: &FormConfig, user_role: Option<&str>) -> FormConfig {
    let mut filtered = config.clone();
    if let Some(role) = active_role(user_role) {
        tree::retain_config(&mut filtered, &mut |node| is_role_visible(Some(role), node.role_rules()));
    }
    filtered
}
