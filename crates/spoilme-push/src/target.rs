//! Who a push is addressed to.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushTarget {
    /// Every device of one user.
    Individual(String),
    /// Every device of users in a membership tier.
    Tier(String),
    /// Every registered device.
    All,
    /// Users flagged as admins.
    Admins,
    /// One user's devices still marked active. Used for per-user
    /// notifications rather than console pushes.
    ActiveDevices(String),
}

impl PushTarget {
    /// Build a target from the wire pair `targetType` / `targetValue`.
    pub fn from_parts(target_type: &str, target_value: Option<&str>) -> Result<Self, String> {
        let value = || {
            target_value
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| format!("targetType '{target_type}' requires a targetValue"))
        };

        match target_type {
            "individual" => Ok(Self::Individual(value()?)),
            "tier" => Ok(Self::Tier(value()?)),
            "all" => Ok(Self::All),
            "admins" => Ok(Self::Admins),
            other => Err(format!("unknown targetType '{other}'")),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PushTarget::Individual(_) => "individual",
            PushTarget::Tier(_) => "tier",
            PushTarget::All => "all",
            PushTarget::Admins => "admins",
            PushTarget::ActiveDevices(_) => "active_devices",
        }
    }
}
