//! Who is making the attempt: the key for lockout bookkeeping and the
//! `User/IP` column of the audit log.

/// Supplies the identifier of the current machine or user.
pub trait IdentityProvider: Send + Sync {
    /// Stable, non-empty identifier.
    fn identifier(&self) -> String;
}

/// Machine name from the environment: `COMPUTERNAME` (Windows), then
/// `HOSTNAME`, then `"unknown"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MachineIdentity;

impl MachineIdentity {
    fn resolve(lookup: impl Fn(&str) -> Option<String>) -> String {
        ["COMPUTERNAME", "HOSTNAME"]
            .into_iter()
            .filter_map(lookup)
            .map(|name| name.trim().to_owned())
            .find(|name| !name.is_empty())
            .unwrap_or_else(|| "unknown".to_owned())
    }
}

impl IdentityProvider for MachineIdentity {
    fn identifier(&self) -> String {
        Self::resolve(|var| std::env::var(var).ok())
    }
}

/// Constant identifier, for service accounts and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedIdentity(pub String);

impl IdentityProvider for FixedIdentity {
    fn identifier(&self) -> String {
        self.0.clone()
    }
}
