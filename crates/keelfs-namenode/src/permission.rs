//! Unix-style rwx permission checks over resolved ancestor chains.

use crate::inode::InodeRecord;
use crate::types::NnError;

/// Read bit.
pub const READ: u8 = 0b100;
/// Write bit.
pub const WRITE: u8 = 0b010;
/// Execute (traverse) bit.
pub const EXECUTE: u8 = 0b001;
/// Read plus traverse, used by LS.
pub const READ_EXECUTE: u8 = READ | EXECUTE;

/// True if `user`/`group` holds every bit of `access` on the record.
pub fn allows(record: &InodeRecord, user: &str, group: &str, access: u8) -> bool {
    let mode = record.permission;
    let class = if record.owner == user {
        mode >> 6
    } else if record.group == group {
        mode >> 3
    } else {
        mode
    };
    let bits = (class & 0o7) as u8;
    bits & access == access
}

/// Evaluates access over ancestor chains, with a superuser bypass.
pub struct PermissionChecker {
    superuser: String,
}

impl PermissionChecker {
    /// Creates a checker treating `superuser` as all-powerful.
    pub fn new(superuser: impl Into<String>) -> Self {
        Self {
            superuser: superuser.into(),
        }
    }

    /// True for the configured superuser.
    pub fn is_super(&self, user: &str) -> bool {
        user == self.superuser
    }

    /// Checks `target_access` on the last entry of `chain`, requiring
    /// traverse permission on every entry before it. The chain is the
    /// resolved ancestor list, root first. An empty chain passes (the
    /// namespace has no root yet).
    pub fn check_chain(
        &self,
        chain: &[InodeRecord],
        user: &str,
        group: &str,
        target_access: u8,
    ) -> Result<(), NnError> {
        if self.is_super(user) {
            return Ok(());
        }
        let Some((target, ancestors)) = chain.split_last() else {
            return Ok(());
        };
        for ancestor in ancestors {
            if !allows(ancestor, user, group, EXECUTE) {
                return Err(NnError::PermissionDenied);
            }
        }
        if !allows(target, user, group, target_access) {
            return Err(NnError::PermissionDenied);
        }
        Ok(())
    }
}
