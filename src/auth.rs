//! Role-based authorization of execution requests.

use std::collections::BTreeSet;

use crate::{DcrError, Result, graph::EventKey};

/// Authorizes a caller iff at least one claimed role is configured on the event.
/// An event without roles therefore authorizes nobody.
pub fn authorize(
    key: &EventKey,
    claimed: &[String],
    configured: &BTreeSet<String>,
) -> Result<()> {
    if claimed.iter().any(|role| configured.contains(role)) {
        return Ok(());
    }
    Err(DcrError::Unauthorized(format!("none of the roles {:?} may execute {}", claimed, key)))
}
