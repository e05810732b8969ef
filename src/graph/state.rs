use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{DcrError, Result, utils};

use super::{EventKey, Relations};

/// The three DCR marking flags of an event.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString, strum::EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Flag {
    Executed,
    Included,
    Pending,
}

/// Values of the three marking flags.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Marking {
    pub executed: bool,
    pub included: bool,
    pub pending: bool,
}

impl Marking {
    pub fn new(
        executed: bool,
        included: bool,
        pending: bool,
    ) -> Self {
        Self {
            executed,
            included,
            pending,
        }
    }

    pub fn get(
        &self,
        flag: Flag,
    ) -> bool {
        match flag {
            Flag::Executed => self.executed,
            Flag::Included => self.included,
            Flag::Pending => self.pending,
        }
    }

    pub fn set(
        &mut self,
        flag: Flag,
        value: bool,
    ) {
        match flag {
            Flag::Executed => self.executed = value,
            Flag::Included => self.included = value,
            Flag::Pending => self.pending = value,
        }
    }
}

/// Holder of an event lock.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub owner: String,
    /// Epoch millis at which the lock was granted.
    pub acquired_at: i64,
}

/// Complete state of one event node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventState {
    pub key: EventKey,
    pub name: String,
    /// Address at which this event's node is reachable by its peers.
    pub uri: String,
    pub roles: BTreeSet<String>,
    pub marking: Marking,
    /// Marking configured at creation; restored by a reset.
    pub initial: Marking,
    pub lock: Option<LockRecord>,
    pub relations: Relations,
}

impl EventState {
    /// Grants the lock to `owner` if the event is free. Locks are not reentrant:
    /// a held lock rejects every new request, including one from its own owner.
    pub fn acquire_lock(
        &mut self,
        owner: &str,
    ) -> Result<LockRecord> {
        if let Some(held) = &self.lock {
            return Err(DcrError::Locked {
                key: self.key.to_string(),
                owner: held.owner.clone(),
            });
        }
        let record = LockRecord {
            owner: owner.to_string(),
            acquired_at: utils::time::time_millis(),
        };
        self.lock = Some(record.clone());
        Ok(record)
    }

    /// Releases a lock held by `owner`. Releasing a free event succeeds.
    pub fn release_lock(
        &mut self,
        owner: &str,
    ) -> Result<()> {
        match &self.lock {
            None => Ok(()),
            Some(held) if held.owner == owner => {
                self.lock = None;
                Ok(())
            }
            Some(held) => Err(DcrError::Locked {
                key: self.key.to_string(),
                owner: held.owner.clone(),
            }),
        }
    }

    /// Fails with `Locked` if the event is held by anyone other than `caller`.
    pub fn ensure_writable_by(
        &self,
        caller: &str,
    ) -> Result<()> {
        match &self.lock {
            Some(held) if held.owner != caller => Err(DcrError::Locked {
                key: self.key.to_string(),
                owner: held.owner.clone(),
            }),
            _ => Ok(()),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }
}
