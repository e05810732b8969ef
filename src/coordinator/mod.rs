//! Execution coordinator: the DCR state machine of one event node.
//!
//! An execution attempt runs through
//! `Authorizing -> CheckingExecutability -> Locking -> Mutating -> Propagating -> Unlocking`
//! and ends in `Done` or `Failed`.
//!
//! - Failures up to and including `Locking` leave no trace: locks acquired by
//!   the attempt are released before the error is returned.
//! - Once `Executed` is committed locally the attempt counts as having happened.
//!   Propagation and unlock failures after that point are reported in the
//!   [`ExecutionReport`] but never undo the local execution.
//!
//! Peer locks are acquired one at a time in ascending target order. A peer
//! that times out while granting a lock may still grant it after this attempt
//! has rolled back; that lock is not retracted. Lock requests and pushes are
//! tagged with the full `workflow/event` key of the executing event.

mod phase;
mod report;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use futures::future::join_all;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    DcrError, Result, auth,
    gateway::PeerGateway,
    graph::{EventKey, EventState, Flag, RelationKind, RelationTarget},
    store::EventStore,
    utils,
};

pub use phase::ExecutionPhase;
pub use report::{ExecutionReport, PropagationFailure, UnlockFailure};

/// Relation kinds pushed to neighbours after a local execution, in push order.
const PROPAGATED: [RelationKind; 3] = [RelationKind::Response, RelationKind::Inclusion, RelationKind::Exclusion];

/// Flag change a relation applies to its target when the source executes.
fn effect(kind: RelationKind) -> Option<(Flag, bool)> {
    match kind {
        RelationKind::Condition => None,
        RelationKind::Response => Some((Flag::Pending, true)),
        RelationKind::Inclusion => Some((Flag::Included, true)),
        RelationKind::Exclusion => Some((Flag::Included, false)),
    }
}

/// Drives execution attempts for the events stored in one node.
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn EventStore>,
    gateway: Arc<dyn PeerGateway>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn EventStore>,
        gateway: Arc<dyn PeerGateway>,
    ) -> Self {
        Self {
            store,
            gateway,
        }
    }

    /// Executes the event on behalf of a caller holding `roles`.
    ///
    /// Returns `NotFound`, `Unauthorized`, `NotExecutable`, `Locked` or
    /// `PeerUnreachable` without side effects, or a report once the local
    /// execution has committed.
    pub async fn execute(
        &self,
        key: &EventKey,
        roles: &[String],
    ) -> Result<ExecutionReport> {
        let attempt = utils::shortid();
        let span = info_span!("execute", workflow = %key.workflow_id, event = %key.event_id, attempt = %attempt);

        async move {
            let mut phase = ExecutionPhase::Idle;
            let result = self.run(key, roles, &attempt, &mut phase).await;
            match &result {
                Ok(report) if report.is_complete() => info!("executed with {} peer(s) locked", report.peers_locked),
                Ok(report) => warn!(
                    "executed with {} propagation and {} unlock failure(s)",
                    report.propagation_failures.len(),
                    report.unlock_failures.len()
                ),
                Err(err) => {
                    let failed_in = std::mem::replace(&mut phase, ExecutionPhase::Failed);
                    if err.is_unreachable() {
                        warn!(phase = phase.as_ref(), failed_in = failed_in.as_ref(), "execution aborted: {err}");
                    } else {
                        debug!(phase = phase.as_ref(), failed_in = failed_in.as_ref(), "execution rejected: {err}");
                    }
                }
            }
            debug_assert!(phase.is_terminal());
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        key: &EventKey,
        roles: &[String],
        attempt: &str,
        phase: &mut ExecutionPhase,
    ) -> Result<ExecutionReport> {
        *phase = ExecutionPhase::Authorizing;
        let state = self.store.find(key).await?;
        auth::authorize(key, roles, &state.roles)?;

        *phase = ExecutionPhase::CheckingExecutability;
        self.check_executable(&state).await?;

        *phase = ExecutionPhase::Locking;
        let held = self.acquire_locks(&state).await?;

        *phase = ExecutionPhase::Mutating;
        if let Err(err) = self.store.set_flag(key, Flag::Executed, true).await {
            // nothing committed yet
            warn!("commit failed, releasing locks: {err}");
            self.release_locks(&state, &held).await;
            return Err(err);
        }
        debug!("executed flag committed");

        *phase = ExecutionPhase::Propagating;
        let propagation_failures = self.propagate(&state).await;

        *phase = ExecutionPhase::Unlocking;
        let unlock_failures = self.release_locks(&state, &held).await;

        *phase = ExecutionPhase::Done;
        Ok(ExecutionReport {
            key: key.clone(),
            attempt: attempt.to_string(),
            peers_locked: held.len(),
            propagation_failures,
            unlock_failures,
        })
    }

    /// The event must be included and free, and every included condition target executed.
    /// Unreachable condition targets fail the check rather than count as satisfied.
    pub async fn check_executable(
        &self,
        state: &EventState,
    ) -> Result<()> {
        if !state.marking.included {
            return Err(DcrError::NotExecutable(format!("{} is excluded", state.key)));
        }
        if let Some(held) = &state.lock {
            return Err(DcrError::Locked {
                key: state.key.to_string(),
                owner: held.owner.clone(),
            });
        }

        let caller_id = state.key.to_string();
        let caller = caller_id.as_str();
        for condition in state.relations.conditions.iter() {
            let blocking = if condition.key == state.key {
                !state.marking.executed
            } else {
                self.gateway.is_included(condition, caller).await? && !self.gateway.is_executed(condition, caller).await?
            };
            if blocking {
                return Err(DcrError::NotExecutable(format!("condition {} is included and not executed", condition.key)));
            }
        }
        Ok(())
    }

    /// Locks the event itself, then each peer of the relation-to-lock set.
    /// On the first failure every lock taken so far is released again.
    async fn acquire_locks<'a>(
        &self,
        state: &'a EventState,
    ) -> Result<Vec<&'a RelationTarget>> {
        let owner_id = state.key.to_string();
        let owner = owner_id.as_str();
        self.store.acquire_lock(&state.key, owner).await?;
        debug!("self locked");

        let mut held = Vec::new();
        for peer in state.relations.lock_targets(&state.key) {
            match self.gateway.lock(peer, owner).await {
                Ok(()) => {
                    debug!(peer = %peer.key, "peer locked");
                    held.push(peer);
                }
                Err(err) => {
                    warn!(peer = %peer.key, "lock failed, rolling back {} lock(s): {err}", held.len() + 1);
                    self.release_locks(state, &held).await;
                    return Err(err);
                }
            }
        }
        Ok(held)
    }

    /// Releases the given peer locks, then the event's own lock. Never fails;
    /// releases that did not go through are returned for reporting.
    async fn release_locks(
        &self,
        state: &EventState,
        held: &[&RelationTarget],
    ) -> Vec<UnlockFailure> {
        let owner_id = state.key.to_string();
        let owner = owner_id.as_str();
        let releases = held.iter().map(|peer| async move { (*peer, self.gateway.unlock(peer, owner).await) });

        let mut failures = Vec::new();
        for (peer, result) in join_all(releases).await {
            match result {
                Ok(()) => debug!(peer = %peer.key, "peer unlocked"),
                Err(DcrError::NotFound(_)) => debug!(peer = %peer.key, "peer gone, treating lock as released"),
                Err(error) => {
                    warn!(peer = %peer.key, "unlock failed: {error}");
                    failures.push(UnlockFailure {
                        target: peer.key.clone(),
                        error,
                    });
                }
            }
        }

        if let Err(error) = self.store.release_lock(&state.key, owner).await {
            warn!("self unlock failed: {error}");
            failures.push(UnlockFailure {
                target: state.key.clone(),
                error,
            });
        }
        failures
    }

    /// Pushes responses, inclusions and exclusions to their targets. Sends of one
    /// kind run concurrently; the kinds are applied in a fixed order so a target
    /// that is both included and excluded ends up excluded.
    async fn propagate(
        &self,
        state: &EventState,
    ) -> Vec<PropagationFailure> {
        let mut failures = Vec::new();
        for kind in PROPAGATED {
            let sends = state.relations.get(kind).iter().map(|target| async move { (target, self.push(state, kind, target).await) });
            for (target, result) in join_all(sends).await {
                if let Err(error) = result {
                    warn!(peer = %target.key, kind = kind.as_ref(), "propagation failed: {error}");
                    failures.push(PropagationFailure {
                        target: target.key.clone(),
                        kind,
                        error,
                    });
                }
            }
        }
        failures
    }

    async fn push(
        &self,
        state: &EventState,
        kind: RelationKind,
        target: &RelationTarget,
    ) -> Result<()> {
        let Some((flag, value)) = effect(kind) else {
            return Ok(());
        };
        if target.key == state.key {
            return self.store.set_flag(&state.key, flag, value).await;
        }

        let caller_id = state.key.to_string();
        let caller = caller_id.as_str();
        match kind {
            RelationKind::Response => self.gateway.send_pending(target, caller).await,
            RelationKind::Inclusion => self.gateway.send_included(target, caller).await,
            RelationKind::Exclusion => self.gateway.send_excluded(target, caller).await,
            RelationKind::Condition => Ok(()),
        }
    }
}
