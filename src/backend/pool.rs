//! Target pool with health-driven deactivation.

use crate::backend::algorithms::{Selection, Selector};
use crate::backend::Target;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Owns the configured targets and the subset currently considered healthy.
///
/// The pool itself has no notion of time. [`TargetPool::deactivate`] hands
/// out a [`ReactivationTicket`] and the owner schedules
/// [`TargetPool::reactivate`] once the cooldown has elapsed.
pub struct TargetPool {
    /// Every configured target, in configuration order.
    all: Vec<Target>,
    /// Targets eligible for new connections, in activation order.
    active: Vec<Target>,
    /// Membership index for `active`.
    active_lookup: HashSet<Target>,
    /// Latest outstanding ticket per deactivated target.
    pending: HashMap<Target, u64>,
    /// Sequence for issued tickets.
    next_ticket: u64,
    /// Selection policy.
    selection: Selection,
    /// Index selector for `selection`.
    selector: Box<dyn Selector>,
}

/// Proof of a deactivation, redeemed when its cooldown fires.
///
/// Only the most recent ticket for a target is honoured; explicit
/// reactivation, a later deactivation, or replacing the target list
/// make older tickets inert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactivationTicket {
    target: Target,
    seq: u64,
}

impl ReactivationTicket {
    /// The target this ticket reactivates.
    pub fn target(&self) -> &Target {
        &self.target
    }
}

impl TargetPool {
    /// Create a pool where every target starts active.
    pub fn new(targets: Vec<Target>, selection: Selection) -> Self {
        let mut pool = Self {
            all: Vec::new(),
            active: Vec::new(),
            active_lookup: HashSet::new(),
            pending: HashMap::new(),
            next_ticket: 0,
            selection,
            selector: selection.selector(),
        };
        pool.set_targets(targets);
        pool
    }

    /// Replace the target list wholesale. All targets start active and
    /// any pending reactivation is cancelled.
    pub fn set_targets(&mut self, targets: Vec<Target>) {
        let mut seen = HashSet::with_capacity(targets.len());
        let all: Vec<Target> = targets
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();

        self.active = all.clone();
        self.active_lookup = seen;
        self.all = all;
        self.pending.clear();

        info!(
            targets = self.all.len(),
            selector = self.selector.name(),
            "target pool initialized"
        );
    }

    /// The selection policy in use.
    pub fn selection(&self) -> Selection {
        self.selection
    }

    /// All configured targets.
    pub fn targets(&self) -> &[Target] {
        &self.all
    }

    /// Targets currently eligible for new connections.
    pub fn active_targets(&self) -> &[Target] {
        &self.active
    }

    /// Whether `target` is currently active.
    pub fn is_active(&self, target: &Target) -> bool {
        self.active_lookup.contains(target)
    }

    /// Select by client key over the full target list.
    pub fn select_primary(&self, key: &str) -> Option<&Target> {
        let idx = self.selector.index(key, self.all.len())?;
        self.all.get(idx)
    }

    /// Select by client key over the active subset.
    pub fn select_secondary(&self, key: &str) -> Option<&Target> {
        let idx = self.selector.index(key, self.active.len())?;
        self.active.get(idx)
    }

    /// Choose a target for `key`.
    ///
    /// The primary choice wins while it is active, so a sticky client only
    /// moves when its own target goes down. Otherwise fall back to the
    /// active subset; `None` when nothing is active.
    pub fn choose(&self, key: &str) -> Option<Target> {
        if let Some(primary) = self.select_primary(key) {
            if self.is_active(primary) {
                return Some(primary.clone());
            }
        }

        let secondary = self.select_secondary(key).cloned();
        match &secondary {
            Some(target) => debug!(client = key, upstream = %target, "primary inactive, using fallback target"),
            None => warn!(client = key, "no active targets"),
        }
        secondary
    }

    /// Remove `target` from the active subset.
    ///
    /// Returns the ticket to redeem after the cooldown, or `None` if the
    /// target was not active.
    pub fn deactivate(&mut self, target: &Target) -> Option<ReactivationTicket> {
        if !self.active_lookup.remove(target) {
            return None;
        }
        self.active.retain(|t| t != target);

        self.next_ticket += 1;
        let seq = self.next_ticket;
        self.pending.insert(target.clone(), seq);

        warn!(upstream = %target, active = self.active.len(), "target deactivated");

        Some(ReactivationTicket {
            target: target.clone(),
            seq,
        })
    }

    /// Redeem a cooldown ticket.
    ///
    /// The target is re-inserted only if the ticket is still the latest
    /// for that target and the target is absent from the active subset.
    pub fn reactivate(&mut self, ticket: &ReactivationTicket) -> bool {
        if self.pending.get(&ticket.target) != Some(&ticket.seq) {
            return false;
        }
        self.pending.remove(&ticket.target);
        self.insert_active(&ticket.target)
    }

    /// Reactivate a target ahead of its cooldown, cancelling the pending
    /// reactivation.
    pub fn reactivate_target(&mut self, target: &Target) -> bool {
        self.pending.remove(target);
        self.insert_active(target)
    }

    fn insert_active(&mut self, target: &Target) -> bool {
        if self.active_lookup.contains(target) || !self.all.contains(target) {
            return false;
        }
        self.active.push(target.clone());
        self.active_lookup.insert(target.clone());

        info!(upstream = %target, active = self.active.len(), "target reactivated");
        true
    }
}
