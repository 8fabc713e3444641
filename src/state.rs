//! The observable coordinator state: the single structure UI code reads.
//!
//! Mutation happens exclusively inside the coordinator; observers take
//! cheap [`watch::Receiver`] clones. Every mutator is idempotent by
//! construction: a change that produces an identical snapshot is not
//! re-published, so watchers never see spurious wakeups.

use crate::{
    id::TalkgroupId,
    model::{Talkgroup, TalkgroupKind},
};
use std::collections::BTreeMap;
use tokio::{sync::watch, time::Instant};

/// Connection status of the whole session set.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ConnectionStatus {
    /// No sessions exist.
    Disconnected,
    /// Sessions are being established.
    Connecting,
    /// All sessions are open.
    Connected,
    /// At least one session dropped and is re-establishing itself.
    Reconnecting,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

/// Observable per-talkgroup section.
#[derive(Clone, Debug, PartialEq)]
pub struct TalkgroupState {
    /// Display name.
    pub name: String,
    /// Kind tag.
    pub kind: TalkgroupKind,
    /// Priority value; higher preempts lower.
    pub priority: u32,
    /// Whether the participant has joined this talkgroup.
    pub joined: bool,
    /// User mute flag.
    pub muted: bool,
    /// User listening volume in `[0.0, 1.0]`.
    pub volume: f32,
    /// Whether the talkgroup's collapsed voice is currently active.
    pub is_active_speaker: bool,
    /// Audio-clock instant of the last speech change, if any.
    pub last_activity: Option<Instant>,
}

impl TalkgroupState {
    pub(crate) fn for_talkgroup(tg: &Talkgroup, default_volume: f32) -> Self {
        Self {
            name: tg.name.clone(),
            kind: tg.kind,
            priority: tg.priority,
            joined: false,
            muted: false,
            volume: default_volume,
            is_active_speaker: false,
            last_activity: None,
        }
    }
}

/// Observable union of session state and ducking state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CoordinatorState {
    /// Per-talkgroup section, in stable id order.
    pub talkgroups: BTreeMap<TalkgroupId, TalkgroupState>,
    /// Whether every session is established.
    pub is_connected: bool,
    /// Connection status of the session set.
    pub connection_status: ConnectionStatus,
    /// Master fader applied to every channel.
    pub master_volume: f32,
    /// Whether priority ducking is applied.
    pub is_ducking_enabled: bool,
    /// Whether an emergency speaker or override is active.
    pub is_emergency_active: bool,
    /// The emergency talkgroup responsible for `is_emergency_active`.
    pub emergency_talkgroup: Option<TalkgroupId>,
    /// The single talkgroup the microphone publishes to, if any.
    pub transmit_target: Option<TalkgroupId>,
    /// Membership ids sorted by (priority desc, id asc) for deterministic
    /// rendering. Derived at connect time.
    pub priority_order: Vec<TalkgroupId>,
}

impl CoordinatorState {
    pub(crate) fn initial(master_volume: f32, is_ducking_enabled: bool) -> Self {
        Self {
            master_volume,
            is_ducking_enabled,
            ..Self::default()
        }
    }
}

/// Derives the deterministic rendering order of the admitted set.
#[must_use]
pub fn derive_priority_order(
    talkgroups: &BTreeMap<TalkgroupId, TalkgroupState>,
) -> Vec<TalkgroupId> {
    let mut order: Vec<(u32, TalkgroupId)> = talkgroups
        .iter()
        .map(|(id, state)| (state.priority, id.clone()))
        .collect();

    order.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    order.into_iter().map(|(_, id)| id).collect()
}

/// Publisher half of the observable state.
#[derive(Debug)]
pub(crate) struct StateStore {
    tx: watch::Sender<CoordinatorState>,
}

impl StateStore {
    pub(crate) fn new(initial: CoordinatorState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// A fresh observer of the current state.
    pub(crate) fn watch(&self) -> watch::Receiver<CoordinatorState> {
        self.tx.subscribe()
    }

    /// Copy of the current snapshot.
    pub(crate) fn current(&self) -> CoordinatorState {
        self.tx.borrow().clone()
    }

    /// Applies `f` to a copy of the state, publishing only if the result
    /// differs from the current snapshot. Returns whether it did.
    pub(crate) fn mutate<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut CoordinatorState),
    {
        self.tx.send_if_modified(|state| {
            let mut next = state.clone();
            f(&mut next);
            if next == *state {
                false
            } else {
                *state = next;
                true
            }
        })
    }

    /// Drops all session-scoped state, preserving the persisted user
    /// preferences mirrored into the global section.
    pub(crate) fn reset(&self) -> bool {
        self.mutate(|state| {
            *state = CoordinatorState::initial(state.master_volume, state.is_ducking_enabled);
        })
    }
}
