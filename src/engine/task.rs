//! Event-loop task owning the ducking engine, and its command handle.
//!
//! All engine mutation is serialised through one unbounded channel drained
//! by a single task, keeping the core free of locks. Between commands the
//! task sleeps on the earliest hold deadline, so deferred recomputations
//! fire without any per-timer bookkeeping.

use super::{DuckingEngine, SpeechPhase};
use crate::{
    config::Config,
    error::{ControlError, ControlResult, EngineError},
    events::SpeakerEvent,
    id::{ParticipantId, TalkgroupId},
    model::Talkgroup,
    session::InboundTrack,
};
use flume::{Receiver, Sender};
use std::collections::BTreeMap;
use tokio::{
    spawn,
    time::{sleep_until, Instant},
};
use tracing::{trace, warn};

pub(crate) enum EngineMessage {
    Initialize {
        talkgroups: Vec<Talkgroup>,
        default_volume: f32,
        tx: Sender<Result<(), EngineError>>,
    },
    Speaker(SpeakerEvent),
    SetSettings {
        talkgroup: TalkgroupId,
        muted: Option<bool>,
        volume: Option<f32>,
    },
    SetMasterVolume(f32),
    SetDuckingEnabled(bool),
    EmergencyOverride {
        talkgroup: TalkgroupId,
        tx: Sender<Result<(), EngineError>>,
    },
    ClearEmergency,
    AttachTrack {
        talkgroup: TalkgroupId,
        track: InboundTrack,
    },
    ClearTracks {
        talkgroup: TalkgroupId,
    },
    Snapshot(Sender<EngineSnapshot>),
    Destroy,
    Poison,
}

/// Observable view of one gain controller.
#[derive(Clone, Debug, PartialEq)]
pub struct GainView {
    /// Gain as evaluated on the audio clock at snapshot time.
    pub current: f32,
    /// Scheduled target gain.
    pub target: f32,
    /// Speech phase of the talkgroup.
    pub phase: SpeechPhase,
    /// Number of inbound tracks routed through this stage.
    pub track_count: usize,
}

/// Full observable view of the engine, answered over the command channel.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSnapshot {
    /// Gain state per talkgroup, in stable id order.
    pub gains: BTreeMap<TalkgroupId, GainView>,
    /// The collapsed voice active on each talkgroup, if any.
    pub active_speakers: BTreeMap<TalkgroupId, ParticipantId>,
    /// Whether any active speaker sits on a priority-static talkgroup.
    pub emergency_active: bool,
    /// Talkgroup pinned by an emergency override, if one is in force.
    pub override_target: Option<TalkgroupId>,
}

/// Handle for safe control of the engine task from other tasks.
///
/// These are cheap to clone. Most commands are fire-and-forget; failures
/// to deliver mean the engine task has shut down and surface as
/// [`ControlError::Finished`].
#[derive(Clone, Debug)]
pub struct EngineHandle {
    sender: Sender<EngineMessage>,
}

impl EngineHandle {
    /// Creates the engine task in the background and returns its handle.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (tx, rx) = flume::unbounded();

        spawn(async move {
            trace!("Engine task started.");
            runner(config, rx).await;
            trace!("Engine task finished.");
        });

        Self { sender: tx }
    }

    /// Allocates gain controllers for the admitted talkgroup set.
    pub async fn initialize(
        &self,
        talkgroups: Vec<Talkgroup>,
        default_volume: f32,
    ) -> ControlResult<()> {
        let (tx, rx) = flume::bounded(1);
        self.send(EngineMessage::Initialize {
            talkgroups,
            default_volume,
            tx,
        })?;

        rx.recv_async().await?.map_err(Into::into)
    }

    /// Forwards a collapsed speaker change.
    pub fn speaker_event(&self, event: SpeakerEvent) -> ControlResult<()> {
        self.send(EngineMessage::Speaker(event))
    }

    /// Updates a talkgroup's mute/volume settings.
    pub fn set_settings(
        &self,
        talkgroup: TalkgroupId,
        muted: Option<bool>,
        volume: Option<f32>,
    ) -> ControlResult<()> {
        self.send(EngineMessage::SetSettings {
            talkgroup,
            muted,
            volume,
        })
    }

    /// Applies the master fader to every channel.
    pub fn set_master_volume(&self, volume: f32) -> ControlResult<()> {
        self.send(EngineMessage::SetMasterVolume(volume))
    }

    /// Enables or disables priority ducking.
    pub fn set_ducking_enabled(&self, enabled: bool) -> ControlResult<()> {
        self.send(EngineMessage::SetDuckingEnabled(enabled))
    }

    /// Engages an emergency override on a priority-static talkgroup.
    pub async fn emergency_override(&self, talkgroup: TalkgroupId) -> ControlResult<()> {
        let (tx, rx) = flume::bounded(1);
        self.send(EngineMessage::EmergencyOverride { talkgroup, tx })?;

        rx.recv_async().await?.map_err(Into::into)
    }

    /// Releases an emergency override, if one is in force.
    pub fn clear_emergency(&self) -> ControlResult<()> {
        self.send(EngineMessage::ClearEmergency)
    }

    /// Routes an inbound track through its talkgroup's gain stage.
    pub fn attach_track(&self, talkgroup: TalkgroupId, track: InboundTrack) -> ControlResult<()> {
        self.send(EngineMessage::AttachTrack { talkgroup, track })
    }

    /// Drops every routed track for a talkgroup.
    pub fn clear_tracks(&self, talkgroup: TalkgroupId) -> ControlResult<()> {
        self.send(EngineMessage::ClearTracks { talkgroup })
    }

    /// Requests the engine's observable state.
    pub async fn snapshot(&self) -> ControlResult<EngineSnapshot> {
        let (tx, rx) = flume::bounded(1);
        self.send(EngineMessage::Snapshot(tx))?;

        rx.recv_async().await.map_err(Into::into)
    }

    /// Cancels all timers and zeroes all gain schedules; the task stays
    /// alive for a later `initialize`.
    pub fn destroy(&self) -> ControlResult<()> {
        self.send(EngineMessage::Destroy)
    }

    /// Stops the engine task outright.
    pub fn shutdown(&self) {
        drop(self.sender.send(EngineMessage::Poison));
    }

    fn send(&self, msg: EngineMessage) -> ControlResult<()> {
        self.sender.send(msg).map_err(|_| ControlError::Finished)
    }
}

async fn runner(config: Config, rx: Receiver<EngineMessage>) {
    let mut engine = DuckingEngine::new(config);

    loop {
        let msg = match engine.next_hold_deadline() {
            Some(deadline) => tokio::select! {
                msg = rx.recv_async() => match msg {
                    Ok(msg) => Some(msg),
                    Err(_) => break,
                },
                () = sleep_until(deadline) => None,
            },
            None => match rx.recv_async().await {
                Ok(msg) => Some(msg),
                Err(_) => break,
            },
        };

        let now = Instant::now();

        match msg {
            None => {
                engine.fire_due_holds(now);
            },
            Some(EngineMessage::Initialize {
                talkgroups,
                default_volume,
                tx,
            }) => {
                drop(tx.send(engine.initialize(&talkgroups, default_volume, now)));
            },
            Some(EngineMessage::Speaker(evt)) => {
                engine.speaker_event(&evt.talkgroup, evt.participant, evt.speaking, evt.timestamp);
            },
            Some(EngineMessage::SetSettings {
                talkgroup,
                muted,
                volume,
            }) => {
                engine.set_user_settings(&talkgroup, muted, volume, now);
            },
            Some(EngineMessage::SetMasterVolume(volume)) => {
                engine.set_master_volume(volume, now);
            },
            Some(EngineMessage::SetDuckingEnabled(enabled)) => {
                engine.set_ducking_enabled(enabled, now);
            },
            Some(EngineMessage::EmergencyOverride { talkgroup, tx }) => {
                let result = engine.emergency_override(&talkgroup, now);
                if let Err(ref e) = result {
                    warn!("emergency override on {} refused: {}", talkgroup, e);
                }
                drop(tx.send(result));
            },
            Some(EngineMessage::ClearEmergency) => {
                engine.clear_emergency(now);
            },
            Some(EngineMessage::AttachTrack { talkgroup, track }) => {
                engine.attach_track(&talkgroup, track);
            },
            Some(EngineMessage::ClearTracks { talkgroup }) => {
                engine.clear_tracks(&talkgroup);
            },
            Some(EngineMessage::Snapshot(tx)) => {
                drop(tx.send(engine.snapshot(now)));
            },
            Some(EngineMessage::Destroy) => {
                engine.destroy(now);
            },
            Some(EngineMessage::Poison) => break,
        }
    }
}
