//! Priority-based audio ducking engine.
//!
//! The engine is a mixed-sync system in the same shape as the session
//! coordinator around it: a synchronous state machine ([`DuckingEngine`])
//! owned by a single event-loop task, commanded through a cheap cloneable
//! [`EngineHandle`]. Nothing here runs on the audio thread; every
//! recomputation only reschedules time-stamped ramps that the audio runtime
//! evaluates against its own clock.

pub mod gain;
mod task;

pub use self::{
    gain::{GainController, GainRamp},
    task::{EngineHandle, EngineSnapshot, GainView},
};

use crate::{
    config::Config,
    constants::*,
    error::EngineError,
    id::{ParticipantId, TalkgroupId},
    model::{Talkgroup, TalkgroupKind},
    session::InboundTrack,
};
use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Per-talkgroup user preferences consumed by gain computation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UserTalkgroupSettings {
    /// Whether the user silenced this talkgroup.
    pub muted: bool,
    /// User listening volume in `[0.0, 1.0]`.
    pub volume: f32,
}

impl Default for UserTalkgroupSettings {
    fn default() -> Self {
        Self {
            muted: false,
            volume: 1.0,
        }
    }
}

/// The collapsed voice currently active on a talkgroup.
#[derive(Clone, Debug)]
pub struct ActiveSpeaker {
    /// Reported participant identity.
    pub participant: ParticipantId,
    /// Audio-clock instant speech began.
    pub since: Instant,
    /// Priority of the talkgroup, snapshotted at speech start.
    pub priority: u32,
}

/// Speech phase of a single talkgroup inside the engine.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SpeechPhase {
    /// No speech, no pending hold.
    Idle,
    /// A speaker is active.
    Speaking,
    /// Speech ended; ducking is maintained until the hold deadline.
    Holding,
}

struct Slot {
    talkgroup: Talkgroup,
    settings: UserTalkgroupSettings,
    gain: GainController,
    phase: SpeechPhase,
    tracks: Vec<InboundTrack>,
}

impl Slot {
    /// Volume the user actually hears with no duck applied: user volume
    /// scaled by the master fader, zero when muted.
    fn effective_volume(&self, master: f32) -> f32 {
        if self.settings.muted {
            0.0
        } else {
            self.settings.volume * master
        }
    }
}

/// Synchronous core of the ducking engine.
///
/// All mutation happens through the owning event loop; operations take an
/// explicit `now` so hold and ramp behaviour is fully deterministic under
/// test. Hold timers are plain deadlines: the loop asks for
/// [`next_hold_deadline`] and calls [`fire_due_holds`] when one passes.
///
/// [`next_hold_deadline`]: DuckingEngine::next_hold_deadline
/// [`fire_due_holds`]: DuckingEngine::fire_due_holds
pub struct DuckingEngine {
    config: Config,
    slots: HashMap<TalkgroupId, Slot>,
    active: HashMap<TalkgroupId, ActiveSpeaker>,
    holds: HashMap<TalkgroupId, Instant>,
    override_target: Option<TalkgroupId>,
    master_volume: f32,
    initialised: bool,
}

impl DuckingEngine {
    /// Creates an empty engine with the given configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            slots: HashMap::new(),
            active: HashMap::new(),
            holds: HashMap::new(),
            override_target: None,
            master_volume: 1.0,
            initialised: false,
        }
    }

    /// Allocates one gain controller per talkgroup, resting at the user's
    /// default volume.
    ///
    /// Idempotent: a second call with the same talkgroup set is a no-op; a
    /// different set is rejected with [`EngineError::KindMismatch`].
    pub fn initialize(
        &mut self,
        talkgroups: &[Talkgroup],
        default_volume: f32,
        now: Instant,
    ) -> Result<(), EngineError> {
        if self.initialised {
            let same = talkgroups.len() == self.slots.len()
                && talkgroups.iter().all(|tg| {
                    self.slots
                        .get(&tg.id)
                        .map_or(false, |slot| slot.talkgroup.kind == tg.kind)
                });
            return if same {
                trace!("engine already initialised with this talkgroup set");
                Ok(())
            } else {
                Err(EngineError::KindMismatch)
            };
        }

        let volume = clamp_volume(default_volume);
        for tg in talkgroups {
            let settings = UserTalkgroupSettings {
                muted: false,
                volume,
            };
            let initial = volume * self.master_volume;
            self.slots.insert(tg.id.clone(), Slot {
                talkgroup: tg.clone(),
                settings,
                gain: GainController::new(initial, now),
                phase: SpeechPhase::Idle,
                tracks: Vec::new(),
            });
        }

        self.initialised = true;
        debug!("engine initialised with {} talkgroups", self.slots.len());
        Ok(())
    }

    /// Applies a start/stop change of a talkgroup's collapsed voice.
    ///
    /// Unknown talkgroups are logged and ignored; so are stop events with
    /// no matching active speaker.
    pub fn speaker_event(
        &mut self,
        talkgroup: &TalkgroupId,
        participant: ParticipantId,
        speaking: bool,
        now: Instant,
    ) {
        let (priority, hold_time) = match self.slots.get(talkgroup) {
            Some(slot) => (slot.talkgroup.priority, slot.talkgroup.hold_time),
            None => {
                warn!("speaker event for unknown talkgroup {}", talkgroup);
                return;
            },
        };

        if speaking {
            if !self.admit_speaker(talkgroup, priority, now) {
                return;
            }

            self.active.insert(talkgroup.clone(), ActiveSpeaker {
                participant,
                since: now,
                priority,
            });
            self.holds.remove(talkgroup);
            self.set_phase(talkgroup, SpeechPhase::Speaking);
            self.recompute(now);
        } else {
            if self.override_target.as_ref() == Some(talkgroup) {
                // The synthetic override voice only ends on clear_emergency.
                trace!("ignoring stop for overridden talkgroup {}", talkgroup);
                return;
            }

            if self.active.remove(talkgroup).is_none() {
                trace!("stop event for idle talkgroup {}", talkgroup);
                return;
            }

            self.set_phase(talkgroup, SpeechPhase::Holding);
            self.holds.insert(talkgroup.clone(), now + hold_time);
            // Recomputation is deferred until the hold deadline fires.
        }
    }

    /// Admits a new speaker under the concurrency cap, evicting the
    /// lowest-priority current speaker when the newcomer outranks it.
    fn admit_speaker(&mut self, talkgroup: &TalkgroupId, priority: u32, now: Instant) -> bool {
        if self.active.contains_key(talkgroup)
            || self.active.len() < self.config.max_simultaneous_speakers
        {
            return true;
        }

        let lowest = self
            .active
            .iter()
            .min_by_key(|(id, spk)| (spk.priority, (*id).clone()))
            .map(|(id, spk)| (id.clone(), spk.priority));

        match lowest {
            Some((victim, victim_priority)) if priority > victim_priority => {
                warn!(
                    "speaker cap reached: dropping {} (priority {}) for {} (priority {})",
                    victim, victim_priority, talkgroup, priority
                );
                let hold = self
                    .slots
                    .get(&victim)
                    .map_or(self.config.default_hold, |s| s.talkgroup.hold_time);
                self.active.remove(&victim);
                self.set_phase(&victim, SpeechPhase::Holding);
                self.holds.insert(victim.clone(), now + hold);
                true
            },
            _ => {
                warn!(
                    "speaker cap reached: ignoring start on {} (priority {})",
                    talkgroup, priority
                );
                false
            },
        }
    }

    /// Updates a talkgroup's mute/volume settings and reschedules its gain
    /// with the settings ramp.
    pub fn set_user_settings(
        &mut self,
        talkgroup: &TalkgroupId,
        muted: Option<bool>,
        volume: Option<f32>,
        now: Instant,
    ) {
        match self.slots.get_mut(talkgroup) {
            Some(slot) => {
                if let Some(muted) = muted {
                    slot.settings.muted = muted;
                }
                if let Some(volume) = volume {
                    slot.settings.volume = clamp_volume(volume);
                }
            },
            None => {
                warn!("settings change for unknown talkgroup {}", talkgroup);
                return;
            },
        }

        let (target, _) = self.compute_target(talkgroup);
        if let Some(slot) = self.slots.get_mut(talkgroup) {
            slot.gain.schedule(target, SETTINGS_RAMP, now);
        }
    }

    /// Current settings for a talkgroup, if tracked.
    #[must_use]
    pub fn user_settings(&self, talkgroup: &TalkgroupId) -> Option<UserTalkgroupSettings> {
        self.slots.get(talkgroup).map(|slot| slot.settings)
    }

    /// Forces every other channel silent and the target to full volume,
    /// regardless of its mute setting, until [`clear_emergency`].
    ///
    /// [`clear_emergency`]: DuckingEngine::clear_emergency
    pub fn emergency_override(
        &mut self,
        talkgroup: &TalkgroupId,
        now: Instant,
    ) -> Result<(), EngineError> {
        let priority = match self.slots.get(talkgroup) {
            Some(slot) if slot.talkgroup.kind == TalkgroupKind::PriorityStatic => {
                slot.talkgroup.priority
            },
            Some(_) => return Err(EngineError::InvalidEmergencyTarget),
            None => return Err(EngineError::UnknownTalkgroup),
        };

        debug!("emergency override engaged on {}", talkgroup);
        self.override_target = Some(talkgroup.clone());
        self.active.insert(talkgroup.clone(), ActiveSpeaker {
            participant: ParticipantId::synthetic_override(),
            since: now,
            priority,
        });
        self.holds.remove(talkgroup);
        self.set_phase(talkgroup, SpeechPhase::Speaking);

        for (id, slot) in &mut self.slots {
            if id == talkgroup {
                slot.gain.set_immediate(OVERRIDE_GAIN, now);
            } else {
                slot.gain.set_immediate(0.0, now);
            }
        }

        Ok(())
    }

    /// Ends an emergency override and recomputes against remaining state.
    pub fn clear_emergency(&mut self, now: Instant) {
        if let Some(target) = self.override_target.take() {
            debug!("emergency override cleared on {}", target);
            if self
                .active
                .get(&target)
                .map_or(false, |spk| spk.participant == ParticipantId::synthetic_override())
            {
                self.active.remove(&target);
                self.set_phase(&target, SpeechPhase::Idle);
            }
            self.recompute(now);
        }
    }

    /// Scales every channel by the master fader and reschedules.
    pub fn set_master_volume(&mut self, volume: f32, now: Instant) {
        self.master_volume = clamp_volume(volume);
        self.reschedule_all(now, Some(SETTINGS_RAMP));
    }

    /// Enables or disables priority ducking and reschedules.
    pub fn set_ducking_enabled(&mut self, enabled: bool, now: Instant) {
        self.config.ducking_enabled = enabled;
        self.recompute(now);
    }

    /// Registers an inbound track for routing through the talkgroup's
    /// gain stage. A track with a known sid replaces its prior entry.
    pub fn attach_track(&mut self, talkgroup: &TalkgroupId, track: InboundTrack) {
        match self.slots.get_mut(talkgroup) {
            Some(slot) => {
                slot.tracks.retain(|t| t.sid != track.sid);
                slot.tracks.push(track);
            },
            None => warn!("track for unknown talkgroup {}", talkgroup),
        }
    }

    /// Drops every routed track for the talkgroup (transport loss).
    pub fn clear_tracks(&mut self, talkgroup: &TalkgroupId) {
        if let Some(slot) = self.slots.get_mut(talkgroup) {
            slot.tracks.clear();
        }
    }

    /// Cancels all hold timers, zeroes all gain schedules, and forgets the
    /// talkgroup set.
    pub fn destroy(&mut self, now: Instant) {
        self.holds.clear();
        self.active.clear();
        self.override_target = None;
        for slot in self.slots.values_mut() {
            slot.gain.set_immediate(0.0, now);
        }
        self.slots.clear();
        self.initialised = false;
        debug!("engine destroyed");
    }

    /// Whether any active speaker sits on a priority-static talkgroup.
    #[must_use]
    pub fn is_emergency_active(&self) -> bool {
        self.active.keys().any(|id| {
            self.slots
                .get(id)
                .map_or(false, |slot| slot.talkgroup.kind == TalkgroupKind::PriorityStatic)
        })
    }

    /// The earliest pending hold deadline, if any.
    #[must_use]
    pub fn next_hold_deadline(&self) -> Option<Instant> {
        self.holds.values().min().copied()
    }

    /// Releases every hold whose deadline has passed, recomputing once if
    /// any fired. Returns whether a recomputation ran.
    pub fn fire_due_holds(&mut self, now: Instant) -> bool {
        let due: Vec<TalkgroupId> = self
            .holds
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        if due.is_empty() {
            return false;
        }

        for id in &due {
            self.holds.remove(id);
            if self.slots.get(id).map(|s| s.phase) == Some(SpeechPhase::Holding) {
                self.set_phase(id, SpeechPhase::Idle);
            }
        }

        trace!("hold released on {} talkgroup(s)", due.len());
        self.recompute(now);
        true
    }

    /// Runs the standard gain recomputation against current state.
    pub fn recompute(&mut self, now: Instant) {
        self.reschedule_all(now, None);
    }

    fn set_phase(&mut self, talkgroup: &TalkgroupId, phase: SpeechPhase) {
        if let Some(slot) = self.slots.get_mut(talkgroup) {
            slot.phase = phase;
        }
    }

    /// The highest-priority active speaker's kind, if anyone is speaking.
    /// Ties resolve deterministically but any winner is acceptable: the
    /// computation depends only on the kind.
    fn dominant_kind(&self) -> Option<(TalkgroupId, TalkgroupKind)> {
        self.active
            .iter()
            .max_by_key(|(id, spk)| (spk.priority, std::cmp::Reverse((*id).clone())))
            .and_then(|(id, _)| {
                self.slots
                    .get(id)
                    .map(|slot| (id.clone(), slot.talkgroup.kind))
            })
    }

    /// Target gain and ramp for one talkgroup under current state.
    fn compute_target(&self, talkgroup: &TalkgroupId) -> (f32, Duration) {
        let slot = match self.slots.get(talkgroup) {
            Some(slot) => slot,
            None => return (0.0, Duration::ZERO),
        };

        let kind = slot.talkgroup.kind;
        let effective = slot.effective_volume(self.master_volume);

        if self.override_target.as_ref() == Some(talkgroup) {
            return (OVERRIDE_GAIN, Duration::ZERO);
        }

        if self.active.is_empty() {
            return (effective, RESTORE_RAMP);
        }

        if !self.config.ducking_enabled {
            return (effective, self.config.response_for(kind));
        }

        let (dominant_id, dominant_kind) = match self.dominant_kind() {
            Some(pair) => pair,
            None => return (effective, RESTORE_RAMP),
        };

        if *talkgroup == dominant_id {
            (effective, self.config.response_for(kind))
        } else if dominant_kind == TalkgroupKind::PriorityStatic {
            (0.0, EMERGENCY_SILENCE_RAMP)
        } else if kind == TalkgroupKind::PriorityStatic {
            // Never ducked; unmuted emergency channels keep an audibility
            // floor.
            let floored = if slot.settings.muted {
                0.0
            } else {
                effective.max(EMERGENCY_GAIN_FLOOR)
            };
            (floored, self.config.response_for(kind))
        } else if dominant_kind.ducks(kind) {
            // A talkgroup's own speaker does not shield it from a
            // higher-priority voice.
            (
                dominant_kind.duck_level() * effective,
                self.config.response_for(kind),
            )
        } else {
            (effective, self.config.response_for(kind))
        }
    }

    fn reschedule_all(&mut self, now: Instant, ramp_override: Option<Duration>) {
        let ids: Vec<TalkgroupId> = self.slots.keys().cloned().collect();
        for id in ids {
            let (target, ramp) = self.compute_target(&id);
            let ramp = ramp_override.unwrap_or(ramp);
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.gain.schedule(target, ramp, now);
            }
        }
    }

    /// Full observable view of the engine for the task's snapshot replies.
    #[must_use]
    pub fn snapshot(&self, now: Instant) -> EngineSnapshot {
        let mut gains = BTreeMap::new();
        for (id, slot) in &self.slots {
            gains.insert(id.clone(), GainView {
                current: slot.gain.gain_at(now),
                target: slot.gain.target(),
                phase: slot.phase,
                track_count: slot.tracks.len(),
            });
        }

        let mut active = BTreeMap::new();
        for (id, spk) in &self.active {
            active.insert(id.clone(), spk.participant.clone());
        }

        EngineSnapshot {
            gains,
            active_speakers: active,
            emergency_active: self.is_emergency_active(),
            override_target: self.override_target.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    fn tg(id: &str, kind: TalkgroupKind, priority: u32, hold: Duration) -> Talkgroup {
        Talkgroup {
            id: TalkgroupId::from(id),
            name: id.to_uppercase(),
            kind,
            priority,
            hold_time: hold,
            can_publish: true,
            can_subscribe: true,
            room: format!("talkgroup_{}_{}", id, id),
        }
    }

    /// The standard three-group setup: emergency, department, dynamic.
    fn standard_engine(now: Instant) -> DuckingEngine {
        let mut engine = DuckingEngine::new(Config::default());
        engine
            .initialize(
                &[
                    tg("emg", TalkgroupKind::PriorityStatic, 100, ms(0)),
                    tg("gen", TalkgroupKind::SecondaryStatic, 80, ms(2000)),
                    tg("rd", TalkgroupKind::Dynamic, 50, ms(3000)),
                ],
                1.0,
                now,
            )
            .unwrap();
        engine
    }

    fn target(engine: &DuckingEngine, id: &str) -> f32 {
        engine.slots[&TalkgroupId::from(id)].gain.target()
    }

    #[test]
    fn initialize_is_idempotent_and_guards_set_changes() {
        let now = Instant::now();
        let mut engine = standard_engine(now);

        let same = [
            tg("emg", TalkgroupKind::PriorityStatic, 100, ms(0)),
            tg("gen", TalkgroupKind::SecondaryStatic, 80, ms(2000)),
            tg("rd", TalkgroupKind::Dynamic, 50, ms(3000)),
        ];
        assert_eq!(engine.initialize(&same, 1.0, now), Ok(()));

        let different = [tg("emg", TalkgroupKind::PriorityStatic, 100, ms(0))];
        assert_eq!(
            engine.initialize(&different, 1.0, now),
            Err(EngineError::KindMismatch)
        );
    }

    #[test]
    fn department_speech_ducks_dynamic_and_floors_emergency() {
        // S1: speaker-start on gen.
        let now = Instant::now();
        let mut engine = standard_engine(now);

        engine.speaker_event(&TalkgroupId::from("gen"), ParticipantId::from("p1"), true, now);

        assert!(close(target(&engine, "gen"), 1.0));
        assert!(close(target(&engine, "rd"), 0.1));
        assert!(target(&engine, "emg") >= 0.8);

        // Ramps land after each kind's response time.
        let slot = &engine.slots[&TalkgroupId::from("rd")];
        assert!(close(slot.gain.gain_at(now + ms(150)), 0.1));
    }

    #[test]
    fn hold_defers_restore_until_deadline() {
        // S1 continued: stop on gen at t=5s, hold 2s, restore at t=7s.
        let t0 = Instant::now();
        let mut engine = standard_engine(t0);
        let gen = TalkgroupId::from("gen");

        engine.speaker_event(&gen, ParticipantId::from("p1"), true, t0);
        let t_stop = t0 + Duration::from_secs(5);
        engine.speaker_event(&gen, ParticipantId::from("p1"), false, t_stop);

        // Ducking persists through the hold window.
        assert!(close(target(&engine, "rd"), 0.1));
        assert_eq!(engine.next_hold_deadline(), Some(t_stop + ms(2000)));
        assert!(!engine.fire_due_holds(t_stop + ms(1999)));

        let t_fire = t_stop + ms(2000);
        assert!(engine.fire_due_holds(t_fire));
        assert!(close(target(&engine, "rd"), 1.0));
        assert!(close(target(&engine, "gen"), 1.0));
        assert!(close(target(&engine, "emg"), 1.0));

        // Restore ramps over 200 ms.
        let slot = &engine.slots[&TalkgroupId::from("rd")];
        assert!(close(slot.gain.gain_at(t_fire + ms(100)), 0.55));
        assert!(close(slot.gain.gain_at(t_fire + ms(200)), 1.0));
    }

    #[test]
    fn own_speaker_does_not_shield_from_higher_priority() {
        // S2: rd starts, then gen starts 500 ms later.
        let t0 = Instant::now();
        let mut engine = standard_engine(t0);

        engine.speaker_event(&TalkgroupId::from("rd"), ParticipantId::from("a"), true, t0);
        assert!(close(target(&engine, "rd"), 1.0));

        engine.speaker_event(
            &TalkgroupId::from("gen"),
            ParticipantId::from("b"),
            true,
            t0 + ms(500),
        );

        assert!(close(target(&engine, "gen"), 1.0));
        // rd still has its own active speaker, yet the higher-priority
        // voice ducks it all the same.
        assert!(close(target(&engine, "rd"), 0.1));
        assert!(target(&engine, "emg") >= 0.8);
        assert!(engine.active.contains_key(&TalkgroupId::from("rd")));
    }

    #[test]
    fn emergency_override_silences_everything_else() {
        // S3.
        let now = Instant::now();
        let mut engine = standard_engine(now);
        let emg = TalkgroupId::from("emg");

        engine.emergency_override(&emg, now).unwrap();

        assert!(close(target(&engine, "emg"), 1.0));
        assert!(close(target(&engine, "gen"), 0.0));
        assert!(close(target(&engine, "rd"), 0.0));
        // Immediate: no ramp interval.
        assert!(close(engine.slots[&emg].gain.gain_at(now), 1.0));
        assert!(engine.is_emergency_active());

        // A later mute is stored but the override keeps the gain pinned.
        engine.set_user_settings(&emg, Some(true), None, now + ms(10));
        assert!(engine.user_settings(&emg).unwrap().muted);
        assert!(close(target(&engine, "emg"), 1.0));

        engine.clear_emergency(now + ms(20));
        assert!(!engine.is_emergency_active());
        // Mute now applies.
        assert!(close(target(&engine, "emg"), 0.0));
    }

    #[test]
    fn override_rejects_non_emergency_targets() {
        let now = Instant::now();
        let mut engine = standard_engine(now);

        assert_eq!(
            engine.emergency_override(&TalkgroupId::from("rd"), now),
            Err(EngineError::InvalidEmergencyTarget)
        );
        assert_eq!(
            engine.emergency_override(&TalkgroupId::from("ghost"), now),
            Err(EngineError::UnknownTalkgroup)
        );
        assert!(!engine.is_emergency_active());
    }

    #[test]
    fn unknown_talkgroup_events_change_nothing() {
        // S5.
        let now = Instant::now();
        let mut engine = standard_engine(now);
        let before = engine.snapshot(now);

        engine.speaker_event(
            &TalkgroupId::from("ghost"),
            ParticipantId::from("x"),
            true,
            now,
        );
        engine.set_user_settings(&TalkgroupId::from("ghost"), Some(true), None, now);

        let after = engine.snapshot(now);
        assert_eq!(before.gains, after.gains);
        assert_eq!(before.active_speakers, after.active_speakers);
    }

    #[test]
    fn live_emergency_speaker_silences_victims() {
        let now = Instant::now();
        let mut engine = standard_engine(now);

        engine.speaker_event(&TalkgroupId::from("emg"), ParticipantId::from("e"), true, now);

        assert!(engine.is_emergency_active());
        assert!(close(target(&engine, "gen"), 0.0));
        assert!(close(target(&engine, "rd"), 0.0));
        assert!(close(target(&engine, "emg"), 1.0));

        // Hold 0: stop schedules an immediate release.
        let t1 = now + ms(300);
        engine.speaker_event(&TalkgroupId::from("emg"), ParticipantId::from("e"), false, t1);
        assert_eq!(engine.next_hold_deadline(), Some(t1));
        assert!(engine.fire_due_holds(t1));
        assert!(!engine.is_emergency_active());
        assert!(close(target(&engine, "gen"), 1.0));
    }

    #[test]
    fn volume_changes_clamp_and_apply_through_ducking() {
        let now = Instant::now();
        let mut engine = standard_engine(now);
        let rd = TalkgroupId::from("rd");

        engine.set_user_settings(&rd, None, Some(f32::NAN), now);
        assert_eq!(engine.user_settings(&rd).unwrap().volume, 0.0);

        engine.set_user_settings(&rd, None, Some(2.5), now);
        assert_eq!(engine.user_settings(&rd).unwrap().volume, 1.0);

        engine.set_user_settings(&rd, None, Some(0.5), now);
        assert_eq!(engine.user_settings(&rd).unwrap().volume, 0.5);

        // Duck factors scale the stored volume.
        engine.speaker_event(&TalkgroupId::from("gen"), ParticipantId::from("p"), true, now);
        assert!(close(target(&engine, "rd"), 0.05));
    }

    #[test]
    fn muted_talkgroup_stays_silent_without_override() {
        let now = Instant::now();
        let mut engine = standard_engine(now);
        let emg = TalkgroupId::from("emg");

        engine.set_user_settings(&emg, Some(true), None, now);
        assert!(close(target(&engine, "emg"), 0.0));

        // Even the audibility floor yields to an explicit mute.
        engine.speaker_event(&TalkgroupId::from("gen"), ParticipantId::from("p"), true, now);
        assert!(close(target(&engine, "emg"), 0.0));

        engine.set_user_settings(&emg, Some(false), None, now + ms(10));
        assert!(target(&engine, "emg") >= 0.8);
    }

    #[test]
    fn restart_during_hold_cancels_timer() {
        let t0 = Instant::now();
        let mut engine = standard_engine(t0);
        let gen = TalkgroupId::from("gen");

        engine.speaker_event(&gen, ParticipantId::from("p"), true, t0);
        engine.speaker_event(&gen, ParticipantId::from("p"), false, t0 + ms(100));
        assert!(engine.next_hold_deadline().is_some());

        engine.speaker_event(&gen, ParticipantId::from("p"), true, t0 + ms(200));
        assert_eq!(engine.next_hold_deadline(), None);
        assert_eq!(
            engine.slots[&gen].phase,
            SpeechPhase::Speaking
        );
    }

    #[test]
    fn master_volume_scales_every_channel() {
        let now = Instant::now();
        let mut engine = standard_engine(now);

        engine.set_master_volume(0.5, now);
        assert!(close(target(&engine, "rd"), 0.5));
        assert!(close(target(&engine, "gen"), 0.5));
        assert!(close(target(&engine, "emg"), 0.5));
    }

    #[test]
    fn ducking_disable_restores_user_volumes() {
        let now = Instant::now();
        let mut engine = standard_engine(now);

        engine.speaker_event(&TalkgroupId::from("gen"), ParticipantId::from("p"), true, now);
        assert!(close(target(&engine, "rd"), 0.1));

        engine.set_ducking_enabled(false, now + ms(10));
        assert!(close(target(&engine, "rd"), 1.0));

        engine.set_ducking_enabled(true, now + ms(20));
        assert!(close(target(&engine, "rd"), 0.1));
    }

    #[test]
    fn speaker_cap_drops_lowest_priority() {
        let now = Instant::now();
        let mut engine = DuckingEngine::new(Config::default().max_simultaneous_speakers(2));
        engine
            .initialize(
                &[
                    tg("emg", TalkgroupKind::PriorityStatic, 100, ms(0)),
                    tg("gen", TalkgroupKind::SecondaryStatic, 80, ms(2000)),
                    tg("rd", TalkgroupKind::Dynamic, 50, ms(3000)),
                    tg("inc", TalkgroupKind::Adhoc, 40, ms(3000)),
                ],
                1.0,
                now,
            )
            .unwrap();

        engine.speaker_event(&TalkgroupId::from("inc"), ParticipantId::from("a"), true, now);
        engine.speaker_event(&TalkgroupId::from("rd"), ParticipantId::from("b"), true, now);

        // Cap reached; gen outranks the lowest current speaker (inc), which
        // is evicted into its hold phase.
        engine.speaker_event(&TalkgroupId::from("gen"), ParticipantId::from("c"), true, now);
        assert!(engine.active.contains_key(&TalkgroupId::from("gen")));
        assert!(!engine.active.contains_key(&TalkgroupId::from("inc")));
        assert_eq!(engine.active.len(), 2);

        // And a genuinely lower-priority start is refused outright.
        engine.speaker_event(&TalkgroupId::from("inc"), ParticipantId::from("a"), true, now);
        assert!(!engine.active.contains_key(&TalkgroupId::from("inc")));
    }

    #[test]
    fn destroy_zeroes_and_forgets() {
        let now = Instant::now();
        let mut engine = standard_engine(now);

        engine.speaker_event(&TalkgroupId::from("gen"), ParticipantId::from("p"), true, now);
        engine.speaker_event(&TalkgroupId::from("gen"), ParticipantId::from("p"), false, now);
        assert!(engine.next_hold_deadline().is_some());

        engine.destroy(now);
        assert_eq!(engine.next_hold_deadline(), None);
        assert!(engine.snapshot(now).gains.is_empty());

        // A fresh initialize succeeds after destroy.
        assert!(engine
            .initialize(&[tg("emg", TalkgroupKind::PriorityStatic, 100, ms(0))], 1.0, now)
            .is_ok());
    }
}
