//! The multi-room session controller and its UI-facing mutator surface.

use crate::{
    config::Config,
    constants::clamp_volume,
    engine::EngineHandle,
    error::{ConnectError, ConnectResult, ControlError, ControlResult},
    events::{Alert, SessionConnState, SessionEvent, SpeakerEvent},
    id::{ParticipantId, TalkgroupId},
    info::ConnectionDetails,
    model::{Talkgroup, TalkgroupKind},
    prefs::Preferences,
    session::{MediaSession, SessionFactory},
    state::{
        derive_priority_order,
        ConnectionStatus,
        CoordinatorState,
        StateStore,
        TalkgroupState,
    },
};
use dashmap::DashMap;
use flume::Receiver;
use futures::future::join_all;
use parking_lot::Mutex as PLMutex;
use std::{collections::HashSet, fmt, path::PathBuf, sync::Arc};
use tokio::{
    spawn,
    task::JoinHandle,
    time::{sleep, timeout, Instant},
};
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

struct SessionEntry {
    session: Arc<dyn MediaSession>,
    talkgroup: Talkgroup,
    forwarder: JoinHandle<()>,
}

/// The coordinator owns every talkgroup's media session, routes inbound
/// speaker activity into the ducking engine, and keeps the microphone
/// published to at most one talkgroup.
///
/// Ownership is strictly one-way: the coordinator owns the engine task and
/// the sessions; everything flowing back (session events, hold expiries)
/// rides message channels. UI code observes through [`watch`] and mutates
/// through the methods here — never directly.
///
/// [`watch`]: Coordinator::watch
pub struct Coordinator {
    config: Config,
    engine: EngineHandle,
    store: Arc<StateStore>,
    sessions: Arc<DashMap<TalkgroupId, SessionEntry>>,
    factory: Arc<dyn SessionFactory>,
    prefs: Arc<PLMutex<Preferences>>,
    prefs_path: Option<PathBuf>,
    override_target: Arc<PLMutex<Option<TalkgroupId>>>,
    alerts_tx: flume::Sender<Alert>,
    alerts_rx: Receiver<Alert>,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("sessions", &self.sessions.len())
            .field("factory", &"<dyn SessionFactory>")
            .finish()
    }
}

impl Coordinator {
    /// Creates a coordinator over the given session factory.
    ///
    /// `prefs_path`, when supplied, locates the persisted preference
    /// document; missing or damaged documents fall back to defaults.
    #[must_use]
    pub fn new(
        config: Config,
        factory: Arc<dyn SessionFactory>,
        prefs_path: Option<PathBuf>,
    ) -> Self {
        let prefs = prefs_path
            .as_deref()
            .map_or_else(Preferences::default, Preferences::load);

        let engine = EngineHandle::new(config.clone());
        // Restore the persisted global faders before any session exists.
        drop(engine.set_master_volume(prefs.master_volume));
        drop(engine.set_ducking_enabled(prefs.is_ducking_enabled));

        let store = Arc::new(StateStore::new(CoordinatorState::initial(
            prefs.master_volume,
            prefs.is_ducking_enabled,
        )));

        let (alerts_tx, alerts_rx) = flume::unbounded();

        Self {
            config,
            engine,
            store,
            sessions: Arc::new(DashMap::new()),
            factory,
            prefs: Arc::new(PLMutex::new(prefs)),
            prefs_path,
            override_target: Arc::new(PLMutex::new(None)),
            alerts_tx,
            alerts_rx,
        }
    }

    /// A fresh observer of the coordinator state.
    #[must_use]
    pub fn watch(&self) -> tokio::sync::watch::Receiver<CoordinatorState> {
        self.store.watch()
    }

    /// Copy of the current coordinator state.
    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        self.store.current()
    }

    /// Stream of emergency alerts, published when the matching preference
    /// is enabled.
    #[must_use]
    pub fn alerts(&self) -> Receiver<Alert> {
        self.alerts_rx.clone()
    }

    /// Handle onto the ducking engine, for audio-runtime integration and
    /// diagnostics.
    #[must_use]
    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Opens one media session per admitted room, in parallel, retrying
    /// each with exponential backoff.
    ///
    /// Any room exhausting its retries (or missing its deadline) aborts
    /// the whole connect: already-opened sessions are closed and all state
    /// is reset before the error surfaces.
    #[instrument(skip(self, details))]
    pub async fn connect(&self, details: ConnectionDetails) -> ConnectResult<()> {
        let url = details.validate()?;

        match self.store.current().connection_status {
            ConnectionStatus::Connected => return Ok(()),
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => {
                return Err(ConnectError::Cancelled)
            },
            ConnectionStatus::Disconnected => {},
        }

        self.store.mutate(|state| {
            state.connection_status = ConnectionStatus::Connecting;
        });

        let talkgroups: Vec<Talkgroup> =
            details.rooms.iter().map(Talkgroup::from_room).collect();
        let (default_volume, auto_join) = {
            let prefs = self.prefs.lock();
            (prefs.default_volume, prefs.auto_join_static)
        };

        if let Err(e) = self
            .engine
            .initialize(talkgroups.clone(), default_volume)
            .await
        {
            warn!("engine rejected talkgroup set: {}", e);
            self.store.reset();
            return Err(ConnectError::Cancelled);
        }

        let opens = talkgroups.iter().map(|tg| {
            self.open_with_retry(&url, &details.participant_token, tg.clone())
        });
        let results = join_all(opens).await;

        let mut opened = Vec::new();
        let mut failure = None;
        for result in results {
            match result {
                Ok(pair) => opened.push(pair),
                Err(e) if failure.is_none() => failure = Some(e),
                Err(e) => debug!("additional session failure: {}", e),
            }
        }

        if let Some(e) = failure {
            // Tear down the half-built session set before surfacing.
            for (_, session, _) in opened {
                session.close().await;
            }
            drop(self.engine.destroy());
            self.store.reset();
            return Err(e);
        }

        for (tg, session, events) in opened {
            self.install_session(tg, session, events);
        }

        self.store.mutate(|state| {
            let mut map = std::collections::BTreeMap::new();
            for tg in &talkgroups {
                map.insert(tg.id.clone(), TalkgroupState::for_talkgroup(tg, default_volume));
            }
            state.priority_order = derive_priority_order(&map);
            state.talkgroups = map;
            state.is_connected = true;
            state.connection_status = ConnectionStatus::Connected;
        });

        if auto_join {
            for tg in &talkgroups {
                let is_static = matches!(
                    tg.kind,
                    TalkgroupKind::PriorityStatic | TalkgroupKind::SecondaryStatic
                );
                if is_static {
                    if let Err(e) = self.join(&tg.id).await {
                        warn!("auto-join of {} failed: {}", tg.id, e);
                    }
                }
            }
        }

        info!("connected {} talkgroup sessions", self.sessions.len());
        Ok(())
    }

    async fn open_with_retry(
        &self,
        url: &Url,
        credential: &str,
        tg: Talkgroup,
    ) -> ConnectResult<(Talkgroup, Arc<dyn MediaSession>, Receiver<SessionEvent>)> {
        let attempt_loop = async {
            let mut attempts = 0;
            let mut last_wait = None;

            loop {
                match self.factory.open(url, credential, &tg.room).await {
                    Ok((session, events)) => {
                        return Ok((tg.clone(), Arc::from(session), events));
                    },
                    Err(e) => match self.config.session_retry.retry_in(last_wait, attempts) {
                        Some(wait) => {
                            warn!(
                                "session open for {} failed ({}); retrying in {:.2}s",
                                tg.id,
                                e,
                                wait.as_secs_f32()
                            );
                            sleep(wait).await;
                            attempts += 1;
                            last_wait = Some(wait);
                        },
                        None => {
                            return Err(ConnectError::AllAttemptsFailed {
                                talkgroup: tg.id.clone(),
                                attempts: attempts + 1,
                                source: e,
                            })
                        },
                    },
                }
            }
        };

        match self.config.session_timeout {
            Some(deadline) => match timeout(deadline, attempt_loop).await {
                Ok(result) => result,
                Err(_) => Err(ConnectError::TimedOut {
                    talkgroup: tg.id.clone(),
                }),
            },
            None => attempt_loop.await,
        }
    }

    fn install_session(
        &self,
        talkgroup: Talkgroup,
        session: Arc<dyn MediaSession>,
        events: Receiver<SessionEvent>,
    ) {
        let forwarder = Forwarder {
            talkgroup: talkgroup.clone(),
            session: Arc::clone(&session),
            events,
            engine: self.engine.clone(),
            store: Arc::clone(&self.store),
            override_target: Arc::clone(&self.override_target),
            alerts: self.alerts_tx.clone(),
            prefs: Arc::clone(&self.prefs),
        };

        let handle = spawn(forwarder.run());

        self.sessions.insert(talkgroup.id.clone(), SessionEntry {
            session,
            talkgroup,
            forwarder: handle,
        });
    }

    /// Closes every session, destroys the engine's state, and resets the
    /// observable store. Idempotent.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        let ids: Vec<TalkgroupId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, entry)) = self.sessions.remove(&id) {
                entry.forwarder.abort();
                entry.session.close().await;
            }
        }

        *self.override_target.lock() = None;
        drop(self.engine.destroy());
        self.store.reset();
        info!("disconnected");
    }

    /// Turns membership on and attempts a non-fatal microphone enable on
    /// the talkgroup's session.
    #[instrument(skip(self))]
    pub async fn join(&self, talkgroup: &TalkgroupId) -> ControlResult<()> {
        let entry_session = self.session_for(talkgroup)?;

        self.store.mutate(|state| {
            if let Some(tg) = state.talkgroups.get_mut(talkgroup) {
                tg.joined = true;
            }
        });

        let can_publish = self
            .sessions
            .get(talkgroup)
            .map_or(false, |e| e.talkgroup.can_publish);
        if can_publish {
            if let Err(e) = entry_session.enable_microphone(true).await {
                // Microphone denial never blocks listening.
                warn!("microphone enable on {} denied: {}", talkgroup, e);
            }
        }

        Ok(())
    }

    /// Turns membership off, disables the microphone, and withdraws any
    /// active speaker entry for the talkgroup.
    #[instrument(skip(self))]
    pub async fn leave(&self, talkgroup: &TalkgroupId) -> ControlResult<()> {
        let session = self.session_for(talkgroup)?;

        if let Err(e) = session.enable_microphone(false).await {
            warn!("microphone disable on {} failed: {}", talkgroup, e);
        }

        let was_speaking = self
            .store
            .current()
            .talkgroups
            .get(talkgroup)
            .map_or(false, |tg| tg.is_active_speaker);
        if was_speaking && self.override_target.lock().as_ref() != Some(talkgroup) {
            drop(self.engine.speaker_event(SpeakerEvent {
                talkgroup: talkgroup.clone(),
                participant: ParticipantId::unknown(),
                speaking: false,
                timestamp: Instant::now(),
            }));
        }

        let override_target = self.override_target.lock().clone();
        let before = self.store.current();
        self.store.mutate(|state| {
            if let Some(tg) = state.talkgroups.get_mut(talkgroup) {
                tg.joined = false;
                if override_target.as_ref() != Some(talkgroup) {
                    tg.is_active_speaker = false;
                }
            }
            if state.transmit_target.as_ref() == Some(talkgroup) {
                state.transmit_target = None;
            }
            refresh_emergency(state, override_target.as_ref());
        });
        self.emit_alert_transition(&before);

        Ok(())
    }

    /// Flips a talkgroup's mute flag, returning the new value.
    #[instrument(skip(self))]
    pub fn toggle_mute(&self, talkgroup: &TalkgroupId) -> ControlResult<bool> {
        let current = self
            .store
            .current()
            .talkgroups
            .get(talkgroup)
            .map(|tg| tg.muted)
            .ok_or(ControlError::UnknownTalkgroup)?;
        let muted = !current;

        self.store.mutate(|state| {
            if let Some(tg) = state.talkgroups.get_mut(talkgroup) {
                tg.muted = muted;
            }
        });
        self.engine
            .set_settings(talkgroup.clone(), Some(muted), None)?;

        Ok(muted)
    }

    /// Sets a talkgroup's listening volume, clamped into `[0.0, 1.0]`.
    #[instrument(skip(self))]
    pub fn set_volume(&self, talkgroup: &TalkgroupId, volume: f32) -> ControlResult<()> {
        if !self.store.current().talkgroups.contains_key(talkgroup) {
            return Err(ControlError::UnknownTalkgroup);
        }

        let volume = clamp_volume(volume);
        self.store.mutate(|state| {
            if let Some(tg) = state.talkgroups.get_mut(talkgroup) {
                tg.volume = volume;
            }
        });
        self.engine
            .set_settings(talkgroup.clone(), None, Some(volume))
    }

    /// Sets the master fader and persists it.
    #[instrument(skip(self))]
    pub fn set_master_volume(&self, volume: f32) -> ControlResult<()> {
        let volume = clamp_volume(volume);
        self.store.mutate(|state| {
            state.master_volume = volume;
        });
        self.persist_prefs(|prefs| prefs.master_volume = volume);
        self.engine.set_master_volume(volume)
    }

    /// Enables or disables priority ducking and persists the choice.
    #[instrument(skip(self))]
    pub fn set_ducking_enabled(&self, enabled: bool) -> ControlResult<()> {
        self.store.mutate(|state| {
            state.is_ducking_enabled = enabled;
        });
        self.persist_prefs(|prefs| prefs.is_ducking_enabled = enabled);
        self.engine.set_ducking_enabled(enabled)
    }

    /// Routes the microphone to exactly one talkgroup, or to none.
    ///
    /// Every other session's microphone is switched off before the
    /// target's is switched on. A priority-static target additionally
    /// engages the emergency override.
    #[instrument(skip(self))]
    pub async fn set_transmit_target(
        &self,
        talkgroup: Option<&TalkgroupId>,
    ) -> ControlResult<()> {
        let target = match talkgroup {
            Some(id) => id,
            None => {
                self.silence_all_microphones(None).await;
                self.store.mutate(|state| {
                    state.transmit_target = None;
                });
                return Ok(());
            },
        };

        let entry = self
            .sessions
            .get(target)
            .ok_or(ControlError::UnknownTalkgroup)?;
        let (session, kind, can_publish) = (
            Arc::clone(&entry.session),
            entry.talkgroup.kind,
            entry.talkgroup.can_publish,
        );
        drop(entry);

        let joined = self
            .store
            .current()
            .talkgroups
            .get(target)
            .map_or(false, |tg| tg.joined);
        if !joined {
            return Err(ControlError::NotJoined);
        }
        if !can_publish {
            warn!("{} carries no publish grant", target);
            return Err(ControlError::DeviceError);
        }

        // Old target (and any join-enabled stragglers) off before the new
        // target on.
        self.silence_all_microphones(Some(target)).await;

        if let Err(e) = session.enable_microphone(true).await {
            warn!("microphone enable on {} denied: {}", target, e);
        }

        self.store.mutate(|state| {
            state.transmit_target = Some(target.clone());
        });

        if kind == TalkgroupKind::PriorityStatic {
            self.emergency_override(target).await?;
        }

        Ok(())
    }

    async fn silence_all_microphones(&self, except: Option<&TalkgroupId>) {
        let others: Vec<(TalkgroupId, Arc<dyn MediaSession>)> = self
            .sessions
            .iter()
            .filter(|e| Some(e.key()) != except)
            .map(|e| (e.key().clone(), Arc::clone(&e.value().session)))
            .collect();

        let disables = others.iter().map(|(id, session)| {
            let id = id.clone();
            let session = Arc::clone(session);
            async move {
                if let Err(e) = session.enable_microphone(false).await {
                    warn!("microphone disable on {} failed: {}", id, e);
                }
            }
        });
        join_all(disables).await;
    }

    /// Forces every non-emergency channel silent and pins the target to
    /// full volume until [`clear_emergency`].
    ///
    /// [`clear_emergency`]: Coordinator::clear_emergency
    #[instrument(skip(self))]
    pub async fn emergency_override(&self, talkgroup: &TalkgroupId) -> ControlResult<()> {
        if !self.store.current().talkgroups.contains_key(talkgroup) {
            return Err(ControlError::UnknownTalkgroup);
        }

        self.engine.emergency_override(talkgroup.clone()).await?;

        *self.override_target.lock() = Some(talkgroup.clone());
        let before = self.store.current();
        self.store.mutate(|state| {
            if let Some(tg) = state.talkgroups.get_mut(talkgroup) {
                tg.is_active_speaker = true;
                tg.last_activity = Some(Instant::now());
            }
            refresh_emergency(state, Some(talkgroup));
        });
        self.emit_alert_transition(&before);

        Ok(())
    }

    /// Releases an emergency override and reconciles observable speaker
    /// state with the engine.
    #[instrument(skip(self))]
    pub async fn clear_emergency(&self) -> ControlResult<()> {
        let cleared = self.override_target.lock().take();
        if cleared.is_none() {
            return Ok(());
        }

        self.engine.clear_emergency()?;
        let snapshot = self.engine.snapshot().await?;

        let before = self.store.current();
        self.store.mutate(|state| {
            for (id, tg) in state.talkgroups.iter_mut() {
                tg.is_active_speaker = snapshot.active_speakers.contains_key(id);
            }
            refresh_emergency(state, None);
        });
        self.emit_alert_transition(&before);

        Ok(())
    }

    fn session_for(&self, talkgroup: &TalkgroupId) -> ControlResult<Arc<dyn MediaSession>> {
        if !self.store.current().is_connected {
            return Err(ControlError::NotConnected);
        }
        self.sessions
            .get(talkgroup)
            .map(|e| Arc::clone(&e.session))
            .ok_or(ControlError::UnknownTalkgroup)
    }

    fn persist_prefs<F>(&self, apply: F)
    where
        F: FnOnce(&mut Preferences),
    {
        let snapshot = {
            let mut prefs = self.prefs.lock();
            apply(&mut prefs);
            prefs.clone()
        };
        if let Some(path) = &self.prefs_path {
            snapshot.save(path);
        }
    }

    fn emit_alert_transition(&self, before: &CoordinatorState) {
        emit_alert_transition(
            before,
            &self.store.current(),
            &self.alerts_tx,
            self.prefs.lock().emergency_alert_enabled,
        );
    }
}

/// Recomputes the emergency section from speaker flags and any override.
fn refresh_emergency(state: &mut CoordinatorState, override_target: Option<&TalkgroupId>) {
    let live = state
        .talkgroups
        .iter()
        .find(|(_, tg)| tg.kind == TalkgroupKind::PriorityStatic && tg.is_active_speaker)
        .map(|(id, _)| id.clone());

    state.is_emergency_active = override_target.is_some() || live.is_some();
    state.emergency_talkgroup = override_target.cloned().or(live);
}

fn emit_alert_transition(
    before: &CoordinatorState,
    after: &CoordinatorState,
    alerts: &flume::Sender<Alert>,
    enabled: bool,
) {
    if !enabled || before.is_emergency_active == after.is_emergency_active {
        return;
    }

    let alert = if after.is_emergency_active {
        after.emergency_talkgroup.clone().map(Alert::EmergencyStarted)
    } else {
        before.emergency_talkgroup.clone().map(Alert::EmergencyEnded)
    };

    if let Some(alert) = alert {
        drop(alerts.send(alert));
    }
}

/// Bridges one session's event stream into the engine and the store.
struct Forwarder {
    talkgroup: Talkgroup,
    session: Arc<dyn MediaSession>,
    events: Receiver<SessionEvent>,
    engine: EngineHandle,
    store: Arc<StateStore>,
    override_target: Arc<PLMutex<Option<TalkgroupId>>>,
    alerts: flume::Sender<Alert>,
    prefs: Arc<PLMutex<Preferences>>,
}

impl Forwarder {
    async fn run(self) {
        while let Ok(event) = self.events.recv_async().await {
            match event {
                SessionEvent::ActiveSpeakersChanged(speakers) => self.on_speakers(&speakers),
                SessionEvent::StateChanged(state) => self.on_state(state).await,
                SessionEvent::TrackSubscribed(track) => {
                    drop(self.engine.attach_track(self.talkgroup.id.clone(), track));
                },
            }
        }
        trace!("event stream for {} ended", self.talkgroup.id);
    }

    /// Collapses the session's speaker set into the talkgroup's single
    /// voice: one start/stop stream per talkgroup.
    fn on_speakers(&self, speakers: &HashSet<ParticipantId>) {
        let id = &self.talkgroup.id;
        let speaking = !speakers.is_empty();
        let participant = speakers
            .iter()
            .min()
            .cloned()
            .unwrap_or_else(ParticipantId::unknown);

        if !speaking && self.override_target.lock().as_ref() == Some(id) {
            // The override's synthetic voice outlives session-side stops.
            return;
        }

        drop(self.engine.speaker_event(SpeakerEvent {
            talkgroup: id.clone(),
            participant,
            speaking,
            timestamp: Instant::now(),
        }));

        self.apply_speaker_flag(speaking);
    }

    async fn on_state(&self, conn_state: SessionConnState) {
        let id = &self.talkgroup.id;
        match conn_state {
            SessionConnState::Reconnecting | SessionConnState::Disconnected => {
                debug!("session for {} dropped ({:?})", id, conn_state);

                // Withdraw any speaker this session was believed to carry,
                // so ducking cannot wedge on a dead transport.
                let was_speaking = self
                    .store
                    .current()
                    .talkgroups
                    .get(id)
                    .map_or(false, |tg| tg.is_active_speaker);
                if was_speaking && self.override_target.lock().as_ref() != Some(id) {
                    drop(self.engine.speaker_event(SpeakerEvent {
                        talkgroup: id.clone(),
                        participant: ParticipantId::unknown(),
                        speaking: false,
                        timestamp: Instant::now(),
                    }));
                    self.apply_speaker_flag(false);
                }

                drop(self.engine.clear_tracks(id.clone()));

                self.store.mutate(|state| {
                    if state.connection_status == ConnectionStatus::Connected {
                        state.connection_status = ConnectionStatus::Reconnecting;
                    }
                });
            },
            SessionConnState::Connected => {
                self.store.mutate(|state| {
                    if state.connection_status == ConnectionStatus::Reconnecting {
                        state.connection_status = ConnectionStatus::Connected;
                    }
                });

                // Inbound tracks re-attach via TrackSubscribed; outbound
                // publication is restored here.
                if self.store.current().transmit_target.as_ref() == Some(id) {
                    if let Err(e) = self.session.enable_microphone(true).await {
                        warn!("microphone restore on {} denied: {}", id, e);
                    }
                }
            },
            SessionConnState::Connecting => {},
        }
    }

    fn apply_speaker_flag(&self, speaking: bool) {
        let id = &self.talkgroup.id;
        let override_target = self.override_target.lock().clone();
        let before = self.store.current();

        self.store.mutate(|state| {
            if let Some(tg) = state.talkgroups.get_mut(id) {
                tg.is_active_speaker = speaking;
                tg.last_activity = Some(Instant::now());
            }
            refresh_emergency(state, override_target.as_ref());
        });

        emit_alert_transition(
            &before,
            &self.store.current(),
            &self.alerts,
            self.prefs.lock().emergency_alert_enabled,
        );
    }
}
