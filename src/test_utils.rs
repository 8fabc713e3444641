//! In-crate fakes driving the coordinator without a real media stack.

use crate::{
    error::{SessionError, SessionResult},
    events::{SessionConnState, SessionEvent},
    id::ParticipantId,
    session::{InboundTrack, MediaSession, SessionFactory},
};
use async_trait::async_trait;
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use url::Url;

/// One microphone transition observed across the whole fake session set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MicChange {
    pub room: String,
    pub enabled: bool,
}

pub struct FakeSession {
    room: String,
    mic: Arc<Mutex<bool>>,
    closed: Arc<AtomicBool>,
    log: Arc<Mutex<Vec<MicChange>>>,
    deny_mic: bool,
}

#[async_trait]
impl MediaSession for FakeSession {
    async fn enable_microphone(&self, enable: bool) -> SessionResult<()> {
        if enable && self.deny_mic {
            return Err(SessionError::Denied);
        }

        *self.mic.lock() = enable;
        self.log.lock().push(MicChange {
            room: self.room.clone(),
            enabled: enable,
        });
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Per-room handle a test keeps to inject events and inspect the session.
#[derive(Clone)]
pub struct FakeSessionHandle {
    events: Sender<SessionEvent>,
    mic: Arc<Mutex<bool>>,
    closed: Arc<AtomicBool>,
}

impl FakeSessionHandle {
    pub fn speakers(&self, names: &[&str]) {
        let set: HashSet<ParticipantId> =
            names.iter().map(|name| ParticipantId::from(*name)).collect();
        drop(self.events.send(SessionEvent::ActiveSpeakersChanged(set)));
    }

    pub fn state(&self, state: SessionConnState) {
        drop(self.events.send(SessionEvent::StateChanged(state)));
    }

    pub fn track(&self, participant: &str, sid: &str) {
        drop(self.events.send(SessionEvent::TrackSubscribed(InboundTrack {
            participant: ParticipantId::from(participant),
            sid: sid.into(),
        })));
    }

    pub fn mic_enabled(&self) -> bool {
        *self.mic.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Scriptable session factory: per-room failure injection, attempt
/// counting, and a shared microphone transition log.
#[derive(Default)]
pub struct FakeFactory {
    fail_remaining: Mutex<HashMap<String, usize>>,
    attempts: Mutex<HashMap<String, usize>>,
    handles: Mutex<HashMap<String, FakeSessionHandle>>,
    deny_mic: Mutex<HashSet<String>>,
    log: Arc<Mutex<Vec<MicChange>>>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `failures` opens of `room` fail with a transport error.
    pub fn fail_next(&self, room: &str, failures: usize) {
        self.fail_remaining.lock().insert(room.to_string(), failures);
    }

    /// Every open of `room` fails.
    pub fn fail_always(&self, room: &str) {
        self.fail_remaining
            .lock()
            .insert(room.to_string(), usize::MAX);
    }

    /// Microphone enables on `room` are denied.
    pub fn deny_microphone(&self, room: &str) {
        self.deny_mic.lock().insert(room.to_string());
    }

    /// How many opens were attempted for `room`.
    pub fn attempts(&self, room: &str) -> usize {
        self.attempts.lock().get(room).copied().unwrap_or(0)
    }

    /// Handle for an opened room. Panics if the room was never opened.
    pub fn handle(&self, room: &str) -> FakeSessionHandle {
        self.handles
            .lock()
            .get(room)
            .cloned()
            .unwrap_or_else(|| panic!("room {} was never opened", room))
    }

    /// Every microphone transition across all sessions, in order.
    pub fn mic_log(&self) -> Vec<MicChange> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn open(
        &self,
        _server_url: &Url,
        _credential: &str,
        room: &str,
    ) -> SessionResult<(Box<dyn MediaSession>, Receiver<SessionEvent>)> {
        *self.attempts.lock().entry(room.to_string()).or_insert(0) += 1;

        {
            let mut fails = self.fail_remaining.lock();
            if let Some(remaining) = fails.get_mut(room) {
                if *remaining > 0 {
                    if *remaining != usize::MAX {
                        *remaining -= 1;
                    }
                    return Err(SessionError::Transport("scripted failure".into()));
                }
            }
        }

        let (tx, rx) = flume::unbounded();
        let mic = Arc::new(Mutex::new(false));
        let closed = Arc::new(AtomicBool::new(false));

        let session = FakeSession {
            room: room.to_string(),
            mic: Arc::clone(&mic),
            closed: Arc::clone(&closed),
            log: Arc::clone(&self.log),
            deny_mic: self.deny_mic.lock().contains(room),
        };

        self.handles.lock().insert(room.to_string(), FakeSessionHandle {
            events: tx,
            mic,
            closed,
        });

        Ok((Box::new(session), rx))
    }
}
