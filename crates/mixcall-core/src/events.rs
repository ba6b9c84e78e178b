use std::fmt;
use std::sync::Arc;

use crate::sdk::{ConferenceEvent, RemoteStreamInfo, TrackKind};

/// Lifecycle phase of a [`crate::session::ConferenceSession`].
///
/// `Publishing` and `Subscribing` overlap in time; `Active` is reached
/// when the mixed-stream subscription succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Configured,
    Joining,
    Joined,
    Publishing,
    Subscribing,
    Active,
    Leaving,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "Idle",
            SessionState::Configured => "Configured",
            SessionState::Joining => "Joining",
            SessionState::Joined => "Joined",
            SessionState::Publishing => "Publishing",
            SessionState::Subscribing => "Subscribing",
            SessionState::Active => "Active",
            SessionState::Leaving => "Leaving",
        };
        f.write_str(name)
    }
}

/// Events delivered to registered listeners.
///
/// Notifications from the conferencing layer map one-to-one; the session
/// adds `StateChanged` on every lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Disconnected,
    RemoteStreamAdded(RemoteStreamInfo),
    ParticipantJoined {
        id: String,
    },
    MessageReceived {
        payload: String,
        sender_id: String,
        target: String,
    },
    RemoteStreamEnded {
        stream_id: String,
    },
    RemoteStreamUpdated {
        stream_id: String,
    },
    PublicationEnded {
        publication_id: String,
    },
    PublicationMuted {
        publication_id: String,
        kind: TrackKind,
    },
    PublicationUnmuted {
        publication_id: String,
        kind: TrackKind,
    },
    SubscriptionEnded {
        subscription_id: String,
    },
    SubscriptionMuted {
        subscription_id: String,
        kind: TrackKind,
    },
    SubscriptionUnmuted {
        subscription_id: String,
        kind: TrackKind,
    },
}

impl From<ConferenceEvent> for SessionEvent {
    fn from(event: ConferenceEvent) -> Self {
        match event {
            ConferenceEvent::Disconnected => SessionEvent::Disconnected,
            ConferenceEvent::StreamAdded(info) => SessionEvent::RemoteStreamAdded(info),
            ConferenceEvent::ParticipantJoined { id } => SessionEvent::ParticipantJoined { id },
            ConferenceEvent::MessageReceived {
                payload,
                sender_id,
                target,
            } => SessionEvent::MessageReceived {
                payload,
                sender_id,
                target,
            },
            ConferenceEvent::StreamEnded { stream_id } => {
                SessionEvent::RemoteStreamEnded { stream_id }
            }
            ConferenceEvent::StreamUpdated { stream_id } => {
                SessionEvent::RemoteStreamUpdated { stream_id }
            }
            ConferenceEvent::PublicationEnded { publication_id } => {
                SessionEvent::PublicationEnded { publication_id }
            }
            ConferenceEvent::PublicationMuted {
                publication_id,
                kind,
            } => SessionEvent::PublicationMuted {
                publication_id,
                kind,
            },
            ConferenceEvent::PublicationUnmuted {
                publication_id,
                kind,
            } => SessionEvent::PublicationUnmuted {
                publication_id,
                kind,
            },
            ConferenceEvent::SubscriptionEnded { subscription_id } => {
                SessionEvent::SubscriptionEnded { subscription_id }
            }
            ConferenceEvent::SubscriptionMuted {
                subscription_id,
                kind,
            } => SessionEvent::SubscriptionMuted {
                subscription_id,
                kind,
            },
            ConferenceEvent::SubscriptionUnmuted {
                subscription_id,
                kind,
            } => SessionEvent::SubscriptionUnmuted {
                subscription_id,
                kind,
            },
        }
    }
}

/// Trait for receiving session events.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Dispatches each event to every registered listener.
#[derive(Clone)]
pub struct EventEmitter {
    listeners: Arc<std::sync::RwLock<Vec<Arc<dyn SessionEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(std::sync::RwLock::new(Vec::new())),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    pub fn emit(&self, event: SessionEvent) {
        let listeners = self.listeners.read().unwrap();
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
