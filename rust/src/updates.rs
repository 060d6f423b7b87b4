use crate::api::{ApiError, MessageDto, MessagePage, NotificationDto, ThreadDto};
use crate::state::AppState;
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

/// Which fetch produced a history page. `Refresh` merges without touching the
/// stored pagination cursor (it re-reads the newest window to heal realtime
/// gaps); the other two advance it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Initial,
    Older,
    Refresh,
}

#[derive(Debug)]
pub enum InternalEvent {
    // Async REST results
    PageFetched {
        thread_id: String,
        generation: u64,
        kind: PageKind,
        result: Result<MessagePage, ApiError>,
    },
    SendFinished {
        /// Session epoch at spawn time; a result from an ended session is
        /// dropped (pages carry a per-thread generation instead).
        epoch: u64,
        thread_id: String,
        temp_id: String,
        result: Result<MessageDto, ApiError>,
    },
    ThreadsFetched {
        epoch: u64,
        result: Result<Vec<ThreadDto>, ApiError>,
    },
    NotificationsFetched {
        epoch: u64,
        result: Result<Vec<NotificationDto>, ApiError>,
    },

    // Realtime receive path
    Realtime(RealtimeEvent),
}

/// Events surfaced by the realtime connection task.
#[derive(Debug)]
pub enum RealtimeEvent {
    /// Connection (re)established. Rooms were already re-joined by the
    /// transport task; the store reacts by refreshing open threads.
    Connected,
    /// Inbound `message:new`. Routing uses the embedded thread id.
    Message(MessageDto),
}
