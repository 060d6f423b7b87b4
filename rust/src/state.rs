#[derive(uniffi::Record, Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub auth: AuthState,
    pub busy: BusyState,
    pub thread_list: Vec<ThreadSummary>,
    pub open_threads: Vec<ThreadViewState>,
    pub notifications: Vec<NotificationItem>,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            auth: AuthState::LoggedOut,
            busy: BusyState::idle(),
            thread_list: vec![],
            open_threads: vec![],
            notifications: vec![],
            toast: None,
        }
    }
}

#[derive(uniffi::Enum, Clone, Debug)]
pub enum AuthState {
    LoggedOut,
    LoggedIn { user_id: String },
}

/// "In flight" flags for long-ish operations that the UI should reflect.
///
/// Ephemeral UI state (scroll position, focus, keyboard) stays native, but
/// UX-relevant async operation state lives in Rust so the shell never needs
/// spinner heuristics of its own.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct BusyState {
    pub loading_thread: bool,
    pub sending: bool,
    pub refreshing_threads: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self {
            loading_thread: false,
            sending: false,
            refreshing_threads: false,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub peer_id: String,
    pub peer_name: Option<String>,
    pub last_message: Option<String>,
    /// Epoch milliseconds of the newest message seen for this thread, across
    /// both REST history and realtime pushes.
    pub updated_at: Option<i64>,
    pub unread_count: u32,
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct ThreadViewState {
    pub thread_id: String,
    pub peer_id: Option<String>,
    pub peer_name: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub can_load_older: bool,
    /// Set when a send failed; carries the typed content so the user never
    /// retypes it. Cleared by a successful retry.
    pub send_error: Option<SendFailure>,
    /// Non-fatal history load problem (banner text, not an error screen).
    pub load_error: Option<String>,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct SendFailure {
    pub message_id: String,
    pub content: String,
    pub reason: String,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub thread_id: String,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub content: String,
    /// Epoch milliseconds; the sole ordering key within a thread.
    pub created_at: i64,
    pub is_mine: bool,
    pub delivery: MessageDeliveryState,
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum MessageDeliveryState {
    Pending,
    Sent,
    Failed { reason: String },
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct NotificationItem {
    pub id: String,
    pub title: Option<String>,
    pub body: String,
    pub created_at: i64,
    pub read: bool,
}

pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
