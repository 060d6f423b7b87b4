#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Session
    StartSession {
        user_id: String,
    },
    EndSession,

    // Chat
    OpenThread {
        thread_id: String,
    },
    CloseThread {
        thread_id: String,
    },
    LoadOlderMessages {
        thread_id: String,
    },
    SendMessage {
        thread_id: String,
        content: String,
    },
    RetryMessage {
        thread_id: String,
        message_id: String,
    },
    RefreshThreads,
    RefreshNotifications,

    // UI
    ClearToast,

    // Lifecycle
    Foregrounded,
}

impl AppAction {
    /// Log-safe action tag (never includes message bodies).
    pub fn tag(&self) -> &'static str {
        match self {
            // Session
            AppAction::StartSession { .. } => "StartSession",
            AppAction::EndSession => "EndSession",

            // Chat
            AppAction::OpenThread { .. } => "OpenThread",
            AppAction::CloseThread { .. } => "CloseThread",
            AppAction::LoadOlderMessages { .. } => "LoadOlderMessages",
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::RetryMessage { .. } => "RetryMessage",
            AppAction::RefreshThreads => "RefreshThreads",
            AppAction::RefreshNotifications => "RefreshNotifications",

            // UI
            AppAction::ClearToast => "ClearToast",

            // Lifecycle
            AppAction::Foregrounded => "Foregrounded",
        }
    }
}
