// Per-thread message log + the single merge procedure every ingest path
// (history pages, send confirms, realtime pushes, refreshes) goes through.

use crate::state::{ChatMessage, MessageDeliveryState, SendFailure, ThreadViewState};
use crate::updates::PageKind;

/// Actor-internal state for one open thread. Projected into
/// [`ThreadViewState`] on every emit.
pub(super) struct MessageLog {
    pub(super) thread_id: String,
    pub(super) peer_id: Option<String>,
    pub(super) peer_name: Option<String>,
    /// Ascending `(created_at, id)`; the UI renders it top to bottom.
    pub(super) messages: Vec<ChatMessage>,
    /// Opaque backend cursor for the next older page. `None` after the
    /// backend reports the history start (or before the initial page lands).
    pub(super) next_cursor: Option<String>,
    pub(super) initial_loaded: bool,
    /// True while this thread has a history page on the wire. Guards
    /// `LoadOlderMessages` per thread; other threads page independently.
    pub(super) page_in_flight: bool,
    /// Bumped on open/close; async results stamped with an older generation
    /// are discarded, so a reopened thread can't be polluted by a fetch
    /// started before it was closed.
    pub(super) generation: u64,
    pub(super) send_error: Option<SendFailure>,
    pub(super) load_error: Option<String>,
}

impl MessageLog {
    pub(super) fn new(thread_id: String, generation: u64) -> Self {
        Self {
            thread_id,
            peer_id: None,
            peer_name: None,
            messages: Vec::new(),
            next_cursor: None,
            initial_loaded: false,
            page_in_flight: false,
            generation,
            send_error: None,
            load_error: None,
        }
    }

    /// Fold a history page in. Initial and Older pages also adopt the page's
    /// cursor; a Refresh re-reads the newest window only and must not clobber
    /// the pagination position.
    pub(super) fn merge_page(
        &mut self,
        kind: PageKind,
        items: Vec<ChatMessage>,
        next_cursor: Option<String>,
    ) {
        match kind {
            PageKind::Initial => {
                self.initial_loaded = true;
                self.next_cursor = next_cursor;
            }
            PageKind::Older => {
                self.next_cursor = next_cursor;
            }
            PageKind::Refresh => {}
        }
        self.load_error = None;
        for msg in items {
            merge_message(&mut self.messages, msg);
        }
    }

    pub(super) fn insert(&mut self, msg: ChatMessage) -> bool {
        merge_message(&mut self.messages, msg)
    }

    /// Swap the optimistic placeholder for the server's confirmed copy. If a
    /// realtime echo already delivered the confirmed id, the placeholder is
    /// simply dropped.
    pub(super) fn confirm_send(&mut self, temp_id: &str, confirmed: ChatMessage) {
        self.messages.retain(|m| m.id != temp_id);
        merge_message(&mut self.messages, confirmed);
        if self
            .send_error
            .as_ref()
            .is_some_and(|f| f.message_id == temp_id)
        {
            self.send_error = None;
        }
    }

    /// Mark the placeholder failed in place, keeping its content so retry
    /// never asks the user to retype.
    pub(super) fn fail_send(&mut self, temp_id: &str, reason: String) {
        let Some(msg) = self.messages.iter_mut().find(|m| m.id == temp_id) else {
            return;
        };
        msg.delivery = MessageDeliveryState::Failed {
            reason: reason.clone(),
        };
        self.send_error = Some(SendFailure {
            message_id: temp_id.to_string(),
            content: msg.content.clone(),
            reason,
        });
    }

    /// Flip a failed message back to Pending for a retry attempt. Returns the
    /// content to resend, or None if the id isn't a failed message here.
    pub(super) fn begin_retry(&mut self, message_id: &str) -> Option<String> {
        let msg = self.messages.iter_mut().find(|m| {
            m.id == message_id && matches!(m.delivery, MessageDeliveryState::Failed { .. })
        })?;
        msg.delivery = MessageDeliveryState::Pending;
        self.send_error = None;
        Some(msg.content.clone())
    }

    pub(super) fn newest_created_at(&self) -> Option<i64> {
        self.messages.last().map(|m| m.created_at)
    }

    pub(super) fn to_view(&self) -> ThreadViewState {
        ThreadViewState {
            thread_id: self.thread_id.clone(),
            peer_id: self.peer_id.clone(),
            peer_name: self.peer_name.clone(),
            messages: self.messages.clone(),
            can_load_older: self.next_cursor.is_some(),
            send_error: self.send_error.clone(),
            load_error: self.load_error.clone(),
        }
    }
}

/// Insert one message into a `(created_at, id)`-sorted vec, deduplicating by
/// id. Idempotent and insertion-order independent: replaying any mix of
/// pages, echoes, and confirms converges on the same vec. Returns false on a
/// duplicate.
pub(super) fn merge_message(messages: &mut Vec<ChatMessage>, msg: ChatMessage) -> bool {
    if messages.iter().any(|m| m.id == msg.id) {
        return false;
    }
    let at = messages
        .binary_search_by(|m| (m.created_at, m.id.as_str()).cmp(&(msg.created_at, msg.id.as_str())))
        .unwrap_err();
    messages.insert(at, msg);
    true
}
