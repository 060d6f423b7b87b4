//! REST transport adapter.
//!
//! The backend grew several payload dialects over time (paged envelopes vs
//! bare arrays, `content` vs `text` vs `message_text`, ISO strings vs epoch
//! timestamps). All of that is normalized here; nothing outside this module
//! sees a raw wire shape.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};

use crate::state::{now_millis, ChatMessage, MessageDeliveryState, NotificationItem, ThreadSummary};
use crate::SharedTokenProvider;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// Transport unreachable. Recoverable by retry or offline fallback.
    #[error("network error: {0}")]
    Network(String),
    /// Non-2xx response; `message` comes from the body when the backend
    /// provided one.
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("malformed response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone)]
pub struct MessagePage {
    pub items: Vec<MessageDto>,
    pub next_cursor: Option<String>,
}

/// The two channels the core consumes: request/response history + send, and
/// thread/notification listings. Implemented by [`RestTransport`] in
/// production and by scripted mocks in tests.
#[async_trait]
pub trait ChatTransport: Send + Sync + 'static {
    async fn fetch_page(
        &self,
        thread_id: &str,
        cursor: Option<&str>,
    ) -> Result<MessagePage, ApiError>;

    async fn send_message(&self, thread_id: &str, content: &str) -> Result<MessageDto, ApiError>;

    async fn list_threads(&self) -> Result<Vec<ThreadDto>, ApiError>;

    async fn list_notifications(&self) -> Result<Vec<NotificationDto>, ApiError>;
}

// ---------------------------------------------------------------------------
// Wire DTOs

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDto {
    #[serde(alias = "_id", deserialize_with = "de_id")]
    pub id: String,
    #[serde(
        alias = "threadId",
        alias = "chatId",
        alias = "chat_id",
        default,
        deserialize_with = "de_opt_id"
    )]
    pub thread_id: Option<String>,
    #[serde(
        alias = "senderId",
        alias = "sender",
        default,
        deserialize_with = "de_opt_id"
    )]
    pub sender_id: Option<String>,
    #[serde(
        alias = "receiverId",
        alias = "recipient_id",
        default,
        deserialize_with = "de_opt_id"
    )]
    pub receiver_id: Option<String>,
    #[serde(alias = "text", alias = "message_text")]
    pub content: String,
    #[serde(
        alias = "createdAt",
        alias = "timestamp",
        default,
        deserialize_with = "de_opt_timestamp"
    )]
    pub created_at: Option<i64>,
}

impl MessageDto {
    /// Normalize into the store's message record. A payload without a thread
    /// id inherits the thread it was fetched for.
    pub fn into_message(self, fallback_thread_id: &str, my_user_id: &str) -> ChatMessage {
        let sender_id = self.sender_id.unwrap_or_default();
        let is_mine = !sender_id.is_empty() && sender_id == my_user_id;
        ChatMessage {
            id: self.id,
            thread_id: self
                .thread_id
                .unwrap_or_else(|| fallback_thread_id.to_string()),
            sender_id,
            receiver_id: self.receiver_id,
            content: self.content,
            created_at: self.created_at.unwrap_or_else(now_millis),
            is_mine,
            delivery: MessageDeliveryState::Sent,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadDto {
    #[serde(alias = "_id", deserialize_with = "de_id")]
    pub id: String,
    #[serde(
        alias = "peerId",
        alias = "seller_id",
        default,
        deserialize_with = "de_opt_id"
    )]
    pub peer_id: Option<String>,
    #[serde(alias = "peerName", default)]
    pub peer_name: Option<String>,
    #[serde(default)]
    pub counterpart: Option<CounterpartDto>,
    #[serde(alias = "lastMessage", alias = "last_message", default)]
    pub last_message: Option<String>,
    #[serde(
        alias = "updatedAt",
        alias = "updated_at",
        default,
        deserialize_with = "de_opt_timestamp"
    )]
    pub updated_at: Option<i64>,
    #[serde(alias = "unreadCount", default)]
    pub unread_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CounterpartDto {
    #[serde(alias = "_id", deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl ThreadDto {
    pub fn into_summary(self) -> ThreadSummary {
        let (counterpart_id, counterpart_name) = match self.counterpart {
            Some(c) => (Some(c.id), c.name),
            None => (None, None),
        };
        ThreadSummary {
            thread_id: self.id,
            peer_id: self.peer_id.or(counterpart_id).unwrap_or_default(),
            peer_name: self.peer_name.or(counterpart_name),
            last_message: self.last_message,
            updated_at: self.updated_at,
            unread_count: self.unread_count,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationDto {
    #[serde(alias = "_id", deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(alias = "message", alias = "text", default)]
    pub body: String,
    #[serde(
        alias = "createdAt",
        alias = "timestamp",
        default,
        deserialize_with = "de_opt_timestamp"
    )]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub read: bool,
}

impl NotificationDto {
    pub fn into_item(self) -> NotificationItem {
        NotificationItem {
            id: self.id,
            title: self.title,
            body: self.body,
            created_at: self.created_at.unwrap_or_else(now_millis),
            read: self.read,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PageEnvelope {
    Paged {
        items: Vec<MessageDto>,
        #[serde(alias = "nextCursor", default)]
        next_cursor: Option<String>,
    },
    Bare(Vec<MessageDto>),
}

impl From<PageEnvelope> for MessagePage {
    fn from(env: PageEnvelope) -> Self {
        match env {
            PageEnvelope::Paged { items, next_cursor } => MessagePage { items, next_cursor },
            // A bare array means the endpoint doesn't page: no further pages.
            PageEnvelope::Bare(items) => MessagePage {
                items,
                next_cursor: None,
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ThreadsEnvelope {
    Wrapped { threads: Vec<ThreadDto> },
    Bare(Vec<ThreadDto>),
}

impl ThreadsEnvelope {
    fn into_vec(self) -> Vec<ThreadDto> {
        match self {
            ThreadsEnvelope::Wrapped { threads } => threads,
            ThreadsEnvelope::Bare(threads) => threads,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NotificationsEnvelope {
    Wrapped { items: Vec<NotificationDto> },
    Bare(Vec<NotificationDto>),
}

impl NotificationsEnvelope {
    fn into_vec(self) -> Vec<NotificationDto> {
        match self {
            NotificationsEnvelope::Wrapped { items } => items,
            NotificationsEnvelope::Bare(items) => items,
        }
    }
}

// ---------------------------------------------------------------------------
// Field-level normalization

#[derive(Deserialize)]
#[serde(untagged)]
enum IdField {
    Text(String),
    Number(i64),
}

impl IdField {
    fn into_string(self) -> String {
        match self {
            IdField::Text(s) => s,
            IdField::Number(n) => n.to_string(),
        }
    }
}

fn de_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(IdField::deserialize(d)?.into_string())
}

fn de_opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<IdField>::deserialize(d)?.map(IdField::into_string))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimestampField {
    Epoch(i64),
    Text(String),
}

/// Anything below this is epoch seconds, not milliseconds (the cutoff is
/// November 2286 in seconds and March 1973 in milliseconds).
const EPOCH_MILLIS_CUTOFF: i64 = 100_000_000_000;

fn normalize_timestamp(raw: TimestampField) -> Option<i64> {
    match raw {
        TimestampField::Epoch(n) if n < EPOCH_MILLIS_CUTOFF => Some(n * 1000),
        TimestampField::Epoch(n) => Some(n),
        TimestampField::Text(s) => chrono::DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
    }
}

fn de_opt_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(Option::<TimestampField>::deserialize(d)?.and_then(normalize_timestamp))
}

/// Pull a human-readable error out of a non-2xx body (`{message}` or
/// `{error}`), falling back to the bare status.
fn extract_error_message(status: u16, body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "error"] {
            if let Some(msg) = v.get(key).and_then(|m| m.as_str()) {
                if !msg.is_empty() {
                    return msg.to_string();
                }
            }
        }
    }
    format!("HTTP {status}")
}

// ---------------------------------------------------------------------------
// Production implementation

pub struct RestTransport {
    http: reqwest::Client,
    base_url: String,
    tokens: SharedTokenProvider,
}

impl RestTransport {
    pub fn new(base_url: String, tokens: SharedTokenProvider) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// Current bearer token, read fresh from the host app on every request.
    fn bearer(&self) -> Option<String> {
        let slot = match self.tokens.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        };
        slot.and_then(|p| p.bearer_token())
    }

    async fn request_text(
        &self,
        method: reqwest::Method,
        url: reqwest::Url,
        body: Option<serde_json::Value>,
    ) -> Result<String, ApiError> {
        let mut req = self.http.request(method, url);
        if let Some(token) = self.bearer() {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let res = req
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
                message: extract_error_message(status.as_u16(), &text),
            });
        }
        Ok(text)
    }

    fn decode<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, ApiError> {
        serde_json::from_str(text).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn api_url(base: &str, path: &str) -> Result<reqwest::Url, ApiError> {
    reqwest::Url::parse(&format!("{base}{path}")).map_err(|e| ApiError::Network(e.to_string()))
}

/// History-page URL. The cursor is opaque backend data and goes through the
/// query-pair encoder, never raw string interpolation.
fn page_url(base: &str, thread_id: &str, cursor: Option<&str>) -> Result<reqwest::Url, ApiError> {
    let mut url = api_url(base, &format!("/messages/thread/{thread_id}"))?;
    if let Some(cursor) = cursor {
        url.query_pairs_mut().append_pair("cursor", cursor);
    }
    Ok(url)
}

#[async_trait]
impl ChatTransport for RestTransport {
    async fn fetch_page(
        &self,
        thread_id: &str,
        cursor: Option<&str>,
    ) -> Result<MessagePage, ApiError> {
        let url = page_url(&self.base_url, thread_id, cursor)?;
        let text = self.request_text(reqwest::Method::GET, url, None).await?;
        Ok(Self::decode::<PageEnvelope>(&text)?.into())
    }

    async fn send_message(&self, thread_id: &str, content: &str) -> Result<MessageDto, ApiError> {
        let body = serde_json::json!({ "threadId": thread_id, "content": content });
        let url = api_url(&self.base_url, "/messages")?;
        let text = self
            .request_text(reqwest::Method::POST, url, Some(body))
            .await?;
        Self::decode(&text)
    }

    async fn list_threads(&self) -> Result<Vec<ThreadDto>, ApiError> {
        let url = api_url(&self.base_url, "/messages/threads")?;
        let text = self.request_text(reqwest::Method::GET, url, None).await?;
        Ok(Self::decode::<ThreadsEnvelope>(&text)?.into_vec())
    }

    async fn list_notifications(&self) -> Result<Vec<NotificationDto>, ApiError> {
        let url = api_url(&self.base_url, "/notifications")?;
        let text = self.request_text(reqwest::Method::GET, url, None).await?;
        Ok(Self::decode::<NotificationsEnvelope>(&text)?.into_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paged_envelope_and_bare_array_both_normalize() {
        let paged: PageEnvelope = serde_json::from_str(
            r#"{"items":[{"id":"m1","content":"hi","createdAt":"2024-05-01T10:00:00Z"}],"nextCursor":"c2"}"#,
        )
        .unwrap();
        let page: MessagePage = paged.into();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next_cursor.as_deref(), Some("c2"));

        let bare: PageEnvelope =
            serde_json::from_str(r#"[{"id":"m1","content":"hi"},{"id":"m2","text":"yo"}]"#)
                .unwrap();
        let page: MessagePage = bare.into();
        assert_eq!(page.items.len(), 2);
        assert!(page.next_cursor.is_none(), "bare arrays never page");
    }

    #[test]
    fn message_field_aliases_are_accepted() {
        let dto: MessageDto = serde_json::from_str(
            r#"{"_id":7,"chat_id":"t1","sender_id":"u9","message_text":"yo","created_at":1714557600}"#,
        )
        .unwrap();
        assert_eq!(dto.id, "7");
        assert_eq!(dto.thread_id.as_deref(), Some("t1"));
        assert_eq!(dto.content, "yo");
        // Epoch seconds scale to milliseconds.
        assert_eq!(dto.created_at, Some(1_714_557_600_000));

        let dto: MessageDto = serde_json::from_str(
            r#"{"id":"m2","threadId":"t1","senderId":"u9","content":"hi","createdAt":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(dto.created_at, Some(1_714_557_600_000));
    }

    #[test]
    fn millisecond_timestamps_pass_through() {
        let dto: MessageDto =
            serde_json::from_str(r#"{"id":"m1","content":"x","timestamp":1714557600000}"#).unwrap();
        assert_eq!(dto.created_at, Some(1_714_557_600_000));
    }

    #[test]
    fn into_message_marks_ownership_and_falls_back_to_fetch_thread() {
        let dto: MessageDto =
            serde_json::from_str(r#"{"id":"m1","senderId":"me","content":"x"}"#).unwrap();
        let msg = dto.into_message("t9", "me");
        assert!(msg.is_mine);
        assert_eq!(msg.thread_id, "t9");
        assert_eq!(msg.delivery, MessageDeliveryState::Sent);
    }

    #[test]
    fn thread_dto_prefers_explicit_peer_then_counterpart() {
        let dto: ThreadDto = serde_json::from_str(
            r#"{"id":"t1","counterpart":{"id":"u2","name":"Ada"},"last_message":"ok","updated_at":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        let s = dto.into_summary();
        assert_eq!(s.peer_id, "u2");
        assert_eq!(s.peer_name.as_deref(), Some("Ada"));
        assert_eq!(s.updated_at, Some(1_714_557_600_000));
    }

    #[test]
    fn page_cursor_is_percent_encoded() {
        let url = page_url("https://api.test", "t1", Some("a&b c#d")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.test/messages/thread/t1?cursor=a%26b+c%23d"
        );

        let url = page_url("https://api.test", "t1", None).unwrap();
        assert_eq!(url.as_str(), "https://api.test/messages/thread/t1");
    }

    #[test]
    fn error_message_extracted_from_body_when_present() {
        assert_eq!(
            extract_error_message(401, r#"{"message":"token expired"}"#),
            "token expired"
        );
        assert_eq!(
            extract_error_message(500, r#"{"error":"boom"}"#),
            "boom"
        );
        assert_eq!(extract_error_message(502, "<html>bad gateway</html>"), "HTTP 502");
    }
}
