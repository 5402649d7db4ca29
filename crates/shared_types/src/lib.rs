use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, Serialize, sqlx::Type, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
#[repr(i8)]
pub enum RequestState {
    // waiting for the next replay pass
    Pending = 0,
    // attempt ceiling reached, kept until an operator requeues or discards it
    Abandoned = 1,
}

/// One field of a captured multipart body, in transmission order.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SerializedField {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        filename: String,
        content_type: String,
        data: Vec<u8>,
    },
}

impl SerializedField {
    pub fn name(&self) -> &str {
        match self {
            SerializedField::Text { name, .. } => name,
            SerializedField::File { name, .. } => name,
        }
    }
}

/// Storable form of an outgoing request body.
///
/// The multipart boundary is fixed when the body is captured so every attempt,
/// including replays after a restart, transmits the same bytes.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SerializedBody {
    Empty,
    Text {
        content_type: String,
        content: String,
    },
    Multipart {
        boundary: String,
        fields: Vec<SerializedField>,
    },
}

impl SerializedBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, SerializedBody::Empty)
    }

    pub fn summary(&self) -> BodySummary {
        match self {
            SerializedBody::Empty => BodySummary {
                kind: "empty".to_string(),
                content_type: None,
                length: 0,
                fields: Vec::new(),
            },
            SerializedBody::Text {
                content_type,
                content,
            } => BodySummary {
                kind: "text".to_string(),
                content_type: Some(content_type.clone()),
                length: content.len(),
                fields: Vec::new(),
            },
            SerializedBody::Multipart { fields, .. } => BodySummary {
                kind: "multipart".to_string(),
                content_type: Some("multipart/form-data".to_string()),
                length: fields
                    .iter()
                    .map(|field| match field {
                        SerializedField::Text { value, .. } => value.len(),
                        SerializedField::File { data, .. } => data.len(),
                    })
                    .sum(),
                fields: fields.iter().map(|f| f.name().to_string()).collect(),
            },
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct BodySummary {
    pub kind: String,
    pub content_type: Option<String>,
    pub length: usize,
    pub fields: Vec<String>,
}

/// A mutating request that could not reach the server and is waiting to be
/// replayed.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct QueuedRequest {
    pub id: i64,
    pub base_url: String,
    pub path: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: SerializedBody,
    pub requires_csrf: bool,
    pub queued_at: i64,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub state: RequestState,
}

impl QueuedRequest {
    pub fn url(&self) -> String {
        join_url(&self.base_url, &self.path)
    }
}

/// Management view of a descriptor. Bodies are summarized rather than dumped.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct QueuedRequestView {
    pub id: i64,
    pub base_url: String,
    pub path: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: BodySummary,
    pub requires_csrf: bool,
    pub queued_at: i64,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub state: RequestState,
}

impl From<&QueuedRequest> for QueuedRequestView {
    fn from(req: &QueuedRequest) -> Self {
        Self {
            id: req.id,
            base_url: req.base_url.clone(),
            path: req.path.clone(),
            method: req.method.clone(),
            headers: req.headers.clone(),
            body: req.body.summary(),
            requires_csrf: req.requires_csrf,
            queued_at: req.queued_at,
            attempts: req.attempts,
            last_error: req.last_error.clone(),
            state: req.state,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum QueueEvent {
    Queued {
        id: i64,
        method: String,
        path: String,
    },
    FlushStarted {
        pending: usize,
    },
    FlushCompleted {
        delivered: usize,
        remaining: usize,
    },
    Abandoned {
        id: i64,
        attempts: u32,
    },
}

pub fn join_url(base_url: &str, path: &str) -> String {
    if path.is_empty() {
        return base_url.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
