use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use shared_types::{SerializedBody, SerializedField};

const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("failed to encode JSON body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid multipart field name or filename {0:?}")]
    InvalidName(String),
    #[error("invalid content type {0:?}")]
    InvalidContentType(String),
    #[error("multipart boundary {0:?} occurs inside the body")]
    BoundaryCollision(String),
}

/// A request payload as handed to the relay by application code.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Text {
        content_type: String,
        content: String,
    },
    Multipart(Form),
}

impl RequestBody {
    pub fn json<T: Serialize>(value: &T) -> Result<Self, BodyError> {
        Ok(RequestBody::Json(serde_json::to_value(value)?))
    }

    /// The bytes this body puts on the wire.
    pub fn prepare(&self) -> Result<PreparedBody, BodyError> {
        Ok(deserialize(&serialize(self)?))
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        RequestBody::Json(value)
    }
}

/// Ordered multipart form. The boundary is chosen at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Form {
    boundary: String,
    fields: Vec<SerializedField>,
}

impl Default for Form {
    fn default() -> Self {
        Self::new()
    }
}

impl Form {
    pub fn new() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        Self::with_boundary(format!("galley-{}", suffix))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            fields: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(SerializedField::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        self.fields.push(SerializedField::File {
            name: name.into(),
            filename: filename.into(),
            content_type: content_type.into(),
            data: data.into(),
        });
        self
    }
}

/// A body ready to hand to the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedBody {
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

pub fn serialize(body: &RequestBody) -> Result<SerializedBody, BodyError> {
    match body {
        RequestBody::Json(value) => Ok(SerializedBody::Text {
            content_type: JSON_CONTENT_TYPE.to_string(),
            content: serde_json::to_string(value)?,
        }),
        RequestBody::Text {
            content_type,
            content,
        } => {
            check_content_type(content_type)?;
            Ok(SerializedBody::Text {
                content_type: content_type.clone(),
                content: content.clone(),
            })
        }
        RequestBody::Multipart(form) => {
            check_boundary(&form.boundary)?;
            for field in &form.fields {
                check_field(field, &form.boundary)?;
            }
            Ok(SerializedBody::Multipart {
                boundary: form.boundary.clone(),
                fields: form.fields.clone(),
            })
        }
    }
}

pub fn deserialize(body: &SerializedBody) -> PreparedBody {
    match body {
        SerializedBody::Empty => PreparedBody {
            content_type: None,
            bytes: Bytes::new(),
        },
        SerializedBody::Text {
            content_type,
            content,
        } => PreparedBody {
            content_type: Some(content_type.clone()),
            bytes: Bytes::copy_from_slice(content.as_bytes()),
        },
        SerializedBody::Multipart { boundary, fields } => PreparedBody {
            content_type: Some(format!("multipart/form-data; boundary={}", boundary)),
            bytes: encode_multipart(boundary, fields).into(),
        },
    }
}

fn encode_multipart(boundary: &str, fields: &[SerializedField]) -> Vec<u8> {
    let mut out = Vec::new();
    for field in fields {
        out.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        match field {
            SerializedField::Text { name, value } => {
                out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                out.extend_from_slice(value.as_bytes());
            }
            SerializedField::File {
                name,
                filename,
                content_type,
                data,
            } => {
                out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        name, filename
                    )
                    .as_bytes(),
                );
                out.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
                out.extend_from_slice(data);
            }
        }
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    out
}

fn check_boundary(boundary: &str) -> Result<(), BodyError> {
    let valid = !boundary.is_empty()
        && boundary.len() <= 70
        && boundary
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "'()+_,-./:=?".contains(c));
    if valid {
        Ok(())
    } else {
        Err(BodyError::InvalidContentType(format!(
            "multipart/form-data; boundary={}",
            boundary
        )))
    }
}

fn check_field(field: &SerializedField, boundary: &str) -> Result<(), BodyError> {
    let delimiter = format!("--{}", boundary);
    match field {
        SerializedField::Text { name, value } => {
            check_name(name)?;
            if value.contains(&delimiter) {
                return Err(BodyError::BoundaryCollision(boundary.to_string()));
            }
        }
        SerializedField::File {
            name,
            filename,
            content_type,
            data,
        } => {
            check_name(name)?;
            check_name(filename)?;
            check_content_type(content_type)?;
            if contains(data, delimiter.as_bytes()) {
                return Err(BodyError::BoundaryCollision(boundary.to_string()));
            }
        }
    }
    Ok(())
}

fn check_name(name: &str) -> Result<(), BodyError> {
    if name.is_empty() || name.contains(['"', '\r', '\n']) {
        return Err(BodyError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn check_content_type(content_type: &str) -> Result<(), BodyError> {
    let well_formed = content_type
        .split(';')
        .next()
        .and_then(|essence| essence.trim().split_once('/'))
        .map_or(false, |(kind, subtype)| !kind.is_empty() && !subtype.is_empty());
    if !well_formed || content_type.contains(['\r', '\n']) {
        return Err(BodyError::InvalidContentType(content_type.to_string()));
    }
    Ok(())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
