//! # Body Extraction
//!
//! Buffers the request body once so it can be parsed (and re-parsed) in
//! whatever encoding the client used.
//!
//! ```text
//! Request ──► RawBody { content_type, bytes }
//!                 │
//!                 ├── json / form ───► Payload::parse(bytes)
//!                 └── multipart ─────► replay bytes into axum Multipart
//!                                      ──► FormRecord ──► Payload::Form
//! ```

use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use axum::http;
use tessera_core::binder::{ContentType, FormRecord, Payload};
use tessera_core::BindingError;

use crate::error::{ApiError, ErrorCode};

/// A fully buffered request body plus its declared content type.
#[derive(Debug, Clone)]
pub struct RawBody {
    content_type: Option<String>,
    bytes: Bytes,
    // carries the body limit into multipart replays
    extensions: http::Extensions,
}

impl RawBody {
    pub fn new(content_type: Option<String>, bytes: Bytes) -> Self {
        RawBody {
            content_type,
            bytes,
            extensions: http::Extensions::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Parses the body according to its content type.
    ///
    /// May be called any number of times; the buffered bytes are never
    /// consumed.
    pub async fn payload(&self) -> Result<Payload, BindingError> {
        match ContentType::from_header(self.content_type.as_deref())? {
            ContentType::Multipart => self.multipart().await.map(Payload::from_form),
            other => Payload::parse(other, &self.bytes),
        }
    }

    /// Like [`payload`](Self::payload), but an empty body is `None`.
    pub async fn optional_payload(&self) -> Result<Option<Payload>, BindingError> {
        if self.is_empty() {
            return Ok(None);
        }
        self.payload().await.map(Some)
    }

    /// Splits a multipart body into one form record. Text parts contribute
    /// their value, file parts their file name.
    async fn multipart(&self) -> Result<tessera_core::GenericRecord, BindingError> {
        let content_type = self.content_type.clone().unwrap_or_default();
        let mut replay = http::Request::builder()
            .header(CONTENT_TYPE, content_type)
            .body(Body::from(self.bytes.clone()))
            .map_err(|e| BindingError::MalformedForm(e.to_string()))?;
        *replay.extensions_mut() = self.extensions.clone();

        let mut multipart = Multipart::from_request(replay, &())
            .await
            .map_err(|e| BindingError::MalformedForm(e.body_text()))?;

        let mut form = FormRecord::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| BindingError::MalformedForm(e.body_text()))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if let Some(file_name) = field.file_name().map(str::to_string) {
                form.push(name, file_name);
                continue;
            }
            let text = field
                .text()
                .await
                .map_err(|e| BindingError::MalformedForm(e.body_text()))?;
            form.push(name, text);
        }
        Ok(form.finish())
    }
}

impl<S> FromRequest<S> for RawBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let extensions = req.extensions().clone();

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::new(e.status(), ErrorCode::BadRequest, e.body_text()))?;

        Ok(RawBody {
            content_type,
            bytes,
            extensions,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::Value;

    #[tokio::test]
    async fn test_body_can_be_parsed_twice() {
        let body = RawBody::new(
            Some("application/json; charset=utf-8".to_string()),
            Bytes::from_static(br#"[{"name":"a"},{"name":"b"}]"#),
        );
        let first = body.payload().await.unwrap();
        let second = body.payload().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.into_records().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_multipart_collects_text_and_file_names() {
        let body = concat!(
            "--XB\r\n",
            "Content-Disposition: form-data; name=\"name\"\r\n\r\n",
            "sprocket\r\n",
            "--XB\r\n",
            "Content-Disposition: form-data; name=\"tags\"; filename=\"drawing.pdf\"\r\n",
            "Content-Type: application/pdf\r\n\r\n",
            "%PDF-1.4\r\n",
            "--XB\r\n",
            "Content-Disposition: form-data; name=\"tags\"\r\n\r\n",
            "metal\r\n",
            "--XB--\r\n",
        );
        let body = RawBody::new(
            Some("multipart/form-data; boundary=XB".to_string()),
            Bytes::from_static(body.as_bytes()),
        );

        let record = body.payload().await.unwrap().into_single_record().unwrap();
        assert_eq!(record.get("name"), Some(&Value::from("sprocket")));
        assert_eq!(
            record.get("tags"),
            Some(&Value::List(vec!["drawing.pdf".into(), "metal".into()]))
        );
    }

    #[tokio::test]
    async fn test_missing_content_type_is_rejected() {
        let body = RawBody::new(None, Bytes::from_static(b"{}"));
        assert!(matches!(
            body.payload().await,
            Err(BindingError::UnsupportedContentType(_))
        ));

        let empty = RawBody::new(None, Bytes::new());
        assert_eq!(empty.optional_payload().await, Ok(None));
    }
}
