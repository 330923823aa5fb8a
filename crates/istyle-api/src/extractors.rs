//! # Custom Extractors
//!
//! JSON body extraction with validation, and path id parsing that maps
//! failures onto [`AppError`] instead of Axum's plain-text rejections.

use std::str::FromStr;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::Json;
use serde::de::DeserializeOwned;

use crate::error::AppError;

/// Request bodies that check their own field-level constraints before they
/// reach the marketplace.
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// Unwrap a JSON body, converting rejections into `400 BAD_REQUEST`.
pub fn extract_json<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(AppError::BadRequest(rejection.body_text())),
    }
}

/// [`extract_json`] followed by [`Validate::validate`]; validation failures
/// become `422 VALIDATION_ERROR`.
pub fn extract_validated_json<T: Validate>(
    body: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    let value = extract_json(body)?;
    value.validate().map_err(AppError::Validation)?;
    Ok(value)
}

/// Decode an optional JSON body. An empty body yields `T::default()`.
pub fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("invalid JSON body: {e}")))
}

/// Parse a path segment into a typed id. Malformed ids are reported as
/// `404` since no resource can live at that path.
pub fn parse_path_id<T: FromStr>(raw: &str, entity: &str) -> Result<T, AppError> {
    raw.parse::<T>()
        .map_err(|_| AppError::NotFound(format!("{entity} {raw} not found")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use istyle_core::TransactionId;

    struct Named {
        name: String,
    }

    impl Validate for Named {
        fn validate(&self) -> Result<(), String> {
            if self.name.trim().is_empty() {
                Err("name must not be empty".into())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn validated_json_runs_validation() {
        let ok = extract_validated_json(Ok(Json(Named {
            name: "jacket".into(),
        })));
        assert!(ok.is_ok());

        let err = extract_validated_json(Ok(Json(Named { name: " ".into() })));
        assert!(matches!(err, Err(AppError::Validation(_))));
    }

    #[derive(Debug, Default, serde::Deserialize, PartialEq)]
    struct Note {
        note: Option<String>,
    }

    #[test]
    fn optional_json_accepts_empty_body() {
        let note: Note = optional_json(&Bytes::new()).unwrap();
        assert_eq!(note, Note::default());
        let note: Note = optional_json(&Bytes::from_static(b"{\"note\":\"hi\"}")).unwrap();
        assert_eq!(note.note.as_deref(), Some("hi"));
        assert!(matches!(
            optional_json::<Note>(&Bytes::from_static(b"{")),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn path_id_parses_bare_and_prefixed() {
        let id = TransactionId::new();
        let bare: TransactionId = parse_path_id(&id.as_uuid().to_string(), "transaction").unwrap();
        assert_eq!(bare, id);
        let prefixed: TransactionId = parse_path_id(&id.to_string(), "transaction").unwrap();
        assert_eq!(prefixed, id);
    }

    #[test]
    fn malformed_path_id_is_not_found() {
        let err = parse_path_id::<TransactionId>("nope", "transaction").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
