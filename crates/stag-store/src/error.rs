//! Store error type with Arango error-number classification.

use serde::Deserialize;
use thiserror::Error;

/// Errors produced by the driver layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// HTTP transport failure (connect, timeout, body read).
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    /// An error reported by the server, with its Arango error number.
    #[error("arango error {num}: {message}")]
    Arango { num: i64, message: String, status: u16 },

    /// A row or response body did not decode.
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),

    /// The operation exceeded its deadline.
    #[error("store operation timed out")]
    Timeout,
}

// Arango error numbers the service cares about.
const ERR_DOCUMENT_NOT_FOUND: i64 = 1202;
const ERR_DUPLICATE_NAME: i64 = 1207;
const ERR_UNIQUE_CONSTRAINT: i64 = 1210;
const ERR_GRAPH_DUPLICATE: i64 = 1925;

impl StoreError {
    /// The requested document or collection does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::Arango { num, status, .. }
                if *num == ERR_DOCUMENT_NOT_FOUND || *status == 404
        )
    }

    /// The entity already exists; migrations treat this as success.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::Arango { num, status, .. }
                if *num == ERR_DUPLICATE_NAME
                    || *num == ERR_UNIQUE_CONSTRAINT
                    || *num == ERR_GRAPH_DUPLICATE
                    || *status == 409
        )
    }
}

/// Error body shape returned by the Arango HTTP API.
#[derive(Debug, Deserialize)]
pub(crate) struct ArangoErrorBody {
    #[serde(default)]
    pub error: bool,
    #[serde(default, rename = "errorMessage")]
    pub error_message: String,
    #[serde(default, rename = "errorNum")]
    pub error_num: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arango(body: &str, status: u16) -> StoreError {
        let parsed: ArangoErrorBody = serde_json::from_str(body).unwrap();
        assert!(parsed.error);
        StoreError::Arango {
            num: parsed.error_num,
            message: parsed.error_message,
            status,
        }
    }

    #[test]
    fn classifies_not_found() {
        let err = arango(
            r#"{"error":true,"errorMessage":"document not found","errorNum":1202,"code":404}"#,
            404,
        );
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
    }

    #[test]
    fn classifies_conflicts() {
        for body in [
            r#"{"error":true,"errorMessage":"duplicate name","errorNum":1207,"code":409}"#,
            r#"{"error":true,"errorMessage":"unique constraint violated","errorNum":1210,"code":409}"#,
            r#"{"error":true,"errorMessage":"graph already exists","errorNum":1925,"code":409}"#,
        ] {
            let err = arango(body, 409);
            assert!(err.is_conflict(), "expected conflict for {body}");
            assert!(!err.is_not_found());
        }
    }
}
