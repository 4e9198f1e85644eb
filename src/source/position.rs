//! Resumable position codec.
//!
//! A position is persisted as self-describing JSON bytes tagged with the
//! iterator mode it belongs to. The caller treats the bytes as opaque: it
//! stores whatever the last emitted record carried and hands it back on
//! restart. Unknown fields are ignored on decode so positions written by a
//! newer build still parse.

use crate::error::{Error, Result};
use crate::record::Value;
use serde::{Deserialize, Serialize};

/// An iterator position.
///
/// `Snapshot` positions restart an interrupted snapshot: `element` is the
/// last emitted ordering-field value, `max_element` the frozen upper bound
/// of the snapshot window, and `resume_token` the change stream position
/// captured when the snapshot started, so CDC replays from the snapshot's
/// logical start time once it completes.
///
/// `Cdc` positions resume a change stream right after the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Position {
    Snapshot {
        #[serde(default)]
        element: Option<Value>,
        #[serde(rename = "maxElement", default)]
        max_element: Option<Value>,
        #[serde(rename = "resumeToken", with = "base64_bytes")]
        resume_token: Vec<u8>,
    },
    Cdc {
        #[serde(rename = "resumeToken", with = "base64_bytes")]
        resume_token: Vec<u8>,
    },
}

impl Position {
    /// Serialize the position into the bytes carried by records.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::SerializePosition(e.to_string()))
    }

    /// Parse position bytes. Empty input means a fresh start; malformed
    /// input is a fatal configuration error.
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>> {
        if bytes.is_empty() {
            return Ok(None);
        }

        serde_json::from_slice(bytes)
            .map(Some)
            .map_err(|e| Error::ParsePosition(e.to_string()))
    }

    /// The resume token carried by this position, in either mode.
    pub fn resume_token(&self) -> &[u8] {
        match self {
            Position::Snapshot { resume_token, .. } | Position::Cdc { resume_token } => {
                resume_token
            }
        }
    }
}

// Resume tokens are raw BSON bytes; base64 keeps them compact and readable
// inside the JSON position.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
