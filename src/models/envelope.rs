use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::token::PeerToken;

#[derive(Debug, Error)]
pub(crate) enum EnvelopeError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not a json object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("unknown type `{0}`")]
    UnknownType(String),
}

/// One message exchanged over the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub(crate) token: PeerToken,
    #[serde(flatten)]
    pub(crate) signal: Signal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum Signal {
    Offer { description: String },
    Answer { description: String },
    Candidate { candidate: String, mid: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DescriptionKind {
    Offer,
    Answer,
}

impl fmt::Display for DescriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptionKind::Offer => f.write_str("offer"),
            DescriptionKind::Answer => f.write_str("answer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Description {
    pub(crate) kind: DescriptionKind,
    pub(crate) sdp: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub(crate) candidate: String,
    pub(crate) mid: String,
}

impl Envelope {
    /// Parses a relay text frame.
    ///
    /// `token` and `type` are checked before the payload so drops can be
    /// told apart in the logs.
    pub(crate) fn parse(text: &str) -> Result<Envelope, EnvelopeError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(object) = &value else {
            return Err(EnvelopeError::NotAnObject);
        };
        if !matches!(object.get("token"), Some(Value::String(_))) {
            return Err(EnvelopeError::MissingField("token"));
        }
        let Some(Value::String(kind)) = object.get("type") else {
            return Err(EnvelopeError::MissingField("type"));
        };
        if !matches!(kind.as_str(), "offer" | "answer" | "candidate") {
            return Err(EnvelopeError::UnknownType(kind.clone()));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub(crate) fn to_text(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub(crate) fn description(token: PeerToken, description: Description) -> Envelope {
        let signal = match description.kind {
            DescriptionKind::Offer => Signal::Offer { description: description.sdp },
            DescriptionKind::Answer => Signal::Answer { description: description.sdp },
        };
        Envelope { token, signal }
    }

    pub(crate) fn candidate(token: PeerToken, candidate: Candidate) -> Envelope {
        Envelope {
            token,
            signal: Signal::Candidate {
                candidate: candidate.candidate,
                mid: candidate.mid,
            },
        }
    }

    pub(crate) fn is_offer(&self) -> bool {
        matches!(self.signal, Signal::Offer { .. })
    }
}
