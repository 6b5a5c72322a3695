use std::fmt;

use rand::{Rng, SeedableRng, distributions::Alphanumeric, rngs::SmallRng};
use serde::{Deserialize, Serialize};

/// Identifies a party in the signaling namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct PeerToken(String);

impl PeerToken {
    /// Draws a fresh token of `len` alphanumeric characters.
    pub(crate) fn random(len: usize) -> Self {
        PeerToken(random_token(len))
    }
}

impl fmt::Display for PeerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PeerToken {
    fn from(token: String) -> Self {
        PeerToken(token)
    }
}

impl From<&str> for PeerToken {
    fn from(token: &str) -> Self {
        PeerToken(token.to_string())
    }
}

// not cryptographic, collisions are left to the relay
pub(crate) fn random_token(len: usize) -> String {
    SmallRng::from_entropy()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
