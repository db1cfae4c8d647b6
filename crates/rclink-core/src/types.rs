use serde::{Deserialize, Serialize};

/// Which side of the handshake a peer plays.
///
/// The responder (server) speaks first with its DH public value; the
/// initiator (client) answers with its own and both derive the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Connecting side: waits for `dh_init`, replies with `dh_response`
    Initiator,
    /// Accepting side: sends `dh_init` as soon as the connection opens
    Responder,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Responder => f.write_str("responder"),
        }
    }
}
