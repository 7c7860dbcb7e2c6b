//! Blob codec hook.
//!
//! Every blob the runtime persists or hands to a transport passes through
//! the configured codec exactly once: local updates are encoded before they
//! reach the update log / pending list / push / publish, and inbound or
//! stored blobs are decoded before the CRDT sees them. State vectors are not
//! run through the codec; they travel inside the request envelope, which
//! the server must be able to parse.

use crate::error::Result;

/// Transforms blobs on their way to and from storage and transports.
///
/// Implementations might compress or encrypt payloads. `decode` must invert
/// `encode`; a failed `decode` discards the inbound blob without touching
/// local state.
pub trait Codec: Send + Sync {
    /// Transform a raw CRDT blob into its stored/transported form.
    fn encode(&self, bytes: &[u8]) -> Result<Vec<u8>>;

    /// Invert [`Codec::encode`].
    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>>;
}

/// The default pass-through codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn encode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}
