//! Transport and decode seams supplied by the host

use crate::{AssetKind, AssetReference, FetchError};
use async_trait::async_trait;
use bytes::Bytes;

/// Content type the caller expects back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcceptHint {
    Audio,
    NoteSequence,
}

impl AcceptHint {
    /// `Accept` header value
    pub fn mime(&self) -> &'static str {
        match self {
            AcceptHint::Audio => "audio/*, application/octet-stream;q=0.8",
            AcceptHint::NoteSequence => "audio/midi, audio/x-midi, application/octet-stream;q=0.8",
        }
    }
}

impl From<AssetKind> for AcceptHint {
    fn from(kind: AssetKind) -> Self {
        match kind {
            AssetKind::Audio => AcceptHint::Audio,
            AssetKind::NoteSequence => AcceptHint::NoteSequence,
        }
    }
}

/// Bytes returned by a transport call
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPayload {
    /// Payload bytes
    pub data: Bytes,
    /// `data` is still in a compressed content encoding
    pub compressed: bool,
}

impl FetchedPayload {
    /// Uncompressed payload
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            compressed: false,
        }
    }
}

/// Opaque fetch capability, typically an HTTP client
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the full payload at `url`
    async fn fetch(&self, url: &str, accept: AcceptHint) -> Result<FetchedPayload, FetchError>;
}

/// Optional transformation applied to fetched audio before caching
///
/// A failure is not fatal: the raw payload is cached and returned instead.
pub trait DecodeHook: Send + Sync {
    fn decode(&self, asset: &AssetReference, payload: Bytes) -> Result<Bytes, FetchError>;
}

impl<F> DecodeHook for F
where
    F: Fn(&AssetReference, Bytes) -> Result<Bytes, FetchError> + Send + Sync,
{
    fn decode(&self, asset: &AssetReference, payload: Bytes) -> Result<Bytes, FetchError> {
        self(asset, payload)
    }
}
