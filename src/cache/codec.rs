//! Byte encoding for cached values.
//!
//! Values are wrapped in a small JSON envelope carrying a format version and
//! the shape name, so an entry written for one key type is never decoded as
//! another.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::entities::{ArticlePage, HydratedArticle};

pub const ENVELOPE_VERSION: u32 = 1;

/// Values that may be stored in the cache.
pub trait CacheShape: Serialize + DeserializeOwned {
    const SHAPE: &'static str;
}

impl CacheShape for HydratedArticle {
    const SHAPE: &'static str = "article";
}

impl CacheShape for ArticlePage {
    const SHAPE: &'static str = "article_page";
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode `{shape}` for caching: {source}")]
    Encode {
        shape: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("cached `{shape}` is malformed: {source}")]
    Decode {
        shape: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("cached entry has version {found}, expected {ENVELOPE_VERSION}")]
    Version { found: u32 },
    #[error("cached entry holds `{found}`, expected `{expected}`")]
    Shape {
        expected: &'static str,
        found: String,
    },
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    shape: &'static str,
    data: &'a T,
}

#[derive(Deserialize)]
struct Header {
    version: u32,
    shape: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

pub fn encode<T: CacheShape>(value: &T) -> Result<Bytes, CodecError> {
    let envelope = EnvelopeRef {
        version: ENVELOPE_VERSION,
        shape: T::SHAPE,
        data: value,
    };
    serde_json::to_vec(&envelope)
        .map(Bytes::from)
        .map_err(|source| CodecError::Encode {
            shape: T::SHAPE,
            source,
        })
}

pub fn decode<T: CacheShape>(bytes: &[u8]) -> Result<T, CodecError> {
    let header: Header = serde_json::from_slice(bytes).map_err(|source| CodecError::Decode {
        shape: T::SHAPE,
        source,
    })?;
    if header.version != ENVELOPE_VERSION {
        return Err(CodecError::Version {
            found: header.version,
        });
    }
    if header.shape != T::SHAPE {
        return Err(CodecError::Shape {
            expected: T::SHAPE,
            found: header.shape,
        });
    }

    serde_json::from_slice::<Envelope<T>>(bytes)
        .map(|envelope| envelope.data)
        .map_err(|source| CodecError::Decode {
            shape: T::SHAPE,
            source,
        })
}
