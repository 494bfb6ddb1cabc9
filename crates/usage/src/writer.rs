//! Sink contract consumed by the flusher

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use flightdeck_core::Result;

/// Destination for drained batches
///
/// Each call receives the framed rows of one category in append order, with
/// the trailing delimiter already removed. Any error counts as a failure of
/// the whole category for that flush.
#[async_trait]
pub trait UsageWriter: Send + Sync {
    async fn write_operations(&self, chunks: Vec<Bytes>) -> Result<()>;

    async fn write_registry(&self, chunks: Vec<Bytes>) -> Result<()>;
}

/// Join chunks into one contiguous body
pub fn concat(chunks: &[Bytes]) -> Bytes {
    match chunks {
        [] => Bytes::new(),
        [single] => single.clone(),
        _ => {
            let len = chunks.iter().map(Bytes::len).sum();
            let mut body = BytesMut::with_capacity(len);
            for chunk in chunks {
                body.extend_from_slice(chunk);
            }
            body.freeze()
        }
    }
}
