//! Seam to the external image codec.
//!
//! The core never decodes pixels itself. Whatever renders frames plugs
//! in an [`ImageDecoder`]; the HzMod session runs TGA bitmaps through
//! it before publishing them.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::NtrError;

#[async_trait]
pub trait ImageDecoder: Send + Sync {
    /// Turn an encoded image into whatever the consumer renders.
    async fn decode(&self, encoded: Bytes) -> Result<Bytes, NtrError>;
}

/// Hands the encoded bytes through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughDecoder;

#[async_trait]
impl ImageDecoder for PassthroughDecoder {
    async fn decode(&self, encoded: Bytes) -> Result<Bytes, NtrError> {
        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rejecting;

    #[async_trait]
    impl ImageDecoder for Rejecting {
        async fn decode(&self, _encoded: Bytes) -> Result<Bytes, NtrError> {
            Err(NtrError::Decode("unsupported".into()))
        }
    }

    #[tokio::test]
    async fn passthrough_returns_input() {
        let out = PassthroughDecoder
            .decode(Bytes::from_static(b"\xFF\xD8"))
            .await
            .unwrap();
        assert_eq!(&out[..], b"\xFF\xD8");
    }

    #[tokio::test]
    async fn decoder_is_object_safe() {
        let decoders: Vec<Box<dyn ImageDecoder>> = vec![Box::new(PassthroughDecoder), Box::new(Rejecting)];
        assert!(decoders[0].decode(Bytes::new()).await.is_ok());
        assert!(matches!(
            decoders[1].decode(Bytes::new()).await,
            Err(NtrError::Decode(_))
        ));
    }
}
