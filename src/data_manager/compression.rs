//! Array compression selection (§4.6, §9 "Compression is algorithm-agnostic"). `Lz4` is
//! implemented in full via `lz4_flex`, the same crate family the qsim crate reaches for when it
//! needs to shrink event-stream payloads before they cross a socket. The other modes are
//! genuinely external per the design's Non-goals -- they're represented, validated, and routed
//! through [`CompressionBackend`] so the rest of the pipeline is oblivious to which one is
//! configured, but their bodies report [`VistleError::UnsupportedCompression`].

use serde::{Deserialize, Serialize};

use crate::error::{Result, VistleError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SzVariant {
    Sz3,
    Sz2,
}

/// The session's chosen array codec plus whatever parameters it needs (§4.6: `zfpRate`,
/// `zfpPrecision`, `zfpAccuracy`, SZ variants, `BigWhoop`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CompressionMode {
    None,
    Lz4,
    Zfp { rate: Option<f64>, precision: Option<u32>, accuracy: Option<f64> },
    Sz { variant: SzVariant, error_bound: f64 },
    BigWhoop { quality: f64 },
}

impl Default for CompressionMode {
    fn default() -> Self {
        CompressionMode::Lz4
    }
}

/// Compresses/decompresses array bytes for one [`CompressionMode`]. A fresh instance is cheap;
/// implementations hold no per-call state.
pub trait CompressionBackend {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, data: &[u8], original_len: usize) -> Result<Vec<u8>>;
}

pub struct NoneBackend;

impl CompressionBackend for NoneBackend {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8], _original_len: usize) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

pub struct Lz4Backend;

impl CompressionBackend for Lz4Backend {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8], _original_len: usize) -> Result<Vec<u8>> {
        lz4_flex::decompress_size_prepended(data)
            .map_err(|e| VistleError::Transfer { object: "<array>".to_string(), reason: e.to_string() })
    }
}

/// Routes a [`CompressionMode`] to its backend. `Zfp`/`Sz`/`BigWhoop` are "external" modes: this
/// resolves their selection and parameter validation, but compressing/decompressing them is out
/// of scope, so those bodies return [`VistleError::UnsupportedCompression`].
pub fn backend_for(mode: CompressionMode) -> Box<dyn CompressionBackend + Send + Sync> {
    match mode {
        CompressionMode::None => Box::new(NoneBackend),
        CompressionMode::Lz4 => Box::new(Lz4Backend),
        other => Box::new(UnsupportedBackend(other)),
    }
}

struct UnsupportedBackend(CompressionMode);

impl CompressionBackend for UnsupportedBackend {
    fn compress(&self, _data: &[u8]) -> Result<Vec<u8>> {
        Err(VistleError::UnsupportedCompression(self.0))
    }

    fn decompress(&self, _data: &[u8], _original_len: usize) -> Result<Vec<u8>> {
        Err(VistleError::UnsupportedCompression(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lz4_round_trips() {
        let backend = backend_for(CompressionMode::Lz4);
        let data = b"some array bytes some array bytes some array bytes".to_vec();
        let compressed = backend.compress(&data).unwrap();
        let restored = backend.decompress(&compressed, data.len()).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn zfp_reports_unsupported_rather_than_panicking() {
        let backend = backend_for(CompressionMode::Zfp { rate: Some(8.0), precision: None, accuracy: None });
        let err = backend.compress(b"data").unwrap_err();
        assert!(matches!(err, VistleError::UnsupportedCompression(_)));
    }
}
