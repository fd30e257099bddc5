//! Gzip-compressed JSON codec for per-frame latents.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use talkhead_models::Latent;

use crate::error::{StorageError, StorageResult};

/// Compress latents to gzip JSON bytes.
pub fn compress_latents(latents: &[Latent]) -> StorageResult<Vec<u8>> {
    let json = serde_json::to_vec(latents)
        .map_err(|e| StorageError::serialization(format!("Failed to serialize latents: {}", e)))?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| StorageError::serialization(format!("Failed to gzip latents: {}", e)))?;

    encoder
        .finish()
        .map_err(|e| StorageError::serialization(format!("Failed to finish gzip encoding: {}", e)))
}

/// Decompress gzip JSON bytes to latents, validating every tensor shape.
pub fn decompress_latents(data: &[u8]) -> StorageResult<Vec<Latent>> {
    let mut decoder = GzDecoder::new(data);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| StorageError::serialization(format!("Failed to decompress latents: {}", e)))?;

    let latents: Vec<Latent> = serde_json::from_slice(&json)
        .map_err(|e| StorageError::serialization(format!("Failed to deserialize latents: {}", e)))?;

    for (i, latent) in latents.iter().enumerate() {
        latent
            .validate()
            .map_err(|e| StorageError::serialization(format!("latent {}: {}", i, e)))?;
    }
    Ok(latents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use talkhead_models::Tensor;

    #[test]
    fn test_latents_survive_compression() {
        let latents = vec![
            Tensor::new(vec![2, 2], vec![0.5, -1.0, 2.25, 3.0]).unwrap(),
            Tensor::new(vec![4], vec![1.0; 4]).unwrap(),
        ];
        let bytes = compress_latents(&latents).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
        assert_eq!(decompress_latents(&bytes).unwrap(), latents);
    }

    #[test]
    fn test_corrupt_data_is_rejected() {
        assert!(decompress_latents(b"not gzip").is_err());
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let bad = Tensor {
            shape: vec![3],
            values: vec![1.0],
        };
        let bytes = compress_latents(&[bad]).unwrap();
        let err = decompress_latents(&bytes).unwrap_err();
        assert!(err.to_string().contains("latent 0"));
    }
}
