//! Body compression for the remastered-era formats.
//!
//! Only two schemes show up in the wild: raw zlib streams (also used inside
//! individual change forms) and lz4 block data. Both store the decompressed
//! length next to the payload, so inflation is always to a known size.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, Result};

pub fn zlib_inflate(data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut decoded = Vec::with_capacity(expected_len);
    let mut decoder = ZlibDecoder::new(data);
    decoder
        .read_to_end(&mut decoded)
        .map_err(|err| Error::compression(format!("zlib: {err}")))?;
    if decoded.len() != expected_len {
        return Err(Error::compression(format!(
            "zlib stream inflated to {} bytes, expected {expected_len}",
            decoded.len()
        )));
    }
    Ok(decoded)
}

pub fn zlib_deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|err| Error::compression(format!("zlib: {err}")))
}

pub fn lz4_inflate(data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let decoded = lz4_flex::block::decompress(data, expected_len)
        .map_err(|err| Error::compression(format!("lz4: {err}")))?;
    if decoded.len() != expected_len {
        return Err(Error::compression(format!(
            "lz4 block inflated to {} bytes, expected {expected_len}",
            decoded.len()
        )));
    }
    Ok(decoded)
}

pub fn lz4_deflate(data: &[u8]) -> Vec<u8> {
    lz4_flex::block::compress(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zlib_roundtrips() {
        let data = b"a save body full of change forms".repeat(20);
        let packed = zlib_deflate(&data).unwrap();
        assert_eq!(zlib_inflate(&packed, data.len()).unwrap(), data);
    }

    #[test]
    fn zlib_rejects_a_wrong_expected_length() {
        let packed = zlib_deflate(b"four").unwrap();
        assert!(zlib_inflate(&packed, 5).is_err());
    }

    #[test]
    fn lz4_roundtrips() {
        let data = b"the lz4 path is only hit by remastered saves".repeat(10);
        let packed = lz4_deflate(&data);
        assert_eq!(lz4_inflate(&packed, data.len()).unwrap(), data);
    }

    #[test]
    fn garbage_is_a_compression_error() {
        assert!(zlib_inflate(&[0xDE, 0xAD], 10).is_err());
        assert!(lz4_inflate(&[0xDE], 10).is_err());
    }
}
