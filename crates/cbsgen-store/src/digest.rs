use crate::StoreError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};

/// Raw digest bytes. Manifests carry them base64-encoded, reports print
/// them as upper-case hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentDigest(Vec<u8>);

impl ContentDigest {
    pub fn sha256(data: &[u8]) -> Self {
        Self(Sha256::digest(data).to_vec())
    }

    pub fn sha256_of(mut reader: impl Read) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self(hasher.finalize().to_vec()))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, StoreError> {
        STANDARD
            .decode(encoded.trim())
            .map(Self)
            .map_err(|e| StoreError::Digest(format!("'{encoded}': {e}")))
    }

    pub fn to_hex_upper(&self) -> String {
        hex::encode_upper(&self.0)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex_upper())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "2CF24DBA5FB0A30E26E83B2AC5B9E29E1B161E5C1FA7425E73043362938B9824";

    #[test]
    fn sha256_of_reader_matches_oneshot() {
        let streamed = ContentDigest::sha256_of(&b"hello"[..]).unwrap();
        assert_eq!(streamed, ContentDigest::sha256(b"hello"));
        assert_eq!(streamed.to_hex_upper(), HELLO_SHA256);
        assert_eq!(streamed.to_string(), HELLO_SHA256);
    }

    #[test]
    fn base64_decodes_to_same_digest() {
        let digest = ContentDigest::sha256(b"hello");
        let b64 = digest.to_base64();
        assert_eq!(ContentDigest::from_base64(&b64).unwrap(), digest);
        assert_eq!(ContentDigest::from_base64(&format!(" {b64}\n")).unwrap(), digest);
    }

    #[test]
    fn invalid_base64_is_digest_error() {
        assert!(matches!(
            ContentDigest::from_base64("not base64!"),
            Err(StoreError::Digest(_))
        ));
    }
}
