//! The `.vsa` artifact container.
//!
//! ```text
//! magic      4  b"VSA\0"
//! version    2  u16 BE
//! flags      2  u16 BE, bit 0 = content compressed
//! artifact  16  artifact id
//! alg_len    1  then the algorithm tag
//! section    *  tag u8, len u64 BE, bytes: 1 metadata, 2 methods, 3 policies
//! digest    32  SHA-256 of every preceding byte
//! section    *  tag 4: encrypted content
//! ```
//!
//! The digest covers everything but the content, whose integrity is left to
//! the AEAD tag so tampered content surfaces as a crypto failure.

use crate::error::{VaultError, VaultResult};
use crate::model::{AccessMethod, ArtifactMetadata, EncryptedArtifact, EncryptionPolicy};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const MAGIC: [u8; 4] = *b"VSA\0";
pub const FORMAT_VERSION: u16 = 1;

const FLAG_COMPRESSED: u16 = 0x0001;
const KNOWN_FLAGS: u16 = FLAG_COMPRESSED;
const DIGEST_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Section {
    Metadata = 1,
    AccessMethods = 2,
    Policies = 3,
    Content = 4,
}

/// Fixed header preceding the sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u16,
    pub compressed: bool,
    pub artifact_id: Uuid,
    pub algorithm: String,
}

impl ContainerHeader {
    fn encode(&self, out: &mut Vec<u8>) -> VaultResult<()> {
        let alg_len = u8::try_from(self.algorithm.len()).map_err(|_| {
            VaultError::ArtifactFormat(format!("algorithm tag too long: {}", self.algorithm))
        })?;
        let flags = if self.compressed { FLAG_COMPRESSED } else { 0 };

        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(self.artifact_id.as_bytes());
        out.push(alg_len);
        out.extend_from_slice(self.algorithm.as_bytes());
        Ok(())
    }

    fn decode(reader: &mut Reader<'_>) -> VaultResult<Self> {
        let magic = reader.take(MAGIC.len(), "magic")?;
        if magic != MAGIC {
            return Err(VaultError::ArtifactFormat(format!(
                "bad magic: expected {MAGIC:02x?}, found {magic:02x?}"
            )));
        }

        let version = reader.u16("version")?;
        if version != FORMAT_VERSION {
            return Err(VaultError::ArtifactFormat(format!(
                "unsupported container version {version}"
            )));
        }

        let flags = reader.u16("flags")?;
        if flags & !KNOWN_FLAGS != 0 {
            return Err(VaultError::ArtifactFormat(format!("unknown flags {flags:#06x}")));
        }

        let id = reader.take(16, "artifact id")?;
        let artifact_id = Uuid::from_slice(id)
            .map_err(|e| VaultError::ArtifactFormat(format!("artifact id: {e}")))?;

        let alg_len = reader.u8("algorithm length")?;
        let algorithm = reader.take(usize::from(alg_len), "algorithm")?;
        let algorithm = std::str::from_utf8(algorithm)
            .map_err(|_| VaultError::ArtifactFormat("algorithm tag is not UTF-8".into()))?
            .to_string();

        Ok(Self {
            version,
            compressed: flags & FLAG_COMPRESSED != 0,
            artifact_id,
            algorithm,
        })
    }
}

fn write_section(out: &mut Vec<u8>, section: Section, bytes: &[u8]) {
    out.push(section as u8);
    out.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Serializes an artifact into container bytes.
pub fn assemble(
    encrypted_content: &[u8],
    metadata: &ArtifactMetadata,
    access_methods: &[AccessMethod],
    policies: &[EncryptionPolicy],
) -> VaultResult<Vec<u8>> {
    let header = ContainerHeader {
        version: metadata.version,
        compressed: metadata.content.compressed,
        artifact_id: metadata.id,
        algorithm: metadata.algorithm.clone(),
    };

    let mut out = Vec::with_capacity(encrypted_content.len() + 4096);
    header.encode(&mut out)?;
    write_section(&mut out, Section::Metadata, &serde_json::to_vec(metadata)?);
    write_section(&mut out, Section::AccessMethods, &serde_json::to_vec(access_methods)?);
    write_section(&mut out, Section::Policies, &serde_json::to_vec(policies)?);

    let digest = Sha256::digest(&out);
    out.extend_from_slice(&digest);
    write_section(&mut out, Section::Content, encrypted_content);
    Ok(out)
}

/// A parsed container.
#[derive(Debug, Clone)]
pub struct LoadedArtifact {
    pub header: ContainerHeader,
    pub artifact: EncryptedArtifact,
    pub encrypted_content: Vec<u8>,
}

/// Parses and validates container bytes.
pub fn load(bytes: &[u8]) -> VaultResult<LoadedArtifact> {
    let mut reader = Reader::new(bytes);
    let header = ContainerHeader::decode(&mut reader)?;

    let metadata: ArtifactMetadata = parse_json(reader.section(Section::Metadata)?, "metadata")?;
    let access_methods: Vec<AccessMethod> =
        parse_json(reader.section(Section::AccessMethods)?, "access methods")?;
    let policies: Vec<EncryptionPolicy> =
        parse_json(reader.section(Section::Policies)?, "policies")?;

    let covered = Sha256::digest(&bytes[..reader.pos]);
    let stored = reader.take(DIGEST_SIZE, "header digest")?;
    if covered.as_slice() != stored {
        return Err(VaultError::ArtifactFormat("header digest mismatch".into()));
    }

    let encrypted_content = reader.section(Section::Content)?.to_vec();
    if reader.remaining() != 0 {
        return Err(VaultError::ArtifactFormat(format!(
            "{} trailing bytes after content",
            reader.remaining()
        )));
    }

    check_consistency(&header, &metadata, &access_methods, &policies)?;

    Ok(LoadedArtifact {
        header,
        artifact: EncryptedArtifact {
            metadata,
            access_methods,
            policies,
        },
        encrypted_content,
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(bytes: &[u8], what: &str) -> VaultResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| VaultError::ArtifactFormat(format!("malformed {what} section: {e}")))
}

fn check_consistency(
    header: &ContainerHeader,
    metadata: &ArtifactMetadata,
    access_methods: &[AccessMethod],
    policies: &[EncryptionPolicy],
) -> VaultResult<()> {
    let mismatch = |what: &str| {
        Err(VaultError::ArtifactFormat(format!(
            "{what} does not match container header"
        )))
    };

    if metadata.id != header.artifact_id {
        return mismatch("metadata artifact id");
    }
    if metadata.algorithm != header.algorithm {
        return mismatch("metadata algorithm");
    }
    if metadata.version != header.version {
        return mismatch("metadata version");
    }
    if metadata.content.compressed != header.compressed {
        return mismatch("compression flag");
    }
    if access_methods.iter().any(|m| m.artifact_id != header.artifact_id) {
        return mismatch("access method artifact id");
    }
    if policies.iter().any(|p| p.artifact_id != header.artifact_id) {
        return mismatch("policy artifact id");
    }
    Ok(())
}

// ── Reader ───────────────────────────────────────────────────────

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &str) -> VaultResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(VaultError::ArtifactFormat(format!(
                "truncated container: {what} needs {len} bytes, {} left",
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self, what: &str) -> VaultResult<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> VaultResult<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u64(&mut self, what: &str) -> VaultResult<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8, what)?);
        Ok(u64::from_be_bytes(buf))
    }

    /// Reads the next section, which must carry `expected`'s tag.
    fn section(&mut self, expected: Section) -> VaultResult<&'a [u8]> {
        let what = format!("section {}", expected as u8);
        let tag = self.u8(&what)?;
        if tag != expected as u8 {
            return Err(VaultError::ArtifactFormat(format!(
                "expected section {}, found tag {tag}",
                expected as u8
            )));
        }
        let len = self.u64(&what)?;
        let len = usize::try_from(len)
            .map_err(|_| VaultError::ArtifactFormat(format!("{what} length {len} too large")))?;
        self.take(len, &what)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = ContainerHeader {
            version: FORMAT_VERSION,
            compressed: true,
            artifact_id: Uuid::new_v4(),
            algorithm: "AES-256-GCM".into(),
        };
        let mut bytes = Vec::new();
        header.encode(&mut bytes).unwrap();
        assert_eq!(&bytes[..4], b"VSA\0");

        let decoded = ContainerHeader::decode(&mut Reader::new(&bytes)).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn unknown_flag_bits_are_rejected() {
        let header = ContainerHeader {
            version: FORMAT_VERSION,
            compressed: false,
            artifact_id: Uuid::nil(),
            algorithm: "AES-256-GCM".into(),
        };
        let mut bytes = Vec::new();
        header.encode(&mut bytes).unwrap();
        bytes[7] |= 0x80;

        let err = ContainerHeader::decode(&mut Reader::new(&bytes)).unwrap_err();
        assert!(matches!(err, VaultError::ArtifactFormat(ref m) if m.contains("flags")));
    }

    #[test]
    fn reader_reports_truncation() {
        let mut reader = Reader::new(&[1, 2, 3]);
        assert_eq!(reader.u16("a").unwrap(), 0x0102);
        assert!(matches!(reader.u16("b"), Err(VaultError::ArtifactFormat(_))));
    }

    #[test]
    fn wrong_section_tag_is_rejected() {
        let mut bytes = Vec::new();
        write_section(&mut bytes, Section::Policies, b"[]");
        let err = Reader::new(&bytes).section(Section::Metadata).unwrap_err();
        assert!(matches!(err, VaultError::ArtifactFormat(_)));
    }
}
