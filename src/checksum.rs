// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Content digest primitives.

Upload manifests declare file content using hex digests plus byte sizes.
Multiple digest flavors can be declared for the same file (an MD5 `Files`
list plus stronger `Checksums-*` lists) and every declared flavor must match
the measured content before an artifact is considered structurally valid.
*/

use {
    crate::error::{IngestError, Result},
    digest::Digest,
    std::{
        fmt::Formatter,
        io::{BufRead, BufReader, Read},
    },
};

/// A digest flavor understood by the pipeline.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChecksumKind {
    Md5,
    Sha1,
    Sha256,
}

impl ChecksumKind {
    /// Emit variants in their preferred usage order, strongest first.
    pub fn preferred_order() -> impl Iterator<Item = ChecksumKind> {
        [Self::Sha256, Self::Sha1, Self::Md5].into_iter()
    }

    /// Name of the manifest field holding file lists of this flavor.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "Files",
            Self::Sha1 => "Checksums-Sha1",
            Self::Sha256 => "Checksums-Sha256",
        }
    }
}

/// A parsed content digest of a known flavor.
#[derive(Clone, Eq, Hash, PartialEq)]
pub enum ContentDigest {
    Md5(Vec<u8>),
    Sha1(Vec<u8>),
    Sha256(Vec<u8>),
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5(data) => write!(f, "Md5({})", hex::encode(data)),
            Self::Sha1(data) => write!(f, "Sha1({})", hex::encode(data)),
            Self::Sha256(data) => write!(f, "Sha256({})", hex::encode(data)),
        }
    }
}

impl ContentDigest {
    /// Obtain an instance by parsing a hex string as a [ChecksumKind].
    pub fn from_hex_digest(kind: ChecksumKind, digest: &str) -> Result<Self> {
        let digest = hex::decode(digest)?;

        Ok(match kind {
            ChecksumKind::Md5 => Self::Md5(digest),
            ChecksumKind::Sha1 => Self::Sha1(digest),
            ChecksumKind::Sha256 => Self::Sha256(digest),
        })
    }

    /// Create a new MD5 instance by parsing a hex digest.
    pub fn md5_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumKind::Md5, digest)
    }

    /// Create a new SHA-1 instance by parsing a hex digest.
    pub fn sha1_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumKind::Sha1, digest)
    }

    /// Create a new SHA-256 instance by parsing a hex digest.
    pub fn sha256_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumKind::Sha256, digest)
    }

    /// The raw digest bytes.
    pub fn digest_bytes(&self) -> &[u8] {
        match self {
            Self::Md5(x) => x,
            Self::Sha1(x) => x,
            Self::Sha256(x) => x,
        }
    }

    /// The hex encoded digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest_bytes())
    }

    /// The [ChecksumKind] of this digest.
    pub fn kind(&self) -> ChecksumKind {
        match self {
            Self::Md5(_) => ChecksumKind::Md5,
            Self::Sha1(_) => ChecksumKind::Sha1,
            Self::Sha256(_) => ChecksumKind::Sha256,
        }
    }
}

/// All digest flavors of one piece of content, measured together.
#[derive(Clone, Debug)]
pub struct MultiContentDigest {
    pub md5: ContentDigest,
    pub sha1: ContentDigest,
    pub sha256: ContentDigest,
}

impl MultiContentDigest {
    /// Whether this measurement agrees with a declared digest of any flavor.
    pub fn matches_digest(&self, other: &ContentDigest) -> bool {
        match other {
            ContentDigest::Md5(_) => &self.md5 == other,
            ContentDigest::Sha1(_) => &self.sha1 == other,
            ContentDigest::Sha256(_) => &self.sha256 == other,
        }
    }

    /// Obtain the [ContentDigest] for a given [ChecksumKind].
    pub fn digest_for_kind(&self, kind: ChecksumKind) -> &ContentDigest {
        match kind {
            ChecksumKind::Md5 => &self.md5,
            ChecksumKind::Sha1 => &self.sha1,
            ChecksumKind::Sha256 => &self.sha256,
        }
    }
}

/// A digester computing all supported flavors simultaneously.
pub struct MultiDigester {
    md5: md5::Md5,
    sha1: sha1::Sha1,
    sha256: sha2::Sha256,
}

impl Default for MultiDigester {
    fn default() -> Self {
        Self {
            md5: md5::Md5::new(),
            sha1: sha1::Sha1::new(),
            sha256: sha2::Sha256::new(),
        }
    }
}

impl MultiDigester {
    /// Write content into the digesters.
    pub fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
        self.sha256.update(data);
    }

    /// Finish digesting content, consuming the instance.
    pub fn finish(self) -> MultiContentDigest {
        MultiContentDigest {
            md5: ContentDigest::Md5(self.md5.finalize().to_vec()),
            sha1: ContentDigest::Sha1(self.sha1.finalize().to_vec()),
            sha256: ContentDigest::Sha256(self.sha256.finalize().to_vec()),
        }
    }
}

/// Measure all digest flavors and the byte size of a reader's content.
pub fn digest_reader(reader: impl Read) -> Result<(MultiContentDigest, u64)> {
    let mut reader = BufReader::new(reader);
    let mut digester = MultiDigester::default();
    let mut size = 0u64;

    loop {
        let chunk = reader.fill_buf()?;
        if chunk.is_empty() {
            break;
        }

        digester.update(chunk);
        size += chunk.len() as u64;
        let consumed = chunk.len();
        reader.consume(consumed);
    }

    Ok((digester.finish(), size))
}

/// Measure a file on disk. See [digest_reader].
pub fn digest_path(path: impl AsRef<std::path::Path>) -> Result<(MultiContentDigest, u64)> {
    let path = path.as_ref();
    let fh = std::fs::File::open(path).map_err(IngestError::Io)?;
    digest_reader(fh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_known_content() -> Result<()> {
        let (digest, size) = digest_reader(std::io::Cursor::new(b"hello world\n"))?;

        assert_eq!(size, 12);
        assert_eq!(digest.md5.digest_hex(), "6f5902ac237024bdd0c176cb93063dc4");
        assert_eq!(
            digest.sha1.digest_hex(),
            "22596363b3de40b06f981fb85d82312e8c0ed511"
        );
        assert_eq!(
            digest.sha256.digest_hex(),
            "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447"
        );

        Ok(())
    }

    #[test]
    fn matches_declared_flavors() -> Result<()> {
        let (digest, _) = digest_reader(std::io::Cursor::new(b"hello world\n"))?;

        assert!(digest.matches_digest(&ContentDigest::md5_hex(
            "6f5902ac237024bdd0c176cb93063dc4"
        )?));
        assert!(digest.matches_digest(&ContentDigest::sha256_hex(
            "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447"
        )?));
        assert!(!digest.matches_digest(&ContentDigest::md5_hex(
            "00000000000000000000000000000000"
        )?));

        Ok(())
    }

    #[test]
    fn hex_parse_rejects_garbage() {
        assert!(ContentDigest::md5_hex("not hex").is_err());
    }

    #[test]
    fn kind_round_trip() -> Result<()> {
        for kind in ChecksumKind::preferred_order() {
            let digest = ContentDigest::from_hex_digest(kind, "00ff")?;
            assert_eq!(digest.kind(), kind);
            assert_eq!(digest.digest_hex(), "00ff");
        }

        Ok(())
    }
}
