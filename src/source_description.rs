// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The embedded source description file.

A source upload carries a description control file (the `.dsc` artifact)
defining the source package: its format, the binaries it produces, build
dependencies and its own file list. The description may carry its own
cleartext signature, verified independently of the manifest's signature and
possibly made by a different key.
*/

use {
    crate::{
        checksum::{ChecksumKind, ContentDigest},
        control::{parse_single_paragraph, Paragraph},
        error::{IngestError, Result},
        manifest::FileListEntry,
        version::PackageVersion,
    },
    pgp_cleartext::{CleartextSignatureReader, CleartextSignatures},
    std::{io::BufRead, ops::Deref, str::FromStr},
};

const CLEARTEXT_HEADER: &str = "-----BEGIN PGP SIGNED MESSAGE-----";

/// The layout family a source package declares via its `Format` field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SourceFormat {
    /// `1.0`: a single tarball, or an original tarball plus a diff.
    Legacy,
    /// `3.0 (quilt)`: original tarball plus a packaging archive.
    Quilt,
    /// `3.0 (native)`: a single native tarball, no original/diff split.
    Native,
}

impl SourceFormat {
    /// Parse a `Format` field value.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "1.0" => Ok(Self::Legacy),
            "3.0 (quilt)" => Ok(Self::Quilt),
            "3.0 (native)" => Ok(Self::Native),
            other => Err(IngestError::UnknownSourceFormat(other.to_string())),
        }
    }
}

/// Parsed representation of a source description file.
#[derive(Default)]
pub struct SourceDescription {
    paragraph: Paragraph,
    signatures: Option<CleartextSignatures>,
}

impl Deref for SourceDescription {
    type Target = Paragraph;

    fn deref(&self) -> &Self::Target {
        &self.paragraph
    }
}

impl SourceDescription {
    /// Parse a description from raw bytes, detecting a signature envelope.
    ///
    /// Parsing does not verify the signature.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.starts_with(CLEARTEXT_HEADER.as_bytes()) {
            Self::from_armored_reader(std::io::Cursor::new(data))
        } else {
            Self::from_reader(std::io::Cursor::new(data))
        }
    }

    /// Construct an instance from an unsigned field block.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        Ok(Self {
            paragraph: parse_single_paragraph(reader)?,
            signatures: None,
        })
    }

    /// Construct an instance from a PGP cleartext signed field block.
    pub fn from_armored_reader<R: BufRead>(reader: R) -> Result<Self> {
        let reader = CleartextSignatureReader::new(reader);
        let mut reader = std::io::BufReader::new(reader);

        let paragraph = parse_single_paragraph(&mut reader)?;
        let signatures = reader.into_inner().finalize();

        Ok(Self {
            paragraph,
            signatures: Some(signatures),
        })
    }

    /// The parsed signature state, if the description was signed.
    pub fn signatures(&self) -> Option<&CleartextSignatures> {
        self.signatures.as_ref()
    }

    /// The declared source format.
    pub fn format(&self) -> Result<SourceFormat> {
        SourceFormat::parse(self.required_field_str("Format")?)
    }

    /// The source package name.
    pub fn source(&self) -> Result<&str> {
        self.required_field_str("Source")
    }

    /// The declared version as its original string.
    pub fn version_str(&self) -> Result<&str> {
        self.required_field_str("Version")
    }

    /// The declared version, validated.
    pub fn version(&self) -> Result<PackageVersion> {
        Ok(PackageVersion::parse(self.version_str()?)?)
    }

    /// The binary packages this source produces.
    pub fn binary(&self) -> Option<Vec<&str>> {
        self.iter_field_comma_delimited("Binary")
            .map(|iter| iter.collect())
    }

    /// The architectures this source builds for.
    pub fn architectures(&self) -> Option<Vec<&str>> {
        self.iter_field_words("Architecture").map(|i| i.collect())
    }

    /// The maintainer identity string. Free text; untrusted.
    pub fn maintainer(&self) -> Result<&str> {
        self.required_field_str("Maintainer")
    }

    /// The standards version the package declares conformance with.
    pub fn standards_version(&self) -> Result<&str> {
        self.required_field_str("Standards-Version")
    }

    /// The declared build dependencies, unparsed.
    pub fn build_depends(&self) -> Option<&str> {
        self.field_str("Build-Depends")
    }

    /// The declared build conflicts, unparsed.
    pub fn build_conflicts(&self) -> Option<&str> {
        self.field_str("Build-Conflicts")
    }

    /// Copyright metadata carried in the description, if any.
    pub fn copyright(&self) -> Option<&str> {
        self.field_str("Copyright")
    }

    /// The `Package-List` lines, one per produced package, unparsed.
    pub fn package_list(&self) -> Option<Vec<&str>> {
        self.iter_field_lines("Package-List").map(|i| i.collect())
    }

    /// The mandatory `Files` list: MD5 digest, size, filename.
    pub fn files(&self) -> Result<Vec<FileListEntry>> {
        self.iter_files(ChecksumKind::Md5)
            .ok_or_else(|| IngestError::ControlRequiredFieldMissing("Files".to_string()))?
    }

    /// The `Checksums-Sha256` list, if declared.
    pub fn checksums_sha256(&self) -> Option<Result<Vec<FileListEntry>>> {
        self.iter_files(ChecksumKind::Sha256)
    }

    /// Whether this source, as described, requires an original tarball.
    ///
    /// Quilt-format sources always do. Native sources never do. Legacy (1.0)
    /// sources do iff their file list names an `.orig.tar.*` member.
    pub fn requires_original(&self) -> Result<bool> {
        Ok(match self.format()? {
            SourceFormat::Quilt => true,
            SourceFormat::Native => false,
            SourceFormat::Legacy => self
                .files()?
                .iter()
                .any(|entry| entry.filename.contains(".orig.tar")),
        })
    }

    /// The original tarball entry from the file list, if one is declared.
    pub fn original_tarball(&self) -> Result<Option<FileListEntry>> {
        Ok(self
            .files()?
            .into_iter()
            .find(|entry| entry.filename.contains(".orig.tar")))
    }

    fn iter_files(&self, kind: ChecksumKind) -> Option<Result<Vec<FileListEntry>>> {
        let lines = self.iter_field_lines(kind.field_name())?;

        Some(
            lines
                .map(|line| {
                    let mut parts = line.split_ascii_whitespace();

                    let digest = parts.next().ok_or(IngestError::FileEntryMissingDigest)?;
                    let size = parts.next().ok_or(IngestError::FileEntryMissingSize)?;
                    let filename = parts.next().ok_or(IngestError::FileEntryMissingPath)?;

                    if parts.next().is_some() {
                        return Err(IngestError::FileEntryPathWithSpaces(line.to_string()));
                    }

                    Ok(FileListEntry {
                        filename: filename.to_string(),
                        digest: ContentDigest::from_hex_digest(kind, digest)?,
                        size: u64::from_str(size)?,
                    })
                })
                .collect(),
        )
    }
}
