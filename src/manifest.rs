// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The upload manifest.

The manifest is the top-level control file describing an upload: its source
package name, version, declared architectures, target series and the list of
artifact files with their expected digests and sizes. It may arrive wrapped in
a PGP cleartext signature envelope; the envelope is stripped before field
parsing and the signature state retained for later verification.

Identity-bearing fields in the manifest (`Maintainer`, `Changed-By`) are free
text supplied by the uploader and must never be used to establish identity.
*/

use {
    crate::{
        checksum::{ChecksumKind, ContentDigest},
        control::{parse_single_paragraph, Paragraph},
        error::{IngestError, Result},
        version::PackageVersion,
    },
    pgp_cleartext::{CleartextSignatureReader, CleartextSignatures},
    std::{io::BufRead, ops::Deref, str::FromStr},
};

const CLEARTEXT_HEADER: &str = "-----BEGIN PGP SIGNED MESSAGE-----";

/// A single `<digest> <size> <filename>` entry from a checksums field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileListEntry {
    pub filename: String,
    pub digest: ContentDigest,
    pub size: u64,
}

/// A `Files` entry in the manifest: digest, size, section, priority, filename.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ManifestFileEntry {
    pub filename: String,
    pub md5: ContentDigest,
    pub sha1: Option<ContentDigest>,
    pub sha256: Option<ContentDigest>,
    pub size: u64,
    pub section: String,
    pub priority: String,
}

impl ManifestFileEntry {
    /// The component a file targets, derived from its section.
    ///
    /// A section of `utils` is in the default component; `universe/utils`
    /// names the `universe` component explicitly.
    pub fn component(&self) -> &str {
        match self.section.split_once('/') {
            Some((component, _)) => component,
            None => "main",
        }
    }

    /// Every digest flavor declared for this file.
    pub fn iter_digests(&self) -> impl Iterator<Item = &ContentDigest> {
        std::iter::once(&self.md5)
            .chain(self.sha1.iter())
            .chain(self.sha256.iter())
    }
}

/// Parse `<digest> <size> <filename>` lines from a checksums field.
fn parse_file_list_lines<'p>(
    lines: impl Iterator<Item = &'p str> + 'p,
    kind: ChecksumKind,
) -> impl Iterator<Item = Result<FileListEntry>> + 'p {
    lines.map(move |line| {
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
}

/// Parsed representation of an upload manifest.
#[derive(Default)]
pub struct UploadManifest {
    paragraph: Paragraph,
    signatures: Option<CleartextSignatures>,
}

impl Deref for UploadManifest {
    type Target = Paragraph;

    fn deref(&self) -> &Self::Target {
        &self.paragraph
    }
}

impl UploadManifest {
    /// Parse a manifest from raw bytes, detecting a signature envelope.
    ///
    /// Signed manifests begin with `-----BEGIN PGP SIGNED MESSAGE-----`; the
    /// signature block is extracted and excluded from the parsed fields.
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

    /// The parsed signature state, if the manifest was signed.
    pub fn signatures(&self) -> Option<&CleartextSignatures> {
        self.signatures.as_ref()
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

    /// The declared architecture list.
    pub fn architectures(&self) -> Result<Vec<&str>> {
        Ok(self
            .iter_field_words("Architecture")
            .ok_or_else(|| IngestError::ControlRequiredFieldMissing("Architecture".to_string()))?
            .collect())
    }

    /// The declared target series.
    pub fn distribution(&self) -> Result<&str> {
        self.required_field_str("Distribution")
    }

    /// The maintainer identity string. Free text; untrusted.
    pub fn maintainer(&self) -> Result<&str> {
        self.required_field_str("Maintainer")
    }

    /// The identity string of whoever prepared this upload. Free text; untrusted.
    pub fn changed_by(&self) -> Option<&str> {
        self.field_str("Changed-By")
    }

    /// The binary package names this upload claims to provide.
    pub fn binary(&self) -> Option<Vec<&str>> {
        self.iter_field_words("Binary").map(|iter| iter.collect())
    }

    /// The mandatory `Files` list: MD5 digest, size, section, priority, filename.
    pub fn files(&self) -> Result<Vec<ManifestFileEntry>> {
        let lines = self
            .iter_field_lines("Files")
            .ok_or_else(|| IngestError::ControlRequiredFieldMissing("Files".to_string()))?;

        lines
            .map(|line| {
                let mut parts = line.split_ascii_whitespace();

                let digest = parts.next().ok_or(IngestError::FileEntryMissingDigest)?;
                let size = parts.next().ok_or(IngestError::FileEntryMissingSize)?;
                let section = parts.next().ok_or(IngestError::FileEntryMissingPath)?;
                let priority = parts.next().ok_or(IngestError::FileEntryMissingPath)?;
                let filename = parts.next().ok_or(IngestError::FileEntryMissingPath)?;

                if parts.next().is_some() {
                    return Err(IngestError::FileEntryPathWithSpaces(line.to_string()));
                }

                Ok(ManifestFileEntry {
                    filename: filename.to_string(),
                    md5: ContentDigest::md5_hex(digest)?,
                    sha1: None,
                    sha256: None,
                    size: u64::from_str(size)?,
                    section: section.to_string(),
                    priority: priority.to_string(),
                })
            })
            .collect()
    }

    /// The `Checksums-Sha1` list, if declared.
    pub fn checksums_sha1(&self) -> Option<Result<Vec<FileListEntry>>> {
        self.iter_field_lines(ChecksumKind::Sha1.field_name())
            .map(|lines| parse_file_list_lines(lines, ChecksumKind::Sha1).collect())
    }

    /// The `Checksums-Sha256` list, if declared.
    pub fn checksums_sha256(&self) -> Option<Result<Vec<FileListEntry>>> {
        self.iter_field_lines(ChecksumKind::Sha256.field_name())
            .map(|lines| parse_file_list_lines(lines, ChecksumKind::Sha256).collect())
    }

    /// The `Files` list merged with any stronger checksum lists.
    ///
    /// Every `Checksums-*` entry must name a file from `Files` with an
    /// agreeing size; a stray entry is a malformed manifest.
    pub fn file_entries(&self) -> Result<Vec<ManifestFileEntry>> {
        let mut entries = self.files()?;

        for (checksums, kind) in [
            (self.checksums_sha1().transpose()?, ChecksumKind::Sha1),
            (self.checksums_sha256().transpose()?, ChecksumKind::Sha256),
        ] {
            for extra in checksums.unwrap_or_default() {
                let entry = entries
                    .iter_mut()
                    .find(|e| e.filename == extra.filename && e.size == extra.size)
                    .ok_or_else(|| {
                        IngestError::ChecksumForUndeclaredFile(extra.filename.clone())
                    })?;

                match kind {
                    ChecksumKind::Sha1 => entry.sha1 = Some(extra.digest),
                    ChecksumKind::Sha256 => entry.sha256 = Some(extra.digest),
                    ChecksumKind::Md5 => unreachable!("Files is the MD5 list"),
                }
            }
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, indoc::indoc};

    const CHANGES: &str = indoc! {"
        Format: 1.8
        Date: Tue, 11 Jan 2022 09:10:00 +0000
        Source: widget
        Binary: widget
        Architecture: source
        Version: 1.0-1
        Distribution: focal
        Maintainer: Widget Makers <widgets@example.com>
        Changed-By: A. Publisher <publisher@example.com>
        Files:
         6f5902ac237024bdd0c176cb93063dc4 12 devel optional widget_1.0-1.dsc
        Checksums-Sha256:
         a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447 12 widget_1.0-1.dsc
    "};

    #[test]
    fn parse_unsigned_manifest() -> Result<()> {
        let manifest = UploadManifest::parse(CHANGES.as_bytes())?;

        assert!(manifest.signatures().is_none());
        assert_eq!(manifest.source()?, "widget");
        assert_eq!(manifest.version_str()?, "1.0-1");
        assert_eq!(manifest.version()?.revision(), Some("1"));
        assert_eq!(manifest.architectures()?, vec!["source"]);
        assert_eq!(manifest.distribution()?, "focal");
        assert_eq!(
            manifest.maintainer()?,
            "Widget Makers <widgets@example.com>"
        );
        assert_eq!(
            manifest.changed_by(),
            Some("A. Publisher <publisher@example.com>")
        );
        assert_eq!(manifest.binary(), Some(vec!["widget"]));

        Ok(())
    }

    #[test]
    fn file_entries_merge_checksums() -> Result<()> {
        let manifest = UploadManifest::parse(CHANGES.as_bytes())?;

        let entries = manifest.file_entries()?;
        assert_eq!(entries.len(), 1);

        let entry = &entries[0];
        assert_eq!(entry.filename, "widget_1.0-1.dsc");
        assert_eq!(entry.size, 12);
        assert_eq!(entry.section, "devel");
        assert_eq!(entry.priority, "optional");
        assert_eq!(entry.component(), "main");
        assert_eq!(entry.md5.digest_hex(), "6f5902ac237024bdd0c176cb93063dc4");
        assert!(entry.sha1.is_none());
        assert_eq!(
            entry.sha256.as_ref().unwrap().digest_hex(),
            "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447"
        );
        assert_eq!(entry.iter_digests().count(), 2);

        Ok(())
    }

    #[test]
    fn component_from_section() -> Result<()> {
        let changes = CHANGES.replace(" devel ", " universe/devel ");
        let manifest = UploadManifest::parse(changes.as_bytes())?;

        assert_eq!(manifest.files()?[0].component(), "universe");

        Ok(())
    }

    #[test]
    fn stray_checksum_entry_is_rejected() {
        let changes = CHANGES.replace("12 widget_1.0-1.dsc\n", "12 other_2.0.dsc\n");
        let manifest = UploadManifest::parse(changes.as_bytes()).unwrap();

        assert!(matches!(
            manifest.file_entries(),
            Err(IngestError::ChecksumForUndeclaredFile(_))
        ));
    }

    #[test]
    fn missing_mandatory_field() {
        let manifest = UploadManifest::parse(b"Source: widget\n").unwrap();

        assert!(matches!(
            manifest.version_str(),
            Err(IngestError::ControlRequiredFieldMissing(_))
        ));
    }
}
