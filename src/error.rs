// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling and the rejection findings taxonomy.

Two distinct failure channels exist in this crate. [IngestError] is for
operational trouble: I/O faults, malformed inputs surfaced by low-level
parsers, and collaborator (catalog/directory) failures. Content problems with
an upload are not errors; they are [Finding]s accumulated on the upload and
reported with its disposition.
*/

use {crate::version::VersionError, thiserror::Error};

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("hex parsing error: {0:?}")]
    Hex(#[from] hex::FromHexError),

    #[error("PGP error: {0:?}")]
    Pgp(#[from] pgp::errors::Error),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("version string error: {0}")]
    Version(#[from] VersionError),

    #[error("control file parse error: {0}")]
    ControlParse(String),

    #[error("control file lacks a paragraph")]
    ControlFileNoParagraph,

    #[error("expected 1 paragraph in control file; got {0}")]
    ControlParagraphMismatch(usize),

    #[error("required control field missing: {0}")]
    ControlRequiredFieldMissing(String),

    #[error("digest missing from file list entry")]
    FileEntryMissingDigest,

    #[error("size missing from file list entry")]
    FileEntryMissingSize,

    #[error("path missing from file list entry")]
    FileEntryMissingPath,

    #[error("file list entry unexpectedly has spaces: {0}")]
    FileEntryPathWithSpaces(String),

    #[error("checksum list references undeclared file: {0}")]
    ChecksumForUndeclaredFile(String),

    #[error("unrecognized artifact filename: {0}")]
    UnclassifiableFilename(String),

    #[error("unknown compression in package archive member: {0}")]
    DebUnknownCompression(String),

    #[error("package archive lacks a control member")]
    DebMissingControlMember,

    #[error("unknown source format: {0}")]
    UnknownSourceFormat(String),

    #[error("policy requires a caller-supplied series")]
    SeriesNotSupplied,

    #[error("catalog failure: {0}")]
    Catalog(#[from] crate::catalog::CatalogError),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Severity of a single finding attached to an upload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    /// Contributes to a rejection.
    Error,
    /// Reported but never blocks acceptance.
    Warning,
}

/// Machine-readable rejection/warning reason codes.
///
/// Each content problem maps to a distinct code rather than a generic error
/// so reports and tests can discriminate causes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum_macros::Display)]
pub enum RejectCode {
    /// The staging directory or a staged file could not be read.
    UnreadableUpload,
    /// The manifest or an embedded control file failed to parse.
    MalformedManifest,
    /// A measured digest or size disagrees with a declared one.
    ChecksumMismatch,
    /// A filename matches no recognized artifact kind.
    UnknownFileType,
    /// A declared file is absent from the staging directory.
    MissingFile,
    /// The manifest's declared series disagrees with the caller-fixed series.
    SeriesMismatch,
    /// The source description and manifest disagree on name or version.
    VersionMismatch,
    /// Policy requires a signature and none is present.
    MissingSignature,
    /// A signature is present but does not verify.
    InvalidSignature,
    /// The signing key resolves to no known identity.
    UnknownKey,
    /// The resolved identity holds no matching upload permission.
    Denied,
    /// The target archive kind never accepts uploads.
    ArchiveForbidsUploads,
    /// A built package's architecture is not in the declared list.
    ArchitectureMismatch,
    /// Sourceful and binaryful artifacts mixed where the profile forbids it.
    MixedUpload,
    /// The profile does not accept this upload kind at all.
    UploadKindForbidden,
    /// A required original tarball is neither present nor already cataloged.
    MissingOriginal,
    /// The catalog already holds this (package, version, archive, series).
    DuplicateVersion,
    /// The source description carries no copyright metadata.
    MissingCopyright,
}

/// One severity-classified problem or observation about an upload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Finding {
    pub severity: Severity,
    pub code: RejectCode,
    pub text: String,
}

impl Finding {
    /// Construct an error-severity finding.
    pub fn error(code: RejectCode, text: impl ToString) -> Self {
        Self {
            severity: Severity::Error,
            code,
            text: text.to_string(),
        }
    }

    /// Construct a warning-severity finding.
    pub fn warning(code: RejectCode, text: impl ToString) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            text: text.to_string(),
        }
    }

    /// Whether this finding blocks acceptance.
    pub fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };

        write!(f, "{}[{}]: {}", tag, self.code, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finding_display() {
        let finding = Finding::error(RejectCode::ChecksumMismatch, "foo_1.0.dsc digest mismatch");
        assert_eq!(
            finding.to_string(),
            "error[ChecksumMismatch]: foo_1.0.dsc digest mismatch"
        );
        assert!(finding.is_error());

        let finding = Finding::warning(RejectCode::MissingCopyright, "no copyright metadata");
        assert!(!finding.is_error());
    }
}
