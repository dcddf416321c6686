// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Artifact classification and structural validation.

Every file an upload manifest declares is classified into a closed set of
kinds by filename convention, then subjected to a kind-specific structural
check. Classification is pure; structural checks read the staged bytes but
never execute content from them.
*/

use {
    crate::{
        control::{parse_single_paragraph, Paragraph},
        error::{IngestError, Result},
    },
    once_cell::sync::Lazy,
    regex::Regex,
    std::{
        fs::File,
        io::Read,
        path::Path,
    },
};

/// Architecture tags a built package may carry.
pub const KNOWN_ARCHITECTURES: &[&str] = &[
    "all",
    "amd64",
    "arm64",
    "armel",
    "armhf",
    "i386",
    "mips64el",
    "mipsel",
    "powerpc",
    "ppc64el",
    "riscv64",
    "s390x",
];

/// `<package>_<version>_<architecture>.deb` / `.udeb`.
static DEB_FILENAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z0-9][a-z0-9.+-]*)_([^_/]+)_([a-z0-9-]+)\.(deb|udeb)$")
        .expect("static regex should compile")
});

/// The closed set of artifact kinds.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum_macros::Display)]
pub enum ArtifactKind {
    /// The embedded source description control file (`.dsc`).
    SourceDescription,
    /// A pristine upstream tarball (`.orig.tar.*`).
    OriginalTarball,
    /// A packaging diff or packaging archive (`.diff.gz`, `.debian.tar.*`).
    DiffPatch,
    /// A single tarball for native-format sources (plain `.tar.*`).
    NativeTarball,
    /// A built binary package (`.deb`, `.udeb`).
    BuiltPackage,
}

impl ArtifactKind {
    /// Whether this kind is part of a source artifact set.
    pub fn is_sourceful(&self) -> bool {
        !matches!(self, Self::BuiltPackage)
    }

    /// Whether this kind is a built binary.
    pub fn is_binaryful(&self) -> bool {
        matches!(self, Self::BuiltPackage)
    }
}

/// Components of a built package filename.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DebFilenameParts {
    pub package: String,
    pub version: String,
    pub architecture: String,
}

/// Classify a declared filename into an [ArtifactKind].
///
/// Unrecognized names are an error; the caller reports them as a structural
/// rejection.
pub fn classify_filename(filename: &str) -> Result<ArtifactKind> {
    if filename.ends_with(".dsc") {
        Ok(ArtifactKind::SourceDescription)
    } else if filename.ends_with(".deb") || filename.ends_with(".udeb") {
        Ok(ArtifactKind::BuiltPackage)
    } else if filename.contains(".orig.tar") {
        Ok(ArtifactKind::OriginalTarball)
    } else if filename.ends_with(".diff.gz") || filename.contains(".debian.tar") {
        Ok(ArtifactKind::DiffPatch)
    } else if filename.contains(".tar") {
        Ok(ArtifactKind::NativeTarball)
    } else {
        Err(IngestError::UnclassifiableFilename(filename.to_string()))
    }
}

/// Parse the name/version/architecture parts embedded in a `.deb` filename.
pub fn parse_deb_filename(filename: &str) -> Result<DebFilenameParts> {
    let captures = DEB_FILENAME_RE
        .captures(filename)
        .ok_or_else(|| IngestError::UnclassifiableFilename(filename.to_string()))?;

    Ok(DebFilenameParts {
        package: captures[1].to_string(),
        version: captures[2].to_string(),
        architecture: captures[3].to_string(),
    })
}

/// Kind-specific facts established by a structural check.
#[derive(Debug, Default)]
pub struct ArtifactDetails {
    /// The control paragraph extracted from a built package.
    pub control: Option<Paragraph>,
    /// The architecture a built package targets.
    pub architecture: Option<String>,
}

/// Run the structural check for one staged artifact.
///
/// The caller has already verified declared-vs-measured digests; this only
/// establishes that the container is well formed and extracts kind-specific
/// metadata. Source descriptions are parsed by the pipeline itself (their
/// signature handling is policy dependent) and only checked for presence
/// here.
pub fn validate_structure(path: &Path, filename: &str, kind: ArtifactKind) -> Result<ArtifactDetails> {
    match kind {
        ArtifactKind::SourceDescription => Ok(ArtifactDetails::default()),
        ArtifactKind::BuiltPackage => {
            let parts = parse_deb_filename(filename)?;
            let control = read_deb_control(path)?;

            let architecture = control.required_field_str("Architecture")?.to_string();
            if !KNOWN_ARCHITECTURES.contains(&architecture.as_str()) {
                return Err(IngestError::ControlParse(format!(
                    "{}: unrecognized architecture {}",
                    filename, architecture
                )));
            }

            // The filename tag and the embedded metadata must agree.
            if architecture != parts.architecture {
                return Err(IngestError::ControlParse(format!(
                    "{}: control architecture {} disagrees with filename",
                    filename, architecture
                )));
            }
            if control.required_field_str("Package")? != parts.package {
                return Err(IngestError::ControlParse(format!(
                    "{}: control package name disagrees with filename",
                    filename
                )));
            }
            if control.required_field_str("Version")? != parts.version {
                return Err(IngestError::ControlParse(format!(
                    "{}: control version disagrees with filename",
                    filename
                )));
            }

            Ok(ArtifactDetails {
                control: Some(control),
                architecture: Some(architecture),
            })
        }
        ArtifactKind::DiffPatch if filename.ends_with(".diff.gz") => {
            // A diff is a gzip member, not a tar archive.
            let mut decoder = libflate::gzip::Decoder::new(File::open(path)?)?;
            std::io::copy(&mut decoder, &mut std::io::sink())?;
            Ok(ArtifactDetails::default())
        }
        ArtifactKind::OriginalTarball | ArtifactKind::DiffPatch | ArtifactKind::NativeTarball => {
            check_tarball(path, filename)?;
            Ok(ArtifactDetails::default())
        }
    }
}

/// Extract the control paragraph from a built package without executing
/// anything from it.
///
/// A `.deb` is an `ar` archive holding a `debian-binary` marker, a
/// `control.tar*` member and a `data.tar*` member. Only the control member
/// is read.
pub fn read_deb_control(path: &Path) -> Result<Paragraph> {
    let mut archive = ar::Archive::new(File::open(path)?);

    while let Some(entry) = archive.next_entry() {
        let mut entry = entry?;
        let member = String::from_utf8_lossy(entry.header().identifier()).to_string();

        let suffix = match member.strip_prefix("control.tar") {
            Some(suffix) => suffix.to_string(),
            None => continue,
        };

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;

        let reader = decompress_member(std::io::Cursor::new(data), &suffix)?;
        let mut tar = tar::Archive::new(reader);

        for tar_entry in tar.entries()? {
            let mut tar_entry = tar_entry?;
            let entry_path = tar_entry.path()?;

            if entry_path.to_string_lossy().trim_start_matches("./") == "control" {
                let mut content = Vec::new();
                tar_entry.read_to_end(&mut content)?;

                return parse_single_paragraph(std::io::Cursor::new(content));
            }
        }

        return Err(IngestError::DebMissingControlMember);
    }

    Err(IngestError::DebMissingControlMember)
}

/// Verify that a tarball opens and its entries enumerate without error.
pub fn check_tarball(path: &Path, filename: &str) -> Result<()> {
    let suffix = match filename.rsplit_once(".tar") {
        Some((_, suffix)) => suffix,
        None => return Err(IngestError::UnclassifiableFilename(filename.to_string())),
    };

    let reader = decompress_member(File::open(path)?, suffix)?;
    let mut tar = tar::Archive::new(reader);

    for entry in tar.entries()? {
        entry?;
    }

    Ok(())
}

/// Wrap a reader with decompression selected by filename suffix.
fn decompress_member<'a, R: Read + 'a>(reader: R, suffix: &str) -> Result<Box<dyn Read + 'a>> {
    Ok(match suffix {
        "" => Box::new(reader),
        ".gz" => Box::new(libflate::gzip::Decoder::new(reader)?),
        ".xz" => Box::new(xz2::read::XzDecoder::new(reader)),
        ".zst" => Box::new(zstd::stream::read::Decoder::new(reader)?),
        other => return Err(IngestError::DebUnknownCompression(other.to_string())),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Cursor;

    pub fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = libflate::gzip::Encoder::new(Vec::new()).unwrap();
        std::io::copy(&mut Cursor::new(data), &mut encoder).unwrap();
        encoder.finish().into_result().unwrap()
    }

    pub fn tarball_with(path: &str, content: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, content).unwrap();
        builder.into_inner().unwrap()
    }

    /// Build a minimal well-formed `.deb` holding the given control paragraph.
    pub fn build_deb(control: &str) -> Vec<u8> {
        let control_tar = gzip(&tarball_with("./control", control.as_bytes()));
        let data_tar = gzip(&tarball_with("./usr/share/doc/placeholder", b""));

        let mut out = Vec::new();
        {
            let mut builder = ar::Builder::new(&mut out);

            let data: &[u8] = b"2.0\n";
            let header = ar::Header::new(b"debian-binary".to_vec(), data.len() as u64);
            builder.append(&header, data).unwrap();

            let header = ar::Header::new(b"control.tar.gz".to_vec(), control_tar.len() as u64);
            builder.append(&header, &*control_tar).unwrap();

            let header = ar::Header::new(b"data.tar.gz".to_vec(), data_tar.len() as u64);
            builder.append(&header, &*data_tar).unwrap();
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::{
        test_support::{build_deb, gzip, tarball_with},
        *,
    };

    #[test]
    fn classification_table() -> Result<()> {
        for (filename, kind) in [
            ("widget_1.0-1.dsc", ArtifactKind::SourceDescription),
            ("widget_1.0.orig.tar.gz", ArtifactKind::OriginalTarball),
            ("widget_1.0.orig.tar.xz", ArtifactKind::OriginalTarball),
            ("widget_1.0-1.diff.gz", ArtifactKind::DiffPatch),
            ("widget_1.0-1.debian.tar.xz", ArtifactKind::DiffPatch),
            ("widget_1.0.tar.gz", ArtifactKind::NativeTarball),
            ("widget_1.0-1_amd64.deb", ArtifactKind::BuiltPackage),
            ("widget-udeb_1.0-1_i386.udeb", ArtifactKind::BuiltPackage),
        ] {
            assert_eq!(classify_filename(filename)?, kind, "{}", filename);
        }

        assert!(matches!(
            classify_filename("README.txt"),
            Err(IngestError::UnclassifiableFilename(_))
        ));

        Ok(())
    }

    #[test]
    fn sourceful_binaryful_split() {
        assert!(ArtifactKind::SourceDescription.is_sourceful());
        assert!(ArtifactKind::OriginalTarball.is_sourceful());
        assert!(!ArtifactKind::BuiltPackage.is_sourceful());
        assert!(ArtifactKind::BuiltPackage.is_binaryful());
    }

    #[test]
    fn deb_filename_parts() -> Result<()> {
        let parts = parse_deb_filename("libwidget1_2:1.0-1_ppc64el.deb")?;
        assert_eq!(parts.package, "libwidget1");
        assert_eq!(parts.version, "2:1.0-1");
        assert_eq!(parts.architecture, "ppc64el");

        assert!(parse_deb_filename("not-a-deb.tar.gz").is_err());
        assert!(parse_deb_filename("missing_arch.deb").is_err());

        Ok(())
    }

    const CONTROL: &str = "Package: widget\nVersion: 1.0-1\nArchitecture: amd64\nMaintainer: W <w@example.com>\nDescription: a widget\n";

    #[test]
    fn read_control_from_deb() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("widget_1.0-1_amd64.deb");
        std::fs::write(&path, build_deb(CONTROL))?;

        let details = validate_structure(&path, "widget_1.0-1_amd64.deb", ArtifactKind::BuiltPackage)?;
        assert_eq!(details.architecture.as_deref(), Some("amd64"));
        assert_eq!(
            details.control.unwrap().field_str("Package"),
            Some("widget")
        );

        Ok(())
    }

    #[test]
    fn deb_architecture_must_match_filename() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("widget_1.0-1_i386.deb");
        std::fs::write(&path, build_deb(CONTROL))?;

        assert!(validate_structure(&path, "widget_1.0-1_i386.deb", ArtifactKind::BuiltPackage).is_err());

        Ok(())
    }

    #[test]
    fn unknown_architecture_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let control = CONTROL.replace("amd64", "vax");
        let path = dir.path().join("widget_1.0-1_vax.deb");
        std::fs::write(&path, build_deb(&control))?;

        assert!(validate_structure(&path, "widget_1.0-1_vax.deb", ArtifactKind::BuiltPackage).is_err());

        Ok(())
    }

    #[test]
    fn tarball_check_accepts_well_formed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("widget_1.0.orig.tar.gz");
        std::fs::write(&path, gzip(&tarball_with("widget-1.0/README", b"hi")))?;

        validate_structure(&path, "widget_1.0.orig.tar.gz", ArtifactKind::OriginalTarball)?;

        Ok(())
    }

    #[test]
    fn tarball_check_rejects_garbage() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("widget_1.0.orig.tar.gz");
        std::fs::write(&path, b"this is not a gzip stream")?;

        assert!(
            validate_structure(&path, "widget_1.0.orig.tar.gz", ArtifactKind::OriginalTarball)
                .is_err()
        );

        Ok(())
    }

    #[test]
    fn diff_is_checked_as_gzip_member() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("widget_1.0-1.diff.gz");
        std::fs::write(&path, gzip(b"--- a/file\n+++ b/file\n"))?;

        validate_structure(&path, "widget_1.0-1.diff.gz", ArtifactKind::DiffPatch)?;

        Ok(())
    }
}
