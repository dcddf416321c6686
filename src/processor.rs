// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The upload ingestion pipeline.

[UploadProcessor::process] drives a staged upload from manifest discovery to
a final disposition. Stages run in a fixed order; a stage collects every
finding it can before the pipeline stops, but no later stage runs once an
earlier one has produced an error finding. The duplicate-version check is the
last gate and is re-run atomically inside the catalog commit, so a race
between two uploads of the same version admits exactly one.
*/

use {
    crate::{
        archive::{check_authorization, AccessDecision, Archive, Identity},
        artifact::{classify_filename, validate_structure, ArtifactDetails, ArtifactKind},
        catalog::{
            BinaryReleaseIntent, Catalog, CommitOutcome, CommitReceipt, CommitRequest,
            QueueDisposition, ReleaseKey, SourceReleaseIntent,
        },
        checksum::digest_path,
        error::{Finding, IngestError, RejectCode, Result},
        manifest::{ManifestFileEntry, UploadManifest},
        policy::UploadPolicy,
        signature::{resolve_and_verify, SignatureOutcome, TrustTier},
        source_description::SourceDescription,
    },
    std::path::{Path, PathBuf},
};

/// Final disposition of a processed upload.
#[derive(Debug)]
pub enum Disposition {
    /// The upload was committed to the catalog.
    Accepted(CommitReceipt),
    Rejected,
    /// The upload passed every check but is routed to manual review.
    Held,
}

/// The result of running the pipeline over one staged upload.
#[derive(Debug)]
pub struct ProcessedUpload {
    pub disposition: Disposition,
    pub findings: Vec<Finding>,
}

impl ProcessedUpload {
    pub fn is_accepted(&self) -> bool {
        matches!(self.disposition, Disposition::Accepted(_))
    }

    /// Whether any finding carries the given code.
    pub fn has_finding(&self, code: RejectCode) -> bool {
        self.findings.iter().any(|finding| finding.code == code)
    }
}

/// Fields pulled out of the manifest once, up front. Any extraction failure
/// is a malformed manifest.
struct ManifestFacts {
    source: String,
    version: String,
    distribution: String,
    architectures: Vec<String>,
    entries: Vec<ManifestFileEntry>,
}

impl ManifestFacts {
    fn extract(manifest: &UploadManifest) -> Result<Self> {
        // Validate the version string even though only its text is kept.
        manifest.version()?;

        Ok(Self {
            source: manifest.source()?.to_string(),
            version: manifest.version_str()?.to_string(),
            distribution: manifest.distribution()?.to_string(),
            architectures: manifest
                .architectures()?
                .into_iter()
                .map(ToString::to_string)
                .collect(),
            entries: manifest.file_entries()?,
        })
    }
}

/// One declared file that survived structural validation.
struct ValidatedArtifact {
    entry: ManifestFileEntry,
    path: PathBuf,
    kind: ArtifactKind,
    details: ArtifactDetails,
}

/// Drives staged uploads to a disposition against a fixed archive and policy.
pub struct UploadProcessor<'a, C: Catalog + ?Sized> {
    catalog: &'a C,
    policy: UploadPolicy,
    archive: Archive,
}

impl<'a, C: Catalog + ?Sized> UploadProcessor<'a, C> {
    pub fn new(catalog: &'a C, policy: UploadPolicy, archive: Archive) -> Self {
        Self {
            catalog,
            policy,
            archive,
        }
    }

    /// Process the upload staged in `staging`.
    ///
    /// `series` is the caller-supplied target series. Profiles with a
    /// caller-fixed series require it; otherwise the manifest's declared
    /// series is used and a supplied value merely cross-checks it.
    pub fn process(&self, staging: &Path, series: Option<&str>) -> Result<ProcessedUpload> {
        let mut findings = Vec::new();

        // Locate and parse the manifest.
        let manifest = match self.load_manifest(staging, &mut findings)? {
            Some(manifest) => manifest,
            None => return self.reject(findings),
        };

        let facts = match ManifestFacts::extract(&manifest) {
            Ok(facts) => facts,
            Err(e) => {
                findings.push(Finding::error(RejectCode::MalformedManifest, e));
                return self.reject(findings);
            }
        };

        log::info!(
            "processing upload of {} {} for archive {}",
            facts.source,
            facts.version,
            self.archive.name
        );

        // Resolve the target series.
        let series = if self.policy.series_fixed_by_caller {
            let series = series.ok_or(IngestError::SeriesNotSupplied)?;
            if facts.distribution != series {
                findings.push(Finding::error(
                    RejectCode::SeriesMismatch,
                    format!(
                        "manifest targets {} but this run only accepts {}",
                        facts.distribution, series
                    ),
                ));
            }
            series.to_string()
        } else {
            if let Some(series) = series {
                if facts.distribution != series {
                    findings.push(Finding::error(
                        RejectCode::SeriesMismatch,
                        format!(
                            "manifest targets {} but the caller requested {}",
                            facts.distribution, series
                        ),
                    ));
                }
            }
            facts.distribution.clone()
        };
        if findings.iter().any(Finding::is_error) {
            return self.reject(findings);
        }

        // Validate every declared file.
        let artifacts = self.validate_files(staging, &facts.entries, &mut findings)?;
        if findings.iter().any(Finding::is_error) {
            return self.reject(findings);
        }

        // Parse the source description, when the upload carries one.
        let description = match self.load_description(&artifacts) {
            Ok(description) => description,
            Err(e) => {
                findings.push(Finding::error(RejectCode::MalformedManifest, e));
                return self.reject(findings);
            }
        };
        if findings.iter().any(Finding::is_error) {
            return self.reject(findings);
        }

        // Verify signatures and resolve signer identities.
        let signers = self.verify_signatures(&manifest, description.as_ref(), &mut findings)?;
        if findings.iter().any(Finding::is_error) {
            return self.reject(findings);
        }

        // Authorize.
        self.authorize(&facts, &signers, &mut findings)?;
        if findings.iter().any(Finding::is_error) {
            return self.reject(findings);
        }

        // Cross-check internal consistency.
        self.cross_check(&facts, &artifacts, description.as_ref(), &mut findings)?;
        if findings.iter().any(Finding::is_error) {
            return self.reject(findings);
        }

        // Manual review gate.
        if self
            .catalog
            .requires_manual_review(&facts.source, &self.archive.name)?
        {
            log::info!("holding {} {} for manual review", facts.source, facts.version);
            self.catalog
                .create_queue_entry(QueueDisposition::Held, &findings)?;

            return Ok(ProcessedUpload {
                disposition: Disposition::Held,
                findings,
            });
        }

        // Duplicate gate and commit.
        let release = ReleaseKey {
            package: facts.source.clone(),
            version: facts.version.clone(),
            archive: self.archive.name.clone(),
            series,
        };

        if self.catalog.existing_release(&release)? {
            findings.push(Finding::error(
                RejectCode::DuplicateVersion,
                format!("{} {} is already published", facts.source, facts.version),
            ));
            return self.reject(findings);
        }

        let request = self.commit_request(release, &artifacts, &findings);
        match self.catalog.commit_upload(request)? {
            CommitOutcome::Committed(receipt) => {
                log::info!("accepted {} {}", facts.source, facts.version);
                Ok(ProcessedUpload {
                    disposition: Disposition::Accepted(receipt),
                    findings,
                })
            }
            CommitOutcome::DuplicateVersion => {
                // Lost the race to a concurrent upload of the same version.
                findings.push(Finding::error(
                    RejectCode::DuplicateVersion,
                    format!("{} {} is already published", facts.source, facts.version),
                ));
                self.reject(findings)
            }
        }
    }

    fn reject(&self, findings: Vec<Finding>) -> Result<ProcessedUpload> {
        for finding in findings.iter().filter(|f| f.is_error()) {
            log::warn!("rejecting upload: {}", finding);
        }

        self.catalog
            .create_queue_entry(QueueDisposition::Rejected, &findings)?;

        Ok(ProcessedUpload {
            disposition: Disposition::Rejected,
            findings,
        })
    }

    /// Find the single manifest in the staging directory and parse it.
    fn load_manifest(
        &self,
        staging: &Path,
        findings: &mut Vec<Finding>,
    ) -> Result<Option<UploadManifest>> {
        let dir = match std::fs::read_dir(staging) {
            Ok(dir) => dir,
            Err(e) => {
                findings.push(Finding::error(
                    RejectCode::UnreadableUpload,
                    format!("{}: {}", staging.display(), e),
                ));
                return Ok(None);
            }
        };

        let mut candidates = Vec::new();
        for entry in dir {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".changes") {
                candidates.push(entry.path());
            }
        }

        let path = match candidates.as_slice() {
            [path] => path.clone(),
            [] => {
                findings.push(Finding::error(
                    RejectCode::MalformedManifest,
                    "staging directory holds no manifest",
                ));
                return Ok(None);
            }
            _ => {
                findings.push(Finding::error(
                    RejectCode::MalformedManifest,
                    "staging directory holds more than one manifest",
                ));
                return Ok(None);
            }
        };

        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                findings.push(Finding::error(
                    RejectCode::UnreadableUpload,
                    format!("{}: {}", path.display(), e),
                ));
                return Ok(None);
            }
        };

        match UploadManifest::parse(&data) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                findings.push(Finding::error(RejectCode::MalformedManifest, e));
                Ok(None)
            }
        }
    }

    /// Classify, measure and structurally check every declared file.
    ///
    /// Collects findings for every bad file instead of stopping at the
    /// first; the semantic checks only run for files whose measured digests
    /// agree with every declared flavor.
    fn validate_files(
        &self,
        staging: &Path,
        entries: &[ManifestFileEntry],
        findings: &mut Vec<Finding>,
    ) -> Result<Vec<ValidatedArtifact>> {
        let mut artifacts = Vec::new();

        for entry in entries {
            // Declared names must be bare filenames.
            if entry.filename.contains('/') || entry.filename.contains("..") {
                findings.push(Finding::error(
                    RejectCode::MalformedManifest,
                    format!("{} is not a bare filename", entry.filename),
                ));
                continue;
            }

            let kind = match classify_filename(&entry.filename) {
                Ok(kind) => kind,
                Err(e) => {
                    findings.push(Finding::error(RejectCode::UnknownFileType, e));
                    continue;
                }
            };

            let path = staging.join(&entry.filename);
            if !path.is_file() {
                findings.push(Finding::error(
                    RejectCode::MissingFile,
                    format!("{} is declared but not staged", entry.filename),
                ));
                continue;
            }

            let (measured, size) = digest_path(&path)?;
            if size != entry.size {
                findings.push(Finding::error(
                    RejectCode::ChecksumMismatch,
                    format!(
                        "{}: declared {} bytes; measured {}",
                        entry.filename, entry.size, size
                    ),
                ));
                continue;
            }
            if let Some(declared) = entry
                .iter_digests()
                .find(|declared| !measured.matches_digest(declared))
            {
                findings.push(Finding::error(
                    RejectCode::ChecksumMismatch,
                    format!(
                        "{}: declared {:?} does not match content",
                        entry.filename, declared
                    ),
                ));
                continue;
            }

            match validate_structure(&path, &entry.filename, kind) {
                Ok(details) => artifacts.push(ValidatedArtifact {
                    entry: entry.clone(),
                    path,
                    kind,
                    details,
                }),
                Err(e @ IngestError::ControlParse(_)) => {
                    findings.push(Finding::error(RejectCode::MalformedManifest, e));
                }
                Err(e) => {
                    findings.push(Finding::error(
                        RejectCode::UnreadableUpload,
                        format!("{}: {}", entry.filename, e),
                    ));
                }
            }
        }

        Ok(artifacts)
    }

    fn load_description(&self, artifacts: &[ValidatedArtifact]) -> Result<Option<SourceDescription>> {
        let artifact = match artifacts
            .iter()
            .find(|a| a.kind == ArtifactKind::SourceDescription)
        {
            Some(artifact) => artifact,
            None => return Ok(None),
        };

        let data = std::fs::read(&artifact.path)?;

        Ok(Some(SourceDescription::parse(&data)?))
    }

    /// Verify the manifest and description signatures per policy.
    ///
    /// Returns the resolved signer identities. An empty result with no error
    /// findings means the profile trusts unsigned uploads.
    fn verify_signatures(
        &self,
        manifest: &UploadManifest,
        description: Option<&SourceDescription>,
        findings: &mut Vec<Finding>,
    ) -> Result<Vec<(Identity, TrustTier)>> {
        let mut signers: Vec<(Identity, TrustTier)> = Vec::new();

        let handle = |signatures, what: &str,
                          findings: &mut Vec<Finding>,
                          signers: &mut Vec<(Identity, TrustTier)>|
         -> Result<()> {
            match resolve_and_verify(signatures, self.catalog)? {
                SignatureOutcome::Valid { identity, tier } => {
                    if !signers.iter().any(|(known, _)| known.id == identity.id) {
                        signers.push((identity, tier));
                    }
                }
                SignatureOutcome::Invalid(reason) => {
                    findings.push(Finding::error(
                        RejectCode::InvalidSignature,
                        format!("{}: {}", what, reason),
                    ));
                }
                SignatureOutcome::UnknownKey(fingerprint) => {
                    findings.push(Finding::error(
                        RejectCode::UnknownKey,
                        format!("{}: no identity registered for key {}", what, fingerprint),
                    ));
                }
                SignatureOutcome::NoSignature => {
                    findings.push(Finding::error(
                        RejectCode::MissingSignature,
                        format!("{}: signature envelope holds no signature", what),
                    ));
                }
            }

            Ok(())
        };

        match manifest.signatures() {
            Some(signatures) => handle(signatures, "manifest", findings, &mut signers)?,
            None if self.policy.requires_signature => {
                findings.push(Finding::error(
                    RejectCode::MissingSignature,
                    "manifest is unsigned",
                ));
            }
            None => {}
        }

        if let Some(description) = description {
            match description.signatures() {
                Some(signatures) => {
                    handle(signatures, "source description", findings, &mut signers)?
                }
                None if self.policy.requires_signature => {
                    findings.push(Finding::error(
                        RejectCode::MissingSignature,
                        "source description is unsigned",
                    ));
                }
                None => {}
            }
        }

        Ok(signers)
    }

    /// Check upload rights for the resolved signers.
    ///
    /// Every resolved signer must hold a matching grant; the manifest and
    /// the source description may be signed by different keys and an
    /// unauthorized one taints the whole upload. Profiles trusting unsigned
    /// uploads skip the rule check, but a copy archive denies everyone.
    fn authorize(
        &self,
        facts: &ManifestFacts,
        signers: &[(Identity, TrustTier)],
        findings: &mut Vec<Finding>,
    ) -> Result<()> {
        if !self.archive.accepts_uploads() {
            findings.push(Finding::error(
                RejectCode::ArchiveForbidsUploads,
                format!("archive {} never accepts uploads", self.archive.name),
            ));
            return Ok(());
        }

        if signers.is_empty() {
            return Ok(());
        }

        let rules = self.catalog.find_permissions(&self.archive.name)?;
        let components = self.components(&facts.entries);

        for (identity, _) in signers {
            if let AccessDecision::Denied(reason) = check_authorization(
                identity,
                &self.archive,
                Some(&facts.source),
                &components,
                &rules,
            ) {
                findings.push(Finding::error(RejectCode::Denied, reason));
            }
        }

        Ok(())
    }

    fn components(&self, entries: &[ManifestFileEntry]) -> Vec<String> {
        let mut components = Vec::new();
        for entry in entries {
            let component = entry.component().to_string();
            if !components.contains(&component) {
                components.push(component);
            }
        }

        components
    }

    /// Consistency checks across the manifest, artifacts and description.
    fn cross_check(
        &self,
        facts: &ManifestFacts,
        artifacts: &[ValidatedArtifact],
        description: Option<&SourceDescription>,
        findings: &mut Vec<Finding>,
    ) -> Result<()> {
        let has_source = artifacts.iter().any(|a| a.kind.is_sourceful());
        let has_binary = artifacts.iter().any(|a| a.kind.is_binaryful());

        if has_source && !self.policy.accepts_source {
            findings.push(Finding::error(
                RejectCode::UploadKindForbidden,
                format!("the {} profile does not accept source uploads", self.policy.kind),
            ));
        }
        if has_binary && !self.policy.accepts_binaries {
            findings.push(Finding::error(
                RejectCode::UploadKindForbidden,
                format!("the {} profile does not accept binary uploads", self.policy.kind),
            ));
        }
        if has_source && has_binary && self.policy.forbids_mixed() {
            findings.push(Finding::error(
                RejectCode::MixedUpload,
                "upload mixes source and binary artifacts",
            ));
        }

        for artifact in artifacts {
            if let Some(architecture) = &artifact.details.architecture {
                // The manifest's architecture list carries concrete tags; an
                // `any` entry is not a wildcard and matches nothing built.
                if !facts.architectures.iter().any(|a| a == architecture) {
                    findings.push(Finding::error(
                        RejectCode::ArchitectureMismatch,
                        format!(
                            "{} targets {} which the manifest does not declare",
                            artifact.entry.filename, architecture
                        ),
                    ));
                }
            }
        }

        if let Some(description) = description {
            self.cross_check_description(facts, artifacts, description, findings)?;
        }

        Ok(())
    }

    fn cross_check_description(
        &self,
        facts: &ManifestFacts,
        artifacts: &[ValidatedArtifact],
        description: &SourceDescription,
        findings: &mut Vec<Finding>,
    ) -> Result<()> {
        if description.source()? != facts.source || description.version_str()? != facts.version {
            findings.push(Finding::error(
                RejectCode::VersionMismatch,
                format!(
                    "source description is for {} {}; manifest declares {} {}",
                    description.source()?,
                    description.version_str()?,
                    facts.source,
                    facts.version
                ),
            ));
        }

        if description.requires_original()? {
            match description.original_tarball()? {
                Some(original) => {
                    let staged = artifacts
                        .iter()
                        .any(|a| a.entry.filename == original.filename);

                    if !staged {
                        // Absent from the upload; an identical tarball
                        // already published for this package satisfies the
                        // requirement.
                        let digest_hex = description
                            .checksums_sha256()
                            .transpose()?
                            .unwrap_or_default()
                            .into_iter()
                            .find(|e| e.filename == original.filename)
                            .map(|e| e.digest.digest_hex())
                            .unwrap_or_else(|| original.digest.digest_hex());

                        if !self.catalog.known_source_file(
                            &facts.source,
                            &original.filename,
                            &digest_hex,
                        )? {
                            findings.push(Finding::error(
                                RejectCode::MissingOriginal,
                                format!(
                                    "{} is neither uploaded nor already published",
                                    original.filename
                                ),
                            ));
                        }
                    }
                }
                None => {
                    findings.push(Finding::error(
                        RejectCode::MissingOriginal,
                        "source format requires an original tarball and none is declared",
                    ));
                }
            }
        }

        if description.copyright().is_none() {
            findings.push(Finding::warning(
                RejectCode::MissingCopyright,
                "source description carries no copyright metadata",
            ));
        }

        Ok(())
    }

    fn commit_request(
        &self,
        release: ReleaseKey,
        artifacts: &[ValidatedArtifact],
        findings: &[Finding],
    ) -> CommitRequest {
        let source = artifacts
            .iter()
            .find(|a| a.kind == ArtifactKind::SourceDescription)
            .map(|dsc| SourceReleaseIntent {
                component: dsc.entry.component().to_string(),
                files: artifacts
                    .iter()
                    .filter(|a| a.kind.is_sourceful())
                    .map(|a| a.entry.filename.clone())
                    .collect(),
            });

        let binaries = artifacts
            .iter()
            .filter(|a| a.kind.is_binaryful())
            .filter_map(|a| {
                let control = a.details.control.as_ref()?;

                Some(BinaryReleaseIntent {
                    package: control.field_str("Package")?.to_string(),
                    version: control.field_str("Version")?.to_string(),
                    architecture: a.details.architecture.clone()?,
                    component: a.entry.component().to_string(),
                    filename: a.entry.filename.clone(),
                })
            })
            .collect();

        CommitRequest {
            release,
            source,
            binaries,
            findings: findings.to_vec(),
        }
    }
}
