// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The catalog collaborator seam.

The pipeline never touches archive state directly; every read and mutation
goes through the [Catalog] trait. A backend failure is a [CatalogError] and
propagates as an operational error, distinct from content findings about the
upload itself.

[MemoryCatalog] is the in-process implementation, used for tests and
single-node deployments. Its commit path performs the duplicate-version check
and the insert under one lock, so two concurrent uploads of the same version
can never both land.
*/

use {
    crate::{
        archive::PermissionRule,
        error::Finding,
        signature::SignerKey,
    },
    std::{
        collections::{HashMap, HashSet},
        sync::Mutex,
    },
    thiserror::Error,
};

/// Failure talking to the catalog backend.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog backend failure: {0}")]
    Backend(String),
}

/// Identifier of a published release record.
pub type ReleaseId = u64;

/// Identifier of an upload queue entry.
pub type QueueEntryId = u64;

/// The uniqueness key for a published version.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ReleaseKey {
    pub package: String,
    pub version: String,
    pub archive: String,
    pub series: String,
}

/// A source release the catalog should create on commit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceReleaseIntent {
    pub component: String,
    /// Filenames of the artifacts backing this release.
    pub files: Vec<String>,
}

/// A binary release the catalog should create on commit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BinaryReleaseIntent {
    pub package: String,
    pub version: String,
    pub architecture: String,
    pub component: String,
    pub filename: String,
}

/// Everything the catalog needs to publish one accepted upload.
#[derive(Clone, Debug)]
pub struct CommitRequest {
    pub release: ReleaseKey,
    pub source: Option<SourceReleaseIntent>,
    pub binaries: Vec<BinaryReleaseIntent>,
    /// Warnings carried through to the queue record.
    pub findings: Vec<Finding>,
}

/// Identifiers created by a successful commit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommitReceipt {
    pub source_release: Option<ReleaseId>,
    pub binary_releases: Vec<ReleaseId>,
    pub queue_entry: QueueEntryId,
}

/// Result of attempting to commit an upload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CommitOutcome {
    Committed(CommitReceipt),
    /// The release key was already present when the commit ran.
    DuplicateVersion,
}

/// Final state of a queue entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum_macros::Display)]
pub enum QueueDisposition {
    Accepted,
    Rejected,
    Held,
}

/// External state the pipeline consults and mutates.
pub trait Catalog: Send + Sync {
    /// Look up a registered signing key by its hex key id.
    fn resolve_identity(&self, fingerprint: &str)
        -> std::result::Result<Option<SignerKey>, CatalogError>;

    /// Fetch the permission rules in force for an archive.
    fn find_permissions(
        &self,
        archive: &str,
    ) -> std::result::Result<Vec<PermissionRule>, CatalogError>;

    /// Whether the catalog already holds a source file with this name and
    /// SHA-256, published for this package.
    fn known_source_file(
        &self,
        package: &str,
        filename: &str,
        sha256_hex: &str,
    ) -> std::result::Result<bool, CatalogError>;

    /// Whether a release already exists for this key. Advisory only; the
    /// binding check happens inside [Catalog::commit_upload].
    fn existing_release(&self, key: &ReleaseKey) -> std::result::Result<bool, CatalogError>;

    /// Whether uploads of this package into this archive are routed to
    /// manual review.
    fn requires_manual_review(
        &self,
        package: &str,
        archive: &str,
    ) -> std::result::Result<bool, CatalogError>;

    /// Atomically publish an accepted upload.
    ///
    /// The duplicate-version check and the insert must happen under the same
    /// guard; callers rely on at most one commit succeeding per release key.
    fn commit_upload(&self, request: CommitRequest)
        -> std::result::Result<CommitOutcome, CatalogError>;

    /// Record a non-accepted upload's final state and findings.
    fn create_queue_entry(
        &self,
        disposition: QueueDisposition,
        findings: &[Finding],
    ) -> std::result::Result<QueueEntryId, CatalogError>;
}

/// A recorded queue entry.
#[derive(Clone, Debug)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub disposition: QueueDisposition,
    pub findings: Vec<Finding>,
}

#[derive(Default)]
struct MemoryState {
    keys: HashMap<String, SignerKey>,
    permissions: Vec<PermissionRule>,
    known_sources: HashSet<(String, String, String)>,
    releases: HashSet<ReleaseKey>,
    review_required: HashSet<(String, String)>,
    queue: Vec<QueueEntry>,
    next_release_id: ReleaseId,
    next_queue_id: QueueEntryId,
}

impl MemoryState {
    fn push_queue_entry(
        &mut self,
        disposition: QueueDisposition,
        findings: Vec<Finding>,
    ) -> QueueEntryId {
        self.next_queue_id += 1;
        let id = self.next_queue_id;
        self.queue.push(QueueEntry {
            id,
            disposition,
            findings,
        });

        id
    }
}

/// In-process [Catalog] backed by a mutex.
#[derive(Default)]
pub struct MemoryCatalog {
    state: Mutex<MemoryState>,
}

impl MemoryCatalog {
    fn locked(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock means a panic mid-mutation; tests want the panic
        // surfaced, not swallowed.
        self.state.lock().expect("memory catalog lock poisoned")
    }

    /// Register a signing key in the directory.
    pub fn register_key(&self, key: SignerKey) {
        self.locked().keys.insert(key.fingerprint.clone(), key);
    }

    /// Add a permission rule.
    pub fn grant(&self, rule: PermissionRule) {
        self.locked().permissions.push(rule);
    }

    /// Record a source file as already published for a package.
    pub fn add_known_source(&self, package: &str, filename: &str, sha256_hex: &str) {
        self.locked().known_sources.insert((
            package.to_string(),
            filename.to_string(),
            sha256_hex.to_string(),
        ));
    }

    /// Pre-seed an existing release.
    pub fn seed_release(&self, key: ReleaseKey) {
        self.locked().releases.insert(key);
    }

    /// Route a (package, archive) pair to manual review.
    pub fn require_review(&self, package: &str, archive: &str) {
        self.locked()
            .review_required
            .insert((package.to_string(), archive.to_string()));
    }

    /// Snapshot of the recorded queue entries.
    pub fn queue_entries(&self) -> Vec<QueueEntry> {
        self.locked().queue.clone()
    }
}

impl Catalog for MemoryCatalog {
    fn resolve_identity(
        &self,
        fingerprint: &str,
    ) -> std::result::Result<Option<SignerKey>, CatalogError> {
        Ok(self.locked().keys.get(fingerprint).cloned())
    }

    fn find_permissions(
        &self,
        archive: &str,
    ) -> std::result::Result<Vec<PermissionRule>, CatalogError> {
        Ok(self
            .locked()
            .permissions
            .iter()
            .filter(|rule| rule.archive == archive)
            .cloned()
            .collect())
    }

    fn known_source_file(
        &self,
        package: &str,
        filename: &str,
        sha256_hex: &str,
    ) -> std::result::Result<bool, CatalogError> {
        Ok(self.locked().known_sources.contains(&(
            package.to_string(),
            filename.to_string(),
            sha256_hex.to_string(),
        )))
    }

    fn existing_release(&self, key: &ReleaseKey) -> std::result::Result<bool, CatalogError> {
        Ok(self.locked().releases.contains(key))
    }

    fn requires_manual_review(
        &self,
        package: &str,
        archive: &str,
    ) -> std::result::Result<bool, CatalogError> {
        Ok(self
            .locked()
            .review_required
            .contains(&(package.to_string(), archive.to_string())))
    }

    fn commit_upload(
        &self,
        request: CommitRequest,
    ) -> std::result::Result<CommitOutcome, CatalogError> {
        let mut state = self.locked();

        // Check and insert under one guard.
        if !state.releases.insert(request.release.clone()) {
            return Ok(CommitOutcome::DuplicateVersion);
        }

        let source_release = request.source.as_ref().map(|_| {
            state.next_release_id += 1;
            state.next_release_id
        });

        let binary_releases = request
            .binaries
            .iter()
            .map(|_| {
                state.next_release_id += 1;
                state.next_release_id
            })
            .collect();

        let queue_entry = state.push_queue_entry(QueueDisposition::Accepted, request.findings);

        Ok(CommitOutcome::Committed(CommitReceipt {
            source_release,
            binary_releases,
            queue_entry,
        }))
    }

    fn create_queue_entry(
        &self,
        disposition: QueueDisposition,
        findings: &[Finding],
    ) -> std::result::Result<QueueEntryId, CatalogError> {
        Ok(self.locked().push_queue_entry(disposition, findings.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::error::{Finding, RejectCode},
        std::sync::Arc,
    };

    fn release_key() -> ReleaseKey {
        ReleaseKey {
            package: "widget".to_string(),
            version: "1.0-1".to_string(),
            archive: "primary".to_string(),
            series: "stable".to_string(),
        }
    }

    fn commit_request() -> CommitRequest {
        CommitRequest {
            release: release_key(),
            source: Some(SourceReleaseIntent {
                component: "main".to_string(),
                files: vec!["widget_1.0-1.dsc".to_string()],
            }),
            binaries: vec![],
            findings: vec![],
        }
    }

    #[test]
    fn commit_then_duplicate() -> std::result::Result<(), CatalogError> {
        let catalog = MemoryCatalog::default();

        let outcome = catalog.commit_upload(commit_request())?;
        let receipt = match outcome {
            CommitOutcome::Committed(receipt) => receipt,
            other => panic!("expected commit; got {:?}", other),
        };
        assert!(receipt.source_release.is_some());
        assert!(catalog.existing_release(&release_key())?);

        assert_eq!(
            catalog.commit_upload(commit_request())?,
            CommitOutcome::DuplicateVersion
        );

        Ok(())
    }

    #[test]
    fn concurrent_commits_admit_exactly_one() {
        let catalog = Arc::new(MemoryCatalog::default());

        let handles = (0..2)
            .map(|_| {
                let catalog = Arc::clone(&catalog);
                std::thread::spawn(move || catalog.commit_upload(commit_request()).unwrap())
            })
            .collect::<Vec<_>>();

        let outcomes = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>();

        let committed = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, CommitOutcome::Committed(_)))
            .count();
        assert_eq!(committed, 1);
        assert_eq!(outcomes.len() - committed, 1);
    }

    #[test]
    fn queue_entries_record_findings() -> std::result::Result<(), CatalogError> {
        let catalog = MemoryCatalog::default();
        let finding = Finding::error(RejectCode::ChecksumMismatch, "digest mismatch");

        let id = catalog.create_queue_entry(QueueDisposition::Rejected, &[finding.clone()])?;

        let entries = catalog.queue_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].disposition, QueueDisposition::Rejected);
        assert_eq!(entries[0].findings, vec![finding]);

        Ok(())
    }

    #[test]
    fn known_source_lookup_is_exact() -> std::result::Result<(), CatalogError> {
        let catalog = MemoryCatalog::default();
        catalog.add_known_source("widget", "widget_1.0.orig.tar.gz", "abc123");

        assert!(catalog.known_source_file("widget", "widget_1.0.orig.tar.gz", "abc123")?);
        assert!(!catalog.known_source_file("widget", "widget_1.0.orig.tar.gz", "def456")?);
        assert!(!catalog.known_source_file("other", "widget_1.0.orig.tar.gz", "abc123")?);

        Ok(())
    }
}
