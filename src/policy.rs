// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Ingestion policy profiles.

A profile is a fixed, named bundle of booleans selecting which checks are
mandatory for an ingestion run. Profiles are data, not code: adding a new
ingestion mode means adding a profile value here, not new branching logic in
the pipeline.
*/

use strum_macros::{Display, EnumIter, EnumString};

/// The closed set of named policy profiles.
#[derive(Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum PolicyKind {
    /// Signed uploads from arbitrary publishers. Source only.
    Insecure,
    /// Uploads from the automated build farm. Binary only; the caller fixes
    /// the target series and no signature is required.
    Buildd,
    /// Trusted bulk synchronization from an upstream archive. Source only;
    /// no signature required.
    Sync,
    /// Permissive profile accepting any upload shape, signatures required.
    Anything,
}

/// A resolved policy profile.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UploadPolicy {
    pub kind: PolicyKind,
    /// Whether an unsigned manifest is a rejection.
    pub requires_signature: bool,
    /// Whether source artifacts are accepted.
    pub accepts_source: bool,
    /// Whether built-binary artifacts are accepted.
    pub accepts_binaries: bool,
    /// Whether the target series comes from the caller instead of the
    /// manifest. When set, a manifest declaring a different series is
    /// rejected.
    pub series_fixed_by_caller: bool,
}

impl UploadPolicy {
    /// Obtain the profile record for a named policy.
    pub fn named(kind: PolicyKind) -> Self {
        match kind {
            PolicyKind::Insecure => Self {
                kind,
                requires_signature: true,
                accepts_source: true,
                accepts_binaries: false,
                series_fixed_by_caller: false,
            },
            PolicyKind::Buildd => Self {
                kind,
                requires_signature: false,
                accepts_source: false,
                accepts_binaries: true,
                series_fixed_by_caller: true,
            },
            PolicyKind::Sync => Self {
                kind,
                requires_signature: false,
                accepts_source: true,
                accepts_binaries: false,
                series_fixed_by_caller: false,
            },
            PolicyKind::Anything => Self {
                kind,
                requires_signature: true,
                accepts_source: true,
                accepts_binaries: true,
                series_fixed_by_caller: false,
            },
        }
    }

    /// Look up a profile by its deployment-configuration name.
    pub fn by_name(name: &str) -> Option<Self> {
        name.parse::<PolicyKind>().ok().map(Self::named)
    }

    /// Whether an upload carrying both source and binary artifacts is
    /// forbidden under this profile.
    pub fn forbids_mixed(&self) -> bool {
        !(self.accepts_source && self.accepts_binaries)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, strum::IntoEnumIterator};

    #[test]
    fn profiles_resolve_by_name() {
        for kind in PolicyKind::iter() {
            let policy = UploadPolicy::by_name(&kind.to_string()).unwrap();
            assert_eq!(policy.kind, kind);
        }

        assert!(UploadPolicy::by_name("nonsense").is_none());
    }

    #[test]
    fn profile_shapes() {
        let insecure = UploadPolicy::named(PolicyKind::Insecure);
        assert!(insecure.requires_signature);
        assert!(!insecure.accepts_binaries);
        assert!(insecure.forbids_mixed());

        let buildd = UploadPolicy::named(PolicyKind::Buildd);
        assert!(!buildd.requires_signature);
        assert!(buildd.series_fixed_by_caller);
        assert!(!buildd.accepts_source);

        let sync = UploadPolicy::named(PolicyKind::Sync);
        assert!(!sync.requires_signature);
        assert!(sync.accepts_source);

        let anything = UploadPolicy::named(PolicyKind::Anything);
        assert!(!anything.forbids_mixed());
        assert!(anything.requires_signature);
    }
}
