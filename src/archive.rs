// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Archives, identities and upload authorization.

A [PermissionRule] is a grant: (identity, archive, optional package scope,
optional component scope). A rule scoped to a package wins over one scoped to
a component, which wins over an archive-wide grant; absence of any matching
rule is a denial. Copy archives are read-only snapshots and deny all uploads
unconditionally, before any rule is consulted.
*/

/// The kind of a package archive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArchiveKind {
    /// The distribution's primary archive.
    Primary,
    /// A personal package archive.
    Ppa,
    /// A read-only snapshot of another archive. Never accepts uploads.
    Copy,
}

/// A named package archive target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Archive {
    pub name: String,
    pub kind: ArchiveKind,
}

impl Archive {
    pub fn new(name: impl ToString, kind: ArchiveKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }

    /// Whether this archive can ever accept an upload.
    pub fn accepts_uploads(&self) -> bool {
        !matches!(self.kind, ArchiveKind::Copy)
    }
}

/// A resolved publisher, as returned by the external key directory.
///
/// Never derived from manifest text: the maintainer/changed-by strings in an
/// upload are attacker-controlled.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Identity {
    /// Stable identifier in the directory service.
    pub id: String,
    /// Human-readable display name.
    pub display_name: String,
}

impl Identity {
    pub fn new(id: impl ToString, display_name: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
        }
    }
}

/// An authorization fact granting upload rights.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PermissionRule {
    /// The identity the grant is for.
    pub identity: String,
    /// The archive the grant applies to.
    pub archive: String,
    /// Restricts the grant to one source package name.
    pub package: Option<String>,
    /// Restricts the grant to one component.
    pub component: Option<String>,
}

impl PermissionRule {
    /// An archive-wide grant.
    pub fn archive_wide(identity: &Identity, archive: &Archive) -> Self {
        Self {
            identity: identity.id.clone(),
            archive: archive.name.clone(),
            package: None,
            component: None,
        }
    }

    /// A grant restricted to one package.
    pub fn for_package(identity: &Identity, archive: &Archive, package: impl ToString) -> Self {
        Self {
            package: Some(package.to_string()),
            ..Self::archive_wide(identity, archive)
        }
    }

    /// A grant restricted to one component.
    pub fn for_component(identity: &Identity, archive: &Archive, component: impl ToString) -> Self {
        Self {
            component: Some(component.to_string()),
            ..Self::archive_wide(identity, archive)
        }
    }
}

/// Outcome of an authorization check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AccessDecision {
    Granted,
    Denied(String),
}

/// Decide whether `identity` may upload `package` into `archive`.
///
/// `components` is the set of components the upload's files claim.
/// Precedence: package scope, then component scope, then archive-wide.
pub fn check_authorization(
    identity: &Identity,
    archive: &Archive,
    package: Option<&str>,
    components: &[String],
    rules: &[PermissionRule],
) -> AccessDecision {
    if !archive.accepts_uploads() {
        return AccessDecision::Denied(format!(
            "archive {} is a copy archive and never accepts uploads",
            archive.name
        ));
    }

    let relevant = rules
        .iter()
        .filter(|rule| rule.identity == identity.id && rule.archive == archive.name)
        .collect::<Vec<_>>();

    if let Some(package) = package {
        if relevant
            .iter()
            .any(|rule| rule.package.as_deref() == Some(package))
        {
            return AccessDecision::Granted;
        }
    }

    if relevant.iter().any(|rule| {
        rule.package.is_none()
            && rule
                .component
                .as_ref()
                .map_or(false, |c| components.contains(c))
    }) {
        return AccessDecision::Granted;
    }

    if relevant
        .iter()
        .any(|rule| rule.package.is_none() && rule.component.is_none())
    {
        return AccessDecision::Granted;
    }

    AccessDecision::Denied(format!(
        "{} holds no upload permission for {} in archive {}",
        identity.id,
        package.unwrap_or("<unknown package>"),
        archive.name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> (Identity, Archive) {
        (
            Identity::new("publisher", "A. Publisher"),
            Archive::new("primary", ArchiveKind::Primary),
        )
    }

    #[test]
    fn no_rules_is_denial() {
        let (identity, archive) = fixtures();

        assert!(matches!(
            check_authorization(&identity, &archive, Some("widget"), &[], &[]),
            AccessDecision::Denied(_)
        ));
    }

    #[test]
    fn package_scope_wins_over_missing_archive_grant() {
        let (identity, archive) = fixtures();
        let rules = vec![PermissionRule::for_package(&identity, &archive, "widget")];

        assert_eq!(
            check_authorization(&identity, &archive, Some("widget"), &[], &rules),
            AccessDecision::Granted
        );
        assert!(matches!(
            check_authorization(&identity, &archive, Some("other"), &[], &rules),
            AccessDecision::Denied(_)
        ));
    }

    #[test]
    fn component_scope_matches_claimed_components() {
        let (identity, archive) = fixtures();
        let rules = vec![PermissionRule::for_component(&identity, &archive, "main")];

        assert_eq!(
            check_authorization(
                &identity,
                &archive,
                Some("widget"),
                &["main".to_string()],
                &rules
            ),
            AccessDecision::Granted
        );
        assert!(matches!(
            check_authorization(
                &identity,
                &archive,
                Some("widget"),
                &["universe".to_string()],
                &rules
            ),
            AccessDecision::Denied(_)
        ));
    }

    #[test]
    fn archive_wide_grant_applies() {
        let (identity, archive) = fixtures();
        let rules = vec![PermissionRule::archive_wide(&identity, &archive)];

        assert_eq!(
            check_authorization(&identity, &archive, None, &[], &rules),
            AccessDecision::Granted
        );
    }

    #[test]
    fn rules_for_other_identities_do_not_leak() {
        let (identity, archive) = fixtures();
        let other = Identity::new("other", "Other");
        let rules = vec![PermissionRule::archive_wide(&other, &archive)];

        assert!(matches!(
            check_authorization(&identity, &archive, Some("widget"), &[], &rules),
            AccessDecision::Denied(_)
        ));
    }

    #[test]
    fn copy_archives_hard_deny() {
        let (identity, _) = fixtures();
        let archive = Archive::new("snapshot", ArchiveKind::Copy);
        let rules = vec![PermissionRule::archive_wide(&identity, &archive)];

        assert!(matches!(
            check_authorization(&identity, &archive, Some("widget"), &[], &rules),
            AccessDecision::Denied(_)
        ));
    }
}
