// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package version string handling.

Versions have the form `[epoch:]upstream_version[-revision]` with character
restrictions per component. Declared versions are validated before an upload
can be accepted; the catalog's duplicate key uses the normalized string form.
*/

use {
    std::{
        fmt::{Display, Formatter},
        num::ParseIntError,
        str::FromStr,
    },
    thiserror::Error,
};

#[derive(Clone, Debug, Error)]
pub enum VersionError {
    #[error("error parsing string to integer: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("the epoch component has non-digit characters: {0}")]
    EpochNonNumeric(String),

    #[error("upstream version component has illegal character: {0}")]
    UpstreamIllegalChar(String),

    #[error("revision component has illegal character: {0}")]
    RevisionIllegalChar(String),

    #[error("version string is empty")]
    Empty,
}

/// A validated package version.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PackageVersion {
    epoch: Option<u32>,
    upstream: String,
    revision: Option<String>,
}

impl PackageVersion {
    /// Construct an instance by parsing a version string.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        if s.trim().is_empty() {
            return Err(VersionError::Empty);
        }

        // Epoch is the part before a colon, if present. Upstream and revision
        // are split on the last hyphen.
        let (epoch, remainder) = match s.split_once(':') {
            Some((epoch, rest)) => (Some(epoch), rest),
            None => (None, s),
        };

        let (upstream, revision) = match remainder.rfind('-') {
            Some(pos) => (&remainder[0..pos], Some(&remainder[pos + 1..])),
            None => (remainder, None),
        };

        let epoch = if let Some(epoch) = epoch {
            if !epoch.chars().all(|c| c.is_ascii_digit()) {
                return Err(VersionError::EpochNonNumeric(s.to_string()));
            }

            Some(u32::from_str(epoch)?)
        } else {
            None
        };

        // Upstream allows alphanumerics plus . + ~ and, only when a revision
        // follows, hyphens.
        if upstream.is_empty()
            || !upstream.chars().all(|c| match c {
                c if c.is_ascii_alphanumeric() => true,
                '.' | '+' | '~' => true,
                '-' => revision.is_some(),
                _ => false,
            })
        {
            return Err(VersionError::UpstreamIllegalChar(s.to_string()));
        }

        let revision = if let Some(revision) = revision {
            if revision.is_empty()
                || !revision.chars().all(|c| match c {
                    c if c.is_ascii_alphanumeric() => true,
                    '+' | '.' | '~' => true,
                    _ => false,
                })
            {
                return Err(VersionError::RevisionIllegalChar(s.to_string()));
            }

            Some(revision.to_string())
        } else {
            None
        };

        Ok(Self {
            epoch,
            upstream: upstream.to_string(),
            revision,
        })
    }

    /// The explicit `epoch` component, if present.
    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    /// The `upstream` component of the version string.
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// The packaging `revision` component, if present.
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }
}

impl Display for PackageVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(epoch) = self.epoch {
            write!(f, "{}:", epoch)?;
        }

        write!(f, "{}", self.upstream)?;

        if let Some(revision) = &self.revision {
            write!(f, "-{}", revision)?;
        }

        Ok(())
    }
}
