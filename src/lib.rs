// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Archive upload ingestion and verification.

This crate implements the gatekeeping pipeline that sits between uploaded
package artifacts and a distribution archive. An *upload* is a staging
directory holding a `.changes` manifest plus the artifact files it declares.
The pipeline parses the manifest, verifies that every declared file is
present with matching digests, validates artifact containers, verifies PGP
cleartext signatures, resolves signer identity through an external key
directory, enforces a policy profile and upload permissions, cross-checks
the upload for internal consistency, and finally commits accepted uploads
to a catalog.

Everything in an upload is attacker-controlled until proven otherwise.
Identity comes only from signature verification against registered keys;
the `Maintainer` and `Changed-By` strings in the manifest are free text and
never trusted. Artifact containers are structurally validated without
executing anything from them.

# A Tour of Functionality

[processor::UploadProcessor] drives an upload to a final
[processor::Disposition]: accepted, rejected or held for manual review.
Content problems are not `Err` values; they accumulate as [error::Finding]s
with machine-readable [error::RejectCode]s and are reported alongside the
disposition. `Err` is reserved for operational trouble such as I/O faults
and catalog failures.

Control file primitives (RFC822-style paragraphs with continuation lines)
live in [control]. The two control file flavors the pipeline understands
are the upload manifest ([manifest::UploadManifest]) and the embedded
source description ([source_description::SourceDescription]).

Ingestion behavior is selected by a named policy profile
([policy::UploadPolicy]): which upload shapes are accepted, whether
signatures are mandatory and how the target series is resolved. Upload
rights are grant records ([archive::PermissionRule]) evaluated by
[archive::check_authorization].

All reads and mutations of archive state go through the [catalog::Catalog]
trait. [catalog::MemoryCatalog] is the in-process implementation; its
commit path makes the duplicate-version check atomic with the insert.
*/

pub mod archive;
pub mod artifact;
pub mod catalog;
pub mod checksum;
pub mod control;
pub mod error;
pub mod keys;
pub mod manifest;
pub mod policy;
pub mod processor;
pub mod signature;
pub mod source_description;
pub mod version;
