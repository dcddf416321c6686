// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Signature verification and signer resolution.

Signed control files carry PGP cleartext signatures. Verification resolves
the signature's issuer key through the external key directory and checks the
signature against the registered public key. Identity comes only from the
directory lookup; manifest text never establishes who signed.
*/

use {
    crate::{
        archive::Identity,
        catalog::Catalog,
        error::Result,
    },
    pgp::{types::KeyTrait, SignedPublicKey},
    pgp_cleartext::CleartextSignatures,
};

/// Trust tier of a registered signing key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrustTier {
    /// A key registered to a human publisher.
    Publisher,
    /// A key registered to the automated build system.
    BuildDaemon,
}

/// A signing key registered in the external key directory.
#[derive(Clone)]
pub struct SignerKey {
    /// Hex key id the directory indexes this key under.
    pub fingerprint: String,
    pub public_key: SignedPublicKey,
    pub identity: Identity,
    pub tier: TrustTier,
}

impl SignerKey {
    /// Register wrapper computing the directory index from the key itself.
    pub fn new(public_key: SignedPublicKey, identity: Identity, tier: TrustTier) -> Self {
        Self {
            fingerprint: key_fingerprint(&public_key),
            public_key,
            identity,
            tier,
        }
    }
}

/// The hex key id used to index a public key in the directory.
pub fn key_fingerprint(key: &SignedPublicKey) -> String {
    hex::encode(key.key_id().as_ref())
}

/// Outcome of verifying one signed control file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SignatureOutcome {
    /// The file carried no signature envelope.
    NoSignature,
    /// The signature verified against a registered key.
    Valid { identity: Identity, tier: TrustTier },
    /// A signature was present but did not verify.
    Invalid(String),
    /// The issuer key is not registered in the directory.
    UnknownKey(String),
}

/// Resolve and verify parsed cleartext signatures against the key directory.
///
/// A directory lookup failure propagates as an operational error; it is never
/// folded into [SignatureOutcome::UnknownKey].
pub fn resolve_and_verify<C: Catalog + ?Sized>(
    signatures: &CleartextSignatures,
    catalog: &C,
) -> Result<SignatureOutcome> {
    let issuer = match signatures
        .iter_signatures()
        .find_map(|sig| sig.issuer())
    {
        Some(issuer) => hex::encode(issuer.as_ref()),
        None => {
            return Ok(SignatureOutcome::Invalid(
                "signature carries no issuer key id".to_string(),
            ))
        }
    };

    let signer = match catalog.resolve_identity(&issuer)? {
        Some(signer) => signer,
        None => return Ok(SignatureOutcome::UnknownKey(issuer)),
    };

    match signatures.verify(&signer.public_key) {
        Ok(_) => Ok(SignatureOutcome::Valid {
            identity: signer.identity,
            tier: signer.tier,
        }),
        Err(e) => Ok(SignatureOutcome::Invalid(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            catalog::MemoryCatalog,
            keys::mint_key_pair,
            manifest::UploadManifest,
        },
        pgp::crypto::HashAlgorithm,
        pgp_cleartext::cleartext_sign,
    };

    const CONTENT: &str = "Source: widget\nVersion: 1.0-1\n";

    fn signed_manifest(key: &pgp::SignedSecretKey) -> UploadManifest {
        let signed = cleartext_sign(
            key,
            String::new,
            HashAlgorithm::SHA2_256,
            CONTENT.as_bytes(),
        )
        .unwrap();

        UploadManifest::parse(signed.as_bytes()).unwrap()
    }

    #[test]
    fn valid_signature_resolves_identity() -> Result<()> {
        let (secret, public) = mint_key_pair("Publisher <p@example.com>").unwrap();
        let catalog = MemoryCatalog::default();
        catalog.register_key(SignerKey::new(
            public,
            Identity::new("publisher", "A. Publisher"),
            TrustTier::Publisher,
        ));

        let manifest = signed_manifest(&secret);
        let outcome = resolve_and_verify(manifest.signatures().unwrap(), &catalog)?;

        assert_eq!(
            outcome,
            SignatureOutcome::Valid {
                identity: Identity::new("publisher", "A. Publisher"),
                tier: TrustTier::Publisher,
            }
        );

        Ok(())
    }

    #[test]
    fn unregistered_key_is_unknown() -> Result<()> {
        let (secret, public) = mint_key_pair("Stranger <s@example.com>").unwrap();
        let catalog = MemoryCatalog::default();

        let manifest = signed_manifest(&secret);
        let outcome = resolve_and_verify(manifest.signatures().unwrap(), &catalog)?;

        assert_eq!(
            outcome,
            SignatureOutcome::UnknownKey(key_fingerprint(&public))
        );

        Ok(())
    }

    #[test]
    fn wrong_registered_key_fails_verification() -> Result<()> {
        let (secret, _) = mint_key_pair("Signer <signer@example.com>").unwrap();
        let (_, other_public) = mint_key_pair("Other <other@example.com>").unwrap();

        let manifest = signed_manifest(&secret);

        // Register the wrong public key under the signature's issuer id so
        // resolution succeeds but verification cannot.
        let catalog = MemoryCatalog::default();
        let issuer = manifest
            .signatures()
            .unwrap()
            .iter_signatures()
            .find_map(|sig| sig.issuer())
            .map(|id| hex::encode(id.as_ref()))
            .unwrap();
        catalog.register_key(SignerKey {
            fingerprint: issuer,
            public_key: other_public,
            identity: Identity::new("other", "Other"),
            tier: TrustTier::Publisher,
        });

        let outcome = resolve_and_verify(manifest.signatures().unwrap(), &catalog)?;
        assert!(matches!(outcome, SignatureOutcome::Invalid(_)));

        Ok(())
    }
}
