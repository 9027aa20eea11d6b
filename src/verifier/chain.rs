// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use crate::store::{Fingerprint, ITrustedRootStore};
use crate::token::{Der, TokenHeader};
use openssl::asn1::Asn1Time;
use openssl::pkey::{PKey, Public};
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::verify::X509VerifyFlags;
use openssl::x509::{X509StoreContext, X509VerifyResult, X509};
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use x509_parser::prelude::{FromDer, X509Certificate};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("no certificate")]
    Empty,
    #[error("bad certificate: {0}")]
    Certificate(String),
    #[error("certificate #{0} is not issued by its successor")]
    BrokenLink(usize),
    #[error("certificate #{0} is not yet valid")]
    NotYetValid(usize),
    #[error("certificate #{0} has expired")]
    Expired(usize),
    #[error("chain terminates at untrusted certificate {0}")]
    UntrustedRoot(Fingerprint),
    #[error("leaf certificate is not allowed to sign")]
    LeafKeyUsage,
    #[error("path validation failed: {0}")]
    PathValidation(String),
    #[error("crypto error: {0}")]
    Crypto(String),
}

fn crypto(e: openssl::error::ErrorStack) -> ChainError {
    ChainError::Crypto(e.to_string())
}

/// An ordered list of X.509 certificates, leaf first
#[derive(Clone, Debug, Default)]
pub struct CertificateChain {
    certs: Vec<X509>,
}

impl CertificateChain {
    pub fn from_der(ders: &[Der]) -> Result<Self, ChainError> {
        let certs = ders
            .iter()
            .enumerate()
            .map(|(i, d)| {
                X509::from_der(d.as_slice())
                    .map_err(|e| ChainError::Certificate(format!("#{i}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { certs })
    }

    /// Certificates in a PEM bundle, in file order
    pub fn from_pem(pem: &[u8]) -> Result<Self, ChainError> {
        let certs =
            X509::stack_from_pem(pem).map_err(|e| ChainError::Certificate(e.to_string()))?;

        Ok(Self { certs })
    }

    pub fn certificates(&self) -> &[X509] {
        &self.certs
    }

    pub fn leaf(&self) -> Option<&X509> {
        self.certs.first()
    }

    /// Public key of the leaf certificate, i.e. the token signing key
    pub fn leaf_key(&self) -> Result<PKey<Public>, ChainError> {
        self.leaf()
            .ok_or(ChainError::Empty)?
            .public_key()
            .map_err(|e| ChainError::Certificate(format!("leaf public key: {e}")))
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}

/// Where the certificate chain of a token comes from
pub trait ChainSource: Send + Sync {
    fn chain_for(&self, header: &TokenHeader) -> Result<CertificateChain, ChainError>;
}

/// The chain is carried by the token itself, in the `x5c` header parameter
#[derive(Clone, Copy, Debug, Default)]
pub struct EmbeddedChain;

impl ChainSource for EmbeddedChain {
    fn chain_for(&self, header: &TokenHeader) -> Result<CertificateChain, ChainError> {
        match &header.x5c {
            Some(x5c) => CertificateChain::from_der(x5c),
            None => Err(ChainError::Empty),
        }
    }
}

/// A fixed chain, for deployments where tokens are signed by a known key and
/// do not carry `x5c`
#[derive(Clone, Debug)]
pub struct StaticChain {
    chain: CertificateChain,
}

impl StaticChain {
    pub fn new(chain: CertificateChain) -> Result<Self, ChainError> {
        if chain.is_empty() {
            return Err(ChainError::Empty);
        }

        Ok(Self { chain })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ChainError> {
        let pem = fs::read(path.as_ref()).map_err(|e| {
            ChainError::Certificate(format!("reading {}: {e}", path.as_ref().display()))
        })?;

        Self::new(CertificateChain::from_pem(&pem)?)
    }
}

impl ChainSource for StaticChain {
    fn chain_for(&self, _header: &TokenHeader) -> Result<CertificateChain, ChainError> {
        Ok(self.chain.clone())
    }
}

/// What a successful chain validation established
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainSummary {
    /// Fingerprint of the trusted terminal certificate
    pub root: Fingerprint,
    pub depth: usize,
}

/// Validate `chain` at time `at` (seconds since the epoch).
///
/// Each certificate must be issued, and signed, by its successor, and valid
/// at `at`.  The last certificate must be pinned in `roots`: it is matched by
/// fingerprint, never by name.  The path is finally run through OpenSSL's
/// verifier with the pinned certificate as the only trust anchor, which
/// checks CA basic constraints and key usage.  A leaf that restricts its key
/// usage must allow `digitalSignature`.
pub fn validate<S>(chain: &CertificateChain, roots: &S, at: u64) -> Result<ChainSummary, ChainError>
where
    S: ITrustedRootStore + ?Sized,
{
    let certs = chain.certificates();

    let terminal = certs.last().ok_or(ChainError::Empty)?;

    let now = Asn1Time::from_unix(at as i64).map_err(crypto)?;

    for (i, cert) in certs.iter().enumerate() {
        if now.compare(cert.not_before()).map_err(crypto)? == Ordering::Less {
            return Err(ChainError::NotYetValid(i));
        }

        if now.compare(cert.not_after()).map_err(crypto)? == Ordering::Greater {
            return Err(ChainError::Expired(i));
        }
    }

    for (i, pair) in certs.windows(2).enumerate() {
        let (subject, issuer) = (&pair[0], &pair[1]);

        if issuer.issued(subject) != X509VerifyResult::OK {
            return Err(ChainError::BrokenLink(i));
        }

        let key = issuer.public_key().map_err(crypto)?;

        // a key type mismatch errors out rather than returning false
        if !matches!(subject.verify(&key), Ok(true)) {
            return Err(ChainError::BrokenLink(i));
        }
    }

    let root = Fingerprint::of_cert(terminal).map_err(|e| ChainError::Certificate(e.to_string()))?;

    if !roots.is_trusted(&root) {
        return Err(ChainError::UntrustedRoot(root));
    }

    verify_path(certs)?;

    check_leaf_usage(&certs[0])?;

    Ok(ChainSummary {
        root,
        depth: certs.len(),
    })
}

fn verify_path(certs: &[X509]) -> Result<(), ChainError> {
    let (leaf, terminal) = match (certs.first(), certs.last()) {
        (Some(l), Some(t)) => (l, t),
        _ => return Err(ChainError::Empty),
    };

    let mut builder = X509StoreBuilder::new().map_err(crypto)?;
    builder.add_cert(terminal.clone()).map_err(crypto)?;
    // validity windows have been checked against the verification time
    // already, OpenSSL would use the wall clock
    builder
        .set_flags(X509VerifyFlags::PARTIAL_CHAIN | X509VerifyFlags::NO_CHECK_TIME)
        .map_err(crypto)?;
    let store = builder.build();

    let mut intermediates = Stack::new().map_err(crypto)?;
    if certs.len() > 2 {
        for c in &certs[1..certs.len() - 1] {
            intermediates.push(c.clone()).map_err(crypto)?;
        }
    }

    let mut ctx = X509StoreContext::new().map_err(crypto)?;

    let (ok, result) = ctx
        .init(&store, leaf, &intermediates, |c| {
            let ok = c.verify_cert()?;
            Ok((ok, c.error()))
        })
        .map_err(crypto)?;

    if !ok {
        return Err(ChainError::PathValidation(result.error_string().to_string()));
    }

    Ok(())
}

fn check_leaf_usage(leaf: &X509) -> Result<(), ChainError> {
    let der = leaf.to_der().map_err(crypto)?;

    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| ChainError::Certificate(format!("#0: {e}")))?;

    match cert.key_usage() {
        Ok(Some(ku)) if !ku.value.digital_signature() => Err(ChainError::LeafKeyUsage),
        Ok(_) => Ok(()),
        Err(e) => Err(ChainError::Certificate(format!("#0 key usage: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TrustedRootSet;
    use crate::source::simulated::issue_certificate;
    use crate::testutil::{TestPki, DAY, NOW};

    #[test]
    fn valid_chain() {
        let pki = TestPki::ec();
        let chain = CertificateChain::from_der(&pki.x5c()).unwrap();

        let s = validate(&chain, &pki.roots(), NOW).unwrap();

        assert_eq!(s.root, pki.root_fingerprint());
        assert_eq!(s.depth, 3);
    }

    #[test]
    fn pinned_intermediate_terminates_chain() {
        let pki = TestPki::ec();
        let mut x5c = pki.x5c();
        x5c.pop();
        let chain = CertificateChain::from_der(&x5c).unwrap();

        let roots = TrustedRootSet::new([Fingerprint::of_cert(&pki.intermediate).unwrap()]);

        assert!(validate(&chain, &roots, NOW).is_ok());
    }

    #[test]
    fn empty_chain() {
        let chain = CertificateChain::default();

        assert_eq!(
            validate(&chain, &TrustedRootSet::default(), NOW).unwrap_err(),
            ChainError::Empty
        );
    }

    #[test]
    fn untrusted_root() {
        let pki = TestPki::ec();
        let other = TestPki::ec();
        let chain = CertificateChain::from_der(&pki.x5c()).unwrap();

        assert_eq!(
            validate(&chain, &other.roots(), NOW).unwrap_err(),
            ChainError::UntrustedRoot(pki.root_fingerprint())
        );
    }

    #[test]
    fn root_with_same_name_is_not_trusted() {
        // both roots are called "Test Root CA"
        let pki = TestPki::ec();
        let impostor = TestPki::ec();
        let chain = CertificateChain::from_der(&impostor.x5c()).unwrap();

        assert!(matches!(
            validate(&chain, &pki.roots(), NOW).unwrap_err(),
            ChainError::UntrustedRoot(_)
        ));
    }

    #[test]
    fn expired_leaf() {
        let pki = TestPki::expired_leaf();
        let chain = CertificateChain::from_der(&pki.x5c()).unwrap();

        assert_eq!(
            validate(&chain, &pki.roots(), NOW).unwrap_err(),
            ChainError::Expired(0)
        );
    }

    #[test]
    fn expired_intermediate() {
        let pki = TestPki::ec();
        let key = crate::source::simulated::p256_key().unwrap();
        let intermediate = issue_certificate(
            "Stale Intermediate CA",
            &key,
            Some((&pki.root, &pki.root_key)),
            true,
            5,
            (NOW - 10 * DAY, NOW - DAY),
        )
        .unwrap();
        let leaf = issue_certificate(
            "Stale Leaf",
            &pki.leaf_key,
            Some((&intermediate, &key)),
            false,
            6,
            (NOW - DAY, NOW + DAY),
        )
        .unwrap();

        let x5c = [&leaf, &intermediate, &pki.root]
            .iter()
            .map(|c| Der::from(c.to_der().unwrap()))
            .collect::<Vec<_>>();
        let chain = CertificateChain::from_der(&x5c).unwrap();

        assert_eq!(
            validate(&chain, &pki.roots(), NOW).unwrap_err(),
            ChainError::Expired(1)
        );
    }

    #[test]
    fn leaf_without_digital_signature_usage() {
        let pki = TestPki::ec();

        let mut builder = openssl::x509::X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = openssl::bn::BigNum::from_u32(7)
            .unwrap()
            .to_asn1_integer()
            .unwrap();
        builder.set_serial_number(&serial).unwrap();
        let mut name = openssl::x509::X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "Encryption Only").unwrap();
        let name = name.build();
        builder.set_subject_name(&name).unwrap();
        builder
            .set_issuer_name(pki.intermediate.subject_name())
            .unwrap();
        builder.set_pubkey(&pki.leaf_key).unwrap();
        let nb = Asn1Time::from_unix((NOW - DAY) as i64).unwrap();
        let na = Asn1Time::from_unix((NOW + DAY) as i64).unwrap();
        builder.set_not_before(&nb).unwrap();
        builder.set_not_after(&na).unwrap();
        builder
            .append_extension(
                openssl::x509::extension::KeyUsage::new()
                    .critical()
                    .key_encipherment()
                    .build()
                    .unwrap(),
            )
            .unwrap();
        builder
            .sign(&pki.intermediate_key, openssl::hash::MessageDigest::sha256())
            .unwrap();
        let leaf = builder.build();

        let mut x5c = pki.x5c();
        x5c[0] = Der::from(leaf.to_der().unwrap());
        let chain = CertificateChain::from_der(&x5c).unwrap();

        assert_eq!(
            validate(&chain, &pki.roots(), NOW).unwrap_err(),
            ChainError::LeafKeyUsage
        );
    }

    #[test]
    fn not_yet_valid_chain() {
        let pki = TestPki::ec();
        let chain = CertificateChain::from_der(&pki.x5c()).unwrap();

        assert_eq!(
            validate(&chain, &pki.roots(), NOW - 2 * DAY).unwrap_err(),
            ChainError::NotYetValid(0)
        );
    }

    #[test]
    fn broken_link() {
        let pki = TestPki::ec();
        let other = TestPki::ec();

        // leaf of one PKI, CAs of another
        let mut x5c = other.x5c();
        x5c[0] = pki.x5c()[0].clone();
        let chain = CertificateChain::from_der(&x5c).unwrap();

        assert_eq!(
            validate(&chain, &other.roots(), NOW).unwrap_err(),
            ChainError::BrokenLink(0)
        );
    }

    #[test]
    fn out_of_order_chain() {
        let pki = TestPki::ec();
        let mut x5c = pki.x5c();
        x5c.swap(0, 1);
        let chain = CertificateChain::from_der(&x5c).unwrap();

        assert_eq!(
            validate(&chain, &pki.roots(), NOW).unwrap_err(),
            ChainError::BrokenLink(0)
        );
    }

    #[test]
    fn leaf_cannot_act_as_ca() {
        let pki = TestPki::ec();

        // a certificate issued by the leaf, which lacks CA basic constraints
        let key = crate::source::simulated::p256_key().unwrap();
        let rogue = crate::source::simulated::issue_certificate(
            "Rogue Signer",
            &key,
            Some((&pki.leaf, &pki.leaf_key)),
            false,
            4,
            (NOW - DAY, NOW + DAY),
        )
        .unwrap();

        let mut x5c = vec![Der::from(rogue.to_der().unwrap())];
        x5c.extend(pki.x5c());
        let chain = CertificateChain::from_der(&x5c).unwrap();

        assert!(matches!(
            validate(&chain, &pki.roots(), NOW).unwrap_err(),
            ChainError::BrokenLink(0) | ChainError::PathValidation(_)
        ));
    }

    #[test]
    fn garbage_certificate() {
        let x5c = vec![Der::from(vec![0x30, 0x03, 0x02, 0x01, 0x01])];

        assert!(matches!(
            CertificateChain::from_der(&x5c).unwrap_err(),
            ChainError::Certificate(_)
        ));
    }

    #[test]
    fn embedded_chain_requires_x5c() {
        let h = crate::token::TokenHeader::new("ES256");

        assert_eq!(EmbeddedChain.chain_for(&h).unwrap_err(), ChainError::Empty);
    }

    #[test]
    fn static_chain_from_file() {
        let pki = TestPki::ec();
        let f = tempfile::NamedTempFile::new().unwrap();
        fs::write(f.path(), pki.chain_pem()).unwrap();

        let s = StaticChain::load(f.path()).unwrap();
        let chain = s.chain_for(&TokenHeader::new("ES256")).unwrap();

        assert_eq!(chain.len(), 3);
        assert!(validate(&chain, &pki.roots(), NOW).is_ok());
    }
}
