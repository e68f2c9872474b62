use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

use super::{TlsError, TlsMode, build, root_store_from_pem};

struct TestCa {
    cert: Certificate,
    key: KeyPair,
}

fn make_ca(name: &str) -> TestCa {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, name);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    TestCa { cert, key }
}

fn make_leaf(ca: &TestCa, host: &str) -> CertificateDer<'static> {
    let mut params = CertificateParams::new(vec![host.to_string()]).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, host);
    params.distinguished_name = dn;
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let key = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &ca.cert, &ca.key).unwrap();
    cert.der().clone()
}

fn verify(
    security: &super::TransportSecurity,
    leaf: &CertificateDer<'_>,
    host: &str,
) -> Result<(), rustls::Error> {
    let server_name = ServerName::try_from(host.to_string()).unwrap();
    security
        .verifier()
        .verify_server_cert(leaf, &[], &server_name, &[], UnixTime::now())
        .map(|_| ())
}

#[test]
fn mode_selector_maps_integers() {
    assert_eq!(TlsMode::try_from(0).unwrap(), TlsMode::Disabled);
    assert_eq!(TlsMode::try_from(1).unwrap(), TlsMode::Insecure);
    assert_eq!(TlsMode::try_from(2).unwrap(), TlsMode::Secure);
    assert!(matches!(
        TlsMode::try_from(3),
        Err(TlsError::InvalidMode(3))
    ));
}

#[test]
fn disabled_mode_produces_no_configuration() {
    let security = build(TlsMode::Disabled, Some("ignored")).unwrap();
    assert!(security.is_none());
}

#[test]
fn insecure_mode_skips_verification_and_ignores_ca_text() {
    let ca = make_ca("unrelated CA");
    let other_ca = make_ca("some other CA");
    let leaf = make_leaf(&other_ca, "broker.example.com");

    for ca_text in [None, Some("not a certificate"), Some(ca.cert.pem().as_str())] {
        let security = build(TlsMode::Insecure, ca_text).unwrap().unwrap();
        assert_eq!(security.mode(), TlsMode::Insecure);
        // wrong CA and wrong host name are both accepted
        assert!(verify(&security, &leaf, "broker.example.com").is_ok());
        assert!(verify(&security, &leaf, "elsewhere.example.org").is_ok());
    }
}

#[test]
fn secure_mode_accepts_chain_signed_by_trusted_ca() {
    let ca = make_ca("relay test CA");
    let leaf = make_leaf(&ca, "broker.example.com");

    let security = build(TlsMode::Secure, Some(&ca.cert.pem()))
        .unwrap()
        .unwrap();
    assert_eq!(security.mode(), TlsMode::Secure);
    assert!(verify(&security, &leaf, "broker.example.com").is_ok());
}

#[test]
fn secure_mode_rejects_chain_signed_by_unrelated_ca() {
    let trusted = make_ca("relay test CA");
    let rogue = make_ca("rogue CA");
    let leaf = make_leaf(&rogue, "broker.example.com");

    let security = build(TlsMode::Secure, Some(&trusted.cert.pem()))
        .unwrap()
        .unwrap();
    assert!(verify(&security, &leaf, "broker.example.com").is_err());
}

#[test]
fn secure_mode_requires_ca_material() {
    assert!(matches!(
        build(TlsMode::Secure, None),
        Err(TlsError::MissingCa)
    ));
    assert!(matches!(
        build(TlsMode::Secure, Some("")),
        Err(TlsError::NoCertificates)
    ));
    assert!(matches!(
        build(TlsMode::Secure, Some("hello, this is not pem")),
        Err(TlsError::NoCertificates)
    ));
}

#[test]
fn corrupted_pem_is_reported() {
    let broken = "-----BEGIN CERTIFICATE-----\n!!!not base64!!!\n-----END CERTIFICATE-----\n";
    assert!(root_store_from_pem(broken).is_err());
}

#[test]
fn root_store_collects_every_certificate() {
    let first = make_ca("first CA");
    let second = make_ca("second CA");
    let bundle = format!("{}{}", first.cert.pem(), second.cert.pem());

    let store = root_store_from_pem(&bundle).unwrap();
    assert_eq!(store.len(), 2);
}
