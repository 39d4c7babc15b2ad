//! Challenge validators: HTTP-01, DNS-01 and TLS-ALPN-01 over the
//! injected I/O in [`io`], each bounded by the validation timeout.

pub mod io;

use std::sync::Arc;

use lazy_static::lazy_static;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::oid_registry::Oid;
use x509_parser::prelude::FromDer;

use crate::types;
use io::{DnsError, HttpFetch, IoError, TlsDial, TxtLookup};

lazy_static! {
    /// id-pe-acmeIdentifier (RFC 8737).
    static ref ACME_IDENTIFIER_OID: Oid<'static> =
        Oid::from(&[1, 3, 6, 1, 5, 5, 7, 1, 31]).unwrap();
}

/// The I/O bundle the authority validates with. [`ValidationClient::live`]
/// wires the real network clients; tests inject stubs.
#[derive(Clone)]
pub struct ValidationClient {
    pub http: Arc<dyn HttpFetch>,
    pub dns: Arc<dyn TxtLookup>,
    pub tls: Arc<dyn TlsDial>,
    pub timeout: std::time::Duration,
}

impl ValidationClient {
    pub fn live() -> Result<Self, String> {
        Ok(ValidationClient {
            http: Arc::new(io::LiveHttpFetch::new()?),
            dns: Arc::new(io::LiveTxtLookup::new()?),
            tls: Arc::new(io::LiveTlsDial),
            timeout: std::time::Duration::from_secs(30),
        })
    }
}

type ValidationResult = Result<(), types::error::Error>;

/// Runs the validator for one challenge under the time budget. `Ok`
/// means the challenge may commit `valid`; the error carries the
/// problem to store on `invalid`.
pub(crate) async fn validate(
    client: &ValidationClient,
    challenge_type: types::challenge::Type,
    identifier: &types::identifier::Identifier,
    token: &str,
    key_authorization: &str,
) -> ValidationResult {
    let fut = async {
        match challenge_type {
            types::challenge::Type::HTTP01 => {
                http01(client, identifier, token, key_authorization).await
            }
            types::challenge::Type::DNS01 => dns01(client, identifier, key_authorization).await,
            types::challenge::Type::TLSALPN01 => {
                tls_alpn01(client, identifier, key_authorization).await
            }
        }
    };
    match tokio::time::timeout(client.timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            let detail = format!(
                "validation timed out after {} seconds",
                client.timeout.as_secs()
            );
            Err(match challenge_type {
                types::challenge::Type::HTTP01 => types::error::Error::connection(detail),
                types::challenge::Type::DNS01 => types::error::Error::dns(detail),
                types::challenge::Type::TLSALPN01 => types::error::Error::tls(detail),
            })
        }
    }
}

fn connection_error(err: IoError) -> types::error::Error {
    match err {
        IoError::Tls(detail) => types::error::Error::tls(detail),
        other => types::error::Error::connection(other.to_string()),
    }
}

async fn http01(
    client: &ValidationClient,
    identifier: &types::identifier::Identifier,
    token: &str,
    key_authorization: &str,
) -> ValidationResult {
    let url = format!(
        "http://{}:80/.well-known/acme-challenge/{}",
        identifier.base_value(),
        token
    );
    let resp = client.http.fetch(&url).await.map_err(connection_error)?;

    if !(200..300).contains(&resp.status) {
        return Err(types::error::Error::incorrect_response(format!(
            "HTTP {} received fetching '{}'",
            resp.status, url
        )));
    }

    let body = resp.body.trim_end();
    if body != key_authorization {
        return Err(types::error::Error::incorrect_response(format!(
            "expected '{}', received '{}'",
            key_authorization, body
        )));
    }
    Ok(())
}

async fn dns01(
    client: &ValidationClient,
    identifier: &types::identifier::Identifier,
    key_authorization: &str,
) -> ValidationResult {
    let name = format!(
        "_acme-challenge.{}",
        identifier.base_value().trim_end_matches('.')
    );
    let expected = crate::util::b64_sha256(key_authorization.as_bytes());

    let records = client.dns.lookup_txt(&name).await.map_err(|err| match err {
        DnsError::NoRecords(detail) | DnsError::Lookup(detail) => types::error::Error::dns(detail),
    })?;

    if records.iter().any(|r| r == &expected) {
        return Ok(());
    }
    Err(types::error::Error::incorrect_response(format!(
        "no TXT record found at {} with the value '{}'",
        name, expected
    )))
}

async fn tls_alpn01(
    client: &ValidationClient,
    identifier: &types::identifier::Identifier,
    key_authorization: &str,
) -> ValidationResult {
    let domain = identifier.base_value().to_ascii_lowercase();
    let probe = client
        .tls
        .dial(&domain, 443, &domain)
        .await
        .map_err(connection_error)?;

    if !probe.alpn_acme_tls1 {
        return Err(types::error::Error::tls(
            "server did not negotiate the \"acme-tls/1\" protocol",
        ));
    }
    let leaf = match probe.peer_chain.as_slice() {
        [] => {
            return Err(types::error::Error::tls(
                "server did not present a certificate",
            ));
        }
        [leaf] => leaf,
        _ => {
            return Err(types::error::Error::incorrect_response(
                "server presented more than one certificate",
            ));
        }
    };

    let (_, cert) = X509Certificate::from_der(leaf).map_err(|err| {
        types::error::Error::tls(format!("failed to parse server certificate: {}", err))
    })?;

    let mut dns_names = vec![];
    let mut other_names = 0usize;
    for extension in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = extension.parsed_extension() {
            for general in &san.general_names {
                match general {
                    GeneralName::DNSName(name) => dns_names.push(name.to_ascii_lowercase()),
                    _ => other_names += 1,
                }
            }
        }
    }
    if other_names != 0 || dns_names.len() != 1 {
        return Err(types::error::Error::incorrect_response(
            "server certificate must carry exactly one dNSName subject alternative name",
        ));
    }
    if dns_names[0] != domain {
        return Err(types::error::Error::incorrect_response(format!(
            "server certificate SAN is '{}', expected '{}'",
            dns_names[0], domain
        )));
    }

    let acme_extension = cert
        .extensions()
        .iter()
        .find(|ext| ext.oid == *ACME_IDENTIFIER_OID)
        .ok_or_else(|| {
            types::error::Error::incorrect_response(
                "server certificate is missing the acmeIdentifier extension",
            )
        })?;
    if !acme_extension.critical {
        return Err(types::error::Error::incorrect_response(
            "acmeIdentifier extension must be critical",
        ));
    }

    let digest =
        openssl::hash::hash(openssl::hash::MessageDigest::sha256(), key_authorization.as_bytes())
            .map_err(|err| {
                log::error!("SHA-256 failure during tls-alpn-01 validation: {}", err);
                types::error::Error::server_internal("error hashing key authorization")
            })?;
    let mut expected = Vec::with_capacity(2 + digest.len());
    expected.push(0x04); // OCTET STRING
    expected.push(digest.len() as u8);
    expected.extend_from_slice(&digest);

    if acme_extension.value != expected.as_slice() {
        return Err(types::error::Error::incorrect_response(
            "acmeIdentifier extension does not match the key authorization",
        ));
    }
    Ok(())
}
