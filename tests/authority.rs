//! End-to-end flows against the composed authority: account signup over
//! the JWS envelope, order/authorization/challenge progression with
//! stubbed validator I/O, finalization, and certificate retrieval.

use std::convert::TryFrom;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use base64::prelude::*;
use serde_json::json;

use embla::acme::{ACMEResult, Authority, Provisioner, RequestContext, SignAuthority};
use embla::storage::MemoryStore;
use embla::types;
use embla::types::jose::FlattenedJWS;
use embla::validator::io::{
    DnsError, HttpFetch, HttpResponse, IoError, TlsDial, TlsProbe, TxtLookup,
};
use embla::validator::ValidationClient;

const BASE_URL: &str = "https://ca.example.org";

struct TestProv;

impl Provisioner for TestProv {
    fn id(&self) -> &str {
        "integration-prov"
    }

    fn name(&self) -> &str {
        "acme"
    }

    fn authorize_identifier(
        &self,
        identifier: &types::identifier::Identifier,
    ) -> ACMEResult<()> {
        if identifier.base_value().ends_with("forbidden.test") {
            return Err(types::error::Error::rejected_identifier(format!(
                "domain name '{}' is not allowed by policy",
                identifier.value
            )));
        }
        Ok(())
    }
}

struct StubCa;

fn ec_private_key() -> openssl::pkey::PKey<openssl::pkey::Private> {
    let group =
        openssl::ec::EcGroup::from_curve_name(openssl::nid::Nid::X9_62_PRIME256V1).unwrap();
    openssl::pkey::PKey::from_ec_key(openssl::ec::EcKey::generate(&group).unwrap()).unwrap()
}

fn self_signed_cert(domain: &str) -> Vec<u8> {
    let key = ec_private_key();
    let mut name = openssl::x509::X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", domain).unwrap();
    let name = name.build();

    let mut builder = openssl::x509::X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&openssl::asn1::Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&openssl::asn1::Asn1Time::days_from_now(30).unwrap())
        .unwrap();
    builder
        .sign(&key, openssl::hash::MessageDigest::sha256())
        .unwrap();
    builder.build().to_der().unwrap()
}

#[async_trait]
impl SignAuthority for StubCa {
    fn load_provisioner_by_id(&self, id: &str) -> ACMEResult<Arc<dyn Provisioner>> {
        if id == TestProv.id() {
            Ok(Arc::new(TestProv))
        } else {
            Err(types::error::Error::not_found(format!(
                "provisioner {} does not exist",
                id
            )))
        }
    }

    async fn sign(
        &self,
        _csr_der: &[u8],
        _provisioner: &dyn Provisioner,
    ) -> Result<Vec<Vec<u8>>, String> {
        Ok(vec![
            self_signed_cert("leaf.example.test"),
            self_signed_cert("issuer.example.test"),
        ])
    }
}

/// HTTP-01 responder that answers every token with the right key
/// authorization for one account key.
struct KeyAuthHttp {
    thumbprint: String,
}

#[async_trait]
impl HttpFetch for KeyAuthHttp {
    async fn fetch(&self, url: &str) -> Result<HttpResponse, IoError> {
        let token = url.rsplit('/').next().unwrap_or_default();
        Ok(HttpResponse {
            status: 200,
            body: format!("{}.{}\n", token, self.thumbprint),
        })
    }
}

/// TXT store the test fills in once it knows the challenge token.
#[derive(Clone, Default)]
struct SharedTxt(Arc<RwLock<Vec<String>>>);

#[async_trait]
impl TxtLookup for SharedTxt {
    async fn lookup_txt(&self, fqdn: &str) -> Result<Vec<String>, DnsError> {
        let records = self.0.read().unwrap().clone();
        if records.is_empty() {
            Err(DnsError::NoRecords(format!(
                "no TXT records found for {}",
                fqdn
            )))
        } else {
            Ok(records)
        }
    }
}

struct NoProbe;

#[async_trait]
impl TlsDial for NoProbe {
    async fn dial(&self, _host: &str, _port: u16, _sni: &str) -> Result<TlsProbe, IoError> {
        Err(IoError::Other("tls probe not wired in this test".to_string()))
    }
}

#[async_trait]
impl TxtLookup for NoProbe {
    async fn lookup_txt(&self, _fqdn: &str) -> Result<Vec<String>, DnsError> {
        Err(DnsError::Lookup("dns probe not wired in this test".to_string()))
    }
}

#[async_trait]
impl HttpFetch for NoProbe {
    async fn fetch(&self, _url: &str) -> Result<HttpResponse, IoError> {
        Err(IoError::Other("http probe not wired in this test".to_string()))
    }
}

fn account_jwk() -> (
    openssl::pkey::PKey<openssl::pkey::Private>,
    types::jose::JWK,
) {
    let private = ec_private_key();
    let public =
        openssl::pkey::PKey::public_key_from_der(&private.public_key_to_der().unwrap()).unwrap();
    let jwk = types::jose::JWK::try_from(&public).unwrap();
    (private, jwk)
}

/// ES256-signed flattened JWS with the JOSE raw `r || s` encoding.
fn sign_es256(
    key: &openssl::pkey::PKey<openssl::pkey::Private>,
    protected: serde_json::Value,
    payload: &str,
) -> FlattenedJWS {
    let protected = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&protected).unwrap());
    let payload = BASE64_URL_SAFE_NO_PAD.encode(payload.as_bytes());
    let message = format!("{}.{}", protected, payload);

    let digest =
        openssl::hash::hash(openssl::hash::MessageDigest::sha256(), message.as_bytes()).unwrap();
    let sig = openssl::ecdsa::EcdsaSig::sign(&digest, &key.ec_key().unwrap()).unwrap();
    let mut raw = Vec::with_capacity(64);
    raw.extend_from_slice(&sig.r().to_vec_padded(32).unwrap());
    raw.extend_from_slice(&sig.s().to_vec_padded(32).unwrap());

    FlattenedJWS {
        protected,
        payload,
        signature: BASE64_URL_SAFE_NO_PAD.encode(raw),
    }
}

fn csr_for_names(names: &[&str]) -> Vec<u8> {
    let key = ec_private_key();

    let mut subject = openssl::x509::X509NameBuilder::new().unwrap();
    subject.append_entry_by_text("CN", names[0]).unwrap();
    let subject = subject.build();

    let mut builder = openssl::x509::X509ReqBuilder::new().unwrap();
    builder.set_version(0).unwrap();
    builder.set_subject_name(&subject).unwrap();
    builder.set_pubkey(&key).unwrap();

    let mut san = openssl::x509::extension::SubjectAlternativeName::new();
    for name in names {
        san.dns(name);
    }
    let san = san.build(&builder.x509v3_context(None)).unwrap();
    let mut extensions = openssl::stack::Stack::new().unwrap();
    extensions.push(san).unwrap();
    builder.add_extensions(&extensions).unwrap();

    builder
        .sign(&key, openssl::hash::MessageDigest::sha256())
        .unwrap();
    builder.build().to_der().unwrap()
}

async fn authority_with(validation: ValidationClient) -> Authority {
    Authority::new(
        Arc::new(MemoryStore::new()),
        "ca.example.org",
        "acme",
        Arc::new(StubCa),
        validation,
    )
    .await
    .unwrap()
}

fn http01_validation(thumbprint: &str) -> ValidationClient {
    ValidationClient {
        http: Arc::new(KeyAuthHttp {
            thumbprint: thumbprint.to_string(),
        }),
        dns: Arc::new(NoProbe),
        tls: Arc::new(NoProbe),
        timeout: std::time::Duration::from_secs(30),
    }
}

fn id_from_url(url: &str) -> &str {
    url.rsplit('/').next().unwrap()
}

#[tokio::test]
async fn full_issuance_flow_over_http01() {
    let (_, jwk) = account_jwk();
    let thumbprint = jwk.thumbprint().unwrap();
    let authority = authority_with(http01_validation(&thumbprint)).await;
    let prov = TestProv;

    let account = authority
        .new_account(
            &prov,
            BASE_URL,
            vec!["mailto:ops@example.org".to_string()],
            jwk.clone(),
        )
        .await
        .unwrap();
    assert_eq!(account.status, types::account::Status::Valid);

    let order = authority
        .new_order(
            &prov,
            BASE_URL,
            &account.id,
            vec![
                types::identifier::Identifier::dns("example.com"),
                types::identifier::Identifier::dns("www.example.com"),
            ],
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(order.status, types::order::Status::Pending);
    assert_eq!(order.identifiers.len(), order.authorizations.len());

    // Satisfy the HTTP-01 challenge on every authorization.
    for authz_url in &order.authorizations {
        let authz = authority
            .get_authz(&prov, BASE_URL, &account.id, id_from_url(authz_url))
            .await
            .unwrap();
        assert_eq!(authz.status, types::authorization::Status::Pending);
        let challenge = authz
            .challenges
            .iter()
            .find(|c| c.challenge_type == types::challenge::Type::HTTP01)
            .unwrap();

        let validated = authority
            .validate_challenge(&prov, BASE_URL, &account.id, &challenge.id, &jwk)
            .await
            .unwrap();
        assert_eq!(validated.status, types::challenge::Status::Valid);
        assert!(validated.validated.is_some());

        let authz = authority
            .get_authz(&prov, BASE_URL, &account.id, id_from_url(authz_url))
            .await
            .unwrap();
        assert_eq!(authz.status, types::authorization::Status::Valid);
    }

    // Every authorization valid: the order reads back ready.
    let order = authority
        .get_order(&prov, BASE_URL, &account.id, &order.id)
        .await
        .unwrap();
    assert_eq!(order.status, types::order::Status::Ready);

    let csr = csr_for_names(&["example.com", "www.example.com"]);
    let order = authority
        .finalize_order(&prov, BASE_URL, &account.id, &order.id, &csr)
        .await
        .unwrap();
    assert_eq!(order.status, types::order::Status::Valid);
    let cert_url = order.certificate.unwrap();

    let pem = authority
        .get_certificate(&account.id, id_from_url(&cert_url))
        .await
        .unwrap();
    assert!(pem.starts_with("-----BEGIN CERTIFICATE-----"));
    assert_eq!(pem.matches("-----BEGIN CERTIFICATE-----").count(), 2);

    // The order shows up in the account's list.
    let list = authority
        .get_orders_by_account(&prov, BASE_URL, &account.id)
        .await
        .unwrap();
    assert_eq!(list.orders.len(), 1);
    assert!(list.orders[0].ends_with(&order.id));
}

#[tokio::test]
async fn wildcard_orders_are_proven_over_dns01_only() {
    let (_, jwk) = account_jwk();
    let txt = SharedTxt::default();
    let validation = ValidationClient {
        http: Arc::new(NoProbe),
        dns: Arc::new(txt.clone()),
        tls: Arc::new(NoProbe),
        timeout: std::time::Duration::from_secs(30),
    };
    let authority = authority_with(validation).await;
    let prov = TestProv;

    let account = authority
        .new_account(&prov, BASE_URL, vec![], jwk.clone())
        .await
        .unwrap();
    let order = authority
        .new_order(
            &prov,
            BASE_URL,
            &account.id,
            vec![types::identifier::Identifier::dns("*.example.com")],
            None,
            None,
        )
        .await
        .unwrap();

    let authz = authority
        .get_authz(
            &prov,
            BASE_URL,
            &account.id,
            id_from_url(&order.authorizations[0]),
        )
        .await
        .unwrap();
    assert_eq!(authz.wildcard, Some(true));
    assert_eq!(authz.identifier.value, "example.com");
    assert_eq!(authz.challenges.len(), 1);
    let challenge = &authz.challenges[0];
    assert_eq!(challenge.challenge_type, types::challenge::Type::DNS01);

    // Publish the expected TXT value, then validate.
    let key_auth = format!("{}.{}", challenge.token, jwk.thumbprint().unwrap());
    let digest =
        openssl::hash::hash(openssl::hash::MessageDigest::sha256(), key_auth.as_bytes()).unwrap();
    txt.0
        .write()
        .unwrap()
        .push(BASE64_URL_SAFE_NO_PAD.encode(&digest));

    let validated = authority
        .validate_challenge(&prov, BASE_URL, &account.id, &challenge.id, &jwk)
        .await
        .unwrap();
    assert_eq!(validated.status, types::challenge::Status::Valid);

    let order = authority
        .get_order(&prov, BASE_URL, &account.id, &order.id)
        .await
        .unwrap();
    assert_eq!(order.status, types::order::Status::Ready);
}

#[tokio::test]
async fn jws_envelope_round_trip_and_replay_protection() {
    let (private, jwk) = account_jwk();
    let authority = authority_with(http01_validation("unused")).await;
    let prov = TestProv;

    let new_account_url = format!("{}/acme/acme/new-account", BASE_URL);
    let nonce = authority.new_nonce().await.unwrap();

    let jws = sign_es256(
        &private,
        json!({"alg": "ES256", "nonce": nonce, "url": new_account_url, "jwk": &jwk}),
        r#"{"termsOfServiceAgreed":true,"contact":["mailto:ops@example.org"]}"#,
    );
    let request = authority.verify_jws(&jws, &new_account_url).await.unwrap();

    let payload: types::account::NewAccountRequest =
        request.payload_as("newAccount").unwrap();
    payload.validate().unwrap();

    let key = match request.key {
        embla::acme::jws::JWSRequestKey::JWK(jwk) => jwk,
        other => panic!("expected a JWK-authenticated request, got {:?}", other),
    };
    let account = authority
        .new_account(&prov, BASE_URL, payload.contact, key)
        .await
        .unwrap();

    // Replaying the same nonce fails.
    let jws = sign_es256(
        &private,
        json!({"alg": "ES256", "nonce": nonce, "url": new_account_url, "jwk": &jwk}),
        "",
    );
    let err = authority
        .verify_jws(&jws, &new_account_url)
        .await
        .unwrap_err();
    assert_eq!(err.error_type, types::error::Type::BadNonce);

    // POST-as-GET authenticated by kid resolves the stored account.
    let account_url = authority.account_url(&prov, BASE_URL, &account.id);
    let nonce = authority.new_nonce().await.unwrap();
    let jws = sign_es256(
        &private,
        json!({"alg": "ES256", "nonce": nonce, "url": account_url, "kid": account_url}),
        "",
    );
    let request = authority.verify_jws(&jws, &account_url).await.unwrap();
    assert!(request.is_post_as_get());
    match request.key {
        embla::acme::jws::JWSRequestKey::Account(record) => {
            assert_eq!(record.id, account.id);
        }
        other => panic!("expected a kid-authenticated request, got {:?}", other),
    }
}

#[tokio::test]
async fn only_return_existing_without_an_account_is_rejected() {
    let (_, jwk) = account_jwk();
    let authority = authority_with(http01_validation("unused")).await;
    let prov = TestProv;

    let payload: types::account::NewAccountRequest =
        serde_json::from_value(json!({"onlyReturnExisting": true})).unwrap();
    payload.validate().unwrap();

    let err = authority
        .get_account_by_key(&prov, BASE_URL, &jwk)
        .await
        .unwrap_err();
    assert_eq!(err.error_type, types::error::Type::AccountDoesNotExist);
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn account_deactivation_flow_matches_the_surface_contract() {
    let (_, jwk) = account_jwk();
    let authority = authority_with(http01_validation("unused")).await;
    let prov = TestProv;

    let account = authority
        .new_account(&prov, BASE_URL, vec![], jwk)
        .await
        .unwrap();

    let payload: types::account::UpdateAccountRequest =
        serde_json::from_value(json!({"status": "deactivated"})).unwrap();
    payload.validate().unwrap();
    assert!(payload.is_deactivation());

    let updated = authority
        .deactivate_account(&prov, BASE_URL, &account.id)
        .await
        .unwrap();
    assert_eq!(updated.status, types::account::Status::Deactivated);

    // Location header value for the response.
    let location = authority.account_url(&prov, BASE_URL, &account.id);
    assert_eq!(
        location,
        format!("{}/acme/acme/account/{}", BASE_URL, account.id)
    );

    // Deactivated accounts cannot order.
    let err = authority
        .update_account(&prov, BASE_URL, &account.id, vec![])
        .await
        .unwrap_err();
    assert_eq!(err.error_type, types::error::Type::Unauthorized);
}

#[tokio::test]
async fn handlers_guard_account_url_ownership() {
    let (_, jwk) = account_jwk();
    let authority = authority_with(http01_validation("unused")).await;
    let prov = TestProv;

    let account = authority
        .new_account(&prov, BASE_URL, vec![], jwk)
        .await
        .unwrap();
    let record = embla::acme::account::AccountRecord {
        id: account.id.clone(),
        status: account.status,
        contact: account.contact.clone(),
        key: account.key.clone(),
        created_at: account.created_at,
        version: 0,
    };

    let ctx = RequestContext::new()
        .with_provisioner(Arc::new(TestProv))
        .with_account(record)
        .with_base_url(BASE_URL);

    let err = ctx.require_account_id("some-other-account").unwrap_err();
    assert_eq!(err.error_type, types::error::Type::Unauthorized);
    assert_eq!(err.detail, "account ID does not match url param");

    // The happy path flows into the order listing.
    let account_ref = ctx.require_account_id(&account.id).unwrap();
    let list = authority
        .get_orders_by_account(ctx.provisioner().unwrap(), ctx.base_url(), &account_ref.id)
        .await
        .unwrap();
    assert!(list.orders.is_empty());
}

#[tokio::test]
async fn foreign_accounts_cannot_read_each_others_resources() {
    let (_, jwk_a) = account_jwk();
    let (_, jwk_b) = account_jwk();
    let authority = authority_with(http01_validation("unused")).await;
    let prov = TestProv;

    let account_a = authority
        .new_account(&prov, BASE_URL, vec![], jwk_a)
        .await
        .unwrap();
    let account_b = authority
        .new_account(&prov, BASE_URL, vec![], jwk_b)
        .await
        .unwrap();

    let order = authority
        .new_order(
            &prov,
            BASE_URL,
            &account_a.id,
            vec![types::identifier::Identifier::dns("example.com")],
            None,
            None,
        )
        .await
        .unwrap();

    let err = authority
        .get_order(&prov, BASE_URL, &account_b.id, &order.id)
        .await
        .unwrap_err();
    assert_eq!(err.error_type, types::error::Type::Unauthorized);

    let err = authority
        .get_authz(
            &prov,
            BASE_URL,
            &account_b.id,
            id_from_url(&order.authorizations[0]),
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_type, types::error::Type::Unauthorized);
}

#[tokio::test]
async fn directory_is_stable_per_provisioner_and_base_url() {
    let authority = authority_with(http01_validation("unused")).await;
    let prov = TestProv;

    let dir = authority.get_directory(&prov, BASE_URL);
    assert_eq!(dir.new_nonce, format!("{}/acme/acme/new-nonce", BASE_URL));
    assert_eq!(dir.new_account, format!("{}/acme/acme/new-account", BASE_URL));
    assert_eq!(dir.new_order, format!("{}/acme/acme/new-order", BASE_URL));

    // Without a request base URL the configured DNS name is used.
    let dir = authority.get_directory(&prov, "");
    assert_eq!(
        dir.key_change,
        "https://ca.example.org/acme/acme/key-change"
    );
}
