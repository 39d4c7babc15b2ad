//! The ACME authority: account, order, authorization, challenge and
//! certificate lifecycles over a compare-and-swap key-value store.

use std::sync::Arc;

use async_trait::async_trait;

use crate::storage::{Store, StoreError};
use crate::types;
use crate::validator::ValidationClient;

pub mod account;
pub mod authz;
pub mod cert;
pub mod challenge;
pub mod jws;
pub mod links;
pub mod order;
pub mod replay;

pub use links::{Link, LinkBuilder};

pub type ACMEResult<I> = Result<I, types::error::Error>;

pub(crate) const ACCOUNT_TABLE: &str = "acme_accounts";
pub(crate) const ACCOUNT_BY_KEY_ID_TABLE: &str = "acme_keyID_accountID_index";
pub(crate) const AUTHZ_TABLE: &str = "acme_authzs";
pub(crate) const CHALLENGE_TABLE: &str = "acme_challenges";
pub(crate) const NONCE_TABLE: &str = "nonces";
pub(crate) const ORDER_TABLE: &str = "acme_orders";
pub(crate) const ORDERS_BY_ACCOUNT_TABLE: &str = "acme_account_orders_index";
pub(crate) const CERT_TABLE: &str = "acme_certs";

const ALL_TABLES: &[&str] = &[
    ACCOUNT_TABLE,
    ACCOUNT_BY_KEY_ID_TABLE,
    AUTHZ_TABLE,
    CHALLENGE_TABLE,
    NONCE_TABLE,
    ORDER_TABLE,
    ORDERS_BY_ACCOUNT_TABLE,
    CERT_TABLE,
];

/// Bounded retries for compare-and-swap conflicts before surfacing
/// `serverInternal`.
pub(crate) const CAS_RETRY_LIMIT: usize = 3;

pub(crate) fn store_error(err: StoreError, context: &str) -> types::error::Error {
    log::error!("{}: {}", context, err);
    types::error::Error::server_internal(context)
}

/// Stored records carry a monotonic version; every mutation bumps it so
/// concurrent writers serialize on the swap.
pub(crate) trait Record: serde::Serialize + serde::de::DeserializeOwned {
    fn bump_version(&mut self);
}

pub(crate) async fn get_record<T: serde::de::DeserializeOwned>(
    db: &dyn Store,
    table: &str,
    key: &str,
) -> ACMEResult<Option<T>> {
    let value = db
        .get(table, key.as_bytes())
        .await
        .map_err(|err| store_error(err, "error reading record"))?;
    match value {
        Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|err| {
            log::error!("Corrupt record {}/{}: {}", table, key, err);
            types::error::Error::server_internal("error reading record")
        }),
        None => Ok(None),
    }
}

pub(crate) async fn insert_record<T: serde::Serialize>(
    db: &dyn Store,
    table: &str,
    key: &str,
    record: &T,
) -> ACMEResult<()> {
    let bytes = serde_json::to_vec(record).map_err(|err| {
        log::error!("Unable to serialize record for {}/{}: {}", table, key, err);
        types::error::Error::server_internal("error storing record")
    })?;
    let inserted = db
        .cas(table, key.as_bytes(), None, bytes)
        .await
        .map_err(|err| store_error(err, "error storing record"))?;
    if !inserted {
        log::error!("Id collision inserting {}/{}", table, key);
        return Err(types::error::Error::server_internal("error storing record"));
    }
    Ok(())
}

/// Read-modify-write under compare-and-swap. `apply` returns whether it
/// changed the record; unchanged records are returned without a write.
pub(crate) async fn update_record<T, M, F>(
    db: &dyn Store,
    table: &str,
    key: &str,
    miss: M,
    mut apply: F,
) -> ACMEResult<T>
where
    T: Record,
    M: Fn() -> types::error::Error,
    F: FnMut(&mut T) -> ACMEResult<bool>,
{
    for _ in 0..CAS_RETRY_LIMIT {
        let old_bytes = db
            .get(table, key.as_bytes())
            .await
            .map_err(|err| store_error(err, "error reading record"))?
            .ok_or_else(&miss)?;
        let mut record: T = serde_json::from_slice(&old_bytes).map_err(|err| {
            log::error!("Corrupt record {}/{}: {}", table, key, err);
            types::error::Error::server_internal("error reading record")
        })?;

        if !apply(&mut record)? {
            return Ok(record);
        }
        record.bump_version();

        let new_bytes = serde_json::to_vec(&record).map_err(|err| {
            log::error!("Unable to serialize record for {}/{}: {}", table, key, err);
            types::error::Error::server_internal("error storing record")
        })?;
        let swapped = db
            .cas(table, key.as_bytes(), Some(&old_bytes), new_bytes)
            .await
            .map_err(|err| store_error(err, "error storing record"))?;
        if swapped {
            return Ok(record);
        }
        log::debug!("CAS conflict on {}/{}, retrying", table, key);
    }
    log::error!("Gave up after {} CAS attempts on {}/{}", CAS_RETRY_LIMIT, table, key);
    Err(types::error::Error::server_internal(
        "error storing record",
    ))
}

/// Policy source a CA attaches to an ACME directory; decides which
/// identifiers may be ordered.
pub trait Provisioner: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn authorize_identifier(&self, identifier: &types::identifier::Identifier) -> ACMEResult<()>;
}

impl std::fmt::Debug for dyn Provisioner + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

/// The narrow signing backend seam: provisioner lookup plus "sign this
/// CSR under this provisioner's policy".
#[async_trait]
pub trait SignAuthority: Send + Sync {
    fn load_provisioner_by_id(&self, id: &str) -> ACMEResult<Arc<dyn Provisioner>>;

    /// Returns the issued chain in DER, leaf first.
    async fn sign(
        &self,
        csr_der: &[u8],
        provisioner: &dyn Provisioner,
    ) -> Result<Vec<Vec<u8>>, String>;
}

#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    pub order_lifetime: chrono::Duration,
    pub authorization_lifetime: chrono::Duration,
    /// Default certificate validity when an order names no notAfter.
    pub certificate_lifetime: chrono::Duration,
    pub nonce_lifetime: chrono::Duration,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        AuthorityConfig {
            order_lifetime: chrono::Duration::hours(24),
            authorization_lifetime: chrono::Duration::hours(24),
            certificate_lifetime: chrono::Duration::hours(24),
            nonce_lifetime: chrono::Duration::minutes(5),
        }
    }
}

/// What the HTTP layer resolved before dispatching to the authority.
/// Accessors produce the problem documents the surface reports when a
/// handler runs without its prerequisites.
#[derive(Default)]
pub struct RequestContext {
    provisioner: Option<Arc<dyn Provisioner>>,
    account: Option<account::AccountRecord>,
    base_url: String,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn with_account(mut self, account: account::AccountRecord) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_base_url<B: Into<String>>(mut self, base_url: B) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn provisioner(&self) -> ACMEResult<&dyn Provisioner> {
        self.provisioner
            .as_deref()
            .ok_or_else(|| {
                types::error::Error::server_internal("provisioner expected in request context")
            })
    }

    pub fn account(&self) -> ACMEResult<&account::AccountRecord> {
        self.account.as_ref().ok_or_else(|| {
            types::error::Error::server_internal("account expected in request context")
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Guards handlers whose URL names an account id: the authenticated
    /// account must be the same one.
    pub fn require_account_id(&self, url_param: &str) -> ACMEResult<&account::AccountRecord> {
        let account = self.account()?;
        if account.id != url_param {
            return Err(types::error::Error::unauthorized(
                "account ID does not match url param",
            ));
        }
        Ok(account)
    }
}

/// Composed authority facade. Stateless across requests; everything
/// durable lives in the store.
pub struct Authority {
    db: Arc<dyn Store>,
    links: LinkBuilder,
    sign_auth: Arc<dyn SignAuthority>,
    validation: ValidationClient,
    config: AuthorityConfig,
}

impl Authority {
    /// Bootstraps the backing tables and returns the authority.
    pub async fn new(
        db: Arc<dyn Store>,
        dns: &str,
        prefix: &str,
        sign_auth: Arc<dyn SignAuthority>,
        validation: ValidationClient,
    ) -> ACMEResult<Self> {
        for table in ALL_TABLES {
            db.create_table(table)
                .await
                .map_err(|err| store_error(err, "error creating table"))?;
        }
        Ok(Authority {
            db,
            links: LinkBuilder::new(dns, prefix),
            sign_auth,
            validation,
            config: AuthorityConfig::default(),
        })
    }

    pub fn with_config(mut self, config: AuthorityConfig) -> Self {
        self.config = config;
        self
    }

    pub fn links(&self) -> &LinkBuilder {
        &self.links
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    pub fn load_provisioner_by_id(&self, id: &str) -> ACMEResult<Arc<dyn Provisioner>> {
        self.sign_auth.load_provisioner_by_id(id)
    }

    pub fn get_directory(
        &self,
        provisioner: &dyn Provisioner,
        base_url: &str,
    ) -> types::directory::Directory {
        self.links.directory(provisioner.name(), base_url)
    }

    // ---- nonces ----

    pub async fn new_nonce(&self) -> ACMEResult<String> {
        replay::new_nonce(self.db.as_ref()).await
    }

    pub async fn use_nonce(&self, nonce: &str) -> ACMEResult<()> {
        replay::use_nonce(self.db.as_ref(), self.config.nonce_lifetime, nonce).await
    }

    // ---- request envelope ----

    /// Verifies a flattened JWS against this authority's accounts and
    /// nonce store. `request_url` is the absolute URL the request hit.
    pub async fn verify_jws(
        &self,
        jws: &types::jose::FlattenedJWS,
        request_url: &str,
    ) -> ACMEResult<jws::JWSRequest> {
        jws::verify_request(
            self.db.as_ref(),
            self.config.nonce_lifetime,
            jws,
            request_url,
        )
        .await
    }

    // ---- accounts ----

    pub async fn new_account(
        &self,
        provisioner: &dyn Provisioner,
        base_url: &str,
        contact: Vec<String>,
        key: types::jose::JWK,
    ) -> ACMEResult<types::account::Account> {
        let record = account::new_account(self.db.as_ref(), contact, key).await?;
        Ok(record.to_acme(&self.links, provisioner.name(), base_url))
    }

    pub async fn get_account(
        &self,
        provisioner: &dyn Provisioner,
        base_url: &str,
        id: &str,
    ) -> ACMEResult<types::account::Account> {
        let record = account::get_account(self.db.as_ref(), id).await?;
        Ok(record.to_acme(&self.links, provisioner.name(), base_url))
    }

    pub async fn get_account_by_key(
        &self,
        provisioner: &dyn Provisioner,
        base_url: &str,
        jwk: &types::jose::JWK,
    ) -> ACMEResult<types::account::Account> {
        let record = account::get_account_by_key(self.db.as_ref(), jwk).await?;
        Ok(record.to_acme(&self.links, provisioner.name(), base_url))
    }

    pub async fn update_account(
        &self,
        provisioner: &dyn Provisioner,
        base_url: &str,
        id: &str,
        contact: Vec<String>,
    ) -> ACMEResult<types::account::Account> {
        let record = account::update_contacts(self.db.as_ref(), id, contact).await?;
        Ok(record.to_acme(&self.links, provisioner.name(), base_url))
    }

    pub async fn deactivate_account(
        &self,
        provisioner: &dyn Provisioner,
        base_url: &str,
        id: &str,
    ) -> ACMEResult<types::account::Account> {
        let record = account::deactivate(self.db.as_ref(), id).await?;
        Ok(record.to_acme(&self.links, provisioner.name(), base_url))
    }

    /// RFC 8555 §7.3.5 key rollover.
    pub async fn change_key(
        &self,
        provisioner: &dyn Provisioner,
        base_url: &str,
        id: &str,
        new_key: types::jose::JWK,
    ) -> ACMEResult<types::account::Account> {
        let record = account::change_key(self.db.as_ref(), id, new_key).await?;
        Ok(record.to_acme(&self.links, provisioner.name(), base_url))
    }

    /// The canonical account URL, used as the JWS kid and the
    /// `Location` header on account responses.
    pub fn account_url(&self, provisioner: &dyn Provisioner, base_url: &str, id: &str) -> String {
        self.links
            .link(Link::Account, provisioner.name(), true, base_url, &[id])
    }

    // ---- orders ----

    pub async fn new_order(
        &self,
        provisioner: &dyn Provisioner,
        base_url: &str,
        account_id: &str,
        identifiers: Vec<types::identifier::Identifier>,
        not_before: Option<chrono::DateTime<chrono::Utc>>,
        not_after: Option<chrono::DateTime<chrono::Utc>>,
    ) -> ACMEResult<types::order::Order> {
        let record = order::new_order(
            self.db.as_ref(),
            &self.config,
            provisioner,
            account_id,
            identifiers,
            not_before,
            not_after,
        )
        .await?;
        Ok(record.to_acme(&self.links, provisioner.name(), base_url))
    }

    pub async fn get_order(
        &self,
        provisioner: &dyn Provisioner,
        base_url: &str,
        account_id: &str,
        order_id: &str,
    ) -> ACMEResult<types::order::Order> {
        let record = order::get_order(self.db.as_ref(), order_id).await?;
        if record.account_id != account_id {
            return Err(types::error::Error::unauthorized(
                "account does not own order",
            ));
        }
        let record = order::update_status(self.db.as_ref(), record).await?;
        Ok(record.to_acme(&self.links, provisioner.name(), base_url))
    }

    pub async fn get_orders_by_account(
        &self,
        provisioner: &dyn Provisioner,
        base_url: &str,
        account_id: &str,
    ) -> ACMEResult<types::order::List> {
        let orders = order::orders_by_account(
            self.db.as_ref(),
            &self.links,
            provisioner.name(),
            base_url,
            account_id,
        )
        .await?;
        Ok(types::order::List { orders })
    }

    pub async fn finalize_order(
        &self,
        provisioner: &dyn Provisioner,
        base_url: &str,
        account_id: &str,
        order_id: &str,
        csr_der: &[u8],
    ) -> ACMEResult<types::order::Order> {
        let record = order::get_order(self.db.as_ref(), order_id).await?;
        if record.account_id != account_id {
            return Err(types::error::Error::unauthorized(
                "account does not own order",
            ));
        }
        let record = order::finalize(
            self.db.as_ref(),
            self.sign_auth.as_ref(),
            provisioner,
            record,
            csr_der,
        )
        .await?;
        Ok(record.to_acme(&self.links, provisioner.name(), base_url))
    }

    // ---- authorizations ----

    pub async fn get_authz(
        &self,
        provisioner: &dyn Provisioner,
        base_url: &str,
        account_id: &str,
        authz_id: &str,
    ) -> ACMEResult<types::authorization::Authorization> {
        let record = authz::get_authz(self.db.as_ref(), authz_id).await?;
        if record.account_id != account_id {
            return Err(types::error::Error::unauthorized(
                "account does not own authorization",
            ));
        }
        let record = authz::update_status(self.db.as_ref(), record).await?;
        record
            .to_acme(self.db.as_ref(), &self.links, provisioner.name(), base_url)
            .await
    }

    pub async fn deactivate_authz(
        &self,
        provisioner: &dyn Provisioner,
        base_url: &str,
        account_id: &str,
        authz_id: &str,
    ) -> ACMEResult<types::authorization::Authorization> {
        let record = authz::get_authz(self.db.as_ref(), authz_id).await?;
        if record.account_id != account_id {
            return Err(types::error::Error::unauthorized(
                "account does not own authorization",
            ));
        }
        let record = authz::deactivate(self.db.as_ref(), authz_id).await?;
        record
            .to_acme(self.db.as_ref(), &self.links, provisioner.name(), base_url)
            .await
    }

    // ---- challenges ----

    pub async fn get_challenge(
        &self,
        provisioner: &dyn Provisioner,
        base_url: &str,
        account_id: &str,
        challenge_id: &str,
    ) -> ACMEResult<types::challenge::Challenge> {
        let record = challenge::get_challenge(self.db.as_ref(), challenge_id).await?;
        if record.account_id != account_id {
            return Err(types::error::Error::unauthorized(
                "account does not own challenge",
            ));
        }
        Ok(record.to_acme(&self.links, provisioner.name(), base_url))
    }

    /// Drives a challenge through its validator with the account key
    /// the request was authenticated with.
    pub async fn validate_challenge(
        &self,
        provisioner: &dyn Provisioner,
        base_url: &str,
        account_id: &str,
        challenge_id: &str,
        account_key: &types::jose::JWK,
    ) -> ACMEResult<types::challenge::Challenge> {
        let record = challenge::get_challenge(self.db.as_ref(), challenge_id).await?;
        if record.account_id != account_id {
            return Err(types::error::Error::unauthorized(
                "account does not own challenge",
            ));
        }
        let parent = authz::get_authz(self.db.as_ref(), &record.authz_id).await?;
        let record = challenge::validate_challenge(
            self.db.as_ref(),
            &self.validation,
            account_id,
            challenge_id,
            &parent.identifier,
            account_key,
        )
        .await?;
        Ok(record.to_acme(&self.links, provisioner.name(), base_url))
    }

    // ---- certificates ----

    /// PEM certificate chain for the `application/pem-certificate-chain`
    /// response body.
    pub async fn get_certificate(&self, account_id: &str, cert_id: &str) -> ACMEResult<String> {
        let record = cert::get_certificate(self.db.as_ref(), account_id, cert_id).await?;
        record.to_pem()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    pub(crate) async fn test_store() -> MemoryStore {
        let db = MemoryStore::new();
        for table in ALL_TABLES {
            db.create_table(table).await.unwrap();
        }
        db
    }

    pub(crate) fn ec_private_key() -> openssl::pkey::PKey<openssl::pkey::Private> {
        let group =
            openssl::ec::EcGroup::from_curve_name(openssl::nid::Nid::X9_62_PRIME256V1).unwrap();
        openssl::pkey::PKey::from_ec_key(openssl::ec::EcKey::generate(&group).unwrap()).unwrap()
    }

    pub(crate) fn ec_jwk_with_key() -> (
        openssl::pkey::PKey<openssl::pkey::Private>,
        types::jose::JWK,
    ) {
        let private = ec_private_key();
        let public = openssl::pkey::PKey::public_key_from_der(
            &private.public_key_to_der().unwrap(),
        )
        .unwrap();
        let jwk = types::jose::JWK::try_from(&public).unwrap();
        (private, jwk)
    }

    pub(crate) fn ec_jwk() -> types::jose::JWK {
        ec_jwk_with_key().1
    }

    pub(crate) struct TestProvisioner;

    impl Provisioner for TestProvisioner {
        fn id(&self) -> &str {
            "test-provisioner-id"
        }

        fn name(&self) -> &str {
            "test@acme-provisioner.com"
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

    pub(crate) fn test_provisioner() -> TestProvisioner {
        TestProvisioner
    }

    pub(crate) fn test_config() -> AuthorityConfig {
        AuthorityConfig::default()
    }

    pub(crate) fn self_signed_cert(
        domain: &str,
    ) -> (Vec<u8>, openssl::pkey::PKey<openssl::pkey::Private>) {
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
        (builder.build().to_der().unwrap(), key)
    }

    /// PKCS#10 CSR with `names[0]` as the CN and every name as a SAN,
    /// signed with a fresh P-256 key.
    pub(crate) fn csr_for_names(names: &[&str]) -> Vec<u8> {
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

    /// Signing backend that issues a throwaway chain.
    pub(crate) struct StubSigner;

    #[async_trait]
    impl SignAuthority for StubSigner {
        fn load_provisioner_by_id(&self, id: &str) -> ACMEResult<Arc<dyn Provisioner>> {
            if id == TestProvisioner.id() {
                Ok(Arc::new(TestProvisioner))
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
            let (leaf, _) = self_signed_cert("leaf.example.test");
            let (issuer, _) = self_signed_cert("issuer.example.test");
            Ok(vec![leaf, issuer])
        }
    }

    pub(crate) struct FailingSigner;

    #[async_trait]
    impl SignAuthority for FailingSigner {
        fn load_provisioner_by_id(&self, _id: &str) -> ACMEResult<Arc<dyn Provisioner>> {
            Err(types::error::Error::not_found("no provisioners here"))
        }

        async fn sign(
            &self,
            _csr_der: &[u8],
            _provisioner: &dyn Provisioner,
        ) -> Result<Vec<Vec<u8>>, String> {
            Err("signing backend unavailable".to_string())
        }
    }

    mod request_context {
        use super::*;

        #[test]
        fn missing_provisioner_is_the_exact_server_internal() {
            let ctx = RequestContext::new();
            let err = ctx.provisioner().unwrap_err();
            assert_eq!(err.error_type, types::error::Type::ServerInternal);
            assert_eq!(err.status_code(), 500);
            assert_eq!(err.detail, "provisioner expected in request context");
        }

        #[test]
        fn account_url_mismatch_is_unauthorized() {
            let account = account::AccountRecord {
                id: "foo".to_string(),
                status: types::account::Status::Valid,
                contact: vec![],
                key: ec_jwk(),
                created_at: chrono::Utc::now(),
                version: 0,
            };
            let ctx = RequestContext::new().with_account(account);
            let err = ctx.require_account_id("account-id").unwrap_err();
            assert_eq!(err.error_type, types::error::Type::Unauthorized);
            assert_eq!(err.status_code(), 401);
            assert_eq!(err.detail, "account ID does not match url param");
        }

        #[test]
        fn matching_account_passes() {
            let account = account::AccountRecord {
                id: "account-id".to_string(),
                status: types::account::Status::Valid,
                contact: vec![],
                key: ec_jwk(),
                created_at: chrono::Utc::now(),
                version: 0,
            };
            let ctx = RequestContext::new().with_account(account);
            assert!(ctx.require_account_id("account-id").is_ok());
        }
    }
}
