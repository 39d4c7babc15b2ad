use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use super::{get_record, insert_record, ACMEResult, CERT_TABLE};
use crate::storage::Store;
use crate::types;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CertificateRecord {
    pub id: String,
    pub account_id: String,
    pub order_id: String,
    pub leaf: Vec<u8>,
    /// Issuing chain, leaf's issuer first.
    pub chain: Vec<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

impl CertificateRecord {
    /// Renders the `application/pem-certificate-chain` body: the leaf
    /// followed by the chain.
    pub fn to_pem(&self) -> ACMEResult<String> {
        let mut out = String::new();
        for der in std::iter::once(&self.leaf).chain(self.chain.iter()) {
            let cert = openssl::x509::X509::from_der(der).map_err(|err| {
                log::error!("Corrupt stored certificate {}: {}", self.id, err);
                types::error::Error::server_internal("error reading stored certificate")
            })?;
            let pem = cert.to_pem().map_err(|err| {
                log::error!("Unable to PEM-encode certificate {}: {}", self.id, err);
                types::error::Error::server_internal("error encoding certificate")
            })?;
            out.push_str(&String::from_utf8_lossy(&pem));
        }
        Ok(out)
    }
}

pub(crate) async fn new_certificate(
    db: &dyn Store,
    account_id: &str,
    order_id: &str,
    leaf: Vec<u8>,
    chain: Vec<Vec<u8>>,
) -> ACMEResult<CertificateRecord> {
    let cert = CertificateRecord {
        id: crate::util::new_id(),
        account_id: account_id.to_string(),
        order_id: order_id.to_string(),
        leaf,
        chain,
        created_at: Utc::now(),
    };
    insert_record(db, CERT_TABLE, &cert.id, &cert).await?;
    Ok(cert)
}

pub(crate) async fn get_certificate(
    db: &dyn Store,
    account_id: &str,
    cert_id: &str,
) -> ACMEResult<CertificateRecord> {
    let cert: CertificateRecord = get_record(db, CERT_TABLE, cert_id)
        .await?
        .ok_or_else(|| {
            types::error::Error::not_found(format!("certificate {} does not exist", cert_id))
        })?;
    if cert.account_id != account_id {
        return Err(types::error::Error::unauthorized(
            "account does not own certificate",
        ));
    }
    Ok(cert)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::tests::{self_signed_cert, test_store};
    use crate::types::error::Type;

    #[tokio::test]
    async fn certificate_is_only_readable_by_its_owner() {
        let db = test_store().await;
        let (leaf, _) = self_signed_cert("example.com");
        let cert = new_certificate(&db, "acct", "order", leaf, vec![])
            .await
            .unwrap();

        assert_eq!(
            get_certificate(&db, "acct", &cert.id).await.unwrap().id,
            cert.id
        );
        let err = get_certificate(&db, "intruder", &cert.id)
            .await
            .unwrap_err();
        assert_eq!(err.error_type, Type::Unauthorized);
    }

    #[tokio::test]
    async fn pem_chain_renders_leaf_first() {
        let db = test_store().await;
        let (leaf, _) = self_signed_cert("example.com");
        let (issuer, _) = self_signed_cert("ca.example.org");
        let cert = new_certificate(&db, "acct", "order", leaf, vec![issuer])
            .await
            .unwrap();

        let pem = cert.to_pem().unwrap();
        assert_eq!(pem.matches("-----BEGIN CERTIFICATE-----").count(), 2);
    }
}
