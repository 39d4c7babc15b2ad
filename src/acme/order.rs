use std::collections::BTreeSet;

use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::FromDer;

use super::authz::{self, AuthzRecord};
use super::links::{Link, LinkBuilder};
use super::{
    cert, get_record, insert_record, store_error, update_record, ACMEResult, AuthorityConfig,
    Provisioner, Record, SignAuthority, ORDERS_BY_ACCOUNT_TABLE, ORDER_TABLE,
};
use crate::storage::Store;
use crate::types;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OrderRecord {
    pub id: String,
    pub account_id: String,
    /// Identifiers as requested, wildcard prefixes included.
    pub identifiers: Vec<types::identifier::Identifier>,
    /// Same order as `identifiers`.
    pub authz_ids: Vec<String>,
    pub status: types::order::Status,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub certificate_id: Option<String>,
    pub error: Option<types::error::Error>,
    pub version: u64,
}

impl Record for OrderRecord {
    fn bump_version(&mut self) {
        self.version += 1;
    }
}

impl OrderRecord {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            types::order::Status::Valid | types::order::Status::Invalid
        )
    }

    pub fn to_acme(
        &self,
        links: &LinkBuilder,
        provisioner: &str,
        base_url: &str,
    ) -> types::order::Order {
        types::order::Order {
            id: self.id.clone(),
            status: self.status,
            expires: self.expires_at,
            identifiers: self.identifiers.clone(),
            not_before: Some(self.not_before),
            not_after: Some(self.not_after),
            error: self.error.clone(),
            authorizations: self
                .authz_ids
                .iter()
                .map(|aid| links.link(Link::Authz, provisioner, true, base_url, &[aid]))
                .collect(),
            finalize: links.link(Link::FinalizeOrder, provisioner, true, base_url, &[&self.id]),
            certificate: self
                .certificate_id
                .as_ref()
                .map(|cid| links.link(Link::Certificate, provisioner, true, base_url, &[cid])),
        }
    }
}

fn collect_policy_errors(
    provisioner: &dyn Provisioner,
    identifiers: &[types::identifier::Identifier],
) -> ACMEResult<()> {
    let mut errors = vec![];
    for identifier in identifiers {
        if let Err(err) = provisioner.authorize_identifier(identifier) {
            errors.push(err.with_identifier(identifier.clone()));
        }
    }
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.pop().unwrap()),
        n => Err(types::error::Error::compound(
            errors,
            format!("{} identifiers were rejected by policy", n),
        )),
    }
}

/// Creates the order with one pending authorization per identifier and
/// records it in the account's order index.
pub(crate) async fn new_order(
    db: &dyn Store,
    config: &AuthorityConfig,
    provisioner: &dyn Provisioner,
    account_id: &str,
    identifiers: Vec<types::identifier::Identifier>,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
) -> ACMEResult<OrderRecord> {
    if identifiers.is_empty() {
        return Err(types::error::Error::malformed(
            "identifiers list cannot be empty",
        ));
    }
    for identifier in &identifiers {
        if types::identifier::Type::from_str(&identifier.id_type).is_none() {
            return Err(types::error::Error::unsupported_identifier(format!(
                "identifier type '{}' is not supported",
                identifier.id_type
            ))
            .with_identifier(identifier.clone()));
        }
    }
    collect_policy_errors(provisioner, &identifiers)?;

    let now = Utc::now();
    let not_before = not_before.unwrap_or(now);
    let not_after = not_after.unwrap_or(not_before + config.certificate_lifetime);
    if not_after <= not_before {
        return Err(types::error::Error::malformed(
            "notAfter must be later than notBefore",
        ));
    }

    let authz_expiry = now + config.authorization_lifetime;
    let mut authz_ids = Vec::with_capacity(identifiers.len());
    for identifier in &identifiers {
        let authz = authz::new_authz(db, account_id, identifier, authz_expiry).await?;
        authz_ids.push(authz.id);
    }

    let order = OrderRecord {
        id: crate::util::new_id(),
        account_id: account_id.to_string(),
        identifiers,
        authz_ids,
        status: types::order::Status::Pending,
        not_before,
        not_after,
        expires_at: now + config.order_lifetime,
        certificate_id: None,
        error: None,
        version: 0,
    };
    insert_record(db, ORDER_TABLE, &order.id, &order).await?;
    add_order_to_index(db, account_id, &order.id).await?;
    Ok(order)
}

async fn add_order_to_index(db: &dyn Store, account_id: &str, order_id: &str) -> ACMEResult<()> {
    for _ in 0..super::CAS_RETRY_LIMIT {
        let old = db
            .get(ORDERS_BY_ACCOUNT_TABLE, account_id.as_bytes())
            .await
            .map_err(|err| store_error(err, "error reading account order index"))?;
        let mut ids: Vec<String> = match &old {
            Some(bytes) => serde_json::from_slice(bytes).map_err(|err| {
                log::error!("Corrupt order index for account {}: {}", account_id, err);
                types::error::Error::server_internal("error reading account order index")
            })?,
            None => vec![],
        };
        ids.push(order_id.to_string());
        let new = serde_json::to_vec(&ids).map_err(|err| {
            log::error!("Unable to serialize order index: {}", err);
            types::error::Error::server_internal("error writing account order index")
        })?;
        let swapped = db
            .cas(
                ORDERS_BY_ACCOUNT_TABLE,
                account_id.as_bytes(),
                old.as_deref(),
                new,
            )
            .await
            .map_err(|err| store_error(err, "error writing account order index"))?;
        if swapped {
            return Ok(());
        }
        log::debug!("Contention on order index for account {}", account_id);
    }
    Err(types::error::Error::server_internal(
        "error writing account order index",
    ))
}

pub(crate) async fn order_ids_by_account(
    db: &dyn Store,
    account_id: &str,
) -> ACMEResult<Vec<String>> {
    let value = db
        .get(ORDERS_BY_ACCOUNT_TABLE, account_id.as_bytes())
        .await
        .map_err(|err| store_error(err, "error reading account order index"))?;
    match value {
        Some(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
            log::error!("Corrupt order index for account {}: {}", account_id, err);
            types::error::Error::server_internal("error reading account order index")
        }),
        None => Ok(vec![]),
    }
}

pub(crate) async fn get_order(db: &dyn Store, id: &str) -> ACMEResult<OrderRecord> {
    get_record(db, ORDER_TABLE, id)
        .await?
        .ok_or_else(|| types::error::Error::not_found(format!("order {} does not exist", id)))
}

async fn load_updated_authzs(db: &dyn Store, order: &OrderRecord) -> ACMEResult<Vec<AuthzRecord>> {
    let mut authzs = Vec::with_capacity(order.authz_ids.len());
    for aid in &order.authz_ids {
        let authz = authz::get_authz(db, aid).await?;
        authzs.push(authz::update_status(db, authz).await?);
    }
    Ok(authzs)
}

/// Pull-based status recomputation over the authorization children and
/// the expiry clock; persists under compare-and-swap.
pub(crate) async fn update_status(db: &dyn Store, order: OrderRecord) -> ACMEResult<OrderRecord> {
    if order.is_terminal() {
        return Ok(order);
    }

    let now = Utc::now();
    let (target, error) = if order.expires_at < now {
        (
            Some(types::order::Status::Invalid),
            Some(types::error::Error::malformed("order has expired")),
        )
    } else {
        let authzs = load_updated_authzs(db, &order).await?;
        // Only an invalid authorization fails the order; one that
        // expires or is deactivated stops progress without
        // invalidating an order that already reached ready.
        let any_failed = authzs
            .iter()
            .any(|a| a.status == types::authorization::Status::Invalid);
        let all_valid = authzs
            .iter()
            .all(|a| a.status == types::authorization::Status::Valid);
        if any_failed {
            (Some(types::order::Status::Invalid), None)
        } else if all_valid && order.status == types::order::Status::Pending {
            (Some(types::order::Status::Ready), None)
        } else {
            (None, None)
        }
    };

    let target = match target {
        Some(t) if t != order.status => t,
        _ => return Ok(order),
    };

    let id = order.id.clone();
    update_record(
        db,
        ORDER_TABLE,
        &order.id,
        move || types::error::Error::not_found(format!("order {} does not exist", id)),
        |o: &mut OrderRecord| {
            if o.is_terminal() {
                return Ok(false);
            }
            o.status = target;
            if let Some(err) = &error {
                o.error = Some(err.clone());
            }
            Ok(true)
        },
    )
    .await
}

struct CsrNames(BTreeSet<String>);

fn csr_dns_names(csr_der: &[u8]) -> ACMEResult<CsrNames> {
    let (rest, csr) = X509CertificationRequest::from_der(csr_der)
        .map_err(|err| types::error::Error::bad_csr(format!("failed to parse CSR: {}", err)))?;
    if !rest.is_empty() {
        return Err(types::error::Error::bad_csr(
            "trailing data after the CSR",
        ));
    }
    csr.verify_signature()
        .map_err(|err| types::error::Error::bad_csr(format!("CSR signature check failed: {}", err)))?;

    let mut names = BTreeSet::new();
    for cn in csr.certification_request_info.subject.iter_common_name() {
        let cn = cn.as_str().map_err(|_| {
            types::error::Error::bad_csr("CSR common name is not a printable string")
        })?;
        if !cn.is_empty() {
            names.insert(cn.to_ascii_lowercase());
        }
    }
    if let Some(extensions) = csr.requested_extensions() {
        for extension in extensions {
            if let ParsedExtension::SubjectAlternativeName(san) = extension {
                for general in &san.general_names {
                    match general {
                        GeneralName::DNSName(dns) => {
                            names.insert(dns.to_ascii_lowercase());
                        }
                        _ => {
                            return Err(types::error::Error::bad_csr(
                                "CSR contains a non-DNS subject alternative name",
                            ));
                        }
                    }
                }
            }
        }
    }
    Ok(CsrNames(names))
}

/// `ready -> processing -> valid` transition: checks the CSR names
/// against the order identifiers, submits to the signing backend, and
/// records the issued certificate. A backend failure terminally fails
/// the order.
pub(crate) async fn finalize(
    db: &dyn Store,
    sign_auth: &dyn SignAuthority,
    provisioner: &dyn Provisioner,
    order: OrderRecord,
    csr_der: &[u8],
) -> ACMEResult<OrderRecord> {
    let order = update_status(db, order).await?;
    if order.status != types::order::Status::Ready {
        return Err(types::error::Error::order_not_ready(format!(
            "order status is '{}', must be 'ready' to finalize",
            order.status
        )));
    }

    let csr_names = csr_dns_names(csr_der)?;
    let order_names: BTreeSet<String> = order
        .identifiers
        .iter()
        .map(|i| i.value.to_ascii_lowercase())
        .collect();
    if csr_names.0 != order_names {
        return Err(types::error::Error::bad_csr(format!(
            "CSR names do not match order identifiers exactly: got [{}], want [{}]",
            csr_names.0.iter().cloned().collect::<Vec<_>>().join(", "),
            order_names.iter().cloned().collect::<Vec<_>>().join(", "),
        )));
    }

    let order_id = order.id.clone();
    let order = update_record(
        db,
        ORDER_TABLE,
        &order_id,
        || types::error::Error::not_found(format!("order {} does not exist", order_id)),
        |o: &mut OrderRecord| {
            if o.status != types::order::Status::Ready {
                return Err(types::error::Error::order_not_ready(format!(
                    "order status is '{}', must be 'ready' to finalize",
                    o.status
                )));
            }
            o.status = types::order::Status::Processing;
            Ok(true)
        },
    )
    .await?;

    let signed = sign_auth.sign(csr_der, provisioner).await;
    let chain = match signed {
        Ok(chain) if !chain.is_empty() => chain,
        Ok(_) => {
            log::error!("Signing backend returned an empty chain for order {}", order.id);
            return fail_finalize(db, &order.id).await;
        }
        Err(err) => {
            log::error!("Signing backend failed for order {}: {}", order.id, err);
            return fail_finalize(db, &order.id).await;
        }
    };

    let mut chain = chain.into_iter();
    let leaf = chain.next().unwrap_or_default();
    let cert = cert::new_certificate(db, &order.account_id, &order.id, leaf, chain.collect())
        .await?;

    let order_id = order.id.clone();
    update_record(
        db,
        ORDER_TABLE,
        &order_id,
        || types::error::Error::not_found(format!("order {} does not exist", order_id)),
        |o: &mut OrderRecord| {
            o.status = types::order::Status::Valid;
            o.certificate_id = Some(cert.id.clone());
            o.error = None;
            Ok(true)
        },
    )
    .await
}

async fn fail_finalize(db: &dyn Store, order_id: &str) -> ACMEResult<OrderRecord> {
    let err = types::error::Error::server_internal("error finalizing order");
    let stored_err = err.clone();
    let id = order_id.to_string();
    update_record(
        db,
        ORDER_TABLE,
        order_id,
        move || types::error::Error::not_found(format!("order {} does not exist", id)),
        move |o: &mut OrderRecord| {
            o.status = types::order::Status::Invalid;
            o.error = Some(stored_err.clone());
            Ok(true)
        },
    )
    .await?;
    Err(err)
}

/// Order URLs for the account's index, most recent last; `invalid`
/// orders are never listed.
pub(crate) async fn orders_by_account(
    db: &dyn Store,
    links: &LinkBuilder,
    provisioner: &str,
    base_url: &str,
    account_id: &str,
) -> ACMEResult<Vec<String>> {
    let ids = order_ids_by_account(db, account_id).await?;
    let mut urls = Vec::with_capacity(ids.len());
    for oid in ids {
        let order = get_order(db, &oid).await?;
        let order = update_status(db, order).await?;
        if order.status == types::order::Status::Invalid {
            continue;
        }
        urls.push(links.link(Link::Order, provisioner, true, base_url, &[&order.id]));
    }
    Ok(urls)
}
