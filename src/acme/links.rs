use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::types;

/// URL path-segment escaping for provisioner names.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    NewNonce,
    NewAccount,
    NewOrder,
    RevokeCert,
    KeyChange,
    Directory,
    Account,
    OrdersByAccount,
    Order,
    FinalizeOrder,
    Authz,
    Challenge,
    Certificate,
}

/// Generates stable resource URLs of the form
/// `<base>/acme/<provisioner>/<segment>[/<parts...>]`.
///
/// `base_url` comes from the request when the deployment sits behind
/// more than one name; an empty base falls back to the configured DNS
/// name.
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    dns: String,
    prefix: String,
}

impl LinkBuilder {
    pub fn new<D: Into<String>, P: Into<String>>(dns: D, prefix: P) -> Self {
        LinkBuilder {
            dns: dns.into(),
            prefix: prefix.into(),
        }
    }

    fn tail(&self, link: Link, inputs: &[&str]) -> String {
        match link {
            Link::NewNonce => "new-nonce".to_string(),
            Link::NewAccount => "new-account".to_string(),
            Link::NewOrder => "new-order".to_string(),
            Link::RevokeCert => "revoke-cert".to_string(),
            Link::KeyChange => "key-change".to_string(),
            Link::Directory => "directory".to_string(),
            Link::Account => format!("account/{}", inputs.join("/")),
            Link::OrdersByAccount => format!("account/{}/orders", inputs.join("/")),
            Link::Order => format!("order/{}", inputs.join("/")),
            Link::FinalizeOrder => format!("order/{}/finalize", inputs.join("/")),
            Link::Authz => format!("authz/{}", inputs.join("/")),
            Link::Challenge => format!("challenge/{}", inputs.join("/")),
            Link::Certificate => format!("certificate/{}", inputs.join("/")),
        }
    }

    pub fn link(
        &self,
        link: Link,
        provisioner: &str,
        absolute: bool,
        base_url: &str,
        inputs: &[&str],
    ) -> String {
        let provisioner = utf8_percent_encode(provisioner, PATH_SEGMENT);
        let relative = format!("/{}/{}/{}", self.prefix, provisioner, self.tail(link, inputs));
        if !absolute {
            return relative;
        }
        let base = if base_url.is_empty() {
            format!("https://{}", self.dns)
        } else {
            base_url.trim_end_matches('/').to_string()
        };
        format!("{}{}", base, relative)
    }

    pub fn directory(&self, provisioner: &str, base_url: &str) -> types::directory::Directory {
        types::directory::Directory {
            new_nonce: self.link(Link::NewNonce, provisioner, true, base_url, &[]),
            new_account: self.link(Link::NewAccount, provisioner, true, base_url, &[]),
            new_order: self.link(Link::NewOrder, provisioner, true, base_url, &[]),
            revoke_cert: self.link(Link::RevokeCert, provisioner, true, base_url, &[]),
            key_change: self.link(Link::KeyChange, provisioner, true, base_url, &[]),
            meta: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> LinkBuilder {
        LinkBuilder::new("ca.example.org", "acme")
    }

    #[test]
    fn absolute_links_use_configured_dns_by_default() {
        assert_eq!(
            builder().link(Link::NewNonce, "prov", true, "", &[]),
            "https://ca.example.org/acme/prov/new-nonce"
        );
    }

    #[test]
    fn request_base_url_wins_over_dns() {
        assert_eq!(
            builder().link(Link::Order, "prov", true, "https://other.example.org", &["oid"]),
            "https://other.example.org/acme/prov/order/oid"
        );
    }

    #[test]
    fn relative_links_drop_the_base() {
        assert_eq!(
            builder().link(Link::FinalizeOrder, "prov", false, "", &["oid"]),
            "/acme/prov/order/oid/finalize"
        );
    }

    #[test]
    fn provisioner_names_are_segment_escaped() {
        assert_eq!(
            builder().link(Link::NewAccount, "mail provisioner@ca", true, "", &[]),
            "https://ca.example.org/acme/mail%20provisioner%40ca/new-account"
        );
    }

    #[test]
    fn directory_lists_the_rfc8555_resources() {
        let dir = builder().directory("prov", "");
        assert_eq!(dir.new_nonce, "https://ca.example.org/acme/prov/new-nonce");
        assert_eq!(dir.new_account, "https://ca.example.org/acme/prov/new-account");
        assert_eq!(dir.new_order, "https://ca.example.org/acme/prov/new-order");
        assert_eq!(dir.revoke_cert, "https://ca.example.org/acme/prov/revoke-cert");
        assert_eq!(dir.key_change, "https://ca.example.org/acme/prov/key-change");
    }

    #[test]
    fn orders_by_account_nests_under_the_account() {
        assert_eq!(
            builder().link(Link::OrdersByAccount, "prov", true, "", &["accid"]),
            "https://ca.example.org/acme/prov/account/accid/orders"
        );
    }
}
