//! Injected I/O behind the challenge validators: one trait per probe so
//! tests can swap in deterministic stubs.

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoError {
    Timeout,
    Connect(String),
    TooManyRedirects,
    Tls(String),
    Other(String),
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::Timeout => f.write_str("connection timed out"),
            IoError::Connect(detail) => write!(f, "connection failed: {}", detail),
            IoError::TooManyRedirects => f.write_str("too many redirects"),
            IoError::Tls(detail) => write!(f, "TLS negotiation failed: {}", detail),
            IoError::Other(detail) => f.write_str(detail),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<HttpResponse, IoError>;
}

#[derive(Debug, Clone)]
pub enum DnsError {
    /// NXDOMAIN or an empty answer.
    NoRecords(String),
    /// SERVFAIL and friends.
    Lookup(String),
}

#[async_trait]
pub trait TxtLookup: Send + Sync {
    async fn lookup_txt(&self, fqdn: &str) -> Result<Vec<String>, DnsError>;
}

/// What a TLS-ALPN-01 dial observed before certificate inspection.
#[derive(Debug, Clone)]
pub struct TlsProbe {
    pub alpn_acme_tls1: bool,
    /// Peer certificates in DER, leaf first.
    pub peer_chain: Vec<Vec<u8>>,
}

#[async_trait]
pub trait TlsDial: Send + Sync {
    async fn dial(&self, host: &str, port: u16, sni: &str) -> Result<TlsProbe, IoError>;
}

pub struct LiveHttpFetch {
    client: reqwest::Client,
}

impl LiveHttpFetch {
    pub fn new() -> Result<Self, String> {
        // Follow up to 10 redirects, and only within http/https.
        let policy = reqwest::redirect::Policy::custom(|attempt| {
            if attempt.previous().len() >= 10 {
                attempt.error("too many redirects")
            } else if !matches!(attempt.url().scheme(), "http" | "https") {
                attempt.error("redirect left http/https")
            } else {
                attempt.follow()
            }
        });
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .redirect(policy)
            .no_proxy()
            .build()
            .map_err(|err| format!("unable to build HTTP client: {}", err))?;
        Ok(LiveHttpFetch { client })
    }
}

#[async_trait]
impl HttpFetch for LiveHttpFetch {
    async fn fetch(&self, url: &str) -> Result<HttpResponse, IoError> {
        let resp = self.client.get(url).send().await.map_err(|err| {
            if err.is_timeout() {
                IoError::Timeout
            } else if err.is_redirect() {
                IoError::TooManyRedirects
            } else if err.is_connect() {
                IoError::Connect(err.to_string())
            } else {
                IoError::Other(format!("request failed: {}", err))
            }
        })?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|err| IoError::Other(format!("error reading response body: {}", err)))?;
        Ok(HttpResponse { status, body })
    }
}

pub struct LiveTxtLookup {
    resolver: trust_dns_resolver::TokioAsyncResolver,
}

impl LiveTxtLookup {
    pub fn new() -> Result<Self, String> {
        let resolver = trust_dns_resolver::TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|err| format!("unable to read DNS config: {}", err))?;
        Ok(LiveTxtLookup { resolver })
    }
}

#[async_trait]
impl TxtLookup for LiveTxtLookup {
    async fn lookup_txt(&self, fqdn: &str) -> Result<Vec<String>, DnsError> {
        match self.resolver.txt_lookup(fqdn.to_string()).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|record| {
                    record
                        .txt_data()
                        .iter()
                        .map(|segment| String::from_utf8_lossy(segment).into_owned())
                        .collect::<String>()
                })
                .collect()),
            Err(err) => match err.kind() {
                trust_dns_resolver::error::ResolveErrorKind::NoRecordsFound { .. } => {
                    Err(DnsError::NoRecords(format!("no TXT records found for {}", fqdn)))
                }
                _ => Err(DnsError::Lookup(format!(
                    "SERVFAIL whilst getting records for {}",
                    fqdn
                ))),
            },
        }
    }
}

pub struct LiveTlsDial;

#[async_trait]
impl TlsDial for LiveTlsDial {
    async fn dial(&self, host: &str, port: u16, sni: &str) -> Result<TlsProbe, IoError> {
        let addr = format!("{}:{}", host, port);
        let tcp = tokio::net::TcpStream::connect(&addr)
            .await
            .map_err(|err| IoError::Connect(format!("failed to open TCP connection to {}: {}", addr, err)))?;

        let mut builder =
            openssl::ssl::SslContext::builder(openssl::ssl::SslMethod::tls_client())
                .map_err(|err| IoError::Other(format!("failed to create SSL context: {}", err)))?;
        builder.set_verify(openssl::ssl::SslVerifyMode::NONE);
        builder
            .set_min_proto_version(Some(openssl::ssl::SslVersion::TLS1_2))
            .map_err(|err| IoError::Other(err.to_string()))?;
        builder
            .set_alpn_protos(b"\x0aacme-tls/1")
            .map_err(|err| IoError::Other(err.to_string()))?;
        let ctx = builder.build();

        let mut ssl = openssl::ssl::Ssl::new(&ctx)
            .map_err(|err| IoError::Other(format!("failed to create SSL session: {}", err)))?;
        ssl.set_hostname(sni)
            .map_err(|err| IoError::Other(err.to_string()))?;
        let mut stream = tokio_openssl::SslStream::new(ssl, tcp)
            .map_err(|err| IoError::Other(format!("failed to create SSL stream: {}", err)))?;

        std::pin::Pin::new(&mut stream)
            .connect()
            .await
            .map_err(|err| IoError::Tls(format!("failed to negotiate TLS with {}: {}", addr, err)))?;

        let ssl = stream.ssl();
        let alpn_acme_tls1 = ssl.selected_alpn_protocol() == Some(b"acme-tls/1");
        let peer_chain = match ssl.peer_cert_chain() {
            Some(chain) => chain
                .iter()
                .map(|cert| {
                    cert.to_der()
                        .map_err(|err| IoError::Other(format!("error encoding peer certificate: {}", err)))
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => match ssl.peer_certificate() {
                Some(cert) => vec![cert.to_der().map_err(|err| {
                    IoError::Other(format!("error encoding peer certificate: {}", err))
                })?],
                None => vec![],
            },
        };

        Ok(TlsProbe {
            alpn_acme_tls1,
            peer_chain,
        })
    }
}
