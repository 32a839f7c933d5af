//! 基于 `rustls` 的握手引擎。
//!
//! # 设计背景（Why）
//! - 连接器只依赖 [`HandshakeEngine`] 契约；本模块给出生产可用的实现，工厂即共享的
//!   `rustls` 配置对象，握手器即单个连接的 `ClientConnection` / `ServerConnection`；
//! - 配置对象构造成本远高于连接创建，因此只在证书材料变化时重建，这正是连接器工厂槽位的语义。
//!
//! # 逻辑解析（How）
//! - PEM 解析走 `rustls-pki-types` 的 `PemObject`，错误统一折算为 [`HandshakeEngineError::InvalidPem`]；
//! - 客户端：根证书包必填，首个证书对（若有）作为客户端证书，ALPN 与会话缓存写入配置；
//!   服务端证书由 `ChainOnlyServerVerifier` 校验：证书链与握手签名照常校验，证书名不与目标名比较，
//!   SPIFFE 证书通常只携带 URI 形式的 SAN，对端身份交给握手后的授权检查判断；
//! - 服务端：首个证书对作为服务端证书，客户端证书策略由 [`ClientCertRequestType`] 决定，
//!   `*ButDontVerify` 使用 [`AcceptAnyClientCert`]：不校验证书链，但仍校验握手签名；
//! - [`peer_from_connection`] 以 `x509-parser` 解析叶子证书，产出公用名与 DNS / URI / IP 形式的 SAN。
//!
//! # 风险提示（Trade-offs）
//! - 目标名仍作为 SNI 发送；跳过名称校验后，未配置授权检查的通道只确认“证书由受信根签发”。

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    sync::Arc,
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use rustls::{
    CertificateError, ClientConfig, ClientConnection, CommonState, DigitallySignedStruct,
    DistinguishedName, HandshakeKind, RootCertStore, ServerConfig, ServerConnection,
    SignatureScheme,
    client::{
        ClientSessionMemoryCache, ClientSessionStore, Resumption, WebPkiServerVerifier,
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    },
    crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature},
    server::{
        WebPkiClientVerifier,
        danger::{ClientCertVerified, ClientCertVerifier},
    },
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime, pem::PemObject};
use x509_parser::{extensions::GeneralName, parse_x509_certificate};

use crate::{
    engine::{
        ClientCertRequestType, ClientHandshakerFactory, HandshakeEngine, HandshakeEngineError,
        ServerHandshakerFactory,
    },
    material::PemKeyCertPair,
    peer::{
        CERTIFICATE_TYPE_PEER_PROPERTY, Peer, SSL_ALPN_SELECTED_PROTOCOL,
        SSL_SESSION_REUSED_PEER_PROPERTY, X509_PEM_CERT_PROPERTY,
        X509_SUBJECT_ALTERNATIVE_NAME_PEER_PROPERTY, X509_SUBJECT_COMMON_NAME_PEER_PROPERTY,
    },
};

/// 客户端会话缓存句柄。
pub type RustlsSessionCache = Arc<dyn ClientSessionStore>;

/// `rustls` 握手引擎，持有构造配置所用的密码学提供者。
#[derive(Clone, Debug)]
pub struct RustlsHandshakeEngine {
    provider: Arc<CryptoProvider>,
}

impl RustlsHandshakeEngine {
    /// 使用 `ring` 提供者。
    pub fn new() -> Self {
        Self::with_provider(Arc::new(rustls::crypto::ring::default_provider()))
    }

    pub fn with_provider(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }

    /// 进程内会话缓存，`capacity` 为最多保留的服务端条目数。
    pub fn memory_session_cache(capacity: usize) -> RustlsSessionCache {
        Arc::new(ClientSessionMemoryCache::new(capacity))
    }

    pub fn provider(&self) -> &Arc<CryptoProvider> {
        &self.provider
    }
}

impl Default for RustlsHandshakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeEngine for RustlsHandshakeEngine {
    type ClientFactory = RustlsClientFactory;
    type ServerFactory = RustlsServerFactory;
    type SessionCache = RustlsSessionCache;

    fn create_client_factory(
        &self,
        pem_key_cert_pairs: &[PemKeyCertPair],
        pem_root_certs: Option<&str>,
        session_cache: Option<Self::SessionCache>,
        alpn_protocols: &[String],
    ) -> Result<Self::ClientFactory, HandshakeEngineError> {
        let roots = root_store(pem_root_certs.ok_or(HandshakeEngineError::MissingRootCerts)?)?;
        let verifier = ChainOnlyServerVerifier::new(roots, Arc::clone(&self.provider))?;
        let builder = ClientConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()
            .map_err(config_error)?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier));
        let mut config = match pem_key_cert_pairs.first() {
            Some(pair) => {
                let (chain, key) = parse_key_cert_pair(pair)?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(config_error)?
            }
            None => builder.with_no_client_auth(),
        };
        config.alpn_protocols = encode_alpn(alpn_protocols);
        if let Some(cache) = session_cache {
            config.resumption = Resumption::store(cache);
        }
        Ok(RustlsClientFactory {
            config: Arc::new(config),
        })
    }

    fn create_server_factory(
        &self,
        pem_key_cert_pairs: &[PemKeyCertPair],
        pem_root_certs: Option<&str>,
        cert_request_type: ClientCertRequestType,
        alpn_protocols: &[String],
    ) -> Result<Self::ServerFactory, HandshakeEngineError> {
        let pair = pem_key_cert_pairs.first().ok_or_else(|| {
            HandshakeEngineError::Config("server factory requires a key/cert pair".into())
        })?;
        let (chain, key) = parse_key_cert_pair(pair)?;
        let builder = ServerConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()
            .map_err(config_error)?;
        let builder = if !cert_request_type.requests_certificate() {
            builder.with_no_client_auth()
        } else if cert_request_type.verifies_certificate() {
            let roots = root_store(pem_root_certs.ok_or(HandshakeEngineError::MissingRootCerts)?)?;
            let verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&self.provider));
            let verifier = if cert_request_type.is_mandatory() {
                verifier
            } else {
                verifier.allow_unauthenticated()
            };
            builder.with_client_cert_verifier(verifier.build().map_err(config_error)?)
        } else {
            builder.with_client_cert_verifier(Arc::new(AcceptAnyClientCert {
                mandatory: cert_request_type.is_mandatory(),
                provider: Arc::clone(&self.provider),
            }))
        };
        let mut config = builder.with_single_cert(chain, key).map_err(config_error)?;
        config.alpn_protocols = encode_alpn(alpn_protocols);
        Ok(RustlsServerFactory {
            config: Arc::new(config),
            cert_request_type,
        })
    }
}

/// 客户端工厂：共享的 `ClientConfig`。
#[derive(Clone, Debug)]
pub struct RustlsClientFactory {
    config: Arc<ClientConfig>,
}

impl RustlsClientFactory {
    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }
}

impl ClientHandshakerFactory for RustlsClientFactory {
    type Handshaker = ClientConnection;

    fn create_handshaker(
        &self,
        server_name: &str,
    ) -> Result<Self::Handshaker, HandshakeEngineError> {
        let name = ServerName::try_from(server_name.to_owned())
            .map_err(|_| HandshakeEngineError::InvalidServerName(server_name.to_owned()))?;
        ClientConnection::new(Arc::clone(&self.config), name)
            .map_err(|err| HandshakeEngineError::Handshaker(err.to_string()))
    }
}

/// 服务端工厂：共享的 `ServerConfig`。
#[derive(Clone, Debug)]
pub struct RustlsServerFactory {
    config: Arc<ServerConfig>,
    cert_request_type: ClientCertRequestType,
}

impl RustlsServerFactory {
    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    pub fn cert_request_type(&self) -> ClientCertRequestType {
        self.cert_request_type
    }
}

impl ServerHandshakerFactory for RustlsServerFactory {
    type Handshaker = ServerConnection;

    fn create_handshaker(&self) -> Result<Self::Handshaker, HandshakeEngineError> {
        ServerConnection::new(Arc::clone(&self.config))
            .map_err(|err| HandshakeEngineError::Handshaker(err.to_string()))
    }
}

/// 只校验证书链与握手签名的服务端证书校验器。
///
/// WebPKI 校验先确认证书链，最后才比较证书名；因此仅名称不匹配的失败说明证书链已经可信，
/// 可以放行。其余失败原样返回。
#[derive(Debug)]
struct ChainOnlyServerVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ChainOnlyServerVerifier {
    fn new(
        roots: RootCertStore,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, HandshakeEngineError> {
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(config_error)?;
        Ok(Self { inner })
    }
}

fn is_name_mismatch(err: &rustls::Error) -> bool {
    matches!(
        err,
        rustls::Error::InvalidCertificate(
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
        )
    )
}

impl ServerCertVerifier for ChainOnlyServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(err) if is_name_mismatch(&err) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// 接受任意客户端证书的校验器，握手签名仍按提供者支持的算法校验。
struct AcceptAnyClientCert {
    mandatory: bool,
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for AcceptAnyClientCert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptAnyClientCert")
            .field("mandatory", &self.mandatory)
            .finish_non_exhaustive()
    }
}

impl ClientCertVerifier for AcceptAnyClientCert {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        self.mandatory
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// 从已完成握手的连接提取对端属性。
///
/// 产出证书类型、叶子证书的公用名与 SAN、PEM 编码的叶子证书（对端出示时）、
/// 协商的 ALPN（有协商时）与会话复用标记。叶子证书无法解析时只跳过名称属性。
pub fn peer_from_connection(connection: &CommonState) -> Peer {
    let mut peer = Peer::new().with_property(CERTIFICATE_TYPE_PEER_PROPERTY, "X509");
    if let Some(leaf) = connection
        .peer_certificates()
        .and_then(|chain| chain.first())
    {
        push_subject_names(&mut peer, leaf.as_ref());
        peer.push(X509_PEM_CERT_PROPERTY, encode_pem_certificate(leaf.as_ref()));
    }
    if let Some(protocol) = connection.alpn_protocol() {
        peer.push(SSL_ALPN_SELECTED_PROTOCOL, protocol.to_vec());
    }
    let reused = matches!(connection.handshake_kind(), Some(HandshakeKind::Resumed));
    peer.push(
        SSL_SESSION_REUSED_PEER_PROPERTY,
        if reused { "true" } else { "false" },
    );
    peer
}

fn push_subject_names(peer: &mut Peer, der: &[u8]) {
    let Ok((_, cert)) = parse_x509_certificate(der) else {
        return;
    };
    for common_name in cert.subject().iter_common_name() {
        if let Ok(value) = common_name.as_str() {
            peer.push(X509_SUBJECT_COMMON_NAME_PEER_PROPERTY, value);
        }
    }
    let Ok(Some(san)) = cert.subject_alternative_name() else {
        return;
    };
    for name in &san.value.general_names {
        match name {
            GeneralName::DNSName(dns) => peer.push(X509_SUBJECT_ALTERNATIVE_NAME_PEER_PROPERTY, *dns),
            GeneralName::URI(uri) => peer.push(X509_SUBJECT_ALTERNATIVE_NAME_PEER_PROPERTY, *uri),
            GeneralName::IPAddress(octets) => {
                if let Some(ip) = ip_from_octets(octets) {
                    peer.push(X509_SUBJECT_ALTERNATIVE_NAME_PEER_PROPERTY, ip.to_string());
                }
            }
            _ => {}
        }
    }
}

fn ip_from_octets(octets: &[u8]) -> Option<IpAddr> {
    if let Ok(v4) = <[u8; 4]>::try_from(octets) {
        return Some(IpAddr::V4(Ipv4Addr::from(v4)));
    }
    <[u8; 16]>::try_from(octets)
        .ok()
        .map(|v6| IpAddr::V6(Ipv6Addr::from(v6)))
}

/// DER 转 PEM，正文按 64 列折行。
fn encode_pem_certificate(der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut pem = String::with_capacity(encoded.len() + encoded.len() / 64 + 64);
    pem.push_str("-----BEGIN CERTIFICATE-----\n");
    for (index, ch) in encoded.chars().enumerate() {
        if index > 0 && index % 64 == 0 {
            pem.push('\n');
        }
        pem.push(ch);
    }
    pem.push_str("\n-----END CERTIFICATE-----\n");
    pem
}

fn encode_alpn(protocols: &[String]) -> Vec<Vec<u8>> {
    protocols
        .iter()
        .map(|protocol| protocol.as_bytes().to_vec())
        .collect()
}

fn config_error(err: impl fmt::Display) -> HandshakeEngineError {
    HandshakeEngineError::Config(err.to_string())
}

fn parse_certificates(
    pem: &str,
    what: &'static str,
) -> Result<Vec<CertificateDer<'static>>, HandshakeEngineError> {
    let certs = CertificateDer::pem_slice_iter(pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| HandshakeEngineError::InvalidPem {
            what,
            reason: err.to_string(),
        })?;
    if certs.is_empty() {
        return Err(HandshakeEngineError::InvalidPem {
            what,
            reason: "no certificate found".into(),
        });
    }
    Ok(certs)
}

fn parse_key_cert_pair(
    pair: &PemKeyCertPair,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), HandshakeEngineError> {
    let chain = parse_certificates(pair.cert_chain(), "certificate chain")?;
    let key = PrivateKeyDer::from_pem_slice(pair.private_key().as_bytes()).map_err(|err| {
        HandshakeEngineError::InvalidPem {
            what: "private key",
            reason: err.to_string(),
        }
    })?;
    Ok((chain, key))
}

fn root_store(pem: &str) -> Result<RootCertStore, HandshakeEngineError> {
    let mut store = RootCertStore::empty();
    for cert in parse_certificates(pem, "root certificates")? {
        store
            .add(cert)
            .map_err(|err| HandshakeEngineError::InvalidPem {
                what: "root certificates",
                reason: err.to_string(),
            })?;
    }
    Ok(store)
}
