#![deny(unsafe_code)]
#![doc = r#"
# spark-security-spiffe

## 设计动机（Why）
- SPIFFE 风格的身份以证书内容而非静态主机名认证对端；证书材料会被热重载，
  握手工厂必须恰好在材料变化时重建，且在使用期间不被提前释放；
- 授权策略由宿主提供，可能同步也可能异步给出结论，两条路径必须产生相同的结局。

## 核心契约（What）
- [`TlsCredentialsOptions`]：静态材料、[`CredentialReload`] 重载能力、
  [`ServerAuthorizationCheck`] 授权检查能力与客户端证书策略；
- [`fetch_key_materials`]：按重载结果与已有材料决定本次是否可用；
- [`SpiffeChannelSecurityConnector`] / [`SpiffeServerSecurityConnector`]：
  工厂生命周期、握手器创建与对端校验；
- [`HandshakeEngine`]：握手引擎边界，默认实现为 `RustlsHandshakeEngine`（特性 `rustls`）；
- [`SpiffeTlsSettings`]：从 TOML 与 PEM 文件加载材料。

## 风险与考量（Trade-offs）
- 每个通道连接器只持有一个可复用的授权检查请求，同一连接器上的 `check_peer` 需由调用方串行化；
- 异步凭证重载不受支持：能力若声明异步完成，有已有材料时继续使用，否则报告 `UNIMPLEMENTED`。
"#]

pub mod auth_context;
pub mod authz;
pub mod config;
pub mod connector;
pub mod context;
pub mod engine;
pub mod error;
pub mod material;
pub mod options;
pub mod peer;
pub mod reload;
#[cfg(feature = "rustls")]
pub mod rustls_engine;
pub mod verify;

pub use auth_context::{AuthContext, AuthProperty, SPIFFE_TRANSPORT_SECURITY_TYPE};
pub use authz::{
    AuthorizationCheckRequest, PeerCheckedCallback, ServerAuthorizationCheck,
    process_authorization_check_result, server_authorization_check_fn,
};
pub use config::{ConfigError, KeyCertPairPaths, SpiffeTlsSettings};
pub use connector::{
    ChannelConnectorBuilder, SPIFFE_URL_SCHEME, SecurityConnector, SpiffeChannelSecurityConnector,
    SpiffeServerSecurityConnector,
};
pub use context::RequestContext;
pub use engine::{
    ClientCertRequestType, ClientHandshakerFactory, ConnectionArgs, HandshakeEngine,
    HandshakeEngineError, HandshakeManager, HandshakeSide, SecurityHandshaker,
    ServerHandshakerFactory,
};
pub use error::{AlpnError, ReloadError, SecurityError};
pub use material::{KeyMaterialsConfig, PemKeyCertPair};
pub use options::{
    DEFAULT_ALPN_PROTOCOLS, SpiffeCredentials, SpiffeServerCredentials, TlsCredentialsOptions,
};
pub use peer::{Peer, PeerProperty};
pub use reload::{
    CompletionMode, CredentialReload, CredentialReloadArg, ReloadStatus, credential_reload_fn,
    fetch_key_materials,
};
#[cfg(feature = "rustls")]
pub use rustls_engine::{
    RustlsClientFactory, RustlsHandshakeEngine, RustlsServerFactory, RustlsSessionCache,
    peer_from_connection,
};

/// 安全连接器使用的日志 target。
pub const LOG_TARGET: &str = "spark.security.spiffe";
