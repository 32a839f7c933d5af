//! 握手引擎的接口边界。
//!
//! # 设计背景（Why）
//! - 记录层、密码套件协商与证书校验细节都属于外部握手引擎，连接器只负责按证书材料创建、
//!   替换工厂，并从工厂取得每个连接的握手器交给握手管理器；
//! - 以 trait 隔离引擎后，连接器逻辑可以用计数型假引擎测试，生产环境使用
//!   `RustlsHandshakeEngine`。
//!
//! # 契约说明（What）
//! - 工厂的释放即 `Drop`，连接器以 `Arc` 持有，保证并发的握手器创建期间工厂不会被提前释放；
//! - 握手器创建可能失败（例如目标名不是合法的 SNI），失败以 [`HandshakeEngineError`] 表达。

use std::{collections::BTreeMap, fmt};

use serde::Deserialize;
use thiserror::Error;

use crate::material::PemKeyCertPair;

/// 服务端是否要求、是否校验客户端证书。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientCertRequestType {
    #[default]
    DontRequest,
    RequestButDontVerify,
    RequestAndVerify,
    RequireButDontVerify,
    RequireAndVerify,
}

impl ClientCertRequestType {
    /// 是否向客户端发起证书请求。
    pub const fn requests_certificate(self) -> bool {
        !matches!(self, ClientCertRequestType::DontRequest)
    }

    /// 客户端是否必须出示证书。
    pub const fn is_mandatory(self) -> bool {
        matches!(
            self,
            ClientCertRequestType::RequireButDontVerify | ClientCertRequestType::RequireAndVerify
        )
    }

    /// 是否以根证书校验客户端证书链。
    pub const fn verifies_certificate(self) -> bool {
        matches!(
            self,
            ClientCertRequestType::RequestAndVerify | ClientCertRequestType::RequireAndVerify
        )
    }
}

/// 握手引擎返回的错误。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HandshakeEngineError {
    #[error("invalid PEM {what}: {reason}")]
    InvalidPem { what: &'static str, reason: String },
    #[error("root certificates are required but absent")]
    MissingRootCerts,
    #[error("handshake engine rejected the configuration: {0}")]
    Config(String),
    #[error("invalid server name `{0}`")]
    InvalidServerName(String),
    #[error("handshaker creation failed: {0}")]
    Handshaker(String),
}

/// 客户端握手工厂。
pub trait ClientHandshakerFactory: Send + Sync + 'static {
    type Handshaker: Send + 'static;

    /// 以目标名（用于 SNI 与证书名校验）创建一个握手器。
    fn create_handshaker(&self, server_name: &str)
    -> Result<Self::Handshaker, HandshakeEngineError>;
}

/// 服务端握手工厂，接受任意客户端。
pub trait ServerHandshakerFactory: Send + Sync + 'static {
    type Handshaker: Send + 'static;

    fn create_handshaker(&self) -> Result<Self::Handshaker, HandshakeEngineError>;
}

/// 按证书材料构造握手工厂的引擎。
///
/// `alpn_protocols` 为双方可协商的应用层协议列表，连接器在握手后据此校验对端选择。
pub trait HandshakeEngine: Send + Sync + 'static {
    type ClientFactory: ClientHandshakerFactory;
    type ServerFactory: ServerHandshakerFactory;
    /// 客户端会话缓存，跨工厂重建共享。
    type SessionCache: Clone + Send + Sync + 'static;

    fn create_client_factory(
        &self,
        pem_key_cert_pairs: &[PemKeyCertPair],
        pem_root_certs: Option<&str>,
        session_cache: Option<Self::SessionCache>,
        alpn_protocols: &[String],
    ) -> Result<Self::ClientFactory, HandshakeEngineError>;

    fn create_server_factory(
        &self,
        pem_key_cert_pairs: &[PemKeyCertPair],
        pem_root_certs: Option<&str>,
        cert_request_type: ClientCertRequestType,
        alpn_protocols: &[String],
    ) -> Result<Self::ServerFactory, HandshakeEngineError>;
}

/// 连接建立方传给握手管理器的参数，键值均为文本。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionArgs {
    entries: BTreeMap<String, String>,
}

impl ConnectionArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

/// 哪一侧的连接器创建了握手器。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandshakeSide {
    Client,
    Server,
}

/// 交给握手管理器的安全握手器。
pub struct SecurityHandshaker<H> {
    handshaker: H,
    side: HandshakeSide,
    args: ConnectionArgs,
}

impl<H> SecurityHandshaker<H> {
    pub fn new(handshaker: H, side: HandshakeSide, args: ConnectionArgs) -> Self {
        Self {
            handshaker,
            side,
            args,
        }
    }

    pub fn side(&self) -> HandshakeSide {
        self.side
    }

    pub fn args(&self) -> &ConnectionArgs {
        &self.args
    }

    pub fn handshaker(&self) -> &H {
        &self.handshaker
    }

    pub fn handshaker_mut(&mut self) -> &mut H {
        &mut self.handshaker
    }

    pub fn into_inner(self) -> H {
        self.handshaker
    }
}

impl<H> fmt::Debug for SecurityHandshaker<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityHandshaker")
            .field("side", &self.side)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// 握手管理器：接收构造好的握手器，后续流程对连接器不透明。
pub trait HandshakeManager<H> {
    fn add(&mut self, handshaker: SecurityHandshaker<H>);
}

impl<H> HandshakeManager<H> for Vec<SecurityHandshaker<H>> {
    fn add(&mut self, handshaker: SecurityHandshaker<H>) {
        self.push(handshaker);
    }
}
