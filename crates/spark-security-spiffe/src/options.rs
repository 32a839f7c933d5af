//! 凭证选项与 SPIFFE 凭证对象。
//!
//! # 契约说明（What）
//! - [`TlsCredentialsOptions`] 汇总静态材料、重载能力、授权检查能力、客户端证书请求类型与
//!   ALPN 协议列表，构造后只读；
//! - [`SpiffeCredentials`] / [`SpiffeServerCredentials`] 以 `Arc` 共享给连接器，
//!   连接器的身份比较使用凭证对象的地址。

use std::{fmt, sync::Arc};

use crate::{
    authz::ServerAuthorizationCheck, engine::ClientCertRequestType, material::KeyMaterialsConfig,
    reload::CredentialReload,
};

/// 默认支持的 ALPN 协议。
pub const DEFAULT_ALPN_PROTOCOLS: &[&str] = &["h2"];

/// TLS 凭证选项。
#[derive(Clone)]
pub struct TlsCredentialsOptions {
    key_materials: Option<KeyMaterialsConfig>,
    credential_reload: Option<Arc<dyn CredentialReload>>,
    server_authorization_check: Option<Arc<dyn ServerAuthorizationCheck>>,
    cert_request_type: ClientCertRequestType,
    alpn_protocols: Vec<String>,
}

impl TlsCredentialsOptions {
    pub fn new() -> Self {
        Self {
            key_materials: None,
            credential_reload: None,
            server_authorization_check: None,
            cert_request_type: ClientCertRequestType::default(),
            alpn_protocols: DEFAULT_ALPN_PROTOCOLS
                .iter()
                .map(|protocol| (*protocol).to_owned())
                .collect(),
        }
    }

    /// 静态密钥材料，连接器初始化时复制一份。
    pub fn with_key_materials(mut self, key_materials: KeyMaterialsConfig) -> Self {
        self.key_materials = Some(key_materials);
        self
    }

    pub fn with_credential_reload(mut self, reload: impl CredentialReload) -> Self {
        self.credential_reload = Some(Arc::new(reload));
        self
    }

    pub fn with_server_authorization_check(mut self, check: impl ServerAuthorizationCheck) -> Self {
        self.server_authorization_check = Some(Arc::new(check));
        self
    }

    pub fn with_cert_request_type(mut self, cert_request_type: ClientCertRequestType) -> Self {
        self.cert_request_type = cert_request_type;
        self
    }

    /// 替换 ALPN 协议列表，顺序即偏好顺序。
    pub fn with_alpn_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alpn_protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    pub fn key_materials(&self) -> Option<&KeyMaterialsConfig> {
        self.key_materials.as_ref()
    }

    pub fn credential_reload(&self) -> Option<&dyn CredentialReload> {
        self.credential_reload.as_deref()
    }

    pub fn server_authorization_check(&self) -> Option<&dyn ServerAuthorizationCheck> {
        self.server_authorization_check.as_deref()
    }

    pub fn cert_request_type(&self) -> ClientCertRequestType {
        self.cert_request_type
    }

    pub fn alpn_protocols(&self) -> &[String] {
        &self.alpn_protocols
    }
}

impl Default for TlsCredentialsOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TlsCredentialsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsCredentialsOptions")
            .field("key_materials", &self.key_materials)
            .field("credential_reload", &self.credential_reload.is_some())
            .field(
                "server_authorization_check",
                &self.server_authorization_check.is_some(),
            )
            .field("cert_request_type", &self.cert_request_type)
            .field("alpn_protocols", &self.alpn_protocols)
            .finish()
    }
}

/// 通道侧 SPIFFE 凭证。
#[derive(Debug)]
pub struct SpiffeCredentials {
    options: TlsCredentialsOptions,
}

impl SpiffeCredentials {
    pub fn new(options: TlsCredentialsOptions) -> Arc<Self> {
        Arc::new(Self { options })
    }

    pub fn options(&self) -> &TlsCredentialsOptions {
        &self.options
    }
}

/// 服务端 SPIFFE 凭证。
#[derive(Debug)]
pub struct SpiffeServerCredentials {
    options: TlsCredentialsOptions,
}

impl SpiffeServerCredentials {
    pub fn new(options: TlsCredentialsOptions) -> Arc<Self> {
        Arc::new(Self { options })
    }

    pub fn options(&self) -> &TlsCredentialsOptions {
        &self.options
    }
}
