//! 声明式 TLS 设置。
//!
//! # 设计背景（Why）
//! - 部署环境通常以文件形式下发证书；本模块把 TOML 描述的文件路径读成 [`KeyMaterialsConfig`]，
//!   再组装为 [`TlsCredentialsOptions`]，避免每个宿主重复编写读取逻辑；
//! - 何时重新读取（文件监听、远端推送）仍由宿主的重载能力决定，本模块只负责一次性加载。
//!
//! # 契约说明（What）
//! - 未知字段直接拒绝，拼写错误不会被静默忽略；
//! - 相对路径在 [`SpiffeTlsSettings::load`] 时相对设置文件所在目录解析，
//!   经 [`SpiffeTlsSettings::from_toml_str`] 构造时相对当前工作目录解析；
//! - `alpn_protocols` 缺省时沿用 [`crate::options::DEFAULT_ALPN_PROTOCOLS`]。
//!
//! ```toml
//! root_certs_path = "certs/ca.pem"
//! cert_request_type = "require_and_verify"
//! session_cache_capacity = 256
//!
//! [[key_cert_pairs]]
//! private_key_path = "certs/svid.key"
//! cert_chain_path = "certs/svid.pem"
//! ```

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    engine::ClientCertRequestType,
    material::{KeyMaterialsConfig, PemKeyCertPair},
    options::TlsCredentialsOptions,
};

/// 设置加载失败。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid TLS settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// 第 `index` 个证书对的某个文件为空。
    #[error("key/cert pair #{index} has an empty private key or cert chain")]
    InvalidKeyCertPair { index: usize },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Parse(_) => "spark.security.spiffe.config.parse",
            ConfigError::Io { .. } => "spark.security.spiffe.config.io",
            ConfigError::InvalidKeyCertPair { .. } => {
                "spark.security.spiffe.config.invalid_key_cert_pair"
            }
        }
    }
}

/// 单个证书对的文件位置。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyCertPairPaths {
    pub private_key_path: PathBuf,
    pub cert_chain_path: PathBuf,
}

/// TOML 形式的 TLS 设置。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpiffeTlsSettings {
    pub root_certs_path: Option<PathBuf>,
    pub key_cert_pairs: Vec<KeyCertPairPaths>,
    pub cert_request_type: ClientCertRequestType,
    pub alpn_protocols: Vec<String>,
    /// 客户端会话缓存容量；缺省表示不启用会话缓存。
    pub session_cache_capacity: Option<usize>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl SpiffeTlsSettings {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// 读取并解析设置文件。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = read_file(path)?;
        let mut settings = Self::from_toml_str(&raw)?;
        settings.base_dir = path.parent().map(Path::to_path_buf);
        Ok(settings)
    }

    /// 读取设置引用的 PEM 文件。
    pub fn load_key_materials(&self) -> Result<KeyMaterialsConfig, ConfigError> {
        let root_certs = self
            .root_certs_path
            .as_deref()
            .map(|path| read_file(&self.resolve(path)))
            .transpose()?;
        let mut pairs = Vec::with_capacity(self.key_cert_pairs.len());
        for (index, paths) in self.key_cert_pairs.iter().enumerate() {
            let private_key = read_file(&self.resolve(&paths.private_key_path))?;
            let cert_chain = read_file(&self.resolve(&paths.cert_chain_path))?;
            let pair = PemKeyCertPair::new(private_key, cert_chain)
                .map_err(|_| ConfigError::InvalidKeyCertPair { index })?;
            pairs.push(pair);
        }
        Ok(KeyMaterialsConfig::new().with_key_materials(root_certs, pairs))
    }

    /// 组装凭证选项：静态材料、客户端证书策略与 ALPN 列表。
    pub fn to_options(&self) -> Result<TlsCredentialsOptions, ConfigError> {
        let mut options = TlsCredentialsOptions::new()
            .with_key_materials(self.load_key_materials()?)
            .with_cert_request_type(self.cert_request_type);
        if !self.alpn_protocols.is_empty() {
            options = options.with_alpn_protocols(self.alpn_protocols.iter().cloned());
        }
        Ok(options)
    }

    /// 按容量创建 rustls 会话缓存。
    #[cfg(feature = "rustls")]
    pub fn session_cache(&self) -> Option<crate::rustls_engine::RustlsSessionCache> {
        self.session_cache_capacity
            .map(crate::rustls_engine::RustlsHandshakeEngine::memory_session_cache)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
