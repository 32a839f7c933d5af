//! 证书材料存储。
//!
//! # 设计背景（Why）
//! - 连接器持有一份根证书束与有序的“私钥 + 证书链”对，握手工厂由其构造；
//! - 材料只允许整体替换，不做差异比较：是否需要重建工厂由重载结果决定。
//!
//! # 契约说明（What）
//! - [`PemKeyCertPair`] 的两个字段在构造时校验非空，之后不可修改；
//! - [`KeyMaterialsConfig::is_empty`] 仅以证书对数量判断，与根证书是否存在无关。

use std::fmt;

use crate::error::SecurityError;

/// 一对 PEM 编码的私钥与证书链。
#[derive(Clone, PartialEq, Eq)]
pub struct PemKeyCertPair {
    private_key: String,
    cert_chain: String,
}

impl PemKeyCertPair {
    /// 两个字段均不得为空，否则返回 [`SecurityError::InvalidKeyCertPair`]。
    pub fn new(
        private_key: impl Into<String>,
        cert_chain: impl Into<String>,
    ) -> Result<Self, SecurityError> {
        let private_key = private_key.into();
        let cert_chain = cert_chain.into();
        if private_key.is_empty() || cert_chain.is_empty() {
            return Err(SecurityError::InvalidKeyCertPair);
        }
        Ok(Self {
            private_key,
            cert_chain,
        })
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    pub fn cert_chain(&self) -> &str {
        &self.cert_chain
    }
}

// 私钥不进入调试输出。
impl fmt::Debug for PemKeyCertPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PemKeyCertPair")
            .field("private_key", &"<redacted>")
            .field("cert_chain_len", &self.cert_chain.len())
            .finish()
    }
}

/// 根证书束与证书对列表。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyMaterialsConfig {
    pem_root_certs: Option<String>,
    pem_key_cert_pairs: Vec<PemKeyCertPair>,
}

impl KeyMaterialsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 整体替换根证书与证书对。
    pub fn set_key_materials(
        &mut self,
        pem_root_certs: Option<String>,
        pem_key_cert_pairs: Vec<PemKeyCertPair>,
    ) {
        self.pem_root_certs = pem_root_certs;
        self.pem_key_cert_pairs = pem_key_cert_pairs;
    }

    /// 链式构造用的便捷方法。
    pub fn with_key_materials(
        mut self,
        pem_root_certs: Option<String>,
        pem_key_cert_pairs: Vec<PemKeyCertPair>,
    ) -> Self {
        self.set_key_materials(pem_root_certs, pem_key_cert_pairs);
        self
    }

    pub fn pem_root_certs(&self) -> Option<&str> {
        self.pem_root_certs.as_deref()
    }

    pub fn pem_key_cert_pairs(&self) -> &[PemKeyCertPair] {
        &self.pem_key_cert_pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pem_key_cert_pairs.is_empty()
    }
}
