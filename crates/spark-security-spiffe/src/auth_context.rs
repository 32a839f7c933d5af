//! 认证上下文：握手后对端身份的可查询视图。
//!
//! # 逻辑解析（How）
//! - [`AuthContext::from_peer`] 把引擎属性映射为认证属性，并写入传输安全类型标签；
//! - 对端身份优先取主题备用名（SAN），没有 SAN 时回退到公用名（CN）。

use crate::peer::{
    Peer, SSL_SESSION_REUSED_PEER_PROPERTY, X509_PEM_CERT_PROPERTY,
    X509_SUBJECT_ALTERNATIVE_NAME_PEER_PROPERTY, X509_SUBJECT_COMMON_NAME_PEER_PROPERTY,
};

pub const TRANSPORT_SECURITY_TYPE_PROPERTY_NAME: &str = "transport_security_type";
pub const X509_CN_PROPERTY_NAME: &str = "x509_common_name";
pub const X509_SAN_PROPERTY_NAME: &str = "x509_subject_alternative_name";
pub const X509_PEM_CERT_PROPERTY_NAME: &str = "x509_pem_cert";
pub const SSL_SESSION_REUSED_PROPERTY_NAME: &str = "ssl_session_reused";
/// SPIFFE 连接器写入的传输安全类型。
pub const SPIFFE_TRANSPORT_SECURITY_TYPE: &str = "spiffe";

/// 认证属性。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthProperty {
    pub name: String,
    pub value: String,
}

/// 认证上下文。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthContext {
    properties: Vec<AuthProperty>,
    peer_identity_property_name: Option<&'static str>,
}

impl AuthContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由对端属性构造认证上下文，`transport_security_type` 作为首个属性写入。
    pub fn from_peer(peer: &Peer, transport_security_type: &str) -> Self {
        let mut context = Self::new();
        context.add_property(TRANSPORT_SECURITY_TYPE_PROPERTY_NAME, transport_security_type);
        for property in peer.properties() {
            let Some(value) = property.value_str() else {
                continue;
            };
            match property.name() {
                X509_SUBJECT_COMMON_NAME_PEER_PROPERTY => {
                    context.add_property(X509_CN_PROPERTY_NAME, value);
                    if context.peer_identity_property_name.is_none() {
                        context.peer_identity_property_name = Some(X509_CN_PROPERTY_NAME);
                    }
                }
                X509_SUBJECT_ALTERNATIVE_NAME_PEER_PROPERTY => {
                    context.add_property(X509_SAN_PROPERTY_NAME, value);
                    context.peer_identity_property_name = Some(X509_SAN_PROPERTY_NAME);
                }
                X509_PEM_CERT_PROPERTY => context.add_property(X509_PEM_CERT_PROPERTY_NAME, value),
                SSL_SESSION_REUSED_PEER_PROPERTY => {
                    context.add_property(SSL_SESSION_REUSED_PROPERTY_NAME, value)
                }
                _ => {}
            }
        }
        context
    }

    pub fn add_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.push(AuthProperty {
            name: name.into(),
            value: value.into(),
        });
    }

    /// 按名称查找全部属性值。
    pub fn find_properties<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.properties
            .iter()
            .filter(move |property| property.name == name)
            .map(|property| property.value.as_str())
    }

    pub fn properties(&self) -> &[AuthProperty] {
        &self.properties
    }

    pub fn peer_identity_property_name(&self) -> Option<&'static str> {
        self.peer_identity_property_name
    }

    /// 对端身份取值；未认证时为空。
    pub fn peer_identity(&self) -> Vec<&str> {
        match self.peer_identity_property_name {
            Some(name) => self.find_properties(name).collect(),
            None => Vec::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.peer_identity_property_name.is_some()
    }

    pub fn transport_security_type(&self) -> Option<&str> {
        self.find_properties(TRANSPORT_SECURITY_TYPE_PROPERTY_NAME).next()
    }
}
