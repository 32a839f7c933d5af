//! 握手完成后引擎产出的对端属性集合。

/// 对端证书公用名。
pub const X509_SUBJECT_COMMON_NAME_PEER_PROPERTY: &str = "x509_subject_common_name";
/// 对端证书的主题备用名，每个名称一条属性。
pub const X509_SUBJECT_ALTERNATIVE_NAME_PEER_PROPERTY: &str = "x509_subject_alternative_name";
/// PEM 编码的对端叶子证书。
pub const X509_PEM_CERT_PROPERTY: &str = "x509_pem_cert";
/// 握手协商出的 ALPN 协议。
pub const SSL_ALPN_SELECTED_PROTOCOL: &str = "ssl_alpn_selected_protocol";
/// 会话是否复用，取值 `"true"` / `"false"`。
pub const SSL_SESSION_REUSED_PEER_PROPERTY: &str = "ssl_session_reused";
/// 证书类型，本连接器只产出 `"X509"`。
pub const CERTIFICATE_TYPE_PEER_PROPERTY: &str = "certificate_type";

/// 单个对端属性，值为原始字节。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerProperty {
    name: String,
    value: Vec<u8>,
}

impl PeerProperty {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// 值为合法 UTF-8 时以文本返回。
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

/// 握手产出的对端身份。连接器按值接收，校验结束即丢弃。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Peer {
    properties: Vec<PeerProperty>,
}

impl Peer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.properties.push(PeerProperty::new(name, value));
    }

    /// 第一个名为 `name` 的属性。
    pub fn property(&self, name: &str) -> Option<&PeerProperty> {
        self.properties.iter().find(|property| property.name == name)
    }

    pub fn properties(&self) -> &[PeerProperty] {
        &self.properties
    }
}
