//! 握手后校验：ALPN、调用主机名与目标名比较。
//!
//! # 契约说明（What）
//! - [`check_alpn`]：对端必须携带协商出的 ALPN 协议，且该协议在支持列表内；
//! - [`check_call_host`]：单次调用覆盖的主机名需匹配对端证书名，或在目标名被覆盖时等于原始目标名；
//! - [`cmp_target_name`]：先比较目标名，再比较覆盖名，缺失的覆盖名排在前面。

use std::{cmp::Ordering, net::IpAddr};

use crate::{
    auth_context::{AuthContext, X509_CN_PROPERTY_NAME, X509_SAN_PROPERTY_NAME},
    error::{AlpnError, SecurityError},
    peer::{Peer, SSL_ALPN_SELECTED_PROTOCOL},
};

/// 校验对端选择的 ALPN 协议。
pub fn check_alpn(peer: &Peer, supported_protocols: &[String]) -> Result<(), AlpnError> {
    let selected = peer
        .property(SSL_ALPN_SELECTED_PROTOCOL)
        .ok_or(AlpnError::MissingSelectedProtocol)?;
    if supported_protocols
        .iter()
        .any(|protocol| protocol.as_bytes() == selected.value())
    {
        Ok(())
    } else {
        Err(AlpnError::InvalidProtocol)
    }
}

/// 把 `host[:port]` 拆成主机与端口，支持 `[v6]:port` 写法。
///
/// 含多个冒号且无方括号的输入视为裸 IPv6 地址；括号不闭合时整个输入作为主机返回。
pub fn split_host_port(name: &str) -> (&str, Option<&str>) {
    if let Some(rest) = name.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, "")) => (host, None),
            Some((host, tail)) => match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => (name, None),
            },
            None => (name, None),
        };
    }
    match name.split_once(':') {
        Some((host, port)) if !port.contains(':') => (host, Some(port)),
        _ => (name, None),
    }
}

/// 对端证书名是否匹配 `name`。
///
/// - `name` 为 IP 地址时只与 SAN 精确比较；
/// - 有 SAN 时只看 SAN，没有 SAN 时回退到 CN；
/// - 比较不区分大小写，支持最左一级的 `*.` 通配符。
pub fn peer_matches_name(auth_context: &AuthContext, name: &str) -> bool {
    let is_ip = name.parse::<IpAddr>().is_ok();
    let mut sans = auth_context.find_properties(X509_SAN_PROPERTY_NAME).peekable();
    if sans.peek().is_some() {
        return sans.any(|entry| {
            if is_ip {
                entry == name
            } else {
                entry_matches_name(entry, name)
            }
        });
    }
    if is_ip {
        return false;
    }
    auth_context
        .find_properties(X509_CN_PROPERTY_NAME)
        .any(|entry| entry_matches_name(entry, name))
}

fn entry_matches_name(entry: &str, name: &str) -> bool {
    let entry = entry.strip_suffix('.').unwrap_or(entry);
    let name = name.strip_suffix('.').unwrap_or(name);
    if entry.is_empty() || name.is_empty() {
        return false;
    }
    if entry.eq_ignore_ascii_case(name) {
        return true;
    }
    let Some(suffix) = entry.strip_prefix("*.") else {
        return false;
    };
    // 通配符不得覆盖顶级域。
    if !suffix.contains('.') {
        return false;
    }
    match name.split_once('.') {
        Some((label, rest)) => !label.is_empty() && rest.eq_ignore_ascii_case(suffix),
        None => false,
    }
}

/// 校验单次调用覆盖的主机名。
///
/// 目标名被覆盖时，原始目标名已在握手结束的对端校验中间接确认，因此等于原始目标名即放行。
pub fn check_call_host(
    host: &str,
    target_name: &str,
    overridden_target_name: Option<&str>,
    auth_context: &AuthContext,
) -> Result<(), SecurityError> {
    let (host_only, _) = split_host_port(host);
    if peer_matches_name(auth_context, host_only) {
        return Ok(());
    }
    if overridden_target_name.is_some() && host == target_name {
        return Ok(());
    }
    Err(SecurityError::CallHostMismatch)
}

/// 比较两组 `(目标名, 覆盖名)`。
pub fn cmp_target_name(
    target_name: &str,
    other_target_name: &str,
    overridden_target_name: Option<&str>,
    other_overridden_target_name: Option<&str>,
) -> Ordering {
    target_name
        .cmp(other_target_name)
        .then_with(|| overridden_target_name.cmp(&other_overridden_target_name))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{auth_context::SPIFFE_TRANSPORT_SECURITY_TYPE, peer::*};

    fn context_with(sans: &[&str], cn: Option<&str>) -> AuthContext {
        let mut peer = Peer::new();
        if let Some(cn) = cn {
            peer.push(X509_SUBJECT_COMMON_NAME_PEER_PROPERTY, cn);
        }
        for san in sans {
            peer.push(X509_SUBJECT_ALTERNATIVE_NAME_PEER_PROPERTY, *san);
        }
        AuthContext::from_peer(&peer, SPIFFE_TRANSPORT_SECURITY_TYPE)
    }

    #[test]
    fn alpn_requires_a_supported_selection() {
        let supported = vec!["h2".to_owned()];
        assert_eq!(
            check_alpn(&Peer::new(), &supported),
            Err(AlpnError::MissingSelectedProtocol)
        );
        let http1 = Peer::new().with_property(SSL_ALPN_SELECTED_PROTOCOL, "http/1.1");
        assert_eq!(check_alpn(&http1, &supported), Err(AlpnError::InvalidProtocol));
        let h2 = Peer::new().with_property(SSL_ALPN_SELECTED_PROTOCOL, "h2");
        assert_eq!(check_alpn(&h2, &supported), Ok(()));
    }

    #[test]
    fn host_port_splitting() {
        assert_eq!(split_host_port("svc.local:8443"), ("svc.local", Some("8443")));
        assert_eq!(split_host_port("svc.local"), ("svc.local", None));
        assert_eq!(split_host_port("[::1]:443"), ("::1", Some("443")));
        assert_eq!(split_host_port("[fe80::1]"), ("fe80::1", None));
        assert_eq!(split_host_port("fe80::1"), ("fe80::1", None));
        assert_eq!(split_host_port("[::1"), ("[::1", None));
    }

    #[test]
    fn names_match_with_wildcards_and_case_folding() {
        let context = context_with(&["*.example.org", "API.internal"], Some("ignored.cn"));
        assert!(peer_matches_name(&context, "foo.example.org"));
        assert!(!peer_matches_name(&context, "a.b.example.org"));
        assert!(!peer_matches_name(&context, "example.org"));
        assert!(peer_matches_name(&context, "api.INTERNAL"));
        assert!(!peer_matches_name(&context, "ignored.cn"), "有 SAN 时不回退到 CN");

        let cn_only = context_with(&[], Some("node.cluster.local"));
        assert!(peer_matches_name(&cn_only, "node.cluster.local"));

        let tld = context_with(&["*.com"], None);
        assert!(!peer_matches_name(&tld, "example.com"));
    }

    #[test]
    fn ip_hosts_only_match_san_entries_exactly() {
        let context = context_with(&["10.0.0.7"], None);
        assert!(peer_matches_name(&context, "10.0.0.7"));
        let cn_only = context_with(&[], Some("10.0.0.7"));
        assert!(!peer_matches_name(&cn_only, "10.0.0.7"));
    }

    #[test]
    fn call_host_accepts_the_original_target_under_override() {
        let context = context_with(&["override.test"], None);
        assert_eq!(
            check_call_host("svc.local:443", "svc.local", None, &context),
            Err(SecurityError::CallHostMismatch)
        );
        assert_eq!(
            check_call_host("svc.local", "svc.local", Some("override.test"), &context),
            Ok(())
        );
        assert_eq!(
            check_call_host("override.test:443", "svc.local", Some("override.test"), &context),
            Ok(())
        );
        assert_eq!(
            check_call_host("other.local", "svc.local", Some("override.test"), &context),
            Err(SecurityError::CallHostMismatch)
        );
    }

    fn name() -> impl Strategy<Value = String> {
        "[a-c]{0,3}"
    }

    fn pair() -> impl Strategy<Value = (String, Option<String>)> {
        (name(), proptest::option::of(name()))
    }

    proptest! {
        #[test]
        fn prop_target_name_order_is_reflexive_and_antisymmetric(a in pair(), b in pair()) {
            prop_assert_eq!(
                cmp_target_name(&a.0, &a.0, a.1.as_deref(), a.1.as_deref()),
                Ordering::Equal
            );
            let forward = cmp_target_name(&a.0, &b.0, a.1.as_deref(), b.1.as_deref());
            let backward = cmp_target_name(&b.0, &a.0, b.1.as_deref(), a.1.as_deref());
            prop_assert_eq!(forward, backward.reverse());
            prop_assert_eq!(forward == Ordering::Equal, a == b);
        }
    }
}
