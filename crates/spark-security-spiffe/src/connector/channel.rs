use std::{cmp::Ordering, fmt, sync::Arc};

use spark_transport_core::{KeyValue, SharedLogger, noop_logger};

use super::{FactorySlot, SPIFFE_URL_SCHEME, SecurityConnector};
use crate::{
    LOG_TARGET,
    auth_context::{AuthContext, SPIFFE_TRANSPORT_SECURITY_TYPE},
    authz::{AuthorizationCheckRequest, PeerCheckedCallback, deliver_peer_checked},
    engine::{
        ClientHandshakerFactory, ConnectionArgs, HandshakeEngine, HandshakeManager, HandshakeSide,
        SecurityHandshaker,
    },
    error::SecurityError,
    material::KeyMaterialsConfig,
    options::{SpiffeCredentials, TlsCredentialsOptions},
    peer::{Peer, PeerProperty, X509_PEM_CERT_PROPERTY},
    reload::CompletionMode,
    verify::{check_alpn, check_call_host, cmp_target_name, split_host_port},
};

/// 通道侧 SPIFFE 安全连接器。
///
/// # 契约说明（What）
/// - 构造成功即意味着已有一个可用的客户端握手工厂；
/// - `target_name` 为去掉端口后的主机名；配置了覆盖名时，握手器与授权检查都使用覆盖名；
/// - 同一连接器上的 `check_peer` 调用必须由调用方串行化，原因见 [`crate::authz`]。
pub struct SpiffeChannelSecurityConnector<E: HandshakeEngine> {
    engine: E,
    credentials: Arc<SpiffeCredentials>,
    target_name: String,
    overridden_target_name: Option<String>,
    session_cache: Option<E::SessionCache>,
    factory: FactorySlot<E::ClientFactory>,
    authorization_check: AuthorizationCheckRequest,
    logger: SharedLogger,
}

/// [`SpiffeChannelSecurityConnector`] 的构造器。
pub struct ChannelConnectorBuilder<E: HandshakeEngine> {
    engine: E,
    credentials: Arc<SpiffeCredentials>,
    target_name: String,
    overridden_target_name: Option<String>,
    session_cache: Option<E::SessionCache>,
    logger: SharedLogger,
}

impl<E: HandshakeEngine> ChannelConnectorBuilder<E> {
    /// 覆盖握手与授权检查使用的目标名，常用于测试环境的证书名与拨号地址不一致时。
    pub fn overridden_target_name(mut self, name: impl Into<String>) -> Self {
        self.overridden_target_name = Some(name.into());
        self
    }

    pub fn session_cache(mut self, cache: E::SessionCache) -> Self {
        self.session_cache = Some(cache);
        self
    }

    pub fn logger(mut self, logger: SharedLogger) -> Self {
        self.logger = logger;
        self
    }

    /// 创建连接器并初始化握手工厂。
    ///
    /// 目标名为空或初始化失败时返回错误，并以 ERROR 级别记录。
    pub fn create(self) -> Result<SpiffeChannelSecurityConnector<E>, SecurityError> {
        if self.target_name.is_empty() {
            self.logger.error(
                LOG_TARGET,
                "target_name is empty when creating the channel security connector",
                None,
                &[],
            );
            return Err(SecurityError::InvalidTargetName);
        }
        let (host, _) = split_host_port(&self.target_name);
        let target_name = host.to_owned();
        let connector = SpiffeChannelSecurityConnector {
            authorization_check: AuthorizationCheckRequest::new(Arc::clone(&self.logger)),
            engine: self.engine,
            credentials: self.credentials,
            target_name,
            overridden_target_name: self.overridden_target_name,
            session_cache: self.session_cache,
            factory: FactorySlot::new(),
            logger: self.logger,
        };
        if let Err(err) = connector.initialize_handshaker_factory() {
            connector.logger.error(
                LOG_TARGET,
                "Could not initialize client handshaker factory.",
                Some(&err),
                &[KeyValue::new("code", err.code())],
            );
            return Err(err);
        }
        Ok(connector)
    }
}

impl<E: HandshakeEngine> SpiffeChannelSecurityConnector<E> {
    /// `target_name` 可带端口，端口在构造时被丢弃。
    pub fn builder(
        engine: E,
        credentials: Arc<SpiffeCredentials>,
        target_name: impl Into<String>,
    ) -> ChannelConnectorBuilder<E> {
        ChannelConnectorBuilder {
            engine,
            credentials,
            target_name: target_name.into(),
            overridden_target_name: None,
            session_cache: None,
            logger: noop_logger(),
        }
    }

    pub fn credentials(&self) -> &Arc<SpiffeCredentials> {
        &self.credentials
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn overridden_target_name(&self) -> Option<&str> {
        self.overridden_target_name.as_deref()
    }

    /// 握手与授权检查实际使用的名称。
    pub fn server_name(&self) -> &str {
        self.overridden_target_name
            .as_deref()
            .unwrap_or(&self.target_name)
    }

    /// 当前握手工厂；上一次重建失败时为 `None`。
    pub fn handshaker_factory(&self) -> Option<Arc<E::ClientFactory>> {
        self.factory.current()
    }

    /// 连接器持有的材料快照。
    pub fn key_materials(&self) -> KeyMaterialsConfig {
        self.factory.key_materials()
    }

    /// 复制选项中的静态材料、获取材料并构造工厂。
    pub fn initialize_handshaker_factory(&self) -> Result<(), SecurityError> {
        self.factory
            .initialize(self.options(), &*self.logger, |materials| {
                self.build_factory(materials)
            })
    }

    /// 获取材料，仅在材料更新时重建工厂。
    pub fn refresh_handshaker_factory(&self) -> Result<(), SecurityError> {
        self.factory
            .refresh(self.options(), &*self.logger, |materials| {
                self.build_factory(materials)
            })
    }

    /// 校验单次调用覆盖的主机名。
    pub fn check_call_host(
        &self,
        host: &str,
        auth_context: &AuthContext,
    ) -> Result<(), SecurityError> {
        check_call_host(
            host,
            &self.target_name,
            self.overridden_target_name.as_deref(),
            auth_context,
        )
    }

    /// 取消主机名校验：只释放传入的错误，不影响进行中的授权检查。
    pub fn cancel_check_call_host(&self, error: SecurityError) {
        drop(error);
    }

    /// 连接器等价性比较：scheme、凭证对象、目标名、覆盖名依次比较。
    pub fn cmp(&self, other: &Self) -> Ordering {
        self.url_scheme()
            .cmp(other.url_scheme())
            .then_with(|| Arc::as_ptr(&self.credentials).cmp(&Arc::as_ptr(&other.credentials)))
            .then_with(|| {
                cmp_target_name(
                    &self.target_name,
                    &other.target_name,
                    self.overridden_target_name.as_deref(),
                    other.overridden_target_name.as_deref(),
                )
            })
    }

    /// 可复用的授权检查请求。
    pub fn authorization_check_request(&self) -> &AuthorizationCheckRequest {
        &self.authorization_check
    }

    fn options(&self) -> &TlsCredentialsOptions {
        self.credentials.options()
    }

    fn build_factory(
        &self,
        materials: &KeyMaterialsConfig,
    ) -> Result<E::ClientFactory, SecurityError> {
        self.engine
            .create_client_factory(
                materials.pem_key_cert_pairs(),
                materials.pem_root_certs(),
                self.session_cache.clone(),
                self.options().alpn_protocols(),
            )
            .map_err(SecurityError::from)
    }
}

impl<E: HandshakeEngine> SecurityConnector for SpiffeChannelSecurityConnector<E> {
    type Handshaker = <E::ClientFactory as ClientHandshakerFactory>::Handshaker;

    fn url_scheme(&self) -> &str {
        SPIFFE_URL_SCHEME
    }

    fn add_handshakers(
        &self,
        args: &ConnectionArgs,
        manager: &mut dyn HandshakeManager<Self::Handshaker>,
    ) {
        if let Err(err) = self.refresh_handshaker_factory() {
            self.logger.error(
                LOG_TARGET,
                "Handshaker factory refresh failed.",
                Some(&err),
                &[KeyValue::new("code", err.code())],
            );
            return;
        }
        let Some(factory) = self.factory.current() else {
            let err = SecurityError::FactoryUnavailable;
            self.logger.error(
                LOG_TARGET,
                "Handshaker factory refresh failed.",
                Some(&err),
                &[KeyValue::new("code", err.code())],
            );
            return;
        };
        match factory.create_handshaker(self.server_name()) {
            Ok(handshaker) => manager.add(SecurityHandshaker::new(
                handshaker,
                HandshakeSide::Client,
                args.clone(),
            )),
            Err(err) => {
                let err = SecurityError::HandshakerCreation(err);
                self.logger.error(
                    LOG_TARGET,
                    &err.to_string(),
                    Some(&err),
                    &[KeyValue::new("server_name", self.server_name())],
                );
            }
        }
    }

    fn check_peer(&self, peer: Peer, on_peer_checked: PeerCheckedCallback) {
        let options = self.options();
        if let Err(err) = check_alpn(&peer, options.alpn_protocols()) {
            deliver_peer_checked(on_peer_checked, Err(err.into()));
            return;
        }
        let auth_context = Arc::new(AuthContext::from_peer(
            &peer,
            SPIFFE_TRANSPORT_SECURITY_TYPE,
        ));
        let Some(check) = options.server_authorization_check() else {
            deliver_peer_checked(on_peer_checked, Ok(auth_context));
            return;
        };
        let Some(peer_cert) = peer
            .property(X509_PEM_CERT_PROPERTY)
            .and_then(PeerProperty::value_str)
        else {
            deliver_peer_checked(
                on_peer_checked,
                Err(SecurityError::AuthorizationMissingProperty),
            );
            return;
        };
        self.authorization_check.begin(
            peer_cert,
            self.server_name(),
            on_peer_checked,
            auth_context,
        );
        match check.schedule(&self.authorization_check) {
            CompletionMode::Asynchronous => {}
            CompletionMode::Synchronous => self.authorization_check.finish_synchronously(),
        }
    }
}

impl<E: HandshakeEngine> fmt::Debug for SpiffeChannelSecurityConnector<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpiffeChannelSecurityConnector")
            .field("target_name", &self.target_name)
            .field("overridden_target_name", &self.overridden_target_name)
            .field("has_factory", &self.factory.current().is_some())
            .finish_non_exhaustive()
    }
}
