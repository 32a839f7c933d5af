use std::{cmp::Ordering, fmt, sync::Arc};

use spark_transport_core::{KeyValue, SharedLogger, noop_logger};

use super::{FactorySlot, SPIFFE_URL_SCHEME, SecurityConnector};
use crate::{
    LOG_TARGET,
    auth_context::{AuthContext, SPIFFE_TRANSPORT_SECURITY_TYPE},
    authz::{PeerCheckedCallback, deliver_peer_checked},
    engine::{
        ConnectionArgs, HandshakeEngine, HandshakeManager, HandshakeSide, SecurityHandshaker,
        ServerHandshakerFactory,
    },
    error::SecurityError,
    material::KeyMaterialsConfig,
    options::{SpiffeServerCredentials, TlsCredentialsOptions},
    peer::Peer,
    verify::check_alpn,
};

/// 服务端 SPIFFE 安全连接器。
///
/// 与通道侧共享同一套工厂生命周期；对端校验只包含 ALPN 检查与认证上下文构造，
/// 不调用授权检查能力。
pub struct SpiffeServerSecurityConnector<E: HandshakeEngine> {
    engine: E,
    credentials: Arc<SpiffeServerCredentials>,
    factory: FactorySlot<E::ServerFactory>,
    logger: SharedLogger,
}

impl<E: HandshakeEngine> SpiffeServerSecurityConnector<E> {
    /// 创建连接器并初始化握手工厂，日志输出到空实现。
    pub fn create(
        engine: E,
        credentials: Arc<SpiffeServerCredentials>,
    ) -> Result<Self, SecurityError> {
        Self::create_with_logger(engine, credentials, noop_logger())
    }

    /// 创建连接器并初始化握手工厂；初始化失败以 ERROR 级别记录后返回。
    pub fn create_with_logger(
        engine: E,
        credentials: Arc<SpiffeServerCredentials>,
        logger: SharedLogger,
    ) -> Result<Self, SecurityError> {
        let connector = Self {
            engine,
            credentials,
            factory: FactorySlot::new(),
            logger,
        };
        if let Err(err) = connector.initialize_handshaker_factory() {
            connector.logger.error(
                LOG_TARGET,
                "Could not initialize server handshaker factory.",
                Some(&err),
                &[KeyValue::new("code", err.code())],
            );
            return Err(err);
        }
        Ok(connector)
    }

    pub fn credentials(&self) -> &Arc<SpiffeServerCredentials> {
        &self.credentials
    }

    pub fn handshaker_factory(&self) -> Option<Arc<E::ServerFactory>> {
        self.factory.current()
    }

    pub fn key_materials(&self) -> KeyMaterialsConfig {
        self.factory.key_materials()
    }

    pub fn initialize_handshaker_factory(&self) -> Result<(), SecurityError> {
        self.factory
            .initialize(self.options(), &*self.logger, |materials| {
                self.build_factory(materials)
            })
    }

    pub fn refresh_handshaker_factory(&self) -> Result<(), SecurityError> {
        self.factory
            .refresh(self.options(), &*self.logger, |materials| {
                self.build_factory(materials)
            })
    }

    /// 服务端连接器只比较 scheme 与凭证对象。
    pub fn cmp(&self, other: &Self) -> Ordering {
        self.url_scheme()
            .cmp(other.url_scheme())
            .then_with(|| Arc::as_ptr(&self.credentials).cmp(&Arc::as_ptr(&other.credentials)))
    }

    fn options(&self) -> &TlsCredentialsOptions {
        self.credentials.options()
    }

    fn build_factory(
        &self,
        materials: &KeyMaterialsConfig,
    ) -> Result<E::ServerFactory, SecurityError> {
        let options = self.options();
        self.engine
            .create_server_factory(
                materials.pem_key_cert_pairs(),
                materials.pem_root_certs(),
                options.cert_request_type(),
                options.alpn_protocols(),
            )
            .map_err(SecurityError::from)
    }
}

impl<E: HandshakeEngine> SecurityConnector for SpiffeServerSecurityConnector<E> {
    type Handshaker = <E::ServerFactory as ServerHandshakerFactory>::Handshaker;

    fn url_scheme(&self) -> &str {
        SPIFFE_URL_SCHEME
    }

    fn add_handshakers(
        &self,
        args: &ConnectionArgs,
        manager: &mut dyn HandshakeManager<Self::Handshaker>,
    ) {
        let factory = match self.refresh_handshaker_factory() {
            Ok(()) => self.factory.current(),
            Err(err) => {
                self.logger.error(
                    LOG_TARGET,
                    "Handshaker factory refresh failed.",
                    Some(&err),
                    &[KeyValue::new("code", err.code())],
                );
                return;
            }
        };
        let Some(factory) = factory else {
            let err = SecurityError::FactoryUnavailable;
            self.logger.error(
                LOG_TARGET,
                "Handshaker factory refresh failed.",
                Some(&err),
                &[KeyValue::new("code", err.code())],
            );
            return;
        };
        match factory.create_handshaker() {
            Ok(handshaker) => manager.add(SecurityHandshaker::new(
                handshaker,
                HandshakeSide::Server,
                args.clone(),
            )),
            Err(err) => {
                let err = SecurityError::HandshakerCreation(err);
                self.logger.error(LOG_TARGET, &err.to_string(), Some(&err), &[]);
            }
        }
    }

    fn check_peer(&self, peer: Peer, on_peer_checked: PeerCheckedCallback) {
        let result = check_alpn(&peer, self.options().alpn_protocols())
            .map(|()| {
                Arc::new(AuthContext::from_peer(
                    &peer,
                    SPIFFE_TRANSPORT_SECURITY_TYPE,
                ))
            })
            .map_err(SecurityError::from);
        deliver_peer_checked(on_peer_checked, result);
    }
}

impl<E: HandshakeEngine> fmt::Debug for SpiffeServerSecurityConnector<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpiffeServerSecurityConnector")
            .field("cert_request_type", &self.options().cert_request_type())
            .field("has_factory", &self.factory.current().is_some())
            .finish_non_exhaustive()
    }
}
