//! 通道侧与服务端的 SPIFFE 安全连接器。
//!
//! # 设计背景（Why）
//! - 每次建连前，连接器需要确认证书材料是否更新、必要时重建握手工厂，再从工厂取得握手器；
//! - 工厂的替换与材料的改写必须在同一把锁下串行，握手器创建与对端校验则在锁外进行。
//!
//! # 逻辑解析（How）
//! - [`FactorySlot`] 是两侧共享的生命周期管理器：锁内依次完成“读取选项 → 调用重载 → 替换工厂”；
//! - 初始化与刷新是两条路径：初始化无条件重建；刷新只在重载结果为 `New` 时重建；
//! - 重建总是先释放旧工厂再构造新工厂，构造失败时槽位为空，直到下一次成功刷新前都无法创建握手器。

mod channel;
mod server;

pub use channel::{ChannelConnectorBuilder, SpiffeChannelSecurityConnector};
pub use server::SpiffeServerSecurityConnector;

use std::sync::Arc;

use parking_lot::Mutex;
use spark_transport_core::Logger;

use crate::{
    authz::PeerCheckedCallback,
    engine::{ConnectionArgs, HandshakeManager},
    error::SecurityError,
    material::KeyMaterialsConfig,
    options::TlsCredentialsOptions,
    peer::Peer,
    reload::{ReloadStatus, fetch_key_materials},
};

/// 连接器的 URL scheme。
pub const SPIFFE_URL_SCHEME: &str = "https";

/// 安全连接器的公共契约。
pub trait SecurityConnector: Send + Sync {
    type Handshaker;

    fn url_scheme(&self) -> &str;

    /// 为一次建连添加握手器。失败只记录日志，不向管理器添加任何握手器。
    fn add_handshakers(
        &self,
        args: &ConnectionArgs,
        manager: &mut dyn HandshakeManager<Self::Handshaker>,
    );

    /// 校验握手完成后的对端，结果经完成回调恰好交付一次。
    fn check_peer(&self, peer: Peer, on_peer_checked: PeerCheckedCallback);
}

struct FactoryState<F> {
    key_materials: KeyMaterialsConfig,
    factory: Option<Arc<F>>,
}

/// 单个连接器独占的“材料 + 工厂”槽位。
pub(crate) struct FactorySlot<F> {
    state: Mutex<FactoryState<F>>,
}

impl<F> FactorySlot<F> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(FactoryState {
                key_materials: KeyMaterialsConfig::new(),
                factory: None,
            }),
        }
    }

    /// 首次构造：复制选项中的静态材料，获取材料后无条件构造工厂。
    pub(crate) fn initialize<B>(
        &self,
        options: &TlsCredentialsOptions,
        logger: &dyn Logger,
        build: B,
    ) -> Result<(), SecurityError>
    where
        B: FnOnce(&KeyMaterialsConfig) -> Result<F, SecurityError>,
    {
        let mut state = self.state.lock();
        if let Some(materials) = options.key_materials() {
            state.key_materials.set_key_materials(
                materials.pem_root_certs().map(str::to_owned),
                materials.pem_key_cert_pairs().to_vec(),
            );
        }
        fetch_key_materials(&mut state.key_materials, options, logger)?;
        state.replace(build)
    }

    /// 建连前刷新：仅当重载报告新材料时重建工厂。
    pub(crate) fn refresh<B>(
        &self,
        options: &TlsCredentialsOptions,
        logger: &dyn Logger,
        build: B,
    ) -> Result<(), SecurityError>
    where
        B: FnOnce(&KeyMaterialsConfig) -> Result<F, SecurityError>,
    {
        let mut state = self.state.lock();
        match fetch_key_materials(&mut state.key_materials, options, logger)? {
            ReloadStatus::New => state.replace(build),
            ReloadStatus::Unchanged | ReloadStatus::Fail => Ok(()),
        }
    }

    /// 当前工厂的共享句柄。
    pub(crate) fn current(&self) -> Option<Arc<F>> {
        self.state.lock().factory.clone()
    }

    pub(crate) fn key_materials(&self) -> KeyMaterialsConfig {
        self.state.lock().key_materials.clone()
    }
}

impl<F> FactoryState<F> {
    fn replace<B>(&mut self, build: B) -> Result<(), SecurityError>
    where
        B: FnOnce(&KeyMaterialsConfig) -> Result<F, SecurityError>,
    {
        self.factory = None;
        if self.key_materials.is_empty() {
            return Err(SecurityError::MissingKeyCertPairs);
        }
        let factory = build(&self.key_materials)?;
        self.factory = Some(Arc::new(factory));
        Ok(())
    }
}
