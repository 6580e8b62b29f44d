//! SDK 主接口
//!
//! `CampusPinSDK` 按层组装全部组件：本地缓存 → 事件 → 网络 → 存储/队列 →
//! 远端客户端 → 同步编排 → 接近提醒 → 调度器。渲染层只通过事件订阅交互。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{CampusPinError, Result};
use crate::events::{EventManager, PinEvent};
use crate::http_client::HttpPinClient;
use crate::network::{NetworkMonitor, NetworkStatus};
use crate::proximity::{ProximityAlert, ProximityNotifier, DEFAULT_THRESHOLD_METERS};
use crate::remote_client::RemoteClient;
use crate::storage::entities::{Identity, LatLng, Pin, PinDraft, PoiRecord, Visibility};
use crate::storage::kv::LocalCache;
use crate::storage::queue::{DrainReport, PendingQueue, RetryPolicy};
use crate::storage::StorageManager;
use crate::sync::{CollectionState, ReconcileOutcome, SyncOrchestrator, SyncScheduler};

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(15),
        }
    }
}

/// pin 有效期上限（秒），约十年
pub const MAX_PIN_TTL_SECS: u64 = 315_360_000;

/// 同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// 周期刷新间隔（秒）
    pub poll_interval_secs: u64,
    /// pin 有效期（秒）
    pub pin_ttl_secs: u64,
    /// 补发失败后的退避策略
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            pin_ttl_secs: 24 * 60 * 60,
            retry: RetryPolicy::default(),
        }
    }
}

/// 接近提醒配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProximityConfig {
    /// 提醒半径（米）
    pub threshold_meters: f64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            threshold_meters: DEFAULT_THRESHOLD_METERS,
        }
    }
}

/// 事件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// 事件缓冲区大小
    pub buffer_size: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { buffer_size: 256 }
    }
}

/// CampusPin SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampusPinConfig {
    /// 数据存储目录
    pub data_dir: PathBuf,
    /// 调用方身份，同时决定缓存命名空间
    pub identity: Identity,
    /// 远端 API 基础 URL
    ///
    /// 例如：https://example.org/mytp/
    /// 为 None 时必须注入自定义 RemoteClient
    pub api_base_url: Option<String>,
    /// Bearer token
    pub api_token: Option<String>,
    /// HTTP 客户端配置
    pub http_client_config: HttpClientConfig,
    /// 同步配置
    pub sync_config: SyncConfig,
    /// 接近提醒配置
    pub proximity_config: ProximityConfig,
    /// 事件配置
    pub event_config: EventConfig,
    /// 调试模式（安装 fmt 日志订阅器）
    pub debug_mode: bool,
}

impl Default for CampusPinConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            identity: Identity::default(),
            api_base_url: None,
            api_token: None,
            http_client_config: HttpClientConfig::default(),
            sync_config: SyncConfig::default(),
            proximity_config: ProximityConfig::default(),
            event_config: EventConfig::default(),
            debug_mode: false,
        }
    }
}

/// 获取默认数据目录
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".campuspin")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        // Windows 支持
        home_dir.join(".campuspin")
    } else {
        PathBuf::from("./campuspin_data")
    }
}

/// CampusPin SDK 配置构建器
#[derive(Debug, Default)]
pub struct CampusPinConfigBuilder {
    config: CampusPinConfig,
}

impl CampusPinConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn identity(mut self, identity: Identity) -> Self {
        self.config.identity = identity;
        self
    }

    pub fn api_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.api_base_url = Some(url.into());
        self
    }

    pub fn api_token<S: Into<String>>(mut self, token: S) -> Self {
        self.config.api_token = Some(token.into());
        self
    }

    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client_config = config;
        self
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.sync_config.poll_interval_secs = secs;
        self
    }

    pub fn pin_ttl_secs(mut self, secs: u64) -> Self {
        self.config.sync_config.pin_ttl_secs = secs;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.sync_config.retry = policy;
        self
    }

    pub fn proximity_threshold(mut self, meters: f64) -> Self {
        self.config.proximity_config.threshold_meters = meters;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_config.buffer_size = size;
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    pub fn build(self) -> CampusPinConfig {
        self.config
    }
}

impl CampusPinConfig {
    pub fn builder() -> CampusPinConfigBuilder {
        CampusPinConfigBuilder::new()
    }
}

/// 安装 fmt 日志订阅器；已安装时静默忽略
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(true)
        .try_init();
}

/// 统一 SDK 主接口
///
/// 采用分层架构：
/// - 业务编排层：SyncOrchestrator
/// - 调度层：SyncScheduler
/// - 存储管理层：StorageManager / PendingQueue
/// - 事件系统层：EventManager
pub struct CampusPinSDK {
    config: CampusPinConfig,
    network: Arc<NetworkMonitor>,
    event_manager: Arc<EventManager>,
    orchestrator: Arc<SyncOrchestrator>,
    proximity: Arc<ProximityNotifier>,
    scheduler: SyncScheduler,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for CampusPinSDK {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampusPinSDK")
            .field("identity", &self.config.identity.id)
            .field("data_dir", &self.config.data_dir)
            .field("running", &self.scheduler.is_running())
            .finish()
    }
}

impl CampusPinSDK {
    /// 使用配置中的 HTTP 后端初始化
    pub async fn initialize(config: CampusPinConfig) -> Result<Arc<Self>> {
        Self::initialize_with_remote(config, None).await
    }

    /// 异步初始化 SDK，可注入自定义 RemoteClient
    ///
    /// 分层初始化顺序：
    /// 1. 本地缓存 → 2. 事件 → 3. 网络 → 4. 存储/队列 → 5. 远端 → 6. 业务
    pub async fn initialize_with_remote(
        config: CampusPinConfig,
        remote: Option<Arc<dyn RemoteClient>>,
    ) -> Result<Arc<Self>> {
        if config.debug_mode {
            init_tracing();
        }
        info!(
            "正在初始化 CampusPinSDK ({})...",
            crate::version::version_summary()
        );

        Self::validate_config(&config)?;

        // === 第1层：本地缓存 ===
        let cache = LocalCache::open(&config.data_dir, &config.identity.id)?;
        info!("✅ 本地缓存已打开: namespace={}", cache.namespace());

        // === 第2层：事件管理器 ===
        let event_manager = Arc::new(EventManager::new(config.event_config.buffer_size));

        // === 第3层：网络监控 ===
        // 默认在线，实际状态由平台层通过 set_network_status 上报
        let network = Arc::new(NetworkMonitor::new());

        // === 第4层：存储与待发送队列 ===
        let pin_ttl = i64::try_from(config.sync_config.pin_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| CampusPinError::Config("pin_ttl_secs 超出范围".to_string()))?;
        let storage = StorageManager::new(cache.clone(), pin_ttl);
        let queue = Arc::new(PendingQueue::new(cache.clone()));
        info!("待发送队列加载完成: {} 条", queue.len()?);

        // === 第5层：远端客户端 ===
        let remote: Arc<dyn RemoteClient> = match (remote, &config.api_base_url) {
            (Some(remote), _) => {
                info!("使用注入的 RemoteClient");
                remote
            }
            (None, Some(base_url)) => Arc::new(HttpPinClient::new(
                &config.http_client_config,
                base_url,
                config.api_token.clone(),
            )?),
            (None, None) => {
                return Err(CampusPinError::Config(
                    "未配置 api_base_url，且没有注入 RemoteClient".to_string(),
                ))
            }
        };

        // === 第6层：同步编排器 ===
        let orchestrator = Arc::new(SyncOrchestrator::new(
            config.identity.clone(),
            storage,
            queue,
            remote,
            event_manager.clone(),
        )?);

        // === 第7层：接近提醒 ===
        let proximity = Arc::new(ProximityNotifier::new(
            cache,
            config.proximity_config.threshold_meters,
            event_manager.clone(),
        )?);

        // === 第8层：同步调度器 ===
        let scheduler = SyncScheduler::new(
            orchestrator.clone(),
            network.clone(),
            event_manager.clone(),
            Duration::from_secs(config.sync_config.poll_interval_secs),
            config.sync_config.retry.clone(),
        );

        info!("✅ CampusPinSDK 初始化完成");
        Ok(Arc::new(Self {
            config,
            network,
            event_manager,
            orchestrator,
            proximity,
            scheduler,
            shutting_down: AtomicBool::new(false),
        }))
    }

    /// 验证配置
    fn validate_config(config: &CampusPinConfig) -> Result<()> {
        if config.data_dir.as_os_str().is_empty() {
            return Err(CampusPinError::Config("数据目录不能为空".to_string()));
        }
        if config.identity.id.trim().is_empty() {
            return Err(CampusPinError::Config("identity.id 不能为空".to_string()));
        }
        if config.sync_config.poll_interval_secs == 0 {
            return Err(CampusPinError::Config("poll_interval_secs 不能为0".to_string()));
        }
        if config.sync_config.pin_ttl_secs == 0 {
            return Err(CampusPinError::Config("pin_ttl_secs 不能为0".to_string()));
        }
        if config.sync_config.pin_ttl_secs > MAX_PIN_TTL_SECS {
            return Err(CampusPinError::Config(format!(
                "pin_ttl_secs 不能超过 {}",
                MAX_PIN_TTL_SECS
            )));
        }
        let threshold = config.proximity_config.threshold_meters;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(CampusPinError::Config(format!(
                "threshold_meters 无效: {}",
                threshold
            )));
        }
        if config.event_config.buffer_size == 0 {
            return Err(CampusPinError::Config("buffer_size 不能为0".to_string()));
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(CampusPinError::ShuttingDown("SDK is shut down".to_string()));
        }
        Ok(())
    }

    /// 展示缓存并启动后台调度（首次 tick 立即刷新）
    pub async fn start(&self) -> Result<()> {
        self.ensure_active()?;
        self.orchestrator.load_shared().await;
        self.scheduler.start()
    }

    /// 停止调度器；之后的写操作返回 ShuttingDown
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("正在关闭 CampusPinSDK...");
        self.scheduler.stop().await;
        info!("CampusPinSDK 关闭完成");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn config(&self) -> &CampusPinConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    pub fn event_manager(&self) -> &Arc<EventManager> {
        &self.event_manager
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PinEvent> {
        self.event_manager.subscribe()
    }

    // ========== 网络 ==========

    /// 平台层上报网络状态；恢复在线会触发补发
    pub async fn set_network_status(&self, status: NetworkStatus) {
        if self.network.set_status(status).await {
            debug!("网络状态更新: {:?}", status);
        }
    }

    pub async fn network_status(&self) -> NetworkStatus {
        self.network.get_status().await
    }

    /// 立即补发并刷新（调度器未运行时不做任何事）
    pub fn trigger_sync(&self) {
        self.scheduler.trigger_now();
    }

    // ========== 共享 pin ==========

    pub async fn load_shared(&self) -> ReconcileOutcome {
        self.orchestrator.load_shared().await
    }

    pub fn collection_state(&self) -> CollectionState {
        self.orchestrator.collection_state()
    }

    pub async fn create_pin(&self, draft: PinDraft, visibility: Visibility) -> Result<Pin> {
        self.ensure_active()?;
        self.orchestrator.create_pin(draft, visibility).await
    }

    pub async fn save_pin(&self, pin: &Pin) -> Result<()> {
        self.ensure_active()?;
        self.orchestrator.save_pin(pin).await
    }

    pub async fn delete_shared(&self, id: &str) -> Result<()> {
        self.ensure_active()?;
        self.orchestrator.delete_shared(id).await
    }

    pub async fn move_position(&self, id: &str, position: LatLng) -> Result<()> {
        self.ensure_active()?;
        self.orchestrator.move_position(id, position).await
    }

    pub async fn sync_pending(&self) -> Result<DrainReport> {
        self.ensure_active()?;
        self.orchestrator.sync_pending().await
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.orchestrator.pending_count()
    }

    pub fn visible_shared_pins(&self) -> Vec<Pin> {
        self.orchestrator.visible_shared_pins()
    }

    pub fn my_private_pins(&self) -> Result<Vec<Pin>> {
        self.orchestrator.my_private_pins()
    }

    pub async fn delete_private(&self, id: &str) -> Result<()> {
        self.ensure_active()?;
        self.orchestrator.delete_private(id).await
    }

    pub fn report_pin(&self, id: &str, reason: &str) -> Result<bool> {
        self.ensure_active()?;
        self.orchestrator.report_pin(id, reason)
    }

    pub async fn load_pois(&self) -> Vec<PoiRecord> {
        self.orchestrator.load_pois().await
    }

    // ========== 接近提醒 ==========

    /// 用最新位置检查可见 pin（共享 + 私有）
    pub async fn update_position(&self, position: LatLng) -> Vec<ProximityAlert> {
        let mut pins = self.orchestrator.visible_shared_pins();
        match self.orchestrator.my_private_pins() {
            Ok(private) => pins.extend(private),
            Err(e) => warn!("读取私有 pin 失败，仅检查共享 pin: {}", e),
        }
        self.proximity.check_proximity(position, &pins).await
    }

    pub fn reset_proximity(&self) -> Result<()> {
        self.proximity.reset()
    }

    /// 消费位置流，直到流结束或 SDK 关闭
    pub fn watch_positions<S>(self: &Arc<Self>, mut positions: S) -> JoinHandle<()>
    where
        S: Stream<Item = LatLng> + Send + Unpin + 'static,
    {
        let sdk = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(position) = positions.next().await {
                if sdk.is_shutting_down() {
                    break;
                }
                sdk.update_position(position).await;
            }
            debug!("位置流结束");
        })
    }
}
