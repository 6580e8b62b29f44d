//! CampusPin SDK - 离线优先的校园 pin 同步引擎
//!
//! 本 SDK 提供：
//! - 📦 本地缓存：sled 持久化，按身份隔离命名空间
//! - 📤 待发送队列：离线创建的共享 pin 按顺序补发，最多投递一次
//! - 🔄 同步编排：缓存优先展示，远端快照整体替换，单飞刷新
//! - 📍 接近提醒：每个 pin 只提醒一次，跨重启保留
//! - ⚙️ 事件系统：渲染层通过订阅领域事件获取变化
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use campuspin_sdk::{CampusPinConfig, CampusPinSDK, Identity, LatLng, PinDraft, Visibility};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CampusPinConfig::builder()
//!         .data_dir("/path/to/data")
//!         .identity(Identity::new("student42", "Lea"))
//!         .api_base_url("https://example.org/mytp/")
//!         .api_token("token")
//!         .build();
//!
//!     let sdk = CampusPinSDK::initialize(config).await?;
//!     let mut events = sdk.subscribe();
//!     sdk.start().await?;
//!
//!     let pin = sdk
//!         .create_pin(
//!             PinDraft::new("Free coffee", LatLng::new(43.2275, 0.0509), "deal"),
//!             Visibility::Shared,
//!         )
//!         .await?;
//!     println!("created {} (pending: {})", pin.id, pin.is_pending());
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!
//!     sdk.shutdown().await;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod category;
pub mod error;
pub mod events;
pub mod http_client;
pub mod network;
pub mod proximity;
pub mod remote_client;
pub mod sdk;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod version;

// 重新导出核心类型，方便使用
pub use category::{category_ids, Category};
pub use error::{CampusPinError, FailureClass, Result};
pub use events::{EventFilter, EventManager, FilteredEventReceiver, PinEvent};
pub use http_client::HttpPinClient;
pub use network::{NetworkMonitor, NetworkStatus, NetworkStatusEvent};
pub use proximity::{ProximityAlert, ProximityNotifier};
pub use remote_client::{normalize_record, CreateAck, RemoteClient};
pub use sdk::{
    init_tracing, CampusPinConfig, CampusPinConfigBuilder, CampusPinSDK, EventConfig,
    HttpClientConfig, ProximityConfig, SyncConfig, MAX_PIN_TTL_SECS,
};
pub use storage::entities::{
    Author, Identity, LatLng, NormalizedPinRecord, PendingWrite, Pin, PinDraft, PinKind,
    PoiRecord, ReportRecord, Role, SyncState, Visibility,
};
pub use storage::kv::LocalCache;
pub use storage::queue::{DrainReport, PendingQueue, RetryPolicy};
pub use sync::{
    CollectionState, ReconcileOutcome, ReconcileSource, SyncOrchestrator, SyncScheduler,
};
pub use utils::{Cardinal, RelativeAge};
pub use version::{SDK_VERSION, version_summary};
