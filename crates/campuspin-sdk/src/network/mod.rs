use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::utils::time::now_millis;

/// 网络状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// 在线
    Online,
    /// 离线
    Offline,
    /// 网络受限
    Limited,
}

impl NetworkStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, NetworkStatus::Online | NetworkStatus::Limited)
    }
}

/// 网络状态变化事件
#[derive(Debug, Clone)]
pub struct NetworkStatusEvent {
    pub old_status: NetworkStatus,
    pub new_status: NetworkStatus,
    pub timestamp: u64,
}

impl NetworkStatusEvent {
    /// 从断开恢复为连接
    pub fn is_reconnect(&self) -> bool {
        !self.old_status.is_connected() && self.new_status.is_connected()
    }
}

/// 网络监控管理器
///
/// 平台层（浏览器 online/offline、系统网络回调）调用 `set_status` 上报状态。
#[derive(Debug)]
pub struct NetworkMonitor {
    status_sender: broadcast::Sender<NetworkStatusEvent>,
    current_status: Arc<tokio::sync::RwLock<NetworkStatus>>,
}

impl NetworkMonitor {
    /// 初始状态假定在线；第一次请求失败会自然降级
    pub fn new() -> Self {
        Self::with_status(NetworkStatus::Online)
    }

    pub fn with_status(initial: NetworkStatus) -> Self {
        let (status_sender, _) = broadcast::channel(100);

        Self {
            status_sender,
            current_status: Arc::new(tokio::sync::RwLock::new(initial)),
        }
    }

    /// 获取当前网络状态
    pub async fn get_status(&self) -> NetworkStatus {
        *self.current_status.read().await
    }

    /// 设置网络状态；状态未变化时不广播，返回是否变化
    pub async fn set_status(&self, new_status: NetworkStatus) -> bool {
        let old_status = {
            let mut status = self.current_status.write().await;
            let old = *status;
            *status = new_status;
            old
        };
        if old_status == new_status {
            return false;
        }

        info!("网络状态变化: {:?} -> {:?}", old_status, new_status);
        let event = NetworkStatusEvent {
            old_status,
            new_status,
            timestamp: now_millis(),
        };
        let _ = self.status_sender.send(event);
        true
    }

    /// 订阅网络状态变化
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkStatusEvent> {
        self.status_sender.subscribe()
    }

    /// 检查网络连接（通过网络状态判断）
    pub async fn check_connection(&self) -> bool {
        self.get_status().await.is_connected()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}
