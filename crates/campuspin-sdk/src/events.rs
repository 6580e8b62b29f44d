//! 事件系统模块 - 同步核心对外发布的领域事件
//!
//! 渲染层只作为下游订阅者存在，同步核心从不直接调用渲染代码。
//!
//! 功能包括：
//! - 缓存展示 / 快照替换 / 降级事件
//! - pin 创建、同步、入队、删除、移动事件
//! - 新 pin 提示、接近提醒、网络状态事件
//! - 事件广播和订阅机制

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::storage::entities::{LatLng, Pin};
use crate::utils::time::now_millis;

/// 领域事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PinEvent {
    /// 本地快照已立即展示
    CacheShown { count: usize },
    /// 远端快照已整体替换展示集合
    SnapshotReplaced { count: usize, new_ids: Vec<String> },
    /// 刷新失败，继续展示缓存
    ReconcileDegraded { reason: String },
    /// 本地创建了 pin（私有或协作）
    PinCreated { pin: Pin },
    /// 协作 pin 被远端确认
    PinSynced { local_id: String, server_id: String },
    /// 协作 pin 发送失败，已入队
    PinQueued { local_id: String, pending: usize },
    /// 一轮 drain 完成
    PendingDrained { synced: usize, remaining: usize },
    PinDeleted { id: String },
    /// 删除失败，pin 仍然可见
    DeleteFailed { id: String, error: String },
    /// 位置变更；`authoritative` 为 false 表示下次刷新会被远端数据覆盖
    PinMoved {
        id: String,
        position: LatLng,
        authoritative: bool,
    },
    /// 轮询发现新的 pin
    NewPinsAvailable { count: usize, ids: Vec<String> },
    /// 接近提醒，每个 pin 只触发一次
    ProximityAlert {
        pin_id: String,
        title: String,
        category_id: String,
        distance_meters: f64,
        /// 紧急分类，渲染层据此决定提醒样式
        urgent: bool,
    },
    NetworkChanged { online: bool },
}

impl PinEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            PinEvent::CacheShown { .. } => "cache_shown",
            PinEvent::SnapshotReplaced { .. } => "snapshot_replaced",
            PinEvent::ReconcileDegraded { .. } => "reconcile_degraded",
            PinEvent::PinCreated { .. } => "pin_created",
            PinEvent::PinSynced { .. } => "pin_synced",
            PinEvent::PinQueued { .. } => "pin_queued",
            PinEvent::PendingDrained { .. } => "pending_drained",
            PinEvent::PinDeleted { .. } => "pin_deleted",
            PinEvent::DeleteFailed { .. } => "delete_failed",
            PinEvent::PinMoved { .. } => "pin_moved",
            PinEvent::NewPinsAvailable { .. } => "new_pins_available",
            PinEvent::ProximityAlert { .. } => "proximity_alert",
            PinEvent::NetworkChanged { .. } => "network_changed",
        }
    }

    /// 获取事件关联的 pin id
    pub fn pin_id(&self) -> Option<&str> {
        match self {
            PinEvent::PinCreated { pin } => Some(&pin.id),
            PinEvent::PinSynced { local_id, .. } | PinEvent::PinQueued { local_id, .. } => {
                Some(local_id)
            }
            PinEvent::PinDeleted { id }
            | PinEvent::DeleteFailed { id, .. }
            | PinEvent::PinMoved { id, .. } => Some(id),
            PinEvent::ProximityAlert { pin_id, .. } => Some(pin_id),
            _ => None,
        }
    }
}

/// 事件过滤器
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// 事件类型过滤器
    pub event_types: Option<Vec<String>>,
    /// pin id 过滤器
    pub pin_ids: Option<Vec<String>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    pub fn with_pin_ids(mut self, pin_ids: Vec<String>) -> Self {
        self.pin_ids = Some(pin_ids);
        self
    }

    /// 检查事件是否匹配过滤器
    pub fn matches(&self, event: &PinEvent) -> bool {
        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        if let Some(ref pin_ids) = self.pin_ids {
            match event.pin_id() {
                Some(id) if pin_ids.iter().any(|p| p == id) => {}
                // 事件没有 pin id 但过滤器要求有
                _ => return false,
            }
        }

        true
    }
}

/// 事件监听器类型
pub type EventListener = Box<dyn Fn(&PinEvent) + Send + Sync>;

/// 事件管理器
pub struct EventManager {
    /// 广播发送器
    sender: broadcast::Sender<PinEvent>,
    /// 事件监听器映射，`*` 表示全部事件
    listeners: Arc<tokio::sync::RwLock<HashMap<String, Vec<EventListener>>>>,
    /// 事件统计
    stats: Arc<tokio::sync::RwLock<EventStats>>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 监听器数量
    pub listener_count: usize,
    /// 最后事件时间（毫秒）
    pub last_event_time: Option<u64>,
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            listeners: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            stats: Arc::new(tokio::sync::RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub async fn emit(&self, event: PinEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write().await;
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(now_millis());
        }

        // 无订阅者时 send 会失败，属正常场景（无 UI 客户端）
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        let listeners = self.listeners.read().await;
        if let Some(event_listeners) = listeners.get(event.event_type()) {
            for listener in event_listeners {
                listener(&event);
            }
        }
        if let Some(general_listeners) = listeners.get("*") {
            for listener in general_listeners {
                listener(&event);
            }
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<PinEvent> {
        self.sender.subscribe()
    }

    /// 订阅特定类型的事件
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventReceiver {
        FilteredEventReceiver::new(self.sender.subscribe(), filter)
    }

    /// 添加事件监听器
    pub async fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&PinEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().await;
        listeners
            .entry(event_type.to_string())
            .or_default()
            .push(Box::new(listener));

        let mut stats = self.stats.write().await;
        stats.listener_count = listeners.values().map(|v| v.len()).sum();

        info!("Added listener for event type: {}", event_type);
    }

    /// 移除所有监听器
    pub async fn clear_listeners(&self) {
        let mut listeners = self.listeners.write().await;
        listeners.clear();

        let mut stats = self.stats.write().await;
        stats.listener_count = 0;

        info!("Cleared all event listeners");
    }

    pub async fn get_stats(&self) -> EventStats {
        self.stats.read().await.clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// 过滤事件接收器
pub struct FilteredEventReceiver {
    receiver: broadcast::Receiver<PinEvent>,
    filter: EventFilter,
}

impl FilteredEventReceiver {
    pub fn new(receiver: broadcast::Receiver<PinEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// 接收下一个匹配的事件
    pub async fn recv(&mut self) -> Result<PinEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// 尝试接收事件（非阻塞）
    pub fn try_recv(&mut self) -> Result<PinEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}
