//! 同步编排器
//!
//! 驱动读路径（缓存优先展示，后台刷新）、写路径（乐观发送，失败入队）
//! 以及周期/触发式刷新。只有编排器写入本地缓存中的共享数据。
//!
//! 展示集合 = 快照投影（只读 Shared pin）+ 本地协作叠加层。
//! 刷新成功时快照整体替换；叠加层中等待同步的 pin 保留，已同步的丢弃
//! （远端快照里已有对应记录）。

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{CampusPinError, Result};
use crate::events::{EventManager, PinEvent};
use crate::remote_client::RemoteClient;
use crate::storage::entities::{
    Identity, LatLng, Pin, PinDraft, PinKind, PoiRecord, Visibility,
};
use crate::storage::queue::{DrainReport, PendingQueue};
use crate::storage::reports::ReportRegistry;
use crate::storage::StorageManager;
use crate::sync::{CollectionState, ReconcileOutcome, ReconcileSource};

/// 合并策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    /// 触发到达后有任一周期完成即可复用
    Coalesce,
    /// 只复用在触发到达之后才开始的周期
    StartedAfterTrigger,
}

#[derive(Debug)]
struct RenderedState {
    state: CollectionState,
    /// 快照投影
    snapshot: Vec<Pin>,
    /// 本地协作 pin
    local: Vec<Pin>,
}

impl RenderedState {
    fn pins(&self) -> Vec<Pin> {
        self.snapshot.iter().chain(self.local.iter()).cloned().collect()
    }

    fn count(&self) -> usize {
        self.snapshot.len() + self.local.len()
    }

    /// 当前展示的远端 id（快照 id 与已同步叠加 pin 的 server_id）
    fn remote_ids(&self) -> HashSet<String> {
        self.snapshot
            .iter()
            .chain(self.local.iter())
            .filter_map(|p| p.server_id().map(str::to_string))
            .collect()
    }
}

/// 最近一次完成的周期：(开始序号, 结果)
type LastCycle = Option<(u64, ReconcileOutcome)>;

pub struct SyncOrchestrator {
    identity: Identity,
    storage: StorageManager,
    queue: Arc<PendingQueue>,
    reports: ReportRegistry,
    remote: Arc<dyn RemoteClient>,
    events: Arc<EventManager>,
    rendered: RwLock<RenderedState>,
    /// 单飞闸门
    reconcile_gate: tokio::sync::Mutex<LastCycle>,
    started_cycles: AtomicU64,
    completed_cycles: AtomicU64,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("identity", &self.identity.id)
            .field("state", &self.rendered.read().state)
            .finish()
    }
}

impl SyncOrchestrator {
    /// 创建编排器，并用待发送队列重建本地叠加层
    pub fn new(
        identity: Identity,
        storage: StorageManager,
        queue: Arc<PendingQueue>,
        remote: Arc<dyn RemoteClient>,
        events: Arc<EventManager>,
    ) -> Result<Self> {
        let ttl = storage.pin_ttl();
        let local: Vec<Pin> = queue
            .list()?
            .iter()
            .map(|write| Pin::from_pending_write(write, ttl))
            .collect();
        if !local.is_empty() {
            info!("从待发送队列恢复 {} 个协作 pin", local.len());
        }

        let reports = ReportRegistry::new(storage.cache().clone());
        Ok(Self {
            identity,
            storage,
            queue,
            reports,
            remote,
            events,
            rendered: RwLock::new(RenderedState {
                state: CollectionState::Empty,
                snapshot: Vec::new(),
                local,
            }),
            reconcile_gate: tokio::sync::Mutex::new(None),
            started_cycles: AtomicU64::new(0),
            completed_cycles: AtomicU64::new(0),
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn queue(&self) -> &Arc<PendingQueue> {
        &self.queue
    }

    pub fn collection_state(&self) -> CollectionState {
        self.rendered.read().state
    }

    /// 当前展示集合（快照投影 + 本地协作 pin），不做过滤
    pub fn rendered_pins(&self) -> Vec<Pin> {
        self.rendered.read().pins()
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.queue.len()
    }

    // ========== 读路径 ==========

    /// 缓存优先加载共享 pin，然后尝试远端刷新
    ///
    /// 读路径错误不会返回给调用方：远端失败时继续展示缓存。
    pub async fn load_shared(&self) -> ReconcileOutcome {
        self.reconcile(Freshness::Coalesce).await
    }

    /// 轮询刷新；发现新 id 时发布 `NewPinsAvailable`
    pub async fn poll_refresh(&self) -> ReconcileOutcome {
        let outcome = self.reconcile(Freshness::Coalesce).await;
        if !outcome.coalesced && outcome.is_remote() && !outcome.new_ids.is_empty() {
            info!("🆕 发现 {} 个新的共享 pin", outcome.new_ids.len());
            self.events
                .emit(PinEvent::NewPinsAvailable {
                    count: outcome.new_ids.len(),
                    ids: outcome.new_ids.clone(),
                })
                .await;
        }
        outcome
    }

    async fn reconcile(&self, freshness: Freshness) -> ReconcileOutcome {
        let arrived_started = self.started_cycles.load(Ordering::Acquire);
        let arrived_completed = self.completed_cycles.load(Ordering::Acquire);

        let mut gate = self.reconcile_gate.lock().await;
        if let Some((seq, outcome)) = gate.as_ref() {
            let reusable = match freshness {
                Freshness::Coalesce => {
                    self.completed_cycles.load(Ordering::Acquire) > arrived_completed
                }
                Freshness::StartedAfterTrigger => *seq > arrived_started,
            };
            if reusable {
                debug!("刷新触发已合并到周期 #{}", seq);
                return outcome.clone().into_coalesced();
            }
        }

        let seq = self.started_cycles.fetch_add(1, Ordering::AcqRel) + 1;
        let outcome = self.reconcile_once(seq).await;
        *gate = Some((seq, outcome.clone()));
        self.completed_cycles.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    async fn reconcile_once(&self, seq: u64) -> ReconcileOutcome {
        let ttl = self.storage.pin_ttl();

        // 1. 缓存优先
        let cache_shown = {
            let is_empty = self.rendered.read().state == CollectionState::Empty;
            if is_empty {
                match self.storage.load_snapshot() {
                    Ok(Some(records)) => {
                        let mut rendered = self.rendered.write();
                        rendered.snapshot =
                            records.iter().map(|r| Pin::from_record(r, ttl)).collect();
                        rendered.state = CollectionState::CacheShown;
                        Some(rendered.count())
                    }
                    Ok(None) => None,
                    Err(e) => {
                        error!("读取共享 pin 快照失败，忽略缓存: {}", e);
                        None
                    }
                }
            } else {
                None
            }
        };
        if let Some(count) = cache_shown {
            info!("📦 已展示本地快照: {} 个 pin", count);
            self.events.emit(PinEvent::CacheShown { count }).await;
        }

        let previous_state = {
            let mut rendered = self.rendered.write();
            let previous = rendered.state;
            rendered.state = CollectionState::Reconciling;
            previous
        };
        debug!("刷新周期 #{} 开始: previous_state={:?}", seq, previous_state);

        // 2. 远端刷新
        match self.remote.list().await {
            Ok(records) => {
                // 持久化失败仍然展示新数据
                if let Err(e) = self.storage.save_snapshot(&records) {
                    error!("共享 pin 快照持久化失败，仅更新内存展示: {}", e);
                }

                let (count, new_ids) = {
                    let mut rendered = self.rendered.write();
                    let had_baseline = previous_state != CollectionState::Empty;
                    let previous_ids = rendered.remote_ids();

                    rendered.snapshot = records.iter().map(|r| Pin::from_record(r, ttl)).collect();
                    rendered.local.retain(|p| p.is_pending());
                    rendered.state = CollectionState::Reconciled;

                    let new_ids: Vec<String> = if had_baseline {
                        records
                            .iter()
                            .filter(|r| !previous_ids.contains(&r.id))
                            .map(|r| r.id.clone())
                            .collect()
                    } else {
                        Vec::new()
                    };
                    (rendered.count(), new_ids)
                };

                info!("✅ 共享 pin 快照已替换: count={}, new={}", count, new_ids.len());
                self.events
                    .emit(PinEvent::SnapshotReplaced {
                        count,
                        new_ids: new_ids.clone(),
                    })
                    .await;

                ReconcileOutcome {
                    source: ReconcileSource::Remote,
                    state: CollectionState::Reconciled,
                    count,
                    new_ids,
                    coalesced: false,
                }
            }
            Err(e) => {
                let (state, count) = {
                    let mut rendered = self.rendered.write();
                    rendered.state = match previous_state {
                        CollectionState::Empty if rendered.snapshot.is_empty() => {
                            CollectionState::Empty
                        }
                        _ => CollectionState::CacheShown,
                    };
                    (rendered.state, rendered.count())
                };

                warn!("⚠️ 远端刷新失败，继续展示缓存: {}", e);
                self.events
                    .emit(PinEvent::ReconcileDegraded {
                        reason: e.to_string(),
                    })
                    .await;

                ReconcileOutcome {
                    source: ReconcileSource::Cache,
                    state,
                    count,
                    new_ids: Vec::new(),
                    coalesced: false,
                }
            }
        }
    }

    // ========== 写路径 ==========

    /// 按可见性创建 pin
    pub async fn create_pin(&self, draft: PinDraft, visibility: Visibility) -> Result<Pin> {
        match visibility {
            Visibility::LocalOnly => self.create_private(draft).await,
            Visibility::Shared => self.create_shared(draft).await,
        }
    }

    /// 创建协作 pin：乐观发送，失败入队
    pub async fn create_shared(&self, draft: PinDraft) -> Result<Pin> {
        let mut pin =
            Pin::new_collaborative(draft, self.identity.as_author(), self.storage.pin_ttl())?;
        let write = pin.to_pending_write().ok_or_else(|| {
            CampusPinError::InvalidOperation(format!("pin {} 不是协作 pin", pin.id))
        })?;

        self.rendered.write().local.push(pin.clone());
        self.events.emit(PinEvent::PinCreated { pin: pin.clone() }).await;

        let failure = match self.remote.create(&write).await {
            Ok(ack) if ack.is_acknowledged() => {
                pin.mark_synced(ack.id.clone())?;
                self.replace_local(&pin);
                info!("✅ 协作 pin 已同步: local_id={}, server_id={}", pin.id, ack.id);
                self.events
                    .emit(PinEvent::PinSynced {
                        local_id: pin.id.clone(),
                        server_id: ack.id,
                    })
                    .await;
                return Ok(pin);
            }
            Ok(_) => "远端未确认创建".to_string(),
            Err(e) => e.to_string(),
        };

        warn!("协作 pin 发送失败，加入待发送队列: id={}, reason={}", pin.id, failure);
        if let Err(e) = self.queue.enqueue(write) {
            // 既未送达也未入队：撤回本地展示
            error!("协作 pin 入队失败: id={}, error={}", pin.id, e);
            self.rendered.write().local.retain(|p| p.id != pin.id);
            return Err(e);
        }
        let pending = self.queue.len()?;
        self.events
            .emit(PinEvent::PinQueued {
                local_id: pin.id.clone(),
                pending,
            })
            .await;
        Ok(pin)
    }

    /// 创建私有 pin：直接写入本地，从不接触远端
    pub async fn create_private(&self, draft: PinDraft) -> Result<Pin> {
        let pin = Pin::new_private(draft, self.identity.as_author(), self.storage.pin_ttl())?;
        self.storage.save_private_pin(&pin)?;
        self.events.emit(PinEvent::PinCreated { pin: pin.clone() }).await;
        Ok(pin)
    }

    /// 按变体保存已有 pin
    ///
    /// 私有 pin 写入本地；等待同步的协作 pin 入队；已同步和只读 pin 不写回。
    pub async fn save_pin(&self, pin: &Pin) -> Result<()> {
        match &pin.kind {
            PinKind::Private => self.storage.save_private_pin(pin),
            PinKind::Collaborative { .. } if pin.is_pending() => {
                let write = pin.to_pending_write().ok_or_else(|| {
                    CampusPinError::InvalidOperation(format!("pin {} 无法生成待发送记录", pin.id))
                })?;
                if self.queue.enqueue(write)? {
                    let mut rendered = self.rendered.write();
                    if !rendered.local.iter().any(|p| p.id == pin.id) {
                        rendered.local.push(pin.clone());
                    }
                }
                Ok(())
            }
            PinKind::Collaborative { .. } => {
                debug!("协作 pin 已同步，无需保存: id={}", pin.id);
                Ok(())
            }
            PinKind::Shared { .. } => {
                debug!("只读 pin 不写回: id={}", pin.id);
                Ok(())
            }
        }
    }

    /// 删除共享 pin；只有远端确认后才从展示集合和快照中移除
    ///
    /// 仍在待发送队列中的 pin 直接在本地取消，不调用远端。
    pub async fn delete_shared(&self, id: &str) -> Result<()> {
        let pending_locally = self
            .rendered
            .read()
            .local
            .iter()
            .any(|p| p.id == id && p.is_pending());
        if pending_locally || self.queue.contains(id)? {
            self.queue.remove(id)?;
            self.rendered.write().local.retain(|p| p.id != id);
            info!("🗑️ 取消未同步的协作 pin: id={}", id);
            self.events.emit(PinEvent::PinDeleted { id: id.to_string() }).await;
            return Ok(());
        }

        let server_id = self.resolve_server_id(id);
        match self.remote.delete(&server_id).await {
            Ok(()) => {
                if let Err(e) = self.storage.remove_from_snapshot(&server_id) {
                    error!("从快照移除已删除 pin 失败: id={}, error={}", server_id, e);
                }
                {
                    let mut rendered = self.rendered.write();
                    rendered.snapshot.retain(|p| p.id != server_id);
                    rendered
                        .local
                        .retain(|p| p.id != id && p.server_id() != Some(server_id.as_str()));
                }
                info!("🗑️ 共享 pin 已删除: id={}", server_id);
                self.events.emit(PinEvent::PinDeleted { id: id.to_string() }).await;
                Ok(())
            }
            Err(e) => {
                warn!("删除共享 pin 失败，保持可见: id={}, error={}", id, e);
                self.events
                    .emit(PinEvent::DeleteFailed {
                        id: id.to_string(),
                        error: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    /// 删除私有 pin；只操作本地存储
    pub async fn delete_private(&self, id: &str) -> Result<()> {
        if self.storage.get_private_pin(id)?.is_none() {
            return Err(CampusPinError::NotFound(format!("私有 pin 不存在: {}", id)));
        }
        self.storage.remove_private_pin(id)?;
        info!("🗑️ 私有 pin 已删除: id={}", id);
        self.events.emit(PinEvent::PinDeleted { id: id.to_string() }).await;
        Ok(())
    }

    /// 移动 pin
    ///
    /// 远端没有更新接口：
    /// - 等待同步的协作 pin：同时改写队列记录，最终的创建携带新位置
    /// - 私有 pin：本地持久化
    /// - 共享 pin：只改写本地快照，下次刷新会被远端数据覆盖
    pub async fn move_position(&self, id: &str, position: LatLng) -> Result<()> {
        if !position.is_valid() {
            return Err(CampusPinError::InvalidArgument(format!(
                "pin 坐标无效: ({}, {})",
                position.lat, position.lng
            )));
        }

        let pending_locally = self
            .rendered
            .read()
            .local
            .iter()
            .any(|p| p.id == id && p.is_pending());
        if pending_locally {
            self.queue.update_position(id, position)?;
            self.set_local_position(id, position);
            return self.emit_moved(id, position, true).await;
        }

        if let Some(mut private) = self.storage.get_private_pin(id)? {
            private.position = position;
            self.storage.save_private_pin(&private)?;
            return self.emit_moved(id, position, true).await;
        }

        let server_id = self.resolve_server_id(id);
        let in_snapshot = self.storage.update_snapshot_position(&server_id, position)?;
        let rendered_hit = {
            let mut guard = self.rendered.write();
            let rendered = &mut *guard;
            let mut hit = false;
            for pin in rendered
                .snapshot
                .iter_mut()
                .chain(rendered.local.iter_mut())
                .filter(|p| p.id == id || p.server_id() == Some(server_id.as_str()))
            {
                pin.position = position;
                hit = true;
            }
            hit
        };
        if !in_snapshot && !rendered_hit {
            return Err(CampusPinError::NotFound(format!("pin {}", id)));
        }
        debug!("共享 pin 位置仅在本地修改: id={}", id);
        self.emit_moved(id, position, false).await
    }

    /// 补发待发送队列；有成功条目时触发一次完整刷新
    pub async fn sync_pending(&self) -> Result<DrainReport> {
        let report = self.queue.drain(self.remote.as_ref()).await?;

        if !report.synced.is_empty() {
            {
                let mut rendered = self.rendered.write();
                for synced in &report.synced {
                    if let Some(pin) = rendered.local.iter_mut().find(|p| p.id == synced.local_id) {
                        if let Err(e) = pin.mark_synced(synced.server_id.clone()) {
                            warn!("更新叠加层同步状态失败: {}", e);
                        }
                    }
                }
            }
            for synced in &report.synced {
                self.events
                    .emit(PinEvent::PinSynced {
                        local_id: synced.local_id.clone(),
                        server_id: synced.server_id.clone(),
                    })
                    .await;
            }
        }

        self.events
            .emit(PinEvent::PendingDrained {
                synced: report.synced_count(),
                remaining: report.remaining,
            })
            .await;

        if !report.synced.is_empty() {
            self.reconcile(Freshness::StartedAfterTrigger).await;
        }
        Ok(report)
    }

    // ========== 举报 / 私有 pin / 兴趣点 ==========

    pub fn report_pin(&self, id: &str, reason: &str) -> Result<bool> {
        self.reports.report(id, reason)
    }

    pub fn is_pin_reported(&self, id: &str) -> Result<bool> {
        self.reports.is_reported(id)
    }

    /// 供展示与接近提醒使用的共享 pin：过滤已举报和已过期的
    pub fn visible_shared_pins(&self) -> Vec<Pin> {
        let reported = match self.reports.all() {
            Ok(reports) => reports,
            Err(e) => {
                warn!("读取举报登记失败，不做过滤: {}", e);
                Default::default()
            }
        };
        self.rendered
            .read()
            .pins()
            .into_iter()
            .filter(|p| !p.is_expired())
            .filter(|p| {
                !reported.contains_key(&p.id)
                    && !p.server_id().map_or(false, |sid| reported.contains_key(sid))
            })
            .collect()
    }

    /// 本人的私有 pin，最新的在前
    pub fn my_private_pins(&self) -> Result<Vec<Pin>> {
        self.storage.private_pins()
    }

    /// 兴趣点：缓存优先，远端成功时覆盖缓存
    pub async fn load_pois(&self) -> Vec<PoiRecord> {
        let cached = match self.storage.load_pois() {
            Ok(cached) => cached,
            Err(e) => {
                error!("读取兴趣点缓存失败: {}", e);
                None
            }
        };

        match self.remote.list_pois().await {
            Ok(pois) if !pois.is_empty() => {
                if let Err(e) = self.storage.save_pois(&pois) {
                    error!("兴趣点缓存写入失败: {}", e);
                }
                pois
            }
            Ok(_) => cached.unwrap_or_default(),
            Err(e) => {
                warn!("兴趣点刷新失败，使用缓存: {}", e);
                cached.unwrap_or_default()
            }
        }
    }

    // ========== 内部 ==========

    fn resolve_server_id(&self, id: &str) -> String {
        self.rendered
            .read()
            .local
            .iter()
            .find(|p| p.id == id)
            .and_then(|p| p.server_id().map(str::to_string))
            .unwrap_or_else(|| id.to_string())
    }

    fn replace_local(&self, pin: &Pin) {
        let mut rendered = self.rendered.write();
        if let Some(slot) = rendered.local.iter_mut().find(|p| p.id == pin.id) {
            *slot = pin.clone();
        }
    }

    fn set_local_position(&self, id: &str, position: LatLng) {
        let mut rendered = self.rendered.write();
        if let Some(pin) = rendered.local.iter_mut().find(|p| p.id == id) {
            pin.position = position;
        }
    }

    async fn emit_moved(&self, id: &str, position: LatLng, authoritative: bool) -> Result<()> {
        self.events
            .emit(PinEvent::PinMoved {
                id: id.to_string(),
                position,
                authoritative,
            })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::category_ids;
    use crate::remote_client::test_helpers::{record, MockRemoteClient};
    use crate::storage::kv::LocalCache;
    use crate::storage::queue::FailureReason;
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    struct Fixture {
        orchestrator: Arc<SyncOrchestrator>,
        remote: Arc<MockRemoteClient>,
        events: Arc<EventManager>,
        cache: LocalCache,
    }

    fn fixture_with(cache: LocalCache, remote: MockRemoteClient) -> Fixture {
        let remote = Arc::new(remote);
        let events = Arc::new(EventManager::new(256));
        let storage = StorageManager::new(cache.clone(), Duration::hours(24));
        let queue = Arc::new(PendingQueue::new(cache.clone()));
        let orchestrator = SyncOrchestrator::new(
            Identity::new("u1", "Student"),
            storage,
            queue,
            remote.clone(),
            events.clone(),
        )
        .unwrap();
        Fixture {
            orchestrator: Arc::new(orchestrator),
            remote,
            events,
            cache,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(LocalCache::temporary("u1").unwrap(), MockRemoteClient::new())
    }

    fn draft(title: &str) -> PinDraft {
        PinDraft::new(title, LatLng::new(43.2265, 0.0490), category_ids::INFO)
    }

    fn ids(pins: &[Pin]) -> Vec<String> {
        let mut ids: Vec<String> = pins.iter().map(|p| p.id.clone()).collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_snapshot_replaced_not_merged() {
        let fx = fixture();
        fx.remote
            .set_records(vec![record("a", 1.0, 1.0), record("b", 2.0, 2.0), record("c", 3.0, 3.0)]);
        fx.orchestrator.load_shared().await;
        assert_eq!(fx.orchestrator.rendered_pins().len(), 3);

        fx.remote.set_records(vec![record("x", 4.0, 4.0), record("y", 5.0, 5.0)]);
        let outcome = fx.orchestrator.load_shared().await;

        assert_eq!(outcome.source, ReconcileSource::Remote);
        assert_eq!(outcome.count, 2);
        assert_eq!(ids(&fx.orchestrator.rendered_pins()), vec!["x", "y"]);
        let cached = StorageManager::new(fx.cache.clone(), Duration::hours(24))
            .load_snapshot()
            .unwrap()
            .unwrap();
        assert_eq!(cached.len(), 2);
    }

    #[tokio::test]
    async fn test_cache_shown_first_and_offline_degrades_silently() {
        let cache = LocalCache::temporary("u1").unwrap();
        StorageManager::new(cache.clone(), Duration::hours(24))
            .save_snapshot(&[record("cached", 1.0, 1.0)])
            .unwrap();
        let remote = MockRemoteClient::new();
        remote.set_offline(true);
        let fx = fixture_with(cache, remote);
        let mut events = fx.events.subscribe();

        let outcome = fx.orchestrator.load_shared().await;
        assert_eq!(outcome.source, ReconcileSource::Cache);
        assert_eq!(outcome.state, CollectionState::CacheShown);
        assert_eq!(fx.orchestrator.collection_state(), CollectionState::CacheShown);
        assert_eq!(ids(&fx.orchestrator.rendered_pins()), vec!["cached"]);

        assert_eq!(events.recv().await.unwrap(), PinEvent::CacheShown { count: 1 });
        assert_eq!(events.recv().await.unwrap().event_type(), "reconcile_degraded");
    }

    /// 列表接口原样返回给定响应体
    struct RawListClient {
        body: serde_json::Value,
    }

    #[async_trait::async_trait]
    impl RemoteClient for RawListClient {
        async fn list(&self) -> Result<Vec<crate::storage::entities::NormalizedPinRecord>> {
            crate::remote_client::normalize_list(self.body.clone())
        }

        async fn create(
            &self,
            _write: &crate::storage::entities::PendingWrite,
        ) -> Result<crate::remote_client::CreateAck> {
            Err(CampusPinError::Transport("unreachable".to_string()))
        }

        async fn delete(&self, _id: &str) -> Result<()> {
            Err(CampusPinError::Transport("unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_non_list_body_keeps_cached_snapshot() {
        let cache = LocalCache::temporary("u1").unwrap();
        let storage = StorageManager::new(cache.clone(), Duration::hours(24));
        storage
            .save_snapshot(&[record("a", 1.0, 1.0), record("b", 2.0, 2.0)])
            .unwrap();
        let remote: Arc<dyn RemoteClient> = Arc::new(RawListClient {
            body: serde_json::json!({ "error": "database unavailable" }),
        });
        let orchestrator = SyncOrchestrator::new(
            Identity::new("u1", "Student"),
            storage.clone(),
            Arc::new(PendingQueue::new(cache.clone())),
            remote,
            Arc::new(EventManager::new(16)),
        )
        .unwrap();

        let outcome = orchestrator.load_shared().await;
        assert_eq!(outcome.source, ReconcileSource::Cache);
        assert_eq!(outcome.state, CollectionState::CacheShown);
        assert_eq!(ids(&orchestrator.rendered_pins()), vec!["a", "b"]);
        assert_eq!(storage.load_snapshot().unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_state_without_cache_or_network() {
        let remote = MockRemoteClient::new();
        remote.set_offline(true);
        let fx = fixture_with(LocalCache::temporary("u1").unwrap(), remote);

        let outcome = fx.orchestrator.load_shared().await;
        assert_eq!(outcome.state, CollectionState::Empty);
        assert!(fx.orchestrator.rendered_pins().is_empty());
    }

    #[tokio::test]
    async fn test_create_shared_online_is_synced() {
        let fx = fixture();
        let pin = fx.orchestrator.create_shared(draft("coffee")).await.unwrap();

        assert!(pin.is_synced());
        assert_eq!(pin.server_id(), Some("srv_1"));
        assert_eq!(fx.orchestrator.pending_count().unwrap(), 0);
        assert_eq!(fx.remote.create_count_for(&pin.id), 1);
    }

    #[tokio::test]
    async fn test_create_shared_offline_is_queued_and_visible() {
        let fx = fixture();
        fx.remote.set_offline(true);

        let pin = fx.orchestrator.create_shared(draft("coffee")).await.unwrap();
        assert!(pin.is_pending());
        assert!(pin.server_id().is_none());
        assert_eq!(fx.orchestrator.pending_count().unwrap(), 1);
        assert!(fx.orchestrator.rendered_pins().iter().any(|p| p.id == pin.id));

        // 刷新失败不会丢掉本地等待同步的 pin
        fx.orchestrator.load_shared().await;
        assert!(fx.orchestrator.rendered_pins().iter().any(|p| p.id == pin.id));
    }

    #[tokio::test]
    async fn test_sync_pending_folds_into_snapshot_and_posts_once() {
        let fx = fixture();
        fx.remote.set_offline(true);
        let pin = fx.orchestrator.create_shared(draft("coffee")).await.unwrap();
        fx.remote.clear_failures();

        let report = fx.orchestrator.sync_pending().await.unwrap();
        assert_eq!(report.synced_count(), 1);
        assert_eq!(report.remaining, 0);

        // 叠加层中的本地副本被远端快照中的记录取代
        let rendered = fx.orchestrator.rendered_pins();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].id, report.synced[0].server_id);

        for _ in 0..3 {
            fx.orchestrator.sync_pending().await.unwrap();
        }
        // 离线失败的那一次 + 成功的一次
        assert_eq!(fx.remote.create_count_for(&pin.id), 2);
        assert_eq!(fx.orchestrator.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sync_pending_ordered_halt() {
        let fx = fixture();
        fx.remote.set_offline(true);
        let a = fx.orchestrator.create_shared(draft("A")).await.unwrap();
        let b = fx.orchestrator.create_shared(draft("B")).await.unwrap();
        let c = fx.orchestrator.create_shared(draft("C")).await.unwrap();
        fx.remote.clear_failures();
        fx.remote.fail_create_for(&b.id);

        let report = fx.orchestrator.sync_pending().await.unwrap();
        assert_eq!(report.synced_count(), 1);
        assert_eq!(report.failure, Some(FailureReason::Rejected(Some(500))));

        let queued: Vec<String> = fx
            .orchestrator
            .queue()
            .list()
            .unwrap()
            .into_iter()
            .map(|w| w.id)
            .collect();
        assert_eq!(queued, vec![b.id.clone(), c.id.clone()]);
        assert!(!fx.orchestrator.rendered_pins().iter().any(|p| p.id == a.id));
    }

    #[tokio::test]
    async fn test_delete_requires_ack() {
        let fx = fixture();
        fx.remote.set_records(vec![record("a", 1.0, 1.0)]);
        fx.orchestrator.load_shared().await;
        fx.remote.fail_delete_for("a");

        let err = fx.orchestrator.delete_shared("a").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(ids(&fx.orchestrator.rendered_pins()), vec!["a"]);
        let storage = StorageManager::new(fx.cache.clone(), Duration::hours(24));
        assert_eq!(storage.load_snapshot().unwrap().unwrap().len(), 1);

        fx.remote.clear_failures();
        fx.orchestrator.delete_shared("a").await.unwrap();
        assert!(fx.orchestrator.rendered_pins().is_empty());
        assert!(storage.load_snapshot().unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_pending_pin_cancels_locally() {
        let fx = fixture();
        fx.remote.set_offline(true);
        let pin = fx.orchestrator.create_shared(draft("oops")).await.unwrap();

        fx.orchestrator.delete_shared(&pin.id).await.unwrap();
        assert!(fx.remote.delete_calls().is_empty());
        assert_eq!(fx.orchestrator.pending_count().unwrap(), 0);
        assert!(fx.orchestrator.rendered_pins().is_empty());
    }

    #[tokio::test]
    async fn test_move_shared_pin_is_cosmetic() {
        let fx = fixture();
        fx.remote.set_records(vec![record("a", 1.0, 1.0)]);
        fx.orchestrator.load_shared().await;
        let mut events = fx.events.subscribe();

        let moved = LatLng::new(1.5, 1.5);
        fx.orchestrator.move_position("a", moved).await.unwrap();
        assert_eq!(fx.orchestrator.rendered_pins()[0].position, moved);
        assert_eq!(
            events.recv().await.unwrap(),
            PinEvent::PinMoved {
                id: "a".to_string(),
                position: moved,
                authoritative: false
            }
        );

        // 下一次刷新用远端数据覆盖
        fx.orchestrator.load_shared().await;
        assert_eq!(fx.orchestrator.rendered_pins()[0].position, LatLng::new(1.0, 1.0));

        assert!(fx
            .orchestrator
            .move_position("missing", moved)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_move_pending_pin_rewrites_queue() {
        let fx = fixture();
        fx.remote.set_offline(true);
        let pin = fx.orchestrator.create_shared(draft("bike")).await.unwrap();

        let moved = LatLng::new(43.0, 0.1);
        fx.orchestrator.move_position(&pin.id, moved).await.unwrap();
        assert_eq!(fx.orchestrator.queue().list().unwrap()[0].position, moved);

        fx.remote.clear_failures();
        fx.orchestrator.sync_pending().await.unwrap();
        let rendered = fx.orchestrator.rendered_pins();
        assert_eq!(rendered[0].position, moved);
    }

    #[tokio::test]
    async fn test_poll_refresh_reports_new_ids() {
        let fx = fixture();
        fx.remote.set_records(vec![record("a", 1.0, 1.0)]);
        let first = fx.orchestrator.poll_refresh().await;
        assert!(first.new_ids.is_empty());

        let mut events = fx.events.subscribe();
        fx.remote
            .set_records(vec![record("a", 1.0, 1.0), record("b", 2.0, 2.0)]);
        let outcome = fx.orchestrator.poll_refresh().await;
        assert_eq!(outcome.new_ids, vec!["b".to_string()]);

        assert_eq!(events.recv().await.unwrap().event_type(), "snapshot_replaced");
        assert_eq!(
            events.recv().await.unwrap(),
            PinEvent::NewPinsAvailable {
                count: 1,
                ids: vec!["b".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_overlapping_triggers_coalesce() {
        let fx = fixture();
        fx.remote.set_records(vec![record("a", 1.0, 1.0)]);
        fx.remote.set_list_delay(StdDuration::from_millis(50));

        let (o1, o2) = (fx.orchestrator.clone(), fx.orchestrator.clone());
        let first = tokio::spawn(async move { o1.load_shared().await });
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        let second = tokio::spawn(async move { o2.load_shared().await });

        let (first, second) = (first.await.unwrap(), second.await.unwrap());
        assert_eq!(fx.remote.list_calls(), 1);
        assert!(!first.coalesced);
        assert!(second.coalesced);
        assert_eq!(second.count, first.count);
    }

    #[tokio::test]
    async fn test_private_pins_never_touch_remote() {
        let fx = fixture();
        let pin = fx
            .orchestrator
            .create_pin(draft("my spot"), Visibility::LocalOnly)
            .await
            .unwrap();
        assert!(!pin.is_synced());
        assert!(fx.remote.create_calls().is_empty());
        assert_eq!(fx.orchestrator.my_private_pins().unwrap()[0].id, pin.id);

        let moved = LatLng::new(43.1, 0.2);
        fx.orchestrator.move_position(&pin.id, moved).await.unwrap();
        assert_eq!(fx.orchestrator.my_private_pins().unwrap()[0].position, moved);
    }

    #[tokio::test]
    async fn test_delete_private_removes_local_only() {
        let fx = fixture();
        let pin = fx
            .orchestrator
            .create_pin(draft("my spot"), Visibility::LocalOnly)
            .await
            .unwrap();
        let mut events = fx.events.subscribe();

        fx.orchestrator.delete_private(&pin.id).await.unwrap();
        assert!(fx.orchestrator.my_private_pins().unwrap().is_empty());
        assert!(fx.remote.delete_calls().is_empty());
        assert_eq!(
            events.recv().await.unwrap(),
            PinEvent::PinDeleted { id: pin.id.clone() }
        );

        assert!(matches!(
            fx.orchestrator.delete_private(&pin.id).await,
            Err(CampusPinError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_save_pin_dispatches_on_kind() {
        let fx = fixture();
        let author = fx.orchestrator.identity().as_author();

        let pending =
            Pin::new_collaborative(draft("p"), author.clone(), Duration::hours(24)).unwrap();
        fx.orchestrator.save_pin(&pending).await.unwrap();
        fx.orchestrator.save_pin(&pending).await.unwrap();
        assert_eq!(fx.orchestrator.pending_count().unwrap(), 1);

        let shared = Pin::from_record(&record("r", 1.0, 1.0), Duration::hours(24));
        fx.orchestrator.save_pin(&shared).await.unwrap();
        assert!(fx.cache.get::<Pin>("pin_local_r").unwrap().is_none());

        let private = Pin::new_private(draft("mine"), author, Duration::hours(24)).unwrap();
        fx.orchestrator.save_pin(&private).await.unwrap();
        assert_eq!(fx.orchestrator.my_private_pins().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reported_pins_hidden() {
        let fx = fixture();
        fx.remote
            .set_records(vec![record("a", 1.0, 1.0), record("b", 2.0, 2.0)]);
        fx.orchestrator.load_shared().await;

        assert!(fx.orchestrator.report_pin("a", "spam").unwrap());
        assert!(!fx.orchestrator.report_pin("a", "again").unwrap());
        assert!(fx.orchestrator.is_pin_reported("a").unwrap());
        assert_eq!(ids(&fx.orchestrator.visible_shared_pins()), vec!["b"]);
        assert_eq!(fx.orchestrator.rendered_pins().len(), 2);
    }

    #[tokio::test]
    async fn test_pending_overlay_restored_after_restart() {
        let cache = LocalCache::temporary("u1").unwrap();
        let pin_id = {
            let remote = MockRemoteClient::new();
            remote.set_offline(true);
            let fx = fixture_with(cache.clone(), remote);
            fx.orchestrator.create_shared(draft("later")).await.unwrap().id
        };

        let fx = fixture_with(cache, MockRemoteClient::new());
        let rendered = fx.orchestrator.rendered_pins();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].id, pin_id);
        assert!(rendered[0].is_pending());
    }

    #[tokio::test]
    async fn test_load_pois_cache_first() {
        let fx = fixture();
        let poi = PoiRecord {
            id: "poi_01".to_string(),
            name: "Crelam".to_string(),
            lat: 43.22703,
            lng: 0.048392,
        };
        fx.remote.set_pois(vec![poi.clone()]);
        assert_eq!(fx.orchestrator.load_pois().await, vec![poi.clone()]);

        fx.remote.set_offline(true);
        assert_eq!(fx.orchestrator.load_pois().await, vec![poi]);
    }
}
