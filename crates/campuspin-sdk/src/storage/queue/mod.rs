//! 待发送队列 - 远端未确认的协作 pin
//!
//! 队列整体以一个 JSON 数组存储在 `pending_pins` 键下，按插入顺序排列。
//! drain 严格按 FIFO 顺序逐条发送，遇到第一个失败即停止本轮。

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::remote_client::RemoteClient;
use crate::storage::entities::{LatLng, PendingWrite};
use crate::storage::kv::{keys, LocalCache};

pub mod retry_policy;

pub use retry_policy::{FailureReason, RetryBackoff, RetryPolicy};

/// 一条已被远端确认的待发送记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedWrite {
    pub local_id: String,
    pub server_id: String,
}

/// 一轮 drain 的结果
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
    /// 按发送顺序排列
    pub synced: Vec<SyncedWrite>,
    /// 本轮结束后仍在队列中的条数
    pub remaining: usize,
    /// 使本轮停止的失败
    pub failure: Option<FailureReason>,
}

impl DrainReport {
    pub fn synced_count(&self) -> usize {
        self.synced.len()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

/// 持久化的待发送队列
#[derive(Debug)]
pub struct PendingQueue {
    cache: LocalCache,
    /// 串行化读-改-写
    write_lock: Mutex<()>,
    /// 同一时刻只允许一轮 drain
    drain_lock: tokio::sync::Mutex<()>,
}

impl PendingQueue {
    pub fn new(cache: LocalCache) -> Self {
        Self {
            cache,
            write_lock: Mutex::new(()),
            drain_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// 当前排队的快照（只读）
    pub fn list(&self) -> Result<Vec<PendingWrite>> {
        self.cache.get_or_default(keys::PENDING_PINS)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, local_id: &str) -> Result<bool> {
        Ok(self.list()?.iter().any(|w| w.id == local_id))
    }

    /// 入队；同 id 已存在时不做任何事并返回 false
    pub fn enqueue(&self, write: PendingWrite) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let mut entries = self.list()?;
        if entries.iter().any(|w| w.id == write.id) {
            debug!("待发送记录已存在，忽略重复入队: id={}", write.id);
            return Ok(false);
        }
        let id = write.id.clone();
        entries.push(write);
        self.persist(&entries)?;
        info!("📥 pin 已加入待发送队列: id={}, 队列长度={}", id, entries.len());
        Ok(true)
    }

    /// 按 id 移除；不存在时返回 false
    pub fn remove(&self, local_id: &str) -> Result<bool> {
        self.modify(|entries| {
            let before = entries.len();
            entries.retain(|w| w.id != local_id);
            entries.len() != before
        })
    }

    /// 改写排队记录的坐标，使最终的 create 携带新位置
    pub fn update_position(&self, local_id: &str, position: LatLng) -> Result<bool> {
        self.modify(|entries| match entries.iter_mut().find(|w| w.id == local_id) {
            Some(entry) => {
                entry.position = position;
                true
            }
            None => false,
        })
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.cache.remove(keys::PENDING_PINS)
    }

    /// 逐条发送，成功即移除，遇到第一个失败即停止
    ///
    /// 每一步都重新读取队首，因此发送期间被取消或改写的条目会反映在后续步骤中。
    pub async fn drain(&self, client: &dyn RemoteClient) -> Result<DrainReport> {
        let _drain_guard = self.drain_lock.lock().await;
        let mut report = DrainReport::default();

        loop {
            let head = match self.list()?.into_iter().next() {
                Some(head) => head,
                None => break,
            };

            match client.create(&head).await {
                Ok(ack) if ack.is_acknowledged() => {
                    // 远端已确认；移除失败会导致重复发送，必须上报
                    if let Err(e) = self.remove(&head.id) {
                        error!("已确认的待发送记录移除失败: id={}, error={}", head.id, e);
                        return Err(e);
                    }
                    debug!("待发送记录已确认: local_id={}, server_id={}", head.id, ack.id);
                    report.synced.push(SyncedWrite {
                        local_id: head.id,
                        server_id: ack.id,
                    });
                }
                Ok(_) => {
                    warn!("远端未确认创建，停止本轮发送: id={}", head.id);
                    report.failure = Some(FailureReason::Rejected(None));
                    break;
                }
                Err(e) => {
                    warn!("发送失败，停止本轮发送: id={}, error={}", head.id, e);
                    report.failure = Some(FailureReason::from(&e));
                    break;
                }
            }
        }

        report.remaining = self.len()?;
        info!(
            "待发送队列处理完成: 成功={}, 剩余={}",
            report.synced_count(),
            report.remaining
        );
        Ok(report)
    }

    fn modify<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(&mut Vec<PendingWrite>) -> bool,
    {
        let _guard = self.write_lock.lock();
        let mut entries = self.list()?;
        let changed = f(&mut entries);
        if changed {
            self.persist(&entries)?;
        }
        Ok(changed)
    }

    fn persist(&self, entries: &[PendingWrite]) -> Result<()> {
        self.cache.set(keys::PENDING_PINS, entries).map_err(|e| {
            error!("待发送队列持久化失败: {}", e);
            e
        })
    }
}
