//! 存储模块 - 离线优先的本地持久化层
//!
//! 分层：
//! - LocalCache: 同步的 sled 键值存储（kv）
//! - StorageManager: 快照、私有 pin、兴趣点的类型化访问
//! - PendingQueue: 待发送队列（queue）
//! - ReportRegistry: 举报登记（reports）

use std::cmp::Reverse;

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::error::{CampusPinError, Result};

pub mod entities;
pub mod kv;
pub mod queue;
pub mod reports;

pub use entities::*;
pub use kv::{keys, LocalCache};
pub use queue::{DrainReport, PendingQueue, SyncedWrite};
pub use reports::ReportRegistry;

/// 存储管理器
///
/// 只有编排器通过它写入；其他组件读取派生的内存投影。
#[derive(Debug, Clone)]
pub struct StorageManager {
    cache: LocalCache,
    pin_ttl: Duration,
}

impl StorageManager {
    pub fn new(cache: LocalCache, pin_ttl: Duration) -> Self {
        Self { cache, pin_ttl }
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn pin_ttl(&self) -> Duration {
        self.pin_ttl
    }

    // ========== 共享 pin 快照 ==========

    /// 最近一次成功拉取的快照；从未拉取过返回 None
    pub fn load_snapshot(&self) -> Result<Option<Vec<NormalizedPinRecord>>> {
        self.cache.get(keys::SHARED_PINS_CACHE)
    }

    /// 整体替换快照
    pub fn save_snapshot(&self, records: &[NormalizedPinRecord]) -> Result<()> {
        self.cache
            .set(keys::SHARED_PINS_CACHE, records)
            .map_err(|e| {
                error!("共享 pin 快照写入失败: {}", e);
                e
            })?;
        debug!("共享 pin 快照已替换: count={}", records.len());
        Ok(())
    }

    /// 从快照中移除记录；不存在返回 false
    pub fn remove_from_snapshot(&self, id: &str) -> Result<bool> {
        let mut records = match self.load_snapshot()? {
            Some(records) => records,
            None => return Ok(false),
        };
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(false);
        }
        self.save_snapshot(&records)?;
        Ok(true)
    }

    /// 仅改写本地快照中记录的坐标
    pub fn update_snapshot_position(&self, id: &str, position: LatLng) -> Result<bool> {
        let mut records = match self.load_snapshot()? {
            Some(records) => records,
            None => return Ok(false),
        };
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.lat = position.lat;
                record.lng = position.lng;
            }
            None => return Ok(false),
        }
        self.save_snapshot(&records)?;
        Ok(true)
    }

    // ========== 私有 pin ==========

    /// 私有 pin 每个一个键
    pub fn save_private_pin(&self, pin: &Pin) -> Result<()> {
        if pin.visibility() != Visibility::LocalOnly {
            return Err(CampusPinError::InvalidArgument(format!(
                "pin {} 不是私有 pin，不能写入私有存储",
                pin.id
            )));
        }
        self.cache.set(&keys::pin_local(&pin.id), pin)?;
        info!("私有 pin 已保存: id={}", pin.id);
        Ok(())
    }

    pub fn get_private_pin(&self, id: &str) -> Result<Option<Pin>> {
        self.cache.get(&keys::pin_local(id))
    }

    pub fn remove_private_pin(&self, id: &str) -> Result<()> {
        self.cache.remove(&keys::pin_local(id))
    }

    /// 全部未过期的私有 pin，最新的在前；过期的在此处顺带删除
    pub fn private_pins(&self) -> Result<Vec<Pin>> {
        let now = Utc::now();
        let mut pins = Vec::new();
        for (key, pin) in self.cache.scan_prefix::<Pin>(keys::PIN_LOCAL_PREFIX)? {
            if pin.is_expired_at(now) {
                debug!("私有 pin 已过期，删除: id={}", pin.id);
                if let Err(e) = self.cache.remove(&key) {
                    warn!("删除过期私有 pin 失败: key={}, error={}", key, e);
                }
                continue;
            }
            pins.push(pin);
        }
        pins.sort_by_key(|p| Reverse(p.created_at));
        Ok(pins)
    }

    // ========== 兴趣点 ==========

    pub fn load_pois(&self) -> Result<Option<Vec<PoiRecord>>> {
        self.cache.get(keys::POIS_CACHE)
    }

    pub fn save_pois(&self, pois: &[PoiRecord]) -> Result<()> {
        self.cache.set(keys::POIS_CACHE, pois)
    }
}
