//! 举报登记：每个 pin 只记录第一次举报

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::Result;
use crate::storage::entities::ReportRecord;
use crate::storage::kv::{keys, LocalCache};

#[derive(Debug)]
pub struct ReportRegistry {
    cache: LocalCache,
    write_lock: Mutex<()>,
}

impl ReportRegistry {
    pub fn new(cache: LocalCache) -> Self {
        Self {
            cache,
            write_lock: Mutex::new(()),
        }
    }

    /// 登记举报；已举报过的 id 返回 false，原记录不变
    pub fn report(&self, pin_id: &str, reason: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let mut reports = self.all()?;
        if reports.contains_key(pin_id) {
            debug!("pin 已被举报过，忽略: id={}", pin_id);
            return Ok(false);
        }
        reports.insert(
            pin_id.to_string(),
            ReportRecord {
                reason: reason.to_string(),
                timestamp: Utc::now(),
            },
        );
        self.cache.set(keys::PIN_REPORTS, &reports)?;
        info!("🚩 pin 已举报: id={}", pin_id);
        Ok(true)
    }

    pub fn is_reported(&self, pin_id: &str) -> Result<bool> {
        Ok(self.all()?.contains_key(pin_id))
    }

    pub fn get(&self, pin_id: &str) -> Result<Option<ReportRecord>> {
        Ok(self.all()?.remove(pin_id))
    }

    pub fn all(&self) -> Result<HashMap<String, ReportRecord>> {
        self.cache.get_or_default(keys::PIN_REPORTS)
    }
}
