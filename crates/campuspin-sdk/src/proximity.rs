//! 接近提醒
//!
//! 用户位置进入阈值半径时，每个 pin 只提醒一次。已提醒集合持久化，
//! 跨重启保留，只有 `reset()` 会清空。

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::events::{EventManager, PinEvent};
use crate::storage::entities::{LatLng, Pin};
use crate::storage::kv::{keys, LocalCache};
use crate::utils::geo::haversine_distance;

/// 默认提醒半径（米）
pub const DEFAULT_THRESHOLD_METERS: f64 = 30.0;

/// 一次接近提醒
#[derive(Debug, Clone, PartialEq)]
pub struct ProximityAlert {
    pub pin_id: String,
    pub title: String,
    pub category_id: String,
    pub distance_meters: f64,
    /// 紧急分类
    pub urgent: bool,
}

#[derive(Debug)]
pub struct ProximityNotifier {
    cache: LocalCache,
    threshold_meters: f64,
    notified: Mutex<HashSet<String>>,
    events: Arc<EventManager>,
}

impl ProximityNotifier {
    /// 从缓存加载已提醒集合
    pub fn new(
        cache: LocalCache,
        threshold_meters: f64,
        events: Arc<EventManager>,
    ) -> Result<Self> {
        let notified: Vec<String> = cache.get_or_default(keys::NOTIFIED_PINS)?;
        debug!("已提醒集合加载完成: {} 个", notified.len());
        Ok(Self {
            cache,
            threshold_meters,
            notified: Mutex::new(notified.into_iter().collect()),
            events,
        })
    }

    pub fn threshold_meters(&self) -> f64 {
        self.threshold_meters
    }

    pub fn is_notified(&self, pin_id: &str) -> bool {
        self.notified.lock().contains(pin_id)
    }

    /// 检查位置，返回本次新触发的提醒
    pub async fn check_proximity(&self, position: LatLng, pins: &[Pin]) -> Vec<ProximityAlert> {
        if !position.is_valid() {
            return Vec::new();
        }

        let alerts: Vec<ProximityAlert> = {
            let mut notified = self.notified.lock();
            let mut alerts = Vec::new();
            for pin in pins {
                if !pin.position.is_valid() {
                    continue;
                }
                let distance = haversine_distance(position, pin.position);
                if distance > self.threshold_meters {
                    continue;
                }
                // insert 返回 false 表示已提醒过
                if !notified.insert(pin.id.clone()) {
                    continue;
                }
                alerts.push(ProximityAlert {
                    pin_id: pin.id.clone(),
                    title: pin.title.clone(),
                    category_id: pin.category_id.clone(),
                    distance_meters: distance,
                    urgent: pin.category().urgent,
                });
            }
            if !alerts.is_empty() {
                self.persist(&notified);
            }
            alerts
        };

        for alert in &alerts {
            info!(
                "📍 接近提醒: pin={}, distance={:.1}m",
                alert.pin_id, alert.distance_meters
            );
            self.events
                .emit(PinEvent::ProximityAlert {
                    pin_id: alert.pin_id.clone(),
                    title: alert.title.clone(),
                    category_id: alert.category_id.clone(),
                    distance_meters: alert.distance_meters,
                    urgent: alert.urgent,
                })
                .await;
        }
        alerts
    }

    /// 清空已提醒集合
    pub fn reset(&self) -> Result<()> {
        let mut notified = self.notified.lock();
        notified.clear();
        self.cache.remove(keys::NOTIFIED_PINS)?;
        info!("已提醒集合已清空");
        Ok(())
    }

    /// 持久化失败只记录日志，内存中的集合仍然生效
    fn persist(&self, notified: &HashSet<String>) {
        let mut ids: Vec<&String> = notified.iter().collect();
        ids.sort();
        if let Err(e) = self.cache.set(keys::NOTIFIED_PINS, &ids) {
            error!("已提醒集合持久化失败: {}", e);
        }
    }
}
