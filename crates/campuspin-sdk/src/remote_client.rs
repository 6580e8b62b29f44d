//! 远端存储契约
//!
//! 远端只提供 list / create / delete，没有更新接口。任何调用都可能失败
//! （超时、非 2xx、离线）。后端字段命名不统一，`normalize_record` 负责把
//! 任意形状的 JSON 记录收敛为 `NormalizedPinRecord`。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::category::Category;
use crate::error::{CampusPinError, Result};
use crate::storage::entities::{NormalizedPinRecord, PendingWrite, PoiRecord};

/// 创建确认
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAck {
    pub success: bool,
    /// 远端分配的 id，成为 pin 的 server_id
    pub id: String,
}

impl CreateAck {
    /// 仅当 success 且 id 非空时视为确认
    pub fn is_acknowledged(&self) -> bool {
        self.success && !self.id.is_empty()
    }
}

/// 远端客户端
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// 拉取全部共享 pin
    async fn list(&self) -> Result<Vec<NormalizedPinRecord>>;

    /// 创建共享 pin
    async fn create(&self, write: &PendingWrite) -> Result<CreateAck>;

    /// 删除共享 pin，只有返回 Ok 才算确认
    async fn delete(&self, id: &str) -> Result<()>;

    /// 校园兴趣点，后端不提供时返回空
    async fn list_pois(&self) -> Result<Vec<PoiRecord>> {
        Ok(Vec::new())
    }
}

/// 未命名 pin 的标题
pub const UNTITLED: &str = "(untitled)";
/// 缺失作者时的显示名
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

/// 去掉 `{ success, data }` 外壳
pub fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// 归一化列表响应；无法解析的记录跳过
///
/// 非数组响应视为远端拒绝，调用方继续展示缓存。
pub fn normalize_list(value: Value) -> Result<Vec<NormalizedPinRecord>> {
    match unwrap_envelope(value) {
        Value::Array(items) => Ok(items.iter().filter_map(normalize_record).collect()),
        other => {
            warn!("列表响应不是数组: {}", value_kind(&other));
            Err(CampusPinError::RemoteRejection {
                status: None,
                message: format!("list response is not an array ({})", value_kind(&other)),
            })
        }
    }
}

/// 归一化单条远端记录
///
/// 缺少 id 或坐标无法解析的记录返回 `None`。未知分类回退到 `other`。
pub fn normalize_record(raw: &Value) -> Option<NormalizedPinRecord> {
    let obj = raw.as_object()?;

    let id = match obj.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            warn!("跳过缺少 id 的远端记录");
            return None;
        }
    };

    let lat = first_number(raw, &["latitude", "lat"]);
    let lng = first_number(raw, &["longitude", "lng"]);
    let (lat, lng) = match (lat, lng) {
        (Some(lat), Some(lng)) => (lat, lng),
        _ => {
            warn!("跳过坐标无法解析的远端记录: id={}", id);
            return None;
        }
    };

    let title = first_string(raw, &["title"])
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());
    let description = first_string(raw, &["description"]).unwrap_or_default();
    let category_id = first_string(raw, &["category", "categorie", "categoryId"])
        .map(|name| Category::from_remote(&name).id)
        .unwrap_or(Category::other().id)
        .to_string();
    let author_name = first_string(raw, &["author", "authorName", "author_name"])
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| ANONYMOUS_AUTHOR.to_string());
    let author_id =
        first_string(raw, &["authorId", "author_id"]).unwrap_or_else(|| author_name.clone());
    let created_at = first_string(raw, &["created_at", "createdAt"])
        .as_deref()
        .and_then(parse_timestamp);

    Some(NormalizedPinRecord {
        id,
        title,
        description,
        category_id,
        lat,
        lng,
        author_id,
        author_name,
        created_at,
    })
}

fn first_string(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match raw.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn first_number(raw: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| match raw.get(key) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|v| v.is_finite())
}

/// RFC 3339，或后端的 `YYYY-MM-DD HH:MM:SS`（按 UTC）
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
pub mod test_helpers {
    //! 可编排的假远端

    use std::collections::HashSet;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::error::CampusPinError;

    #[derive(Debug, Default)]
    struct MockState {
        records: Vec<NormalizedPinRecord>,
        pois: Vec<PoiRecord>,
        fail_all: bool,
        fail_create_ids: HashSet<String>,
        fail_delete_ids: HashSet<String>,
        create_calls: Vec<String>,
        delete_calls: Vec<String>,
        list_calls: usize,
        list_delay: Option<Duration>,
        next_server_id: u64,
    }

    /// 记录所有调用；成功的 create 会把记录加入远端列表
    #[derive(Debug, Default)]
    pub struct MockRemoteClient {
        state: Mutex<MockState>,
    }

    impl MockRemoteClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_records(records: Vec<NormalizedPinRecord>) -> Self {
            let mock = Self::new();
            mock.set_records(records);
            mock
        }

        pub fn set_records(&self, records: Vec<NormalizedPinRecord>) {
            self.state.lock().records = records;
        }

        pub fn set_pois(&self, pois: Vec<PoiRecord>) {
            self.state.lock().pois = pois;
        }

        pub fn set_offline(&self, offline: bool) {
            self.state.lock().fail_all = offline;
        }

        pub fn fail_create_for(&self, local_id: &str) {
            self.state.lock().fail_create_ids.insert(local_id.to_string());
        }

        pub fn fail_delete_for(&self, id: &str) {
            self.state.lock().fail_delete_ids.insert(id.to_string());
        }

        pub fn clear_failures(&self) {
            let mut state = self.state.lock();
            state.fail_all = false;
            state.fail_create_ids.clear();
            state.fail_delete_ids.clear();
        }

        pub fn set_list_delay(&self, delay: Duration) {
            self.state.lock().list_delay = Some(delay);
        }

        /// 按调用顺序记录的 create 本地 id
        pub fn create_calls(&self) -> Vec<String> {
            self.state.lock().create_calls.clone()
        }

        pub fn create_count_for(&self, local_id: &str) -> usize {
            self.state
                .lock()
                .create_calls
                .iter()
                .filter(|id| id.as_str() == local_id)
                .count()
        }

        pub fn delete_calls(&self) -> Vec<String> {
            self.state.lock().delete_calls.clone()
        }

        pub fn list_calls(&self) -> usize {
            self.state.lock().list_calls
        }
    }

    pub fn record(id: &str, lat: f64, lng: f64) -> NormalizedPinRecord {
        NormalizedPinRecord {
            id: id.to_string(),
            title: format!("pin {}", id),
            description: String::new(),
            category_id: "info".to_string(),
            lat,
            lng,
            author_id: "remote".to_string(),
            author_name: "remote".to_string(),
            created_at: None,
        }
    }

    #[async_trait]
    impl RemoteClient for MockRemoteClient {
        async fn list(&self) -> Result<Vec<NormalizedPinRecord>> {
            let delay = {
                let mut state = self.state.lock();
                state.list_calls += 1;
                state.list_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let state = self.state.lock();
            if state.fail_all {
                return Err(CampusPinError::Transport("offline".to_string()));
            }
            Ok(state.records.clone())
        }

        async fn create(&self, write: &PendingWrite) -> Result<CreateAck> {
            let mut state = self.state.lock();
            state.create_calls.push(write.id.clone());
            if state.fail_all {
                return Err(CampusPinError::Transport("offline".to_string()));
            }
            if state.fail_create_ids.contains(&write.id) {
                return Err(CampusPinError::rejected(500, "create failed"));
            }
            state.next_server_id += 1;
            let server_id = format!("srv_{}", state.next_server_id);
            state.records.push(NormalizedPinRecord {
                id: server_id.clone(),
                title: write.title.clone(),
                description: write.description.clone(),
                category_id: write.category_id.clone(),
                lat: write.position.lat,
                lng: write.position.lng,
                author_id: write.author.id.clone(),
                author_name: write.author.display_name.clone(),
                created_at: Some(write.created_at),
            });
            Ok(CreateAck {
                success: true,
                id: server_id,
            })
        }

        async fn delete(&self, id: &str) -> Result<()> {
            let mut state = self.state.lock();
            state.delete_calls.push(id.to_string());
            if state.fail_all {
                return Err(CampusPinError::Transport("offline".to_string()));
            }
            if state.fail_delete_ids.contains(id) {
                return Err(CampusPinError::rejected(500, "delete failed"));
            }
            state.records.retain(|r| r.id != id);
            Ok(())
        }

        async fn list_pois(&self) -> Result<Vec<PoiRecord>> {
            let state = self.state.lock();
            if state.fail_all {
                return Err(CampusPinError::Transport("offline".to_string()));
            }
            Ok(state.pois.clone())
        }
    }
}
