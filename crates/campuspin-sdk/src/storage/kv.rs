//! KV 存储模块 - 基于 sled 的本地缓存
//!
//! 本模块提供：
//! - 同步的 get / set / remove，缺失键返回 None 或默认值，不报错
//! - 每次写入在返回前 flush 到磁盘（无异步刷盘窗口）
//! - 按身份隔离的命名空间（每个身份一个 Tree）
//! - 缓存布局版本校验

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};
use tracing::{debug, info, warn};

use crate::error::{CampusPinError, Result};
use crate::version::CACHE_SCHEMA_VERSION;

/// 持久化键
pub mod keys {
    /// 最近一次成功拉取的共享 pin 快照
    pub const SHARED_PINS_CACHE: &str = "shared_pins_cache";
    /// 待发送队列
    pub const PENDING_PINS: &str = "pending_pins";
    /// 举报登记
    pub const PIN_REPORTS: &str = "pin_reports";
    /// 已提醒的 pin id 集合
    pub const NOTIFIED_PINS: &str = "notified_pins";
    /// 兴趣点快照
    pub const POIS_CACHE: &str = "pois_cache";
    /// 私有 pin 前缀，每个 pin 一个键
    pub const PIN_LOCAL_PREFIX: &str = "pin_local_";
    /// 缓存布局版本
    pub const SCHEMA_VERSION: &str = "__schema_version";

    /// 私有 pin 的键
    pub fn pin_local(id: &str) -> String {
        format!("{}{}", PIN_LOCAL_PREFIX, id)
    }
}

/// 本地缓存句柄
///
/// 句柄可廉价克隆（sled 内部为 Arc），进程启动时初始化一次后注入到各组件。
/// 所有值以 JSON 快照存储；调用方修改后需要重新读取。
#[derive(Debug, Clone)]
pub struct LocalCache {
    db: Db,
    tree: Tree,
    namespace: String,
}

impl LocalCache {
    /// 打开（或创建）`base_path/kv` 下的缓存，并切换到 `namespace`
    pub fn open(base_path: &Path, namespace: &str) -> Result<Self> {
        let kv_path = base_path.join("kv");
        std::fs::create_dir_all(&kv_path)
            .map_err(|e| CampusPinError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        // 上一个进程实例可能刚释放文件锁，重试多次带退避
        const MAX_OPEN_RETRIES: u32 = 5;
        const RETRY_DELAY_MS: u64 = 100;
        let mut last_err: Option<sled::Error> = None;
        let mut db_opt: Option<Db> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&kv_path) {
                Ok(db) => {
                    db_opt = Some(db);
                    break;
                }
                Err(e) => {
                    let msg = e.to_string();
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        warn!("KV 存储被占用，{}ms 后重试 (attempt {})", delay_ms, attempt + 1);
                        std::thread::sleep(Duration::from_millis(delay_ms));
                    } else {
                        break;
                    }
                }
            }
        }
        let db = db_opt.ok_or_else(|| {
            CampusPinError::KvStore(
                last_err
                    .map(|e| format!("打开 sled 数据库失败: {}", e))
                    .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
            )
        })?;

        Self::with_db(db, namespace)
    }

    /// 纯内存缓存（测试与无持久化场景）
    pub fn temporary(namespace: &str) -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| CampusPinError::KvStore(format!("打开临时 sled 数据库失败: {}", e)))?;
        Self::with_db(db, namespace)
    }

    fn with_db(db: Db, namespace: &str) -> Result<Self> {
        if namespace.is_empty() {
            return Err(CampusPinError::InvalidArgument("缓存命名空间不能为空".to_string()));
        }
        let tree_name = format!("user_{}", namespace);
        let tree = db
            .open_tree(&tree_name)
            .map_err(|e| CampusPinError::KvStore(format!("打开命名空间 Tree 失败: {}", e)))?;

        let cache = Self {
            db,
            tree,
            namespace: namespace.to_string(),
        };
        cache.check_schema_version()?;

        info!("本地缓存已打开: namespace={}", namespace);
        Ok(cache)
    }

    /// 校验缓存布局版本，首次打开时写入
    fn check_schema_version(&self) -> Result<()> {
        match self.get::<u32>(keys::SCHEMA_VERSION)? {
            Some(version) if version > CACHE_SCHEMA_VERSION => Err(CampusPinError::KvStore(format!(
                "缓存布局版本 {} 高于当前 SDK 支持的版本 {}，拒绝打开",
                version, CACHE_SCHEMA_VERSION
            ))),
            Some(_) => Ok(()),
            None => self.set(keys::SCHEMA_VERSION, &CACHE_SCHEMA_VERSION),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// 读取键；缺失返回 `Ok(None)`，内容损坏返回序列化错误
    pub fn get<V>(&self, key: &str) -> Result<Option<V>>
    where
        V: DeserializeOwned,
    {
        let result = self
            .tree
            .get(key)
            .map_err(|e| CampusPinError::KvStore(format!("获取键值对失败: {}", e)))?;

        match result {
            Some(value_bytes) => {
                let value = serde_json::from_slice(&value_bytes).map_err(|e| {
                    CampusPinError::Serialization(format!("反序列化值失败 (key={}): {}", key, e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// 读取键；缺失返回默认值
    pub fn get_or_default<V>(&self, key: &str) -> Result<V>
    where
        V: DeserializeOwned + Default,
    {
        Ok(self.get(key)?.unwrap_or_default())
    }

    /// 写入键，返回前已落盘
    pub fn set<V>(&self, key: &str, value: &V) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        let value_bytes = serde_json::to_vec(value)
            .map_err(|e| CampusPinError::Serialization(format!("序列化值失败 (key={}): {}", key, e)))?;

        self.tree
            .insert(key, value_bytes)
            .map_err(|e| CampusPinError::KvStore(format!("设置键值对失败: {}", e)))?;
        self.flush()?;

        debug!("缓存写入: key={}", key);
        Ok(())
    }

    /// 删除键；键不存在时也返回 Ok
    pub fn remove(&self, key: &str) -> Result<()> {
        let removed = self
            .tree
            .remove(key)
            .map_err(|e| CampusPinError::KvStore(format!("删除键值对失败: {}", e)))?;
        if removed.is_some() {
            self.flush()?;
            debug!("缓存删除: key={}", key);
        }
        Ok(())
    }

    /// 检查键是否存在
    pub fn exists(&self, key: &str) -> Result<bool> {
        self.tree
            .contains_key(key)
            .map_err(|e| CampusPinError::KvStore(format!("检查键存在失败: {}", e)))
    }

    /// 获取指定前缀的所有键值对；无法反序列化的条目跳过并记录日志
    pub fn scan_prefix<V>(&self, prefix: &str) -> Result<Vec<(String, V)>>
    where
        V: DeserializeOwned,
    {
        let mut results = Vec::new();

        for item in self.tree.scan_prefix(prefix) {
            let (key, value_bytes) =
                item.map_err(|e| CampusPinError::KvStore(format!("扫描前缀失败: {}", e)))?;
            let key = String::from_utf8_lossy(&key).into_owned();

            match serde_json::from_slice(&value_bytes) {
                Ok(value) => results.push((key, value)),
                Err(e) => warn!("跳过无法解析的缓存条目 key={}: {}", key, e),
            }
        }

        Ok(results)
    }

    /// 当前命名空间的键数量
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// 清空当前命名空间（保留布局版本）
    pub fn clear(&self) -> Result<()> {
        self.tree
            .clear()
            .map_err(|e| CampusPinError::KvStore(format!("清空命名空间失败: {}", e)))?;
        self.set(keys::SCHEMA_VERSION, &CACHE_SCHEMA_VERSION)
    }

    fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| CampusPinError::KvStore(format!("刷盘失败: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_cache_basic_operations() {
        let cache = LocalCache::temporary("test_user").unwrap();

        let test_data = json!({ "name": "test", "value": 123 });
        cache.set("test_key", &test_data).unwrap();
        let retrieved: serde_json::Value = cache.get("test_key").unwrap().unwrap();
        assert_eq!(retrieved, test_data);

        assert!(cache.exists("test_key").unwrap());
        assert!(!cache.exists("non_existent_key").unwrap());

        cache.remove("test_key").unwrap();
        let deleted: Option<serde_json::Value> = cache.get("test_key").unwrap();
        assert!(deleted.is_none());
    }

    #[test]
    fn test_missing_key_never_errors() {
        let cache = LocalCache::temporary("test_user").unwrap();

        let missing: Option<Vec<String>> = cache.get("missing").unwrap();
        assert!(missing.is_none());

        let defaulted: Vec<String> = cache.get_or_default("missing").unwrap();
        assert!(defaulted.is_empty());

        // 删除不存在的键也不报错
        cache.remove("missing").unwrap();
    }

    #[test]
    fn test_scan_prefix_skips_other_keys() {
        let cache = LocalCache::temporary("test_user").unwrap();
        cache.set(&keys::pin_local("a"), &json!({"v": 1})).unwrap();
        cache.set(&keys::pin_local("b"), &json!({"v": 2})).unwrap();
        cache.set(keys::PENDING_PINS, &json!([])).unwrap();

        let results: Vec<(String, serde_json::Value)> =
            cache.scan_prefix(keys::PIN_LOCAL_PREFIX).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(k, _)| k.starts_with(keys::PIN_LOCAL_PREFIX)));
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let temp_dir = TempDir::new().unwrap();
        {
            let alice = LocalCache::open(temp_dir.path(), "alice").unwrap();
            alice.set("k", &1u32).unwrap();
        }
        let bob = LocalCache::open(temp_dir.path(), "bob").unwrap();
        let value: Option<u32> = bob.get("k").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_values_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let cache = LocalCache::open(temp_dir.path(), "u1").unwrap();
            cache.set(keys::NOTIFIED_PINS, &vec!["p1".to_string()]).unwrap();
        }
        let cache = LocalCache::open(temp_dir.path(), "u1").unwrap();
        let notified: Vec<String> = cache.get_or_default(keys::NOTIFIED_PINS).unwrap();
        assert_eq!(notified, vec!["p1".to_string()]);
    }

    #[test]
    fn test_newer_schema_version_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        {
            let cache = LocalCache::open(temp_dir.path(), "u1").unwrap();
            cache.set(keys::SCHEMA_VERSION, &(CACHE_SCHEMA_VERSION + 1)).unwrap();
        }
        let err = LocalCache::open(temp_dir.path(), "u1").unwrap_err();
        assert!(err.is_local_persistence());
    }

    #[test]
    fn test_corrupted_value_is_serialization_error() {
        let cache = LocalCache::temporary("u1").unwrap();
        cache.set("k", &"not a number").unwrap();
        let err = cache.get::<u32>("k").unwrap_err();
        assert!(matches!(err, CampusPinError::Serialization(_)));
    }
}
