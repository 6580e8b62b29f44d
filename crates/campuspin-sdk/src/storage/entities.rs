//! 数据实体定义 - 对应本地缓存中的持久化形状
//!
//! 这里定义了 pin 及其快照、待发送记录等结构体，用于：
//! - 类型安全的数据传输
//! - 统一的数据表示
//! - 序列化/反序列化支持（所有值都以 JSON 快照存储，不是活引用）

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::category::Category;
use crate::error::{CampusPinError, Result};

/// 地理坐标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// 坐标是否有限且在合法范围内
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// pin 作者
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub display_name: String,
}

/// 调用方角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Student,
    Staff,
    /// 安保人员可以编辑任何 pin
    Security,
}

/// 调用方提供的身份（不做认证）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub role: Role,
}

impl Identity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role: Role::Student,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn as_author(&self) -> Author {
        Author {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new("anonymous", "Anonymous")
    }
}

/// 可见性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// 仅本地，永不上传
    LocalOnly,
    /// 共享，由远端存储承载
    Shared,
}

/// 协作 pin 的同步状态，只允许 `Pending → Synced`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Pending,
    Synced,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Pending => write!(f, "等待同步"),
            SyncState::Synced => write!(f, "已同步"),
        }
    }
}

/// pin 变体
///
/// 保存行为由编排器按变体分派，不挂在类型自身上。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PinKind {
    /// 私有 pin：仅本地
    Private,
    /// 协作 pin：本地创建、等待或已经被远端确认
    Collaborative {
        server_id: Option<String>,
        sync_state: SyncState,
    },
    /// 远端记录的只读投影
    Shared { server_id: String },
}

/// 创建 pin 的用户输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub position: LatLng,
    #[serde(default)]
    pub category_id: String,
}

impl PinDraft {
    pub fn new(title: impl Into<String>, position: LatLng, category_id: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            position,
            category_id: category_id.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(CampusPinError::InvalidArgument("pin 标题不能为空".to_string()));
        }
        if !self.position.is_valid() {
            return Err(CampusPinError::InvalidArgument(format!(
                "pin 坐标无效: ({}, {})",
                self.position.lat, self.position.lng
            )));
        }
        Ok(())
    }
}

/// pin 实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    /// 本地生成的 id，或远端记录的 id（Shared）
    pub id: String,
    pub title: String,
    pub description: String,
    pub position: LatLng,
    /// 引用分类目录，始终是已知 id
    pub category_id: String,
    pub author: Author,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub kind: PinKind,
}

/// 生成本地 pin id
pub fn generate_local_id() -> String {
    format!("pin_{}", uuid::Uuid::new_v4().simple())
}

/// 过期时间；溢出时取最大时间
fn expiry(created_at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    created_at
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Pin {
    fn from_draft(draft: PinDraft, author: Author, ttl: Duration, kind: PinKind) -> Result<Self> {
        draft.validate()?;
        let created_at = Utc::now();
        Ok(Self {
            id: generate_local_id(),
            title: draft.title.trim().to_string(),
            description: draft.description,
            position: draft.position,
            category_id: Category::by_id(&draft.category_id).id.to_string(),
            author,
            created_at,
            expires_at: expiry(created_at, ttl),
            kind,
        })
    }

    /// 构建私有 pin
    pub fn new_private(draft: PinDraft, author: Author, ttl: Duration) -> Result<Self> {
        Self::from_draft(draft, author, ttl, PinKind::Private)
    }

    /// 构建协作 pin（初始为 Pending，尚无 server_id）
    pub fn new_collaborative(draft: PinDraft, author: Author, ttl: Duration) -> Result<Self> {
        Self::from_draft(
            draft,
            author,
            ttl,
            PinKind::Collaborative {
                server_id: None,
                sync_state: SyncState::Pending,
            },
        )
    }

    /// 远端记录投影为只读 pin
    pub fn from_record(record: &NormalizedPinRecord, ttl: Duration) -> Self {
        let created_at = record.created_at.unwrap_or_else(Utc::now);
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            description: record.description.clone(),
            position: record.position(),
            category_id: record.category().id.to_string(),
            author: Author {
                id: record.author_id.clone(),
                display_name: record.author_name.clone(),
            },
            created_at,
            expires_at: expiry(created_at, ttl),
            kind: PinKind::Shared {
                server_id: record.id.clone(),
            },
        }
    }

    /// 从待发送记录恢复协作 pin（重启后重建本地叠加层）
    pub fn from_pending_write(write: &PendingWrite, ttl: Duration) -> Self {
        Self {
            id: write.id.clone(),
            title: write.title.clone(),
            description: write.description.clone(),
            position: write.position,
            category_id: Category::by_id(&write.category_id).id.to_string(),
            author: write.author.clone(),
            created_at: write.created_at,
            expires_at: expiry(write.created_at, ttl),
            kind: PinKind::Collaborative {
                server_id: None,
                sync_state: SyncState::Pending,
            },
        }
    }

    pub fn visibility(&self) -> Visibility {
        match self.kind {
            PinKind::Private => Visibility::LocalOnly,
            PinKind::Collaborative { .. } | PinKind::Shared { .. } => Visibility::Shared,
        }
    }

    pub fn category(&self) -> &'static Category {
        Category::by_id(&self.category_id)
    }

    pub fn server_id(&self) -> Option<&str> {
        match &self.kind {
            PinKind::Private => None,
            PinKind::Collaborative { server_id, .. } => server_id.as_deref(),
            PinKind::Shared { server_id } => Some(server_id),
        }
    }

    /// 私有 pin 永远未同步；只读投影永远已同步
    pub fn is_synced(&self) -> bool {
        match &self.kind {
            PinKind::Private => false,
            PinKind::Collaborative { sync_state, .. } => *sync_state == SyncState::Synced,
            PinKind::Shared { .. } => true,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(
            self.kind,
            PinKind::Collaborative {
                sync_state: SyncState::Pending,
                ..
            }
        )
    }

    /// 远端确认：设置 server_id 并转为 Synced。只能发生一次。
    pub fn mark_synced(&mut self, server_id: impl Into<String>) -> Result<()> {
        match &mut self.kind {
            PinKind::Collaborative {
                server_id: slot @ None,
                sync_state: state @ SyncState::Pending,
            } => {
                *slot = Some(server_id.into());
                *state = SyncState::Synced;
                Ok(())
            }
            PinKind::Collaborative { .. } => Err(CampusPinError::InvalidOperation(format!(
                "pin {} 已被确认，不能再次设置 server_id",
                self.id
            ))),
            _ => Err(CampusPinError::InvalidOperation(format!(
                "pin {} 不是协作 pin",
                self.id
            ))),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// 作者本人或安保角色可编辑
    pub fn is_editable_by(&self, identity: &Identity) -> bool {
        identity.id == self.author.id || identity.role == Role::Security
    }

    /// 协作 pin 的可序列化待发送快照
    pub fn to_pending_write(&self) -> Option<PendingWrite> {
        match self.kind {
            PinKind::Collaborative { .. } => Some(PendingWrite {
                id: self.id.clone(),
                title: self.title.clone(),
                description: self.description.clone(),
                position: self.position,
                category_id: self.category_id.clone(),
                author: self.author.clone(),
                created_at: self.created_at,
            }),
            _ => None,
        }
    }
}

/// 待发送记录：协作 pin 在远端确认前的快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrite {
    /// 本地 id，队列内唯一
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub position: LatLng,
    pub category_id: String,
    pub author: Author,
    pub created_at: DateTime<Utc>,
}

/// 归一化后的远端 pin 记录（CacheSnapshot 的元素）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedPinRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category_id: String,
    pub lat: f64,
    pub lng: f64,
    pub author_id: String,
    pub author_name: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl NormalizedPinRecord {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    pub fn category(&self) -> &'static Category {
        Category::by_id(&self.category_id)
    }
}

/// 校园兴趣点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoiRecord {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

/// 举报记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::category_ids;

    fn author() -> Author {
        Identity::new("u1", "Student").as_author()
    }

    fn draft() -> PinDraft {
        PinDraft::new("Wet floor hall B", LatLng::new(43.2330, 0.0785), category_ids::DANGER)
    }

    #[test]
    fn test_huge_ttl_saturates_expiry() {
        let pin = Pin::new_private(draft(), author(), Duration::MAX).unwrap();
        assert_eq!(pin.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(!pin.is_expired());

        let record = NormalizedPinRecord {
            id: "7".to_string(),
            title: "t".to_string(),
            description: String::new(),
            category_id: "info".to_string(),
            lat: 1.0,
            lng: 1.0,
            author_id: "a".to_string(),
            author_name: "a".to_string(),
            created_at: Some(Utc::now()),
        };
        assert_eq!(
            Pin::from_record(&record, Duration::MAX).expires_at,
            DateTime::<Utc>::MAX_UTC
        );
    }

    #[test]
    fn test_private_pin_is_never_synced() {
        let pin = Pin::new_private(draft(), author(), Duration::hours(24)).unwrap();
        assert_eq!(pin.visibility(), Visibility::LocalOnly);
        assert!(!pin.is_synced());
        assert!(pin.server_id().is_none());
        assert!(pin.to_pending_write().is_none());
        assert_eq!(pin.expires_at - pin.created_at, Duration::hours(24));
    }

    #[test]
    fn test_collaborative_sync_transition_happens_once() {
        let mut pin = Pin::new_collaborative(draft(), author(), Duration::hours(24)).unwrap();
        assert!(pin.is_pending());
        assert!(!pin.is_synced());

        pin.mark_synced("42").unwrap();
        assert!(pin.is_synced());
        assert_eq!(pin.server_id(), Some("42"));

        // 不允许第二次确认，也不允许回退
        assert!(pin.mark_synced("43").is_err());
        assert_eq!(pin.server_id(), Some("42"));
        assert!(pin.is_synced());
    }

    #[test]
    fn test_shared_projection_is_read_only_and_synced() {
        let record = NormalizedPinRecord {
            id: "17".to_string(),
            title: "Free coffee".to_string(),
            description: String::new(),
            category_id: "nope".to_string(),
            lat: 43.22,
            lng: 0.05,
            author_id: "bob".to_string(),
            author_name: "bob".to_string(),
            created_at: None,
        };
        let mut pin = Pin::from_record(&record, Duration::hours(24));
        assert!(pin.is_synced());
        assert_eq!(pin.server_id(), Some("17"));
        assert_eq!(pin.category_id, category_ids::OTHER);
        assert!(pin.mark_synced("18").is_err());
    }

    #[test]
    fn test_draft_validation() {
        let blank = PinDraft::new("   ", LatLng::new(0.0, 0.0), "info");
        assert!(Pin::new_private(blank, author(), Duration::hours(1)).is_err());

        let bad_position = PinDraft::new("x", LatLng::new(f64::NAN, 0.0), "info");
        assert!(Pin::new_collaborative(bad_position, author(), Duration::hours(1)).is_err());

        let unknown_category = PinDraft::new("x", LatLng::new(1.0, 1.0), "???");
        let pin = Pin::new_private(unknown_category, author(), Duration::hours(1)).unwrap();
        assert_eq!(pin.category().id, category_ids::OTHER);
    }

    #[test]
    fn test_editable_by_author_or_security() {
        let pin = Pin::new_private(draft(), author(), Duration::hours(1)).unwrap();
        assert!(pin.is_editable_by(&Identity::new("u1", "Student")));
        assert!(!pin.is_editable_by(&Identity::new("u2", "Other")));
        assert!(pin.is_editable_by(&Identity::new("u3", "Guard").with_role(Role::Security)));
    }

    #[test]
    fn test_expiry_is_lazy_check() {
        let pin = Pin::new_private(draft(), author(), Duration::hours(1)).unwrap();
        assert!(!pin.is_expired());
        assert!(pin.is_expired_at(pin.created_at + Duration::hours(2)));
    }
}
