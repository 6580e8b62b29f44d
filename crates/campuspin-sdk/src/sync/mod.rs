/// 共享 pin 同步模块
///
/// 职责：
/// - 缓存优先展示，随后后台刷新（整体替换快照，不做字段合并）
/// - 乐观写入，失败入队，周期/事件触发补发
/// - 单飞（single-flight）刷新，重叠的触发合并为一个周期
/// - 周期调度与网络恢复触发
pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::SyncOrchestrator;
pub use scheduler::SyncScheduler;

/// 共享 pin 集合的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CollectionState {
    /// 尚未展示任何数据
    Empty,
    /// 正在展示本地快照
    CacheShown,
    /// 正在拉取远端
    Reconciling,
    /// 展示的是最近一次成功拉取的结果
    Reconciled,
}

/// 本轮展示数据的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReconcileSource {
    /// 远端拉取成功
    Remote,
    /// 远端失败，继续展示缓存
    Cache,
}

/// 一次刷新周期的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub source: ReconcileSource,
    /// 周期结束时的状态
    pub state: CollectionState,
    /// 展示集合中的 pin 数
    pub count: usize,
    /// 拉取结果中不在之前展示集合里的 id；之前没有展示集合时为空
    pub new_ids: Vec<String>,
    /// 本次触发合并到了另一个已完成的周期
    pub coalesced: bool,
}

impl ReconcileOutcome {
    pub fn is_remote(&self) -> bool {
        self.source == ReconcileSource::Remote
    }

    pub(crate) fn into_coalesced(mut self) -> Self {
        self.coalesced = true;
        self
    }
}
