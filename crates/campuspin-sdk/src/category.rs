//! Pin 分类目录
//!
//! 分类是静态、只读的目录：启动时即可用，按 id 查找，未知 id 一律回退到 `other`。
//! 远端后端使用的分类名与本地 id 不完全一致，映射也集中在这里。

use serde::Serialize;

/// 已知分类 id 常量
pub mod category_ids {
    pub const DANGER: &str = "danger";
    pub const BREAKDOWN: &str = "breakdown";
    pub const INFO: &str = "info";
    pub const DEAL: &str = "deal";
    pub const SOCIAL: &str = "social";
    pub const NATURE: &str = "nature";
    pub const HELP: &str = "help";
    /// 回退分类
    pub const OTHER: &str = "other";
}

/// 分类条目
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Category {
    pub id: &'static str,
    pub display_name: &'static str,
    /// 标记颜色（#RRGGBB）
    pub color: &'static str,
    pub icon: &'static str,
    /// 标记的视觉缩放系数
    pub scale: f32,
    /// 紧急分类（驱动提醒横幅逻辑）
    pub urgent: bool,
}

static CATALOG: [Category; 8] = [
    Category {
        id: category_ids::DANGER,
        display_name: "Danger",
        color: "#D64045",
        icon: "⚠️",
        scale: 1.5,
        urgent: true,
    },
    Category {
        id: category_ids::BREAKDOWN,
        display_name: "Breakdown",
        color: "#E8A317",
        icon: "🔧",
        scale: 1.0,
        urgent: false,
    },
    Category {
        id: category_ids::INFO,
        display_name: "Info",
        color: "#0078B4",
        icon: "ℹ️",
        scale: 1.0,
        urgent: false,
    },
    Category {
        id: category_ids::DEAL,
        display_name: "Good deal",
        color: "#10997D",
        icon: "⭐",
        scale: 1.2,
        urgent: false,
    },
    Category {
        id: category_ids::SOCIAL,
        display_name: "Social",
        color: "#7B2D8B",
        icon: "👥",
        scale: 1.0,
        urgent: false,
    },
    Category {
        id: category_ids::NATURE,
        display_name: "Nature",
        color: "#2D6A4F",
        icon: "🌿",
        scale: 1.0,
        urgent: false,
    },
    Category {
        id: category_ids::HELP,
        display_name: "Help",
        color: "#FF6B6B",
        icon: "🆘",
        scale: 1.3,
        urgent: true,
    },
    Category {
        id: category_ids::OTHER,
        display_name: "Other",
        color: "#6C757D",
        icon: "📌",
        scale: 0.8,
        urgent: false,
    },
];

/// 回退分类在目录中的下标
const OTHER_INDEX: usize = 7;

impl Category {
    /// 全部分类（目录顺序）
    pub fn all() -> &'static [Category] {
        &CATALOG
    }

    /// 回退分类 `other`
    pub fn other() -> &'static Category {
        &CATALOG[OTHER_INDEX]
    }

    /// 按 id 查找，未知 id 返回 `other`
    pub fn by_id(id: &str) -> &'static Category {
        CATALOG
            .iter()
            .find(|c| c.id == id)
            .unwrap_or_else(Self::other)
    }

    /// 是否为已知分类 id
    pub fn is_known(id: &str) -> bool {
        CATALOG.iter().any(|c| c.id == id)
    }

    /// 将远端分类名映射为本地分类
    ///
    /// 后端沿用法语命名（`panne`、`bon-plan`、`aide`、`autre`），大小写与首尾空白忽略。
    pub fn from_remote(name: &str) -> &'static Category {
        let normalized = name.trim().to_ascii_lowercase();
        let id = match normalized.as_str() {
            "panne" => category_ids::BREAKDOWN,
            "bon-plan" | "bonplan" => category_ids::DEAL,
            "aide" => category_ids::HELP,
            "autre" => category_ids::OTHER,
            other => other,
        };
        Self::by_id(id)
    }

    /// 本地分类 id 映射为远端分类名
    pub fn to_remote(id: &str) -> &'static str {
        match Self::by_id(id).id {
            category_ids::BREAKDOWN => "panne",
            category_ids::DEAL => "bon-plan",
            category_ids::HELP => "aide",
            category_ids::OTHER => "autre",
            known => known,
        }
    }
}
