//! 时间处理工具模块
//!
//! - **存储层**: 时间字段统一为 UTC（`DateTime<Utc>` 或毫秒时间戳）
//! - **显示层**: 只给出相对时间的分类与数值
//! - **多语言**: 不包含硬编码文本，由应用层处理国际化

use chrono::{DateTime, Utc};

/// 当前 UTC 毫秒时间戳
pub fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// pin 的相对年龄
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeAge {
    /// 不到 1 分钟（包括未来时间）
    JustNow,
    Minutes(i64),
    Hours(i64),
    /// 不到 30 天
    Days(i64),
    Months(i64),
}

impl RelativeAge {
    pub fn between(then: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let minutes = (now - then).num_minutes();
        if minutes < 1 {
            return RelativeAge::JustNow;
        }
        if minutes < 60 {
            return RelativeAge::Minutes(minutes);
        }
        let hours = minutes / 60;
        if hours < 24 {
            return RelativeAge::Hours(hours);
        }
        let days = hours / 24;
        if days < 30 {
            return RelativeAge::Days(days);
        }
        RelativeAge::Months(days / 30)
    }

    pub fn since(then: DateTime<Utc>) -> Self {
        Self::between(then, Utc::now())
    }
}
