//! SDK 版本与运行时元信息
//!
//! - **SDK Version** → Cargo.toml（唯一权威源）
//! - **Cache Schema Version** → 本模块，写入 LocalCache 的 `__schema_version` 键
//! - **Runtime Metadata** → 本模块

/// SDK semver，来自 Cargo.toml
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// git commit（由 vergen 在 build.rs 中生成）
pub const GIT_SHA: &str = match option_env!("VERGEN_GIT_SHA") {
    Some(sha) => sha,
    None => "unknown",
};

/// build time（由 vergen 在 build.rs 中生成）
pub const BUILD_TIME: &str = match option_env!("VERGEN_BUILD_TIMESTAMP") {
    Some(ts) => ts,
    None => "unknown",
};

/// 本地缓存布局版本。
///
/// 持久化键（`shared_pins_cache`、`pending_pins` 等）的 JSON 形状变化时递增。
/// 打开缓存时若磁盘上的版本高于此值则拒绝打开（防 downgrade 读坏数据）。
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// 运行时元信息摘要，便于日志输出
pub fn version_summary() -> String {
    format!(
        "campuspin-sdk {} (git {}, built {}, cache schema v{})",
        SDK_VERSION, GIT_SHA, BUILD_TIME, CACHE_SCHEMA_VERSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_summary_contains_semver() {
        let summary = version_summary();
        assert!(summary.contains(SDK_VERSION));
        assert!(summary.contains("cache schema v1"));
    }
}
