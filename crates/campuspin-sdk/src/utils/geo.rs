//! 地理计算工具
//!
//! 纯函数，无隐藏状态。搜索排序、指南针叠加层和接近提醒共用同一套语义。

use crate::storage::entities::LatLng;

/// 地球平均半径（米）
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// 步行速度（km/h）
pub const WALK_SPEED_KMH: f64 = 5.0;

/// 大圆距离（haversine），单位米
pub fn haversine_distance(from: LatLng, to: LatLng) -> f64 {
    let phi1 = from.lat.to_radians();
    let phi2 = to.lat.to_radians();
    let d_phi = (to.lat - from.lat).to_radians();
    let d_lambda = (to.lng - from.lng).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_METERS * c
}

/// 初始方位角，0 = 正北，顺时针，范围 [0, 360)
pub fn bearing_degrees(from: LatLng, to: LatLng) -> f64 {
    let phi1 = from.lat.to_radians();
    let phi2 = to.lat.to_radians();
    let d_lambda = (to.lng - from.lng).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// 八方位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinal {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl Cardinal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cardinal::N => "N",
            Cardinal::NE => "NE",
            Cardinal::E => "E",
            Cardinal::SE => "SE",
            Cardinal::S => "S",
            Cardinal::SW => "SW",
            Cardinal::W => "W",
            Cardinal::NW => "NW",
        }
    }
}

/// 方位角映射到八个 45° 扇区
pub fn to_cardinal(bearing: f64) -> Cardinal {
    const SECTORS: [Cardinal; 8] = [
        Cardinal::N,
        Cardinal::NE,
        Cardinal::E,
        Cardinal::SE,
        Cardinal::S,
        Cardinal::SW,
        Cardinal::W,
        Cardinal::NW,
    ];
    let normalized = bearing.rem_euclid(360.0);
    let index = (normalized / 45.0).round() as usize % 8;
    SECTORS[index]
}

/// `"850 m"` 或 `"1.2 km"`
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{} m", meters.round() as i64)
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

/// 步行分钟数，至少 1 分钟
pub fn walk_minutes(meters: f64) -> u32 {
    let minutes = (meters / 1000.0) / WALK_SPEED_KMH * 60.0;
    (minutes.round() as u32).max(1)
}

/// 按与 `origin` 的距离升序排列，返回 (距离, 元素)
pub fn rank_by_distance<T, F>(origin: LatLng, items: Vec<T>, position_of: F) -> Vec<(f64, T)>
where
    F: Fn(&T) -> LatLng,
{
    let mut ranked: Vec<(f64, T)> = items
        .into_iter()
        .map(|item| (haversine_distance(origin, position_of(&item)), item))
        .collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
    ranked
}
