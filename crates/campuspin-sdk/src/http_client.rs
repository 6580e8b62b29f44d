//! HTTP 客户端模块 - `pins.php?action=` 后端的 RemoteClient 实现
//!
//! 所有请求都携带 Bearer token。响应可能被包装成 `{ success, data }`，
//! 也可能直接是数组。后端没有兴趣点接口，兴趣点使用内置的校园静态列表。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::category::Category;
use crate::error::{CampusPinError, Result};
use crate::remote_client::{normalize_list, unwrap_envelope, CreateAck, RemoteClient};
use crate::sdk::HttpClientConfig;
use crate::storage::entities::{NormalizedPinRecord, PendingWrite, PoiRecord};

/// 校园静态兴趣点
const CAMPUS_POIS: [(&str, &str, f64, f64); 14] = [
    ("poi_01", "Crelam", 43.22703, 0.048392),
    ("poi_02", "Parking Nord", 43.227675, 0.049267),
    ("poi_03", "Arrêt bus Université", 43.227823, 0.048714),
    ("poi_04", "GMP", 43.226631, 0.047813),
    ("poi_05", "GCCD", 43.226146, 0.047523),
    ("poi_06", "GEI", 43.22599, 0.048349),
    ("poi_07", "GEA", 43.226709, 0.049294),
    ("poi_08", "Gymnase", 43.224962, 0.050088),
    ("poi_09", "ENIT bât. C", 43.224907, 0.050822),
    ("poi_10", "ENIT bât. E", 43.22495, 0.051139),
    ("poi_11", "ENIT bât. D", 43.224563, 0.051364),
    ("poi_12", "ENIT bât. A", 43.225236, 0.051815),
    ("poi_13", "Restaurant Universitaire", 43.227522, 0.050914),
    ("poi_14", "ENIT bât. M", 43.223969, 0.049953),
];

pub fn campus_pois() -> Vec<PoiRecord> {
    CAMPUS_POIS
        .iter()
        .map(|(id, name, lat, lng)| PoiRecord {
            id: id.to_string(),
            name: name.to_string(),
            lat: *lat,
            lng: *lng,
        })
        .collect()
}

/// HTTP pin 客户端
#[derive(Debug, Clone)]
pub struct HttpPinClient {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpPinClient {
    /// 创建新的 HTTP 客户端
    pub fn new(config: &HttpClientConfig, base_url: &str, token: Option<String>) -> Result<Self> {
        let base_url = base_url.trim();
        if base_url.is_empty() {
            return Err(CampusPinError::Config("api_base_url 不能为空".to_string()));
        }

        let mut builder = Client::builder();
        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }
        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }
        let client = builder
            .build()
            .map_err(|e| CampusPinError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        let endpoint = pins_endpoint(base_url);
        info!("✅ HTTP 客户端已创建 (endpoint: {})", endpoint);

        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// 非 2xx 转为远端拒绝，否则解析 JSON
    async fn read_json(response: Response, action: &str) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "无法读取错误信息".to_string());
            error!("❌ {} 失败，HTTP 状态码: {}, 错误: {}", action, status, error_text);
            return Err(CampusPinError::rejected(status.as_u16(), error_text));
        }

        let body: Value = response.json().await?;
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let message = body
                .get("message")
                .or_else(|| body.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("success=false")
                .to_string();
            return Err(CampusPinError::RemoteRejection {
                status: Some(status.as_u16()),
                message,
            });
        }
        Ok(body)
    }
}

/// `https://host/path/` → `https://host/path/pins.php`
fn pins_endpoint(base_url: &str) -> String {
    format!("{}/pins.php", base_url.trim_end_matches('/'))
}

/// 创建请求体；作者字段使用显示名，分类使用后端命名
fn create_body(write: &PendingWrite) -> Value {
    json!({
        "title": write.title,
        "description": write.description,
        "category": Category::to_remote(&write.category_id),
        "latitude": write.position.lat,
        "longitude": write.position.lng,
        "author": write.author.display_name,
    })
}

/// 从创建响应中取出远端 id（`data.id` / `data.pin_id` / 顶层 `id`）
fn parse_create_ack(body: Value) -> CreateAck {
    let success = body.get("success").and_then(Value::as_bool).unwrap_or(true);
    let data = unwrap_envelope(body);
    let id = ["id", "pin_id"]
        .iter()
        .find_map(|key| match data.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_default();
    CreateAck { success, id }
}

#[async_trait]
impl RemoteClient for HttpPinClient {
    async fn list(&self) -> Result<Vec<NormalizedPinRecord>> {
        let request = self
            .client
            .get(&self.endpoint)
            .query(&[("action", "list")]);
        let response = self.authorized(request).send().await?;
        let body = Self::read_json(response, "list").await?;
        let records = normalize_list(body)?;
        debug!("远端返回 {} 个 pin", records.len());
        Ok(records)
    }

    async fn create(&self, write: &PendingWrite) -> Result<CreateAck> {
        let request = self
            .client
            .post(&self.endpoint)
            .query(&[("action", "create")])
            .json(&create_body(write));
        let response = self.authorized(request).send().await?;
        let body = Self::read_json(response, "create").await?;
        let ack = parse_create_ack(body);
        debug!("创建响应: local_id={}, ack={:?}", write.id, ack);
        Ok(ack)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let request = self
            .client
            .delete(&self.endpoint)
            .query(&[("action", "delete"), ("id", id)]);
        let response = self.authorized(request).send().await?;
        Self::read_json(response, "delete").await?;
        Ok(())
    }

    async fn list_pois(&self) -> Result<Vec<PoiRecord>> {
        Ok(campus_pois())
    }
}
