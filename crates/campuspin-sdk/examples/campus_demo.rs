//! CampusPin 离线优先同步演示
//!
//! CAMPUSPIN_API_URL=https://example.org/mytp/ CAMPUSPIN_TOKEN=xxx cargo run --example campus_demo

use campuspin_sdk::{
    CampusPinConfig, CampusPinSDK, Identity, LatLng, NetworkStatus, PinDraft, Visibility,
};
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let api_url = std::env::var("CAMPUSPIN_API_URL")?;
    let mut builder = CampusPinConfig::builder()
        .data_dir("/tmp/data/campuspin_demo")
        .identity(Identity::new("demo-student", "Demo"))
        .api_base_url(api_url)
        .poll_interval_secs(30);
    if let Ok(token) = std::env::var("CAMPUSPIN_TOKEN") {
        builder = builder.api_token(token);
    }

    let sdk = CampusPinSDK::initialize(builder.build()).await?;
    let mut events = sdk.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("📣 {:?}", event);
        }
    });

    sdk.start().await?;
    println!("共享 pin: {}", sdk.visible_shared_pins().len());

    // 离线状态只暂停调度器补发；创建仍会直接请求后端，
    // 后端不可达时 pin 才进入待发送队列，恢复在线后补发
    sdk.set_network_status(NetworkStatus::Offline).await;
    let pin = sdk
        .create_pin(
            PinDraft::new("Demo pin", LatLng::new(43.22703, 0.048392), "info"),
            Visibility::Shared,
        )
        .await?;
    println!("已创建 {} (pending: {})", pin.id, pin.is_pending());

    sdk.set_network_status(NetworkStatus::Online).await;
    sleep(Duration::from_secs(3)).await;
    println!("待发送: {}", sdk.pending_count()?);

    for alert in sdk.update_position(LatLng::new(43.22705, 0.048392)).await {
        println!("📍 {} 距离 {:.0} m", alert.title, alert.distance_meters);
    }

    sdk.shutdown().await;
    Ok(())
}
