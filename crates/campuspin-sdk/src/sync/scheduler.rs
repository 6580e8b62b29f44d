//! 同步调度器
//!
//! 一个 `select!` 循环驱动全部触发源：
//! - 周期 tick：轮询刷新，退避期满后补发待发送队列
//! - 网络恢复：重置退避并立即补发
//! - 手动触发
//! - 关闭信号

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::select;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{CampusPinError, Result};
use crate::events::{EventManager, PinEvent};
use crate::network::{NetworkMonitor, NetworkStatusEvent};
use crate::storage::queue::{FailureReason, RetryBackoff, RetryPolicy};
use crate::sync::SyncOrchestrator;

pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    network_monitor: Arc<NetworkMonitor>,
    events: Arc<EventManager>,
    poll_interval: Duration,
    retry_policy: RetryPolicy,
    trigger_signal: Arc<Notify>,
    shutdown_signal: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        network_monitor: Arc<NetworkMonitor>,
        events: Arc<EventManager>,
        poll_interval: Duration,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            orchestrator,
            network_monitor,
            events,
            poll_interval,
            retry_policy,
            trigger_signal: Arc::new(Notify::new()),
            shutdown_signal: Arc::new(Notify::new()),
            task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    /// 启动调度循环；第一次 tick 立即执行
    pub fn start(&self) -> Result<()> {
        let mut task = self.task.lock();
        if task.as_ref().map_or(false, |t| !t.is_finished()) {
            return Err(CampusPinError::InvalidOperation(
                "Sync scheduler already running".to_string(),
            ));
        }

        info!("启动同步调度器: poll_interval={:?}", self.poll_interval);
        let worker = SchedulerLoop {
            orchestrator: self.orchestrator.clone(),
            network_monitor: self.network_monitor.clone(),
            events: self.events.clone(),
            backoff: RetryBackoff::new(self.retry_policy.clone()),
        };
        // 在返回前订阅，避免错过启动后立即发生的状态变化
        let network_events = self.network_monitor.subscribe();
        *task = Some(tokio::spawn(worker.run(
            self.poll_interval,
            network_events,
            self.trigger_signal.clone(),
            self.shutdown_signal.clone(),
        )));
        Ok(())
    }

    /// 立即执行一次补发 + 刷新
    pub fn trigger_now(&self) {
        self.trigger_signal.notify_one();
    }

    /// 停止调度循环并等待退出
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            self.shutdown_signal.notify_one();
            if let Err(e) = task.await {
                error!("同步调度器退出异常: {}", e);
            }
            info!("同步调度器已停止");
        }
    }
}

struct SchedulerLoop {
    orchestrator: Arc<SyncOrchestrator>,
    network_monitor: Arc<NetworkMonitor>,
    events: Arc<EventManager>,
    backoff: RetryBackoff,
}

impl SchedulerLoop {
    #[instrument(skip_all)]
    async fn run(
        mut self,
        poll_interval: Duration,
        mut network_events: broadcast::Receiver<NetworkStatusEvent>,
        trigger: Arc<Notify>,
        shutdown: Arc<Notify>,
    ) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = ticker.tick() => {
                    self.orchestrator.poll_refresh().await;
                    if self.backoff.can_retry_now() {
                        self.drain().await;
                    } else {
                        debug!("退避中，跳过本次补发");
                    }
                }
                event = network_events.recv() => {
                    match event {
                        Ok(event) => {
                            let online = event.new_status.is_connected();
                            self.events.emit(PinEvent::NetworkChanged { online }).await;
                            if event.is_reconnect() {
                                info!("📶 网络恢复，立即补发待发送队列");
                                self.backoff.reset();
                                self.drain().await;
                                self.orchestrator.load_shared().await;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("网络事件积压，跳过 {} 条", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                _ = trigger.notified() => {
                    debug!("手动触发同步");
                    self.backoff.reset();
                    self.drain().await;
                    self.orchestrator.load_shared().await;
                }
                _ = shutdown.notified() => break,
            }
        }
        debug!("同步调度循环退出");
    }

    async fn drain(&mut self) {
        if !self.network_monitor.check_connection().await {
            debug!("离线，跳过补发");
            return;
        }
        match self.orchestrator.pending_count() {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                error!("读取待发送队列失败: {}", e);
                return;
            }
        }

        match self.orchestrator.sync_pending().await {
            Ok(report) => match report.failure {
                Some(reason) => {
                    let delay = self.backoff.record_failure(&reason);
                    info!(
                        "补发未完成: 剩余={}, {:?} 后重试 (attempt {})",
                        report.remaining,
                        delay,
                        self.backoff.attempts()
                    );
                }
                None => self.backoff.reset(),
            },
            Err(e) => {
                error!("补发待发送队列失败: {}", e);
                self.backoff.record_failure(&FailureReason::from(&e));
            }
        }
    }
}
