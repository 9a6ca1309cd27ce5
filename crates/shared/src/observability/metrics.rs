//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册进度账本相关指标的描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "progress_activities_total",
        "Total number of recorded progress activities"
    );
    metrics::describe_counter!(
        "progress_points_awarded_total",
        "Total number of points awarded"
    );
    metrics::describe_counter!(
        "progress_badges_awarded_total",
        "Total number of badges awarded"
    );
    metrics::describe_counter!(
        "progress_streak_transitions_total",
        "Streak transitions by outcome"
    );
    metrics::describe_histogram!(
        "progress_operation_duration_seconds",
        "Ledger operation duration in seconds"
    );
    metrics::describe_counter!("progress_errors_total", "Ledger operation errors by code");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次活动入账
#[inline]
pub fn record_activity(kind: &str, points: i64) {
    metrics::counter!("progress_activities_total", "kind" => kind.to_string()).increment(1);
    if points > 0 {
        metrics::counter!("progress_points_awarded_total").increment(points as u64);
    }
}

/// 记录一次徽章授予
#[inline]
pub fn record_badge_awarded() {
    metrics::counter!("progress_badges_awarded_total").increment(1);
}

/// 记录连续天数状态迁移
#[inline]
pub fn record_streak_transition(transition: &str) {
    metrics::counter!(
        "progress_streak_transitions_total",
        "transition" => transition.to_string()
    )
    .increment(1);
}

/// 记录账本操作耗时与结果
#[inline]
pub fn record_operation(operation: &str, status: &str, duration_secs: f64) {
    metrics::histogram!(
        "progress_operation_duration_seconds",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .record(duration_secs);
}

/// 记录操作错误
#[inline]
pub fn record_error(operation: &str, code: &str) {
    metrics::counter!(
        "progress_errors_total",
        "operation" => operation.to_string(),
        "code" => code.to_string()
    )
    .increment(1);
}
