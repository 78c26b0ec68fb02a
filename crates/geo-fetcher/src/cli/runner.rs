//! 命令执行器
//!
//! 执行各子命令并把结果以 JSON 打印到标准输出，日志写入标准错误。

use anyhow::{Context, Result, bail};
use questline_shared::{BatchSummary, InvalidateOutcome, Outcome};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use crate::Fetchers;
use crate::models::GeoPoint;

/// 命令执行器
pub struct CommandRunner {
    fetchers: Fetchers,
}

impl CommandRunner {
    pub fn new(fetchers: Fetchers) -> Self {
        Self { fetchers }
    }

    /// 执行 geocode 命令
    pub async fn run_geocode(&self, addresses: &[String]) -> Result<()> {
        if let [address] = addresses {
            let point = self.fetchers.geocoding.geocode(address).await?;
            return print_json(&json!({ "address": address, "point": point }));
        }

        let outcomes = self.fetchers.geocoding.geocode_many(addresses).await;
        report_batch(&outcomes)
    }

    /// 执行 reverse 命令
    pub async fn run_reverse(&self, lat: f64, lon: f64) -> Result<()> {
        let point = GeoPoint::new(lat, lon)?;
        let place = self.fetchers.geocoding.reverse(point).await?;
        print_json(&place)
    }

    /// 执行 weather 命令
    pub async fn run_weather(&self, lat: f64, lon: f64) -> Result<()> {
        let point = GeoPoint::new(lat, lon)?;
        let report = self.fetchers.weather.current(point).await?;
        print_json(&json!({
            "summary": report.summary(),
            "report": report,
        }))
    }

    /// 执行 invalidate 命令
    pub async fn run_invalidate(&self, pattern: &str) -> Result<()> {
        match self.fetchers.orchestrator.invalidate_pattern(pattern).await {
            InvalidateOutcome::Deleted(count) => {
                info!(pattern, count, "缓存已清除");
                print_json(&json!({ "pattern": pattern, "deleted": count }))
            }
            InvalidateOutcome::Unsupported => bail!("当前缓存后端不支持按前缀删除"),
            InvalidateOutcome::Failed => bail!("清除缓存失败: {pattern}"),
        }
    }
}

/// 打印逐项结果；存在失败项时返回错误
fn report_batch<T: Serialize>(outcomes: &[Outcome<T>]) -> Result<()> {
    let items: Vec<Value> = outcomes
        .iter()
        .map(|outcome| match &outcome.result {
            Ok(value) => json!({ "id": outcome.id, "ok": true, "value": value }),
            Err(e) => json!({ "id": outcome.id, "ok": false, "error": e.to_string(), "code": e.code() }),
        })
        .collect();
    print_json(&items)?;

    let summary = BatchSummary::from(outcomes);
    if summary.failed > 0 {
        bail!("{} / {} 项查询失败", summary.failed, summary.total);
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("序列化输出失败")?;
    println!("{rendered}");
    Ok(())
}
