//! Scribe CLI
//!
//! 用法: scribe [--config path/to/config.toml] <query...>
//! 运行一个任务直到终态；成功时以 JSON 打印持久化记录，失败时打印错误详情并返回非零退出码。

use std::path::PathBuf;

use anyhow::{bail, Context};
use scribe::config::{load_config, AppConfig};
use scribe::observability;
use scribe::runtime::create_gateway;
use scribe::task::TaskStatus;

struct CliArgs {
    config: Option<PathBuf>,
    query: String,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut config = None;
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().context("--config requires a path")?;
                config = Some(PathBuf::from(path));
            }
            "--help" | "-h" => {
                println!("usage: scribe [--config <file>] <query...>");
                std::process::exit(0);
            }
            _ => words.push(arg),
        }
    }
    Ok(CliArgs {
        config,
        query: words.join(" "),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args = parse_args()?;
    let cfg = load_config(args.config).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let gateway = create_gateway(&cfg).await.context("Failed to create gateway")?;
    let created = gateway
        .create_task(&args.query)
        .await
        .context("Failed to create task")?;
    tracing::info!(task_id = %created.task_id, "waiting for pipeline");

    let status = tokio::select! {
        status = gateway.wait_for_terminal(&created.task_id) => status?,
        _ = tokio::signal::ctrl_c() => {
            gateway.shutdown();
            gateway.wait_for_terminal(&created.task_id).await?
        }
    };

    if status == TaskStatus::Done {
        let record = gateway.get_result(&created.task_id).await?;
        println!("{}", serde_json::to_string_pretty(&record)?);
        Ok(())
    } else {
        let task = gateway.get_task(&created.task_id).await?;
        bail!(
            "task {} failed: {}",
            task.id,
            task.error_detail.unwrap_or_else(|| "unknown error".to_string())
        )
    }
}
