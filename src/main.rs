//! ad-agent 命令行入口
//!
//! 用法：`ad-agent [--config <path>] [目标...]`，未给出目标时从标准输入读取一行。
//! 运行中需要补充信息时在终端提问，回答后继续同一次运行。

use std::path::PathBuf;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use ad_agent::config::load_config;
use ad_agent::core::{OrchestratorBuilder, RunOutcome};
use ad_agent::observability;

struct Args {
    config: Option<PathBuf>,
    objective: String,
}

fn parse_args() -> anyhow::Result<Args> {
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
                println!("Usage: ad-agent [--config <path>] [objective...]");
                std::process::exit(0);
            }
            _ => words.push(arg),
        }
    }
    Ok(Args {
        config,
        objective: words.join(" "),
    })
}

async fn read_line(
    lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>,
    prompt: &str,
) -> anyhow::Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(prompt.as_bytes()).await?;
    stdout.flush().await?;
    match lines.next_line().await? {
        Some(line) => Ok(line.trim().to_string()),
        None => bail!("stdin closed"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args = parse_args()?;
    let config = load_config(args.config).context("Failed to load config")?;
    tracing::info!(app = config.app.name.as_deref().unwrap_or("ad-agent"), "config loaded");

    let orchestrator = OrchestratorBuilder::new(config)
        .build()
        .await
        .context("Failed to build orchestrator")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let objective = if args.objective.trim().is_empty() {
        read_line(&mut lines, "目标> ").await?
    } else {
        args.objective
    };
    if objective.is_empty() {
        bail!("empty objective");
    }

    let mut outcome = orchestrator.start(&objective).await?;
    loop {
        match outcome {
            RunOutcome::Completed(status) => {
                println!("{}", status.result);
                break;
            }
            RunOutcome::Suspended { status, interrupt } => {
                let answer = match read_line(&mut lines, &interrupt.interrupt_value).await {
                    Ok(answer) => answer,
                    Err(e) => {
                        orchestrator.abandon(&status.plan_id).await?;
                        return Err(e);
                    }
                };
                outcome = orchestrator.resume(&status.plan_id, &answer).await?;
            }
        }
    }
    Ok(())
}
