//! resilience-demo: 用模拟的不稳定后端演示熔断、重试、回退与降级
//!
//! Usage:
//!   resilience-demo [--calls <n>] [--failure-rate <0..1>] [--config <path>]
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use ai_resilience::audit::TracingAuditSink;
use ai_resilience::{
    CallOptions, Error, ErrorCategory, ErrorContext, FallbackChain, ResilienceConfig,
    ResilienceOrchestrator,
};
use anyhow::Context;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct Args {
    calls: usize,
    failure_rate: f64,
    config: Option<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        calls: 50,
        failure_rate: 0.6,
        config: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(flag) = it.next() {
        match flag.as_str() {
            "--calls" => {
                let v = it.next().context("--calls needs a value")?;
                args.calls = v.parse().context("--calls must be an integer")?;
            }
            "--failure-rate" => {
                let v = it.next().context("--failure-rate needs a value")?;
                args.failure_rate = v.parse().context("--failure-rate must be a number")?;
            }
            "--config" => args.config = Some(it.next().context("--config needs a path")?),
            "help" | "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

fn print_usage() {
    println!(
        r#"resilience-demo: 弹性核心演示

USAGE:
    resilience-demo [OPTIONS]

OPTIONS:
    --calls <n>              Number of orchestrated calls (default 50)
    --failure-rate <0..1>    Probability the primary backend fails (default 0.6)
    --config <path>          YAML resilience config

ENVIRONMENT:
    RUST_LOG                 Log filter (default info)
    RESILIENCE_*             Config overrides, see ai_resilience::config"#
    );
}

async fn primary_backend(
    failure_rate: f64,
    params: serde_json::Value,
) -> ai_resilience::Result<String> {
    tokio::time::sleep(Duration::from_millis(5)).await;
    if rand::random::<f64>() < failure_rate {
        return Err(Error::transient_with_context(
            "connection reset by peer",
            ErrorContext::new()
                .with_source("primary_backend")
                .with_category(ErrorCategory::Network),
        ));
    }
    Ok(format!("gpu render {}", params))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => ResilienceConfig::from_yaml_file(path)?,
        None => ResilienceConfig::from_yaml_str(
            "circuit_breaker:\n  failure_threshold: 3\n  open_timeout_ms: 200\nretry:\n  max_attempts: 2\n  base_delay_ms: 10\n  max_delay_ms: 50\ndegradation:\n  min_dwell_ms: 100\n",
        )?,
    }
    .with_env_overrides()?;

    let orchestrator =
        ResilienceOrchestrator::from_config(&config)?.with_audit_sink(Arc::new(TracingAuditSink));

    let fallback = FallbackChain::builder()
        .then("cpu-backend", || async {
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok::<_, Error>("cpu render".to_string())
        })
        .build();

    let base = json!({ "width": 1024, "height": 1024, "steps": 30, "batch_size": 4 });
    let mut ok = 0usize;
    for i in 0..args.calls {
        let params = orchestrator.adjust_parameters(&base);
        let options = CallOptions::new()
            .with_circuit_breaker("sd-backend")
            .with_retry(orchestrator.default_retry_policy())
            .with_fallback(fallback.clone())
            .with_timeout(Duration::from_secs(2));
        let rate = args.failure_rate;
        match orchestrator
            .execute_with_resilience(|| primary_backend(rate, params.clone()), options)
            .await
        {
            Ok(out) => {
                ok += 1;
                tracing::debug!(call = i, output = %out, "call returned");
            }
            Err(e) => tracing::error!(call = i, error = %e, "call failed"),
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    println!("succeeded: {ok}/{}", args.calls);
    println!("{}", serde_json::to_string_pretty(&orchestrator.system_health())?);
    println!("{}", serde_json::to_string_pretty(&fallback.stats())?);
    println!("{}", serde_json::to_string_pretty(&orchestrator.analytics_report())?);
    Ok(())
}
