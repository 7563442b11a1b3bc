#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use llm_ratelimit_gateway::server;
use std::path::PathBuf;

/// Distributed LLM rate-limiting gateway.
#[derive(Parser)]
#[command(name = "llm-ratelimit-gateway", about = "Distributed LLM rate-limiting gateway")]
struct Cli {
    /// Path to gateway config file (TOML or JSON); falls back to defaults,
    /// overridable by `--port`/`--redis` and `GATEWAY_*` env vars.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Port the gateway listens on.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Counter store URL.
    #[arg(long, default_value = "redis://localhost:6379")]
    redis: String,

    /// Number of Tokio worker threads. 0 autodetects from the container's
    /// CPU quota, following the teacher's `runtime::get_container_cpu_limit`.
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Admin API listen address (health/metrics).
    #[arg(long, default_value = "0.0.0.0:9090")]
    admin_listen: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let worker_threads = if cli.workers > 0 {
        cli.workers
    } else {
        server::runtime::get_container_cpu_limit()
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(server::bootstrap::run(server::bootstrap::BootstrapArgs {
        config_path: cli.config,
        listen: format!("0.0.0.0:{}", cli.port),
        admin_listen: cli.admin_listen,
        port: cli.port,
        redis_override: Some(cli.redis),
    }))
}
