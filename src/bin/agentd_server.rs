use anyhow::Result;
use std::path::PathBuf;

use agentd::config::Config;
use agentd::dispatch::Dispatcher;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("AGENTD_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = std::env::var_os("AGENTD_CONFIG").map(PathBuf::from);
    let cfg = Config::load(config_path.as_deref())?;
    let bind = args.get(1).cloned().unwrap_or_else(|| cfg.server.bind.clone());

    let dispatcher = Dispatcher::from_config(&cfg)?;
    eprintln!("agentd-server listening on http://{bind}");
    agentd::server::run_server(&bind, cfg.server.workers, dispatcher)
}
