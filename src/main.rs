use std::env;
use std::sync::Arc;

use spark_server::TracingFramework;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = env::args().skip(1);
    let cmd = args.next().unwrap_or_default();
    if cmd != "serve" {
        eprintln!("Usage: sparkbot serve --config <path>");
        std::process::exit(2);
    }

    let mut config_path = String::from("./config/example-config.yaml");
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(v) = args.next() {
                config_path = v;
            }
        }
    }

    let cfg = match spark_config::load_and_validate(&config_path) {
        Ok(v) => v,
        Err(e) => {
            error!(path = %config_path, "failed to load config: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = spark_server::serve_forever(cfg, Arc::new(TracingFramework)).await {
        error!("server exited with error: {e}");
        std::process::exit(1);
    }
}
