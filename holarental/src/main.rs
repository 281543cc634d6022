use clap::Parser;
use holarental::{Application, Config, config::Args, telemetry};
use tracing::{error, info};

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed never fires, so the
/// other one still shuts the server down.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = ctrl_c => "Ctrl+C",
        _ = terminate => "SIGTERM",
    };
    info!(signal = received, "Shutting down: draining requests and stopping the sweeper");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ZaloPay and Supabase clients use rustls
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("A rustls crypto provider was already installed"))?;

    let args = Args::parse();
    let config = Config::load(&args)?;

    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry(config.enable_otel_export)?;
    tracing::debug!(?args, "Parsed command line");

    if args.sweep_once {
        let report = holarental::sweep_now(&config).await;
        telemetry::shutdown_telemetry();
        let report = report?;
        println!(
            "Expired {} contracts ({} skipped), cancelled {} stale payments.",
            report.contracts_expired, report.contracts_skipped, report.payments_cancelled
        );
        return Ok(());
    }

    Application::new(config).await?.serve(shutdown_signal()).await
}
