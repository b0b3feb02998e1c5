use std::time::Duration;

use clap::{Parser, Subcommand};
use config::settings;
use master_server::{app, reaper, Master};

#[derive(Parser, Debug)]
#[command(name = "flowmaster", author, version, about = "Lazy dataflow task scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the master's HTTP API and background threads (default).
    Server,
}

fn init_tracing() {
    let subscriber = tracing_subscriber::fmt::fmt().with_max_level(settings().logging.level);

    if let Some(output_file) = settings().logging.log_file.clone() {
        let file = std::fs::File::create(&output_file).expect("couldn't open log file");
        let subscriber = subscriber.with_writer(std::sync::Mutex::new(file)).finish();
        tracing::subscriber::set_global_default(subscriber).expect("couldn't set up tracing");
    } else {
        tracing::subscriber::set_global_default(subscriber.finish())
            .expect("couldn't set up tracing");
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Server) | None => {}
    }

    init_tracing();
    tracing::info!("tracing started");

    let master = std::sync::Arc::new(Master::new(
        settings().journal_root.clone(),
        &settings().scheduling,
    ));
    master.spawn_dispatcher_thread();

    let reaper_master = master.clone();
    reaper::spawn(
        master.worker_pool.clone(),
        Duration::from_secs(settings().scheduling.reap_period_secs),
        Duration::from_secs(settings().scheduling.heartbeat_threshold_secs),
        move || reaper_master.is_stopping(),
    );

    let bind_addr = settings().bind.to_socket_string();
    tracing::info!(addr = %bind_addr, "binding inbound RPC surface");

    let router = app::router(master.app_state());
    let addr: std::net::SocketAddr = bind_addr
        .parse()
        .unwrap_or_else(|e| panic!("invalid bind address {bind_addr}: {e}"));

    let shutdown_master = master.clone();
    let result = axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received shutdown signal");
            shutdown_master.stop();
        })
        .await;

    if let Err(e) = result {
        tracing::error!(error = %e, "server exited with error");
    }
    tracing::info!("clean exit");
}
