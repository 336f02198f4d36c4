use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use args::{Args, Command};
use clap::Parser;
use config::Config;
use server::ServeConfig;

mod args;
mod bench;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args)?;

    let config = args.config()?;

    // reqwest and axum-server both pull rustls; pick one provider for the process.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    match args.command {
        Some(Command::LockBench {
            tasks,
            iterations,
            ref name,
            ttl,
            wait,
        }) => {
            let options = bench::Options {
                tasks,
                iterations,
                name: name.clone(),
                ttl,
                wait,
            };

            let report = bench::run(&config, options).await?;
            log::info!("{report}");

            if report.violations > 0 {
                std::process::exit(1);
            }
        }
        None => {
            if let Err(e) = server::serve(serve_config(&args, config)).await {
                log::error!("Server failed to start: {e}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn serve_config(args: &Args, config: Config) -> ServeConfig {
    let listen_address = args
        .listen_address
        .or(config.server.listen_address)
        .unwrap_or(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 8000)));

    ServeConfig { listen_address, config }
}
