use clap::Parser;
use log::{error, info};
use server::coordinator::Coordinator;
use server::network::NetworkServer;

/// Main-method of the application.
/// Reads configuration from the environment, then runs the transport
/// accept loop and the coordinator until either stops or Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Address to bind to
        #[clap(long, env = "HOST", default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[clap(short, long, env = "PORT", default_value = "3001")]
        port: u16,
    }

    env_logger::init();
    let args = Args::parse();

    let (coordinator, events) = Coordinator::new();
    let server = NetworkServer::bind(&format!("{}:{}", args.host, args.port)).await?;

    let coordinator_handle = tokio::spawn(coordinator.run());
    let server_handle = tokio::spawn(server.run(events));

    tokio::select! {
        result = server_handle => {
            match result {
                Ok(Err(e)) => error!("Accept loop failed: {}", e),
                Err(e) => error!("Network task panicked: {}", e),
                _ => {}
            }
        }
        result = coordinator_handle => {
            if let Err(e) = result {
                error!("Coordinator task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
