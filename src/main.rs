//! Binary entry point for the replication bridge.

#[tokio::main]
async fn main() {
    if let Err(e) = posbridge::server::run().await {
        eprintln!("posbridge failed to start: {e:#}");
        std::process::exit(1);
    }
}
