#[tokio::main]
async fn main() {
    if let Err(e) = wx200_bridge_lib::run().await {
        eprintln!("wx200-bridge: {}", e);
        std::process::exit(1);
    }
}
