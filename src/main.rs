#[tokio::main]
async fn main() {
    if let Err(e) = deskpilot::run().await {
        tracing::error!(error = %e, "deskpilot exited with error");
        eprintln!("deskpilot: {e}");
        std::process::exit(1);
    }
}
