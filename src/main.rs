//! lanwatch CLI
//!
//! ARP discovery, MITM interception and traffic monitoring on the local LAN.

use lanwatch::AppContext;

#[tokio::main]
async fn main() {
    if let Err(e) = lanwatch::logging::init_logging() {
        eprintln!("[WARN] Failed to initialize structured logging: {}", e);
    }

    let context = AppContext::from_env();
    if let Err(e) = lanwatch::run_with_ctrl_c(std::env::args(), &context).await {
        lanwatch::log_error!("{:#}", e);
        std::process::exit(1);
    }
}
