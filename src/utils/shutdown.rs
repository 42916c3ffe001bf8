#![forbid(unsafe_code)]

use log::{error, info};
use tokio::signal;

// ---------------------------------------------------------------------------
// shutdown_signal:
// ---------------------------------------------------------------------------
/** Resolve when the process receives Ctrl-C or, on unix, SIGTERM.  Poem
 * stops accepting connections once this future completes and then drains
 * in-flight requests.
 *
 * If a handler cannot be installed we log it and wait on the other one.
 */
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Unable to install the Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Unable to install the SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down greeter_server."),
        _ = terminate => info!("Received SIGTERM, shutting down greeter_server."),
    }
}
