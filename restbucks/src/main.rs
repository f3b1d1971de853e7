//! Restbucks HTTP server.
//!
//! # Usage
//!
//! ```bash
//! RESTBUCKS_PORT=8080 RESTBUCKS_PREPARATION_TIME_MS=5000 cargo run --bin restbucks
//! ```
//!
//! # Example Requests
//!
//! ```bash
//! # Place an order
//! curl -X POST http://localhost:8080/orders \
//!   -H "Content-Type: application/json" \
//!   -d '{"location": "TAKE_AWAY", "items": [{"name": "Latte", "quantity": 1, "milk": "SEMI", "size": "LARGE", "price": 450}]}'
//!
//! # Pay for it
//! curl -X PUT http://localhost:8080/orders/order-abc123/payment \
//!   -H "Content-Type: application/json" \
//!   -d '{"number": "1234123412341234"}'
//!
//! # Five seconds later, take it
//! curl -X DELETE http://localhost:8080/orders/order-abc123/receipt
//! ```

use restbucks::{Application, Config};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.server.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    restbucks_runtime::metrics::describe_metrics();
    info!(config = ?config, "=== Restbucks ===");

    let app = Application::build(config).await?;

    let address = app.config().bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(address = %address, "HTTP server listening");

    axum::serve(listener, app.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    app.shutdown().await?;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %error, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(error) => {
                tracing::error!(error = %error, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
