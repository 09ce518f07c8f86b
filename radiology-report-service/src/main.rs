use radiology_report_service::{ServiceConfig, create_app};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// JSON logs by default, `LOG_FORMAT=pretty` for development.
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "radiology_report_service=debug,report_flow=debug,tower_http=debug".into()
    });

    match log_format.as_str() {
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e:#}");
            std::process::exit(1);
        }
    };
    info!(
        model = %config.model,
        protocol_library = %config.protocol_library.display(),
        "Configuration loaded"
    );

    let app = create_app(&config).await?;
    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    let addr = listener.local_addr()?;

    info!("Radiology Report Service starting on {}", addr);
    info!("API overview available at http://{}/", addr);
    info!("Start a case: POST http://{}/cases", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
