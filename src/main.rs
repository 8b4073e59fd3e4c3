use actix_web::{App, HttpServer, web};
use payment_orchestrator_rs::api;
use payment_orchestrator_rs::config::Settings;
use payment_orchestrator_rs::model::IpnRegistrationRequest;
use payment_orchestrator_rs::service::PaymentService;
use std::env;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    if env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load environment variables before anything reads them
    dotenv::dotenv().ok();
    init_tracing();

    info!("Payment orchestrator starting");

    let settings = match Settings::new() {
        Ok(s) => s,
        Err(e) => {
            error!("❌ Failed to load settings: {}", e);
            std::process::exit(1);
        }
    };

    let service = Arc::new(PaymentService::from_settings(&settings)?);

    match service.configured_credentials() {
        Ok(credentials) => {
            if let Some(url) = &settings.gateway.ipn_url {
                let spec = IpnRegistrationRequest {
                    url: url.clone(),
                    ipn_notification_type: settings.gateway.ipn_notification_type,
                };
                match service.register_ipn(&spec, credentials).await {
                    Ok(reg) => info!(ipn_id = ?reg.ipn_id, "✅ IPN endpoint registered"),
                    Err(e) => warn!("IPN registration failed: {}", e),
                }
            }
        }
        Err(e) => warn!("{}; payment calls will fail until credentials are set", e),
    }

    let bind_address = format!("0.0.0.0:{}", settings.server.port);
    info!("🚀 Starting API Server on {}", bind_address);

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .app_data(web::Data::new(service.clone()))
            .configure(api::config)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
