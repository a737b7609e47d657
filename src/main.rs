use std::sync::Arc;

use keystone::{
    config::Config,
    observability::{init_logging, log_config_info},
    runtime::signals,
    scheduler::{callback, ScheduleEntry},
    secrets::VaultConnector,
    Result, ServiceRuntime, APP_NAME, VERSION,
};
use tracing::{error, info};

fn install_rustls_provider() {
    use rustls::crypto::{ring, CryptoProvider};

    if CryptoProvider::get_default().is_none()
        && ring::default_provider().install_default().is_err()
    {
        eprintln!("Warning: another rustls crypto provider was installed concurrently");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    install_rustls_provider();

    // Load .env file if it exists (optional - won't fail if missing)
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let config = Config::from_env()?;
    init_logging(&config.logging)?;
    signals::install_panic_logger();

    info!(app_name = APP_NAME, version = VERSION, "Starting service runtime");
    log_config_info(&config);

    let connector = Arc::new(VaultConnector::new(config.secrets.vault.clone())?);
    let runtime = Arc::new(ServiceRuntime::new(config, connector));
    let _signals = signals::install(runtime.clone());

    // Nightly refresh so secrets written through `update` become visible.
    let secrets = runtime.secrets().clone();
    runtime.scheduler().push_schedule(ScheduleEntry::new(
        3,
        5,
        "Reload secrets",
        callback(move |_| {
            let secrets = secrets.clone();
            async move {
                secrets.open().await?;
                Ok(())
            }
        }),
    ));

    if let Err(e) = runtime.start().await {
        error!(error = %e, "Service failed to start");
        return Err(e);
    }
    runtime.scheduler().activate_schedules();

    runtime.wait_for_shutdown().await;
    runtime.scheduler().shutdown();
    info!("Service runtime stopped");
    Ok(())
}
