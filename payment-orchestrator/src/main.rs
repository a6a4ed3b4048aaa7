use payment_orchestrator::{config::Config, Application};
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(
        &config.service_name,
        &config.observability.log_level,
        config.observability.otlp_endpoint.as_deref(),
    )?;

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
