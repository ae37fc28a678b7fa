use filescan_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    // Database, queue, worker pool and routes
    let app = filescan_api::setup::initialize_app(config.clone()).await?;

    filescan_api::setup::server::start_server(&config, app).await?;

    Ok(())
}
