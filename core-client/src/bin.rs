use clap::Parser;
use keyprov_client::*;
use observability::telemetry::init_telemetry;

// CLI
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("Starting key provisioning client");

    // Parse command line arguments and configuration file
    let config = CmdConfig::parse();
    let conf = load_config(&config)?;

    let telemetry = match &conf.telemetry {
        Some(settings) => Some(init_telemetry(settings).await?),
        None => {
            if config.logs {
                setup_logging();
            }
            None
        }
    };

    let res = execute_cmd(&config, &conf).await;

    if let Some(guard) = telemetry {
        guard.shutdown();
    }

    let output = res?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
