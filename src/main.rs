use std::sync::Arc;

use anyhow::Result;
use dotenv::dotenv;
use env_logger::Env;

use sevabot::config::Config;
use sevabot::poll::run_polling_loop;
use sevabot::relay::Relay;
use sevabot::transport::telegram::TelegramTransport;
use sevabot::upstream::HttpAnswerSource;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = Config::from_env()?;
    let transport = Arc::new(TelegramTransport::new(&config.telegram_token));
    let source = Arc::new(HttpAnswerSource::new(config.backend_url.clone()));
    let relay = Arc::new(Relay::new(transport.clone(), source, &config));

    log::info!("sevabot is running, backend at {}", config.backend_url);
    run_polling_loop(transport, relay).await;
    Ok(())
}
