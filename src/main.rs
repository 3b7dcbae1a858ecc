// Main entry point for the JuriCast terminal player
// Wires configuration, logging, storage and the player together, then hands
// the terminal to the UI

use anyhow::Context;
use std::fs::File;
use std::sync::{Arc, Mutex};

use juricast::config::Config;
use juricast::player::{PlayerService, RodioHandle};
use juricast::store::{resolve_user_id, LocalStore, PodcastService, RestClient};
use juricast::ui::app::JuriCastApp;

const LOG_FILE: &str = "juricast.log";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Suppress ALSA error messages that pollute TUI
    std::env::set_var("ALSA_PCM_NO_MMAP", "1");

    let config = Config::load().context("failed to load configuration")?;
    let data_dir = config.data_dir()?;

    // The terminal belongs to the UI, so logs go to a file
    let log_path = data_dir.join(LOG_FILE);
    let log_file = File::create(&log_path)
        .with_context(|| format!("failed to create log file {}", log_path.display()))?;
    tracing_subscriber::fmt()
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .with_max_level(config.log_level())
        .init();
    tracing::info!(data_dir = %data_dir.display(), "starting juricast");

    let local = LocalStore::in_dir(&data_dir);
    let http = reqwest::Client::new();
    let user_id = resolve_user_id(&http, &config.ip_lookup_url, &local).await;

    let rest = match (&config.backend_url, &config.api_key) {
        (Some(url), Some(key)) => Some(RestClient::new(url, key).context("invalid backend configuration")?),
        _ => {
            tracing::warn!("no backend configured, running on local data only");
            None
        }
    };
    let catalog = Arc::new(PodcastService::new(rest, local, user_id));
    tracing::info!(user = catalog.user_id(), "listening identity resolved");

    let audio = RodioHandle::new();
    if !audio.has_device() {
        tracing::warn!("no audio output device, playback will be rejected");
    }
    let player = PlayerService::spawn(audio, Arc::clone(&catalog), config.player.clone());

    let mut app = JuriCastApp::new(player, catalog);
    app.run().await?;

    tracing::info!("bye");
    Ok(())
}
