pub mod ai;
pub mod capture;
pub mod config;
pub mod session;

use anyhow::Context;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

use ai::openai::OpenAiGateway;
use capture::listener::{self, ListenerExit};
use capture::screen::PrimaryMonitor;
use capture::trigger::CaptureTrigger;
use config::{ApiKey, AppConfig};
use session::conversation::{Conversation, LoopState, LoopStateHandle};

/// Everything `run` needs before the keyboard listener starts.
pub struct Startup {
    pub config: AppConfig,
    pub gateway: OpenAiGateway,
    pub trigger: CaptureTrigger,
}

/// Resolves the credential first, so a missing key fails before the config
/// directory is touched or a client exists.
pub fn startup(api_key: Option<String>, config_dir: &Path) -> anyhow::Result<Startup> {
    let api_key = ApiKey::resolve(api_key)?;

    let config = AppConfig::load(config_dir);
    log::debug!("Loaded config from {}", config_dir.display());

    let trigger = CaptureTrigger::from_config(&config)?;
    let gateway = OpenAiGateway::new(&config, api_key)?;
    Ok(Startup {
        config,
        gateway,
        trigger,
    })
}

pub fn run() -> anyhow::Result<()> {
    env_logger::init();

    let startup = startup(
        std::env::var(config::API_KEY_VAR).ok(),
        &config::config_dir(),
    )?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let result = runtime.block_on(serve(startup));
    // Stdin reads sit on a blocking thread that never returns on its own.
    runtime.shutdown_background();
    result
}

async fn serve(startup: Startup) -> anyhow::Result<()> {
    let Startup {
        config: app_config,
        gateway,
        trigger,
    } = startup;

    std::fs::create_dir_all(&app_config.screenshots_dir).with_context(|| {
        format!(
            "Failed to create {}",
            app_config.screenshots_dir.display()
        )
    })?;

    let state: LoopStateHandle = Arc::new(Mutex::new(LoopState::Idle));
    let chord = trigger.chord().to_string();
    let handles =
        listener::spawn(trigger, state.clone()).context("Failed to start keyboard listener")?;

    println!(
        "Press '{}' to take a screenshot and analyze it. Press '{}' to quit.",
        chord, app_config.cancel_key
    );
    log::info!(
        "Vision model: {}, fast model: {}",
        app_config.vision_model,
        app_config.fast_model
    );

    let mut conversation = Conversation::new(
        Arc::new(gateway),
        Box::new(PrimaryMonitor),
        &app_config,
        state,
        tokio::io::BufReader::new(tokio::io::stdin()),
        std::io::stdout(),
    );

    match conversation.run(handles.signals, handles.exit).await? {
        ListenerExit::Cancelled => {
            println!("Stopped.");
            Ok(())
        }
        ListenerExit::Failed(reason) => anyhow::bail!("Keyboard listener stopped: {}", reason),
    }
}
