#[macro_use]
extern crate tracing;

use std::cell::RefCell;
use std::env;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use amlwin::backend::amlogic::{
    AmlContext, Amlogic, CapabilityRegistry, DisplayMessage, DisplayResource, StereoMode,
    SysfsCatalog, WindowRequest,
};
use amlwin::cli::{config_path, list_modes, Cli, ConfigPath, Sub};
use amlwin_config::Config;
use anyhow::Context;
use calloop::channel::{self, Channel};
use calloop::signals::{Signal, Signals};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, LoopHandle, LoopSignal, RegistrationToken};
use clap::Parser;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "amlwin=debug,amlwin_config=debug";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let directives = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_owned());
    let env_filter = EnvFilter::builder().parse_lossy(directives);
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .init();

    let cli = Cli::parse();

    let env_path = env::var_os("AMLWIN_CONFIG").map(PathBuf::from);
    let path = config_path(cli.config, env_path);

    match cli.subcommand {
        Some(Sub::Validate) => {
            let Some(path) = path else {
                return Err("no config path to validate".into());
            };
            Config::load(path.path())?;
            info!("config is valid");
            Ok(())
        }
        Some(Sub::ListModes { json }) => {
            let config = load_config(path.as_ref())?;
            let context = AmlContext::from_config(&config);
            let catalog = SysfsCatalog::new(context.sysfs);
            let out = list_modes(&catalog, config.video_screen.screen_mode(), json)?;
            print!("{out}");
            Ok(())
        }
        Some(Sub::Run) | None => {
            let config = load_config(path.as_ref())?;
            run(config, path)?;
            Ok(())
        }
    }
}

fn load_config(path: Option<&ConfigPath>) -> miette::Result<Config> {
    match path {
        Some(ConfigPath::Explicit(path)) => Config::load(path),
        Some(ConfigPath::Default(path)) if path.exists() => Config::load(path),
        Some(ConfigPath::Default(path)) => {
            info!("{path:?} does not exist, using the default config");
            Ok(Config::default())
        }
        None => {
            warn!("couldn't determine the config path, using the default config");
            Ok(Config::default())
        }
    }
}

struct State {
    amlogic: Amlogic,
    handle: LoopHandle<'static, State>,
    signal: LoopSignal,
    config_path: Option<ConfigPath>,
    reset_timer: Option<RegistrationToken>,
}

impl State {
    fn on_message(&mut self, message: DisplayMessage) {
        self.amlogic.on_message(message);
        self.queue_display_reset();
    }

    /// Arms a timer for the deferred display reset, if one is pending.
    fn queue_display_reset(&mut self) {
        if self.reset_timer.is_some() {
            return;
        }

        let Some(deadline) = self.amlogic.pending_reset_deadline() else {
            return;
        };

        let timer = Timer::from_deadline(deadline);
        let res = self.handle.insert_source(timer, |_, _, state| {
            state.amlogic.dispatch_pending_reset(Instant::now());

            // Another mode switch may have pushed the deadline back.
            match state.amlogic.pending_reset_deadline() {
                Some(deadline) => TimeoutAction::ToInstant(deadline),
                None => {
                    state.reset_timer = None;
                    TimeoutAction::Drop
                }
            }
        });

        match res {
            Ok(token) => self.reset_timer = Some(token),
            Err(err) => {
                warn!("error queueing the display reset, resetting now: {}", err.error);
                self.amlogic.dispatch_pending_reset(deadline);
            }
        }
    }

    fn reload_config(&mut self) {
        let _span = tracy_client::span!("State::reload_config");

        let config = match load_config(self.config_path.as_ref()) {
            Ok(config) => config,
            Err(err) => {
                warn!("error loading config: {err:?}");
                return;
            }
        };

        info!("reloaded config");
        self.amlogic.reload_config(config);
    }
}

fn run(config: Config, config_path: Option<ConfigPath>) -> anyhow::Result<()> {
    let _span = tracy_client::span!("run");

    let mut event_loop =
        EventLoop::<State>::try_new().context("error creating the event loop")?;
    let handle = event_loop.handle();

    let (sender, channel): (_, Channel<DisplayMessage>) = channel::channel();

    let context = AmlContext::from_config(&config);
    let config = Rc::new(RefCell::new(config));
    let mut amlogic = Amlogic::new(config, context, sender)?;

    amlogic.init(&mut LogCapabilities)?;
    amlogic.register(Arc::new(LogResource));
    amlogic.update_resolutions();

    if let Some(desktop) = amlogic.desktop() {
        let request = WindowRequest {
            mode: desktop.mode,
            fullscreen: true,
            stereo: StereoMode::Off,
        };
        amlogic
            .create_window(&request)
            .context("error creating the desktop window")?;
    } else {
        warn!("no desktop resolution, not creating a window");
    }

    handle
        .insert_source(channel, |event, _, state| {
            if let channel::Event::Msg(message) = event {
                state.on_message(message);
            }
        })
        .map_err(|err| err.error)
        .context("error inserting the display message channel")?;

    let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP])
        .context("error creating the signal source")?;
    handle
        .insert_source(signals, |event, _, state| match event.signal() {
            Signal::SIGHUP => state.reload_config(),
            signal => {
                info!("received {signal:?}, exiting");
                state.signal.stop();
            }
        })
        .map_err(|err| err.error)
        .context("error inserting the signal source")?;

    let mut state = State {
        amlogic,
        handle,
        signal: event_loop.get_signal(),
        config_path,
        reset_timer: None,
    };
    state.queue_display_reset();

    event_loop
        .run(None, &mut state, |_| ())
        .context("error running the event loop")?;

    state.amlogic.destroy_window();
    Ok(())
}

/// Logs what the backend provides; there is no media player to hand it to.
struct LogCapabilities;

impl CapabilityRegistry for LogCapabilities {
    fn register_video_codec(&mut self, name: &str) {
        info!("video codec available: {name}");
    }

    fn register_renderer(&mut self, name: &str) {
        info!("renderer available: {name}");
    }
}

struct LogResource;

impl DisplayResource for LogResource {
    fn on_lost_display(&self) {
        debug!("display lost");
    }

    fn on_reset_display(&self) {
        debug!("display reset");
    }
}
