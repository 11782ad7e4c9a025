use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use compositor_ipc::{
    print_result_err, ChannelState, CommandChannel, EventType, HyprEvent, HyprlandClient, HyprlandCtl, HyprlandPaths, IpcClient,
    IpcConfig, StreamStatus, UiLoop,
};
use opts::{Action, ConnectionOpts, HyprAction};

mod opts;

fn main() {
    let opts: opts::Opt = opts::Opt::from_env();

    let log_level_filter = if opts.log_debug { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::init_timed();
    } else {
        pretty_env_logger::formatted_timed_builder()
            .filter(Some("barctl"), log_level_filter)
            .filter(Some("compositor_ipc"), log_level_filter)
            .init();
    }

    let result = match opts.action {
        Action::Call { command, payload } => opts.connection.ipc_config().and_then(|config| {
            let mut commands = CommandChannel::open(config).context("Failed to connect to the compositor")?;
            let reply = commands.call(command, &payload).with_context(|| format!("Failed to run {}", command))?;
            println!("{}", pretty_json(reply.text()?));
            Ok(())
        }),
        Action::Watch { events } => opts.connection.ipc_config().and_then(|config| watch(config, &events)),
        Action::Hypr(action) => hypr(action, &opts.connection),
    };

    if let Err(err) = result {
        log::error!("{:?}", err);
        std::process::exit(1);
    }
}

/// Pretty-print `text` if it is JSON, otherwise return it as is.
fn pretty_json(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .and_then(|value| serde_json::to_string_pretty(&value))
        .unwrap_or_else(|_| text.to_string())
}

/// Drive `ui` until SIGINT/SIGTERM arrives or `done` returns true.
fn run_until_signal(ui: &UiLoop, mut done: impl FnMut() -> bool) {
    let stop = Arc::new(AtomicBool::new(false));
    simple_signal::set_handler(&[simple_signal::Signal::Int, simple_signal::Signal::Term], {
        let stop = stop.clone();
        move |_| {
            log::info!("Shutting down barctl...");
            stop.store(true, Ordering::SeqCst);
        }
    });
    while !stop.load(Ordering::SeqCst) && !done() {
        ui.iteration(Some(Duration::from_millis(100)));
    }
}

fn log_status(status: StreamStatus) {
    match status {
        StreamStatus::Disconnected => log::warn!("Lost connection to the compositor"),
        StreamStatus::Reconnected => log::info!("Connection to the compositor is back"),
        StreamStatus::Closed => log::error!("Giving up on the compositor connection"),
    }
}

fn watch(config: IpcConfig, events: &[EventType]) -> Result<()> {
    let ui = UiLoop::new();
    let mut client = IpcClient::connect(config, events, &ui).context("Failed to subscribe to compositor events")?;
    client.on_any_event(|_, frame| {
        let name = match EventType::from_message_type(frame.message_type) {
            Some(event) => event.to_string(),
            None => frame.message_type.to_string(),
        };
        println!("{} {}", name, frame.text()?);
        Ok(())
    });
    client.on_status(|_, status| {
        log_status(status);
        Ok(())
    });

    run_until_signal(&ui, || client.status() == ChannelState::Closed);
    client.shutdown();
    Ok(())
}

fn hypr(action: HyprAction, connection: &ConnectionOpts) -> Result<()> {
    let paths = HyprlandPaths::from_env().context("Hyprland doesn't seem to be running")?;
    let ctl = HyprlandCtl::new(&paths.requests).with_timeout(connection.recv_timeout);
    match action {
        HyprAction::Request { message } => {
            let reply = ctl.request(&message).with_context(|| format!("Hyprland request {} failed", message))?;
            println!("{}", pretty_json(&reply));
        }
        HyprAction::Dispatch { dispatcher, args } => {
            ctl.dispatch(&dispatcher, &args.join(" ")).with_context(|| format!("Failed to dispatch {}", dispatcher))?;
        }
        HyprAction::Watch => {
            let ui = UiLoop::new();
            let config = connection.apply(IpcConfig::new(&paths.requests));
            let mut client = HyprlandClient::connect(paths, &config, &ui).context("Failed to connect to the Hyprland event socket")?;
            print_result_err!("while reading the active workspace", client.ctl().active_workspace().map(|ws| println!("workspace {} {}", ws.id, ws.name)));
            client.on_any_event(|_, event| {
                match event {
                    HyprEvent::Other { name, data } => println!("{} {}", name, data),
                    event => println!("{:?}", event),
                }
                Ok(())
            });
            client.on_status(|ctl, status| {
                log_status(status);
                if status == StreamStatus::Reconnected {
                    // events that happened while we were away are lost
                    let workspace = ctl.active_workspace()?;
                    println!("workspace {} {}", workspace.id, workspace.name);
                }
                Ok(())
            });

            run_until_signal(&ui, || client.status() == ChannelState::Closed);
            client.shutdown();
        }
    }
    Ok(())
}
