//! AV Room Control
//!
//! Runs one room on simulated hardware, driven from an operator console on stdin.

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use av_room_control::bus::{AdminCommand, RoomEvent, SystemLifecycle};
use av_room_control::cloud::{CloudLink, RemoteEvent};
use av_room_control::config::{self, ConfigStore, Settings};
use av_room_control::console::{self, ConsoleCommand};
use av_room_control::devices::simulated::{RecordingSurface, SimulatedCloudSlot, SimulatedDevices};
use av_room_control::logging::{self, LogLevel, LogLevelSwitch};
use av_room_control::panel::{PanelLink, PanelSignal};
use av_room_control::{RoomDevices, RoomHandle, RoomOrchestrator};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;

/// Address of the simulated cloud slot
const CLOUD_SLOT_ADDRESS: u32 = 0xf0;

/// Depth of the simulated hardware signal queues
const SIGNAL_QUEUE_CAPACITY: usize = 32;

#[tokio::main]
async fn main() -> Result<()> {
    let log_switch = logging::init(LogLevel::Information)?;

    tracing::info!(
        "Starting AV Room Control v{} ({})",
        env!("ROOM_VERSION"),
        env!("ROOM_GIT_SHA")
    );

    let settings = config::load_settings()?;
    if let Some(reply) = log_switch.apply_configured(&settings.log_level) {
        tracing::debug!("{}", reply);
    }

    let (panel_tx, panel_rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
    let (cloud_tx, cloud_rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
    let devices = RoomDevices {
        factory: Arc::new(SimulatedDevices::new()),
        panel: PanelLink {
            surface: Arc::new(RecordingSurface::new(settings.panel.address)),
            signals: panel_rx,
        },
        cloud: Some(CloudLink {
            slot: Arc::new(SimulatedCloudSlot::new(CLOUD_SLOT_ADDRESS)),
            events: cloud_rx,
        }),
    };

    let mut setup = tokio::spawn(setup_room(settings.clone(), devices));
    let mut setup_pending = true;
    let mut room: Option<RoomHandle> = None;

    let operator = Console {
        panel: panel_tx,
        cloud: cloud_tx,
        log_switch,
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    println!("{}", console::HELP);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            result = &mut setup, if setup_pending => {
                setup_pending = false;
                room = match result {
                    Ok(room) => room,
                    Err(e) => {
                        tracing::error!("Room setup task failed: {}", e);
                        None
                    }
                };
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if operator.execute(&line, room.as_ref()).await.is_break() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Console closed, running until signalled");
                        stdin_open = false;
                    }
                    Err(e) => {
                        tracing::warn!("Console read failed: {}", e);
                        stdin_open = false;
                    }
                }
            }
        }
    }

    if setup_pending {
        tracing::warn!("Room setup still running at shutdown, abandoning");
        setup.abort();
    }

    if let Some(room) = room {
        if let Err(e) = room.stop().await {
            tracing::error!("Room task ended abnormally: {}", e);
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Load the room configuration and start the room. Returns None if the room
/// can't be configured; the process stays up for the operator.
///
/// Config file access and endpoint registration are synchronous, so both run
/// on a blocking worker.
async fn setup_room(settings: Settings, devices: RoomDevices) -> Option<RoomHandle> {
    let path: PathBuf = settings.room_config_path();

    let started = tokio::task::spawn_blocking(move || {
        let config = ConfigStore::new().load(path)?;
        RoomOrchestrator::start(config, devices, &settings)
    })
    .await;

    match started {
        Ok(Ok(room)) => {
            tracing::info!("Room is running");
            Some(room)
        }
        Ok(Err(e)) => {
            tracing::error!("Room not configured: {}", e);
            None
        }
        Err(e) => {
            tracing::error!("Room setup task failed: {}", e);
            None
        }
    }
}

/// Injects console commands into the simulated hardware and the room
struct Console {
    panel: mpsc::Sender<PanelSignal>,
    cloud: mpsc::Sender<RemoteEvent>,
    log_switch: LogLevelSwitch,
}

impl Console {
    async fn execute(&self, line: &str, room: Option<&RoomHandle>) -> ControlFlow<()> {
        let command = match console::parse_command(line) {
            Ok(command) => command,
            Err(console::ParseError::Empty) => return ControlFlow::Continue(()),
            Err(e) => {
                println!("{} (try 'help')", e);
                return ControlFlow::Continue(());
            }
        };

        match command {
            ConsoleCommand::Press(join) => {
                self.signal(PanelSignal::Digital { join, value: true }).await
            }
            ConsoleCommand::Release(join) => {
                self.signal(PanelSignal::Digital { join, value: false })
                    .await
            }
            ConsoleCommand::Level(join, value) => {
                self.signal(PanelSignal::Analog { join, value }).await
            }
            ConsoleCommand::RoomName(name) => self.remote(RemoteEvent::RoomName(name)).await,
            ConsoleCommand::Online(online) => self.remote(RemoteEvent::Online(online)).await,
            ConsoleCommand::SystemCheck => self.remote(RemoteEvent::SystemCheckRequested).await,
            ConsoleCommand::ClearSystemCheck => {
                room_event(room, RoomEvent::Admin(AdminCommand::ClearSystemCheck)).await
            }
            ConsoleCommand::Pause => {
                room_event(room, RoomEvent::Lifecycle(SystemLifecycle::Pausing)).await
            }
            ConsoleCommand::Resume => {
                room_event(room, RoomEvent::Lifecycle(SystemLifecycle::Resuming)).await
            }
            ConsoleCommand::Status => match room {
                Some(room) => {
                    let snapshot = room.snapshot();
                    match serde_json::to_string_pretty(&snapshot) {
                        Ok(json) => println!("{}", json),
                        Err(e) => println!("Cannot render status: {}", e),
                    }
                    room_event(Some(room), RoomEvent::Admin(AdminCommand::ReportStatus)).await
                }
                None => println!("Room not configured"),
            },
            ConsoleCommand::SetLogLevel(level) => println!("{}", self.log_switch.set_named(&level)),
            ConsoleCommand::Help => println!("{}", console::HELP),
            ConsoleCommand::Quit => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    async fn signal(&self, signal: PanelSignal) {
        if self.panel.send(signal).await.is_err() {
            println!("Panel is not running");
        }
    }

    async fn remote(&self, event: RemoteEvent) {
        if self.cloud.send(event).await.is_err() {
            println!("Cloud connector is not running");
        }
    }
}

async fn room_event(room: Option<&RoomHandle>, event: RoomEvent) {
    match room {
        Some(room) => {
            if !room.events().publish(event).await {
                println!("Room is not running");
            }
        }
        None => println!("Room not configured"),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
