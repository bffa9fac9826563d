use crate::application::session::SessionManager;
use crate::domain::error::LinkError;
use crate::domain::models::{AppEvent, ConnectionState, MessageSeverity, StatusMessage};
use crate::infrastructure::bluetooth::protocol::{CommandFrame, DeviceAction};
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error};

const HELP: &str = "\
Commands:
  connect                 search for a device and connect
  disconnect              end the session
  status                  show connection state
  feed|play|grow|kill     pet actions
  prev|next               menu navigation
  send <text>             send a raw frame
  settings                show the mirrored settings document
  pull                    re-read settings from the device
  tz [zone]               show or save the timezone
  zones                   list known timezones
  sync                    set the device clock now
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Connect,
    Disconnect,
    Status,
    Action(DeviceAction),
    Send(String),
    Settings,
    Pull,
    Timezone(Option<String>),
    Zones,
    Sync,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        if let Ok(action) = word.parse::<DeviceAction>() {
            return Ok(Self::Action(action));
        }

        match word.to_lowercase().as_str() {
            "connect" => Ok(Self::Connect),
            "disconnect" => Ok(Self::Disconnect),
            "status" => Ok(Self::Status),
            "send" if !rest.is_empty() => Ok(Self::Send(rest.to_string())),
            "send" => Err("send needs a frame".to_string()),
            "settings" => Ok(Self::Settings),
            "pull" => Ok(Self::Pull),
            "tz" | "timezone" if rest.is_empty() => Ok(Self::Timezone(None)),
            "tz" | "timezone" => Ok(Self::Timezone(Some(rest.to_string()))),
            "zones" => Ok(Self::Zones),
            "sync" => Ok(Self::Sync),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(format!("Unknown command: {other}")),
        }
    }
}

pub struct ConsoleApp {
    manager: SessionManager,
    events: mpsc::UnboundedReceiver<AppEvent>,
    connection_state: ConnectionState,
    status_message: Option<StatusMessage>,
}

impl ConsoleApp {
    pub fn new(manager: SessionManager, events: mpsc::UnboundedReceiver<AppEvent>) -> Self {
        Self {
            manager,
            events,
            connection_state: ConnectionState::Idle,
            status_message: None,
        }
    }

    /// Read commands from stdin until `quit` or end of input.
    pub async fn run(mut self) -> anyhow::Result<()> {
        println!("Mochi Link. Type `help` for commands.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut state_rx = self.manager.watch_state();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match line.parse::<ConsoleCommand>() {
                        Ok(ConsoleCommand::Quit) => break,
                        Ok(command) => self.execute(command).await,
                        Err(e) => println!("{e}"),
                    }
                    self.drain_events();
                }
                Some(event) = self.events.recv() => self.handle_event(event),
                Ok(()) = state_rx.changed() => {
                    if *state_rx.borrow_and_update() == ConnectionState::Idle {
                        self.manager.reap();
                    }
                }
            }
        }

        self.manager.disconnect().await;
        self.drain_events();
        Ok(())
    }

    async fn execute(&mut self, command: ConsoleCommand) {
        debug!("Console command: {:?}", command);
        match command {
            ConsoleCommand::Connect => {
                println!("Searching...");
                if let Err(e) = self.manager.connect().await {
                    error!("Connection failed: {}", e);
                }
            }
            ConsoleCommand::Disconnect => self.manager.disconnect().await,
            ConsoleCommand::Status => self.print_status(),
            ConsoleCommand::Action(action) => {
                let result = self.manager.send_action(action).await;
                report(result.map(|()| format!("Sent {}", action.as_str())));
            }
            ConsoleCommand::Send(text) => {
                let frame = CommandFrame::parse(&text);
                let result = self.manager.send(&frame).await;
                report(result.map(|()| format!("Sent {frame}")));
            }
            ConsoleCommand::Settings => match self.manager.settings_snapshot() {
                Some(doc) => println!("{}", doc.to_json()),
                None => println!("No settings mirrored"),
            },
            ConsoleCommand::Pull => {
                let result = self.manager.pull_settings().await;
                report(result.map(|doc| doc.to_json()));
            }
            ConsoleCommand::Timezone(None) => println!("{}", self.manager.current_timezone()),
            ConsoleCommand::Timezone(Some(zone)) => {
                match self.manager.save_timezone(&zone).await {
                    Ok(Some(sample)) => println!(
                        "Timezone {zone} saved, device clock set to {} ({:?})",
                        sample.epoch_seconds, sample.source
                    ),
                    Ok(None) => println!("Timezone {zone} saved"),
                    Err(e) => println!("Error: {e}"),
                }
            }
            ConsoleCommand::Zones => {
                for zone in self.manager.available_zones().await {
                    println!("{zone}");
                }
            }
            ConsoleCommand::Sync => {
                let result = self.manager.sync_time().await;
                report(result.map(|s| format!("Device clock set to {} ({:?})", s.epoch_seconds, s.source)));
            }
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Quit => {}
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::ConnectionStatus(state) => {
                self.connection_state = state;
                println!("[{state}]");
            }
            AppEvent::DeviceConnected(name) => println!("Device: {name}"),
            AppEvent::SettingsChanged { changed, .. } => {
                println!("Settings changed: {}", changed.join(", "));
            }
            AppEvent::TimeSynced(sample) => {
                println!("Clock synced: {} ({:?})", sample.epoch_seconds, sample.source);
            }
            AppEvent::LogMessage(msg) => {
                let tag = match msg.severity {
                    MessageSeverity::Info => "info",
                    MessageSeverity::Success => "ok",
                    MessageSeverity::Warning => "warn",
                    MessageSeverity::Error => "error",
                };
                println!("{tag}: {}", msg.message);
                self.status_message = Some(msg);
            }
        }
    }

    fn print_status(&self) {
        println!("State: {}", self.connection_state);
        if let Some(name) = self.manager.device_name() {
            println!("Device: {name}");
        }
        println!("Timezone: {}", self.manager.current_timezone());
        if let Some(msg) = &self.status_message {
            println!("Last message: {}", msg.message);
        }
    }
}

fn report(result: Result<String, LinkError>) {
    match result {
        Ok(text) => println!("{text}"),
        Err(LinkError::NotConnected) => println!("Not connected"),
        Err(e) => println!("Error: {e}"),
    }
}
