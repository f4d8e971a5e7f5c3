use std::{fmt::Write, io::BufRead, path::PathBuf, time::Duration};

use tokio::sync::mpsc::{self, error::TryRecvError, Sender, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{export::export_to_dir, session::Session, ControlCommand, MonitorEvent};

/// An operator command typed on stdin
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Led(ControlCommand),
    Export(Option<PathBuf>),
    Status,
    Help,
}

pub const HELP: &str = "commands: on | off | export [dir] | status | help";

impl Command {
    /// Parse one input line, None for blank lines, Err with the unknown word otherwise
    pub fn parse(line: &str) -> Option<Result<Command, String>> {
        let mut words = line.split_whitespace();
        let cmd = words.next()?;
        Some(match cmd.to_ascii_lowercase().as_str() {
            "on" | "led_on" => Ok(Command::Led(ControlCommand::LedOn)),
            "off" | "led_off" => Ok(Command::Led(ControlCommand::LedOff)),
            "export" | "csv" => Ok(Command::Export(words.next().map(PathBuf::from))),
            "status" | "s" => Ok(Command::Status),
            "help" | "?" => Ok(Command::Help),
            _ => Err(cmd.to_string()),
        })
    }
}

fn value(val: Option<f64>, unit: &str) -> String {
    match val {
        Some(v) => format!("{:.1}{}", v, unit),
        None => "-".to_string(),
    }
}

fn text(val: &Option<String>) -> &str {
    val.as_deref().unwrap_or("-")
}

/// Render the text panel for the current session
pub fn render(session: &Session) -> String {
    let last = &session.last;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "== IoT Smart Gudang == [{}]",
        if session.connected {
            "CONNECTED"
        } else {
            "DISCONNECTED"
        }
    );
    let _ = writeln!(
        out,
        "suhu {:>8} | kelembapan {:>8} | ldr {:>8}",
        value(last.temperature, " C"),
        value(last.humidity, " %"),
        value(last.ldr, "")
    );
    let _ = writeln!(
        out,
        "lampu {} | pintu {} | log {}",
        text(&last.light_status),
        text(&last.door_status),
        text(&last.log)
    );
    if session.has_model() || last.prediction.is_some() {
        let _ = writeln!(
            out,
            "prediksi {} (conf {})",
            text(&last.prediction),
            last.confidence
                .map(|c| format!("{:.2}", c))
                .unwrap_or_else(|| "-".to_string())
        );
    }
    let _ = write!(
        out,
        "rows {} | received {} | rejected {}",
        session.log.len(),
        session.received,
        session.rejected
    );
    if let Some(summary) = session.summary() {
        let _ = write!(
            out,
            " | suhu min {:.1} max {:.1} avg {:.1}",
            summary.min, summary.max, summary.mean
        );
    }
    if let Some(err) = &session.last_error {
        let _ = write!(out, "\nlast error: {}", err);
    }
    out
}

/// dashboard options, these are static immutable settings
#[derive(Debug, Clone)]
pub struct DashboardOptions {
    /// how often the queue is drained and the panel redrawn
    pub refresh: Duration,
    /// where `export` writes when no folder is given
    pub export_dir: PathBuf,
    /// read operator commands from stdin
    pub interactive: bool,
}

/// Owns the session, drains the event queue and takes operator commands
pub struct Dashboard {
    cancel_token: CancellationToken,
    event_rx: UnboundedReceiver<MonitorEvent>,
    control_tx: Sender<ControlCommand>,
    session: Session,
    opts: DashboardOptions,
}

impl Dashboard {
    pub fn new(
        cancel_token: CancellationToken,
        event_rx: UnboundedReceiver<MonitorEvent>,
        control_tx: Sender<ControlCommand>,
        session: Session,
        opts: DashboardOptions,
    ) -> Dashboard {
        Dashboard {
            cancel_token,
            event_rx,
            control_tx,
            session,
            opts,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Apply everything queued so far without waiting, returns the count applied
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.event_rx.try_recv() {
                Ok(event) => {
                    self.session.apply(event);
                    applied += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("Event queue closed");
                    break;
                }
            }
        }
        applied
    }

    /// Run one operator command, returns the text to show
    pub async fn handle(&mut self, cmd: Command) -> String {
        match cmd {
            Command::Led(led) => match self.control_tx.send(led).await {
                Ok(_) => format!("sent {}", led.payload()),
                Err(err) => {
                    warn!("Could not queue LED command: {}", err);
                    format!("could not send {}", led.payload())
                }
            },
            Command::Export(dir) => {
                let dir = dir.unwrap_or_else(|| self.opts.export_dir.clone());
                match export_to_dir(&self.session, &dir) {
                    Ok(path) => format!("exported {} rows to {}", self.session.log.len(), path.display()),
                    Err(err) => {
                        warn!("Export failed: {}", err);
                        format!("export failed: {}", err)
                    }
                }
            }
            Command::Status => render(&self.session),
            Command::Help => HELP.to_string(),
        }
    }

    /// Refresh loop, runs until cancelled
    pub async fn run(mut self) {
        let mut refresh = tokio::time::interval(self.opts.refresh);
        let (line_tx, mut line_rx) = mpsc::channel::<String>(16);
        let mut stdin_open = self.opts.interactive;
        if stdin_open {
            // blocking reader on its own thread so shutdown never waits on a pending read
            std::thread::spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    match line {
                        Ok(line) => {
                            if line_tx.blocking_send(line).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!("Could not read stdin: {}", err);
                            break;
                        }
                    }
                }
            });
            println!("{}", HELP);
        } else {
            drop(line_tx);
        }

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("Shutting down dashboard!");
                    break;
                },
                _ = refresh.tick() => {
                    if self.drain() > 0 {
                        println!("{}", render(&self.session));
                    }
                },
                line = line_rx.recv(), if stdin_open => {
                    let Some(line) = line else {
                        info!("stdin closed, commands disabled");
                        stdin_open = false;
                        continue;
                    };
                    // pick up anything queued before acting on the command
                    self.drain();
                    match Command::parse(&line) {
                        Some(Ok(cmd)) => {
                            let out = self.handle(cmd).await;
                            println!("{}", out);
                        }
                        Some(Err(word)) => println!("unknown command {:?}, {}", word, HELP),
                        None => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, Utc};
    use tokio::sync::mpsc;

    use super::*;
    use crate::Topics;

    fn dashboard(
        export_dir: PathBuf,
    ) -> (
        Dashboard,
        mpsc::UnboundedSender<MonitorEvent>,
        mpsc::Receiver<ControlCommand>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::channel(4);
        let session = Session::new(
            Topics::default(),
            100,
            FixedOffset::east_opt(7 * 3600).unwrap(),
            None,
        );
        (
            Dashboard::new(
                CancellationToken::new(),
                event_rx,
                control_tx,
                session,
                DashboardOptions {
                    refresh: Duration::from_millis(50),
                    export_dir,
                    interactive: false,
                },
            ),
            event_tx,
            control_rx,
        )
    }

    fn sensor(suffix: &str, payload: &str) -> MonitorEvent {
        MonitorEvent::Sensor {
            topic: format!("smuhsa/gudang/{}", suffix),
            payload: payload.to_string(),
            received: Utc::now(),
        }
    }

    #[test]
    fn parse_commands() {
        assert_eq!(
            Command::parse("ON"),
            Some(Ok(Command::Led(ControlCommand::LedOn)))
        );
        assert_eq!(
            Command::parse(" off "),
            Some(Ok(Command::Led(ControlCommand::LedOff)))
        );
        assert_eq!(
            Command::parse("export /tmp/out"),
            Some(Ok(Command::Export(Some(PathBuf::from("/tmp/out")))))
        );
        assert_eq!(Command::parse("export"), Some(Ok(Command::Export(None))));
        assert_eq!(Command::parse("   "), None);
        assert_eq!(Command::parse("blink"), Some(Err("blink".to_string())));
    }

    #[tokio::test]
    async fn drain_applies_in_order() {
        let (mut dash, event_tx, _control_rx) = dashboard(PathBuf::from("."));
        event_tx.send(MonitorEvent::Status(true)).unwrap();
        event_tx.send(sensor("suhu", "26")).unwrap();
        event_tx.send(sensor("suhu", "27")).unwrap();
        assert_eq!(dash.drain(), 3);
        assert_eq!(dash.drain(), 0);
        assert!(dash.session().connected);
        assert_eq!(dash.session().last.temperature, Some(27.0));
        assert_eq!(dash.session().log.len(), 2);
    }

    #[tokio::test]
    async fn led_commands_reach_control_channel() {
        let (mut dash, _event_tx, mut control_rx) = dashboard(PathBuf::from("."));
        assert_eq!(
            dash.handle(Command::Led(ControlCommand::LedOn)).await,
            "sent LED_ON"
        );
        dash.handle(Command::Led(ControlCommand::LedOff)).await;
        assert_eq!(control_rx.recv().await, Some(ControlCommand::LedOn));
        assert_eq!(control_rx.recv().await, Some(ControlCommand::LedOff));
    }

    #[tokio::test]
    async fn export_command_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let (mut dash, event_tx, _control_rx) = dashboard(dir.path().to_path_buf());
        event_tx.send(sensor("suhu", "26")).unwrap();
        dash.drain();
        let out = dash.handle(Command::Export(None)).await;
        assert!(out.starts_with("exported 1 rows"), "{}", out);
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn render_panel() {
        let mut session = Session::new(
            Topics::default(),
            10,
            FixedOffset::east_opt(0).unwrap(),
            None,
        );
        assert!(render(&session).contains("DISCONNECTED"));
        session.apply(MonitorEvent::Status(true));
        session.apply(sensor("suhu", "27.25"));
        session.apply(sensor("pintu", "TERBUKA"));
        let panel = render(&session);
        assert!(panel.contains("[CONNECTED]"));
        assert!(panel.contains("27.2 C") || panel.contains("27.3 C"));
        assert!(panel.contains("pintu TERBUKA"));
        assert!(panel.contains("rows 2"));
        assert!(!panel.contains("prediksi"));
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (dash, event_tx, _control_rx) = dashboard(PathBuf::from("."));
        let token = dash.cancel_token.clone();
        event_tx.send(sensor("suhu", "26")).unwrap();
        let handle = tokio::spawn(dash.run());
        tokio::time::sleep(Duration::from_millis(120)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("dashboard should stop")
            .unwrap();
    }
}
