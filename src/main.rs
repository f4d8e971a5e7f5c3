use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use chrono::FixedOffset;
use clap::{builder::RangedU64ValueParser, Parser};
use gudang_monitor::{
    classifier::load_model,
    dashboard::{Dashboard, DashboardOptions},
    mqtt_handler::{BrokerTransport, MqttProcessor, MqttProcessorOptions, DEFAULT_RETRY_DELAY},
    session::{Session, DEFAULT_LOG_CAPACITY},
    ControlCommand, MonitorEvent, Topics, DEFAULT_TOPIC_PREFIX,
};
use rumqttc::v5::AsyncClient;
use tokio::{signal, sync::mpsc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// gudang-monitor command line arguments
#[derive(Parser, Debug)]
#[command(version)]
struct MonitorArgs {
    /// The MQTT broker, host:port
    #[arg(
        short = 'u',
        long,
        default_value = "broker.emqx.io:1883",
        env = "GUDANG_MONITOR_MQTT_URL"
    )]
    mqtt_url: String,

    /// Broker transport, ws expects the websocket port (ex. 8083)
    #[arg(
        short = 't',
        long,
        value_enum,
        default_value_t = BrokerTransport::Tcp,
        env = "GUDANG_MONITOR_TRANSPORT"
    )]
    transport: BrokerTransport,

    /// Topic prefix the node publishes under, no trailing slash
    #[arg(short = 'p', long, default_value = DEFAULT_TOPIC_PREFIX, env = "GUDANG_MONITOR_TOPIC_PREFIX")]
    topic_prefix: String,

    /// Optional classifier model (json rules)
    #[arg(short = 'm', long, env = "GUDANG_MONITOR_MODEL")]
    model: Option<PathBuf>,

    /// Dashboard refresh interval in milliseconds
    #[arg(short = 'r', long, default_value_t = 1000, env = "GUDANG_MONITOR_REFRESH_MS")]
    refresh_ms: u64,

    /// Max rows kept in the session log
    #[arg(
        short = 'c',
        long,
        default_value_t = DEFAULT_LOG_CAPACITY,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..),
        env = "GUDANG_MONITOR_LOG_CAPACITY"
    )]
    log_capacity: usize,

    /// Seconds to wait after a connection error before retrying
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY.as_secs(), env = "GUDANG_MONITOR_RETRY_SECS")]
    retry_secs: u64,

    /// UTC offset for timestamps, in hours
    #[arg(long, default_value_t = 7, allow_negative_numbers = true, env = "GUDANG_MONITOR_UTC_OFFSET")]
    utc_offset: i32,

    /// Folder csv exports are written to
    #[arg(short = 'f', long, default_value = ".", env = "GUDANG_MONITOR_EXPORT_FOLDER")]
    export_folder: PathBuf,

    /// Do not read commands from stdin
    #[arg(long, env = "GUDANG_MONITOR_NO_INPUT")]
    no_input: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = MonitorArgs::parse();

    // construct a subscriber that prints formatted traces to stdout
    // if RUST_LOG is not set, defaults to loglevel INFO
    let subscriber = tracing_subscriber::fmt()
        .with_thread_ids(true)
        .with_ansi(true)
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .finish();
    // use that subscriber to process traces emitted after this point
    tracing::subscriber::set_global_default(subscriber).expect("Could not init tracing");

    let Some(offset) = cli
        .utc_offset
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
    else {
        error!("Invalid UTC offset {}", cli.utc_offset);
        return ExitCode::FAILURE;
    };

    let topics = Topics::new(&cli.topic_prefix);

    // listener -> dashboard, drained on every refresh
    let (event_tx, event_rx) = mpsc::unbounded_channel::<MonitorEvent>();
    // dashboard -> listener, LED commands
    let (control_tx, control_rx) = mpsc::channel::<ControlCommand>(16);

    let task_tracker = TaskTracker::new();
    let token = CancellationToken::new();

    info!("Running MQTT processor");
    let (recv, opts) = match MqttProcessor::new(
        token.clone(),
        control_rx,
        event_tx,
        topics.clone(),
        MqttProcessorOptions {
            mqtt_path: cli.mqtt_url,
            transport: cli.transport,
            retry_delay: Duration::from_secs(cli.retry_secs),
        },
    ) {
        Ok(res) => res,
        Err(err) => {
            error!("{}", err);
            return ExitCode::FAILURE;
        }
    };
    let (client, eventloop) = AsyncClient::new(opts, 600);
    let client_sharable: Arc<AsyncClient> = Arc::new(client);
    task_tracker.spawn(recv.process_mqtt(client_sharable.clone(), eventloop));

    info!("Running dashboard");
    let session = Session::new(
        topics,
        cli.log_capacity,
        offset,
        load_model(cli.model.as_deref()),
    );
    task_tracker.spawn(
        Dashboard::new(
            token.clone(),
            event_rx,
            control_tx,
            session,
            DashboardOptions {
                refresh: Duration::from_millis(cli.refresh_ms.max(1)),
                export_dir: cli.export_folder,
                interactive: !cli.no_input,
            },
        )
        .run(),
    );

    task_tracker.close();

    info!("Initialization complete, ready...");
    info!("Use Ctrl+C or SIGINT to exit cleanly!");

    // listen for ctrl_c, then cancel, close, and await for all tasks in the tracker
    if let Err(err) = signal::ctrl_c().await {
        error!("Could not read cancellation trigger (ctr+c): {}", err);
    }
    info!("Received exit signal, shutting down!");
    token.cancel();
    task_tracker.wait().await;
    ExitCode::SUCCESS
}
