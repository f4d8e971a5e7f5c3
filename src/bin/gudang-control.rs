use std::{process::ExitCode, time::Duration};

use clap::{Parser, ValueEnum};
use gudang_monitor::{
    mqtt_handler::{build_mqtt_options, BrokerTransport},
    ControlCommand, Topics, DEFAULT_TOPIC_PREFIX,
};
use rumqttc::v5::{
    mqttbytes::{v5::Packet, QoS},
    AsyncClient, Event,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Led {
    On,
    Off,
}

/// gudang-control command line arguments
#[derive(Parser, Debug)]
#[command(version)]
struct ControlArgs {
    /// Switch the LED on or off
    #[arg(value_enum)]
    led: Led,

    /// The MQTT broker, host:port
    #[arg(
        short = 'u',
        long,
        default_value = "broker.emqx.io:1883",
        env = "GUDANG_MONITOR_MQTT_URL"
    )]
    mqtt_url: String,

    /// Broker transport
    #[arg(short = 't', long, value_enum, default_value_t = BrokerTransport::Tcp, env = "GUDANG_MONITOR_TRANSPORT")]
    transport: BrokerTransport,

    /// Topic prefix the node listens under
    #[arg(short = 'p', long, default_value = DEFAULT_TOPIC_PREFIX, env = "GUDANG_MONITOR_TOPIC_PREFIX")]
    topic_prefix: String,

    /// Seconds to wait for the broker to acknowledge
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = ControlArgs::parse();

    let cmd = match cli.led {
        Led::On => ControlCommand::LedOn,
        Led::Off => ControlCommand::LedOff,
    };
    let topics = Topics::new(&cli.topic_prefix);

    let opts = match build_mqtt_options("gudang-ctl", &cli.mqtt_url, cli.transport) {
        Ok(opts) => opts,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let (client, mut eventloop) = AsyncClient::new(opts, 10);

    if let Err(err) = client
        .publish(
            topics.control(),
            QoS::AtLeastOnce,
            false,
            cmd.payload().as_bytes().to_vec(),
        )
        .await
    {
        eprintln!("Could not queue message: {err}");
        return ExitCode::FAILURE;
    }

    // drive the eventloop until the broker acks the publish
    let acked = tokio::time::timeout(Duration::from_secs(cli.timeout_secs), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(err) => return Err(err),
            }
        }
    })
    .await;

    match acked {
        Ok(Ok(())) => {
            println!("Sent {} to {}", cmd.payload(), topics.control());
            // one more poll flushes the disconnect
            if client.disconnect().await.is_ok() {
                let _ = tokio::time::timeout(Duration::from_secs(1), eventloop.poll()).await;
            }
            ExitCode::SUCCESS
        }
        Ok(Err(err)) => {
            eprintln!("Connection failed: {err}");
            ExitCode::FAILURE
        }
        Err(_) => {
            eprintln!("Timed out waiting for broker");
            ExitCode::FAILURE
        }
    }
}
