//! DMUX demo
//!
//! Wires the multiplexer engine to the simulated transport and walks through
//! a session: power the link up on demand, open a channel in both
//! directions, exchange data, then let the link autosuspend. Run with
//! `RUST_LOG=debug` to watch the handshake and ring traffic.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dmux_engine::{ChannelId, Dmux, EngineConfig, EngineEvent};
use dmux_sim::{drive, LogFactory, PacketLog, SimNet};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dmux_engine=debug,dmux_sim=debug,dmux_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting DMUX demo session");

    let sim = SimNet::new();
    let log = PacketLog::new();
    let factory = LogFactory::new(log.clone());
    let (event_tx, mut events) = mpsc::unbounded_channel();

    let config = EngineConfig {
        autosuspend_delay_ms: 250,
        ..Default::default()
    };
    let dmux = Dmux::spawn(
        config,
        sim.clone(),
        sim.clone(),
        factory,
        event_tx,
    );
    drive(&dmux, &sim);

    let reporter = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!("event: {:?}", event);
        }
    });

    // Opening a channel powers the link on demand.
    let channel = ChannelId(0);
    dmux.open_channel(channel).await?;

    // The remote announces the same channel and sends us a packet. Handle
    // registration runs off the completion path, so wait for the sink
    // before the data arrives.
    sim.inject_open(channel);
    wait_for_registration(&dmux, channel).await?;
    sim.inject_data(channel, &[0x45, 0x00, 0x00, 0x1c, 0xde, 0xad, 0xbe, 0xef]);
    wait_for_packets(&log, 1).await?;
    for packet in log.received() {
        info!(
            "received {} bytes on channel {} ({:?})",
            packet.payload.len(),
            packet.channel,
            packet.kind
        );
    }

    // Send something back.
    dmux.send_data(channel, b"hello from the application processor")?;
    info!("transmitted {} frames so far", sim.sent_frames().len());

    // Go idle and watch the link power down, then wake it with one more send.
    info!("idling; the engine should retract its power vote");
    tokio::time::sleep(Duration::from_millis(600)).await;
    info!(
        "link active: {}, remote powered: {}",
        dmux.is_link_active(),
        dmux.is_remote_powered()
    );

    dmux.send_data(channel, b"wake up")?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    dmux.close_channel(channel).await;
    dmux.shutdown();
    reporter.abort();

    info!("demo complete");
    Ok(())
}

async fn wait_for_registration(dmux: &Arc<Dmux>, channel: ChannelId) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !dmux.is_channel_registered(channel) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("timed out waiting for channel {channel} to register"))
}

async fn wait_for_packets(log: &Arc<PacketLog>, count: usize) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(2), log.wait_for(count))
        .await
        .map_err(|_| anyhow::anyhow!("timed out waiting for {count} inbound packets"))
}
