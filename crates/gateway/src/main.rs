use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::net::UdpSocket;

use lora_fwd_core::Stats;
use lora_fwd_gateway::{
    run_beacon_loop, run_jit_dispatch, run_stat_loop, run_timesync_loop, shutdown_channel,
    DownstreamReceiver, GatewayConfig, ReportSlot, StopKind, UpstreamForwarder,
};
use lora_fwd_radio::{ConcentratorGate, JitQueue, SimulatedConcentrator, TimeSync};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("global_conf.json"));
    let cfg = Arc::new(GatewayConfig::from_file(&path)?);
    info!("[main] configuration loaded from {}", path.display());
    info!("[main] gateway EUI {}", cfg.gateway_id);

    // the board behind the gate; hardware back-ends plug in here
    let (concentrator, _sim) = SimulatedConcentrator::new();
    let gate = Arc::new(ConcentratorGate::new(Box::new(concentrator)));

    gate.connect()
        .await
        .context("failed to connect to the concentrator board")?;
    gate.start()
        .await
        .context("failed to start the concentrator")?;
    info!("[main] concentrator started, packets can now be received");

    let timesync = Arc::new(TimeSync::new());
    if let Err(e) = timesync.refresh(&gate).await {
        warn!("[main] initial time sync failed: {e}");
    }

    let sock_up = connect_udp(&cfg.server_address, cfg.serv_port_up).await?;
    let sock_down = connect_udp(&cfg.server_address, cfg.serv_port_down).await?;
    info!(
        "[main] forwarding to {} (up {}, down {})",
        cfg.server_address, cfg.serv_port_up, cfg.serv_port_down
    );

    let stats = Arc::new(Stats::new());
    let jit = Arc::new(Mutex::new(JitQueue::new(cfg.jit.clone())));
    let report = Arc::new(ReportSlot::new());
    let (controller, signal) = shutdown_channel();

    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn(
        UpstreamForwarder::new(
            cfg.clone(),
            sock_up,
            gate.clone(),
            stats.clone(),
            report.clone(),
            signal.clone(),
        )
        .run(),
    );
    tasks.spawn(
        DownstreamReceiver::new(
            cfg.clone(),
            sock_down,
            jit.clone(),
            timesync.clone(),
            stats.clone(),
            signal.clone(),
            controller.clone(),
        )
        .run(),
    );
    tasks.spawn(run_jit_dispatch(
        gate.clone(),
        jit.clone(),
        timesync.clone(),
        stats.clone(),
        signal.clone(),
    ));
    tasks.spawn(run_timesync_loop(
        cfg.clone(),
        gate.clone(),
        timesync.clone(),
        signal.clone(),
    ));
    tasks.spawn(run_stat_loop(
        cfg.clone(),
        stats.clone(),
        report.clone(),
        signal.clone(),
    ));
    if cfg.beacon_enabled {
        tasks.spawn(run_beacon_loop(
            cfg.clone(),
            jit.clone(),
            timesync.clone(),
            signal.clone(),
        ));
    }

    tasks.spawn(watch_signals(controller.clone(), signal.clone()));

    // supervising loop: wait for a stop request, then drain the tasks
    let mut signal = signal;
    let kind = signal.wait().await;
    info!("[main] shutdown requested ({kind:?})");
    while tasks.join_next().await.is_some() {}

    match kind {
        StopKind::Clean => {
            info!("[main] stopping concentrator");
            if let Err(e) = gate.stop().await {
                error!("[main] failed to stop concentrator: {e}");
            }
        }
        StopKind::Abrupt => {
            warn!("[main] abrupt exit, skipping hardware teardown");
        }
    }
    info!("[main] exit");
    Ok(())
}

async fn connect_udp(host: &str, port: u16) -> Result<UdpSocket> {
    let addr = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("cannot resolve {host}:{port}"))?
        .next()
        .with_context(|| format!("no address for {host}:{port}"))?;
    let bind_addr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(addr).await?;
    Ok(socket)
}

/// Map host signals onto the two stop flavors: INT/TERM stop cleanly,
/// QUIT skips the hardware teardown. Also returns once some other
/// component (e.g. the auto-quit) has already requested a stop.
async fn watch_signals(
    controller: lora_fwd_gateway::ShutdownController,
    mut sig: lora_fwd_gateway::ShutdownSignal,
) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                error!("[main] cannot install SIGTERM handler: {e}");
                return;
            }
        };
        let mut quit = match signal(SignalKind::quit()) {
            Ok(quit) => quit,
            Err(e) => {
                error!("[main] cannot install SIGQUIT handler: {e}");
                return;
            }
        };
        tokio::select! {
            _ = sig.wait() => {}
            _ = tokio::signal::ctrl_c() => controller.request(StopKind::Clean),
            _ = term.recv() => controller.request(StopKind::Clean),
            _ = quit.recv() => controller.request(StopKind::Abrupt),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = sig.wait() => {}
            r = tokio::signal::ctrl_c() => {
                if r.is_ok() {
                    controller.request(StopKind::Clean);
                }
            }
        }
    }
}
