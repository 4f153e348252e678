use std::{
    future::Future,
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::{net::TcpListener, sync::watch, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    bridge::{BridgeOptions, Broadcast, MessageBridge},
    broadcaster::{NoticeQueue, spawn_broadcaster},
    hub::TopicHub,
    presence::PresenceCounter,
    transport::{self, RelayState},
};

// Deliveries buffered per connection before a slow reader starts lagging.
const HUB_CAPACITY: usize = 256;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Binds `addr`, retrying on an ephemeral port of the same IP if it is taken.
pub async fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == io::ErrorKind::AddrInUse && addr.port() != 0 => {
            warn!(%addr, "address in use, falling back to a free port");
            let fallback = SocketAddr::new(addr.ip(), 0);
            TcpListener::bind(fallback)
                .await
                .with_context(|| format!("failed to bind {fallback}"))
        }
        Err(err) => Err(err).with_context(|| format!("failed to bind {addr}")),
    }
}

/// Address clients can dial: a wildcard bind is reported as loopback.
pub fn reachable_addr(bound: SocketAddr) -> SocketAddr {
    let ip = match bound.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, bound.port())
}

pub struct RelayServer {
    listener: TcpListener,
    options: BridgeOptions,
    presence: Arc<PresenceCounter>,
}

impl RelayServer {
    pub fn new(listener: TcpListener, options: BridgeOptions) -> Self {
        Self {
            listener,
            options,
            presence: Arc::new(PresenceCounter::new()),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared with the bridge; readable while the server runs.
    pub fn presence(&self) -> Arc<PresenceCounter> {
        Arc::clone(&self.presence)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let RelayServer {
            listener,
            options,
            presence,
        } = self;

        let hub = Arc::new(TopicHub::new(HUB_CAPACITY));
        let (queue, pending) = NoticeQueue::new();
        let broadcaster = spawn_broadcaster(pending, Arc::clone(&hub) as Arc<dyn Broadcast>);
        let bridge = Arc::new(MessageBridge::new(
            options,
            presence,
            Arc::clone(&hub) as Arc<dyn Broadcast>,
            queue,
        ));

        let (stop_tx, stop_rx) = watch::channel(false);
        let app = transport::router(RelayState::new(bridge, hub, stop_rx));

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("relay shutting down");
            let _ = stop_tx.send(true);
        })
        .await
        .context("relay server failed")?;

        // Sessions still own queue handles until their disconnects are raised.
        match timeout(DRAIN_TIMEOUT, broadcaster).await {
            Ok(Ok(delivered)) => debug!(delivered, "broadcaster drained"),
            Ok(Err(err)) => warn!(error = ?err, "broadcaster task failed"),
            Err(_) => warn!("timed out waiting for broadcaster to drain"),
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}
