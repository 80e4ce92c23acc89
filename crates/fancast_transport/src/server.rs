//! The supervisor.
//!
//! `Server::bind` + `Server::start` bring up the whole process: publisher,
//! dispatcher, metrics aggregator, policy sweeper, and the accept loop, all
//! wired to one shutdown watch. `Server::shutdown` is the graceful path:
//! stop producing and accepting, drain every session, give them a bounded
//! grace to close, then force whatever is left.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use fancast_config::Settings;
use fancast_engine::dispatcher::run_sweeper;
use fancast_engine::metrics::run_metrics;
use fancast_engine::publisher::PUBLISH_CHANNEL_CAP;
use fancast_engine::{Clock, Dispatcher, DrainReason, Publisher, PublishStats, Registry};
use fancast_utils::error::SetupError;

use crate::websocket;

/// Shared context handed to the accept loop and every connection task.
#[derive(Debug)]
pub struct ServerCtx {
    pub registry: Arc<Registry>,
    pub clock: Arc<Clock>,
    pub settings: Settings,
}

pub struct Server {
    ctx: Arc<ServerCtx>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Server {
    /// Bind the listener. Separate from `start` so the caller can map a bind
    /// failure to its exit code before anything is spawned.
    pub async fn bind(settings: &Settings) -> Result<TcpListener, SetupError> {
        let addr = format!("{}:{}", settings.server.host, settings.server.port);
        TcpListener::bind(&addr)
            .await
            .map_err(|source| SetupError::Bind { addr, source })
    }

    pub fn start(listener: TcpListener, settings: Settings) -> Server {
        let local_addr = listener.local_addr().ok();
        let ctx = Arc::new(ServerCtx {
            registry: Arc::new(Registry::new()),
            clock: Arc::new(Clock::new()),
            settings,
        });
        let stats = Arc::new(PublishStats::default());
        let (shutdown, _) = watch::channel(false);

        let (pub_tx, pub_rx) = mpsc::channel(PUBLISH_CHANNEL_CAP);
        let publisher = Publisher::new(&ctx.settings.publish, ctx.clock.clone(), stats.clone());
        let dispatcher = Dispatcher::new(
            ctx.registry.clone(),
            ctx.clock.clone(),
            ctx.settings.delivery.clone(),
        );

        let tasks = vec![
            tokio::spawn(publisher.run(pub_tx, shutdown.subscribe())),
            tokio::spawn(dispatcher.run(pub_rx)),
            tokio::spawn(run_metrics(
                ctx.registry.clone(),
                stats,
                ctx.settings.publish.metrics_period(),
                shutdown.subscribe(),
            )),
            tokio::spawn(run_sweeper(
                ctx.registry.clone(),
                ctx.clock.clone(),
                shutdown.subscribe(),
            )),
            tokio::spawn(websocket::serve(
                listener,
                ctx.clone(),
                shutdown.subscribe(),
            )),
        ];

        if let Some(addr) = local_addr {
            info!(
                %addr,
                mode = %ctx.settings.delivery.mode,
                rate = ctx.settings.publish.rate,
                "server started"
            );
        }

        Server {
            ctx,
            shutdown,
            tasks,
            local_addr,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.ctx.registry
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Graceful stop. Sessions get `shutdown_grace` to wind down on their
    /// own (the publisher has stopped, so their queues only shrink); anything
    /// still registered after that is closed by force. Long-lived tasks are
    /// joined at the end; the dispatcher finishes by draining whatever the
    /// publisher had already handed over.
    pub async fn shutdown(self) {
        info!("shutting down");
        let _ = self.shutdown.send(true);
        for session in self.ctx.registry.snapshot() {
            session.begin_drain(DrainReason::Shutdown);
        }

        let deadline = Instant::now() + self.ctx.settings.server.shutdown_grace();
        while !self.ctx.registry.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        for session in self.ctx.registry.snapshot() {
            warn!(client = %session.id(), "force-closing session after grace");
            let _ = tokio::time::timeout(Duration::from_millis(250), session.conn().close()).await;
            self.ctx.registry.remove(session.id());
            session.mark_closed();
        }

        for mut task in self.tasks {
            if tokio::time::timeout(Duration::from_secs(1), &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }
        info!("shutdown complete");
    }
}
