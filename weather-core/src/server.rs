//! The TCP front door: accepts clients, hands each one a session, and keeps
//! the registry tidy until told to stop.

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex, OnceLock, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::{
    config::{DistributionMode, ServerSettings},
    error::ServerError,
    model::Location,
    provider::WeatherProvider,
    registry::SessionRegistry,
    session::{ClientSession, SessionSettings},
};

/// Port used when none (or an unusable one) is given.
pub const DEFAULT_PORT: u16 = 8080;

const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Background jobs owned by a running server.
#[derive(Debug, Default)]
struct Tasks {
    sweeper: Option<JoinHandle<()>>,
    broadcaster: Option<JoinHandle<()>>,
}

#[derive(Debug)]
pub struct DistributionServer {
    provider: Arc<dyn WeatherProvider>,
    settings: ServerSettings,
    session_settings: SessionSettings,
    registry: Arc<SessionRegistry>,
    next_id: AtomicU64,
    running: AtomicBool,
    stopped: AtomicBool,
    stop_tasks: watch::Sender<bool>,
    stop_accepting: watch::Sender<bool>,
    tasks: Mutex<Tasks>,
    local_addr: OnceLock<SocketAddr>,
}

impl DistributionServer {
    pub fn new(provider: Arc<dyn WeatherProvider>, settings: ServerSettings) -> Arc<Self> {
        let (stop_tasks, _) = watch::channel(false);
        let (stop_accepting, _) = watch::channel(false);

        Arc::new(Self {
            provider,
            session_settings: SessionSettings::from_server(&settings),
            settings,
            registry: Arc::new(SessionRegistry::new()),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop_tasks,
            stop_accepting,
            tasks: Mutex::new(Tasks::default()),
            local_addr: OnceLock::new(),
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address actually bound, once [`DistributionServer::serve`] has started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Bind the listening socket on all interfaces.
    pub async fn bind(port: u16) -> Result<TcpListener, ServerError> {
        TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| ServerError::Bind { port, source })
    }

    /// Bind `port` and serve until [`DistributionServer::stop`] is called.
    pub async fn start(self: Arc<Self>, port: u16) -> Result<(), ServerError> {
        let listener = Self::bind(port).await?;
        self.serve(listener).await
    }

    /// Serve clients on an already bound listener until stopped.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            let _ = self.local_addr.set(addr);
        }

        self.launch_background_tasks()?;

        tracing::info!(
            addr = ?self.local_addr(),
            provider = %self.provider.id(),
            mode = ?self.settings.mode,
            "Weather server listening"
        );

        let mut stop_accepting = self.stop_accepting.subscribe();
        let mut failures: u32 = 0;
        loop {
            tokio::select! {
                biased;
                () = stop_requested(&mut stop_accepting) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        failures = 0;
                        self.admit(stream, peer);
                    }
                    Err(e) if !self.is_running() => {
                        tracing::debug!(error = %e, "Accept interrupted by shutdown");
                        break;
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        let pause = accept_backoff(failures);
                        tracing::warn!(error = %e, failures, ?pause, "Failed to accept connection");
                        tokio::select! {
                            biased;
                            () = stop_requested(&mut stop_accepting) => break,
                            () = tokio::time::sleep(pause) => {}
                        }
                    }
                },
            }
        }

        drop(listener);
        tracing::info!("Listening socket closed");
        Ok(())
    }

    fn launch_background_tasks(&self) -> Result<(), ServerError> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ServerError::Stopped);
        }

        tasks.sweeper = Some(tokio::spawn(sweep_loop(
            Arc::clone(&self.registry),
            self.settings.sweep_interval(),
            self.stop_tasks.subscribe(),
        )));

        if self.settings.mode == DistributionMode::Broadcast {
            tasks.broadcaster = Some(tokio::spawn(broadcast_loop(
                Arc::clone(&self.registry),
                Arc::clone(&self.provider),
                self.settings.push_interval(),
                self.stop_tasks.subscribe(),
            )));
        }

        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = ClientSession::new(
            id,
            stream,
            peer,
            Arc::clone(&self.provider),
            self.session_settings.clone(),
        );
        let handle = session.handle();
        self.registry.add(handle.clone());

        // A connection accepted while stop() runs must not outlive it.
        if !self.is_running() {
            handle.close();
        }

        tracing::info!(client_id = id, %peer, total = self.registry.len(), "Client connected");
        tokio::spawn(session.run());
    }

    /// Shut down: stop the schedulers, close every session, then the listener.
    ///
    /// Calling it again, or before the server ever started, does nothing further.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Stopping weather server");

        let tasks = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            self.running.store(false, Ordering::SeqCst);
            std::mem::take(&mut *tasks)
        };
        self.stop_tasks.send_replace(true);
        let grace = self.settings.shutdown_grace();
        if let Some(sweeper) = tasks.sweeper {
            finish("sweeper", sweeper, grace).await;
        }
        if let Some(broadcaster) = tasks.broadcaster {
            finish("broadcaster", broadcaster, grace).await;
        }

        let closed = self.registry.close_all();
        tracing::info!(closed, "Closed client sessions");

        self.stop_accepting.send_replace(true);
    }
}

/// Resolves once `stop` is raised, or its sender is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

/// Pause before retrying after `failures` consecutive accept errors.
fn accept_backoff(failures: u32) -> Duration {
    let doublings = failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_BASE
        .saturating_mul(1 << doublings)
        .min(ACCEPT_BACKOFF_MAX)
}

/// Wait up to `grace` for a background task to notice the stop signal, then cancel it.
async fn finish(name: &str, task: JoinHandle<()>, grace: Duration) {
    let abort = task.abort_handle();
    if tokio::time::timeout(grace, task).await.is_err() {
        tracing::warn!(task = name, ?grace, "Task did not stop in time; cancelling");
        abort.abort();
    }
}

async fn sweep_loop(
    registry: Arc<SessionRegistry>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = stop_requested(&mut stop) => break,
            _ = ticker.tick() => {
                let removed = registry.sweep();
                tracing::debug!(removed, remaining = registry.len(), "Registry sweep");
            }
        }
    }
}

/// Broadcast mode: one reading for the default location, sent to everyone.
async fn broadcast_loop(
    registry: Arc<SessionRegistry>,
    provider: Arc<dyn WeatherProvider>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let location = Location::colombo();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = stop_requested(&mut stop) => break,
            _ = ticker.tick() => {}
        }

        let data = tokio::select! {
            biased;
            () = stop_requested(&mut stop) => break,
            data = provider.fetch_for(&location) => data,
        };

        let delivered = registry.broadcast(&data);
        tracing::debug!(delivered, city = data.location().city(), "Broadcast reading");
    }
}
