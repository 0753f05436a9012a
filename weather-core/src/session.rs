//! One connected client: wait for its location, then keep it supplied with weather.
//!
//! A session moves `AwaitingLocation -> Active -> Closed` and never back. All
//! reads and writes for one connection happen inside the single task running
//! [`ClientSession::run`], so pushes to a client never overlap. Everything
//! else (the registry, the server, broadcast) talks to the session through its
//! [`SessionHandle`].

use rand::{SeedableRng, rngs::StdRng};
use std::{
    fmt,
    future::Future,
    io,
    net::{IpAddr, SocketAddr},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{mpsc, watch},
    time::MissedTickBehavior,
};

use crate::{
    config::{DistributionMode, ServerSettings},
    error::WireError,
    model::{Location, WeatherData},
    provider::WeatherProvider,
    simulator::LocationDrift,
    wire,
};

/// Broadcast readings a session may have queued before new ones are dropped.
const OUTBOX_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingLocation,
    Active,
    Closed,
}

/// Why a session ended.
#[derive(Debug)]
pub enum CloseReason {
    Stopped,
    PeerClosed,
    ReadFailed(io::Error),
    PushFailed(WireError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Stopped => f.write_str("stopped by server"),
            CloseReason::PeerClosed => f.write_str("closed by client"),
            CloseReason::ReadFailed(e) => write!(f, "read failed: {e}"),
            CloseReason::PushFailed(e) => write!(f, "push failed: {e}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub push_interval: Duration,
    /// `None` waits for the first message indefinitely.
    pub location_timeout: Option<Duration>,
    /// Off in broadcast mode, where readings arrive through the handle instead.
    pub periodic_push: bool,
    pub drift: Option<LocationDrift>,
}

impl SessionSettings {
    pub fn from_server(settings: &ServerSettings) -> Self {
        Self {
            push_interval: settings.push_interval(),
            location_timeout: settings.location_timeout(),
            periodic_push: settings.mode == DistributionMode::PerLocation,
            drift: settings.location_drift.then(LocationDrift::default),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_server(&ServerSettings::default())
    }
}

/// Location assumed when a client never sends a usable one.
pub fn fallback_location(peer: IpAddr) -> Location {
    if peer.to_canonical().is_loopback() {
        Location::colombo()
    } else {
        Location::unknown()
    }
}

#[derive(Debug)]
struct Shared {
    id: u64,
    peer: SocketAddr,
    state: watch::Sender<SessionState>,
    stop: watch::Sender<bool>,
    location: Mutex<Option<Location>>,
    outbox: mpsc::Sender<WeatherData>,
}

/// Cheap, cloneable view of a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.shared.peer
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() != SessionState::Closed
    }

    /// `None` until the client's location is known.
    pub fn location(&self) -> Option<Location> {
        self.shared
            .location
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ask the session to stop. Safe to call any number of times.
    pub fn close(&self) {
        self.shared.stop.send_replace(true);
    }

    /// Queue a reading for the session to push; `false` if it is closed or backed up.
    pub fn offer(&self, data: &WeatherData) -> bool {
        self.is_connected() && self.shared.outbox.try_send(data.clone()).is_ok()
    }

    /// Resolves once the session has reached [`SessionState::Closed`].
    pub async fn closed(&self) {
        let mut state = self.shared.state.subscribe();
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }

    fn activate(&self, location: &Location) {
        self.set_location(location);
        self.shared.state.send_replace(SessionState::Active);
    }

    fn set_location(&self, location: &Location) {
        *self
            .shared
            .location
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(location.clone());
    }

    fn mark_closed(&self) {
        self.shared.state.send_replace(SessionState::Closed);
    }
}

/// The connection-owning half of a session; consumed by [`ClientSession::run`].
pub struct ClientSession {
    handle: SessionHandle,
    stream: TcpStream,
    provider: Arc<dyn WeatherProvider>,
    settings: SessionSettings,
    outbox: mpsc::Receiver<WeatherData>,
}

impl ClientSession {
    pub fn new(
        id: u64,
        stream: TcpStream,
        peer: SocketAddr,
        provider: Arc<dyn WeatherProvider>,
        settings: SessionSettings,
    ) -> Self {
        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let (state, _) = watch::channel(SessionState::AwaitingLocation);
        let (stop, _) = watch::channel(false);

        let handle = SessionHandle {
            shared: Arc::new(Shared {
                id,
                peer,
                state,
                stop,
                location: Mutex::new(None),
                outbox: outbox_tx,
            }),
        };

        Self {
            handle,
            stream,
            provider,
            settings,
            outbox: outbox_rx,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Drive the session until the client goes away, a push fails, or it is closed.
    pub async fn run(self) -> CloseReason {
        let ClientSession {
            handle,
            stream,
            provider,
            settings,
            outbox,
        } = self;

        let mut stop = handle.shared.stop.subscribe();
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let resolved = until_stopped(
            &mut stop,
            await_location(&mut reader, handle.peer(), settings.location_timeout),
        )
        .await;

        let (reason, mut writer) = match resolved {
            None => (CloseReason::Stopped, write_half),
            Some(location) => {
                tracing::info!(
                    client_id = handle.id(),
                    location = %location,
                    "Client location received"
                );
                handle.activate(&location);

                let mut stream = WeatherStream {
                    handle: &handle,
                    provider: provider.as_ref(),
                    settings: &settings,
                    reader,
                    writer: write_half,
                    outbox,
                    stop,
                    location,
                };
                let reason = stream.run().await;
                (reason, stream.writer)
            }
        };

        handle.mark_closed();
        let _ = writer.shutdown().await;

        tracing::info!(
            client_id = handle.id(),
            peer = %handle.peer(),
            %reason,
            "Client disconnected"
        );
        reason
    }
}

/// Wait for the client's first message; anything but a valid location falls back by peer address.
async fn await_location(
    reader: &mut BufReader<OwnedReadHalf>,
    peer: SocketAddr,
    timeout: Option<Duration>,
) -> Location {
    let read = wire::read_frame::<_, Location>(reader);

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, read).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(%peer, ?limit, "No location received in time");
                return fallback_location(peer.ip());
            }
        },
        None => read.await,
    };

    match outcome {
        Ok(Some(location)) => location,
        Ok(None) => {
            tracing::warn!(%peer, "Client sent no location before closing its side");
            fallback_location(peer.ip())
        }
        Err(e) => {
            tracing::warn!(%peer, error = %e, "Unreadable location; deriving it from peer address");
            fallback_location(peer.ip())
        }
    }
}

/// Resolves once the stop flag is raised, or its sender is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Run `work` unless the stop flag is raised first.
async fn until_stopped<F: Future>(stop: &mut watch::Receiver<bool>, work: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = stopped(stop) => None,
        output = work => Some(output),
    }
}

/// Drop whatever the client has sent since its location, one buffer at a time.
///
/// Nothing is decoded or accumulated, so neither invalid UTF-8 nor an endless
/// line can end the session or grow memory. `Ok(0)` means end of stream.
async fn discard_inbound(reader: &mut BufReader<OwnedReadHalf>) -> io::Result<usize> {
    let available = reader.fill_buf().await?.len();
    reader.consume(available);
    Ok(available)
}

/// State of the `Active` phase.
struct WeatherStream<'a> {
    handle: &'a SessionHandle,
    provider: &'a dyn WeatherProvider,
    settings: &'a SessionSettings,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    outbox: mpsc::Receiver<WeatherData>,
    stop: watch::Receiver<bool>,
    location: Location,
}

impl WeatherStream<'_> {
    async fn run(&mut self) -> CloseReason {
        let mut ticker = tokio::time::interval(self.settings.push_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rng = StdRng::from_entropy();

        // Periodic mode gets its first reading from the interval's immediate tick.
        if !self.settings.periodic_push {
            if let Some(reason) = self.fetch_and_push().await {
                return reason;
            }
        }

        loop {
            tokio::select! {
                biased;
                () = stopped(&mut self.stop) => return CloseReason::Stopped,
                read = discard_inbound(&mut self.reader) => match read {
                    Ok(0) => return CloseReason::PeerClosed,
                    Ok(bytes) => {
                        tracing::debug!(client_id = self.handle.id(), bytes, "Ignoring inbound data");
                    }
                    Err(e) => return CloseReason::ReadFailed(e),
                },
                Some(data) = self.outbox.recv() => {
                    if let Some(reason) = self.push(&data).await {
                        return reason;
                    }
                }
                _ = ticker.tick(), if self.settings.periodic_push => {
                    self.maybe_drift(&mut rng);
                    if let Some(reason) = self.fetch_and_push().await {
                        return reason;
                    }
                }
            }
        }
    }

    fn maybe_drift(&mut self, rng: &mut StdRng) {
        let Some(drift) = &self.settings.drift else {
            return;
        };
        if let Some(next) = drift.next(&self.location, rng) {
            tracing::info!(
                client_id = self.handle.id(),
                from = self.location.city(),
                to = next.city(),
                "Session location drifted"
            );
            self.handle.set_location(&next);
            self.location = next;
        }
    }

    async fn fetch_and_push(&mut self) -> Option<CloseReason> {
        let provider = self.provider;
        let location = self.location.clone();
        let fetched = until_stopped(&mut self.stop, provider.fetch_for(&location)).await;

        match fetched {
            Some(data) => self.push(&data).await,
            None => Some(CloseReason::Stopped),
        }
    }

    async fn push(&mut self, data: &WeatherData) -> Option<CloseReason> {
        let written = until_stopped(&mut self.stop, wire::write_frame(&mut self.writer, data)).await;

        match written {
            None => Some(CloseReason::Stopped),
            Some(Ok(())) => {
                tracing::debug!(client_id = self.handle.id(), "{data}");
                None
            }
            Some(Err(e)) => Some(CloseReason::PushFailed(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::simulated::SimulatedProvider;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    async fn connected_session(settings: SessionSettings) -> (ClientSession, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server_side, peer) = listener.accept().await.unwrap();

        let provider: Arc<dyn WeatherProvider> = Arc::new(SimulatedProvider::default());
        (ClientSession::new(1, server_side, peer, provider, settings), client)
    }

    fn fast_settings() -> SessionSettings {
        SessionSettings {
            push_interval: Duration::from_millis(100),
            location_timeout: Some(Duration::from_secs(5)),
            periodic_push: true,
            drift: None,
        }
    }

    async fn next_reading(reader: &mut BufReader<TcpStream>) -> WeatherData {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(line.trim_end()).unwrap()
    }

    #[test]
    fn loopback_peers_default_to_colombo() {
        assert_eq!(fallback_location(IpAddr::V4(Ipv4Addr::LOCALHOST)), Location::colombo());
        assert_eq!(fallback_location(IpAddr::V6(Ipv6Addr::LOCALHOST)), Location::colombo());
        assert_eq!(
            fallback_location(IpAddr::V6(Ipv4Addr::LOCALHOST.to_ipv6_mapped())),
            Location::colombo()
        );
    }

    #[test]
    fn remote_peers_get_the_unknown_placeholder() {
        let location = fallback_location(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)));
        assert_eq!(location.city(), "Unknown");
        assert!(!location.city().is_empty());
    }

    #[tokio::test]
    async fn pushes_immediately_for_the_sent_location() {
        let (session, client) = connected_session(fast_settings()).await;
        let handle = session.handle();
        assert_eq!(handle.state(), SessionState::AwaitingLocation);
        assert!(handle.location().is_none());
        tokio::spawn(session.run());

        let mut client = BufReader::new(client);
        let paris = Location::new("Paris", "France", 48.8566, 2.3522, "Europe/Paris");
        wire::write_frame(client.get_mut(), &paris).await.unwrap();

        let first = next_reading(&mut client).await;
        assert_eq!(first.location(), &paris);
        assert_eq!(handle.state(), SessionState::Active);
        assert_eq!(handle.location(), Some(paris.clone()));

        let second = next_reading(&mut client).await;
        assert_eq!(second.location().city(), "Paris");
    }

    #[tokio::test]
    async fn malformed_location_from_loopback_uses_default() {
        let (session, client) = connected_session(fast_settings()).await;
        tokio::spawn(session.run());

        let mut client = BufReader::new(client);
        client.get_mut().write_all(b"hello there\n").await.unwrap();

        let first = next_reading(&mut client).await;
        assert_eq!(first.location(), &Location::colombo());
    }

    #[tokio::test]
    async fn invalid_utf8_after_location_keeps_the_session_alive() {
        let (session, client) = connected_session(fast_settings()).await;
        let handle = session.handle();
        tokio::spawn(session.run());

        let mut client = BufReader::new(client);
        wire::write_frame(client.get_mut(), &Location::colombo()).await.unwrap();
        next_reading(&mut client).await;

        client.get_mut().write_all(b"\xff\xfe garbage\n").await.unwrap();

        let next = tokio::time::timeout(Duration::from_secs(2), next_reading(&mut client))
            .await
            .unwrap();
        assert_eq!(next.location().city(), "Colombo");
        assert_eq!(handle.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn endless_inbound_line_is_drained_without_closing() {
        let (session, client) = connected_session(fast_settings()).await;
        let handle = session.handle();
        tokio::spawn(session.run());

        let mut client = BufReader::new(client);
        wire::write_frame(client.get_mut(), &Location::colombo()).await.unwrap();
        next_reading(&mut client).await;

        let chunk = vec![b'x'; 64 * 1024];
        for _ in 0..4 {
            client.get_mut().write_all(&chunk).await.unwrap();
        }

        let next = tokio::time::timeout(Duration::from_secs(2), next_reading(&mut client))
            .await
            .unwrap();
        assert_eq!(next.location().city(), "Colombo");
        assert_eq!(handle.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn discard_inbound_reports_end_of_stream_as_zero() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        let (read_half, _write_half) = server_side.into_split();
        let mut reader = BufReader::new(read_half);

        client.write_all(b"\xff\xfe\n").await.unwrap();
        assert_eq!(discard_inbound(&mut reader).await.unwrap(), 3);

        drop(client);
        assert_eq!(discard_inbound(&mut reader).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn silent_client_times_out_to_fallback_location() {
        let settings = SessionSettings {
            location_timeout: Some(Duration::from_millis(50)),
            ..fast_settings()
        };
        let (session, client) = connected_session(settings).await;
        tokio::spawn(session.run());

        let mut client = BufReader::new(client);
        let first = next_reading(&mut client).await;
        assert_eq!(first.location().city(), "Colombo");
    }

    #[tokio::test]
    async fn close_interrupts_a_blocked_location_read() {
        let settings = SessionSettings {
            location_timeout: None,
            ..fast_settings()
        };
        let (session, mut client) = connected_session(settings).await;
        let handle = session.handle();
        let task = tokio::spawn(session.run());

        handle.close();
        handle.close();

        let reason = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(reason, CloseReason::Stopped));
        assert!(!handle.is_connected());

        let mut buf = [0u8; 16];
        let n = tokio::io::AsyncReadExt::read(&mut client, &mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn client_disconnect_closes_the_session() {
        let (session, client) = connected_session(fast_settings()).await;
        let handle = session.handle();
        let task = tokio::spawn(session.run());

        let mut client = BufReader::new(client);
        wire::write_frame(client.get_mut(), &Location::colombo()).await.unwrap();
        next_reading(&mut client).await;
        drop(client);

        tokio::time::timeout(Duration::from_secs(2), handle.closed())
            .await
            .unwrap();
        assert!(!matches!(task.await.unwrap(), CloseReason::Stopped));
    }

    #[tokio::test]
    async fn broadcast_mode_forwards_offered_readings() {
        let settings = SessionSettings {
            periodic_push: false,
            ..fast_settings()
        };
        let (session, client) = connected_session(settings).await;
        let handle = session.handle();
        tokio::spawn(session.run());

        let mut client = BufReader::new(client);
        wire::write_frame(client.get_mut(), &Location::colombo()).await.unwrap();
        let initial = next_reading(&mut client).await;
        assert_eq!(initial.location().city(), "Colombo");

        let shared = crate::simulator::ClimateSimulator::seeded(1)
            .generate_at(&Location::unknown(), 12, 6);
        assert!(handle.offer(&shared));

        let pushed = next_reading(&mut client).await;
        assert_eq!(pushed.location().city(), "Unknown");
    }

    #[tokio::test]
    async fn offer_after_close_is_refused() {
        let (session, _client) = connected_session(fast_settings()).await;
        let handle = session.handle();
        let task = tokio::spawn(session.run());

        handle.close();
        task.await.unwrap();

        let data = crate::simulator::ClimateSimulator::seeded(1)
            .generate_at(&Location::colombo(), 12, 6);
        assert!(!handle.offer(&data));
    }
}
