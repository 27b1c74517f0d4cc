//! Application orchestration for the drishti-link daemon
//!
//! Wires the link server, tile pipeline and navigation engine together and
//! manages graceful shutdown. This is the handheld side: it owns network
//! access, broadcasts navigation state to every connected display and
//! answers their tile requests.

use crate::bulk;
use crate::config::AppConfig;
use crate::error::Result;
use crate::link::{Acceptor, LinkServer, ServerHandler};
use crate::nav::{
    LatLng, NavigationEngine, NavigationEvents, OsrmRouter, Route, RouteStep,
};
use crate::protocol::{
    DisplaySettings, Message, NotificationInfo, RouteSummary, StateUpdate, StepInfo, Waypoint,
    WifiCredentials,
};
use crate::tiles::{HttpTileFetcher, TileCache};
use crate::transport::TcpAcceptor;
use crate::workers::WorkerPool;
use log::{debug, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Main application structure that manages all components
pub struct DrishtiApp {
    config: AppConfig,
    server: Arc<LinkServer>,
    engine: Arc<NavigationEngine>,
    shutdown: Arc<AtomicBool>,
}

impl DrishtiApp {
    /// Create a new application instance
    ///
    /// Builds the tile pipeline, link server and navigation engine.
    pub fn new(config: AppConfig) -> Result<Self> {
        info!("Initializing drishti-link application");

        let server = Arc::new(LinkServer::new(Box::new(InboundHandler)));

        info!(
            "Setting up tile pipeline ({} servers, {} workers, capacity {})",
            config.tiles.url_templates.len(),
            config.tiles.fetch_workers,
            config.tiles.cache_capacity
        );
        let fetcher = Arc::new(HttpTileFetcher::new(
            config.tiles.url_templates.clone(),
            &config.tiles.user_agent,
        )?);
        let pool = Arc::new(WorkerPool::new("tile-fetch", config.tiles.fetch_workers)?);
        let tile_cache = TileCache::direct(fetcher, pool, config.tiles.cache_capacity);
        server.set_tile_cache(tile_cache);

        info!("Setting up OSRM router at {}", config.nav.osrm_url);
        let router = Arc::new(OsrmRouter::new(&config.nav.osrm_url)?);
        let engine = NavigationEngine::new(
            router,
            Arc::new(Broadcaster {
                server: Arc::clone(&server),
            }),
        );

        Ok(Self {
            config,
            server,
            engine,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Start the acceptors and block until a shutdown signal arrives.
    pub fn run(&mut self) -> Result<()> {
        info!("Starting link server");
        self.server.start(self.bind_acceptors()?)?;

        self.setup_signal_handler();

        info!("Listening on {} (primary)", self.config.link.primary_bind);
        info!("Listening on {} (fallback)", self.config.link.fallback_bind);
        info!("Press Ctrl+C to stop");

        let mut last_stats = Instant::now();
        while !self.shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(100));

            if last_stats.elapsed().as_secs() >= 10 {
                info!("Connected displays: {}", self.server.session_count());
                last_stats = Instant::now();
            }
        }

        info!("Shutdown signal received, stopping threads...");
        self.engine.stop();
        self.server.stop();
        Ok(())
    }

    /// Bind the primary and fallback endpoints. One of them failing is
    /// tolerable; both failing means the server cannot run.
    fn bind_acceptors(&self) -> Result<Vec<Box<dyn Acceptor>>> {
        let mut acceptors: Vec<Box<dyn Acceptor>> = Vec::new();
        let endpoints = [
            ("primary", &self.config.link.primary_bind),
            ("fallback", &self.config.link.fallback_bind),
        ];
        for (label, addr) in endpoints {
            match TcpAcceptor::bind(label, addr) {
                Ok(acceptor) => acceptors.push(Box::new(acceptor)),
                Err(e) => warn!("Failed to bind {} endpoint {}: {}", label, addr, e),
            }
        }
        if acceptors.is_empty() {
            return Err(crate::error::Error::Config(
                "no link endpoint could be bound".to_string(),
            ));
        }
        Ok(acceptors)
    }

    /// Feed one position fix: broadcast it to the displays and advance the
    /// navigation engine.
    pub fn on_position(&self, state: StateUpdate) {
        let position = LatLng::new(state.latitude, state.longitude);
        self.server.broadcast(&Message::State(state));
        self.engine.on_position(position);
    }

    /// Begin turn-by-turn navigation; route and step messages reach the
    /// displays through the engine callbacks.
    pub fn start_navigation(&self, origin: LatLng, destination: LatLng) {
        info!(
            "Starting navigation to {:.5},{:.5}",
            destination.lat, destination.lng
        );
        self.engine.start(origin, destination);
    }

    pub fn stop_navigation(&self) {
        self.engine.stop();
    }

    /// Broadcast display settings; also replayed to future sessions.
    pub fn send_settings(&self, settings: DisplaySettings) {
        self.server.broadcast(&Message::Settings(settings));
    }

    /// Broadcast wifi credentials; also replayed to future sessions.
    pub fn send_wifi_credentials(&self, creds: WifiCredentials) {
        self.server.broadcast(&Message::WifiCredentials(creds));
    }

    pub fn send_notification(&self, notification: NotificationInfo) {
        self.server.broadcast(&Message::Notification(notification));
    }

    /// Stream a package to all connected displays as a chunked transfer.
    pub fn push_package<R: Read>(&self, source: R, total_size: u64) -> Result<()> {
        let server = Arc::clone(&self.server);
        bulk::send_package(
            source,
            total_size,
            |msg| {
                server.broadcast(msg);
                if server.session_count() == 0 {
                    return Err(crate::error::Error::NotConnected);
                }
                Ok(())
            },
            |sent, total| info!("Package transfer: {}/{} chunks", sent, total),
        )
    }

    pub fn is_connected(&self) -> bool {
        self.server.is_connected()
    }

    /// Setup signal handler for graceful shutdown
    fn setup_signal_handler(&self) {
        let shutdown = Arc::clone(&self.shutdown);

        std::thread::Builder::new()
            .name("signal-handler".to_string())
            .spawn(move || {
                let mut signals =
                    Signals::new([SIGINT, SIGTERM]).expect("Failed to register signal handlers");

                if let Some(sig) = signals.forever().next() {
                    info!("Received signal {:?}, initiating shutdown...", sig);
                    shutdown.store(true, Ordering::Relaxed);
                }
            })
            .expect("Failed to spawn signal handler thread");
    }
}

/// Inbound traffic from displays. Tile requests are answered inside the
/// server; anything else from a display is unexpected on this side.
struct InboundHandler;

impl ServerHandler for InboundHandler {
    fn on_session_count(&self, count: usize) {
        info!("Connected displays: {}", count);
    }

    fn on_message(&self, msg: Message, session: &Arc<crate::transport::Session>) {
        debug!("Unhandled message from {}: {:?}", session.peer(), msg);
    }
}

/// Navigation callbacks mapped onto protocol broadcasts.
struct Broadcaster {
    server: Arc<LinkServer>,
}

impl NavigationEvents for Broadcaster {
    fn on_route_calculated(&self, route: &Route) {
        self.server.broadcast(&Message::Route(RouteSummary {
            waypoints: route
                .waypoints
                .iter()
                .map(|wp| Waypoint {
                    latitude: wp.lat,
                    longitude: wp.lng,
                })
                .collect(),
            total_distance: route.total_distance,
            total_duration: route.total_duration,
        }));
    }

    fn on_step_changed(&self, index: usize, step: &RouteStep) {
        debug!("Step {}: {}", index, step.instruction);
        self.server.broadcast(&Message::Step(StepInfo {
            instruction: step.instruction.clone(),
            maneuver: step.maneuver.clone(),
            distance: step.distance,
        }));
    }

    fn on_rerouting(&self) {
        info!("Off route, recalculating");
    }

    fn on_arrived(&self) {
        info!("Arrived at destination");
        self.server.broadcast(&Message::Step(StepInfo {
            instruction: "Arrived at your destination".to_string(),
            maneuver: "arrive".to_string(),
            distance: 0.0,
        }));
    }

    fn on_navigation_error(&self, message: &str) {
        warn!("Navigation error: {}", message);
    }
}
