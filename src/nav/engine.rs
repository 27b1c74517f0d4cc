//! Turn-by-turn navigation state machine.
//!
//! Consumes a live position stream and a route from a [`Router`]
//! collaborator; emits route/step/arrival callbacks through
//! [`NavigationEvents`]. Route computation runs on a spawned thread so the
//! position path never blocks on the network; an epoch counter discards
//! results that arrive after `stop` or after a newer request.

use crate::error::Result;
use crate::nav::geo::{LatLng, haversine_m};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Advance to the next step when within this distance of its maneuver point
pub const STEP_ADVANCE_RADIUS_M: f64 = 45.0;
/// Off route when farther than this from every stored polyline point
pub const OFF_ROUTE_RADIUS_M: f64 = 80.0;
/// Arrived when within this distance of the destination
pub const ARRIVAL_RADIUS_M: f64 = 30.0;
/// Minimum interval between reroute triggers, measured on a monotonic clock
pub const REROUTE_COOLDOWN: Duration = Duration::from_secs(15);
/// Dense maneuver clusters can put two points inside the advance radius;
/// never skip more than this many steps in one update.
const MAX_ADVANCES_PER_UPDATE: usize = 2;

/// One maneuver of a computed route.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteStep {
    pub instruction: String,
    pub maneuver: String,
    /// Distance covered by this step, meters
    pub distance: f64,
    /// Maneuver point
    pub location: LatLng,
}

/// A computed route: polyline for drawing and off-route checks, steps for
/// turn-by-turn guidance.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub waypoints: Vec<LatLng>,
    pub steps: Vec<RouteStep>,
    /// Total length, meters
    pub total_distance: f64,
    /// Estimated travel time, seconds
    pub total_duration: f64,
}

/// External routing collaborator. Called on a background thread; blocking
/// is fine.
pub trait Router: Send + Sync {
    fn compute_route(&self, origin: LatLng, destination: LatLng) -> Result<Route>;
}

/// Navigation callbacks. Invoked outside the engine's internal lock, from
/// either the position-update caller or a route-computation thread.
pub trait NavigationEvents: Send + Sync {
    fn on_route_calculated(&self, route: &Route);
    fn on_step_changed(&self, index: usize, step: &RouteStep);
    fn on_rerouting(&self);
    fn on_arrived(&self);
    fn on_navigation_error(&self, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Navigating,
    Arrived,
}

struct EngineState {
    phase: Phase,
    route: Option<Route>,
    step_index: usize,
    destination: Option<LatLng>,
    last_reroute: Option<Instant>,
    /// Bumped by `start`, reroute and `stop`; a route result whose epoch no
    /// longer matches is stale and dropped.
    epoch: u64,
}

/// See module docs. Position updates are expected from a single caller;
/// the internal lock exists for the route-computation threads.
pub struct NavigationEngine {
    router: Arc<dyn Router>,
    events: Arc<dyn NavigationEvents>,
    state: Mutex<EngineState>,
}

impl NavigationEngine {
    pub fn new(router: Arc<dyn Router>, events: Arc<dyn NavigationEvents>) -> Arc<Self> {
        Arc::new(Self {
            router,
            events,
            state: Mutex::new(EngineState {
                phase: Phase::Idle,
                route: None,
                step_index: 0,
                destination: None,
                last_reroute: None,
                epoch: 0,
            }),
        })
    }

    /// Begin navigating from `origin` to `destination`. The route is
    /// computed asynchronously; until it arrives the engine stays idle and
    /// position updates are ignored.
    pub fn start(self: &Arc<Self>, origin: LatLng, destination: LatLng) {
        let epoch = {
            let mut state = self.state.lock();
            state.phase = Phase::Idle;
            state.route = None;
            state.step_index = 0;
            state.destination = Some(destination);
            state.last_reroute = None;
            state.epoch += 1;
            state.epoch
        };
        self.compute_async(origin, destination, epoch);
    }

    /// Return to idle from any state, discarding the route.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.phase = Phase::Idle;
        state.route = None;
        state.step_index = 0;
        state.destination = None;
        state.epoch += 1;
    }

    pub fn is_navigating(&self) -> bool {
        self.state.lock().phase == Phase::Navigating
    }

    /// Feed one position fix. Checks arrival, then step advance, then
    /// off-route, in that order; callbacks fire after the lock is released.
    pub fn on_position(self: &Arc<Self>, position: LatLng) {
        enum Emit {
            Step(usize, RouteStep),
            Arrived,
            Rerouting,
        }

        let mut emissions: Vec<Emit> = Vec::new();
        let mut reroute_from: Option<(LatLng, LatLng, u64)> = None;

        {
            let mut state = self.state.lock();
            if state.phase != Phase::Navigating {
                return;
            }
            let Some(destination) = state.destination else {
                return;
            };
            let (steps, waypoints) = match &state.route {
                Some(route) => (route.steps.clone(), route.waypoints.clone()),
                None => return,
            };

            // Arrival: near the destination and already on (or one before)
            // the final step.
            let near_destination = haversine_m(position, destination) < ARRIVAL_RADIUS_M;
            if near_destination && state.step_index + 2 >= steps.len() {
                state.phase = Phase::Arrived;
                emissions.push(Emit::Arrived);
            } else {
                let mut advanced = 0;
                while advanced < MAX_ADVANCES_PER_UPDATE && state.step_index + 1 < steps.len() {
                    let next = &steps[state.step_index + 1];
                    if haversine_m(position, next.location) >= STEP_ADVANCE_RADIUS_M {
                        break;
                    }
                    state.step_index += 1;
                    advanced += 1;
                    emissions.push(Emit::Step(state.step_index, next.clone()));
                }

                if advanced == 0 && is_off_route(position, &waypoints) {
                    let cooled_down = state
                        .last_reroute
                        .is_none_or(|t| t.elapsed() >= REROUTE_COOLDOWN);
                    if cooled_down {
                        state.last_reroute = Some(Instant::now());
                        state.epoch += 1;
                        emissions.push(Emit::Rerouting);
                        reroute_from = Some((position, destination, state.epoch));
                    }
                }
            }
        }

        for emit in emissions {
            match emit {
                Emit::Step(index, step) => self.events.on_step_changed(index, &step),
                Emit::Arrived => self.events.on_arrived(),
                Emit::Rerouting => self.events.on_rerouting(),
            }
        }
        if let Some((origin, destination, epoch)) = reroute_from {
            self.compute_async(origin, destination, epoch);
        }
    }

    fn compute_async(self: &Arc<Self>, origin: LatLng, destination: LatLng, epoch: u64) {
        let engine = Arc::clone(self);
        let spawn = thread::Builder::new()
            .name("nav-route".to_string())
            .spawn(move || {
                let result = engine.router.compute_route(origin, destination);
                engine.apply_route_result(result, epoch);
            });
        if let Err(e) = spawn {
            log::error!("Failed to spawn route thread: {}", e);
            self.events
                .on_navigation_error(&format!("route computation unavailable: {}", e));
        }
    }

    fn apply_route_result(&self, result: Result<Route>, epoch: u64) {
        match result {
            Ok(route) => {
                let first_step = {
                    let mut state = self.state.lock();
                    if state.epoch != epoch {
                        log::debug!("Dropping stale route result");
                        return;
                    }
                    state.route = Some(route.clone());
                    state.step_index = 0;
                    state.phase = Phase::Navigating;
                    route.steps.first().cloned()
                };
                log::info!(
                    "Route calculated: {:.0} m, {} steps",
                    route.total_distance,
                    route.steps.len()
                );
                self.events.on_route_calculated(&route);
                if let Some(step) = first_step {
                    self.events.on_step_changed(0, &step);
                }
            }
            Err(e) => {
                let stale = self.state.lock().epoch != epoch;
                if stale {
                    return;
                }
                log::warn!("Route computation failed: {}", e);
                self.events.on_navigation_error(&e.to_string());
            }
        }
    }
}

fn is_off_route(position: LatLng, waypoints: &[LatLng]) -> bool {
    !waypoints.is_empty()
        && waypoints
            .iter()
            .all(|&wp| haversine_m(position, wp) > OFF_ROUTE_RADIUS_M)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crossbeam_channel::{Receiver, Sender, unbounded};

    const RECV_TIMEOUT: Duration = Duration::from_secs(2);

    #[derive(Debug, PartialEq)]
    enum Event {
        Route(usize),
        Step(usize),
        Rerouting,
        Arrived,
        Error,
    }

    struct Recorder {
        tx: Sender<Event>,
    }

    impl Recorder {
        fn new() -> (Arc<Self>, Receiver<Event>) {
            let (tx, rx) = unbounded();
            (Arc::new(Self { tx }), rx)
        }
    }

    impl NavigationEvents for Recorder {
        fn on_route_calculated(&self, route: &Route) {
            let _ = self.tx.send(Event::Route(route.steps.len()));
        }
        fn on_step_changed(&self, index: usize, _step: &RouteStep) {
            let _ = self.tx.send(Event::Step(index));
        }
        fn on_rerouting(&self) {
            let _ = self.tx.send(Event::Rerouting);
        }
        fn on_arrived(&self) {
            let _ = self.tx.send(Event::Arrived);
        }
        fn on_navigation_error(&self, _message: &str) {
            let _ = self.tx.send(Event::Error);
        }
    }

    struct FixedRouter {
        route: Option<Route>,
    }

    impl Router for FixedRouter {
        fn compute_route(&self, _origin: LatLng, _destination: LatLng) -> Result<Route> {
            self.route
                .clone()
                .ok_or_else(|| Error::Router("no route".to_string()))
        }
    }

    fn step_at(location: LatLng) -> RouteStep {
        RouteStep {
            instruction: "Continue".to_string(),
            maneuver: "straight".to_string(),
            distance: 100.0,
            location,
        }
    }

    /// Step locations roughly 111 m apart (0.001 deg of latitude).
    fn spaced_route(n: usize) -> Route {
        let locations: Vec<LatLng> = (0..n).map(|i| LatLng::new(i as f64 * 0.001, 0.0)).collect();
        Route {
            waypoints: locations.clone(),
            steps: locations.into_iter().map(step_at).collect(),
            total_distance: 111.0 * n as f64,
            total_duration: 60.0,
        }
    }

    fn expect(rx: &Receiver<Event>, expected: Event) {
        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), expected);
    }

    #[test]
    fn steps_progress_in_order_then_arrival() {
        let route = spaced_route(4);
        let steps = route.steps.clone();
        // Destination well past the last step so arrival only fires there
        let destination = LatLng::new(0.01, 0.0);
        let (recorder, rx) = Recorder::new();
        let engine = NavigationEngine::new(Arc::new(FixedRouter { route: Some(route) }), recorder);

        engine.start(steps[0].location, destination);
        expect(&rx, Event::Route(4));
        expect(&rx, Event::Step(0));

        for (i, step) in steps.iter().enumerate().skip(1) {
            engine.on_position(step.location);
            expect(&rx, Event::Step(i));
        }

        engine.on_position(destination);
        expect(&rx, Event::Arrived);
        assert!(!engine.is_navigating());

        // Arrived is terminal for this route; further fixes are ignored
        engine.on_position(destination);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn at_most_two_advances_per_update() {
        // Steps 1..3 clustered within a few meters of each other, far from
        // step 0.
        let cluster = LatLng::new(0.01, 0.0);
        let near = |d: f64| LatLng::new(0.01 + d, 0.0);
        let route = Route {
            waypoints: vec![LatLng::new(0.0, 0.0), cluster],
            steps: vec![
                step_at(LatLng::new(0.0, 0.0)),
                step_at(cluster),
                step_at(near(0.0001)),
                step_at(near(0.0002)),
            ],
            total_distance: 1200.0,
            total_duration: 120.0,
        };
        let destination = LatLng::new(0.02, 0.0);
        let (recorder, rx) = Recorder::new();
        let engine = NavigationEngine::new(Arc::new(FixedRouter { route: Some(route) }), recorder);

        engine.start(LatLng::new(0.0, 0.0), destination);
        expect(&rx, Event::Route(4));
        expect(&rx, Event::Step(0));

        // All three remaining maneuver points are within the advance
        // radius; only two may be taken in one update.
        engine.on_position(cluster);
        expect(&rx, Event::Step(1));
        expect(&rx, Event::Step(2));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        // The next update picks up the last one
        engine.on_position(cluster);
        expect(&rx, Event::Step(3));
    }

    #[test]
    fn off_route_triggers_one_reroute_within_cooldown() {
        let route = spaced_route(4);
        let destination = LatLng::new(0.003, 0.0);
        let (recorder, rx) = Recorder::new();
        let engine = NavigationEngine::new(Arc::new(FixedRouter { route: Some(route) }), recorder);

        engine.start(LatLng::new(0.0, 0.0), destination);
        expect(&rx, Event::Route(4));
        expect(&rx, Event::Step(0));

        // About 550 m east of the whole polyline
        let off = LatLng::new(0.0, 0.005);
        engine.on_position(off);
        expect(&rx, Event::Rerouting);
        // Replacement route arrives and resets to step 0
        expect(&rx, Event::Route(4));
        expect(&rx, Event::Step(0));

        // Still off route, but inside the cooldown window
        engine.on_position(off);
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    }

    #[test]
    fn route_failure_reports_error_and_stays_idle() {
        let (recorder, rx) = Recorder::new();
        let engine = NavigationEngine::new(Arc::new(FixedRouter { route: None }), recorder);

        engine.start(LatLng::new(0.0, 0.0), LatLng::new(1.0, 1.0));
        expect(&rx, Event::Error);
        assert!(!engine.is_navigating());
    }

    #[test]
    fn stop_discards_pending_route() {
        struct SlowRouter {
            route: Route,
        }
        impl Router for SlowRouter {
            fn compute_route(&self, _o: LatLng, _d: LatLng) -> Result<Route> {
                thread::sleep(Duration::from_millis(100));
                Ok(self.route.clone())
            }
        }

        let (recorder, rx) = Recorder::new();
        let engine = NavigationEngine::new(
            Arc::new(SlowRouter {
                route: spaced_route(2),
            }),
            recorder,
        );
        engine.start(LatLng::new(0.0, 0.0), LatLng::new(0.001, 0.0));
        engine.stop();

        // The result lands after stop and must be dropped
        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
        assert!(!engine.is_navigating());
    }
}
