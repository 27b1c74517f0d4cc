//! Turn-by-turn navigation: geodesy, the step state machine and the OSRM
//! router backend.

pub mod engine;
pub mod geo;
pub mod osrm;

pub use engine::{
    ARRIVAL_RADIUS_M, NavigationEngine, NavigationEvents, OFF_ROUTE_RADIUS_M, REROUTE_COOLDOWN,
    Route, RouteStep, Router, STEP_ADVANCE_RADIUS_M,
};
pub use geo::{EARTH_RADIUS_M, LatLng, haversine_m};
pub use osrm::OsrmRouter;
