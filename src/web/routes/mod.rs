pub mod control_routes;
pub mod target_routes;
