pub mod alerting;
pub mod client;
pub mod config;
pub mod db;
pub mod fetch;
pub mod monitor;
pub mod notifications;
pub mod version;
pub mod web;

#[cfg(test)]
pub(crate) mod test_utils;
