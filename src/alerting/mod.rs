pub mod controller;

pub use controller::{AckOutcome, Acknowledgement, AlertController, AlertState, AlertTransition};
