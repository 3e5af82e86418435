pub mod admission;
pub mod contexts;
pub mod controller;
pub mod resources;

pub use controller::{error_policy, reconcile_task};
