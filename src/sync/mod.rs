pub mod backoff;
pub mod bootstrap;
pub mod controller;
pub mod dashboard;
pub mod error;
pub mod registry;
pub mod session;
pub mod trigger;

pub use dashboard::DashboardState;
pub use registry::SessionRegistry;
