mod aggregate;

pub use aggregate::{aggregate, DerivedMetrics};
