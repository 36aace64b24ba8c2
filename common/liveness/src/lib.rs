//! Marker crate. `lifecycle` depends on this path so liveness-related types can be
//! relocated here without a breaking change to dependents; currently empty.
