//! Models for property-based testing of the log ring.

pub mod drain_model;
