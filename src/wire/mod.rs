//! Remote service contracts
//!
//! Data shapes and call traits for the generation, project and dashboard
//! services. Transports implement the traits; everything above this module
//! only talks to the traits.

pub mod dashboard;
pub mod generation;
pub mod project;
