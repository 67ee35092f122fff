//! Host HTTP routes. Saga status routes come from the saga component.

pub mod health;
pub mod metrics;
