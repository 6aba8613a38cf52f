//! State module for tracking dispatch progress
//!
//! # Components
//!
//! - `RequestState`: Lifecycle of a single request (queued, dispatched, retrying, terminal)
//! - `DomainState`: Per-domain politeness bookkeeping used by the scheduler

mod domain_state;
mod request_state;

pub use domain_state::DomainState;
pub use request_state::RequestState;
