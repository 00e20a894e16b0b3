//! This module holds policies, which are entities that allow configuring
//! the driver's behaviour. Users can plug in their own by implementing the trait.
//!
//! This includes:
//! - [load balancing](load_balancing), choosing which reader or writer serves a request.

pub mod load_balancing;
