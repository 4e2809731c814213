//! Composite workflows built from agents.
//!
//! Each workflow is itself an [`Agent`](wayfarer_agent::Agent), so they nest:
//! a dispatcher can route to a pipeline, a pipeline can end in a loop.
//!
//! - [`SequentialAgent`]: stages in order, handing off through state
//! - [`RefinementLoop`]: critic/refiner cycle with an iteration cap
//! - [`Dispatcher`]: router label → worker, over a closed [`RouteTable`]

pub mod dispatcher;
pub mod refinement_loop;
pub mod sequential;

pub use dispatcher::{Dispatcher, RouteLabel, RouteTable, is_routing_error, normalize_label};
pub use refinement_loop::{LoopReport, LoopState, RefinementLoop};
pub use sequential::SequentialAgent;
