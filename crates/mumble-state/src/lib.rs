//! Client-side state for a Mumble channel sidebar: the canonical entity
//! store, hierarchy rebuild, layout projections, and the session
//! controller that ties them to the event stream.

pub mod hierarchy;
pub mod projection;
pub mod router;
pub mod session;
pub mod store;

pub use hierarchy::{rebuild, HierarchyReport};
pub use projection::{project, DisplayChannel, DisplayTree, DisplayUser};
pub use router::route_frame;
pub use session::{LocalUserState, RequestSink, SessionController, SessionPhase};
pub use store::{Channel, EntityStore, User};
