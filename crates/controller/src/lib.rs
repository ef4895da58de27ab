pub mod bundle;
pub mod driver;
pub mod reconcile;
pub mod state;

pub use bundle::{DesiredFunctionBundle, RawFunctionBundle};
pub use driver::{FunctionController, ObserveHandle, ResolvedImage};
pub use reconcile::{CloudResource, RoleResource};
pub use state::{ObservedState, StateCell};
