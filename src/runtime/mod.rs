//! Host integration: the frame runtime context, tagged unit construction,
//! background executors, and serializable status views.

pub mod api;
pub mod factory;
pub mod frame;
pub mod tokio_spawner;

pub use api::{GateSnapshot, RuntimeSnapshot, UnitStatus};
pub use factory::UnitFactoryRegistry;
pub use frame::FrameRuntime;
pub use tokio_spawner::TokioSpawner;
