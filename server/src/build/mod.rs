mod coordinator;

pub use coordinator::{BuildCoordinator, BuildSnapshot, BuildState};
