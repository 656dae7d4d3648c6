pub mod control_socket;
pub mod coordinator;
pub mod diagnostics;
pub mod executor;
pub mod gap_detector;
pub mod launch_registry;
pub mod property_retry;
pub mod resolver;
pub mod subscription;
pub mod window_manager;

pub use control_socket::ControlSocket;
pub use coordinator::{ControlMessage, EngineCoordinator};
pub use window_manager::create_window_manager;
