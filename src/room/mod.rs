pub mod registry;
pub mod state;

pub use registry::ConnectionRegistry;
pub use state::RoomState;
