pub mod room;

pub use room::MemoryRoomStore;
