mod http;
mod memory;

pub use http::{HttpRemoteClient, HttpRemoteConfig};
pub use memory::InMemoryRemote;
