pub mod session;
pub mod snapshot;
pub mod supervisor;
