pub mod call_setup;
pub mod calls;
pub mod config;

pub use call_setup::*;
pub use calls::*;
pub use config::*;
