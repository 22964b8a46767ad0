mod config;
mod context;
mod rights;
mod traits;

pub use config::*;
pub use context::*;
pub use rights::*;
pub use traits::*;
