mod integration;
mod manager;
mod service;

pub use integration::*;
pub use manager::*;
pub use service::*;
