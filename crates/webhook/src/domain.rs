mod health;
mod integration;
mod rate_limit;
mod request;
mod service;
mod sink;
mod templates;

pub use health::*;
pub use integration::*;
pub use rate_limit::*;
pub use request::*;
pub use service::*;
pub use sink::*;
pub use templates::*;
