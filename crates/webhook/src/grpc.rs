mod template_handler;
mod webhook_handler;

pub use template_handler::*;
pub use webhook_handler::*;
