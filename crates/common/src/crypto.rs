mod frm_payload;
mod key_vault;
mod key_wrap;

pub use frm_payload::*;
pub use key_vault::*;
pub use key_wrap::*;
