pub mod cayenne_lpp;
pub mod cel;
mod error;
pub mod script;

pub use cayenne_lpp::CayenneLpp;
pub use cel::CelEnvironment;
pub use error::{PayloadError, Result};
pub use script::{DecodedUplink, EncodedDownlink, ScriptInput, ScriptRunner};

use serde_json::{Map, Value};

/// Binary payload format that maps to and from a JSON object.
pub trait PayloadCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Value>;

    fn encode(&self, object: &Map<String, Value>) -> Result<Vec<u8>>;
}
