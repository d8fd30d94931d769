mod error;
mod paths;

pub use error::*;
pub use paths::*;
