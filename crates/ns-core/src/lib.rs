pub mod config;
pub mod error;
pub mod objects;
pub mod transaction;
pub mod types;
pub mod util;
pub mod verb;

pub use config::*;
pub use error::*;
pub use objects::*;
pub use transaction::*;
pub use types::*;
pub use verb::*;
