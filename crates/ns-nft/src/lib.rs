mod apply;
pub mod diff;
pub mod dump;
pub mod engine;
pub mod refs;
pub mod state;
pub mod status;

pub use diff::*;
pub use dump::*;
pub use engine::*;
pub use state::*;
pub use status::*;
