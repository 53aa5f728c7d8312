pub mod event;
pub mod result;

pub use event::*;
pub use result::*;
