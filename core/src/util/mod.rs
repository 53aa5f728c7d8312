pub mod logging;
pub mod par;

pub use logging::init_tracing;
pub use par::{par_filter, par_for_each};
