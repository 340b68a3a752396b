pub mod report;
pub mod trace;
pub mod util;

pub use report::*;
pub use trace::*;
pub use util::*;
