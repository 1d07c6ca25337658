pub mod io;
pub mod logging;
pub mod time;

pub use time::{Clock, ManualClock, SystemClock};
