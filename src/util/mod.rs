//! Small async and data helpers used alongside the sequencer.

mod delay;
mod lines;
mod sequential;
mod value;

pub use delay::delay;
pub use lines::{for_each_line, split_lines};
pub use sequential::process_sequentially;
pub use value::{Opaque, Value, deep_copy};
