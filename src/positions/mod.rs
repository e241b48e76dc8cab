pub mod exits;

pub use exits::{ExitContext, ExitDirective, ExitEvaluator, TrailingUpdate};
