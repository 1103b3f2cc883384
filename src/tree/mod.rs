//! Generic balanced-tree engine: walkers, structural operations, cursors.

pub mod cursor;
pub mod ops;
pub mod walker;

pub use cursor::Cursor;
pub use ops::{TreeCore, TreeStats};
pub use walker::{KeySearch, PathStep, SelectWalk, Skip, StepPolicy, WalkOutcome};
