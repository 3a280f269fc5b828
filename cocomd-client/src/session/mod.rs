//! Session state machine and controller
//!
//! - `state`: the session record and the admission rules for commands
//! - `transition`: pure `apply(state, event)` and change reporting
//! - `controller`: the single task that owns the state, performs I/O
//!   through spawned tasks and publishes `ClientEvent`s

pub mod controller;
pub mod state;
pub mod transition;

pub use controller::{Command, SessionController, SessionHandle};
pub use state::{Admission, DisplayedFrame, Generations, SessionState, SessionView};
pub use transition::{apply, changes, SessionEvent};
