mod engine;
mod pause;
mod poller;
mod session;
mod state;

pub use engine::{PresenceTracker, TrackerSettings, TrackerStatus};
pub use pause::PauseController;
pub use poller::AdaptivePoller;
pub use session::{CloseCause, Session, SessionClose, SessionMachine, Transition};
pub use state::{PollRate, RunPhase, SessionPhase, TrackerState};
