//! Core functionalities.
mod agent;
mod env;
mod observation;
mod policy;
mod replay_buffer;
mod step;
pub use agent::Agent;
pub use env::Env;
pub use observation::{ActionMask, Observation, Transition, N_PLANES, UNREVEALED};
pub use policy::Policy;
pub use replay_buffer::{ExperienceBufferBase, ReplayBufferBase};
pub use step::Step;
