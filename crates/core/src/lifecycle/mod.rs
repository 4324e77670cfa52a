//! Ticket lifecycle: which transitions are legal, and what each one implies.

mod machine;
pub mod messages;
pub mod titles;

pub use machine::{is_allowed, plan, Actor, Effect, LifecycleEvent, TransitionPlan};
pub use titles::{closed_title, open_title, sanitize_title, title_for};
