pub mod fixtures;

pub use fixtures::{MAX_AGE, PipelineEnv, WAIT, await_session_drained, env};
