//! The evaluation pipeline: staging, dispatch, worker execution, and the
//! storage lifecycle.
//!
//! The api crate is a thin HTTP shell over this crate. Data flows:
//! staging persists uploads and creates the job row, the dispatcher hands
//! the staged job to a worker-pool slot and returns a correlation token,
//! the evaluator drives the job state machine to a terminal state, and the
//! storage lifecycle manager reclaims disk space.

pub mod artifact;
pub mod dispatcher;
pub mod error;
pub mod evaluator;
pub mod frame;
pub mod layout;
pub mod plot;
pub mod preprocess;
pub mod staging;
pub mod storage;
