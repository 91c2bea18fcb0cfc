pub mod logging;
pub mod state_paths;
pub mod supervisor;
pub mod worker_pool;
pub mod worker_primitives;

pub use crate::shared::errors::RuntimeError;
pub use logging::{init_tracing, RuntimeLog, LOG_FILTER_ENV};
pub use state_paths::{bootstrap_paths, LemcPaths};
pub use supervisor::{
    cleanup_stale, is_process_alive, load_serve_state, ownership_state, run_serve,
    save_serve_state, signal_stop, stop_serve, OwnershipState, ServeState, StopResult,
};
pub use worker_pool::{JobExecutor, WorkerPool};
pub use worker_primitives::{sleep_with_stop, CancelToken};
