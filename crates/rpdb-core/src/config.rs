// Runtime options of the persistence layer.
//
// These describe *how* the layer behaves: socket usage, scheduler
// switches and the callbacks of the embedding application. Credentials
// and transport settings live in `rpdb_api::ApiConfig`; nothing here
// touches disk.

use std::sync::Arc;

use rpdb_api::model::{Entry, ExecutionResponse};

use crate::persistence::Persistence;
use crate::scheduler::{ExecResponseExecutor, Executor, ExecutionType, SchedulerOptions};
use crate::socket::SocketOptions;

/// Hook running once inside `start()`, after the initial load and
/// attribute linking, right before the first observer notification.
pub type BeforeInitialUpdateHook = Arc<dyn Fn(&Persistence) + Send + Sync>;

/// Options for the modules of the persistence layer.
#[derive(Default)]
pub struct PersistenceOptions {
    /// Socket connection options. The socket is disabled by default.
    pub socket: SocketOptions,

    /// Execution scheduling switches.
    pub scheduler: SchedulerOptions,

    /// Called whenever an entry should be executed.
    pub executor: Option<Executor>,

    /// Called for entries whose attribute expects a response; the
    /// returned value is sent back to the server.
    pub exec_response_executor: Option<ExecResponseExecutor>,

    /// Called before the first update notification after a full load.
    pub before_initial_update_request: Option<BeforeInitialUpdateHook>,
}

impl PersistenceOptions {
    pub fn new() -> Self {
        PersistenceOptions::default()
    }

    pub fn with_executor(
        mut self,
        executor: impl Fn(Entry, ExecutionType) + Send + Sync + 'static,
    ) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    pub fn with_exec_response_executor(
        mut self,
        executor: impl Fn(Entry) -> Option<ExecutionResponse> + Send + Sync + 'static,
    ) -> Self {
        self.exec_response_executor = Some(Arc::new(executor));
        self
    }

    pub fn with_before_initial_update_request(
        mut self,
        hook: impl Fn(&Persistence) + Send + Sync + 'static,
    ) -> Self {
        self.before_initial_update_request = Some(Arc::new(hook));
        self
    }
}

impl std::fmt::Debug for PersistenceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceOptions")
            .field("socket", &self.socket)
            .field("scheduler", &self.scheduler)
            .field("executor", &self.executor.is_some())
            .field(
                "exec_response_executor",
                &self.exec_response_executor.is_some(),
            )
            .field(
                "before_initial_update_request",
                &self.before_initial_update_request.is_some(),
            )
            .finish()
    }
}
