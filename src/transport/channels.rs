use uuid::Uuid;

/// Consumer group the followers race in for assignment events.
pub const FOLLOWERS_GROUP: &str = "followers";

/// Consumer group coordinators share for worker lifecycle messages.
pub const COORDINATORS_GROUP: &str = "coordinators";

/// Channel names, all under one configurable prefix.
#[derive(Debug, Clone)]
pub struct Channels {
    prefix: String,
}

impl Channels {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn scoped(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}:{}", self.prefix, name)
        }
    }

    /// Per-queue channel workers compete on.
    pub fn job_dispatch(&self, queue: &str) -> String {
        self.scoped(&format!("job:dispatch:{}", queue))
    }

    pub fn job_dispatched(&self) -> String {
        self.scoped("job:dispatched")
    }

    pub fn job_status(&self, execution_id: Uuid) -> String {
        self.scoped(&format!("job:{}:status", execution_id))
    }

    pub fn job_log(&self, execution_id: Uuid) -> String {
        self.scoped(&format!("job:{}:log", execution_id))
    }

    pub fn coordinator_metrics(&self) -> String {
        self.scoped("coordinator:metrics")
    }

    pub fn worker_join(&self) -> String {
        self.scoped("worker:join")
    }

    pub fn worker_heartbeat(&self) -> String {
        self.scoped("worker:heartbeat")
    }

    pub fn worker_shutdown(&self) -> String {
        self.scoped("worker:shutdown")
    }

    pub fn worker_config(&self, worker_id: &str) -> String {
        self.scoped(&format!("worker:{}:config", worker_id))
    }
}
