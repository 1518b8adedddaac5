/// Connection settings shared by every technology a `ConnectionFactory` can be
/// registered for.
///
/// `technology_tag` is the discriminator the connection manager's factory registry
/// matches rules against (see `rpc-core::connection_manager`); it participates in
/// equality the same way a `JmuxConfig` rule set keys off filtering rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    host: String,
    port: u16,
    worker_threads: u32,
    operation_blocking: bool,
    technology_tag: String,
}

pub const DEFAULT_WORKER_THREADS: u32 = 4;

impl NetworkConfig {
    pub fn new(host: impl Into<String>, port: u16, technology_tag: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            worker_threads: DEFAULT_WORKER_THREADS,
            operation_blocking: false,
            technology_tag: technology_tag.into(),
        }
    }

    #[must_use]
    pub fn with_worker_threads(mut self, worker_threads: u32) -> Self {
        assert!(worker_threads >= 1, "worker_threads must be at least 1");
        self.worker_threads = worker_threads;
        self
    }

    #[must_use]
    pub fn with_operation_blocking(mut self, operation_blocking: bool) -> Self {
        self.operation_blocking = operation_blocking;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn worker_threads(&self) -> u32 {
        self.worker_threads
    }

    pub fn operation_blocking(&self) -> bool {
        self.operation_blocking
    }

    pub fn technology_tag(&self) -> &str {
        &self.technology_tag
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
