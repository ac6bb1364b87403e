//! Flow handler system.
//!
//! Defines the `FlowHandler` trait that all handlers implement, plus a
//! registry for the handlers a deployment exposes and the invoker that
//! dispatches a flow to its handler. Handlers are registered by the host
//! application at startup; flows reference them by name, so a stored flow
//! can only ever reach code that was deliberately wired in.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Result, SchedulerError};
use crate::types::DataFlow;

/// Boxed error type handlers return. Anything `Error + Send + Sync`
/// converts into it with `?`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Trait that all flow handlers must implement.
#[async_trait]
pub trait FlowHandler: Send + Sync {
    /// Unique name flows reference this handler by (e.g. "webhook").
    fn name(&self) -> &str;
    /// Execute one occurrence of a flow with its configured params.
    async fn run(&self, params: &serde_json::Value) -> std::result::Result<(), HandlerError>;
}

/// Set of handlers available to the executor, looked up by name.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn FlowHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own name. Re-registering a name
    /// replaces the previous handler.
    pub fn register(&mut self, handler: Arc<dyn FlowHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FlowHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered handler names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Resolves flows to handlers and drives the actual invocation.
pub struct FlowInvoker {
    handlers: HandlerRegistry,
    invocation_timeout: Option<Duration>,
}

impl FlowInvoker {
    pub fn new(handlers: HandlerRegistry) -> Self {
        Self {
            handlers,
            invocation_timeout: None,
        }
    }

    /// Cap every handler invocation at `timeout`. Expiry fails the run
    /// like any other handler error.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = Some(timeout);
        self
    }

    /// Look up the handler the flow names.
    pub fn resolve(&self, flow: &DataFlow) -> Result<Arc<dyn FlowHandler>> {
        self.handlers
            .get(&flow.handler)
            .ok_or_else(|| SchedulerError::HandlerNotFound {
                flow: flow.name.clone(),
                handler: flow.handler.clone(),
            })
    }

    /// Run the flow through `handler`, applying the configured timeout.
    pub async fn invoke(
        &self,
        handler: &dyn FlowHandler,
        flow: &DataFlow,
    ) -> std::result::Result<(), HandlerError> {
        debug!(flow = %flow.name, handler = %handler.name(), "invoking handler");
        match self.invocation_timeout {
            Some(limit) => match tokio::time::timeout(limit, handler.run(&flow.params)).await {
                Ok(result) => result,
                Err(_) => Err(format!("handler exceeded {}ms time limit", limit.as_millis()).into()),
            },
            None => handler.run(&flow.params).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct Recorder {
        name: &'static str,
        fail_with: Option<&'static str>,
    }

    #[async_trait]
    impl FlowHandler for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, _params: &serde_json::Value) -> std::result::Result<(), HandlerError> {
            match self.fail_with {
                Some(message) => Err(message.into()),
                None => Ok(()),
            }
        }
    }

    struct Sleeper;

    #[async_trait]
    impl FlowHandler for Sleeper {
        fn name(&self) -> &str {
            "sleeper"
        }

        async fn run(&self, _params: &serde_json::Value) -> std::result::Result<(), HandlerError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    fn flow_named(name: &str, handler: &str) -> DataFlow {
        let now = Utc::now();
        DataFlow {
            id: "flow-1".to_string(),
            name: name.to_string(),
            run_interval_secs: 60,
            enabled: true,
            handler: handler.to_string(),
            params: serde_json::Value::Null,
            last_run_at: None,
            last_run_status: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn resolve_finds_registered_handler() {
        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(Recorder {
            name: "noop",
            fail_with: None,
        }));
        let invoker = FlowInvoker::new(handlers);

        let handler = invoker.resolve(&flow_named("sync", "noop")).unwrap();
        assert_eq!(handler.name(), "noop");
    }

    #[test]
    fn resolve_unknown_handler_names_flow_and_handler() {
        let invoker = FlowInvoker::new(HandlerRegistry::new());
        let err = invoker.resolve(&flow_named("sync", "ghost")).err().unwrap();
        match err {
            SchedulerError::HandlerNotFound { flow, handler } => {
                assert_eq!(flow, "sync");
                assert_eq!(handler, "ghost");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn invoke_passes_handler_errors_through() {
        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(Recorder {
            name: "broken",
            fail_with: Some("boom"),
        }));
        let invoker = FlowInvoker::new(handlers);
        let flow = flow_named("sync", "broken");

        let handler = invoker.resolve(&flow).unwrap();
        let err = invoker.invoke(handler.as_ref(), &flow).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn invoke_enforces_the_timeout() {
        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(Sleeper));
        let invoker = FlowInvoker::new(handlers).with_timeout(Duration::from_millis(50));
        let flow = flow_named("slow", "sleeper");

        let handler = invoker.resolve(&flow).unwrap();
        let err = invoker.invoke(handler.as_ref(), &flow).await.unwrap_err();
        assert!(err.to_string().contains("time limit"));
    }

    #[test]
    fn names_are_sorted() {
        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(Recorder {
            name: "zeta",
            fail_with: None,
        }));
        handlers.register(Arc::new(Recorder {
            name: "alpha",
            fail_with: None,
        }));
        assert_eq!(handlers.names(), vec!["alpha", "zeta"]);
    }
}
