//! Activity inbound interceptors.
//!
//! An [`Interceptors`] value is an ordered list of factories. For every activity
//! invocation each factory builds a fresh interceptor, and the resulting chain wraps
//! the handler with the first-listed interceptor outermost:
//!
//! ```text
//! first.execute -> second.execute -> ... -> handler.execute
//! ```

use crate::activity::{ActivityContext, ActivityHandler, ActivityInput, ActivityResult};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[async_trait]
pub trait ActivityInboundInterceptor: Send + Sync {
    /// Wrap one activity invocation. Call `next.run(input)` to continue inward.
    async fn execute(&self, input: ActivityInput, next: Next<'_>) -> ActivityResult;
}

/// Remainder of the chain below the current interceptor
pub struct Next<'a> {
    interceptors: &'a [Box<dyn ActivityInboundInterceptor>],
    handler: &'a dyn ActivityHandler,
}

impl<'a> Next<'a> {
    pub fn new(
        interceptors: &'a [Box<dyn ActivityInboundInterceptor>],
        handler: &'a dyn ActivityHandler,
    ) -> Self {
        Next {
            interceptors,
            handler,
        }
    }

    pub async fn run(self, input: ActivityInput) -> ActivityResult {
        match self.interceptors.split_first() {
            Some((outer, rest)) => outer.execute(input, Next::new(rest, self.handler)).await,
            None => self.handler.execute(input).await,
        }
    }
}

pub type ActivityInterceptorFactory =
    Arc<dyn Fn(&ActivityContext) -> Box<dyn ActivityInboundInterceptor> + Send + Sync>;

#[derive(Clone)]
struct NamedFactory {
    name: &'static str,
    factory: ActivityInterceptorFactory,
}

/// Ordered interceptor chain, outermost first
#[derive(Clone, Default)]
pub struct Interceptors {
    activity_inbound: Vec<NamedFactory>,
}

impl Interceptors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a factory; it wraps inside every factory added before it.
    pub fn activity_inbound<F>(mut self, name: &'static str, factory: F) -> Self
    where
        F: Fn(&ActivityContext) -> Box<dyn ActivityInboundInterceptor> + Send + Sync + 'static,
    {
        self.activity_inbound.push(NamedFactory {
            name,
            factory: Arc::new(factory),
        });
        self
    }

    /// Names in wrapping order, outermost first
    pub fn activity_inbound_names(&self) -> Vec<&'static str> {
        self.activity_inbound.iter().map(|f| f.name).collect()
    }

    pub fn len(&self) -> usize {
        self.activity_inbound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activity_inbound.is_empty()
    }

    /// Build the per-invocation chain and run `handler` through it.
    pub async fn execute_activity(
        &self,
        handler: &dyn ActivityHandler,
        input: ActivityInput,
    ) -> ActivityResult {
        let chain: Vec<Box<dyn ActivityInboundInterceptor>> = self
            .activity_inbound
            .iter()
            .map(|f| (f.factory)(&input.context))
            .collect();

        Next::new(&chain, handler).run(input).await
    }
}

impl fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptors")
            .field("activity_inbound", &self.activity_inbound_names())
            .finish()
    }
}

/// Platform default: logs start and outcome of each activity.
pub struct LoggingActivityInterceptor {
    context: ActivityContext,
}

impl LoggingActivityInterceptor {
    pub fn new(context: &ActivityContext) -> Self {
        LoggingActivityInterceptor {
            context: context.clone(),
        }
    }
}

#[async_trait]
impl ActivityInboundInterceptor for LoggingActivityInterceptor {
    async fn execute(&self, input: ActivityInput, next: Next<'_>) -> ActivityResult {
        let started = Instant::now();
        debug!(
            task_id = %self.context.task_id,
            activity_type = %self.context.activity_type,
            attempt = self.context.attempt,
            "Activity started"
        );

        let result = next.run(input).await;

        match &result {
            Ok(_) => debug!(
                task_id = %self.context.task_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Activity completed"
            ),
            Err(e) => warn!(
                task_id = %self.context.task_id,
                activity_type = %self.context.activity_type,
                "Activity failed: {}",
                e
            ),
        }
        result
    }
}

pub const LOGGING_INTERCEPTOR: &str = "logging";

/// Append the platform default interceptors after the caller's own.
pub fn append_default_interceptors(interceptors: Interceptors) -> Interceptors {
    interceptors.activity_inbound(LOGGING_INTERCEPTOR, |ctx| {
        Box::new(LoggingActivityInterceptor::new(ctx))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{test_context, EchoActivity};
    use parking_lot::Mutex;

    struct Recording {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ActivityInboundInterceptor for Recording {
        async fn execute(&self, input: ActivityInput, next: Next<'_>) -> ActivityResult {
            self.log.lock().push(format!("enter {}", self.label));
            let result = next.run(input).await;
            self.log.lock().push(format!("exit {}", self.label));
            result
        }
    }

    fn recording(
        label: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> impl Fn(&ActivityContext) -> Box<dyn ActivityInboundInterceptor> + Send + Sync + 'static
    {
        let log = log.clone();
        move |_: &ActivityContext| -> Box<dyn ActivityInboundInterceptor> {
            Box::new(Recording {
                label,
                log: log.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_first_listed_wraps_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let interceptors = Interceptors::new()
            .activity_inbound("outer", recording("outer", &log))
            .activity_inbound("inner", recording("inner", &log));

        let input = ActivityInput::new(test_context("echo"), b"x".to_vec());
        let result = interceptors.execute_activity(&EchoActivity, input).await;

        assert_eq!(result.unwrap(), b"x");
        assert_eq!(
            *log.lock(),
            vec!["enter outer", "enter inner", "exit inner", "exit outer"]
        );
    }

    #[tokio::test]
    async fn test_interceptor_can_short_circuit() {
        struct Deny;

        #[async_trait]
        impl ActivityInboundInterceptor for Deny {
            async fn execute(&self, _input: ActivityInput, _next: Next<'_>) -> ActivityResult {
                Err("denied".to_string())
            }
        }

        let interceptors = Interceptors::new().activity_inbound("deny", |_| Box::new(Deny));
        let input = ActivityInput::new(test_context("echo"), Vec::new());
        let result = interceptors.execute_activity(&EchoActivity, input).await;
        assert_eq!(result, Err("denied".to_string()));
    }

    #[tokio::test]
    async fn test_empty_chain_calls_handler() {
        let input = ActivityInput::new(test_context("echo"), b"plain".to_vec());
        let result = Interceptors::new().execute_activity(&EchoActivity, input).await;
        assert_eq!(result.unwrap(), b"plain");
    }

    #[test]
    fn test_defaults_appended_last() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let interceptors = append_default_interceptors(
            Interceptors::new().activity_inbound("custom", recording("custom", &log)),
        );
        assert_eq!(
            interceptors.activity_inbound_names(),
            vec!["custom", LOGGING_INTERCEPTOR]
        );
    }
}
