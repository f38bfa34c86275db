pub mod cache;
pub mod client;
pub mod connection;
pub mod establish;
pub mod interceptor;
pub mod policy;
pub mod runner;
pub mod runtime;

#[cfg(test)]
mod testing;

pub use client::ControlPlaneClient;
pub use connection::{worker_identity, Connection};
pub use establish::{establish, Connections};
pub use interceptor::{CustomActivityInboundInterceptor, CUSTOM_INTERCEPTOR};
pub use policy::{assemble, ExecutionPolicy};
pub use runner::{Runner, RunnerState};
pub use runtime::{BrokerRuntime, BrokerWorker, RunnableWorker, WorkerRuntime};
