use async_trait::async_trait;
use queue_worker_core::{
    ActivityContext, ActivityInboundInterceptor, ActivityInput, ActivityResult, ControlPlane, Next,
};
use std::sync::Arc;

pub const CUSTOM_INTERCEPTOR: &str = "custom";

/// Outermost interceptor: hands the control-plane client to the activity.
pub struct CustomActivityInboundInterceptor {
    client: Arc<dyn ControlPlane>,
}

impl CustomActivityInboundInterceptor {
    pub fn new(_context: &ActivityContext, client: Arc<dyn ControlPlane>) -> Self {
        CustomActivityInboundInterceptor { client }
    }
}

#[async_trait]
impl ActivityInboundInterceptor for CustomActivityInboundInterceptor {
    async fn execute(&self, mut input: ActivityInput, next: Next<'_>) -> ActivityResult {
        input.control_plane = Some(self.client.clone());
        next.run(input).await
    }
}
