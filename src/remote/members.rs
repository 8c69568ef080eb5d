use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{ClubApiClient, DispatchContext, RemoteCapability, RemoteError, RemoteOutcome};
use crate::models::ActionType;

pub struct CreateMember {
    client: Arc<ClubApiClient>,
}

impl CreateMember {
    pub fn new(client: Arc<ClubApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteCapability for CreateMember {
    fn action_type(&self) -> ActionType {
        ActionType::CreateMember
    }

    fn name(&self) -> &str {
        "Create member"
    }

    async fn execute(
        &self,
        ctx: &DispatchContext,
        payload: &Value,
    ) -> Result<RemoteOutcome, RemoteError> {
        let member = self.client.post("/api/v1/members", payload, ctx).await?;
        Ok(RemoteOutcome::new(member))
    }
}
