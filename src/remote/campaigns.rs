use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{
    ClubApiClient, DispatchContext, RemoteCapability, RemoteError, RemoteOutcome, resource_id_of,
};
use crate::models::ActionType;

/// Creates a campaign and, when the payload sets `sendImmediately`, sends it
/// straight away. A failed send does not fail the create: it comes back as a
/// `send-campaign` follow-up so the two halves retry independently.
pub struct CreateCampaign {
    client: Arc<ClubApiClient>,
}

impl CreateCampaign {
    pub fn new(client: Arc<ClubApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteCapability for CreateCampaign {
    fn action_type(&self) -> ActionType {
        ActionType::CreateCampaign
    }

    fn name(&self) -> &str {
        "Create campaign"
    }

    async fn execute(
        &self,
        ctx: &DispatchContext,
        payload: &Value,
    ) -> Result<RemoteOutcome, RemoteError> {
        let send_immediately = payload
            .get("sendImmediately")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let campaign = self.client.post("/api/v1/campaigns", payload, ctx).await?;
        let outcome = RemoteOutcome::new(campaign);

        if !send_immediately {
            return Ok(outcome);
        }

        let Some(campaign_id) = outcome.resource_id.clone() else {
            tracing::warn!("Campaign created without an id, cannot send immediately");
            return Ok(outcome);
        };

        match self
            .client
            .send_campaign(&DispatchContext::default(), &campaign_id)
            .await
        {
            Ok(_) => Ok(outcome),
            Err(e) => {
                tracing::warn!("Immediate send of campaign {campaign_id} failed, queueing it: {e}");
                Ok(outcome.with_follow_up(
                    ActionType::SendCampaign,
                    json!({ "campaignId": campaign_id }),
                ))
            }
        }
    }
}

pub struct SendCampaign {
    client: Arc<ClubApiClient>,
}

impl SendCampaign {
    pub fn new(client: Arc<ClubApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteCapability for SendCampaign {
    fn action_type(&self) -> ActionType {
        ActionType::SendCampaign
    }

    fn name(&self) -> &str {
        "Send campaign"
    }

    async fn execute(
        &self,
        ctx: &DispatchContext,
        payload: &Value,
    ) -> Result<RemoteOutcome, RemoteError> {
        let campaign_id = payload
            .get("campaignId")
            .and_then(resource_id_of)
            .ok_or_else(|| RemoteError::validation("campaignId is required"))?;

        let sent = self.client.send_campaign(ctx, &campaign_id).await?;
        let mut outcome = RemoteOutcome::new(sent);
        outcome.resource_id.get_or_insert(campaign_id);
        Ok(outcome)
    }
}
