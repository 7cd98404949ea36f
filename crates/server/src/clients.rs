//! reqwest transports behind the router's `SkillClient` and `ConnectorClient` seams.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use skillrelay_core::{Activity, EXPECT_REPLIES};
use skillrelay_router::{
    ConnectorClient, ConnectorError, SkillClient, SkillClientError, SkillInvocation,
    SkillResponse,
};
use tracing::{debug, error};

/// Body of an `expectReplies` answer.
#[derive(Debug, Default, Deserialize)]
pub struct ExpectedReplies {
    #[serde(default)]
    pub activities: Vec<Activity>,
}

/// Posts the invocation's activity to the skill endpoint with `deliveryMode: expectReplies`,
/// so replies come back in the response body. Skills that ignore the delivery mode answer
/// through the callback endpoints under `public_url` instead.
#[derive(Clone, Debug)]
pub struct HttpSkillClient {
    client: Client,
    public_url: String,
}

impl HttpSkillClient {
    pub fn new(client: Client, public_url: impl Into<String>) -> Self {
        Self { client, public_url: public_url.into() }
    }
}

#[async_trait]
impl SkillClient for HttpSkillClient {
    async fn invoke(&self, invocation: SkillInvocation) -> Result<SkillResponse, SkillClientError> {
        let mut activity = invocation.activity;
        activity.service_url = self.public_url.clone();
        activity.delivery_mode = Some(EXPECT_REPLIES.to_owned());
        if !invocation.required_auth_connections.is_empty() {
            debug!(
                event_name = "skill.auth_connections",
                skill_id = %invocation.skill_id,
                connections = ?invocation.required_auth_connections,
                "skill declares oauth connections"
            );
        }

        let response = self
            .client
            .post(&invocation.endpoint)
            .json(&activity)
            .send()
            .await
            .map_err(|error| SkillClientError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SkillClientError::Status { status: status.as_u16() });
        }

        let body =
            response.bytes().await.map_err(|error| SkillClientError::Transport(error.to_string()))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(SkillResponse::default());
        }
        let replies: ExpectedReplies = serde_json::from_slice(&body)
            .map_err(|error| SkillClientError::Decode(error.to_string()))?;
        Ok(SkillResponse { activities: replies.activities })
    }
}

/// Channel connector speaking the `/v3/conversations` REST surface.
#[derive(Clone, Debug)]
pub struct HttpConnectorClient {
    client: Client,
}

impl HttpConnectorClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn dispatch(
        &self,
        request: reqwest::RequestBuilder,
        activity: &Activity,
    ) -> Result<(), ConnectorError> {
        let response = request
            .json(activity)
            .send()
            .await
            .map_err(|error| ConnectorError::Transport(error.to_string()))?;

        if !response.status().is_success() {
            error!(
                event_name = "connector.rejected",
                conversation_id = %activity.conversation.id,
                status = %response.status(),
                "channel rejected activity"
            );
            return Err(ConnectorError::Status { status: response.status().as_u16() });
        }
        Ok(())
    }
}

/// `{service_url}/v3/conversations/{conversation}/activities[/{reply_to_id}]` with each
/// segment percent-encoded.
pub fn activities_url(activity: &Activity) -> Result<Url, ConnectorError> {
    conversation_url(activity, activity.reply_to_id.as_deref())
}

/// `{service_url}/v3/conversations/{conversation}/activities/{id}`, the target of an update.
pub fn activity_url(activity: &Activity) -> Result<Url, ConnectorError> {
    let id = activity.id.as_deref().ok_or_else(|| {
        ConnectorError::Transport("an updated activity needs the id it replaces".to_owned())
    })?;
    conversation_url(activity, Some(id))
}

fn conversation_url(activity: &Activity, activity_id: Option<&str>) -> Result<Url, ConnectorError> {
    let mut url = Url::parse(&activity.service_url).map_err(|error| {
        ConnectorError::Transport(format!("invalid service url `{}`: {error}", activity.service_url))
    })?;
    {
        let mut segments = url.path_segments_mut().map_err(|()| {
            ConnectorError::Transport(format!(
                "service url `{}` cannot carry a path",
                activity.service_url
            ))
        })?;
        segments.pop_if_empty().extend([
            "v3",
            "conversations",
            activity.conversation.id.as_str(),
            "activities",
        ]);
        if let Some(activity_id) = activity_id {
            segments.push(activity_id);
        }
    }
    Ok(url)
}

#[async_trait]
impl ConnectorClient for HttpConnectorClient {
    async fn send_to_conversation(&self, activity: &Activity) -> Result<(), ConnectorError> {
        let request = self.client.post(activities_url(activity)?);
        self.dispatch(request, activity).await
    }

    async fn update_activity(&self, activity: &Activity) -> Result<(), ConnectorError> {
        let request = self.client.put(activity_url(activity)?);
        self.dispatch(request, activity).await
    }
}

pub fn http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder().timeout(timeout).build()
}
