use skillrelay_core::{Activity, ActivityType};

/// One inbound activity plus everything the turn has said back so far.
#[derive(Clone, Debug)]
pub struct TurnContext {
    activity: Activity,
    correlation_id: String,
    responses: Vec<Activity>,
}

impl TurnContext {
    pub fn new(activity: Activity, correlation_id: impl Into<String>) -> Self {
        Self { activity, correlation_id: correlation_id.into(), responses: Vec::new() }
    }

    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Queues a reply addressed back to whoever sent the inbound activity.
    pub fn send(&mut self, activity: Activity) {
        let reply = self.activity.reply_with(activity);
        self.responses.push(reply);
    }

    pub fn send_text(&mut self, text: impl Into<String>) {
        self.send(Activity::message(text));
    }

    pub fn send_trace(&mut self, label: impl Into<String>, text: impl Into<String>) {
        self.send(Activity::trace(label, text));
    }

    pub fn responses(&self) -> &[Activity] {
        &self.responses
    }

    pub fn sent(&self, activity_type: &ActivityType) -> usize {
        self.responses.iter().filter(|response| &response.activity_type == activity_type).count()
    }

    pub fn into_responses(self) -> Vec<Activity> {
        self.responses
    }
}
