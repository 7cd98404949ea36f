use serde::{Deserialize, Serialize};

/// Name of the event a channel sends when an OAuth prompt completes.
pub const TOKEN_RESPONSE_EVENT: &str = "tokens/response";

/// Delivery mode asking the receiver to answer in the HTTP response body.
pub const EXPECT_REPLIES: &str = "expectReplies";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityType {
    Message,
    Event,
    Invoke,
    ConversationUpdate,
    EndOfConversation,
    Trace,
    Typing,
    #[serde(other)]
    Other,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Event => "event",
            Self::Invoke => "invoke",
            Self::ConversationUpdate => "conversationUpdate",
            Self::EndOfConversation => "endOfConversation",
            Self::Trace => "trace",
            Self::Typing => "typing",
            Self::Other => "other",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChannelAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), name: None }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationAccount {
    pub id: String,
}

/// Identifies a channel, conversation and participant pair well enough to post into the
/// conversation later. Owned by the calling channel; stored verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationReference {
    pub channel_id: String,
    pub conversation_id: String,
    pub service_url: String,
    pub bot_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
}

impl ConversationReference {
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(&self.channel_id, &self.conversation_id)
    }
}

/// Storage and locking key for one conversation on one channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey(pub String);

impl ConversationKey {
    pub fn new(channel_id: &str, conversation_id: &str) -> Self {
        Self(format!("{channel_id}/{conversation_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub conversation: ConversationAccount,
    #[serde(default)]
    pub from: ChannelAccount,
    #[serde(default)]
    pub recipient: ChannelAccount,
    #[serde(default)]
    pub service_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members_added: Vec<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_mode: Option<String>,
}

impl Activity {
    fn empty(activity_type: ActivityType) -> Self {
        Self {
            activity_type,
            id: None,
            name: None,
            text: None,
            value: None,
            label: None,
            channel_id: String::new(),
            conversation: ConversationAccount::default(),
            from: ChannelAccount::default(),
            recipient: ChannelAccount::default(),
            service_url: String::new(),
            locale: None,
            members_added: Vec::new(),
            reply_to_id: None,
            delivery_mode: None,
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Self::empty(ActivityType::Message) }
    }

    pub fn event(name: impl Into<String>, value: Option<serde_json::Value>) -> Self {
        Self { name: Some(name.into()), value, ..Self::empty(ActivityType::Event) }
    }

    pub fn trace(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            text: Some(text.into()),
            ..Self::empty(ActivityType::Trace)
        }
    }

    pub fn end_of_conversation() -> Self {
        Self::empty(ActivityType::EndOfConversation)
    }

    pub fn of_type(activity_type: ActivityType) -> Self {
        Self::empty(activity_type)
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|text| !text.is_empty())
    }

    pub fn is_message(&self) -> bool {
        self.activity_type == ActivityType::Message
    }

    /// A conversation update that adds someone other than the bot itself.
    pub fn is_start_activity(&self) -> bool {
        self.activity_type == ActivityType::ConversationUpdate
            && self.members_added.iter().any(|member| member.id != self.recipient.id)
    }

    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(&self.channel_id, &self.conversation.id)
    }

    pub fn conversation_reference(&self) -> ConversationReference {
        ConversationReference {
            channel_id: self.channel_id.clone(),
            conversation_id: self.conversation.id.clone(),
            service_url: self.service_url.clone(),
            bot_id: self.recipient.id.clone(),
            user_id: self.from.id.clone(),
            locale: self.locale.clone(),
            activity_id: self.id.clone(),
        }
    }

    /// Addresses an outgoing activity as a reply to `self`.
    pub fn reply_with(&self, reply: Activity) -> Activity {
        Activity {
            channel_id: self.channel_id.clone(),
            conversation: self.conversation.clone(),
            from: self.recipient.clone(),
            recipient: self.from.clone(),
            service_url: self.service_url.clone(),
            locale: reply.locale.clone().or_else(|| self.locale.clone()),
            reply_to_id: self.id.clone(),
            ..reply
        }
    }

    /// Addresses an activity as if the user of `reference` had sent it to the bot, so a
    /// turn can run on that conversation.
    pub fn as_sent_into(mut self, reference: &ConversationReference) -> Self {
        self.channel_id = reference.channel_id.clone();
        self.conversation = ConversationAccount { id: reference.conversation_id.clone() };
        self.service_url = reference.service_url.clone();
        self.from = ChannelAccount::new(&reference.user_id);
        self.recipient = ChannelAccount::new(&reference.bot_id);
        if self.locale.is_none() {
            self.locale = reference.locale.clone();
        }
        self
    }

    /// Addresses an activity into the conversation named by `reference`, as used for
    /// proactive delivery.
    pub fn apply_conversation_reference(mut self, reference: &ConversationReference) -> Self {
        self.channel_id = reference.channel_id.clone();
        self.conversation = ConversationAccount { id: reference.conversation_id.clone() };
        self.service_url = reference.service_url.clone();
        self.from = ChannelAccount::new(&reference.bot_id);
        self.recipient = ChannelAccount::new(&reference.user_id);
        if self.locale.is_none() {
            self.locale = reference.locale.clone();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{Activity, ActivityType, ChannelAccount, ConversationAccount};

    fn inbound(text: &str) -> Activity {
        Activity {
            id: Some("act-1".to_owned()),
            channel_id: "msteams".to_owned(),
            conversation: ConversationAccount { id: "conv123".to_owned() },
            from: ChannelAccount::new("user-1"),
            recipient: ChannelAccount::new("bot-1"),
            service_url: "https://smba.example.net/".to_owned(),
            locale: Some("en-us".to_owned()),
            ..Activity::message(text)
        }
    }

    #[test]
    fn activity_deserializes_from_camel_case_wire_format() {
        let activity: Activity = serde_json::from_str(
            r#"{
                "type": "message",
                "text": "book a flight",
                "channelId": "webchat",
                "conversation": { "id": "conv-9" },
                "from": { "id": "user-9" },
                "recipient": { "id": "bot-9" },
                "serviceUrl": "https://webchat.example.net/",
                "locale": "en-us"
            }"#,
        )
        .expect("activity json");

        assert_eq!(activity.activity_type, ActivityType::Message);
        assert_eq!(activity.text(), Some("book a flight"));
        assert_eq!(activity.conversation_key().as_str(), "webchat/conv-9");
    }

    #[test]
    fn unknown_activity_types_map_to_other() {
        let activity: Activity =
            serde_json::from_str(r#"{ "type": "messageReaction" }"#).expect("activity json");
        assert_eq!(activity.activity_type, ActivityType::Other);
    }

    #[test]
    fn start_activity_requires_a_member_other_than_the_bot() {
        let mut update = inbound("");
        update.activity_type = ActivityType::ConversationUpdate;
        update.members_added = vec![ChannelAccount::new("bot-1")];
        assert!(!update.is_start_activity());

        update.members_added.push(ChannelAccount::new("user-1"));
        assert!(update.is_start_activity());
    }

    #[test]
    fn reply_swaps_participants_and_keeps_conversation() {
        let activity = inbound("hi");
        let reply = activity.reply_with(Activity::message("hello"));

        assert_eq!(reply.from.id, "bot-1");
        assert_eq!(reply.recipient.id, "user-1");
        assert_eq!(reply.conversation.id, "conv123");
        assert_eq!(reply.reply_to_id.as_deref(), Some("act-1"));
    }

    #[test]
    fn conversation_reference_round_trips_through_proactive_addressing() {
        let activity = inbound("hi");
        let reference = activity.conversation_reference();
        let proactive =
            Activity::message("your flight is confirmed").apply_conversation_reference(&reference);

        assert_eq!(proactive.conversation_reference().conversation_id, "conv123");
        assert_eq!(proactive.service_url, reference.service_url);
        assert_eq!(proactive.recipient.id, "user-1");
    }

    #[test]
    fn skill_activity_is_readdressed_as_coming_from_the_parent_user() {
        let reference = inbound("hi").conversation_reference();
        let from_skill = Activity {
            conversation: ConversationAccount { id: "rk_abc".to_owned() },
            from: ChannelAccount::new("flight-bot"),
            ..Activity::end_of_conversation()
        };

        let turn_activity = from_skill.as_sent_into(&reference);

        assert_eq!(turn_activity.conversation.id, "conv123");
        assert_eq!(turn_activity.from.id, "user-1");
        assert_eq!(turn_activity.recipient.id, "bot-1");
        assert_eq!(turn_activity.conversation_key().as_str(), "msteams/conv123");
    }

    #[test]
    fn blank_text_is_treated_as_absent() {
        assert_eq!(inbound("   ").text(), None);
    }
}
