//! Whole-turn scenarios through `TurnRouter` with scripted skills, an in-memory store and
//! a capturing channel connector.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use skillrelay_core::audit::InMemoryAuditSink;
use skillrelay_core::errors::ApplicationError;
use skillrelay_core::{
    Activity, ActivityType, ChannelAccount, ConversationAccount, ConversationKey,
    ConversationReference, Interruption, InterruptionAction, ProactiveJob, ProactiveJobState,
    RouterPhase,
    RoutingKeyFactory, SkillDefinition, SkillId, SkillRegistry,
};
use skillrelay_db::{
    InMemoryCorrelationRepository, InMemoryRouterStateRepository, RouterStateRepository,
};
use skillrelay_router::{
    ConnectorClient, ConnectorError, ConversationCorrelator, ConversationLocks,
    DefaultRootHandler, DialogFrame, FrameContext, FrameStatus, KeywordRecognizer, LocalRoute,
    ProactiveDeliverer, ProactiveQueue, Recognizer, RootHandler, RouterServices, RouterSettings,
    SkillClient, SkillClientError, SkillInvocation, SkillResponse, TurnContext, TurnRouter,
    REPROMPT_EVENT,
};
use skillrelay_router::handler::DEFAULT_APOLOGY;

const CONVERSATION: &str = "conv123";

#[derive(Default)]
struct ScriptedSkills {
    replies: Mutex<VecDeque<Result<SkillResponse, SkillClientError>>>,
    invocations: Mutex<Vec<SkillInvocation>>,
    delay: Duration,
}

impl ScriptedSkills {
    fn reply(&self, reply: Result<SkillResponse, SkillClientError>) {
        self.replies.lock().expect("lock").push_back(reply);
    }

    fn invocations(&self) -> Vec<SkillInvocation> {
        self.invocations.lock().expect("lock").clone()
    }
}

#[async_trait]
impl SkillClient for ScriptedSkills {
    async fn invoke(&self, invocation: SkillInvocation) -> Result<SkillResponse, SkillClientError> {
        let activity_type = invocation.activity.activity_type.clone();
        let is_reprompt = invocation.activity.name.as_deref() == Some(REPROMPT_EVENT);
        self.invocations.lock().expect("lock").push(invocation);
        tokio::time::sleep(self.delay).await;

        if activity_type == ActivityType::EndOfConversation {
            return Ok(SkillResponse::default());
        }
        if is_reprompt {
            return Ok(SkillResponse { activities: vec![Activity::message("Where would you like to fly?")] });
        }
        self.replies.lock().expect("lock").pop_front().unwrap_or_else(|| Ok(SkillResponse::default()))
    }
}

#[derive(Default)]
struct CapturingConnector {
    sent: Mutex<Vec<Activity>>,
}

#[async_trait]
impl ConnectorClient for CapturingConnector {
    async fn send_to_conversation(&self, activity: &Activity) -> Result<(), ConnectorError> {
        self.sent.lock().expect("lock").push(activity.clone());
        Ok(())
    }

    async fn update_activity(&self, activity: &Activity) -> Result<(), ConnectorError> {
        self.sent.lock().expect("lock").push(activity.clone());
        Ok(())
    }
}

/// Intent matching works; interruption checks always fail.
struct FlakyInterruptions {
    inner: KeywordRecognizer,
}

#[async_trait]
impl Recognizer for FlakyInterruptions {
    async fn recognize_interruption(
        &self,
        _activity: &Activity,
    ) -> Result<Option<Interruption>, ApplicationError> {
        Err(ApplicationError::Recognition("interruption model unavailable".to_owned()))
    }

    async fn recognize_intent(&self, activity: &Activity) -> Result<Option<String>, ApplicationError> {
        self.inner.recognize_intent(activity).await
    }
}

/// Default wording plus an onboarding dialog and one known event.
struct TestRoot {
    inner: DefaultRootHandler,
}

#[async_trait]
impl RootHandler for TestRoot {
    async fn on_start(&self, turn: &mut TurnContext) -> Result<(), ApplicationError> {
        self.inner.on_start(turn).await
    }

    async fn route(
        &self,
        turn: &mut TurnContext,
        intent: Option<&str>,
    ) -> Result<LocalRoute, ApplicationError> {
        if intent == Some("onboard") {
            return Ok(LocalRoute::BeginDialog("onboarding".to_owned()));
        }
        self.inner.route(turn, intent).await
    }

    async fn on_event(&self, turn: &mut TurnContext) -> Result<bool, ApplicationError> {
        if turn.activity().name.as_deref() == Some("timezone") || turn.activity().value.is_some() {
            turn.send_text("noted");
            return Ok(true);
        }
        Ok(false)
    }

    async fn on_interrupt(
        &self,
        turn: &mut TurnContext,
        interruption: Interruption,
        phase: &RouterPhase,
    ) -> Result<InterruptionAction, ApplicationError> {
        self.inner.on_interrupt(turn, interruption, phase).await
    }

    async fn on_frame_complete(
        &self,
        turn: &mut TurnContext,
        frame_id: &str,
    ) -> Result<(), ApplicationError> {
        self.inner.on_frame_complete(turn, frame_id).await
    }
}

struct OnboardingDialog;

#[async_trait]
impl DialogFrame for OnboardingDialog {
    async fn begin(
        &self,
        turn: &mut TurnContext,
        _frame: &FrameContext,
    ) -> Result<FrameStatus, ApplicationError> {
        turn.send_text("What's your name?");
        Ok(FrameStatus::Waiting)
    }

    async fn continue_dialog(
        &self,
        turn: &mut TurnContext,
        _frame: &FrameContext,
    ) -> Result<FrameStatus, ApplicationError> {
        let name = turn.activity().text().unwrap_or("there").to_owned();
        turn.send_text(format!("Nice to meet you, {name}."));
        Ok(FrameStatus::Complete)
    }

    async fn reprompt(
        &self,
        turn: &mut TurnContext,
        _frame: &FrameContext,
    ) -> Result<(), ApplicationError> {
        turn.send_text("What's your name?");
        Ok(())
    }

    async fn cancel(
        &self,
        _turn: &mut TurnContext,
        _frame: &FrameContext,
    ) -> Result<(), ApplicationError> {
        Ok(())
    }
}

struct Harness {
    router: Arc<TurnRouter>,
    skills: Arc<ScriptedSkills>,
    correlator: Arc<ConversationCorrelator>,
    states: Arc<InMemoryRouterStateRepository>,
    locks: Arc<ConversationLocks>,
    audit: InMemoryAuditSink,
}

/// What a harness shares with another process over the same store.
struct Store {
    keys: RoutingKeyFactory,
    correlations: Arc<InMemoryCorrelationRepository>,
    states: Arc<InMemoryRouterStateRepository>,
}

impl Store {
    fn fresh() -> Self {
        Self {
            keys: RoutingKeyFactory::new(&SecretString::from("end-to-end-test-secret".to_owned()))
                .expect("keys"),
            correlations: Arc::new(InMemoryCorrelationRepository::default()),
            states: Arc::new(InMemoryRouterStateRepository::default()),
        }
    }
}

fn skill(id: &str, intent: &str) -> SkillDefinition {
    SkillDefinition {
        id: SkillId(id.to_owned()),
        app_identity: format!("{id}-app"),
        endpoint: format!("https://{id}.example.net/api/messages"),
        trigger_intents: BTreeSet::from([intent.to_owned()]),
        required_auth_connections: BTreeSet::new(),
    }
}

fn keyword_recognizer() -> KeywordRecognizer {
    let intents = BTreeMap::from([
        ("bookFlight".to_owned(), vec!["book a flight".to_owned()]),
        ("createEvent".to_owned(), vec!["create an event".to_owned()]),
        ("onboard".to_owned(), vec!["get started".to_owned()]),
    ]);
    let interruptions = BTreeMap::from([
        ("cancel".to_owned(), vec!["cancel".to_owned()]),
        ("help".to_owned(), vec!["help".to_owned()]),
        ("start_over".to_owned(), vec!["start over".to_owned()]),
    ]);
    KeywordRecognizer::new(&intents, &interruptions)
}

fn build_harness(
    settings: RouterSettings,
    skills: ScriptedSkills,
    store: Store,
    recognizer: Arc<dyn Recognizer>,
) -> Harness {
    let registry = Arc::new(
        SkillRegistry::new(vec![skill("flightSkill", "bookFlight"), skill("calendarSkill", "createEvent")])
            .expect("registry"),
    );
    let audit = InMemoryAuditSink::default();
    let correlator = Arc::new(ConversationCorrelator::new(
        Arc::clone(&registry),
        store.keys,
        store.correlations,
        Arc::new(audit.clone()),
    ));
    let skills = Arc::new(skills);
    let states = store.states;
    let locks = Arc::new(ConversationLocks::new());

    let router = TurnRouter::new(
        RouterServices {
            registry,
            correlator: Arc::clone(&correlator),
            recognizer,
            skills: skills.clone(),
            root: Arc::new(TestRoot { inner: DefaultRootHandler::default() }),
            states: states.clone(),
            locks: Arc::clone(&locks),
            audit: Arc::new(audit.clone()),
        },
        settings,
    )
    .with_dialog("onboarding", Arc::new(OnboardingDialog));

    Harness { router: Arc::new(router), skills, correlator, states, locks, audit }
}

fn harness_with(settings: RouterSettings, skills: ScriptedSkills) -> Harness {
    build_harness(settings, skills, Store::fresh(), Arc::new(keyword_recognizer()))
}

fn harness() -> Harness {
    harness_with(RouterSettings::default(), ScriptedSkills::default())
}

fn inbound(activity: Activity) -> Activity {
    Activity {
        id: Some(format!("act-{}", next_activity_number())),
        channel_id: "msteams".to_owned(),
        conversation: ConversationAccount { id: CONVERSATION.to_owned() },
        from: ChannelAccount::new("user-1"),
        recipient: ChannelAccount::new("root-bot"),
        service_url: "https://smba.example.net/".to_owned(),
        locale: Some("en-us".to_owned()),
        ..activity
    }
}

fn next_activity_number() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::SeqCst)
}

fn message(text: &str) -> Activity {
    inbound(Activity::message(text))
}

fn parent() -> ConversationReference {
    message("").conversation_reference()
}

fn texts(responses: &[Activity]) -> Vec<&str> {
    responses
        .iter()
        .filter(|activity| activity.activity_type == ActivityType::Message)
        .filter_map(|activity| activity.text.as_deref())
        .collect()
}

fn waiting(text: &str) -> Result<SkillResponse, SkillClientError> {
    Ok(SkillResponse { activities: vec![Activity::message(text)] })
}

fn completed(text: &str) -> Result<SkillResponse, SkillClientError> {
    Ok(SkillResponse { activities: vec![Activity::message(text), Activity::end_of_conversation()] })
}

#[tokio::test]
async fn booking_a_flight_hands_off_and_the_skill_can_reply_later() {
    let harness = harness();
    harness.skills.reply(waiting("Where would you like to fly?"));

    let outcome = harness.router.process(message("book a flight")).await.expect("turn");

    assert_eq!(outcome.phase(), RouterPhase::Active("flightSkill".to_owned()));
    assert_eq!(texts(&outcome.responses), vec!["Where would you like to fly?"]);

    let invocation = harness.skills.invocations().remove(0);
    let k1 = invocation.routing_key.clone();
    assert_eq!(invocation.activity.conversation.id, k1.as_str());
    assert!(!k1.as_str().contains(CONVERSATION));
    let entry = harness.correlator.resolve(&k1).await.expect("correlation entry");
    assert_eq!(entry.parent_reference.conversation_id, CONVERSATION);
    assert_eq!(entry.authorized_scope, "flightSkill-app");

    let connector = Arc::new(CapturingConnector::default());
    let deliverer = Arc::new(ProactiveDeliverer::new(
        Arc::clone(&harness.correlator),
        connector.clone(),
        Arc::clone(&harness.locks),
        Arc::new(harness.audit.clone()),
    ));
    let queue = ProactiveQueue::start(deliverer, 4, 1);
    queue
        .handle()
        .enqueue(ProactiveJob::new(k1, Activity::message("your flight is confirmed")))
        .expect("enqueue");
    queue.shutdown().await;

    let sent = connector.sent.lock().expect("lock");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].conversation.id, CONVERSATION);
    assert_eq!(sent[0].text.as_deref(), Some("your flight is confirmed"));
    assert_eq!(sent[0].recipient.id, "user-1");
}

#[tokio::test]
async fn unknown_utterance_stays_idle_and_is_answered_locally() {
    let harness = harness();

    let outcome = harness.router.process(message("what's the weather")).await.expect("turn");

    assert_eq!(outcome.phase(), RouterPhase::Idle);
    assert_eq!(texts(&outcome.responses), vec!["Sorry, I didn't understand that."]);
    assert!(harness.skills.invocations().is_empty());
}

#[tokio::test]
async fn continuing_turns_are_forwarded_to_the_active_skill() {
    let harness = harness();
    harness.skills.reply(waiting("Where would you like to fly?"));
    harness.skills.reply(waiting("Which day?"));

    harness.router.process(message("book a flight")).await.expect("turn 1");
    let outcome = harness.router.process(message("create an event")).await.expect("turn 2");

    assert_eq!(outcome.phase(), RouterPhase::Active("flightSkill".to_owned()));
    assert_eq!(texts(&outcome.responses), vec!["Which day?"]);
    let invocations = harness.skills.invocations();
    assert_eq!(invocations.len(), 2);
    assert!(invocations.iter().all(|invocation| invocation.skill_id.as_str() == "flightSkill"));
    assert_eq!(invocations[0].routing_key, invocations[1].routing_key);
}

#[tokio::test]
async fn cancel_while_active_returns_to_idle_and_ends_the_skill_conversation() {
    let harness = harness();
    harness.skills.reply(waiting("Where would you like to fly?"));
    harness.router.process(message("book a flight")).await.expect("turn 1");
    let key = harness.correlator.routing_key_for(&parent(), &SkillId("flightSkill".to_owned()));

    let outcome = harness.router.process(message("cancel")).await.expect("turn 2");

    assert_eq!(outcome.phase(), RouterPhase::Idle);
    assert_eq!(texts(&outcome.responses), vec!["Okay, I've cancelled that."]);
    let last = harness.skills.invocations().pop().expect("cancel invocation");
    assert_eq!(last.activity.activity_type, ActivityType::EndOfConversation);
    assert!(harness.correlator.resolve(&key).await.expect_err("deleted").is_correlation_miss());
    assert_eq!(outcome.responses.iter().filter(|a| a.activity_type == ActivityType::EndOfConversation).count(), 0);
}

#[tokio::test]
async fn skill_mode_cancel_tells_the_caller_the_conversation_ended() {
    let harness = harness_with(
        RouterSettings { skill_mode: true, ..RouterSettings::default() },
        ScriptedSkills::default(),
    );

    let outcome = harness.router.process(message("cancel")).await.expect("turn");

    assert_eq!(outcome.phase(), RouterPhase::Idle);
    assert_eq!(
        outcome.responses.last().map(|activity| activity.activity_type.clone()),
        Some(ActivityType::EndOfConversation)
    );
}

#[tokio::test]
async fn help_while_active_reprompts_and_keeps_the_skill() {
    let harness = harness();
    harness.skills.reply(waiting("Where would you like to fly?"));
    harness.router.process(message("book a flight")).await.expect("turn 1");

    let outcome = harness.router.process(message("help")).await.expect("turn 2");

    assert_eq!(outcome.phase(), RouterPhase::Active("flightSkill".to_owned()));
    let responses = texts(&outcome.responses);
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[1], "Where would you like to fly?");
    let last = harness.skills.invocations().pop().expect("reprompt");
    assert_eq!(last.activity.name.as_deref(), Some(REPROMPT_EVENT));
}

#[tokio::test]
async fn start_over_drops_the_skill_and_routes_the_same_turn() {
    let harness = harness();
    harness.skills.reply(waiting("Where would you like to fly?"));
    harness.router.process(message("book a flight")).await.expect("turn 1");

    let outcome = harness.router.process(message("start over")).await.expect("turn 2");

    assert_eq!(outcome.phase(), RouterPhase::Idle);
    assert_eq!(texts(&outcome.responses), vec!["Sorry, I didn't understand that."]);
}

#[tokio::test]
async fn skill_completion_wraps_up_and_releases_the_routing_key() {
    let harness = harness();
    harness.skills.reply(waiting("Where would you like to fly?"));
    harness.skills.reply(completed("Booked to Paris."));
    harness.router.process(message("book a flight")).await.expect("turn 1");
    let key = harness.correlator.routing_key_for(&parent(), &SkillId("flightSkill".to_owned()));

    let outcome = harness.router.process(message("paris tomorrow")).await.expect("turn 2");

    assert_eq!(outcome.phase(), RouterPhase::Idle);
    assert_eq!(
        texts(&outcome.responses),
        vec!["Booked to Paris.", "Is there anything else I can help with?"]
    );
    assert!(harness.correlator.resolve(&key).await.is_err());
}

#[tokio::test]
async fn completion_message_can_be_suppressed() {
    let harness = harness_with(
        RouterSettings { suppress_completion_message: true, ..RouterSettings::default() },
        ScriptedSkills::default(),
    );
    harness.skills.reply(completed("Booked."));

    let outcome = harness.router.process(message("book a flight")).await.expect("turn");

    assert_eq!(outcome.phase(), RouterPhase::Idle);
    assert_eq!(texts(&outcome.responses), vec!["Booked."]);
}

#[tokio::test]
async fn skill_mode_completion_ends_the_callers_conversation() {
    let harness = harness_with(
        RouterSettings { skill_mode: true, ..RouterSettings::default() },
        ScriptedSkills::default(),
    );
    harness.skills.reply(completed("Booked."));

    let outcome = harness.router.process(message("book a flight")).await.expect("turn");

    assert_eq!(outcome.phase(), RouterPhase::Idle);
    assert_eq!(
        outcome.responses.last().map(|activity| activity.activity_type.clone()),
        Some(ActivityType::EndOfConversation)
    );
}

#[tokio::test]
async fn failing_skill_is_contained_with_one_apology() {
    let harness = harness();
    harness.skills.reply(waiting("Where would you like to fly?"));
    harness.skills.reply(Err(SkillClientError::Status { status: 502 }));
    harness.router.process(message("book a flight")).await.expect("turn 1");
    let key = harness.correlator.routing_key_for(&parent(), &SkillId("flightSkill".to_owned()));

    let outcome = harness.router.process(message("paris")).await.expect("contained");

    assert_eq!(outcome.phase(), RouterPhase::Idle);
    assert!(outcome.state.dialog_stack.is_empty());
    assert!(outcome.state.active_skill_id.is_none());
    assert_eq!(texts(&outcome.responses), vec!["Sorry, it looks like something went wrong."]);
    let traces: Vec<_> = outcome
        .responses
        .iter()
        .filter(|activity| activity.activity_type == ActivityType::Trace)
        .collect();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].label.as_deref(), Some("TurnError"));
    assert!(harness.correlator.resolve(&key).await.expect_err("deleted").is_correlation_miss());
    assert_eq!(harness.audit.events_of_type("router.turn_failed").len(), 1);
}

#[tokio::test]
async fn skill_timeout_is_contained_like_any_failure() {
    let harness = harness_with(
        RouterSettings { skill_timeout: Duration::from_millis(20), ..RouterSettings::default() },
        ScriptedSkills { delay: Duration::from_millis(250), ..ScriptedSkills::default() },
    );

    let outcome = harness.router.process(message("book a flight")).await.expect("contained");

    assert_eq!(outcome.phase(), RouterPhase::Idle);
    assert_eq!(texts(&outcome.responses), vec!["Sorry, it looks like something went wrong."]);
    let trace = outcome
        .responses
        .iter()
        .find(|activity| activity.activity_type == ActivityType::Trace)
        .expect("diagnostic trace");
    assert!(trace.text.as_deref().unwrap_or_default().contains("timed out"));
}

#[tokio::test]
async fn conversation_start_greets_exactly_once() {
    let harness = harness();
    let update = || {
        let mut activity = inbound(Activity::of_type(ActivityType::ConversationUpdate));
        activity.members_added = vec![ChannelAccount::new("user-1")];
        activity
    };

    let first = harness.router.process(update()).await.expect("first update");
    let second = harness.router.process(update()).await.expect("second update");

    assert_eq!(texts(&first.responses), vec!["Hi! What can I do for you?"]);
    assert!(second.responses.is_empty());
    assert!(second.state.started);
}

#[tokio::test]
async fn unknown_events_leave_a_trace_and_known_events_reach_the_root() {
    let harness = harness();

    let unknown = harness
        .router
        .process(inbound(Activity::event("mystery", None)))
        .await
        .expect("unknown event");
    assert_eq!(
        unknown.responses[0].text.as_deref(),
        Some("Unknown Event 'mystery' was received but not processed.")
    );

    let known = harness
        .router
        .process(inbound(Activity::event("timezone", Some(serde_json::json!("UTC+1")))))
        .await
        .expect("known event");
    assert_eq!(texts(&known.responses), vec!["noted"]);
}

#[tokio::test]
async fn card_submit_without_text_goes_to_the_root_event_hook() {
    let harness = harness();
    let submit = inbound(Activity {
        text: None,
        value: Some(serde_json::json!({ "choice": "yes" })),
        ..Activity::message("")
    });

    let outcome = harness.router.process(submit).await.expect("turn");

    assert_eq!(texts(&outcome.responses), vec!["noted"]);
    assert_eq!(outcome.phase(), RouterPhase::Idle);
}

#[tokio::test]
async fn local_dialog_occupies_the_active_slot_until_it_completes() {
    let harness = harness();

    let started = harness.router.process(message("get started")).await.expect("turn 1");
    assert_eq!(started.phase(), RouterPhase::Active("onboarding".to_owned()));
    assert_eq!(texts(&started.responses), vec!["What's your name?"]);

    let finished = harness.router.process(message("Ada")).await.expect("turn 2");
    assert_eq!(finished.phase(), RouterPhase::Idle);
    assert_eq!(
        texts(&finished.responses),
        vec!["Nice to meet you, Ada.", "Is there anything else I can help with?"]
    );
    assert!(harness.skills.invocations().is_empty());
}

#[tokio::test]
async fn caller_end_of_conversation_cancels_the_active_frame() {
    let harness = harness();
    harness.skills.reply(waiting("Where would you like to fly?"));
    harness.router.process(message("book a flight")).await.expect("turn 1");

    let outcome = harness
        .router
        .process(inbound(Activity::end_of_conversation()))
        .await
        .expect("turn 2");

    assert_eq!(outcome.phase(), RouterPhase::Idle);
}

#[tokio::test]
async fn router_state_is_persisted_after_every_turn() {
    let harness = harness();
    harness.skills.reply(waiting("Where would you like to fly?"));

    harness.router.process(message("book a flight")).await.expect("turn 1");
    harness.router.process(message("hello?")).await.expect("turn 2");

    let stored = harness
        .states
        .load(&ConversationKey::new("msteams", CONVERSATION))
        .await
        .expect("load")
        .expect("state saved");
    assert_eq!(stored.turn_count, 2);
    assert_eq!(stored.dialog_stack, vec!["flightSkill".to_owned()]);
}

#[tokio::test]
async fn deleting_the_parent_conversation_purges_correlations_and_state() {
    let harness = harness();
    harness.skills.reply(waiting("Where would you like to fly?"));
    harness.router.process(message("book a flight")).await.expect("turn");
    let key = harness.correlator.routing_key_for(&parent(), &SkillId("flightSkill".to_owned()));

    let removed = harness.router.delete_conversation("msteams", CONVERSATION).await.expect("purge");

    assert_eq!(removed, 1);
    assert!(harness.correlator.resolve(&key).await.is_err());
    let stored = harness
        .states
        .load(&ConversationKey::new("msteams", CONVERSATION))
        .await
        .expect("load");
    assert!(stored.is_none());
}

#[tokio::test]
async fn skill_ending_out_of_band_completes_its_frame() {
    let harness = harness();
    harness.skills.reply(waiting("I'll let you know when it's booked."));
    harness.router.process(message("book a flight")).await.expect("turn 1");
    let key = harness.skills.invocations().remove(0).routing_key;
    let entry = harness.correlator.resolve(&key).await.expect("entry");

    let outcome = harness
        .router
        .process_skill_activity(&entry, Activity::end_of_conversation())
        .await
        .expect("skill turn");

    assert_eq!(outcome.phase(), RouterPhase::Idle);
    assert_eq!(texts(&outcome.responses), vec!["Is there anything else I can help with?"]);
    assert!(outcome
        .responses
        .iter()
        .all(|activity| activity.activity_type != ActivityType::EndOfConversation));
    let reply = &outcome.responses[0];
    assert_eq!(reply.conversation.id, CONVERSATION);
    assert_eq!(reply.recipient.id, "user-1");
    assert!(harness.correlator.resolve(&key).await.is_err());
    assert_eq!(harness.skills.invocations().len(), 1);
}

#[tokio::test]
async fn skill_event_reaches_the_root_of_the_parent_conversation() {
    let harness = harness();
    harness.skills.reply(waiting("Where would you like to fly?"));
    harness.router.process(message("book a flight")).await.expect("turn 1");
    let key = harness.skills.invocations().remove(0).routing_key;
    let entry = harness.correlator.resolve(&key).await.expect("entry");

    let outcome = harness
        .router
        .process_skill_activity(&entry, Activity::event("timezone", None))
        .await
        .expect("skill turn");

    assert_eq!(outcome.phase(), RouterPhase::Active("flightSkill".to_owned()));
    assert_eq!(texts(&outcome.responses), vec!["noted"]);
    assert_eq!(outcome.responses[0].conversation.id, CONVERSATION);
    assert!(harness.correlator.resolve(&key).await.is_ok());
}

#[tokio::test]
async fn skill_messages_are_not_routed_as_turns() {
    let harness = harness();
    harness.skills.reply(waiting("Where would you like to fly?"));
    harness.router.process(message("book a flight")).await.expect("turn 1");
    let key = harness.skills.invocations().remove(0).routing_key;
    let entry = harness.correlator.resolve(&key).await.expect("entry");

    let error = harness
        .router
        .process_skill_activity(&entry, Activity::message("hi"))
        .await
        .expect_err("messages are delivered");

    assert!(error.to_string().contains("delivered, not routed"));
}

#[tokio::test]
async fn restarted_process_keeps_addressing_the_skill_with_the_key_it_was_given() {
    let correlations = Arc::new(InMemoryCorrelationRepository::default());
    let states = Arc::new(InMemoryRouterStateRepository::default());
    let store = || Store {
        keys: RoutingKeyFactory::ephemeral(),
        correlations: Arc::clone(&correlations),
        states: Arc::clone(&states),
    };

    let before = build_harness(
        RouterSettings::default(),
        ScriptedSkills::default(),
        store(),
        Arc::new(keyword_recognizer()),
    );
    before.skills.reply(waiting("Where would you like to fly?"));
    before.router.process(message("book a flight")).await.expect("turn 1");
    let issued = before.skills.invocations().remove(0).routing_key;

    let after = build_harness(
        RouterSettings::default(),
        ScriptedSkills::default(),
        store(),
        Arc::new(keyword_recognizer()),
    );
    after.skills.reply(completed("Booked to Paris."));
    assert_ne!(after.correlator.routing_key_for(&parent(), &SkillId("flightSkill".to_owned())), issued);

    let outcome = after.router.process(message("paris tomorrow")).await.expect("turn 2");

    assert_eq!(after.skills.invocations()[0].routing_key, issued);
    assert_eq!(outcome.phase(), RouterPhase::Idle);
    assert!(after.correlator.resolve(&issued).await.is_err());
}

#[tokio::test]
async fn failed_interruption_check_still_routes_the_turn() {
    let harness = build_harness(
        RouterSettings::default(),
        ScriptedSkills::default(),
        Store::fresh(),
        Arc::new(FlakyInterruptions { inner: keyword_recognizer() }),
    );
    harness.skills.reply(waiting("Where would you like to fly?"));

    let outcome = harness.router.process(message("book a flight")).await.expect("turn");

    assert_eq!(outcome.phase(), RouterPhase::Active("flightSkill".to_owned()));
    assert_eq!(texts(&outcome.responses), vec!["Where would you like to fly?"]);
    assert!(outcome.responses.iter().all(|activity| activity.text.as_deref() != Some(DEFAULT_APOLOGY)));
}

#[tokio::test]
async fn proactive_delivery_waits_for_the_live_turn_on_the_same_conversation() {
    let harness = harness_with(
        RouterSettings::default(),
        ScriptedSkills { delay: Duration::from_millis(200), ..ScriptedSkills::default() },
    );
    harness.skills.reply(waiting("Where would you like to fly?"));

    let router = Arc::clone(&harness.router);
    let live = tokio::spawn(async move { router.process(message("book a flight")).await });
    let key = loop {
        if let Some(invocation) = harness.skills.invocations().first() {
            break invocation.routing_key.clone();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    let connector = Arc::new(CapturingConnector::default());
    let deliverer = ProactiveDeliverer::new(
        Arc::clone(&harness.correlator),
        connector.clone(),
        Arc::clone(&harness.locks),
        Arc::new(harness.audit.clone()),
    );
    let delivered = deliverer.deliver(ProactiveJob::new(key, Activity::message("booked"))).await;

    assert_eq!(delivered, ProactiveJobState::Delivered);
    let stored = harness
        .states
        .load(&ConversationKey::new("msteams", CONVERSATION))
        .await
        .expect("load")
        .expect("live turn saved before delivery");
    assert_eq!(stored.turn_count, 1);
    assert_eq!(stored.dialog_stack, vec!["flightSkill".to_owned()]);
    live.await.expect("join").expect("live turn");
    assert_eq!(connector.sent.lock().expect("lock").len(), 1);
}
