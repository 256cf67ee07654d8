use super::*;
use crate::desktop::fake::FakeDesktop;
use crate::geometry::Bounds;
use crate::validation::TemplateValidator;

const PROMPT: &str = "Deploy 4.3.0 is failing health checks in eu-west. Roll back or hotfix?";
const ANSWER: &str = "Roll back to 4.2.1 now, then ship the hotfix behind the flag tomorrow.";
const TEMPLATE_ECHO: &str = "Decision: <your answer here>\nReason: {{reason}}";

struct Rig {
    config: Config,
    fake: FakeDesktop,
    validator: TemplateValidator,
}

impl Rig {
    fn new() -> Self {
        let config = Config::default();
        let fake = FakeDesktop::new(&config);
        fake.set_groups(&["Personal", "Incidents", "Archive"]);
        fake.set_conversations(&["Weekly sync", "Rollback plan", "Postmortem"]);
        let validator = TemplateValidator::new(&config.validation).unwrap();
        Self {
            config,
            fake,
            validator,
        }
    }

    fn request(&self, label: &str) -> EscalationRequest {
        EscalationRequest {
            target: NavigationTarget {
                label: label.to_string(),
                container_label: Some("Incidents".to_string()),
            },
            prompt: PROMPT.to_string(),
            timeout: Duration::from_millis(self.config.flow.response_timeout_ms),
            run_id: "test-run".to_string(),
        }
    }

    fn escalate(&self, label: &str) -> Result<Escalation> {
        let flow = FlowOrchestrator::new(&self.fake, &self.config, &self.validator);
        flow.escalate(&self.request(label))
    }
}

#[test]
fn test_flow_state_numbers_are_step_order() {
    for (i, state) in FlowState::STEPS.iter().enumerate() {
        assert_eq!(state.number() as usize, i + 1);
    }
    assert_eq!(FlowState::Done.number(), 11);
    assert_eq!(FlowState::PanelOpen.label(), "panel_open");
    assert_eq!(
        serde_json::to_string(&FlowState::PromptVerified).unwrap(),
        "\"prompt_verified\""
    );
}

#[test]
fn test_retry_context_stops_on_terminal_or_exhaustion() {
    let mut retry = RetryContext::new(3);
    assert!(retry.should_retry(Some(ErrorReason::FocusFailed)));
    assert!(retry.should_retry(None));
    assert!(!retry.should_retry(Some(ErrorReason::InvalidResponseFormat)));
    retry.attempt = 3;
    assert!(retry.exhausted());
    assert!(!retry.should_retry(Some(ErrorReason::FocusFailed)));
    assert_eq!(RetryContext::new(0).max_attempts, 1);
}

#[test]
fn test_happy_path_reaches_done_in_one_attempt() {
    let rig = Rig::new();
    rig.fake.queue_reply(ANSWER);
    rig.fake.set_clipboard(Some("user clipboard"));

    let escalation = rig.escalate("Rollback plan").unwrap();

    assert_eq!(escalation.response, ANSWER);
    assert_eq!(escalation.attempts, 1);
    assert!(!escalation.clarified);
    assert_eq!(rig.fake.launches(), 1);
    assert_eq!(rig.fake.selected_group().as_deref(), Some("Incidents"));
    assert_eq!(rig.fake.selected_conversation().as_deref(), Some("Rollback plan"));
    assert_eq!(rig.fake.submissions(), vec![PROMPT.to_string()]);
    assert!(rig.fake.destructive_activations().is_empty());
    assert_eq!(rig.fake.clipboard().as_deref(), Some("user clipboard"));
}

#[test]
fn test_existing_instance_is_terminated_before_launch() {
    let rig = Rig::new();
    rig.fake.launch_now();
    rig.fake.queue_reply(ANSWER);

    rig.escalate("Rollback plan").unwrap();
    assert_eq!(rig.fake.terminations(), 1);
    assert_eq!(rig.fake.launches(), 2);
}

#[test]
fn test_minimized_mid_flow_is_restored_and_completes() {
    let rig = Rig::new();
    rig.fake.queue_reply(ANSWER);
    // First capture is the panel probe in step 4
    rig.fake.minimize_on_capture(1);

    let escalation = rig.escalate("Rollback plan").unwrap();
    assert_eq!(escalation.response, ANSWER);
    assert_eq!(escalation.attempts, 1);
    assert!(rig.fake.restores() >= 1);
}

#[test]
fn test_template_echo_sends_one_clarification() {
    let rig = Rig::new();
    rig.fake.queue_reply(TEMPLATE_ECHO);
    rig.fake.queue_reply(ANSWER);

    let escalation = rig.escalate("Rollback plan").unwrap();
    assert!(escalation.clarified);
    assert_eq!(escalation.response, ANSWER);
    let submissions = rig.fake.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0], PROMPT);
    assert_eq!(submissions[1], rig.config.prompt.clarification_message);
}

#[test]
fn test_persistent_template_echo_is_terminal() {
    let rig = Rig::new();
    rig.fake.queue_reply(TEMPLATE_ECHO);
    rig.fake.queue_reply(TEMPLATE_ECHO);

    let err = rig.escalate("Rollback plan").unwrap_err();
    assert_eq!(err.reason(), Some(ErrorReason::TemplateResponsePersisted));
    assert_eq!(err.step(), Some(FlowState::ResponseExtracted));
    assert_eq!(rig.fake.launches(), 1, "terminal failures are not retried");
    assert_eq!(rig.fake.submissions().len(), 2);
}

#[test]
fn test_mangled_paste_is_never_submitted() {
    let rig = Rig::new();
    rig.fake.queue_reply(ANSWER);
    rig.fake.corrupt_pastes(1);

    rig.escalate("Rollback plan").unwrap();
    assert_eq!(rig.fake.submissions(), vec![PROMPT.to_string()]);
}

#[test]
fn test_verify_exhaustion_relaunches_and_submits_once() {
    let rig = Rig::new();
    rig.fake.queue_reply(ANSWER);
    rig.fake.corrupt_pastes(rig.config.prompt.verify_attempts);

    let escalation = rig.escalate("Rollback plan").unwrap();
    assert_eq!(escalation.attempts, 2);
    assert_eq!(rig.fake.launches(), 2);
    assert_eq!(rig.fake.submissions(), vec![PROMPT.to_string()]);
}

#[test]
fn test_no_input_reaches_a_background_window() {
    for seconds in [1, 3, 6, 9, 12] {
        let rig = Rig::new();
        rig.fake.queue_reply(ANSWER);
        rig.fake.steal_focus_after(Duration::from_secs(seconds));

        let escalation = rig.escalate("Rollback plan").unwrap();
        assert_eq!(escalation.response, ANSWER, "theft at {seconds}s");
        assert_eq!(rig.fake.input_without_foreground(), 0, "theft at {seconds}s");
    }
}

#[test]
fn test_malformed_answer_fails_without_retry() {
    let rig = Rig::new();
    rig.fake.queue_reply("ok");

    let err = rig.escalate("Rollback plan").unwrap_err();
    assert_eq!(err.reason(), Some(ErrorReason::InvalidResponseFormat));
    assert_eq!(err.step().map(|s| s.number()), Some(10));
    assert_eq!(rig.fake.launches(), 1);
}

#[test]
fn test_missing_conversation_exhausts_flow_attempts() {
    let rig = Rig::new();

    let err = rig.escalate("Quarterly budget").unwrap_err();
    assert_eq!(err.reason(), Some(ErrorReason::ConversationNotFound));
    assert_eq!(err.step(), Some(FlowState::ConversationSelected));
    assert_eq!(rig.fake.launches(), rig.config.flow.max_attempts);
    assert!(rig.fake.submissions().is_empty());
}

#[test]
fn test_launch_failure_is_reported_at_step_two() {
    let rig = Rig::new();
    rig.fake.fail_launches(u32::MAX);

    let err = rig.escalate("Rollback plan").unwrap_err();
    assert_eq!(err.reason(), Some(ErrorReason::LaunchFailed));
    assert_eq!(err.step(), Some(FlowState::Launched));
    assert_eq!(rig.fake.launches(), 0);
}

#[test]
fn test_send_on_open_window_submits_without_relaunch() {
    let rig = Rig::new();
    rig.fake.launch_now();
    rig.fake.queue_reply(ANSWER);
    let flow = FlowOrchestrator::new(&rig.fake, &rig.config, &rig.validator);
    let mut handle = rig.fake.current_handle().unwrap();

    flow.send(&mut handle, PROMPT).unwrap();
    flow.wait_for_response(&mut handle, Duration::from_secs(60))
        .unwrap();
    let read = flow.read_response(&mut handle, Some(PROMPT)).unwrap();

    assert_eq!(read.accept().unwrap(), ANSWER);
    assert_eq!(rig.fake.launches(), 1);
    assert_eq!(rig.fake.submissions(), vec![PROMPT.to_string()]);
}

#[test]
fn test_moved_window_is_followed_through_every_step() {
    let rig = Rig::new();
    rig.fake.launch_now();
    rig.fake.queue_reply(ANSWER);
    let flow = FlowOrchestrator::new(&rig.fake, &rig.config, &rig.validator);
    let mut handle = rig.fake.current_handle().unwrap();
    let request = rig.request("Rollback plan");

    let moved = Bounds::new(300, 250, 1000, 800);
    rig.fake.move_window(moved);
    flow.open_panel(&mut handle).unwrap();
    assert_eq!(handle.bounds, moved);

    let moved_again = Bounds::new(60, 40, 1000, 800);
    rig.fake.move_window(moved_again);
    flow.navigate(&mut handle, &request.target).unwrap();
    flow.send(&mut handle, PROMPT).unwrap();
    flow.wait_for_response(&mut handle, Duration::from_secs(60))
        .unwrap();
    let read = flow.read_response(&mut handle, Some(PROMPT)).unwrap();

    assert_eq!(read.accept().unwrap(), ANSWER);
    assert_eq!(rig.fake.selected_conversation().as_deref(), Some("Rollback plan"));
    assert_eq!(handle.bounds, moved_again);
    assert_eq!(rig.fake.launches(), 1);
}

#[test]
fn test_minimized_while_waiting_is_restored_without_resending() {
    let rig = Rig::new();
    rig.fake.launch_now();
    rig.fake.queue_reply(ANSWER);
    let flow = FlowOrchestrator::new(&rig.fake, &rig.config, &rig.validator);
    let mut handle = rig.fake.current_handle().unwrap();

    flow.send(&mut handle, PROMPT).unwrap();
    rig.fake.set_minimized(true);
    flow.wait_for_response(&mut handle, Duration::from_secs(60))
        .unwrap();
    let read = flow.read_response(&mut handle, Some(PROMPT)).unwrap();

    assert_eq!(read.accept().unwrap(), ANSWER);
    assert!(rig.fake.restores() >= 1);
    assert_eq!(rig.fake.submissions(), vec![PROMPT.to_string()]);
}
