//! Command dispatch.
//!
//! A `Driver` is one session: it owns the config, the single-flight gate and
//! the window handle left behind by the last command, so the step-by-step
//! actions can be issued separately in serve mode. Every action except
//! `check_target` holds the gate while it runs.

use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tracing::{info, info_span};
use uuid::Uuid;

use crate::config::Config;
use crate::desktop::{Desktop, WindowHandle};
use crate::error::{DriverError, ErrorReason, Result};
use crate::flow::{EscalationRequest, FlowOrchestrator, FlowState};
use crate::gate::FlightGate;
use crate::guard::WindowGuard;
use crate::locator::NavigationTarget;
use crate::logging;
use crate::protocol::{Action, Command, CommandResult, Params};
use crate::validation::TemplateValidator;

pub struct Driver<'d> {
    desktop: &'d dyn Desktop,
    config: Config,
    gate: FlightGate,
    validator: TemplateValidator,
    /// Window the last command finished on
    handle: Option<WindowHandle>,
    /// Prompt most recently submitted in this session
    last_prompt: Option<String>,
}

impl<'d> Driver<'d> {
    pub fn new(desktop: &'d dyn Desktop, config: Config) -> Result<Self> {
        let validator = TemplateValidator::new(&config.validation)?;
        let gate = FlightGate::new(
            config.flow.lock_path(),
            Duration::from_millis(config.flow.gate_poll_ms),
        );
        Ok(Self {
            desktop,
            config,
            gate,
            validator,
            handle: None,
            last_prompt: None,
        })
    }

    /// Run one command to a result. Never fails: errors become failure results.
    pub fn execute(&mut self, command: Command) -> CommandResult {
        let run_id = command
            .params
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let span = info_span!("command", run_id = %run_id, action = %command.action);
        let _entered = span.enter();

        let started = Instant::now();
        info!(action = %command.action, "Executing command");
        let outcome = self.gated(command.action, &run_id, &command.params);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(data) => {
                info!(action = %command.action, elapsed_ms, "Command succeeded");
                CommandResult::ok(&run_id, data)
            }
            Err(e) => {
                logging::log_failure(
                    e.reason().map_or("unclassified", |r| r.as_str()),
                    e.step().map(|s| s.number()),
                    &e.to_string(),
                );
                CommandResult::failure(&run_id, &e)
            }
        }
    }

    /// Result for input that never became a command.
    pub fn reject(&self, error: &DriverError) -> CommandResult {
        let run_id = Uuid::new_v4().to_string();
        logging::log_failure("unclassified", None, &error.to_string());
        CommandResult::failure(&run_id, error)
    }

    fn gated(&mut self, action: Action, run_id: &str, params: &Params) -> Result<Map<String, Value>> {
        if !action.needs_gate() {
            return self.dispatch(action, run_id, params);
        }
        let _pass = self.gate.acquire(run_id)?;
        self.dispatch(action, run_id, params)
    }

    fn dispatch(&mut self, action: Action, run_id: &str, params: &Params) -> Result<Map<String, Value>> {
        match action {
            Action::CheckTarget => self.check_target(),
            Action::FocusTarget => self.focus_target(),
            Action::FindContainer => self.find_container(params),
            Action::SendMessage => self.send_message(params),
            Action::WaitForResponse => self.wait_for_response(params),
            Action::GetLastResponse => self.get_last_response(),
            Action::Escalate => self.escalate(run_id, params),
        }
    }

    fn response_timeout(&self, params: &Params) -> Duration {
        Duration::from_millis(
            params
                .timeout_ms
                .unwrap_or(self.config.flow.response_timeout_ms),
        )
    }

    /// The session window, or whatever window the app has now. Never launches.
    fn session_handle(&self, flow: &FlowOrchestrator<'_>, step: FlowState) -> Result<WindowHandle> {
        if let Some(handle) = &self.handle {
            return Ok(handle.clone());
        }
        flow.guard().refresh_handle().ok_or_else(|| {
            DriverError::failure(
                ErrorReason::WindowInvalid,
                "no target window; run focus_target first",
            )
            .at_step(step, ErrorReason::WindowInvalid)
        })
    }

    fn check_target(&self) -> Result<Map<String, Value>> {
        let guard = WindowGuard::new(self.desktop, self.config.target.identity(), &self.config.guard);
        let mut data = Map::new();
        let Some(handle) = guard.refresh_handle() else {
            data.insert("found".into(), json!(false));
            return Ok(data);
        };
        let state = self.desktop.window_state(&handle);
        data.insert("found".into(), json!(state.exists));
        data.insert("title".into(), json!(self.desktop.window_title(&handle)));
        data.insert("minimized".into(), json!(state.minimized));
        data.insert("visible".into(), json!(state.visible));
        data.insert("bounds".into(), serde_json::to_value(state.bounds)?);
        data.insert("windowId".into(), json!(handle.id));
        Ok(data)
    }

    fn focus_target(&mut self) -> Result<Map<String, Value>> {
        let handle = {
            let flow = FlowOrchestrator::new(self.desktop, &self.config, &self.validator);
            flow.open_target()?
        };
        let mut data = Map::new();
        data.insert("windowId".into(), json!(handle.id));
        data.insert("pid".into(), json!(handle.pid));
        self.handle = Some(handle);
        self.last_prompt = None;
        Ok(data)
    }

    fn find_container(&mut self, params: &Params) -> Result<Map<String, Value>> {
        let container = params.require_container_label()?.to_string();
        let mut data = Map::new();
        let handle = {
            let flow = FlowOrchestrator::new(self.desktop, &self.config, &self.validator);
            let mut handle = match &self.handle {
                Some(handle) => handle.clone(),
                None => flow.open_target()?,
            };
            flow.open_panel(&mut handle)?;
            let group = flow.select_group(&mut handle, &container)?;
            data.insert("container".into(), json!(group.text));
            data.insert("viaSearch".into(), json!(group.via_search));
            if let Some(label) = &params.label {
                let target = NavigationTarget {
                    label: label.clone(),
                    container_label: Some(container.clone()),
                };
                let conversation = flow.select_conversation(&mut handle, &target)?;
                data.insert("conversation".into(), json!(conversation.text));
            }
            handle
        };
        self.handle = Some(handle);
        Ok(data)
    }

    fn send_message(&mut self, params: &Params) -> Result<Map<String, Value>> {
        let message = params.require_message()?.to_string();
        let handle = {
            let flow = FlowOrchestrator::new(self.desktop, &self.config, &self.validator);
            let mut handle = self.session_handle(&flow, FlowState::InputFocused)?;
            flow.send(&mut handle, &message)?;
            handle
        };
        let mut data = Map::new();
        data.insert("submitted".into(), json!(true));
        data.insert("chars".into(), json!(message.chars().count()));
        self.handle = Some(handle);
        self.last_prompt = Some(message);
        Ok(data)
    }

    fn wait_for_response(&mut self, params: &Params) -> Result<Map<String, Value>> {
        let timeout = self.response_timeout(params);
        let (handle, waited) = {
            let flow = FlowOrchestrator::new(self.desktop, &self.config, &self.validator);
            let mut handle = self.session_handle(&flow, FlowState::ResponseIdle)?;
            let waited = flow.wait_for_response(&mut handle, timeout)?;
            (handle, waited)
        };
        let mut data = Map::new();
        data.insert("sawGeneration".into(), json!(waited.saw_generation));
        data.insert("polls".into(), json!(waited.polls));
        data.insert("waitedMs".into(), json!(waited.waited.as_millis() as u64));
        self.handle = Some(handle);
        Ok(data)
    }

    fn get_last_response(&mut self) -> Result<Map<String, Value>> {
        let (handle, read) = {
            let flow = FlowOrchestrator::new(self.desktop, &self.config, &self.validator);
            let mut handle = self.session_handle(&flow, FlowState::ResponseExtracted)?;
            let read = flow.read_response(&mut handle, self.last_prompt.as_deref())?;
            (handle, read)
        };
        self.handle = Some(handle);
        let method = format!("{:?}", read.extracted.method);
        let response = read.accept()?;
        let mut data = Map::new();
        data.insert("response".into(), json!(response));
        data.insert("method".into(), json!(method));
        Ok(data)
    }

    fn escalate(&mut self, run_id: &str, params: &Params) -> Result<Map<String, Value>> {
        let request = EscalationRequest {
            target: NavigationTarget {
                label: params.require_label()?.to_string(),
                container_label: params
                    .container_label
                    .clone()
                    .filter(|c| !c.trim().is_empty()),
            },
            prompt: params.require_message()?.to_string(),
            timeout: self.response_timeout(params),
            run_id: run_id.to_string(),
        };
        let outcome = {
            let flow = FlowOrchestrator::new(self.desktop, &self.config, &self.validator);
            flow.escalate(&request)
        };
        // A failed escalation leaves no trustworthy window behind
        self.handle = None;
        let escalation = outcome?;

        let mut data = Map::new();
        data.insert("response".into(), json!(escalation.response));
        data.insert("attempts".into(), json!(escalation.attempts));
        data.insert("clarified".into(), json!(escalation.clarified));
        data.insert("method".into(), json!(format!("{:?}", escalation.extracted.method)));
        self.handle = Some(escalation.handle);
        self.last_prompt = Some(request.prompt);
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::fake::FakeDesktop;

    const ANSWER: &str = "Roll back to 4.2.1 now, then ship the hotfix behind the flag tomorrow.";

    fn config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.flow.lock_file = dir.path().join("driver.lock").display().to_string();
        config
    }

    fn fake(config: &Config) -> FakeDesktop {
        let fake = FakeDesktop::new(config);
        fake.set_groups(&["Personal", "Incidents"]);
        fake.set_conversations(&["Weekly sync", "Rollback plan"]);
        fake
    }

    fn command(action: Action, params: Params) -> Command {
        Command::new(action, params)
    }

    #[test]
    fn test_check_target_without_window() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let fake = fake(&config);
        let mut driver = Driver::new(&fake, config).unwrap();

        let result = driver.execute(command(Action::CheckTarget, Params::default()));
        assert!(result.success);
        let data = result.data.unwrap();
        assert_eq!(data["found"], json!(false));
        assert!(data["runId"].is_string());
    }

    #[test]
    fn test_check_target_reports_window_without_touching_it() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let fake = fake(&config);
        fake.launch_now();
        fake.set_minimized(true);
        let mut driver = Driver::new(&fake, config).unwrap();

        let result = driver.execute(command(Action::CheckTarget, Params::default()));
        let data = result.data.unwrap();
        assert_eq!(data["found"], json!(true));
        assert_eq!(data["minimized"], json!(true));
        assert_eq!(data["title"], json!("ChatGPT"));
        assert_eq!(fake.restores(), 0);
        assert_eq!(fake.foreground_requests(), 0);
        assert!(fake.clicks().is_empty());
    }

    #[test]
    fn test_escalate_echoes_run_id_and_releases_gate() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let lock = config.flow.lock_path();
        let fake = fake(&config);
        fake.queue_reply(ANSWER);
        let mut driver = Driver::new(&fake, config).unwrap();

        let result = driver.execute(command(
            Action::Escalate,
            Params {
                label: Some("Rollback plan".into()),
                container_label: Some("Incidents".into()),
                message: Some("Roll back or hotfix?".into()),
                run_id: Some("run-42".into()),
                ..Params::default()
            },
        ));

        assert!(result.success, "{result:?}");
        let data = result.data.clone().unwrap();
        assert_eq!(data["response"], json!(ANSWER));
        assert_eq!(data["attempts"], json!(1));
        assert_eq!(data["clarified"], json!(false));
        assert_eq!(result.run_id(), Some("run-42"));
        assert!(!lock.exists());
    }

    #[test]
    fn test_escalate_requires_message() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let fake = fake(&config);
        let mut driver = Driver::new(&fake, config).unwrap();

        let result = driver.execute(command(
            Action::Escalate,
            Params {
                label: Some("Rollback plan".into()),
                ..Params::default()
            },
        ));
        assert!(!result.success);
        assert!(result.error_reason.is_none());
        assert!(result.error.unwrap().contains("message"));
        assert_eq!(fake.launches(), 0);
    }

    #[test]
    fn test_step_by_step_session_reuses_window() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let fake = fake(&config);
        fake.queue_reply(ANSWER);
        let mut driver = Driver::new(&fake, config).unwrap();

        let found = driver.execute(command(
            Action::FindContainer,
            Params {
                container_label: Some("Incidents".into()),
                label: Some("Rollback plan".into()),
                ..Params::default()
            },
        ));
        assert!(found.success, "{found:?}");
        assert_eq!(fake.selected_conversation().as_deref(), Some("Rollback plan"));

        let sent = driver.execute(command(
            Action::SendMessage,
            Params {
                message: Some("Roll back or hotfix?".into()),
                ..Params::default()
            },
        ));
        assert!(sent.success, "{sent:?}");

        let waited = driver.execute(command(
            Action::WaitForResponse,
            Params {
                timeout_ms: Some(60_000),
                ..Params::default()
            },
        ));
        assert!(waited.success, "{waited:?}");
        assert_eq!(waited.data.unwrap()["sawGeneration"], json!(true));

        let read = driver.execute(command(Action::GetLastResponse, Params::default()));
        assert!(read.success, "{read:?}");
        assert_eq!(read.data.unwrap()["response"], json!(ANSWER));
        assert_eq!(fake.launches(), 1, "later steps never relaunch");
    }

    #[test]
    fn test_send_message_without_window_fails_at_input_focus() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let fake = fake(&config);
        let mut driver = Driver::new(&fake, config).unwrap();

        let result = driver.execute(command(
            Action::SendMessage,
            Params {
                message: Some("hello there".into()),
                ..Params::default()
            },
        ));
        assert!(!result.success);
        assert_eq!(result.failed_step, Some(7));
        assert_eq!(result.error_reason, Some(ErrorReason::WindowInvalid));
    }

    #[test]
    fn test_failure_carries_step_and_reason() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.flow.max_attempts = 1;
        let fake = fake(&config);
        let mut driver = Driver::new(&fake, config).unwrap();

        let result = driver.execute(command(
            Action::Escalate,
            Params {
                label: Some("Quarterly budget".into()),
                container_label: Some("Incidents".into()),
                message: Some("Roll back or hotfix?".into()),
                ..Params::default()
            },
        ));
        assert!(!result.success);
        assert_eq!(result.failed_step, Some(6));
        assert_eq!(result.error_reason, Some(ErrorReason::ConversationNotFound));
        assert_eq!(result.exit_code(), 1);
    }
}
