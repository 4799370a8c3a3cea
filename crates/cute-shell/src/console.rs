//! Console front-end
//!
//! Plays the role of the UI thread: reads commands, edits settings, and
//! dispatches lifecycle requests. Outcomes arrive on the dispatcher channel
//! and are handled on this same thread, between commands.

use crate::dry_run::PermissionPrompt;
use anyhow::Result;
use crossbeam_channel::{select, Receiver};
use cute_vpn::{
    gateway_choices, latest_log, list_eligible_applications, setting_list, AppRegistry,
    ApplicationRecord, Dispatcher, Editor, ExcludedAppsDraft, Outcome, Request,
    SettingEntry, SettingsStore,
};
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, warn};

const HELP: &str = "\
commands:
  list                 show settings
  edit <row> [value]   edit a setting (links: separate lines with \\n)
  check <n> / uncheck <n>, ok, cancel   excluded-apps dialog
  start / stop         control the tunnel
  help / quit";

/// Enabled state of the start/stop controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub start_enabled: bool,
    pub stop_enabled: bool,
}

impl Controls {
    /// Initial controls after connecting to the session
    pub fn connected(running: bool) -> Self {
        Self {
            start_enabled: !running,
            stop_enabled: running,
        }
    }

    /// Press start; returns false when the control is disabled
    pub fn press_start(&mut self) -> bool {
        if !self.start_enabled {
            return false;
        }
        self.start_enabled = false;
        true
    }

    /// Press stop; returns false when the control is disabled
    pub fn press_stop(&mut self) -> bool {
        if !self.stop_enabled {
            return false;
        }
        self.stop_enabled = false;
        true
    }

    /// Re-enable controls once an outcome arrives
    pub fn on_outcome(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Started => self.stop_enabled = true,
            Outcome::StartFailed { .. } | Outcome::Stopped => self.start_enabled = true,
            _ => {}
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop_enabled
    }
}

/// Open excluded-apps dialog
enum Dialog {
    None,
    Apps {
        listing: Vec<ApplicationRecord>,
        draft: ExcludedAppsDraft,
    },
}

/// Console front-end state
pub struct Console<W: Write> {
    dispatcher: Dispatcher,
    settings: Arc<SettingsStore>,
    registry: Arc<dyn AppRegistry>,
    prompt: Arc<dyn PermissionPrompt>,
    controls: Controls,
    dialog: Dialog,
    out: W,
}

impl<W: Write> Console<W> {
    pub fn new(
        dispatcher: Dispatcher,
        registry: Arc<dyn AppRegistry>,
        prompt: Arc<dyn PermissionPrompt>,
        out: W,
    ) -> Self {
        let settings = dispatcher.manager().settings().clone();
        let controls = Controls::connected(dispatcher.is_running());
        Self {
            dispatcher,
            settings,
            registry,
            prompt,
            controls,
            dialog: Dialog::None,
            out,
        }
    }

    pub fn controls(&self) -> Controls {
        self.controls
    }

    /// Run until `quit` or end of input
    pub fn run(mut self, lines: Receiver<String>) -> Result<()> {
        writeln!(self.out, "{}", HELP)?;
        self.print_settings()?;

        let outcomes = self.dispatcher.outcomes().clone();
        loop {
            let keep_going = select! {
                recv(lines) -> line => match line {
                    Ok(line) => self.handle(&line)?,
                    Err(_) => false,
                },
                recv(outcomes) -> outcome => {
                    if let Ok(outcome) = outcome {
                        self.on_outcome(outcome)?;
                    }
                    true
                }
            };
            if !keep_going {
                break;
            }
        }

        self.dispatcher.disconnect();
        Ok(())
    }

    /// Apply an outcome reported by a worker
    pub fn on_outcome(&mut self, outcome: Outcome) -> Result<()> {
        self.controls.on_outcome(&outcome);
        writeln!(self.out, "{}", outcome)?;

        if let Outcome::StartFailed {
            permission_required: true,
            ..
        } = outcome
        {
            if self.prompt.request() {
                writeln!(self.out, "permission granted, run `start` again")?;
            }
        }
        if matches!(outcome, Outcome::GatewayUpdated(_)) {
            self.print_settings()?;
        }
        Ok(())
    }

    /// Handle one command line; returns false to quit
    pub fn handle(&mut self, line: &str) -> Result<bool> {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        debug!("Console command {:?}", command);

        match command {
            "" => {}
            "help" => writeln!(self.out, "{}", HELP)?,
            "list" => self.print_settings()?,
            "edit" => self.edit(rest)?,
            "check" | "uncheck" => self.toggle_app(rest, command == "check")?,
            "ok" => self.confirm_dialog()?,
            "cancel" => {
                self.dialog = Dialog::None;
                writeln!(self.out, "cancelled")?;
            }
            "start" => self.start()?,
            "stop" => self.stop()?,
            "quit" | "exit" => return Ok(false),
            other => writeln!(self.out, "unknown command: {}", other)?,
        }
        Ok(true)
    }

    fn start(&mut self) -> Result<()> {
        if !self.controls.press_start() {
            writeln!(self.out, "start is disabled")?;
            return Ok(());
        }
        if let Err(e) = self.dispatcher.dispatch(Request::Start) {
            self.controls.start_enabled = true;
            writeln!(self.out, "{}", e)?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.controls.press_stop() {
            writeln!(self.out, "stop is disabled")?;
            return Ok(());
        }
        if let Err(e) = self.dispatcher.dispatch(Request::Stop) {
            self.controls.stop_enabled = true;
            writeln!(self.out, "{}", e)?;
        }
        Ok(())
    }

    fn print_settings(&mut self) -> Result<()> {
        for (i, item) in setting_list(&self.settings).iter().enumerate() {
            match &item.value {
                Some(value) => writeln!(self.out, "{:>2}. {:<14} {}", i + 1, item.entry, value)?,
                None => writeln!(self.out, "{:>2}. {}", i + 1, item.entry)?,
            }
        }
        Ok(())
    }

    fn edit(&mut self, args: &str) -> Result<()> {
        let (row, value) = args.split_once(' ').unwrap_or((args, ""));
        let value = value.trim();
        let Some(entry) = row
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| SettingEntry::all().get(i).copied())
        else {
            writeln!(self.out, "no such row: {}", row)?;
            return Ok(());
        };

        match entry.kind().editor(self.controls.is_running()) {
            Editor::Text | Editor::MultilineText => {
                let SettingEntry::Key(key) = entry else {
                    return Ok(());
                };
                if value.is_empty() {
                    let current = self.settings.get_string(key).unwrap_or_default();
                    writeln!(self.out, "{}: {}", entry, current.replace('\n', "\\n"))?;
                } else {
                    self.settings.save_string(key, value.replace("\\n", "\n"));
                    self.print_settings()?;
                }
            }
            Editor::GatewayChoice => self.gateway_dialog(value)?,
            Editor::AppChoice => self.open_apps_dialog()?,
            Editor::Log => {
                let dir = self.dispatcher.manager().storage_dir().to_path_buf();
                writeln!(self.out, "{}", latest_log(&dir))?;
            }
        }
        Ok(())
    }

    fn gateway_dialog(&mut self, value: &str) -> Result<()> {
        let choices = gateway_choices(&self.dispatcher.manager().neighbors());

        if value.is_empty() {
            for (i, choice) in choices.iter().enumerate() {
                writeln!(self.out, "  [{}] {}", i + 1, choice)?;
            }
            return Ok(());
        }

        let Some(choice) = value
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| choices.get(i).cloned())
        else {
            writeln!(self.out, "no such neighbor: {}", value)?;
            return Ok(());
        };
        if let Err(e) = self.dispatcher.dispatch(Request::SwitchGateway(choice)) {
            writeln!(self.out, "{}", e)?;
        }
        Ok(())
    }

    fn open_apps_dialog(&mut self) -> Result<()> {
        let draft = self.settings.draft_excluded_apps();
        let listing = list_eligible_applications(self.registry.as_ref(), draft.apps());
        self.dialog = Dialog::Apps { listing, draft };
        self.print_dialog()
    }

    fn toggle_app(&mut self, arg: &str, excluded: bool) -> Result<()> {
        let Dialog::Apps { listing, draft } = &mut self.dialog else {
            writeln!(self.out, "open the excluded apps dialog first")?;
            return Ok(());
        };
        let Some(app) = arg
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| listing.get(i))
        else {
            writeln!(self.out, "no such app: {}", arg)?;
            return Ok(());
        };

        draft.set(&app.package_id, excluded);
        self.print_dialog()
    }

    fn confirm_dialog(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.dialog, Dialog::None) {
            Dialog::Apps { draft, .. } => {
                self.settings.commit_excluded_apps(draft);
                writeln!(self.out, "excluded apps saved (applied on next start)")?;
            }
            Dialog::None => {
                warn!("Nothing to confirm");
                writeln!(self.out, "no open dialog")?;
            }
        }
        Ok(())
    }

    fn print_dialog(&mut self) -> Result<()> {
        if let Dialog::Apps { listing, draft } = &self.dialog {
            for (i, app) in listing.iter().enumerate() {
                let mark = if draft.contains(&app.package_id) { "x" } else { " " };
                writeln!(self.out, "  [{}] {:>2}. {}", mark, i + 1, app.display_name)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cute_vpn::testing::{MockEngine, MockInterface, StaticRegistry, HOST_APP_ID};
    use cute_vpn::{SessionManager, SettingKey};
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingPrompt {
        requests: AtomicUsize,
    }

    impl PermissionPrompt for CountingPrompt {
        fn request(&self) -> bool {
            self.requests.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn console(engine: Arc<MockEngine>) -> Console<Vec<u8>> {
        console_with(engine, Arc::new(MockInterface::new()), Arc::default())
    }

    fn console_with(
        engine: Arc<MockEngine>,
        interface: Arc<MockInterface>,
        prompt: Arc<CountingPrompt>,
    ) -> Console<Vec<u8>> {
        let manager = SessionManager::new(
            Arc::new(SettingsStore::in_memory()),
            engine,
            interface,
            HOST_APP_ID,
            "/tmp/cute-shell-test",
        );
        let registry = StaticRegistry::new([
            ("Zeta", "com.z", false),
            ("Alpha", "com.a", false),
            ("Launcher", "android.launcher", true),
        ]);
        Console::new(
            Dispatcher::connect(Arc::new(manager)),
            Arc::new(registry),
            prompt,
            Vec::new(),
        )
    }

    fn await_outcome(console: &mut Console<Vec<u8>>) -> Outcome {
        let outcome = console
            .dispatcher
            .outcomes()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        console.on_outcome(outcome.clone()).unwrap();
        outcome
    }

    fn output(console: &Console<Vec<u8>>) -> String {
        String::from_utf8_lossy(&console.out).to_string()
    }

    #[test]
    fn test_controls_flow() {
        let mut controls = Controls::connected(false);
        assert!(controls.press_start());
        assert!(!controls.press_start());
        assert!(!controls.press_stop());

        controls.on_outcome(&Outcome::Started);
        assert!(controls.press_stop());
        controls.on_outcome(&Outcome::Stopped);
        assert!(controls.start_enabled);
    }

    #[test]
    fn test_controls_after_failure() {
        let mut controls = Controls::connected(false);
        controls.press_start();
        controls.on_outcome(&Outcome::StartFailed {
            message: "boom".to_string(),
            permission_required: false,
        });
        assert!(controls.start_enabled);
        assert!(!controls.stop_enabled);
    }

    #[test]
    fn test_edit_text_setting() {
        let mut console = console(Arc::new(MockEngine::new()));
        console.handle("edit 5 1.1.1.1").unwrap();

        assert_eq!(
            console.settings.get_string(SettingKey::DnsServer).as_deref(),
            Some("1.1.1.1")
        );
    }

    #[test]
    fn test_edit_value_is_trimmed() {
        let mut console = console(Arc::new(MockEngine::new()));
        console.handle("edit 5   1.1.1.1  ").unwrap();

        assert_eq!(
            console.settings.get_string(SettingKey::DnsServer).as_deref(),
            Some("1.1.1.1")
        );
    }

    #[test]
    fn test_controls_unchanged_by_refused_start() {
        let mut controls = Controls::connected(true);
        controls.on_outcome(&Outcome::Failed("Cannot start while Active".to_string()));
        assert!(!controls.start_enabled);
        assert!(controls.stop_enabled);
    }

    #[test]
    fn test_permission_denied_prompts_once() {
        let engine = Arc::new(MockEngine::new());
        let interface = Arc::new(MockInterface::new());
        interface.deny_permission();
        let prompt = Arc::new(CountingPrompt::default());
        let mut console = console_with(engine.clone(), interface.clone(), prompt.clone());

        console.handle("start").unwrap();
        assert_eq!(
            await_outcome(&mut console),
            Outcome::StartFailed {
                message: "VPN permission required".to_string(),
                permission_required: true,
            }
        );
        assert_eq!(prompt.requests.load(Ordering::SeqCst), 1);
        assert!(console.controls().start_enabled);

        // No automatic retry
        assert!(console
            .dispatcher
            .outcomes()
            .recv_timeout(Duration::from_millis(200))
            .is_err());
        assert_eq!(engine.start_count(), 0);
        assert_eq!(interface.established_count(), 0);
        assert!(!console.dispatcher.is_running());
    }

    #[test]
    fn test_edit_links_multiline() {
        let mut console = console(Arc::new(MockEngine::new()));
        console.handle(r"edit 4 tls://a:1\ntls://b:2").unwrap();

        assert_eq!(
            console.settings.get_string(SettingKey::Links).as_deref(),
            Some("tls://a:1\ntls://b:2")
        );
    }

    #[test]
    fn test_gateway_is_text_while_idle() {
        let mut console = console(Arc::new(MockEngine::new()));
        console.handle("edit 3 172.20.0.9").unwrap();

        assert_eq!(
            console.settings.get_string(SettingKey::Gateway).as_deref(),
            Some("172.20.0.9")
        );
    }

    #[test]
    fn test_excluded_apps_dialog() {
        let mut console = console(Arc::new(MockEngine::new()));
        console.handle("edit 6").unwrap();
        // Alpha, Zeta; launcher hidden
        console.handle("check 2").unwrap();
        assert!(console.settings.excluded_apps().unwrap_or_default().is_empty());

        console.handle("ok").unwrap();
        let committed = console.settings.excluded_apps().unwrap();
        assert!(committed.contains("com.z"));
        assert!(!output(&console).contains("Launcher"));
    }

    #[test]
    fn test_cancel_discards_draft() {
        let mut console = console(Arc::new(MockEngine::new()));
        console.handle("edit 6").unwrap();
        console.handle("check 1").unwrap();
        console.handle("cancel").unwrap();
        console.handle("ok").unwrap();

        assert!(console.settings.excluded_apps().unwrap_or_default().is_empty());
    }

    #[test]
    fn test_start_switch_stop() {
        let engine = Arc::new(MockEngine::new());
        engine.set_neighbors([
            (Ipv4Addr::new(172, 20, 0, 1), "router"),
            (Ipv4Addr::new(172, 20, 0, 4), "laptop"),
        ]);
        let mut console = console(engine);

        console.handle("start").unwrap();
        assert!(!console.controls().start_enabled);
        assert_eq!(await_outcome(&mut console), Outcome::Started);
        assert!(console.controls().stop_enabled);

        console.handle("edit 3").unwrap();
        assert!(output(&console).contains("laptop  172.20.0.4"));
        console.handle("edit 3 2").unwrap();
        assert_eq!(
            await_outcome(&mut console),
            Outcome::GatewayUpdated(Ipv4Addr::new(172, 20, 0, 4))
        );

        console.handle("stop").unwrap();
        assert_eq!(await_outcome(&mut console), Outcome::Stopped);
        assert!(console.controls().start_enabled);
    }

    #[test]
    fn test_start_disabled_while_pending() {
        let engine = Arc::new(MockEngine::new());
        let release = engine.hold_start();
        let mut console = console(engine);

        console.handle("start").unwrap();
        console.handle("start").unwrap();
        assert!(output(&console).contains("start is disabled"));

        release.send(()).unwrap();
        assert_eq!(await_outcome(&mut console), Outcome::Started);
    }

    #[test]
    fn test_quit() {
        let mut console = console(Arc::new(MockEngine::new()));
        assert!(!console.handle("quit").unwrap());
    }
}
