//! In-memory multiplexer and container runtime for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::cancel::Ctx;
use crate::container::{ContainerRuntime, ContainerState};
use crate::subprocess::RunOutput;
use crate::terminal::session::PROMPT_GLYPH;
use crate::terminal::{CaptureMode, ControlKey, Multiplexer};

const BOOT_BANNER: &str = "Booting codex...";

/// What the fake CLI prints after input is submitted.
pub enum Reply {
    /// Print these lines, then return to an empty prompt.
    Lines(Vec<String>),
    /// Print these lines and keep working (no new prompt).
    Busy(Vec<String>),
}

impl Reply {
    pub fn lines(text: &str) -> Self {
        Self::Lines(text.lines().map(str::to_string).collect())
    }

    pub fn busy(text: &str) -> Self {
        Self::Busy(text.lines().map(str::to_string).collect())
    }
}

type Responder = Box<dyn FnMut(&str) -> Reply + Send>;

#[derive(Default)]
struct MuxState {
    sessions: HashSet<String>,
    screen: Vec<String>,
    typed: String,
    calls: Vec<String>,
    pane_dead: bool,
    /// Sessions created while this is non-zero never show a prompt.
    stuck_boots: usize,
    capture_failures: usize,
    replies: VecDeque<Reply>,
    responder: Option<Responder>,
    submitted: Vec<String>,
}

impl MuxState {
    fn prompt_line(&mut self) -> Option<&mut String> {
        self.screen
            .iter_mut()
            .rev()
            .find(|line| line.trim_start().starts_with(PROMPT_GLYPH))
    }

    fn boot(&mut self) {
        self.pane_dead = false;
        self.typed.clear();
        if self.stuck_boots > 0 {
            self.stuck_boots -= 1;
            self.screen = vec![BOOT_BANNER.to_string()];
        } else {
            self.screen = vec!["OpenAI Codex".to_string(), String::new(), empty_prompt()];
        }
    }

    fn submit(&mut self) {
        let typed = std::mem::take(&mut self.typed);
        self.submitted.push(typed.clone());
        let reply = match self.replies.pop_front() {
            Some(reply) => reply,
            None => match self.responder.as_mut() {
                Some(responder) => responder(&typed),
                None => Reply::Lines(Vec::new()),
            },
        };
        match reply {
            Reply::Lines(lines) => {
                self.screen.extend(lines);
                self.screen.push(String::new());
                self.screen.push(empty_prompt());
            }
            Reply::Busy(lines) => self.screen.extend(lines),
        }
    }
}

fn empty_prompt() -> String {
    format!("{PROMPT_GLYPH} ")
}

/// A [`Multiplexer`] that emulates one interactive CLI pane.
///
/// Clones share state, so a test can keep a handle while the code under
/// test owns another.
#[derive(Clone, Default)]
pub struct FakeMux {
    state: Arc<Mutex<MuxState>>,
}

impl FakeMux {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MuxState> {
        self.state.lock().unwrap()
    }

    /// Every session boots without ever reaching a prompt.
    pub fn never_ready(self) -> Self {
        self.stuck_boots(usize::MAX)
    }

    /// The next `n` sessions boot without reaching a prompt.
    pub fn stuck_boots(self, n: usize) -> Self {
        self.lock().stuck_boots = n;
        self
    }

    /// Answer each submitted input with `f(input)`.
    pub fn respond_with(self, f: impl FnMut(&str) -> Reply + Send + 'static) -> Self {
        self.lock().responder = Some(Box::new(f));
        self
    }

    /// Queue a reply ahead of the responder.
    pub fn push_reply(&self, reply: Reply) {
        self.lock().replies.push_back(reply);
    }

    /// Fail the next `n` captures.
    pub fn fail_captures(&self, n: usize) {
        self.lock().capture_failures = n;
    }

    pub fn set_pane_dead(&self, dead: bool) {
        self.lock().pane_dead = dead;
    }

    /// Append raw lines to the screen.
    pub fn print(&self, text: &str) {
        self.lock().screen.extend(text.lines().map(str::to_string));
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Inputs submitted so far, in order.
    pub fn submitted(&self) -> Vec<String> {
        self.lock().submitted.clone()
    }

    pub fn screen(&self) -> String {
        self.lock().screen.join("\n")
    }
}

impl Multiplexer for FakeMux {
    fn probe(&self, _ctx: &Ctx) -> anyhow::Result<String> {
        self.lock().calls.push("probe".to_string());
        Ok("tmux 3.4".to_string())
    }

    fn has_session(&self, ctx: &Ctx, session: &str) -> anyhow::Result<bool> {
        ctx.check()?;
        let mut state = self.lock();
        state.calls.push(format!("has-session {session}"));
        Ok(state.sessions.contains(session))
    }

    fn new_session(&self, ctx: &Ctx, session: &str, start_cmd: &str) -> anyhow::Result<()> {
        ctx.check()?;
        let mut state = self.lock();
        state.calls.push(format!("new-session {session} {start_cmd}"));
        state.sessions.insert(session.to_string());
        state.boot();
        Ok(())
    }

    fn kill_session(&self, ctx: &Ctx, session: &str) -> anyhow::Result<()> {
        ctx.check()?;
        let mut state = self.lock();
        state.calls.push(format!("kill-session {session}"));
        if state.sessions.remove(session) {
            state.screen.clear();
            Ok(())
        } else {
            anyhow::bail!("can't find session: {session}")
        }
    }

    fn set_option(
        &self,
        _ctx: &Ctx,
        session: &str,
        option: &str,
        value: &str,
    ) -> anyhow::Result<()> {
        self.lock()
            .calls
            .push(format!("set-option {session} {option} {value}"));
        Ok(())
    }

    fn pane_dead(&self, _ctx: &Ctx, target: &str) -> anyhow::Result<bool> {
        let mut state = self.lock();
        state.calls.push(format!("pane-dead {target}"));
        Ok(state.pane_dead)
    }

    fn resize_pane(&self, _ctx: &Ctx, target: &str, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.lock()
            .calls
            .push(format!("resize-pane {target} {cols}x{rows}"));
        Ok(())
    }

    fn send_control_sequence(
        &self,
        ctx: &Ctx,
        target: &str,
        keys: &[ControlKey],
    ) -> anyhow::Result<()> {
        ctx.check()?;
        let mut state = self.lock();
        for key in keys {
            state.calls.push(format!("send-keys {target} {}", key.key_name()));
            match key {
                ControlKey::ClearLine => {
                    state.typed.clear();
                    if let Some(line) = state.prompt_line() {
                        *line = empty_prompt();
                    }
                }
                ControlKey::Submit => state.submit(),
            }
        }
        Ok(())
    }

    fn send_literal(&self, ctx: &Ctx, target: &str, text: &str) -> anyhow::Result<()> {
        ctx.check()?;
        let mut state = self.lock();
        state.calls.push(format!("send-literal {target}"));
        state.typed.push_str(text);
        let echo = format!("{PROMPT_GLYPH} {}", state.typed);
        if let Some(line) = state.prompt_line() {
            *line = echo;
        }
        Ok(())
    }

    fn capture(
        &self,
        ctx: &Ctx,
        target: &str,
        _mode: CaptureMode,
        _lines: usize,
    ) -> anyhow::Result<String> {
        ctx.check()?;
        let mut state = self.lock();
        state.calls.push(format!("capture {target}"));
        if state.capture_failures > 0 {
            state.capture_failures -= 1;
            anyhow::bail!("capture-pane: server exited unexpectedly");
        }
        Ok(state.screen.join("\n"))
    }
}

#[derive(Default)]
struct RuntimeState {
    running: HashMap<String, bool>,
    starts: usize,
    start_is_noop: bool,
}

/// A [`ContainerRuntime`] over a fixed set of containers.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<RuntimeState>>,
}

impl FakeRuntime {
    fn with(name: &str, running: bool) -> Self {
        let rt = Self::default();
        rt.state
            .lock()
            .unwrap()
            .running
            .insert(name.to_string(), running);
        rt
    }

    pub fn running(name: &str) -> Self {
        Self::with(name, true)
    }

    pub fn stopped(name: &str) -> Self {
        Self::with(name, false)
    }

    /// `start` succeeds but the container stays stopped.
    pub fn start_has_no_effect(self) -> Self {
        self.state.lock().unwrap().start_is_noop = true;
        self
    }

    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }
}

impl ContainerRuntime for FakeRuntime {
    fn inspect(&self, _ctx: &Ctx, name: &str) -> anyhow::Result<ContainerState> {
        match self.state.lock().unwrap().running.get(name) {
            Some(&running) => Ok(ContainerState { running }),
            None => anyhow::bail!("no such container: {name}"),
        }
    }

    fn start(&self, _ctx: &Ctx, name: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.running.contains_key(name) {
            anyhow::bail!("no such container: {name}");
        }
        state.starts += 1;
        if !state.start_is_noop {
            state.running.insert(name.to_string(), true);
        }
        Ok(())
    }

    fn exec(&self, _ctx: &Ctx, name: &str, argv: &[&str]) -> anyhow::Result<RunOutput> {
        if !self.state.lock().unwrap().running.get(name).copied().unwrap_or(false) {
            anyhow::bail!("container {name} is not running");
        }
        Ok(RunOutput {
            stdout: argv.join(" "),
            stderr: String::new(),
            exit_code: 0,
        })
    }
}
