//! The daemon: a single event loop that owns every user callback, hosts
//! long-running services and periodic tasks, and relays between the input
//! hook thread and the window manager.
//!
//! All state mutation happens on this loop. Other threads only ever send
//! messages: the hook thread posts action ids and timer deadlines, service
//! reapers post exit notices, scheduled closures post themselves back.

use crate::jmk::{monotonic_ms, ActionId, Pipeline};
use crate::vk::Vk;
use crate::window_manager::Command;
use crate::Result;
use anyhow::{bail, Context};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Grace period between asking a service to stop and reporting it stuck.
const STOP_GRACE: Duration = Duration::from_secs(2);
/// Autorestart backoff bounds; doubles between attempts.
const BACKOFF_MIN_MS: u64 = 1_000;
const BACKOFF_MAX_MS: u64 = 60_000;

/// Everything that can wake the daemon loop.
pub enum DaemonMsg {
    /// Run a registered user callback (hotkey, tap-hold function).
    Action(ActionId),
    /// The input pipeline has a pending timer at this engine time.
    WakeAt(u64),
    /// Internal: a previously armed wake-up fired.
    TimerFire(u64),
    /// Run a closure on the daemon thread.
    Run(Box<dyn FnOnce() + Send>),
    ServiceExited { name: String, killed: bool },
    RestartService(String),
    Quit,
}

/// Handle for posting work onto the daemon loop from anywhere.
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<DaemonMsg>,
}

impl Scheduler {
    pub fn post(&self, f: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(DaemonMsg::Run(Box::new(f)));
    }

    pub fn schedule(&self, delay_ms: u64, f: impl FnOnce() + Send + 'static) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let _ = tx.send(DaemonMsg::Run(Box::new(f)));
        });
    }

    pub fn interval(&self, period_ms: u64, f: impl FnMut() + Send + 'static) {
        let tx = self.tx.clone();
        let f = Arc::new(Mutex::new(f));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(period_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick is not wanted
            loop {
                ticker.tick().await;
                let f = f.clone();
                let sent = tx.send(DaemonMsg::Run(Box::new(move || {
                    if let Ok(mut f) = f.lock() {
                        (*f)();
                    }
                })));
                if sent.is_err() {
                    return;
                }
            }
        });
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<DaemonMsg> {
        self.tx.clone()
    }
}

/// A long-lived background job the user can toggle from the tray.
pub trait Service: Send {
    fn name(&self) -> &str;
    fn start(&mut self) -> Result<()>;
    /// Must return promptly; the daemon escalates after [`STOP_GRACE`].
    fn stop(&mut self) -> Result<()>;
    fn is_running(&self) -> bool;
    /// Restart automatically if the service dies on its own.
    fn autorestart(&self) -> bool {
        false
    }
}

/// A service that supervises a child process. Output goes to a log file,
/// exit is reaped asynchronously and reported to the daemon loop.
pub struct ProcessService {
    pub name: String,
    pub args: Vec<String>,
    pub log_path: Option<PathBuf>,
    pub autorestart: bool,
    running: Arc<AtomicBool>,
    kill_tx: Option<oneshot::Sender<()>>,
    events: mpsc::UnboundedSender<DaemonMsg>,
}

impl ProcessService {
    pub fn new(
        name: impl Into<String>,
        args: Vec<String>,
        events: mpsc::UnboundedSender<DaemonMsg>,
    ) -> Self {
        Self {
            name: name.into(),
            args,
            log_path: None,
            autorestart: false,
            running: Arc::new(AtomicBool::new(false)),
            kill_tx: None,
            events,
        }
    }

    fn open_log(&self) -> Result<Stdio> {
        match &self.log_path {
            Some(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("opening log file {}", path.display()))?;
                Ok(Stdio::from(file))
            }
            None => Ok(Stdio::null()),
        }
    }
}

impl Service for ProcessService {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<()> {
        if self.is_running() {
            bail!("service {} is already running", self.name);
        }
        let Some((program, rest)) = self.args.split_first() else {
            bail!("service {} has no command line", self.name);
        };
        let mut child = tokio::process::Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(self.open_log()?)
            .stderr(self.open_log()?)
            .spawn()
            .with_context(|| format!("spawning service {}", self.name))?;
        info!("service {} started (pid {:?})", self.name, child.id());
        self.running.store(true, Ordering::SeqCst);
        let (kill_tx, kill_rx) = oneshot::channel();
        self.kill_tx = Some(kill_tx);
        let running = self.running.clone();
        let events = self.events.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            let killed = tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(s) => info!("service {name} exited with {s}"),
                        Err(e) => warn!("service {name} wait failed: {e}"),
                    }
                    false
                }
                _ = kill_rx => {
                    let _ = child.start_kill();
                    if tokio::time::timeout(STOP_GRACE, child.wait()).await.is_err() {
                        warn!("service {name} did not die within {STOP_GRACE:?}");
                    }
                    true
                }
            };
            running.store(false, Ordering::SeqCst);
            let _ = events.send(DaemonMsg::ServiceExited { name, killed });
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(kill_tx) = self.kill_tx.take() {
            info!("stopping service {}", self.name);
            let _ = kill_tx.send(());
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn autorestart(&self) -> bool {
        self.autorestart
    }
}

/// A short-lived job, launched on demand or by a schedule, optionally
/// gated by a condition.
pub struct Task {
    pub name: String,
    condition: Option<Box<dyn Fn() -> bool + Send>>,
    action: Box<dyn FnMut() + Send>,
}

impl Task {
    pub fn new(name: impl Into<String>, action: impl FnMut() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            condition: None,
            action: Box::new(action),
        }
    }

    pub fn when(mut self, condition: impl Fn() -> bool + Send + 'static) -> Self {
        self.condition = Some(Box::new(condition));
        self
    }

    pub fn launch(&mut self) {
        if self.condition.as_ref().map(|c| c()).unwrap_or(true) {
            debug!("task {} launched", self.name);
            (self.action)();
        } else {
            debug!("task {} condition not met", self.name);
        }
    }

    pub fn launch_anyway(&mut self) {
        (self.action)();
    }
}

/// What a hotkey or tap-hold callback resolves to.
pub enum Action {
    Command(Command),
    Callback(Box<dyn FnMut() + Send>),
}

/// One entry of the tray menu this daemon exposes to whatever shell
/// integration hosts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub label: String,
    pub enabled: bool,
    pub checked: bool,
    pub action: MenuAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    ToggleService(String),
    RunTask(String),
    Quit,
}

/// The supervisor that ties everything together. Owns the action registry,
/// the services and tasks, and the shared input pipeline (for servicing
/// its timers).
pub struct Daemon {
    scheduler: Scheduler,
    msg_rx: mpsc::UnboundedReceiver<DaemonMsg>,
    registry: HashMap<ActionId, Action>,
    services: Vec<Box<dyn Service>>,
    tasks: Vec<Task>,
    command_tx: mpsc::UnboundedSender<Command>,
    pipeline: Arc<Mutex<Pipeline>>,
    inject: Box<dyn Fn(&[(Vk, bool)]) + Send>,
    backoff_ms: HashMap<String, u64>,
    armed_wake: Option<u64>,
}

impl Daemon {
    pub fn new(
        pipeline: Arc<Mutex<Pipeline>>,
        command_tx: mpsc::UnboundedSender<Command>,
        inject: impl Fn(&[(Vk, bool)]) + Send + 'static,
    ) -> Self {
        let (tx, msg_rx) = mpsc::unbounded_channel();
        Self {
            scheduler: Scheduler { tx },
            msg_rx,
            registry: HashMap::new(),
            services: Vec::new(),
            tasks: Vec::new(),
            command_tx,
            pipeline,
            inject: Box::new(inject),
            backoff_ms: HashMap::new(),
            armed_wake: None,
        }
    }

    pub fn scheduler(&self) -> Scheduler {
        self.scheduler.clone()
    }

    pub fn register_action(&mut self, id: impl Into<ActionId>, action: Action) -> Result<()> {
        let id = id.into();
        if self.registry.contains_key(&id) {
            bail!("action {id:?} is already registered");
        }
        self.registry.insert(id, action);
        Ok(())
    }

    pub fn register_service(&mut self, service: Box<dyn Service>) {
        info!("registered service {}", service.name());
        self.services.push(service);
    }

    pub fn register_task(&mut self, task: Task) {
        info!("registered task {}", task.name);
        self.tasks.push(task);
    }

    /// Tray menu contract: tasks, then services with their running state,
    /// then quit.
    pub fn menu_entries(&self) -> Vec<MenuEntry> {
        let mut entries: Vec<MenuEntry> = self
            .tasks
            .iter()
            .map(|t| MenuEntry {
                label: t.name.clone(),
                enabled: true,
                checked: false,
                action: MenuAction::RunTask(t.name.clone()),
            })
            .collect();
        entries.extend(self.services.iter().map(|s| MenuEntry {
            label: format!(
                "[{}] {}",
                if s.is_running() { "running" } else { "stopped" },
                s.name()
            ),
            enabled: true,
            checked: s.is_running(),
            action: MenuAction::ToggleService(s.name().to_string()),
        }));
        entries.push(MenuEntry {
            label: "Quit".into(),
            enabled: true,
            checked: false,
            action: MenuAction::Quit,
        });
        entries
    }

    pub fn trigger(&mut self, action: MenuAction) {
        match action {
            MenuAction::ToggleService(name) => {
                if let Some(s) = self.services.iter_mut().find(|s| s.name() == name) {
                    let result = if s.is_running() { s.stop() } else { s.start() };
                    if let Err(e) = result {
                        error!("toggling service {name}: {e:#}");
                    }
                }
            }
            MenuAction::RunTask(name) => {
                if let Some(t) = self.tasks.iter_mut().find(|t| t.name == name) {
                    t.launch_anyway();
                }
            }
            MenuAction::Quit => {
                let _ = self.scheduler.tx.send(DaemonMsg::Quit);
            }
        }
    }

    /// Start every service and pump messages until quit.
    pub async fn run(&mut self) -> Result<()> {
        for service in &mut self.services {
            if let Err(e) = service.start() {
                error!("starting service {}: {e:#}", service.name());
            }
        }
        for task in &mut self.tasks {
            task.launch();
        }
        info!("daemon loop running");
        loop {
            let msg = tokio::select! {
                Some(msg) = self.msg_rx.recv() => msg,
                _ = tokio::signal::ctrl_c() => DaemonMsg::Quit,
            };
            match msg {
                DaemonMsg::Action(id) => self.run_action(&id),
                DaemonMsg::Run(f) => f(),
                DaemonMsg::WakeAt(deadline) => self.arm_wake(deadline),
                DaemonMsg::TimerFire(deadline) => self.service_timers(deadline),
                DaemonMsg::ServiceExited { name, killed } => {
                    self.on_service_exited(&name, killed)
                }
                DaemonMsg::RestartService(name) => {
                    if let Some(s) = self.services.iter_mut().find(|s| s.name() == name) {
                        if !s.is_running() {
                            if let Err(e) = s.start() {
                                error!("restarting service {name}: {e:#}");
                            }
                        }
                    }
                }
                DaemonMsg::Quit => break,
            }
        }
        info!("daemon shutting down");
        let _ = self.command_tx.send(Command::Quit);
        for service in &mut self.services {
            if service.is_running() {
                if let Err(e) = service.stop() {
                    error!("stopping service {}: {e:#}", service.name());
                }
            }
        }
        Ok(())
    }

    fn run_action(&mut self, id: &str) {
        match self.registry.get_mut(id) {
            Some(Action::Command(command)) => {
                let _ = self.command_tx.send(*command);
            }
            Some(Action::Callback(f)) => f(),
            None => warn!("action {id:?} is not registered"),
        }
    }

    /// Arm a wake-up for the earliest pipeline deadline. Later deadlines
    /// ride on the already armed one; the fire handler re-arms as needed.
    fn arm_wake(&mut self, deadline: u64) {
        if self.armed_wake.map(|t| t <= deadline).unwrap_or(false) {
            return;
        }
        self.armed_wake = Some(deadline);
        let tx = self.scheduler.tx.clone();
        let delay = deadline.saturating_sub(monotonic_ms());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let _ = tx.send(DaemonMsg::TimerFire(deadline));
        });
    }

    fn service_timers(&mut self, deadline: u64) {
        if self.armed_wake == Some(deadline) {
            self.armed_wake = None;
        }
        let (out, next) = {
            let mut pipeline = match self.pipeline.lock() {
                Ok(p) => p,
                Err(poisoned) => poisoned.into_inner(),
            };
            let out = pipeline.on_timer(monotonic_ms());
            (out, pipeline.next_deadline())
        };
        if !out.inject.is_empty() {
            (self.inject)(&out.inject);
        }
        for id in out.actions {
            self.run_action(&id);
        }
        if let Some(next) = next {
            self.arm_wake(next);
        }
    }

    fn on_service_exited(&mut self, name: &str, killed: bool) {
        let autorestart = self
            .services
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.autorestart())
            .unwrap_or(false);
        if killed || !autorestart {
            self.backoff_ms.remove(name);
            return;
        }
        let backoff = self
            .backoff_ms
            .entry(name.to_string())
            .or_insert(BACKOFF_MIN_MS);
        let delay = *backoff;
        *backoff = (*backoff * 2).min(BACKOFF_MAX_MS);
        warn!("service {name} died, restarting in {delay}ms");
        let tx = self.scheduler.tx.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let _ = tx.send(DaemonMsg::RestartService(name));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkeys::HotkeyEngine;
    use crate::jmk::LayerEngine;

    fn test_daemon() -> (Daemon, mpsc::UnboundedReceiver<Command>) {
        let pipeline = Arc::new(Mutex::new(Pipeline::new(
            LayerEngine::new(),
            HotkeyEngine::new(),
        )));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        (Daemon::new(pipeline, command_tx, |_| {}), command_rx)
    }

    #[test]
    fn actions_resolve_to_commands() {
        let (mut daemon, mut command_rx) = test_daemon();
        daemon
            .register_action("next_window", Action::Command(Command::NextWindow))
            .unwrap();
        daemon.run_action("next_window");
        assert_eq!(command_rx.try_recv().unwrap(), Command::NextWindow);
        // unknown ids are logged, not fatal
        daemon.run_action("no_such_action");
        assert!(command_rx.try_recv().is_err());
    }

    #[test]
    fn duplicate_action_id_is_rejected() {
        let (mut daemon, _rx) = test_daemon();
        daemon
            .register_action("x", Action::Command(Command::Quit))
            .unwrap();
        assert!(daemon
            .register_action("x", Action::Command(Command::Quit))
            .is_err());
    }

    #[test]
    fn callbacks_run_on_dispatch() {
        let (mut daemon, _rx) = test_daemon();
        let hits = Arc::new(AtomicBool::new(false));
        let flag = hits.clone();
        daemon
            .register_action(
                "mark",
                Action::Callback(Box::new(move || flag.store(true, Ordering::SeqCst))),
            )
            .unwrap();
        daemon.run_action("mark");
        assert!(hits.load(Ordering::SeqCst));
    }

    #[test]
    fn task_condition_gates_launch() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let mut task = Task::new("workday", move || flag.store(true, Ordering::SeqCst))
            .when(|| false);
        task.launch();
        assert!(!ran.load(Ordering::SeqCst));
        task.launch_anyway();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn menu_lists_tasks_services_and_quit() {
        let (mut daemon, _rx) = test_daemon();
        daemon.register_task(Task::new("daily_routine", || {}));
        let entries = daemon.menu_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, MenuAction::RunTask("daily_routine".into()));
        assert_eq!(entries[1].action, MenuAction::Quit);
    }

    struct FakeService {
        name: String,
        running: bool,
        autorestart: bool,
    }

    impl Service for FakeService {
        fn name(&self) -> &str {
            &self.name
        }
        fn start(&mut self) -> Result<()> {
            self.running = true;
            Ok(())
        }
        fn stop(&mut self) -> Result<()> {
            self.running = false;
            Ok(())
        }
        fn is_running(&self) -> bool {
            self.running
        }
        fn autorestart(&self) -> bool {
            self.autorestart
        }
    }

    #[tokio::test]
    async fn crash_backoff_doubles_up_to_the_cap() {
        let (mut daemon, _rx) = test_daemon();
        daemon.register_service(Box::new(FakeService {
            name: "syncthing".into(),
            running: false,
            autorestart: true,
        }));
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(
                daemon
                    .backoff_ms
                    .get("syncthing")
                    .copied()
                    .unwrap_or(BACKOFF_MIN_MS),
            );
            daemon.on_service_exited("syncthing", false);
        }
        assert_eq!(seen[0], 1_000);
        assert_eq!(seen[1], 2_000);
        assert_eq!(*seen.last().unwrap(), 60_000);
    }

    #[tokio::test]
    async fn killed_service_is_not_restarted() {
        let (mut daemon, _rx) = test_daemon();
        daemon.register_service(Box::new(FakeService {
            name: "svc".into(),
            running: false,
            autorestart: true,
        }));
        daemon.on_service_exited("svc", false);
        assert!(daemon.backoff_ms.contains_key("svc"));
        // a deliberate stop clears the restart state
        daemon.on_service_exited("svc", true);
        assert!(!daemon.backoff_ms.contains_key("svc"));
    }

    #[tokio::test]
    async fn scheduler_runs_posted_closures_in_order() {
        let (daemon, _rx) = test_daemon();
        let scheduler = daemon.scheduler();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            scheduler.post(move || order.lock().unwrap().push(i));
        }
        let mut daemon = daemon;
        // drain the queued messages without entering the select loop
        while let Ok(msg) = daemon.msg_rx.try_recv() {
            if let DaemonMsg::Run(f) = msg {
                f();
            }
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn schedule_delays_delivery() {
        let (mut daemon, _rx) = test_daemon();
        let scheduler = daemon.scheduler();
        scheduler.schedule(10, || {});
        assert!(daemon.msg_rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(
            daemon.msg_rx.try_recv(),
            Ok(DaemonMsg::Run(_))
        ));
    }
}
