use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tbfit::engine::progress::{Progress, ProgressCallback};
use tokio::sync::{mpsc, watch};
use tracing::warn;

const EVENT_BUFFER: usize = 1024;
const SPINNER_TICK_MS: u64 = 80;

#[derive(Debug)]
pub enum UiEvent {
    Progress(Progress),
    Log(String),
}

/// Owns the terminal while a command runs: one bar per workflow phase, log
/// lines printed above it.
pub struct UiManager {
    mp: Arc<MultiProgress>,
    state: BarState,
    event_receiver: mpsc::Receiver<UiEvent>,
    shutdown_receiver: watch::Receiver<bool>,
    _sentinel_bar: ProgressBar,
}

#[derive(Default)]
struct BarState {
    active_bar: Option<ProgressBar>,
    base_message: String,
    phase_started: Option<Instant>,
}

impl UiManager {
    pub fn new() -> (Self, mpsc::Sender<UiEvent>, watch::Sender<bool>) {
        let (event_sender, event_receiver) = mpsc::channel(EVENT_BUFFER);
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let mp = Arc::new(MultiProgress::new());
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(12));
        let _sentinel_bar = mp.add(ProgressBar::hidden());
        let manager = Self {
            mp,
            state: BarState::default(),
            event_receiver,
            shutdown_receiver,
            _sentinel_bar,
        };

        (manager, event_sender, shutdown_sender)
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(event) = self.event_receiver.recv() => {
                    self.handle_event(event);
                }
                result = self.shutdown_receiver.changed() => {
                    if result.is_err() || *self.shutdown_receiver.borrow() {
                        break;
                    }
                }
            }
        }
        // Flush what the command emitted right before shutdown.
        while let Ok(event) = self.event_receiver.try_recv() {
            self.handle_event(event);
        }
        if let Some(bar) = self.state.active_bar.take() {
            bar.finish_and_clear();
        }
        self._sentinel_bar.finish_and_clear();
    }

    fn handle_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::Log(msg) => {
                self.mp.println(msg).ok();
            }
            UiEvent::Progress(progress) => self.handle_progress(progress),
        }
    }

    fn handle_progress(&mut self, progress: Progress) {
        match progress {
            Progress::PhaseStart { name } => {
                if let Some(bar) = self.state.active_bar.take() {
                    bar.finish_and_clear();
                }

                let pb = self.mp.add(ProgressBar::new_spinner());
                pb.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
                pb.set_style(Self::spinner_style());
                pb.set_message(name.clone());

                self.state.active_bar = Some(pb);
                self.state.base_message = name;
                self.state.phase_started = Some(Instant::now());
            }
            Progress::PhaseFinish => {
                if let Some(bar) = self.state.active_bar.take() {
                    bar.finish_and_clear();
                }

                let elapsed = self
                    .state
                    .phase_started
                    .take()
                    .map(|t| format!(" ({:.1}s)", t.elapsed().as_secs_f64()))
                    .unwrap_or_default();
                self.mp
                    .println(format!("✓ {}{}", self.state.base_message, elapsed))
                    .ok();

                self.state.base_message.clear();
            }
            Progress::TaskStart { total } => {
                if let Some(bar) = self.state.active_bar.as_ref() {
                    bar.disable_steady_tick();
                    bar.reset();
                    bar.set_style(Self::bar_style());
                    bar.set_length(total);
                    bar.set_position(0);
                }
            }
            Progress::TaskIncrement { amount } => {
                if let Some(bar) = self.state.active_bar.as_ref() {
                    bar.inc(amount);
                }
            }
            Progress::TaskFinish => {
                if let Some(bar) = self.state.active_bar.as_ref() {
                    if let Some(len) = bar.length() {
                        bar.set_position(len);
                    }
                    bar.finish();
                }
            }
            Progress::StatusUpdate { text } => {
                if let Some(bar) = self.state.active_bar.as_ref() {
                    bar.set_message(format!("{} ({})", self.state.base_message, text));
                }
            }
            Progress::Message(msg) => {
                self.mp.println(format!("  {}", msg)).ok();
            }
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .expect("static spinner template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template("{msg:<40} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .expect("static bar template")
            .with_key(
                "eta",
                |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                    let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
                },
            )
            .progress_chars("━╸ ")
    }
}

/// Bridges engine progress callbacks, which may fire from rayon workers, onto
/// the UI channel.
#[derive(Clone)]
pub struct CliProgressHandler {
    sender: mpsc::Sender<UiEvent>,
}

impl CliProgressHandler {
    pub fn new(sender: mpsc::Sender<UiEvent>) -> Self {
        Self { sender }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let sender = self.sender.clone();
        Box::new(move |progress: Progress| {
            if let Err(e) = sender.try_send(UiEvent::Progress(progress)) {
                warn!("Failed to send progress update to UI channel: {}", e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_manager() -> (UiManager, mpsc::Sender<UiEvent>) {
        let (manager, sender, _) = UiManager::new();
        manager.mp.set_draw_target(ProgressDrawTarget::hidden());
        (manager, sender)
    }

    fn start_phase(manager: &mut UiManager, name: &str) {
        manager.handle_event(UiEvent::Progress(Progress::PhaseStart {
            name: name.into(),
        }));
    }

    #[test]
    fn handle_phase_start_creates_new_spinner() {
        let (mut manager, _) = setup_manager();
        assert!(manager.state.active_bar.is_none());

        start_phase(&mut manager, "Optimization");

        let bar = manager.state.active_bar.as_ref().unwrap();
        assert_eq!(bar.message(), "Optimization");
        assert_eq!(manager.state.base_message, "Optimization");
        assert!(manager.state.phase_started.is_some());
    }

    #[test]
    fn handle_phase_start_replaces_existing_bar() {
        let (mut manager, _) = setup_manager();
        start_phase(&mut manager, "Preparation");
        start_phase(&mut manager, "Optimization");

        let second_bar = manager.state.active_bar.as_ref().unwrap();
        assert_eq!(second_bar.message(), "Optimization");
        assert_eq!(manager.state.base_message, "Optimization");
    }

    #[test]
    fn handle_phase_finish_clears_active_bar() {
        let (mut manager, _) = setup_manager();
        start_phase(&mut manager, "Preparation");

        manager.handle_event(UiEvent::Progress(Progress::PhaseFinish));

        assert!(manager.state.active_bar.is_none());
        assert!(manager.state.base_message.is_empty());
        assert!(manager.state.phase_started.is_none());
    }

    #[test]
    fn generation_batch_drives_the_bar() {
        let (mut manager, _) = setup_manager();
        start_phase(&mut manager, "Optimization");

        manager.handle_event(UiEvent::Progress(Progress::TaskStart { total: 32 }));
        {
            let bar = manager.state.active_bar.as_ref().unwrap();
            assert_eq!(bar.length(), Some(32));
            assert_eq!(bar.position(), 0);
        }

        for _ in 0..5 {
            manager.handle_event(UiEvent::Progress(Progress::TaskIncrement { amount: 1 }));
        }
        assert_eq!(manager.state.active_bar.as_ref().unwrap().position(), 5);

        manager.handle_event(UiEvent::Progress(Progress::TaskFinish));
        let bar = manager.state.active_bar.as_ref().unwrap();
        assert!(bar.is_finished());
        assert_eq!(bar.position(), 32);
    }

    #[test]
    fn handle_status_update_changes_bar_message() {
        let (mut manager, _) = setup_manager();
        start_phase(&mut manager, "Optimization");

        manager.handle_event(UiEvent::Progress(Progress::StatusUpdate {
            text: "generation 3/200".into(),
        }));

        let bar = manager.state.active_bar.as_ref().unwrap();
        assert_eq!(bar.message(), "Optimization (generation 3/200)");
    }

    #[test]
    fn events_without_active_bar_are_ignored() {
        let (mut manager, _) = setup_manager();
        manager.handle_event(UiEvent::Progress(Progress::TaskStart { total: 4 }));
        manager.handle_event(UiEvent::Progress(Progress::TaskIncrement { amount: 1 }));
        manager.handle_event(UiEvent::Progress(Progress::TaskFinish));
        manager.handle_event(UiEvent::Log("log line".to_string()));
        manager.handle_event(UiEvent::Progress(Progress::Message("note".to_string())));
        assert!(manager.state.active_bar.is_none());
    }

    #[tokio::test]
    async fn cli_progress_handler_sends_progress_event() {
        let (sender, mut receiver) = mpsc::channel(1);
        let handler = CliProgressHandler::new(sender);
        let callback = handler.get_callback();

        callback(Progress::PhaseStart {
            name: "Testing".into(),
        });

        match receiver.recv().await.unwrap() {
            UiEvent::Progress(Progress::PhaseStart { name }) => assert_eq!(name, "Testing"),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let (manager, sender, shutdown) = UiManager::new();
        manager.mp.set_draw_target(ProgressDrawTarget::hidden());
        let handle = tokio::spawn(manager.run());

        sender
            .send(UiEvent::Progress(Progress::PhaseStart {
                name: "Evaluation".into(),
            }))
            .await
            .unwrap();
        shutdown.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("UI task did not stop")
            .unwrap();
    }
}
