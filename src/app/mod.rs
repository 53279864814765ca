use std::io::Stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::ListState;
use ratatui::Terminal;

use crate::config::themes::Palette;
use crate::config::AppConfig;
use crate::coordinator::{Coordinator, CoordinatorEvent, Mutation, MutationCycle};
use crate::export;
use crate::storage::StorageHandle;
use crate::timeline::LocalZone;
use crate::ui;

pub mod state;

pub use state::{AppState, ComposerMode, OverlayState};

const PAGE_STEP: isize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Quit,
    Submit,
    Cancel,
    SelectNext,
    SelectPrevious,
    PageDown,
    PageUp,
    FollowLatest,
    EditSelected,
    DeleteSelected,
    UndoDelete,
    Export,
}

pub struct App {
    config: Arc<AppConfig>,
    palette: Palette,
    zone: LocalZone,
    coordinator: Coordinator,
    state: AppState,
    list_state: ListState,
    should_quit: bool,
    tick_rate: Duration,
}

impl App {
    pub fn new(config: Arc<AppConfig>, storage: StorageHandle, zone: LocalZone) -> Result<Self> {
        let cycle = Arc::new(MutationCycle::new(
            storage,
            config.sender_id.clone(),
            zone.clone(),
        ));
        let coordinator = Coordinator::spawn(cycle).context("starting mutation coordinator")?;
        coordinator.submit(Mutation::Reload);
        Ok(Self {
            palette: Palette::for_theme(config.theme),
            config,
            zone,
            coordinator,
            state: AppState::default(),
            list_state: ListState::default(),
            should_quit: false,
            tick_rate: Duration::from_millis(100),
        })
    }

    pub fn run(&mut self) -> Result<()> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        self.coordinator.shutdown();
        restore_terminal(&mut terminal)?;
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        loop {
            terminal
                .draw(|frame| {
                    ui::draw_app(
                        frame,
                        &self.state,
                        &mut self.list_state,
                        &self.palette,
                        &self.zone,
                    );
                })
                .context("rendering frame")?;

            if self.should_quit {
                break;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(0));

            if event::poll(timeout).context("polling for terminal events")? {
                // Resizes need no handling; the next draw adapts.
                if let Event::Key(key) = event::read().context("reading terminal event")? {
                    self.handle_key(key);
                }
            }

            if last_tick.elapsed() >= self.tick_rate {
                self.on_tick();
                last_tick = Instant::now();
            }
        }
        Ok(())
    }

    fn on_tick(&mut self) {
        let events: Vec<CoordinatorEvent> = self.coordinator.events().try_iter().collect();
        for event in events {
            self.handle_coordinator_event(event);
        }
    }

    fn handle_coordinator_event(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Published(timeline) => {
                self.state.apply_timeline(timeline);
            }
            CoordinatorEvent::Skipped => {}
            CoordinatorEvent::UndoUnavailable => {
                self.state
                    .set_status_message(Some("Cannot undo: that message id is in use again"));
            }
            CoordinatorEvent::Failed { action, .. } => {
                self.state
                    .set_status_message(Some(format!("Could not complete {action}")));
            }
            CoordinatorEvent::Exported(report) => {
                self.state.set_status_message(Some(format!(
                    "Exported {} message(s) to {}",
                    report.rows,
                    report.path.display()
                )));
            }
            CoordinatorEvent::ExportFailed(message) => {
                self.state.set_status_message(Some(format!(
                    "Failed to export data. Error: {message}"
                )));
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }

        if self.handle_overlay_key(key) {
            return;
        }

        let control = key.modifiers.contains(KeyModifiers::CONTROL);
        let action = match key.code {
            KeyCode::Char('c') | KeyCode::Char('q') if control => Some(Action::Quit),
            KeyCode::Char('e') if control => Some(Action::EditSelected),
            KeyCode::Char('d') if control => Some(Action::DeleteSelected),
            KeyCode::Char('u') if control => Some(Action::UndoDelete),
            KeyCode::Char('x') if control => Some(Action::Export),
            KeyCode::Enter => Some(Action::Submit),
            KeyCode::Esc => Some(Action::Cancel),
            KeyCode::Down => Some(Action::SelectNext),
            KeyCode::Up => Some(Action::SelectPrevious),
            KeyCode::PageDown => Some(Action::PageDown),
            KeyCode::PageUp => Some(Action::PageUp),
            KeyCode::End => Some(Action::FollowLatest),
            _ => None,
        };

        if let Some(action) = action {
            self.handle_action(action);
            return;
        }

        self.handle_composer_key(key);
    }

    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => self.should_quit = true,
            Action::Submit => {
                if let Some(mutation) = self.state.submit_composer() {
                    self.state.clear_status_message();
                    self.coordinator.submit(mutation);
                }
            }
            Action::Cancel => {
                if self.state.is_editing() {
                    self.state.cancel_edit();
                    self.state.set_status_message(Some("Edit cancelled"));
                } else {
                    self.state.clear_status_message();
                }
            }
            Action::SelectNext => self.state.move_selection(1),
            Action::SelectPrevious => self.state.move_selection(-1),
            Action::PageDown => self.state.move_selection(PAGE_STEP),
            Action::PageUp => self.state.move_selection(-PAGE_STEP),
            Action::FollowLatest => {
                self.state.follow_latest();
                self.state.composer.move_end();
            }
            Action::EditSelected => {
                if self.state.begin_edit() {
                    self.state
                        .set_status_message(Some("Editing message: Enter to save, Esc to cancel"));
                } else {
                    self.state.set_status_message(Some("Nothing to edit"));
                }
            }
            Action::DeleteSelected => {
                if !self.state.open_delete_confirm() {
                    self.state.set_status_message(Some("Nothing to delete"));
                }
            }
            Action::UndoDelete => match self.state.undo_delete() {
                Some(mutation) => {
                    self.state.set_status_message(Some("Restoring deleted message"));
                    self.coordinator.submit(mutation);
                }
                None => self.state.set_status_message(Some("Nothing to undo")),
            },
            Action::Export => self.handle_export(),
        }
    }

    fn handle_overlay_key(&mut self, key: KeyEvent) -> bool {
        match self.state.overlay() {
            Some(OverlayState::ConfirmDelete(_)) => {
                match key.code {
                    KeyCode::Enter | KeyCode::Char('y') | KeyCode::Char('Y') => {
                        if let Some(mutation) = self.state.confirm_delete() {
                            self.coordinator.submit(mutation);
                            self.state
                                .set_status_message(Some("Message deleted (Ctrl-U to undo)"));
                        }
                    }
                    KeyCode::Esc | KeyCode::Char('n') | KeyCode::Char('N') => {
                        self.state.close_overlay();
                        self.state.set_status_message(Some("Delete cancelled"));
                    }
                    _ => {}
                }
                true
            }
            None => false,
        }
    }

    fn handle_composer_key(&mut self, key: KeyEvent) {
        let composer = &mut self.state.composer;
        match key.code {
            KeyCode::Backspace => {
                composer.backspace();
            }
            KeyCode::Delete => {
                composer.delete();
            }
            KeyCode::Left => {
                composer.move_left();
            }
            KeyCode::Right => {
                composer.move_right();
            }
            KeyCode::Home => composer.move_home(),
            KeyCode::Char(ch)
                if !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER) =>
            {
                composer.insert_char(ch);
            }
            _ => {}
        }
    }

    fn handle_export(&mut self) {
        let today = self.zone.today();
        let destination = export::resolve_destination(None, &self.config.export, today);
        tracing::info!(path = %destination.display(), "export requested");
        self.state
            .set_status_message(Some(format!("Exporting to {}", destination.display())));
        self.coordinator.request_export(destination);
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen).context("switching to alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend).context("creating terminal backend")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor().ok();
    disable_raw_mode().context("disabling raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen).context("restoring screen state")?;
    Ok(())
}
