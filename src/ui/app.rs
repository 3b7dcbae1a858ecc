// Main TUI application using ratatui
// Browses the catalog and drives the player through its handle

use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph},
    Frame, Terminal,
};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use chrono::{Local, NaiveDate};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::catalog::listing::{is_recent, slugify};
use crate::catalog::{AreaCard, Episode, ThemeCard};
use crate::player::{next_rate, Phase, PlaybackState, PlayerHandle};
use crate::store::PodcastService;

const VOLUME_STEP: f64 = 0.05;

enum AppMode {
    Normal,
    Searching,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Focus {
    Browser,
    Queue,
}

// One row of the left panel
#[derive(Debug, Clone)]
enum Entry {
    Episode(Episode),
    Area(AreaCard),
    Theme(ThemeCard),
}

// Results of background catalog requests
enum Message {
    Listing { title: String, entries: Vec<Entry> },
    Status(String),
    Favorite { id: i64, favorite: bool },
}

pub struct JuriCastApp {
    player: PlayerHandle,
    catalog: Arc<PodcastService>,
    entries: Vec<Entry>,
    listing_title: String,
    selected_entry: usize,
    selected_queue_item: usize,
    focus: Focus,
    search_query: String,
    mode: AppMode,
    should_quit: bool,
    is_loading: bool,
    message_rx: mpsc::UnboundedReceiver<Message>,
    message_tx: mpsc::UnboundedSender<Message>,
    status_message: String,
    today: NaiveDate,
}

impl JuriCastApp {
    pub fn new(player: PlayerHandle, catalog: Arc<PodcastService>) -> Self {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        JuriCastApp {
            player,
            catalog,
            entries: Vec::new(),
            listing_title: "Episodes".to_string(),
            selected_entry: 0,
            selected_queue_item: 0,
            focus: Focus::Browser,
            search_query: String::new(),
            mode: AppMode::Normal,
            should_quit: false,
            is_loading: false,
            message_rx,
            message_tx,
            status_message: String::new(),
            today: Local::now().date_naive(),
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        self.load_view('1');

        let result = self.event_loop(&mut terminal).await;

        // Restore the terminal even if the loop failed
        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        terminal.show_cursor()?;

        self.player.shutdown().await;
        result
    }

    async fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> anyhow::Result<()> {
        loop {
            let state = self.player.state();
            terminal.draw(|f| self.draw_ui(f, &state))?;

            while let Ok(message) = self.message_rx.try_recv() {
                self.apply_message(message);
            }

            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_input(key.code, &state);
                    }
                }
            }

            if self.should_quit {
                return Ok(());
            }
        }
    }

    fn apply_message(&mut self, message: Message) {
        match message {
            Message::Listing { title, entries } => {
                self.status_message = format!("{} ({} items)", title, entries.len());
                self.listing_title = title;
                self.entries = entries;
                self.selected_entry = 0;
                self.is_loading = false;
            }
            Message::Status(status) => {
                self.status_message = status;
                self.is_loading = false;
            }
            Message::Favorite { id, favorite } => {
                for entry in &mut self.entries {
                    if let Entry::Episode(episode) = entry {
                        if episode.id == id {
                            episode.favorite = favorite;
                        }
                    }
                }
                self.status_message = if favorite {
                    "Added to favorites".to_string()
                } else {
                    "Removed from favorites".to_string()
                };
            }
        }
    }

    // ==========================================
    // DRAWING
    // ==========================================

    fn draw_ui(&self, frame: &mut Frame, state: &PlaybackState) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(10),
                Constraint::Length(if state.mini_player_visible { 7 } else { 0 }),
            ])
            .split(frame.size());

        // Header
        let title = if self.is_loading {
            "Loading... please wait".to_string()
        } else if matches!(self.mode, AppMode::Searching) {
            format!("Search area: {}_", self.search_query)
        } else if !self.status_message.is_empty() {
            self.status_message.clone()
        } else {
            "[1-7]Views [/]Area [Enter]Open/Play [a]Queue [Tab]Focus [Space]Play/Pause [n/p]Next/Prev [←/→]Skip [↑/↓]Volume [m]Mute [r]Rate [f]Fav [c]Close [q]Quit".to_string()
        };
        let header = Paragraph::new(title)
            .block(Block::default().borders(Borders::ALL).title("JuriCast"));
        frame.render_widget(header, chunks[0]);

        // Main area - split between the browser and the queue
        let main_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[1]);

        let current = state.current_id();
        let entries: Vec<ListItem> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let content = match entry {
                    Entry::Episode(episode) => self.episode_line(episode, current),
                    Entry::Area(area) => format!("{} ({} episodes)", area.name, area.episode_count),
                    Entry::Theme(theme) => {
                        format!("{} ({} episodes)", theme.name, theme.episode_count)
                    }
                };
                let style = if i == self.selected_entry && self.focus == Focus::Browser {
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                ListItem::new(content).style(style)
            })
            .collect();
        let browser = List::new(entries).block(
            Block::default()
                .borders(Borders::ALL)
                .title(self.listing_title.as_str()),
        );
        frame.render_widget(browser, main_chunks[0]);

        let queue_items: Vec<ListItem> = state
            .queue
            .iter()
            .enumerate()
            .map(|(i, episode)| {
                let content = format!("{} · {}", episode.theme, episode.title);
                let style = if i == self.selected_queue_item && self.focus == Focus::Queue {
                    Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                ListItem::new(content).style(style)
            })
            .collect();
        let queue_list = List::new(queue_items).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Up next ({})", state.queue.len())),
        );
        frame.render_widget(queue_list, main_chunks[1]);

        if state.mini_player_visible {
            self.draw_player(frame, chunks[2], state);
        }
    }

    fn episode_line(&self, episode: &Episode, current: Option<i64>) -> String {
        let mut line = String::new();
        line.push_str(if current == Some(episode.id) { "▶ " } else { "  " });
        line.push_str(&format!("{}. {} [{}]", episode.sequence, episode.title, episode.theme));
        if episode.is_completed() {
            line.push_str(" ✓");
        } else if episode.progress > 0 {
            line.push_str(&format!(" {}%", episode.progress));
        }
        if episode.favorite {
            line.push_str(" ♥");
        }
        if is_recent(&episode.published, self.today) {
            line.push_str(" NEW");
        }
        line
    }

    fn draw_player(&self, frame: &mut Frame, area: Rect, state: &PlaybackState) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(4), Constraint::Length(3)])
            .split(area);

        let now_playing = match &state.current_episode {
            Some(episode) => format!("{} · {} · {}", episode.area, episode.theme, episode.title),
            None => "Nothing playing".to_string(),
        };
        let state_str = match state.phase() {
            Phase::Playing => "▶ Playing",
            Phase::Paused => "⏸ Paused",
            Phase::Idle => "⏹ Stopped",
        };
        let volume = if state.muted {
            "muted".to_string()
        } else {
            format!("{}%", (state.volume * 100.0).round() as u32)
        };
        let time_str = if state.duration > 0.0 {
            format!(
                "{} / {}",
                format_time(state.current_time),
                format_time(state.duration)
            )
        } else {
            format_time(state.current_time)
        };

        let player_info = format!(
            "{}\nState: {} | Volume: {} | Speed: {}x | Time: {}",
            now_playing, state_str, volume, state.playback_rate, time_str
        );
        let player_widget = Paragraph::new(player_info)
            .block(Block::default().borders(Borders::ALL).title("Player"));
        frame.render_widget(player_widget, rows[0]);

        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL))
            .gauge_style(Style::default().fg(Color::Cyan))
            .percent(u16::from(state.progress_percent()));
        frame.render_widget(gauge, rows[1]);
    }

    // ==========================================
    // INPUT
    // ==========================================

    fn handle_input(&mut self, key: KeyCode, state: &PlaybackState) {
        if !matches!(self.mode, AppMode::Searching) {
            self.status_message.clear();
        }

        match self.mode {
            AppMode::Searching => match key {
                KeyCode::Char(c) => self.search_query.push(c),
                KeyCode::Backspace => {
                    self.search_query.pop();
                }
                KeyCode::Enter => {
                    let area = self.search_query.trim().to_string();
                    self.mode = AppMode::Normal;
                    self.search_query.clear();
                    self.load_area(area);
                }
                KeyCode::Esc => {
                    self.mode = AppMode::Normal;
                    self.search_query.clear();
                }
                _ => {}
            },
            AppMode::Normal => match key {
                KeyCode::Char('q') => self.should_quit = true,
                KeyCode::Char('/') => self.mode = AppMode::Searching,
                KeyCode::Char(c @ '1'..='7') => self.load_view(c),
                KeyCode::Tab => {
                    self.focus = match self.focus {
                        Focus::Browser => Focus::Queue,
                        Focus::Queue => Focus::Browser,
                    }
                }
                KeyCode::Char(' ') => self.player.toggle_play(),
                KeyCode::Char('n') => self.player.play_next(),
                KeyCode::Char('p') => self.player.play_previous(),
                KeyCode::Char('s') => self.player.stop(),
                KeyCode::Char('c') => self.player.close_mini_player(),
                KeyCode::Char('v') => self.player.show_mini_player(),
                KeyCode::Right => self.player.skip_forward(),
                KeyCode::Left => self.player.skip_backward(),
                KeyCode::Up => self.player.set_volume(step_volume(state.volume, VOLUME_STEP)),
                KeyCode::Down => self.player.set_volume(step_volume(state.volume, -VOLUME_STEP)),
                KeyCode::Char('m') => self.player.toggle_mute(),
                KeyCode::Char('r') => {
                    let rate = next_rate(state.playback_rate);
                    self.player.set_playback_rate(rate);
                    self.status_message = format!("Speed {}x", rate);
                }
                KeyCode::Char('x') => self.player.clear_queue(),
                KeyCode::Char('j') | KeyCode::PageDown => self.move_selection(1, state),
                KeyCode::Char('k') | KeyCode::PageUp => self.move_selection(-1, state),
                KeyCode::Enter => self.activate_selected(),
                KeyCode::Char('a') => self.queue_selected(),
                KeyCode::Char('d') => self.remove_selected(state),
                KeyCode::Char('f') => self.toggle_favorite_selected(),
                _ => {}
            },
        }
    }

    fn move_selection(&mut self, delta: isize, state: &PlaybackState) {
        match self.focus {
            Focus::Browser => {
                self.selected_entry = step_index(self.selected_entry, self.entries.len(), delta)
            }
            Focus::Queue => {
                self.selected_queue_item =
                    step_index(self.selected_queue_item, state.queue.len(), delta)
            }
        }
    }

    fn selected(&self) -> Option<&Entry> {
        self.entries.get(self.selected_entry)
    }

    fn activate_selected(&mut self) {
        match self.selected().cloned() {
            Some(Entry::Episode(episode)) => {
                self.status_message = format!("Now playing: {}", episode.title);
                self.player.play(Arc::new(episode));
            }
            Some(Entry::Area(area)) => self.load_themes(area),
            Some(Entry::Theme(theme)) => self.load_theme_episodes(theme),
            None => {}
        }
    }

    fn queue_selected(&mut self) {
        if let Some(Entry::Episode(episode)) = self.selected().cloned() {
            self.status_message = format!("Added '{}' to the queue", episode.title);
            self.player.add_to_queue(Arc::new(episode));
        }
    }

    fn remove_selected(&mut self, state: &PlaybackState) {
        if self.focus != Focus::Queue {
            return;
        }
        if let Some(episode) = state.queue.get(self.selected_queue_item) {
            self.player.remove_from_queue(episode.id);
            self.selected_queue_item = self.selected_queue_item.saturating_sub(1);
        }
    }

    fn toggle_favorite_selected(&mut self) {
        let Some(Entry::Episode(episode)) = self.selected() else {
            return;
        };
        let id = episode.id;
        let catalog = Arc::clone(&self.catalog);
        let tx = self.message_tx.clone();
        tokio::spawn(async move {
            let favorite = catalog.toggle_favorite(id).await;
            let _ = tx.send(Message::Favorite { id, favorite });
        });
    }

    // ==========================================
    // BACKGROUND LOADS
    // ==========================================

    fn load_view(&mut self, view: char) {
        self.is_loading = true;
        let catalog = Arc::clone(&self.catalog);
        let tx = self.message_tx.clone();
        tokio::spawn(async move {
            let (title, entries) = match view {
                '2' => ("New", episodes(catalog.recent_episodes().await)),
                '3' => ("Featured", episodes(catalog.featured_episodes().await)),
                '4' => ("Continue listening", episodes(catalog.in_progress_episodes().await)),
                '5' => ("Favorites", episodes(catalog.favorite_episodes().await)),
                '6' => ("Completed", episodes(catalog.completed_episodes().await)),
                '7' => (
                    "Areas",
                    catalog.areas().await.into_iter().map(Entry::Area).collect(),
                ),
                _ => ("All episodes", episodes(catalog.all_episodes().await)),
            };
            let _ = tx.send(Message::Listing {
                title: title.to_string(),
                entries,
            });
        });
    }

    fn load_area(&mut self, area: String) {
        if area.is_empty() {
            self.load_view('1');
            return;
        }
        self.is_loading = true;
        let catalog = Arc::clone(&self.catalog);
        let tx = self.message_tx.clone();
        tokio::spawn(async move {
            let found = catalog.episodes_by_area(&area).await;
            let message = if found.is_empty() {
                Message::Status(format!("No episodes found for '{}'", area))
            } else {
                Message::Listing {
                    title: format!("Area: {}", area),
                    entries: episodes(found),
                }
            };
            let _ = tx.send(message);
        });
    }

    fn load_themes(&mut self, area: AreaCard) {
        self.is_loading = true;
        let catalog = Arc::clone(&self.catalog);
        let tx = self.message_tx.clone();
        tokio::spawn(async move {
            let themes = catalog.themes_by_area(&area.slug).await;
            let _ = tx.send(Message::Listing {
                title: format!("{} · themes", area.name),
                entries: themes.into_iter().map(Entry::Theme).collect(),
            });
        });
    }

    fn load_theme_episodes(&mut self, theme: ThemeCard) {
        self.is_loading = true;
        let catalog = Arc::clone(&self.catalog);
        let tx = self.message_tx.clone();
        tokio::spawn(async move {
            let found = catalog
                .episodes_by_theme(&theme.slug, &slugify(&theme.area))
                .await;
            let _ = tx.send(Message::Listing {
                title: format!("{} · {}", theme.area, theme.name),
                entries: episodes(found),
            });
        });
    }
}

fn episodes(list: Vec<Episode>) -> Vec<Entry> {
    list.into_iter().map(Entry::Episode).collect()
}

fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (hours, mins, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}", mins, secs)
    }
}

fn step_volume(volume: f64, delta: f64) -> f64 {
    ((volume + delta) * 100.0).round().clamp(0.0, 100.0) / 100.0
}

// Wraps around at both ends
fn step_index(index: usize, len: usize, delta: isize) -> usize {
    if len == 0 {
        return 0;
    }
    (index as isize + delta).rem_euclid(len as isize) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlayerSettings;
    use crate::player::controller::fake::FakeHandle;
    use crate::player::PlayerService;
    use crate::store::local::temp_dir;
    use crate::store::LocalStore;

    fn offline_app(name: &str) -> (JuriCastApp, std::path::PathBuf) {
        let dir = temp_dir(name);
        let catalog = Arc::new(PodcastService::new(
            None,
            LocalStore::in_dir(&dir),
            "tester".to_string(),
        ));
        let (_service, player) = PlayerService::new(
            FakeHandle::default(),
            Arc::clone(&catalog),
            PlayerSettings::default(),
        );
        (JuriCastApp::new(player, catalog), dir)
    }

    #[tokio::test]
    async fn empty_area_search_clears_loading() {
        let (mut app, dir) = offline_app("ui-empty-area");
        app.load_area("Nada".to_string());
        assert!(app.is_loading);

        let message = app.message_rx.recv().await.expect("search answered");
        app.apply_message(message);
        assert!(!app.is_loading);
        assert_eq!(app.status_message, "No episodes found for 'Nada'");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn time_formatting() {
        assert_eq!(format_time(0.0), "00:00");
        assert_eq!(format_time(75.9), "01:15");
        assert_eq!(format_time(3725.0), "1:02:05");
        assert_eq!(format_time(-3.0), "00:00");
    }

    #[test]
    fn volume_steps_stay_in_range() {
        assert_eq!(step_volume(0.5, VOLUME_STEP), 0.55);
        assert_eq!(step_volume(0.98, VOLUME_STEP), 1.0);
        assert_eq!(step_volume(0.02, -VOLUME_STEP), 0.0);
    }

    #[test]
    fn selection_wraps() {
        assert_eq!(step_index(0, 3, -1), 2);
        assert_eq!(step_index(2, 3, 1), 0);
        assert_eq!(step_index(5, 0, 1), 0);
    }
}
