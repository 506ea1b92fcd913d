// Main TUI application using ratatui
// One display surface for both controllers: an episode list driving the
// PlaybackController and a live panel driving the StreamingController.
// Everything shown is pulled from the controllers' query methods; the
// event channels only feed the status line.

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MediaKeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame, Terminal,
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::error::Result;
use crate::events::{ConnectionState, PlaybackStatus, PlayerEvent, StreamEvent};
use crate::format::{format_time, format_volume};
use crate::player::controller::PlaybackController;
use crate::player::episode::Episode;
use crate::stream::controller::StreamingController;
use crate::ui::surface::{action_for, TerminalSurface};

const VOLUME_STEP: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Panel {
    Episodes,
    Live,
}

pub struct PodplayApp {
    player: PlaybackController,
    stream: StreamingController,
    surface: Option<Arc<TerminalSurface>>,
    episodes: Vec<Episode>,
    selected: usize,
    focus: Panel,
    player_rx: broadcast::Receiver<PlayerEvent>,
    stream_rx: broadcast::Receiver<StreamEvent>,
    status_message: String,
    should_quit: bool,
}

impl PodplayApp {
    pub fn new(
        player: PlaybackController,
        stream: StreamingController,
        episodes: Vec<Episode>,
        surface: Option<Arc<TerminalSurface>>,
    ) -> Self {
        let player_rx = player.subscribe();
        let stream_rx = stream.subscribe();
        PodplayApp {
            player,
            stream,
            surface,
            episodes,
            selected: 0,
            focus: Panel::Episodes,
            player_rx,
            stream_rx,
            status_message: String::new(),
            should_quit: false,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.event_loop(&mut terminal).await;

        // Restore the terminal even if the loop failed
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
        terminal.show_cursor()?;

        result
    }

    async fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
        loop {
            self.drain_events();
            terminal.draw(|f| self.draw_ui(f))?;

            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Release {
                        self.handle_input(key.code).await;
                    }
                }
            }

            if self.should_quit {
                break;
            }
        }

        // Remember where we were, then release both audio resources
        self.player.pause();
        self.stream.shutdown();
        Ok(())
    }

    // ==========================================
    // NOTIFICATIONS
    // ==========================================

    fn drain_events(&mut self) {
        loop {
            match self.player_rx.try_recv() {
                Ok(event) => self.on_player_event(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        loop {
            match self.stream_rx.try_recv() {
                Ok(event) => self.on_stream_event(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }

    fn on_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::EpisodeChanged(Some(episode)) => {
                self.status_message = format!("Loading: {}...", episode.title);
                if let Some(index) = self.episodes.iter().position(|e| e.id == episode.id) {
                    self.selected = index;
                }
            }
            PlayerEvent::StateChanged(PlaybackStatus::Playing) => {
                if let Some(episode) = self.player.current_episode() {
                    self.status_message = format!("Now playing: {}", episode.title);
                }
            }
            PlayerEvent::StateChanged(PlaybackStatus::Ended) => {
                self.status_message = "Episode finished".to_string();
            }
            PlayerEvent::SpeedChanged(speed) => {
                self.status_message = format!("Speed: {}", speed.label());
            }
            PlayerEvent::Error { message, .. } => {
                self.status_message = format!("Error: {}", message);
            }
            _ => {}
        }
    }

    fn on_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Status(status) if !status.is_empty() && self.focus == Panel::Live => {
                self.status_message = format!("Live: {}", status);
            }
            StreamEvent::RetryPrompt(message) => {
                self.status_message = format!("Live stream failed: {} - press [R] to retry", message);
            }
            _ => {}
        }
    }

    // ==========================================
    // DRAWING
    // ==========================================

    fn draw_ui(&self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(10), Constraint::Length(5)])
            .split(frame.size());

        let title = if !self.status_message.is_empty() {
            self.status_message.clone()
        } else {
            "Controls: [Tab]Panel [Enter]Play episode [Space]Play/Pause [s]Stop [n/p]Next/Prev [←/→]Skip [↑/↓]Volume [r]Speed [m]Mute [R]Retry [q]Quit".to_string()
        };
        let header = Paragraph::new(title).block(Block::default().borders(Borders::ALL).title("Podplay"));
        frame.render_widget(header, chunks[0]);

        let main_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[1]);

        self.draw_episodes(frame, main_chunks[0]);
        self.draw_live(frame, main_chunks[1]);
        self.draw_player(frame, chunks[2]);
    }

    fn panel_block(&self, title: &'static str, panel: Panel) -> Block<'static> {
        let style = if self.focus == panel {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default()
        };
        Block::default().borders(Borders::ALL).border_style(style).title(title)
    }

    fn draw_episodes(&self, frame: &mut Frame, area: Rect) {
        let current_id = self.player.current_episode().map(|e| e.id);
        let items: Vec<ListItem> = self
            .episodes
            .iter()
            .enumerate()
            .map(|(i, episode)| {
                let duration = episode
                    .duration_seconds
                    .map(format_time)
                    .unwrap_or_else(|| "--:--".to_string());
                let marker = if current_id.as_deref() == Some(episode.id.as_str()) {
                    "♪ "
                } else {
                    "  "
                };
                let content = format!("{}{} - {} [{}]", marker, episode.title, episode.podcast_title, duration);
                let style = if i == self.selected {
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                ListItem::new(content).style(style)
            })
            .collect();

        let list = List::new(items).block(self.panel_block("Episodes", Panel::Episodes));
        frame.render_widget(list, area);
    }

    fn draw_live(&self, frame: &mut Frame, area: Rect) {
        let session = self.stream.session();
        let state = match session.connection_state {
            ConnectionState::Idle => "⏹ Off air",
            ConnectionState::ResolvingUrl => "… Resolving",
            ConnectionState::Ready => "● Ready",
            ConnectionState::Connecting => "… Connecting",
            ConnectionState::Playing => "▶ Live",
            ConnectionState::Buffering => "… Buffering",
            ConnectionState::Paused => "⏸ Paused",
            ConnectionState::Error => "✖ Error",
        };

        let mut lines = vec![
            format!("{} | Volume: {}", state, format_volume(session.volume, session.muted)),
            String::new(),
        ];
        match self.stream.metadata() {
            Some(metadata) => {
                lines.push(metadata.station.name.clone());
                lines.push(format!("Now: {}", metadata.now_playing_line()));
                if !metadata.current.show.is_empty() {
                    lines.push(format!("Show: {} ({}-{})", metadata.current.show, metadata.current.start, metadata.current.end));
                }
                if !metadata.current.hosts.is_empty() {
                    lines.push(format!("Hosts: {}", metadata.current.hosts));
                }
                if !metadata.next.title.is_empty() {
                    lines.push(format!("Next: {} ({})", metadata.next.title, metadata.next.start));
                }
            }
            None => lines.push("No metadata yet".to_string()),
        }
        if let Some(refreshed) = self.stream.last_refreshed() {
            lines.push(format!(
                "Updated {}",
                refreshed.with_timezone(&chrono::Local).format("%H:%M:%S")
            ));
        }
        if let Some(prompt) = self.stream.retry_prompt() {
            lines.push(format!("{} - [R] retry", prompt));
        }

        let widget = Paragraph::new(lines.join("\n")).block(self.panel_block("Live", Panel::Live));
        frame.render_widget(widget, area);
    }

    fn draw_player(&self, frame: &mut Frame, area: Rect) {
        let session = self.player.session();
        let now_playing = match &session.current_episode {
            Some(episode) => format!("Now Playing: {} - {}", episode.title, episode.podcast_title),
            None => "No episode playing".to_string(),
        };

        let state_str = match session.status {
            PlaybackStatus::Playing => "▶ Playing",
            PlaybackStatus::Paused => "⏸ Paused",
            PlaybackStatus::Loading => "… Loading",
            PlaybackStatus::Ended => "⏹ Ended",
            PlaybackStatus::Error => "✖ Error",
            PlaybackStatus::Idle => "⏹ Stopped",
        };

        let position = self.player.position();
        let time_str = match session.duration {
            Some(duration) => format!("{} / {}", format_time(position), format_time(duration)),
            None => format_time(position),
        };

        let queue_str = match session.current_index {
            Some(index) => format!("Episode {} of {}", index + 1, self.player.playlist().len()),
            None => String::new(),
        };

        let info = format!(
            "{}\nState: {} | Volume: {} | Speed: {} | Time: {}\n{}",
            now_playing,
            state_str,
            format_volume(session.volume, session.is_muted),
            session.speed.label(),
            time_str,
            queue_str
        );

        let widget = Paragraph::new(info).block(Block::default().borders(Borders::ALL).title("Player"));
        frame.render_widget(widget, area);
    }

    // ==========================================
    // INPUT
    // ==========================================

    async fn handle_input(&mut self, key: KeyCode) {
        self.status_message.clear();

        match key {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Tab => {
                self.focus = match self.focus {
                    Panel::Episodes => Panel::Live,
                    Panel::Live => Panel::Episodes,
                };
            }
            KeyCode::Char('j') => self.next_item(),
            KeyCode::Char('k') => self.prev_item(),
            KeyCode::Enter => self.play_selected(),
            KeyCode::Char(' ') => self.toggle_pause().await,
            KeyCode::Char('s') => self.stop(),
            KeyCode::Char('n') => {
                self.status_message = "Playing next episode...".to_string();
                self.spawn_navigation(true);
            }
            KeyCode::Char('p') => {
                self.status_message = "Playing previous episode...".to_string();
                self.spawn_navigation(false);
            }
            KeyCode::Right => self.skip(self.player.skip_step()),
            KeyCode::Left => self.skip(-self.player.skip_step()),
            KeyCode::Up => self.change_volume(VOLUME_STEP),
            KeyCode::Down => self.change_volume(-VOLUME_STEP),
            KeyCode::Char('r') => {
                self.player.cycle_playback_speed();
            }
            KeyCode::Char('m') => self.toggle_mute(),
            KeyCode::Char('R') => self.retry_stream(),
            KeyCode::Media(MediaKeyCode::PlayPause) => self.toggle_pause().await,
            KeyCode::Media(media) => {
                let Some(action) = action_for(media) else {
                    return;
                };
                if action.starts_playback() && self.player.current_episode().is_some() {
                    self.stream.pause();
                }
                if let Some(surface) = &self.surface {
                    surface.send(action);
                }
            }
            _ => {}
        }
    }

    fn next_item(&mut self) {
        if !self.episodes.is_empty() {
            self.selected = (self.selected + 1) % self.episodes.len();
        }
    }

    fn prev_item(&mut self) {
        if !self.episodes.is_empty() {
            if self.selected == 0 {
                self.selected = self.episodes.len() - 1;
            } else {
                self.selected -= 1;
            }
        }
    }

    fn play_selected(&mut self) {
        let Some(episode) = self.episodes.get(self.selected).cloned() else {
            return;
        };
        // One audio output at a time: release the live stream first
        self.stream.pause();
        self.focus = Panel::Episodes;

        let player = self.player.clone();
        let playlist = self.episodes.clone();
        tokio::spawn(async move {
            if let Err(e) = player.load_episode(episode, playlist).await {
                tracing::warn!("Episode load failed: {}", e);
            }
        });
    }

    fn spawn_navigation(&self, forward: bool) {
        if self.player.current_episode().is_some() {
            self.stream.pause();
        }
        let player = self.player.clone();
        tokio::spawn(async move {
            let result = if forward {
                player.next_episode().await
            } else {
                player.previous_episode().await
            };
            if let Err(e) = result {
                tracing::warn!("Episode navigation failed: {}", e);
            }
        });
    }

    async fn toggle_pause(&mut self) {
        match self.focus {
            Panel::Episodes => {
                if !self.player.is_playing() {
                    self.stream.pause();
                }
                if let Err(e) = self.player.toggle_play_pause().await {
                    self.status_message = format!("Error: {}", e);
                }
            }
            Panel::Live => {
                if self.stream.is_playing() {
                    self.stream.pause();
                    return;
                }
                self.player.stop();
                let stream = self.stream.clone();
                tokio::spawn(async move {
                    if let Err(e) = stream.play().await {
                        tracing::warn!("Live stream start failed: {}", e);
                    }
                });
            }
        }
    }

    fn stop(&mut self) {
        match self.focus {
            Panel::Episodes => {
                self.player.stop();
                self.status_message = "Stopped".to_string();
            }
            Panel::Live => self.stream.pause(),
        }
    }

    fn skip(&mut self, seconds: f64) {
        let result = if seconds >= 0.0 {
            self.player.skip_forward(seconds)
        } else {
            self.player.skip_backward(-seconds)
        };
        if let Err(e) = result {
            self.status_message = format!("Seek failed: {}", e);
        }
    }

    fn change_volume(&mut self, delta: f64) {
        match self.focus {
            Panel::Episodes => self.player.set_volume(self.player.volume() + delta),
            Panel::Live => self.stream.set_volume(self.stream.volume() + delta),
        }
    }

    fn toggle_mute(&mut self) {
        let muted = match self.focus {
            Panel::Episodes => self.player.toggle_mute(),
            Panel::Live => self.stream.toggle_mute(),
        };
        self.status_message = if muted { "Muted" } else { "Unmuted" }.to_string();
    }

    fn retry_stream(&mut self) {
        self.player.stop();
        self.focus = Panel::Live;
        let stream = self.stream.clone();
        tokio::spawn(async move {
            if let Err(e) = stream.retry().await {
                tracing::warn!("Stream retry failed: {}", e);
            }
        });
    }
}
