use std::collections::VecDeque;

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;

use riftline::MetricsSnapshot;

const LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub player_id: String,
    pub side: String,
    pub acked_tick: Option<u32>,
    pub input_ack: u32,
    pub idle_secs: u64,
}

#[derive(Debug, Default)]
pub struct TuiState {
    log: VecDeque<String>,
}

impl TuiState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_line(&mut self, line: String) {
        if self.log.len() >= LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(line);
    }

    fn tail(&self, count: usize) -> impl Iterator<Item = &String> {
        self.log.iter().rev().take(count).rev()
    }
}

pub fn render(
    frame: &mut Frame,
    game_id: &str,
    metrics: &MetricsSnapshot,
    sessions: &[SessionRow],
    state: &TuiState,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(8),
            Constraint::Length((sessions.len() as u16).clamp(1, 8) + 2),
            Constraint::Min(4),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], game_id, metrics, sessions.len());
    render_metrics(frame, chunks[1], metrics);
    render_sessions(frame, chunks[2], sessions);
    render_log(frame, chunks[3], state);
    render_help(frame, chunks[4]);
}

fn render_header(
    frame: &mut Frame,
    area: Rect,
    game_id: &str,
    metrics: &MetricsSnapshot,
    session_count: usize,
) {
    let block = Block::default()
        .title(format!(" riftline server - {game_id} "))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!(
        "Ticks: {}  |  Sessions: {}  |  Utilization: {:.1}%",
        metrics.ticks, session_count, metrics.utilization_percent
    );
    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));
    frame.render_widget(paragraph, area);
}

fn render_metrics(frame: &mut Frame, area: Rect, metrics: &MetricsSnapshot) {
    let block = Block::default()
        .title(" Tick metrics ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let lines = vec![
        metric_line(
            "Duration: ",
            format!(
                "min {:.3}ms / avg {:.3}ms / p95 {:.3}ms / p99 {:.3}ms / max {:.3}ms",
                metrics.min_tick_ms,
                metrics.avg_tick_ms,
                metrics.p95_tick_ms,
                metrics.p99_tick_ms,
                metrics.max_tick_ms
            ),
        ),
        metric_line(
            "Spread: ",
            format!("stddev {:.3}ms", metrics.std_dev_tick_ms),
        ),
        metric_line(
            "Overruns: ",
            format!("{}", metrics.budget_overruns),
        ),
        metric_line(
            "Jitter: ",
            format!(
                "avg {:.3}ms / max {:.3}ms",
                metrics.avg_inter_tick_jitter_ms, metrics.max_jitter_ms
            ),
        ),
        metric_line(
            "Heap: ",
            format!(
                "{} now / {} avg / {} peak",
                format_bytes(metrics.heap_current_bytes),
                format_bytes(metrics.heap_avg_bytes),
                format_bytes(metrics.heap_max_bytes)
            ),
        ),
    ];

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn metric_line(label: &str, value: String) -> Line<'_> {
    Line::from(vec![
        Span::styled(label.to_string(), Style::default().fg(Color::Gray)),
        Span::styled(value, Style::default().fg(Color::White)),
    ])
}

fn render_sessions(frame: &mut Frame, area: Rect, sessions: &[SessionRow]) {
    let block = Block::default()
        .title(format!(" Sessions ({}) ", sessions.len()))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let lines: Vec<Line> = if sessions.is_empty() {
        vec![Line::from(Span::styled(
            "no players connected",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        sessions
            .iter()
            .map(|row| {
                let acked = row
                    .acked_tick
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string());
                Line::from(vec![
                    Span::styled(
                        format!("{:<16}", row.player_id),
                        Style::default().fg(Color::White),
                    ),
                    Span::styled(
                        format!("{:<8}", row.side),
                        Style::default().fg(Color::Cyan),
                    ),
                    Span::styled(
                        format!("tick {acked:<10} seq {:<8} idle {}s", row.input_ack, row.idle_secs),
                        Style::default().fg(Color::Gray),
                    ),
                ])
            })
            .collect()
    };

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Events ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = state
        .tail(visible)
        .map(|line| Line::from(line.clone()))
        .collect();

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new("Press 'q' or ESC to stop the server")
        .block(block)
        .style(
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        );
    frame.render_widget(text, area);
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
