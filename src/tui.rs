#![cfg(feature = "tui")]

use crate::app::Workspace;
use anyhow::Context;
use codemaestro::{ConversationTurn, StreamEvent, Submission, TurnStatus};
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use tokio::sync::mpsc;

const HELP: &str =
    "Type a message and press Enter. Esc stops an answer. Commands: /quit, /clear, /diff on|off, /status";

enum Action {
    None,
    Quit,
    Submit(String),
}

struct View {
    input: String,
    notices: Vec<String>,
    active: Option<Submission>,
}

pub async fn run_tui(mut ws: Workspace) -> anyhow::Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        while let Ok(ev) = crossterm::event::read() {
            if ev_tx.send(ev).is_err() {
                break;
            }
        }
    });

    let mut view = View {
        input: String::new(),
        notices: vec![HELP.to_string(), ws.status_line()],
        active: None,
    };
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(33));

    let res = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = draw(&mut terminal, &ws, &view) {
                    break Err(e);
                }
            }
            Some(ev) = ev_rx.recv() => {
                let Event::Key(key) = ev else { continue };
                match handle_key(key, &mut ws, &mut view) {
                    Action::Quit => break Ok(()),
                    Action::Submit(msg) => match ws.submit(&msg) {
                        Ok(submission) => view.active = Some(submission),
                        Err(e) => view.notices.push(e.user_message()),
                    },
                    Action::None => {}
                }
            }
            Some(ev) = async {
                match &mut view.active {
                    Some(s) => s.next_event().await,
                    None => None,
                }
            } => {
                // Deltas are already recorded on the session; only the end matters here.
                if let StreamEvent::Finished(status) = ev {
                    view.active = None;
                    if let TurnStatus::Failed { message, .. } = status {
                        view.notices.push(message);
                    }
                }
            }
        }
    };

    if view.active.is_some() {
        ws.session.interrupt();
    }
    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

fn handle_key(key: KeyEvent, ws: &mut Workspace, view: &mut View) -> Action {
    let interrupt = key.code == KeyCode::Esc
        || (key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c'));
    if interrupt {
        if ws.session.is_busy() {
            ws.session.interrupt();
            return Action::None;
        }
        return Action::Quit;
    }

    match key.code {
        KeyCode::Char(c) => view.input.push(c),
        KeyCode::Backspace => {
            view.input.pop();
        }
        KeyCode::Enter => {
            let msg = view.input.trim().to_string();
            view.input.clear();
            return command(msg, ws, view);
        }
        _ => {}
    }
    Action::None
}

fn command(msg: String, ws: &mut Workspace, view: &mut View) -> Action {
    match msg.as_str() {
        "" => Action::None,
        "/quit" => Action::Quit,
        "/clear" => {
            match ws.session.clear() {
                Ok(()) => view.notices.clear(),
                Err(e) => view.notices.push(e.user_message()),
            }
            Action::None
        }
        "/status" => {
            view.notices.push(ws.status_line());
            Action::None
        }
        "/diff on" | "/diff off" => {
            ws.diff_mode = msg == "/diff on";
            view.notices.push(format!("diff mode {}", if ws.diff_mode { "on" } else { "off" }));
            Action::None
        }
        _ => Action::Submit(msg),
    }
}

fn turn_lines(turn: &ConversationTurn, text: &mut Text<'static>) {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    text.lines.push(Line::styled("user:", bold));
    text.lines.extend(Text::from(turn.user.clone()).lines);
    text.lines.push(Line::styled(format!("assistant ({}):", turn.status.label()), bold));
    text.lines.extend(Text::from(turn.assistant.clone()).lines);
    text.lines.push(Line::from(""));
}

fn draw(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ws: &Workspace,
    view: &View,
) -> anyhow::Result<()> {
    let turns = ws.session.turns();
    let busy = ws.session.is_busy();

    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)])
            .split(f.area());

        let mut text = Text::default();
        for turn in &turns {
            turn_lines(turn, &mut text);
        }
        for n in &view.notices {
            text.lines.push(Line::styled(n.clone(), Style::default().add_modifier(Modifier::ITALIC)));
        }

        // Keep the tail of the conversation in view.
        let height = chunks[0].height.saturating_sub(2) as usize;
        let scroll = text.lines.len().saturating_sub(height) as u16;

        let title = format!(
            "codemaestro | {} | diff {}{}",
            ws.root.display(),
            if ws.diff_mode { "on" } else { "off" },
            if busy { " | answering..." } else { "" }
        );
        let chat = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: false })
            .scroll((scroll, 0));

        let input_w = Paragraph::new(view.input.clone())
            .block(Block::default().borders(Borders::ALL).title("input"));

        f.render_widget(chat, chunks[0]);
        f.render_widget(input_w, chunks[1]);

        let x = chunks[1].x + 1 + view.input.chars().count() as u16;
        let y = chunks[1].y + 1;
        f.set_cursor_position((x.min(chunks[1].x + chunks[1].width.saturating_sub(2)), y));
    })?;
    Ok(())
}
