use crate::app::{App, TreeRow};
use mumble_core::TalkingState;
use mumble_state::{DisplayUser, RequestSink, SessionPhase};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};

#[derive(Clone, Copy)]
struct SidebarTheme {
    bg: Color,
    surface: Color,
    border: Color,
    title: Color,
    text: Color,
    muted: Color,
    accent: Color,
    ok: Color,
    warn: Color,
    critical: Color,
}

fn sidebar_theme() -> SidebarTheme {
    SidebarTheme {
        bg: Color::Rgb(11, 18, 32),
        surface: Color::Rgb(17, 26, 46),
        border: Color::Rgb(71, 85, 105),
        title: Color::Rgb(191, 219, 254),
        text: Color::Rgb(226, 232, 240),
        muted: Color::Rgb(148, 163, 184),
        accent: Color::Rgb(56, 189, 248),
        ok: Color::Rgb(34, 197, 94),
        warn: Color::Rgb(245, 158, 11),
        critical: Color::Rgb(239, 68, 68),
    }
}

/// One short marker per set flag. Admin state is upper case.
pub fn user_badges(user: &DisplayUser) -> Vec<&'static str> {
    let flags = &user.flags;
    let mut badges = Vec::new();
    if flags.muted {
        badges.push("MUTE");
    }
    if flags.deafened {
        badges.push("DEAF");
    }
    if flags.suppressed {
        badges.push("supp");
    }
    if flags.self_muted {
        badges.push("mute");
    }
    if flags.self_deafened {
        badges.push("deaf");
    }
    if flags.locally_ignored {
        badges.push("ignored");
    }
    if flags.locally_muted {
        badges.push("local-mute");
    }
    if flags.priority_speaker {
        badges.push("prio");
    }
    if flags.recording {
        badges.push("rec");
    }
    badges
}

fn talking_marker(state: TalkingState) -> &'static str {
    match state {
        TalkingState::Talking => "~",
        TalkingState::Whispering => "w",
        TalkingState::Shouting => "!",
        TalkingState::TalkingMuted => "x",
        TalkingState::Passive | TalkingState::Invalid => " ",
    }
}

pub fn render_ui<S: RequestSink>(frame: &mut ratatui::Frame, app: &App<S>) {
    let size = frame.size();
    let theme = sidebar_theme();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(0)])
        .split(size);
    frame.render_widget(render_header(app, theme), layout[0]);
    render_tree(frame, app, theme, layout[1]);
    if app.help_open {
        render_help_overlay(frame, theme);
    }
}

fn render_header<S: RequestSink>(app: &App<S>, theme: SidebarTheme) -> Paragraph<'static> {
    let phase = app.controller.phase();
    let local = app.controller.local_state();
    let (status, status_color) = match phase.status_line() {
        Some(line) if phase == SessionPhase::TransportUp => (line.to_string(), theme.warn),
        Some(line) => (line.to_string(), theme.critical),
        None => ("connected".to_string(), theme.ok),
    };
    let mic = if local.deafened {
        Span::styled("deafened", Style::default().fg(theme.critical))
    } else if local.muted {
        Span::styled("muted", Style::default().fg(theme.warn))
    } else {
        Span::styled("live", Style::default().fg(theme.ok))
    };
    let first = Line::from(vec![
        Span::styled(
            status,
            Style::default()
                .fg(status_color)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(" | ", Style::default().fg(theme.muted)),
        mic,
        Span::styled(" | ", Style::default().fg(theme.muted)),
        Span::styled(
            app.controller.layout().label(),
            Style::default().fg(theme.accent),
        ),
    ]);
    let second = match app.status_note.as_deref() {
        Some(note) if phase == SessionPhase::Disconnected => Line::from(Span::styled(
            format!("last error: {note}"),
            Style::default().fg(theme.muted),
        )),
        _ => Line::from(Span::styled(
            app.endpoint.clone(),
            Style::default().fg(theme.muted),
        )),
    };

    Paragraph::new(Text::from(vec![first, second]))
        .style(Style::default().fg(theme.text).bg(theme.bg))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme.border))
                .style(Style::default().bg(theme.bg))
                .title(Span::styled(
                    "Mumble",
                    Style::default()
                        .fg(theme.title)
                        .add_modifier(Modifier::BOLD),
                )),
        )
}

fn render_tree<S: RequestSink>(
    frame: &mut ratatui::Frame,
    app: &App<S>,
    theme: SidebarTheme,
    area: Rect,
) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border))
        .style(Style::default().bg(theme.surface))
        .title(Span::styled(
            "Channels",
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        ));

    let rows = app.rows();
    if rows.is_empty() {
        let paragraph = Paragraph::new(Line::from(Span::styled(
            tree_placeholder(app.controller.phase()),
            Style::default().fg(theme.muted),
        )))
        .style(Style::default().fg(theme.text).bg(theme.surface))
        .block(block);
        frame.render_widget(paragraph, area);
        return;
    }

    let items: Vec<ListItem> = rows
        .iter()
        .map(|row| ListItem::new(Line::from(row_spans(row, theme))))
        .collect();
    let mut state = ListState::default();
    state.select(Some(app.selected));
    let list = List::new(items)
        .highlight_symbol("> ")
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .block(block);
    frame.render_stateful_widget(list, area, &mut state);
}

/// Text shown in place of the tree when there are no rows to draw.
fn tree_placeholder(phase: SessionPhase) -> &'static str {
    phase.status_line().unwrap_or("Waiting for channel list...")
}

fn row_spans(row: &TreeRow, theme: SidebarTheme) -> Vec<Span<'static>> {
    match row {
        TreeRow::Channel {
            depth,
            name,
            user_count,
            collapsed,
            expandable,
            ..
        } => {
            let arrow = match (expandable, collapsed) {
                (false, _) => "  ",
                (true, true) => "+ ",
                (true, false) => "- ",
            };
            let mut spans = vec![
                Span::raw("  ".repeat(*depth)),
                Span::styled(arrow, Style::default().fg(theme.muted)),
                Span::styled(
                    name.clone(),
                    Style::default().fg(theme.text).add_modifier(Modifier::BOLD),
                ),
            ];
            if *user_count > 0 {
                spans.push(Span::styled(
                    format!(" ({user_count})"),
                    Style::default().fg(theme.muted),
                ));
            }
            spans
        }
        TreeRow::User { depth, user, .. } => {
            let talking_color = if user.talking_state.is_speaking() {
                theme.ok
            } else {
                theme.muted
            };
            let name_style = if user.is_local {
                Style::default()
                    .fg(theme.accent)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(theme.text)
            };
            let mut spans = vec![
                Span::raw("  ".repeat(*depth)),
                Span::styled(
                    format!("{} ", talking_marker(user.talking_state)),
                    Style::default().fg(talking_color),
                ),
                Span::styled(user.name.clone(), name_style),
            ];
            if user.is_local {
                spans.push(Span::styled(" (you)", Style::default().fg(theme.muted)));
            }
            for badge in user_badges(user) {
                let color = if badge.chars().all(|ch| ch.is_ascii_uppercase()) {
                    theme.critical
                } else {
                    theme.warn
                };
                spans.push(Span::raw(" "));
                spans.push(Span::styled(format!("[{badge}]"), Style::default().fg(color)));
            }
            spans
        }
    }
}

fn render_help_overlay(frame: &mut ratatui::Frame, theme: SidebarTheme) {
    let area = centered_rect(60, 60, frame.size());
    let lines = vec![
        "j/k, arrows  move selection",
        "space, c     collapse or expand channel",
        "enter        join selected channel",
        "m            toggle mute",
        "d            toggle deafen",
        "x            local mute selected user",
        "l, tab       cycle layout",
        "q            quit",
    ];
    let text = Text::from(
        lines
            .into_iter()
            .map(|line| Line::from(Span::styled(line, Style::default().fg(theme.text))))
            .collect::<Vec<_>>(),
    );
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(text)
            .wrap(Wrap { trim: false })
            .style(Style::default().bg(theme.surface))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(theme.border))
                    .title(Span::styled(
                        "Keys",
                        Style::default()
                            .fg(theme.title)
                            .add_modifier(Modifier::BOLD),
                    )),
            ),
        area,
    );
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
