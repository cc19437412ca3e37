use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
};
use crate::app::{App, InputMode};
use chatflow_core::{ChatPhase, ChatRole};

/// Ensure the selected item in a list is visible by adjusting the ListState offset.
fn ensure_selected_visible(state: &mut ListState, visible_height: usize) {
    let visible_height = visible_height.max(1);

    if let Some(selected) = state.selected() {
        let min_offset = selected.saturating_sub(visible_height - 1);
        let max_offset = selected;

        let new_offset = state.offset().clamp(min_offset, max_offset);
        if new_offset != state.offset() {
            *state.offset_mut() = new_offset;
        }
    }
}

/// Wrap text to fit within a given width, returning multiple lines
/// Uses word boundaries for wrapping (doesn't break mid-word)
fn wrap_text_to_width(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    let mut current_line = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if current_len == 0 {
            // First word on line
            current_line = word.to_string();
            current_len = word_len;
        } else if current_len + 1 + word_len <= width {
            // Word fits on current line
            current_line.push(' ');
            current_line.push_str(word);
            current_len += 1 + word_len;
        } else {
            // Word doesn't fit, start new line
            lines.push(current_line);
            current_line = word.to_string();
            current_len = word_len;
        }
    }

    // Don't forget the last line
    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(String::new());
    }

    lines
}

/// Render `**bold**` spans; everything else is literal.
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            chars.next();

            // Find closing **
            let mut bold_text = String::new();
            let mut found_close = false;

            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'*') {
                    chars.next();
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                if !current_text.is_empty() {
                    spans.push(Span::raw(std::mem::take(&mut current_text)));
                }
                spans.push(Span::styled(
                    bold_text,
                    Style::default().add_modifier(Modifier::BOLD),
                ));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

/// Pre-wrapped lines for one message body.
fn push_body(lines: &mut Vec<Line<'static>>, content: &str, width: usize, style: Option<Style>) {
    for raw in content.lines() {
        for wrapped in wrap_text_to_width(raw, width) {
            let line = match style {
                Some(style) => Line::from(Span::styled(wrapped, style)),
                None => parse_markdown_line(&wrapped),
            };
            lines.push(line);
        }
    }
}

fn role_label(role: ChatRole) -> Line<'static> {
    let (label, color) = match role {
        ChatRole::System => ("System:", Color::Magenta),
        ChatRole::User => ("You:", Color::Cyan),
        ChatRole::Assistant => ("AI:", Color::Yellow),
    };
    Line::from(Span::styled(
        label,
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    ))
}

fn chat_lines(app: &App, width: usize) -> Vec<Line<'static>> {
    let state = &app.chat_state;
    let mut lines: Vec<Line<'static>> = Vec::new();

    for msg in &state.messages {
        lines.push(role_label(msg.role));
        let style = (msg.role == ChatRole::User).then(Style::default);
        push_body(&mut lines, &msg.content, width, style);
        lines.push(Line::default());
    }

    if state.is_loading {
        lines.push(role_label(ChatRole::Assistant));
        if state.streaming_message.is_empty() {
            // Animated ellipsis: cycles through ".", "..", "..."
            let dots = ".".repeat((app.animation_frame as usize) + 1);
            let label = if state.phase == ChatPhase::Fallback { "Retrying" } else { "Thinking" };
            lines.push(Line::from(Span::styled(
                format!("{}{}", label, dots),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
        } else {
            push_body(&mut lines, &state.streaming_message, width, None);
        }
    } else if !state.streaming_message.is_empty() {
        // Partial reply left behind by a stopped stream
        push_body(
            &mut lines,
            &state.streaming_message,
            width,
            Some(Style::default().fg(Color::DarkGray)),
        );
        lines.push(Line::from(Span::styled(
            "(stopped)",
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    if let Some(error) = &state.error {
        let color = if state.phase == ChatPhase::Fallback { Color::Yellow } else { Color::Red };
        lines.push(Line::default());
        push_body(&mut lines, error, width, Some(Style::default().fg(color)));
    }

    lines
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, chat, input, footer
    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    if app.show_model_picker {
        render_model_picker(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" chatflow ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::styled(format!("[{}]", app.model()), Style::default().fg(Color::White)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let inner_width = area.width.saturating_sub(2) as usize;
    app.chat_height = area.height.saturating_sub(2);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Conversation ");

    let text = if app.chat_state.messages.is_empty() && !app.chat_state.is_loading && app.chat_state.error.is_none() {
        app.total_lines = 0;
        Text::from(Span::styled(
            "Type a message and press Enter...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let lines = chat_lines(app, inner_width);
        app.total_lines = u16::try_from(lines.len()).unwrap_or(u16::MAX);
        Text::from(lines)
    };

    if app.follow_tail {
        app.scroll_to_bottom();
    }

    let chat = Paragraph::new(text)
        .block(block)
        .scroll((app.scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };

    let title = if app.is_busy() { " Message (Esc to stop) " } else { " Message " };
    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Calculate visible portion of input with horizontal scrolling
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.cursor;

    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app.input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);

    frame.render_widget(input, area);

    // Show cursor when editing
    if editing && !app.show_model_picker {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = match app.input_mode {
        InputMode::Normal => (" NORMAL ", Style::default().bg(Color::Blue).fg(Color::White)),
        InputMode::Editing => (" INSERT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().fg(Color::Gray);

    let hints: &[(&str, &str)] = match app.input_mode {
        InputMode::Editing => &[("Enter", "send"), ("Esc", "stop/leave"), ("^L", "clear"), ("^S", "save")],
        InputMode::Normal => &[("i", "type"), ("j/k", "scroll"), ("m", "model"), ("Esc", "stop"), ("q", "quit")],
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    if let Some(status) = &app.status {
        spans.push(Span::styled(status.clone(), Style::default().fg(Color::Green)));
    } else {
        for (key, label) in hints {
            spans.push(Span::styled(format!(" {} ", key), key_style));
            spans.push(Span::styled(format!(" {} ", label), label_style));
        }
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_model_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    // Calculate popup size and position (centered)
    let popup_width = 50.min(area.width.saturating_sub(4));
    let popup_height = (app.available_models.len() as u16 + 2).min(area.height.saturating_sub(4));

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let title = if app.models_task.is_some() {
        " Select Model (loading...) "
    } else {
        " Select Model (Enter to select, Esc to cancel) "
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(title);

    let current = app.model();
    let items: Vec<ListItem> = app
        .available_models
        .iter()
        .map(|model| {
            let style = if *model == current {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {} ", model)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    let visible_height = popup_area.height.saturating_sub(2) as usize;
    ensure_selected_visible(&mut app.model_picker_state, visible_height);

    frame.render_stateful_widget(list, popup_area, &mut app.model_picker_state);
}
