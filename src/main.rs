use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyModifiers,
    MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::{execute, ExecutableCommand};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Margin};
use ratatui::prelude::{Alignment, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use serde::{Deserialize, Serialize};
use unicode_width::UnicodeWidthStr;

const RECIPE_EXT: &str = ".recipe";
const BACKUP_EXT: &str = ".backup";
const INGREDIENT_FIELDS: usize = 3;
const DETAIL_FIELDS: usize = 4;
const DETAIL_LABELS: [&str; DETAIL_FIELDS] = ["Oven Temp", "Bake Time", "Yields", "Prep Time"];
const PIC_PLACEHOLDER: &str = "foobar";
const DEFAULT_ROOT: &str = "./recipes";

fn main() -> Result<()> {
    let mut app = AppState::new()?;
    run_app(&mut app)
}

fn run_app(app: &mut AppState) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    stdout.execute(EnableMouseCapture)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.hide_cursor()?;

    let result = event_loop(&mut terminal, app);

    restore_terminal(&mut terminal)?;
    result
}

fn event_loop<B>(terminal: &mut Terminal<B>, app: &mut AppState) -> Result<()>
where
    B: ratatui::backend::Backend + Write,
{
    let tick_rate = Duration::from_millis(200);
    loop {
        terminal.draw(|frame| render(frame, app))?;

        if event::poll(tick_rate)? {
            match event::read()? {
                Event::Key(key) => app.handle_key(key),
                Event::Mouse(mouse) => {
                    let size = terminal.size()?;
                    app.handle_mouse(mouse, size);
                }
                Event::Resize(_, _) => {}
                Event::FocusGained | Event::FocusLost | Event::Paste(_) => {}
            };
        }

        if app.should_quit {
            break;
        }
    }
    Ok(())
}

fn restore_terminal<B>(terminal: &mut Terminal<B>) -> Result<()>
where
    B: ratatui::backend::Backend + Write,
{
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn render(frame: &mut Frame, app: &AppState) {
    let size = frame.size();
    frame.render_widget(
        Block::default().style(Style::default().bg(app.theme.background)),
        size,
    );

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .split(size);

    let header = Paragraph::new(app.header_text())
        .alignment(Alignment::Center)
        .style(
            Style::default()
                .fg(app.theme.text)
                .bg(app.theme.primary)
                .add_modifier(Modifier::BOLD),
        );
    frame.render_widget(header, chunks[0]);

    let shortcuts = Paragraph::new(browser_shortcut_line(app))
        .alignment(Alignment::Center)
        .style(Style::default().bg(app.theme.highlight));
    frame.render_widget(shortcuts, chunks[1]);

    let content_area = chunks[2];
    frame.render_widget(
        Block::default().style(Style::default().bg(app.theme.surface)),
        content_area,
    );
    let (tree_area, detail_area) = content_areas(size);
    render_tree(frame, tree_area, app);
    render_detail(frame, detail_area, app);

    let status = Paragraph::new(app.status_text())
        .alignment(Alignment::Center)
        .style(
            Style::default()
                .bg(app.theme.primary)
                .fg(app.theme.text)
                .add_modifier(Modifier::BOLD),
        );
    frame.render_widget(status, chunks[3]);

    if let Some(popup) = &app.active_popup {
        render_popup(frame, popup, app);
    }
}

fn content_areas(area: Rect) -> (Rect, Rect) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .split(area);
    let inner = rows[2].inner(&Margin {
        vertical: 1,
        horizontal: 1,
    });
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(34), Constraint::Percentage(66)])
        .split(inner);
    (columns[0], columns[1])
}

fn render_tree(frame: &mut Frame, area: Rect, app: &AppState) {
    if area.width == 0 || area.height == 0 {
        return;
    }
    let offset = app.tree_offset(area.height as usize);
    let end = app.display_entries.len().min(offset + area.height as usize);
    let mut items: Vec<ListItem> = Vec::new();
    for entry_index in offset..end {
        let (line, mut style) = app.entry_line(entry_index);
        let mut display_line = line;
        if entry_index == app.current_index {
            style = style
                .bg(app.theme.highlight)
                .fg(app.theme.background)
                .add_modifier(Modifier::BOLD);
            display_line = app.highlight_entry_line(display_line);
        }
        items.push(ListItem::new(display_line).style(style));
    }
    if items.is_empty() {
        items.push(ListItem::new(""));
    }
    let list = List::new(items).block(
        Block::default().style(Style::default().bg(app.theme.surface).fg(app.theme.text)),
    );
    frame.render_widget(list, area);
}

fn render_detail(frame: &mut Frame, area: Rect, app: &AppState) {
    if area.width == 0 || area.height == 0 {
        return;
    }
    let heading_style = Style::default()
        .fg(app.theme.accent)
        .add_modifier(Modifier::BOLD);
    let mut lines: Vec<Line> = Vec::new();
    match app.display_entries.get(app.current_index) {
        Some(DisplayEntry::Recipe {
            category_index,
            recipe_index,
        }) => {
            let category = &app.categories[*category_index];
            let recipe = &category.recipes[*recipe_index];
            lines.push(Line::from(Span::styled(
                recipe.title.clone(),
                heading_style,
            )));
            if !recipe.author.is_empty() {
                lines.push(Line::from(format!("by {}", recipe.author)));
            }
            lines.push(Line::from(format!("in {}", category.name)));
            lines.push(Line::from(""));
            for (label, value) in DETAIL_LABELS.iter().zip(recipe.details.fields()) {
                lines.push(Line::from(vec![
                    Span::styled(format!("{label}: "), heading_style),
                    Span::raw(value.to_string()),
                ]));
            }
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled("Ingredients", heading_style)));
            if recipe.ingredients.is_empty() {
                lines.push(Line::from("  (none)"));
            }
            for ingredient in &recipe.ingredients {
                let text = format!("  {} {} {}", ingredient[0], ingredient[1], ingredient[2]);
                lines.push(Line::from(text.trim_end().to_string()));
            }
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled("Directions", heading_style)));
            for direction_line in recipe.directions.lines() {
                lines.push(Line::from(direction_line.to_string()));
            }
        }
        Some(DisplayEntry::Category { category_index }) => {
            let category = &app.categories[*category_index];
            lines.push(Line::from(Span::styled(
                category.name.clone(),
                heading_style,
            )));
            lines.push(Line::from(format!("{} recipe(s)", category.recipes.len())));
            lines.push(Line::from(""));
            lines.push(Line::from("Press n to add a recipe here."));
        }
        None => {
            lines.push(Line::from(format!(
                "No recipes found under {}",
                app.root.display()
            )));
            lines.push(Line::from(""));
            lines.push(Line::from(
                "Create a category directory there, then press r to rescan.",
            ));
        }
    }
    let paragraph = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .style(Style::default().bg(app.theme.surface).fg(app.theme.text));
    frame.render_widget(
        paragraph,
        area.inner(&Margin {
            vertical: 0,
            horizontal: 1,
        }),
    );
}

fn render_popup(frame: &mut Frame, popup: &PopupState, app: &AppState) {
    match popup {
        PopupState::Message(msg) => {
            let area = centered_rect(frame.size(), 50, 30);
            frame.render_widget(Clear, area);
            let block = Paragraph::new(format!("{msg}\n\nPress Enter or Esc to close."))
                .style(Style::default().bg(app.theme.surface).fg(app.theme.text))
                .block(
                    Block::default()
                        .title("Message")
                        .borders(Borders::ALL)
                        .style(Style::default().bg(app.theme.surface)),
                );
            frame.render_widget(block, area);
        }
        PopupState::RecipeForm(form) => {
            let area = frame.size();
            frame.render_widget(Clear, area);
            render_recipe_form_popup(frame, area, app, form);
        }
        PopupState::ConfirmDiscard(_) => {
            let area = centered_rect(frame.size(), 60, 35);
            frame.render_widget(Clear, area);
            let text = "About to lose changes to the current recipe!\n\n\
                        s  Save and close\n\
                        d  Discard changes\n\
                        any other key  Keep editing";
            let block = Paragraph::new(text)
                .style(Style::default().bg(app.theme.surface).fg(app.theme.text))
                .block(
                    Block::default()
                        .title("Unsaved Changes")
                        .borders(Borders::ALL)
                        .style(Style::default().bg(app.theme.surface)),
                );
            frame.render_widget(block, area);
        }
    }
}

fn popup_sections(area: Rect) -> Option<[Rect; 4]> {
    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(area);
    if sections.len() < 4 {
        return None;
    }
    Some([sections[0], sections[1], sections[2], sections[3]])
}

fn popup_content_margin() -> Margin {
    Margin {
        horizontal: 3,
        vertical: 1,
    }
}

fn render_recipe_form_popup(frame: &mut Frame, area: Rect, app: &AppState, form: &RecipeFormState) {
    let mut lines: Vec<FormLine> = Vec::new();
    lines.push(plain_line(Line::from(format!(
        "Recipe in {}",
        form.category_name
    ))));
    lines.push(make_field_line(
        "Title",
        &form.title,
        form.selected_field == RecipeField::Title,
        app,
    ));
    lines.push(make_field_line(
        "Author",
        &form.author,
        form.selected_field == RecipeField::Author,
        app,
    ));
    let detail_fields = [
        RecipeField::OvenTemp,
        RecipeField::BakeTime,
        RecipeField::Yields,
        RecipeField::PrepTime,
    ];
    for (index, field) in detail_fields.iter().enumerate() {
        lines.push(make_field_line(
            DETAIL_LABELS[index],
            form.details.fields()[index],
            form.selected_field == *field,
            app,
        ));
    }
    lines.push(plain_line(Line::from("")));
    lines.push(plain_line(Line::from(vec![Span::styled(
        "Ingredients (Ctrl+N adds a row, Ctrl+D deletes one):".to_string(),
        Style::default()
            .fg(app.theme.accent)
            .add_modifier(Modifier::BOLD),
    )])));
    if form.ingredients.is_empty() {
        lines.push(plain_line(Line::from("  (none)")));
    }
    let cell_labels = ["Quantity", "Unit", "Name"];
    for (row, ingredient) in form.ingredients.iter().enumerate() {
        lines.push(plain_line(Line::from(format!("  Ingredient {}", row + 1))));
        for (col, value) in ingredient.iter().enumerate() {
            lines.push(make_field_line(
                &format!("    {}", cell_labels[col]),
                value,
                form.selected_field == RecipeField::Ingredient(row, col),
                app,
            ));
        }
    }
    lines.push(plain_line(Line::from("")));
    let directions_heading = Line::from(vec![Span::styled(
        "Directions (Enter starts a new line here):".to_string(),
        Style::default()
            .fg(app.theme.accent)
            .add_modifier(Modifier::BOLD),
    )]);
    if form.selected_field == RecipeField::Directions {
        lines.push(FormLine::highlighted(directions_heading));
    } else {
        lines.push(plain_line(directions_heading));
    }
    for direction_line in form.directions.lines() {
        lines.push(plain_line(Line::from(format!("  {direction_line}"))));
    }
    if form.directions.ends_with('\n') || form.directions.is_empty() {
        lines.push(plain_line(Line::from("  ")));
    }
    if let Some(error) = &form.error {
        lines.push(plain_line(Line::from("")));
        lines.push(plain_line(Line::from(vec![Span::styled(
            error.clone(),
            Style::default().fg(Color::Red),
        )])));
    }

    let key_style = Style::default()
        .fg(app.theme.accent)
        .add_modifier(Modifier::BOLD);
    let shortcut_line = Line::from(vec![
        Span::styled("Tab", key_style),
        Span::raw("/"),
        Span::styled("Shift+Tab", key_style),
        Span::raw(" Move    "),
        Span::styled("Ctrl+S", key_style),
        Span::raw(" Save    "),
        Span::styled("Ctrl+N", key_style),
        Span::raw("/"),
        Span::styled("Ctrl+D", key_style),
        Span::raw(" Ingredient    "),
        Span::styled("Esc", key_style),
        Span::raw(" Cancel"),
    ]);

    if let Some(sections) = popup_sections(area) {
        frame.render_widget(
            Block::default().style(Style::default().bg(app.theme.background)),
            area,
        );
        let [header_area, shortcuts_area, content_area, status_area] = sections;
        let header = Paragraph::new(format!("{} - {}", app.header_text(), form.mode_label))
            .alignment(Alignment::Center)
            .style(
                Style::default()
                    .bg(app.theme.primary)
                    .fg(app.theme.text)
                    .add_modifier(Modifier::BOLD),
            );
        frame.render_widget(header, header_area);

        let shortcuts = Paragraph::new(shortcut_line)
            .alignment(Alignment::Center)
            .style(
                Style::default()
                    .bg(app.theme.highlight)
                    .add_modifier(Modifier::BOLD),
            );
        frame.render_widget(shortcuts, shortcuts_area);

        frame.render_widget(
            Block::default().style(Style::default().bg(app.theme.surface)),
            content_area,
        );
        let inner = content_area.inner(&popup_content_margin());
        let rendered_lines = materialize_form_lines(&lines, inner.width as usize, app);
        let paragraph = Paragraph::new(rendered_lines)
            .wrap(Wrap { trim: false })
            .style(Style::default().bg(app.theme.surface).fg(app.theme.text));
        frame.render_widget(paragraph, inner);

        let status = Paragraph::new(app.status_text())
            .alignment(Alignment::Center)
            .style(
                Style::default()
                    .bg(app.theme.primary)
                    .fg(app.theme.text)
                    .add_modifier(Modifier::BOLD),
            );
        frame.render_widget(status, status_area);
    }
}

fn browser_shortcut_line(app: &AppState) -> Line<'static> {
    let key_style = Style::default()
        .fg(app.theme.accent)
        .add_modifier(Modifier::BOLD);
    Line::from(vec![
        Span::styled("Up/Down", key_style),
        Span::raw(" Move  "),
        Span::styled("Space", key_style),
        Span::raw(" Fold  "),
        Span::styled("Enter", key_style),
        Span::raw(" Open  "),
        Span::styled("e", key_style),
        Span::raw(" Edit  "),
        Span::styled("n", key_style),
        Span::raw(" New  "),
        Span::styled("r", key_style),
        Span::raw(" Rescan  "),
        Span::styled("t", key_style),
        Span::raw(" Theme  "),
        Span::styled("q", key_style),
        Span::raw(" Quit"),
    ])
}

struct FormLine {
    line: Line<'static>,
    highlight: bool,
}

impl FormLine {
    fn plain(line: Line<'static>) -> Self {
        Self {
            line,
            highlight: false,
        }
    }

    fn highlighted(line: Line<'static>) -> Self {
        Self {
            line,
            highlight: true,
        }
    }
}

fn materialize_form_lines(lines: &[FormLine], width: usize, app: &AppState) -> Vec<Line<'static>> {
    lines
        .iter()
        .map(|form_line| {
            if form_line.highlight {
                highlight_line_with_width(form_line.line.clone(), width, app)
            } else {
                form_line.line.clone()
            }
        })
        .collect()
}

fn highlight_line_with_width(
    mut line: Line<'static>,
    width: usize,
    app: &AppState,
) -> Line<'static> {
    let mut text_width = 0usize;
    let highlight_style = Style::default()
        .fg(app.theme.background)
        .bg(app.theme.highlight)
        .add_modifier(Modifier::BOLD);
    for span in &mut line.spans {
        span.style = highlight_style;
        text_width += UnicodeWidthStr::width(span.content.as_ref());
    }
    if width > text_width {
        line.spans
            .push(Span::styled(" ".repeat(width - text_width), highlight_style));
    }
    line
}

fn plain_line(line: impl Into<Line<'static>>) -> FormLine {
    FormLine::plain(line.into())
}

fn make_field_line(label: &str, value: &str, selected: bool, app: &AppState) -> FormLine {
    let value_display = if value.trim().is_empty() {
        "(empty)".to_string()
    } else {
        value.to_string()
    };
    let label_style = Style::default()
        .fg(app.theme.accent)
        .add_modifier(Modifier::BOLD);
    let value_style = Style::default().fg(app.theme.text);
    let label_span = Span::styled(format!("{label}: "), label_style);
    let value_span = Span::styled(value_display, value_style);
    if selected {
        FormLine::highlighted(Line::from(vec![label_span, value_span]))
    } else {
        FormLine::plain(Line::from(vec![label_span, value_span]))
    }
}

fn centered_rect(area: Rect, width_percent: u16, height_percent: u16) -> Rect {
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100 - width_percent) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100 - height_percent) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

type Ingredient = [String; INGREDIENT_FIELDS];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct RecipeDetails {
    oven_temp: String,
    bake_time: String,
    yields: String,
    prep_time: String,
}

impl RecipeDetails {
    fn fields(&self) -> [&str; DETAIL_FIELDS] {
        [
            self.oven_temp.as_str(),
            self.bake_time.as_str(),
            self.yields.as_str(),
            self.prep_time.as_str(),
        ]
    }

    fn field_mut(&mut self, index: usize) -> Option<&mut String> {
        match index {
            0 => Some(&mut self.oven_temp),
            1 => Some(&mut self.bake_time),
            2 => Some(&mut self.yields),
            3 => Some(&mut self.prep_time),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Recipe {
    title: String,
    author: String,
    directions: String,
    details: RecipeDetails,
    picture: String,
    ingredients: Vec<Ingredient>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Title,
    Ingredients,
    Directions,
    Details,
    Author,
    Pic,
}

impl Section {
    fn from_marker(line: &str) -> Option<Section> {
        match line {
            "<Title>" => Some(Section::Title),
            "<Ingredients>" => Some(Section::Ingredients),
            "<directions>" => Some(Section::Directions),
            "<details>" => Some(Section::Details),
            "<author>" => Some(Section::Author),
            "<pic>" => Some(Section::Pic),
            _ => None,
        }
    }
}

fn parse_recipe(text: &str) -> Result<Recipe> {
    let mut recipe = Recipe::default();
    let mut section: Option<Section> = None;
    let mut detail_index = 0usize;
    let mut ingredient_part = 0usize;

    for raw_line in text.lines() {
        let line = raw_line.trim_end_matches('\r');
        if let Some(marker) = Section::from_marker(line) {
            section = Some(marker);
            continue;
        }
        if line == "<end>" {
            continue;
        }
        let Some(current) = section else {
            bail!("content before first section marker");
        };
        match current {
            Section::Title => recipe.title = line.to_string(),
            Section::Ingredients => {
                // A full record means the next line starts a new one.
                if recipe.ingredients.is_empty() || ingredient_part == INGREDIENT_FIELDS {
                    recipe.ingredients.push(Ingredient::default());
                    ingredient_part = 0;
                }
                if let Some(last) = recipe.ingredients.last_mut() {
                    last[ingredient_part] = line.to_string();
                }
                ingredient_part += 1;
            }
            Section::Directions => {
                recipe.directions.push_str(line);
                recipe.directions.push('\n');
            }
            Section::Details => {
                if detail_index < DETAIL_FIELDS {
                    if let Some(field) = recipe.details.field_mut(detail_index) {
                        *field = line.to_string();
                    }
                    detail_index += 1;
                }
            }
            Section::Author => recipe.author = line.to_string(),
            Section::Pic => recipe.picture = line.to_string(),
        }
    }
    Ok(recipe)
}

fn encode_recipe(recipe: &Recipe) -> String {
    let mut out = String::new();
    out.push_str("<Title>\n");
    out.push_str(&recipe.title);
    out.push('\n');
    out.push_str("<Ingredients>\n");
    for ingredient in &recipe.ingredients {
        for part in ingredient {
            out.push_str(part);
            out.push('\n');
        }
    }
    out.push_str("<end>\n");
    out.push_str("<directions>\n");
    out.push_str(&recipe.directions);
    if !recipe.directions.is_empty() && !recipe.directions.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("<end>\n");
    out.push_str("<author>\n");
    out.push_str(&recipe.author);
    out.push('\n');
    out.push_str("<details>\n");
    for field in recipe.details.fields() {
        out.push_str(field);
        out.push('\n');
    }
    // The stored picture value is never written back; every file carries
    // this placeholder.
    out.push_str("<pic>\n");
    out.push_str(PIC_PLACEHOLDER);
    out.push('\n');
    out.push_str("<notes>\n");
    out
}

fn recipe_path(root: &Path, category: &str, title: &str) -> PathBuf {
    root.join(category).join(format!("{title}{RECIPE_EXT}"))
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(BACKUP_EXT);
    PathBuf::from(name)
}

#[derive(Debug, PartialEq, Eq)]
enum SaveOutcome {
    Saved,
    DuplicateTitle,
}

/// Writes a recipe to `<root>/<category>/<title>.recipe`.
///
/// Side effect: any file already at the target path is renamed to its
/// `.backup` sibling first, silently replacing an older backup. The same
/// happens to the previous title's file when the recipe was renamed. The
/// backup-then-write pair is not atomic.
fn save_recipe(
    root: &Path,
    category: &str,
    recipe: &Recipe,
    previous_title: Option<&str>,
    sibling_titles: &[String],
) -> Result<SaveOutcome> {
    // The filesystem would silently overwrite the other recipe.
    if sibling_titles.iter().any(|title| title == &recipe.title) {
        return Ok(SaveOutcome::DuplicateTitle);
    }

    if let Some(previous) = previous_title {
        if previous != recipe.title {
            let old_path = recipe_path(root, category, previous);
            if old_path.is_file() {
                fs::rename(&old_path, backup_path(&old_path))
                    .with_context(|| format!("Failed to back up {}", old_path.display()))?;
            }
        }
    }

    let path = recipe_path(root, category, &recipe.title);
    if path.is_file() {
        fs::rename(&path, backup_path(&path))
            .with_context(|| format!("Failed to back up {}", path.display()))?;
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, encode_recipe(recipe))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(SaveOutcome::Saved)
}

#[derive(Clone)]
struct CategoryState {
    name: String,
    expanded: bool,
    recipes: Vec<Recipe>,
}

struct CatalogScan {
    categories: Vec<CategoryState>,
    warnings: Vec<String>,
}

fn scan_catalog(root: &Path) -> Result<CatalogScan> {
    let mut categories = Vec::new();
    let mut warnings = Vec::new();
    let entries = fs::read_dir(root)
        .with_context(|| format!("Unable to read recipe root {}", root.display()))?;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => {
                warnings.push(format!(
                    "Skipped category with non-UTF-8 name in {}",
                    root.display()
                ));
                continue;
            }
        };
        let mut recipes = Vec::new();
        for file in fs::read_dir(entry.path())? {
            let file = file?;
            if !file.file_type()?.is_file() {
                continue;
            }
            let file_name = match file.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            let Some(stem) = file_name.strip_suffix(RECIPE_EXT) else {
                continue;
            };
            let parsed = fs::read_to_string(file.path())
                .map_err(anyhow::Error::from)
                .and_then(|text| parse_recipe(&text));
            match parsed {
                Ok(mut recipe) => {
                    if recipe.title.is_empty() {
                        recipe.title = stem.to_string();
                    }
                    recipes.push(recipe);
                }
                Err(err) => {
                    warnings.push(format!("Skipped {}: {err}", file.path().display()));
                }
            }
        }
        recipes.sort_by(|a, b| a.title.cmp(&b.title));
        categories.push(CategoryState {
            name,
            expanded: true,
            recipes,
        });
    }
    categories.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(CatalogScan {
        categories,
        warnings,
    })
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
struct AppSettings {
    root: Option<String>,
    #[serde(default)]
    theme_key: Option<String>,
}

impl AppSettings {
    fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let data = fs::read_to_string(path)?;
            let parsed: AppSettings = serde_json::from_str(&data)?;
            Ok(parsed)
        } else {
            let default = AppSettings::default();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, serde_json::to_string_pretty(&default)?)?;
            Ok(default)
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }
}

struct AppPaths {
    settings_file: PathBuf,
}

impl AppPaths {
    fn new() -> Result<Self> {
        let home = dirs::home_dir().context("Unable to determine home directory")?;
        let config_dir = home.join(".local/recipe-box");
        fs::create_dir_all(&config_dir)?;
        Ok(Self {
            settings_file: config_dir.join("settings.json"),
        })
    }
}

#[derive(Clone, Copy)]
enum DisplayEntry {
    Category {
        category_index: usize,
    },
    Recipe {
        category_index: usize,
        recipe_index: usize,
    },
}

enum PopupState {
    Message(String),
    RecipeForm(RecipeFormState),
    ConfirmDiscard(RecipeFormState),
}

struct AppState {
    root: PathBuf,
    categories: Vec<CategoryState>,
    display_entries: Vec<DisplayEntry>,
    current_index: usize,
    should_quit: bool,
    status_message: Option<String>,
    active_popup: Option<PopupState>,
    paths: AppPaths,
    theme: Theme,
    theme_key: String,
    // Root taken from settings.json, if any. A command-line root override
    // applies to this run only and must never be written back.
    settings_root: Option<String>,
}

impl AppState {
    fn new() -> Result<Self> {
        let paths = AppPaths::new()?;
        let settings = AppSettings::load(&paths.settings_file)?;
        let settings_root = settings.root.clone();
        let root = std::env::args()
            .nth(1)
            .or_else(|| settings_root.clone())
            .unwrap_or_else(|| DEFAULT_ROOT.to_string());
        let root = PathBuf::from(root);

        let scan = scan_catalog(&root)?;
        let theme_key = settings
            .theme_key
            .clone()
            .unwrap_or_else(|| THEME_PRESETS[0].0.to_string());
        let theme = Theme::from_name(&theme_key).unwrap_or_else(Theme::fallback);

        let mut app = AppState {
            root,
            categories: scan.categories,
            display_entries: Vec::new(),
            current_index: 0,
            should_quit: false,
            status_message: None,
            active_popup: None,
            paths,
            theme,
            theme_key,
            settings_root,
        };
        app.rebuild_display();
        app.report_warnings(&scan.warnings);
        Ok(app)
    }

    fn report_warnings(&mut self, warnings: &[String]) {
        if warnings.is_empty() {
            return;
        }
        self.set_status(Some(format!("{} file(s) skipped", warnings.len())));
        self.active_popup = Some(PopupState::Message(warnings.join("\n")));
    }

    fn rebuild_display(&mut self) {
        self.display_entries.clear();
        for (idx, category) in self.categories.iter().enumerate() {
            self.display_entries.push(DisplayEntry::Category {
                category_index: idx,
            });
            if category.expanded {
                for recipe_index in 0..category.recipes.len() {
                    self.display_entries.push(DisplayEntry::Recipe {
                        category_index: idx,
                        recipe_index,
                    });
                }
            }
        }
        if self.current_index >= self.display_entries.len() {
            self.current_index = self.display_entries.len().saturating_sub(1);
        }
    }

    fn entry_line(&self, entry_index: usize) -> (Line<'_>, Style) {
        match &self.display_entries[entry_index] {
            DisplayEntry::Category { category_index } => {
                let category = &self.categories[*category_index];
                let marker = if category.expanded { "▼" } else { "▶" };
                let style = Style::default()
                    .fg(self.theme.text)
                    .bg(self.theme.surface)
                    .add_modifier(Modifier::BOLD);
                (Line::from(format!("{marker} {}", category.name)), style)
            }
            DisplayEntry::Recipe {
                category_index,
                recipe_index,
            } => {
                let recipe = &self.categories[*category_index].recipes[*recipe_index];
                let style = Style::default().fg(self.theme.text).bg(self.theme.surface);
                (Line::from(format!("    {}", recipe.title)), style)
            }
        }
    }

    fn highlight_entry_line(&self, line: Line<'_>) -> Line<'static> {
        let mut spans = Vec::new();
        for span in line.spans {
            let mut owned = Span::styled(span.content.to_string(), span.style);
            owned.style = owned
                .style
                .fg(self.theme.background)
                .bg(self.theme.highlight)
                .add_modifier(Modifier::BOLD);
            spans.push(owned);
        }
        Line::from(spans)
    }

    fn tree_offset(&self, height: usize) -> usize {
        if height == 0 {
            return 0;
        }
        if self.current_index >= height {
            self.current_index + 1 - height
        } else {
            0
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if self.active_popup.is_some() {
            self.handle_popup_key(key);
            return;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Up | KeyCode::Char('k') => self.move_selection_up(),
            KeyCode::Down | KeyCode::Char('j') => self.move_selection_down(),
            KeyCode::Enter => self.activate_current_entry(),
            KeyCode::Char(' ') => self.toggle_category(),
            KeyCode::Char('e') => self.open_edit_form(),
            KeyCode::Char('n') => self.open_new_recipe_form(),
            KeyCode::Char('r') => {
                if let Err(err) = self.reload_from_disk() {
                    self.set_status(Some(format!("Rescan failed: {err}")));
                }
            }
            KeyCode::Char('t') => self.cycle_theme(),
            _ => {}
        }
    }

    fn handle_popup_key(&mut self, key: KeyEvent) {
        let Some(popup) = self.active_popup.take() else {
            return;
        };
        match popup {
            PopupState::Message(msg) => match key.code {
                KeyCode::Esc | KeyCode::Enter => {}
                _ => self.active_popup = Some(PopupState::Message(msg)),
            },
            PopupState::RecipeForm(mut form) => match form.handle_key(key) {
                RecipeFormKeyResult::Continue => {
                    self.active_popup = Some(PopupState::RecipeForm(form));
                }
                RecipeFormKeyResult::Cancel => {
                    if form.is_dirty() {
                        self.active_popup = Some(PopupState::ConfirmDiscard(form));
                    } else {
                        self.set_status(Some("Edit cancelled".into()));
                    }
                }
                RecipeFormKeyResult::Submit => self.submit_recipe_form(form),
            },
            PopupState::ConfirmDiscard(form) => match key.code {
                KeyCode::Char('s') => self.submit_recipe_form(form),
                KeyCode::Char('d') => self.set_status(Some("Changes discarded".into())),
                _ => self.active_popup = Some(PopupState::RecipeForm(form)),
            },
        }
    }

    fn submit_recipe_form(&mut self, mut form: RecipeFormState) {
        match self.apply_recipe_form(&form) {
            Ok(msg) => self.set_status(Some(msg)),
            Err(err_msg) => {
                form.error = Some(err_msg);
                self.active_popup = Some(PopupState::RecipeForm(form));
            }
        }
    }

    fn apply_recipe_form(&mut self, form: &RecipeFormState) -> Result<String, String> {
        let recipe = form.to_recipe();
        if recipe.title.is_empty() {
            return Err("Title is required".into());
        }
        // The title is the filename stem; a separator would land the file
        // somewhere the scanner never looks.
        if recipe.title.contains('/') || recipe.title.contains('\\') {
            return Err("Title cannot contain path separators".into());
        }
        let Some(category) = self.categories.get(form.category_index) else {
            return Err("Category no longer exists".into());
        };
        let sibling_titles: Vec<String> = category
            .recipes
            .iter()
            .enumerate()
            .filter(|(idx, _)| Some(*idx) != form.recipe_index)
            .map(|(_, sibling)| sibling.title.clone())
            .collect();
        match save_recipe(
            &self.root,
            &category.name,
            &recipe,
            form.previous_title.as_deref(),
            &sibling_titles,
        ) {
            Ok(SaveOutcome::Saved) => {}
            Ok(SaveOutcome::DuplicateTitle) => {
                return Err(format!(
                    "A recipe in {} already has the title \"{}\"",
                    category.name, recipe.title
                ));
            }
            Err(err) => return Err(format!("Save failed: {err}")),
        }

        let category_index = form.category_index;
        let message = {
            let category = &mut self.categories[category_index];
            let message = match form.recipe_index {
                Some(idx) if idx < category.recipes.len() => {
                    category.recipes[idx] = recipe.clone();
                    "Recipe saved".to_string()
                }
                _ => {
                    category.recipes.push(recipe.clone());
                    "Recipe created".to_string()
                }
            };
            category.expanded = true;
            category.recipes.sort_by(|a, b| a.title.cmp(&b.title));
            message
        };
        self.rebuild_display();
        self.select_recipe(category_index, &recipe.title);
        Ok(message)
    }

    fn select_recipe(&mut self, category_index: usize, title: &str) {
        let position = self.display_entries.iter().position(|entry| {
            matches!(entry, DisplayEntry::Recipe {
                category_index: cat,
                recipe_index: idx,
            } if *cat == category_index
                && self.categories[*cat].recipes[*idx].title == title)
        });
        if let Some(position) = position {
            self.current_index = position;
        }
    }

    fn handle_mouse(&mut self, mouse: MouseEvent, terminal_area: Rect) {
        if self.active_popup.is_some() {
            return;
        }
        match mouse.kind {
            MouseEventKind::ScrollUp => self.move_selection_up(),
            MouseEventKind::ScrollDown => self.move_selection_down(),
            MouseEventKind::Down(MouseButton::Left) => {
                let (tree_area, _) = content_areas(terminal_area);
                if mouse.column < tree_area.x
                    || mouse.column >= tree_area.x + tree_area.width
                    || mouse.row < tree_area.y
                    || mouse.row >= tree_area.y + tree_area.height
                {
                    return;
                }
                let offset = self.tree_offset(tree_area.height as usize);
                let index = offset + (mouse.row - tree_area.y) as usize;
                if index >= self.display_entries.len() {
                    return;
                }
                self.current_index = index;
                if let DisplayEntry::Category { .. } = self.display_entries[index] {
                    self.toggle_category();
                }
            }
            _ => {}
        }
    }

    fn move_selection_up(&mut self) {
        if self.display_entries.is_empty() {
            return;
        }
        if self.current_index == 0 {
            self.current_index = self.display_entries.len().saturating_sub(1);
        } else {
            self.current_index -= 1;
        }
    }

    fn move_selection_down(&mut self) {
        if self.display_entries.is_empty() {
            return;
        }
        self.current_index = (self.current_index + 1) % self.display_entries.len();
    }

    fn activate_current_entry(&mut self) {
        match self.display_entries.get(self.current_index) {
            Some(DisplayEntry::Category { .. }) => self.toggle_category(),
            Some(DisplayEntry::Recipe { .. }) => self.open_edit_form(),
            None => {}
        }
    }

    fn toggle_category(&mut self) {
        if let Some(DisplayEntry::Category { category_index }) =
            self.display_entries.get(self.current_index)
        {
            if let Some(category) = self.categories.get_mut(*category_index) {
                category.expanded = !category.expanded;
                self.rebuild_display();
            }
        }
    }

    fn open_edit_form(&mut self) {
        match self.display_entries.get(self.current_index).copied() {
            Some(DisplayEntry::Recipe {
                category_index,
                recipe_index,
            }) => {
                let category_name = self.categories[category_index].name.clone();
                let recipe = self.categories[category_index].recipes[recipe_index].clone();
                self.active_popup = Some(PopupState::RecipeForm(RecipeFormState::new(
                    category_index,
                    category_name,
                    Some(recipe_index),
                    recipe,
                )));
            }
            _ => self.set_status(Some("Select a recipe to edit".into())),
        }
    }

    fn open_new_recipe_form(&mut self) {
        let category_index = match self.display_entries.get(self.current_index) {
            Some(DisplayEntry::Category { category_index }) => Some(*category_index),
            Some(DisplayEntry::Recipe { category_index, .. }) => Some(*category_index),
            None => None,
        };
        let Some(category_index) = category_index else {
            self.set_status(Some(format!(
                "Create a category directory under {} first",
                self.root.display()
            )));
            return;
        };
        let category_name = self.categories[category_index].name.clone();
        let blank = Recipe {
            ingredients: vec![Ingredient::default()],
            ..Recipe::default()
        };
        self.active_popup = Some(PopupState::RecipeForm(RecipeFormState::new(
            category_index,
            category_name,
            None,
            blank,
        )));
    }

    fn reload_from_disk(&mut self) -> Result<()> {
        let scan = scan_catalog(&self.root)?;
        let previously_collapsed: Vec<String> = self
            .categories
            .iter()
            .filter(|category| !category.expanded)
            .map(|category| category.name.clone())
            .collect();
        self.categories = scan.categories;
        for category in &mut self.categories {
            if previously_collapsed.contains(&category.name) {
                category.expanded = false;
            }
        }
        self.rebuild_display();
        if scan.warnings.is_empty() {
            self.set_status(Some("Catalog rescanned".into()));
        } else {
            self.report_warnings(&scan.warnings);
        }
        Ok(())
    }

    fn cycle_theme(&mut self) {
        let position = THEME_PRESETS
            .iter()
            .position(|(key, _)| *key == self.theme_key)
            .unwrap_or(0);
        let (key, _) = THEME_PRESETS[(position + 1) % THEME_PRESETS.len()];
        if let Some(theme) = Theme::from_name(key) {
            self.theme = theme;
            self.theme_key = key.to_string();
            match self.save_settings() {
                Ok(()) => self.set_status(Some(format!("Theme: {key}"))),
                Err(err) => self.set_status(Some(format!(
                    "Theme: {key} (settings not saved: {err})"
                ))),
            }
        }
    }

    fn save_settings(&self) -> Result<()> {
        let settings = AppSettings {
            root: self.settings_root.clone(),
            theme_key: Some(self.theme_key.clone()),
        };
        settings.save(&self.paths.settings_file)
    }

    fn set_status(&mut self, message: Option<String>) {
        self.status_message = message;
    }

    fn header_text(&self) -> String {
        format!("Recipe Box ({})", self.root.display())
    }

    fn status_text(&self) -> String {
        let total = self.display_entries.len();
        let current = if total == 0 { 0 } else { self.current_index + 1 };
        let mut text = format!("Entry {}/{} | Theme: {}", current, total, self.theme.name);
        if let Some(msg) = &self.status_message {
            text.push_str(" | ");
            text.push_str(msg);
        }
        text
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecipeField {
    Title,
    Author,
    OvenTemp,
    BakeTime,
    Yields,
    PrepTime,
    Ingredient(usize, usize),
    Directions,
}

enum RecipeFormKeyResult {
    Continue,
    Cancel,
    Submit,
}

struct RecipeFormState {
    category_index: usize,
    category_name: String,
    recipe_index: Option<usize>,
    previous_title: Option<String>,
    title: String,
    author: String,
    details: RecipeDetails,
    ingredients: Vec<Ingredient>,
    directions: String,
    picture: String,
    selected_field: RecipeField,
    error: Option<String>,
    mode_label: &'static str,
    initial: Recipe,
}

impl RecipeFormState {
    fn new(
        category_index: usize,
        category_name: String,
        recipe_index: Option<usize>,
        recipe: Recipe,
    ) -> Self {
        let previous_title = recipe_index.map(|_| recipe.title.clone());
        Self {
            category_index,
            category_name,
            recipe_index,
            previous_title,
            title: recipe.title.clone(),
            author: recipe.author.clone(),
            details: recipe.details.clone(),
            ingredients: recipe.ingredients.clone(),
            directions: recipe.directions.clone(),
            picture: recipe.picture.clone(),
            selected_field: RecipeField::Title,
            error: None,
            mode_label: if recipe_index.is_some() {
                "Edit Recipe"
            } else {
                "New Recipe"
            },
            initial: recipe,
        }
    }

    fn to_recipe(&self) -> Recipe {
        Recipe {
            title: self.title.trim().to_string(),
            author: self.author.clone(),
            directions: self.directions.clone(),
            details: self.details.clone(),
            picture: self.picture.clone(),
            ingredients: self
                .ingredients
                .iter()
                .filter(|ingredient| ingredient.iter().any(|part| !part.is_empty()))
                .cloned()
                .collect(),
        }
    }

    fn is_dirty(&self) -> bool {
        let mut baseline = self.initial.clone();
        baseline
            .ingredients
            .retain(|ingredient| ingredient.iter().any(|part| !part.is_empty()));
        self.to_recipe() != baseline
    }

    fn handle_key(&mut self, key: KeyEvent) -> RecipeFormKeyResult {
        self.error = None;
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('s') => return RecipeFormKeyResult::Submit,
                KeyCode::Char('n') => {
                    self.insert_ingredient();
                    return RecipeFormKeyResult::Continue;
                }
                KeyCode::Char('d') => {
                    self.delete_ingredient();
                    return RecipeFormKeyResult::Continue;
                }
                _ => {}
            }
        }
        match key.code {
            KeyCode::Esc => RecipeFormKeyResult::Cancel,
            KeyCode::Enter => {
                if self.selected_field == RecipeField::Directions {
                    self.directions.push('\n');
                    RecipeFormKeyResult::Continue
                } else {
                    RecipeFormKeyResult::Submit
                }
            }
            KeyCode::Tab | KeyCode::Down => {
                self.next_field();
                RecipeFormKeyResult::Continue
            }
            KeyCode::BackTab | KeyCode::Up => {
                self.previous_field();
                RecipeFormKeyResult::Continue
            }
            KeyCode::Backspace => {
                if let Some(value) = self.active_value_mut() {
                    value.pop();
                }
                RecipeFormKeyResult::Continue
            }
            KeyCode::Delete => {
                if let Some(value) = self.active_value_mut() {
                    value.clear();
                }
                RecipeFormKeyResult::Continue
            }
            KeyCode::Char(c) => {
                if !key.modifiers.contains(KeyModifiers::CONTROL) {
                    if let Some(value) = self.active_value_mut() {
                        value.push(c);
                    }
                }
                RecipeFormKeyResult::Continue
            }
            _ => RecipeFormKeyResult::Continue,
        }
    }

    fn field_order(&self) -> Vec<RecipeField> {
        let mut order = vec![
            RecipeField::Title,
            RecipeField::Author,
            RecipeField::OvenTemp,
            RecipeField::BakeTime,
            RecipeField::Yields,
            RecipeField::PrepTime,
        ];
        for row in 0..self.ingredients.len() {
            for col in 0..INGREDIENT_FIELDS {
                order.push(RecipeField::Ingredient(row, col));
            }
        }
        order.push(RecipeField::Directions);
        order
    }

    fn next_field(&mut self) {
        let order = self.field_order();
        let position = order
            .iter()
            .position(|field| *field == self.selected_field)
            .unwrap_or(0);
        self.selected_field = order[(position + 1) % order.len()];
    }

    fn previous_field(&mut self) {
        let order = self.field_order();
        let position = order
            .iter()
            .position(|field| *field == self.selected_field)
            .unwrap_or(0);
        self.selected_field = order[(position + order.len() - 1) % order.len()];
    }

    fn insert_ingredient(&mut self) {
        let row = match self.selected_field {
            RecipeField::Ingredient(row, _) => {
                let next = row + 1;
                self.ingredients.insert(next, Ingredient::default());
                next
            }
            _ => {
                self.ingredients.push(Ingredient::default());
                self.ingredients.len() - 1
            }
        };
        self.selected_field = RecipeField::Ingredient(row, 0);
    }

    fn delete_ingredient(&mut self) {
        if let RecipeField::Ingredient(row, _) = self.selected_field {
            if row < self.ingredients.len() {
                self.ingredients.remove(row);
            }
            if self.ingredients.is_empty() {
                self.selected_field = RecipeField::Directions;
            } else {
                let row = row.min(self.ingredients.len() - 1);
                self.selected_field = RecipeField::Ingredient(row, 0);
            }
        }
    }

    fn active_value_mut(&mut self) -> Option<&mut String> {
        match self.selected_field {
            RecipeField::Title => Some(&mut self.title),
            RecipeField::Author => Some(&mut self.author),
            RecipeField::OvenTemp => Some(&mut self.details.oven_temp),
            RecipeField::BakeTime => Some(&mut self.details.bake_time),
            RecipeField::Yields => Some(&mut self.details.yields),
            RecipeField::PrepTime => Some(&mut self.details.prep_time),
            RecipeField::Ingredient(row, col) => {
                self.ingredients.get_mut(row).map(|record| &mut record[col])
            }
            RecipeField::Directions => Some(&mut self.directions),
        }
    }
}

const THEME_PRESETS: &[(&str, [&str; 6])] = &[
    (
        "nord",
        ["#5E81AC", "#D08770", "#76B3C5", "#2E3440", "#3B4252", "#ECEFF4"],
    ),
    (
        "gruvbox",
        ["#458588", "#FE8019", "#83A598", "#282828", "#3C3836", "#EBDBB2"],
    ),
    (
        "paper",
        ["#005F87", "#D75F00", "#0087AF", "#EEEEEE", "#E4E4E4", "#444444"],
    ),
];

#[derive(Clone)]
struct Theme {
    name: String,
    primary: Color,
    accent: Color,
    highlight: Color,
    background: Color,
    surface: Color,
    text: Color,
}

impl Theme {
    fn from_hexes(name: &str, hexes: &[&str; 6]) -> Theme {
        Theme {
            name: name.to_string(),
            primary: color_from_hex(hexes[0]).unwrap_or(Color::Blue),
            accent: color_from_hex(hexes[1]).unwrap_or(Color::Yellow),
            highlight: color_from_hex(hexes[2]).unwrap_or(Color::Cyan),
            background: color_from_hex(hexes[3]).unwrap_or(Color::Black),
            surface: color_from_hex(hexes[4]).unwrap_or(Color::DarkGray),
            text: color_from_hex(hexes[5]).unwrap_or(Color::White),
        }
    }

    fn from_name(name: &str) -> Option<Theme> {
        THEME_PRESETS
            .iter()
            .find(|preset| preset.0 == name)
            .map(|preset| Theme::from_hexes(preset.0, &preset.1))
    }

    fn fallback() -> Theme {
        Theme::from_hexes("nord", &THEME_PRESETS[0].1)
    }
}

fn color_from_hex(hex: &str) -> Option<Color> {
    let hex = hex.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(Color::Rgb(r, g, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ingredient(a: &str, b: &str, c: &str) -> Ingredient {
        [a.to_string(), b.to_string(), c.to_string()]
    }

    fn sample_recipe() -> Recipe {
        Recipe {
            title: "Cake".into(),
            author: "Ada".into(),
            directions: "Mix.\nBake.\n".into(),
            details: RecipeDetails {
                oven_temp: "350 F".into(),
                bake_time: "1 hr".into(),
                yields: "8".into(),
                prep_time: "10 min".into(),
            },
            picture: String::new(),
            ingredients: vec![
                ingredient("2", "cups", "flour"),
                ingredient("1", "tsp", "salt"),
            ],
        }
    }

    #[test]
    fn encode_produces_fixed_layout() {
        let recipe = Recipe {
            ingredients: vec![ingredient("2", "cups", "flour")],
            directions: "Mix.\n".into(),
            ..sample_recipe()
        };
        let expected = "<Title>\nCake\n\
                        <Ingredients>\n2\ncups\nflour\n<end>\n\
                        <directions>\nMix.\n<end>\n\
                        <author>\nAda\n\
                        <details>\n350 F\n1 hr\n8\n10 min\n\
                        <pic>\nfoobar\n\
                        <notes>\n";
        assert_eq!(encode_recipe(&recipe), expected);
    }

    #[test]
    fn round_trip_preserves_recipe() {
        let recipe = sample_recipe();
        let parsed = parse_recipe(&encode_recipe(&recipe)).unwrap();
        assert_eq!(parsed.title, recipe.title);
        assert_eq!(parsed.author, recipe.author);
        assert_eq!(parsed.directions, recipe.directions);
        assert_eq!(parsed.details, recipe.details);
        assert_eq!(parsed.ingredients, recipe.ingredients);
    }

    #[test]
    fn picture_does_not_round_trip() {
        let recipe = Recipe {
            picture: "cake.png".into(),
            ..sample_recipe()
        };
        let encoded = encode_recipe(&recipe);
        assert!(encoded.contains("<pic>\nfoobar\n"));
        assert!(!encoded.contains("cake.png"));
        let parsed = parse_recipe(&encoded).unwrap();
        assert_ne!(parsed.picture, recipe.picture);
    }

    #[test]
    fn ingredients_group_in_threes() {
        let text = "<Ingredients>\n2\ncups\nflour\n1\ntsp\nsalt\n";
        let parsed = parse_recipe(text).unwrap();
        assert_eq!(
            parsed.ingredients,
            vec![
                ingredient("2", "cups", "flour"),
                ingredient("1", "tsp", "salt"),
            ]
        );
    }

    #[test]
    fn short_ingredient_group_pads_with_empty_strings() {
        let text = "<Ingredients>\n2\ncups\n";
        let parsed = parse_recipe(text).unwrap();
        assert_eq!(parsed.ingredients, vec![ingredient("2", "cups", "")]);
    }

    #[test]
    fn details_beyond_four_lines_are_discarded() {
        let text = "<details>\n350 F\n1 hr\n8\n10 min\nextra\nmore\n";
        let parsed = parse_recipe(text).unwrap();
        assert_eq!(parsed.details.oven_temp, "350 F");
        assert_eq!(parsed.details.bake_time, "1 hr");
        assert_eq!(parsed.details.yields, "8");
        assert_eq!(parsed.details.prep_time, "10 min");
    }

    #[test]
    fn directions_accumulate_with_newlines() {
        let text = "<directions>\nMix.\nBake.\n";
        let parsed = parse_recipe(text).unwrap();
        assert_eq!(parsed.directions, "Mix.\nBake.\n");
    }

    #[test]
    fn title_and_author_last_line_wins() {
        let text = "<Title>\nFirst\nSecond\n<author>\nAda\nGrace\n";
        let parsed = parse_recipe(text).unwrap();
        assert_eq!(parsed.title, "Second");
        assert_eq!(parsed.author, "Grace");
    }

    #[test]
    fn end_lines_are_ignored_without_changing_section() {
        let text = "<directions>\nMix.\n<end>\nBake.\n";
        let parsed = parse_recipe(text).unwrap();
        assert_eq!(parsed.directions, "Mix.\nBake.\n");
    }

    #[test]
    fn carriage_returns_are_stripped() {
        let text = "<Title>\r\nCake\r\n<author>\r\nAda\r\n";
        let parsed = parse_recipe(text).unwrap();
        assert_eq!(parsed.title, "Cake");
        assert_eq!(parsed.author, "Ada");
    }

    #[test]
    fn content_before_first_marker_is_an_error() {
        let err = parse_recipe("hello\n<Title>\nCake\n").unwrap_err();
        assert!(err.to_string().contains("before first section marker"));
    }

    #[test]
    fn legacy_separator_blank_lines_still_parse() {
        // Older files carry a blank separator line before each <end>. The
        // details section drops it, ingredients and directions absorb it
        // as content.
        let text = "<Title>\nCake\n<Ingredients>\n2\ncups\nflour\n\n<end>\n\
                    <directions>\nMix.\n\n<end>\n<author>\nAda\n\
                    <details>\n350 F\n1 hr\n8\n10 min\n\n<pic>\nfoobar\n<notes>\n";
        let parsed = parse_recipe(text).unwrap();
        assert_eq!(parsed.title, "Cake");
        assert_eq!(parsed.details.prep_time, "10 min");
        assert_eq!(parsed.directions, "Mix.\n\n");
        assert_eq!(
            parsed.ingredients,
            vec![ingredient("2", "cups", "flour"), ingredient("", "", "")]
        );
    }

    #[test]
    fn save_rejects_duplicate_title_and_touches_nothing() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("Desserts")).unwrap();
        let recipe = sample_recipe();
        let outcome =
            save_recipe(root, "Desserts", &recipe, None, &["Cake".to_string()]).unwrap();
        assert_eq!(outcome, SaveOutcome::DuplicateTitle);
        assert!(!recipe_path(root, "Desserts", "Cake").exists());
    }

    #[test]
    fn save_backs_up_existing_file() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("Desserts")).unwrap();
        let mut recipe = sample_recipe();

        assert_eq!(
            save_recipe(root, "Desserts", &recipe, None, &[]).unwrap(),
            SaveOutcome::Saved
        );
        let first_content = fs::read_to_string(recipe_path(root, "Desserts", "Cake")).unwrap();

        recipe.author = "Grace".into();
        assert_eq!(
            save_recipe(root, "Desserts", &recipe, Some("Cake"), &[]).unwrap(),
            SaveOutcome::Saved
        );
        let backup = backup_path(&recipe_path(root, "Desserts", "Cake"));
        assert_eq!(fs::read_to_string(&backup).unwrap(), first_content);

        // A third save silently replaces the previous backup.
        recipe.author = "Edsger".into();
        assert_eq!(
            save_recipe(root, "Desserts", &recipe, Some("Cake"), &[]).unwrap(),
            SaveOutcome::Saved
        );
        assert!(fs::read_to_string(&backup).unwrap().contains("Grace"));
    }

    #[test]
    fn renaming_backs_up_the_old_title_file() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("Desserts")).unwrap();
        let mut recipe = sample_recipe();
        save_recipe(root, "Desserts", &recipe, None, &[]).unwrap();

        recipe.title = "Torte".into();
        save_recipe(root, "Desserts", &recipe, Some("Cake"), &[]).unwrap();

        assert!(!recipe_path(root, "Desserts", "Cake").exists());
        assert!(backup_path(&recipe_path(root, "Desserts", "Cake")).exists());
        assert!(recipe_path(root, "Desserts", "Torte").exists());
    }

    #[test]
    fn scan_builds_categories_from_directories() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("Desserts")).unwrap();
        fs::create_dir(root.join("Mains")).unwrap();
        fs::write(
            root.join("Desserts/cake.recipe"),
            encode_recipe(&sample_recipe()),
        )
        .unwrap();
        fs::write(root.join("Desserts/notes.txt"), "ignored").unwrap();
        fs::write(root.join("stray.recipe"), "ignored").unwrap();
        fs::create_dir(root.join("Desserts/nested")).unwrap();

        let scan = scan_catalog(root).unwrap();
        assert!(scan.warnings.is_empty());
        assert_eq!(scan.categories.len(), 2);
        assert_eq!(scan.categories[0].name, "Desserts");
        assert_eq!(scan.categories[0].recipes.len(), 1);
        assert_eq!(scan.categories[0].recipes[0].title, "Cake");
        assert_eq!(scan.categories[1].name, "Mains");
        assert!(scan.categories[1].recipes.is_empty());
    }

    #[test]
    fn scan_skips_malformed_files_with_a_warning() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("Desserts")).unwrap();
        fs::write(
            root.join("Desserts/good.recipe"),
            encode_recipe(&sample_recipe()),
        )
        .unwrap();
        fs::write(root.join("Desserts/bad.recipe"), "content with no marker\n").unwrap();

        let scan = scan_catalog(root).unwrap();
        assert_eq!(scan.categories[0].recipes.len(), 1);
        assert_eq!(scan.warnings.len(), 1);
        assert!(scan.warnings[0].contains("bad.recipe"));
    }

    #[test]
    fn scan_titles_untitled_files_from_the_filename() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("Desserts")).unwrap();
        fs::write(root.join("Desserts/mystery.recipe"), "<directions>\nStir.\n").unwrap();

        let scan = scan_catalog(root).unwrap();
        assert_eq!(scan.categories[0].recipes[0].title, "mystery");
    }

    #[test]
    fn scan_fails_when_root_is_missing() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nowhere");
        assert!(scan_catalog(&missing).is_err());
    }

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    #[test]
    fn form_field_order_walks_ingredients_then_directions() {
        let mut form = RecipeFormState::new(0, "Desserts".into(), None, sample_recipe());
        let order = form.field_order();
        assert_eq!(order[0], RecipeField::Title);
        assert_eq!(order[6], RecipeField::Ingredient(0, 0));
        assert_eq!(*order.last().unwrap(), RecipeField::Directions);

        for _ in 0..order.len() {
            form.next_field();
        }
        assert_eq!(form.selected_field, RecipeField::Title);
    }

    #[test]
    fn form_typing_marks_dirty_and_edits_the_active_field() {
        let mut form = RecipeFormState::new(0, "Desserts".into(), None, Recipe::default());
        assert!(!form.is_dirty());
        form.handle_key(press(KeyCode::Char('P')));
        form.handle_key(press(KeyCode::Char('i')));
        form.handle_key(press(KeyCode::Char('e')));
        assert_eq!(form.title, "Pie");
        assert!(form.is_dirty());
        form.handle_key(press(KeyCode::Backspace));
        assert_eq!(form.title, "Pi");
    }

    #[test]
    fn form_enter_submits_except_in_directions() {
        let mut form = RecipeFormState::new(0, "Desserts".into(), None, sample_recipe());
        assert!(matches!(
            form.handle_key(press(KeyCode::Enter)),
            RecipeFormKeyResult::Submit
        ));
        form.selected_field = RecipeField::Directions;
        assert!(matches!(
            form.handle_key(press(KeyCode::Enter)),
            RecipeFormKeyResult::Continue
        ));
        assert!(form.directions.ends_with('\n'));
        assert!(matches!(
            form.handle_key(ctrl('s')),
            RecipeFormKeyResult::Submit
        ));
    }

    #[test]
    fn form_ingredient_rows_insert_and_delete() {
        let mut form = RecipeFormState::new(0, "Desserts".into(), None, sample_recipe());
        form.selected_field = RecipeField::Ingredient(0, 1);
        form.handle_key(ctrl('n'));
        assert_eq!(form.ingredients.len(), 3);
        assert_eq!(form.selected_field, RecipeField::Ingredient(1, 0));
        assert_eq!(form.ingredients[1], Ingredient::default());

        form.handle_key(ctrl('d'));
        assert_eq!(form.ingredients.len(), 2);
        assert_eq!(form.selected_field, RecipeField::Ingredient(1, 0));

        form.handle_key(ctrl('d'));
        form.handle_key(ctrl('d'));
        assert!(form.ingredients.is_empty());
        assert_eq!(form.selected_field, RecipeField::Directions);
    }

    #[test]
    fn form_drops_all_empty_ingredient_rows_on_save() {
        let blank = Recipe {
            ingredients: vec![Ingredient::default()],
            ..Recipe::default()
        };
        let mut form = RecipeFormState::new(0, "Desserts".into(), None, blank);
        assert!(!form.is_dirty());
        form.title = "Pie".into();
        let recipe = form.to_recipe();
        assert!(recipe.ingredients.is_empty());
    }

    fn browser_app(root: &Path, settings_file: PathBuf) -> AppState {
        let mut app = AppState {
            root: root.to_path_buf(),
            categories: vec![CategoryState {
                name: "Desserts".into(),
                expanded: true,
                recipes: Vec::new(),
            }],
            display_entries: Vec::new(),
            current_index: 0,
            should_quit: false,
            status_message: None,
            active_popup: None,
            paths: AppPaths { settings_file },
            theme: Theme::fallback(),
            theme_key: THEME_PRESETS[0].0.to_string(),
            settings_root: None,
        };
        app.rebuild_display();
        app
    }

    #[test]
    fn theme_cycle_keeps_a_one_run_root_out_of_settings() {
        let dir = tempdir().unwrap();
        let settings_file = dir.path().join("settings.json");
        let mut app = browser_app(&dir.path().join("override-root"), settings_file.clone());
        app.settings_root = Some("/srv/recipes".into());

        app.cycle_theme();

        let saved: AppSettings =
            serde_json::from_str(&fs::read_to_string(&settings_file).unwrap()).unwrap();
        assert_eq!(saved.root.as_deref(), Some("/srv/recipes"));
        assert_eq!(saved.theme_key.as_deref(), Some(THEME_PRESETS[1].0));
    }

    #[test]
    fn theme_cycle_without_a_saved_root_leaves_settings_root_unset() {
        let dir = tempdir().unwrap();
        let settings_file = dir.path().join("settings.json");
        let mut app = browser_app(&dir.path().join("override-root"), settings_file.clone());

        app.cycle_theme();

        let saved: AppSettings =
            serde_json::from_str(&fs::read_to_string(&settings_file).unwrap()).unwrap();
        assert_eq!(saved.root, None);
    }

    #[test]
    fn theme_cycle_reports_a_failed_settings_write() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let mut app = browser_app(dir.path(), blocker.join("settings.json"));

        app.cycle_theme();

        assert_eq!(app.theme_key, THEME_PRESETS[1].0);
        assert!(app.status_text().contains("settings not saved"));
    }

    #[test]
    fn titles_with_path_separators_are_rejected() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("Desserts")).unwrap();
        let mut app = browser_app(dir.path(), dir.path().join("settings.json"));

        let mut form = RecipeFormState::new(0, "Desserts".into(), None, Recipe::default());
        form.title = "../Breads/Loaf".into();
        let err = app.apply_recipe_form(&form).unwrap_err();
        assert!(err.contains("path separators"));

        form.title = "Pies\\Apple".into();
        assert!(app.apply_recipe_form(&form).is_err());
        assert!(fs::read_dir(dir.path().join("Desserts"))
            .unwrap()
            .next()
            .is_none());
    }
}
