use anyhow::Result;
use chrono::Utc;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use finplan::entities::Frequency;
use finplan::format::{money, percent};
use finplan::{AnnualCpfSummary, CpfCalculator, FinancialSnapshot, NetWorthPoint, Projection};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Projection,
    BalanceSheet,
    Cpf,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Projection => Page::BalanceSheet,
            Page::BalanceSheet => Page::Cpf,
            Page::Cpf => Page::Projection,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Projection => Page::Cpf,
            Page::BalanceSheet => Page::Projection,
            Page::Cpf => Page::BalanceSheet,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Projection => "Projection",
            Page::BalanceSheet => "Balance Sheet",
            Page::Cpf => "CPF",
        }
    }
}

/// One line of the balance sheet table
#[derive(Debug, Clone, PartialEq)]
pub struct SheetLine {
    pub section: &'static str,
    pub name: String,
    pub detail: String,
    pub amount: f64,
}

pub struct App {
    pub snapshot: FinancialSnapshot,
    pub projection: Projection,
    pub cpf: Option<AnnualCpfSummary>,
    pub sheet: Vec<SheetLine>,
    pub current_page: Page,
    pub projection_state: TableState,
    pub sheet_state: TableState,
    pub show_detail: bool,
}

impl App {
    pub fn new(snapshot: FinancialSnapshot, projection: Projection, calculator: &CpfCalculator) -> Self {
        let mut projection_state = TableState::default();
        if !projection.points.is_empty() {
            projection_state.select(Some(0));
        }

        let sheet = balance_sheet(&snapshot);
        let mut sheet_state = TableState::default();
        if !sheet.is_empty() {
            sheet_state.select(Some(0));
        }

        let cpf = cpf_outlook(&snapshot, calculator);

        Self {
            snapshot,
            projection,
            cpf,
            sheet,
            current_page: Page::Projection,
            projection_state,
            sheet_state,
            show_detail: false,
        }
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn selected_point(&self) -> Option<&NetWorthPoint> {
        self.projection_state
            .selected()
            .and_then(|i| self.projection.points.get(i))
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    /// Row count and table state for the page being shown
    fn active_table(&mut self) -> Option<(usize, &mut TableState)> {
        match self.current_page {
            Page::Projection => Some((self.projection.points.len(), &mut self.projection_state)),
            Page::BalanceSheet => Some((self.sheet.len(), &mut self.sheet_state)),
            Page::Cpf => None,
        }
    }

    pub fn next(&mut self) {
        self.step(1, true);
    }

    pub fn previous(&mut self) {
        self.step(-1, true);
    }

    pub fn page_down(&mut self) {
        self.step(10, false);
    }

    pub fn page_up(&mut self) {
        self.step(-10, false);
    }

    pub fn first(&mut self) {
        if let Some((len, state)) = self.active_table() {
            if len > 0 {
                state.select(Some(0));
            }
        }
    }

    pub fn last(&mut self) {
        if let Some((len, state)) = self.active_table() {
            if len > 0 {
                state.select(Some(len - 1));
            }
        }
    }

    /// Single steps wrap around, page jumps stop at the ends
    fn step(&mut self, delta: i64, wrap: bool) {
        let Some((len, state)) = self.active_table() else {
            return;
        };
        if len == 0 {
            return;
        }
        let current = state.selected().unwrap_or(0) as i64;
        let len = len as i64;
        let target = current + delta;
        let i = if wrap {
            target.rem_euclid(len)
        } else {
            target.clamp(0, len - 1)
        };
        state.select(Some(i as usize));
    }
}

fn balance_sheet(snapshot: &FinancialSnapshot) -> Vec<SheetLine> {
    let mut lines = Vec::new();
    for a in &snapshot.assets {
        lines.push(SheetLine {
            section: "Asset",
            name: a.name.clone(),
            detail: a.category.as_str().to_string(),
            amount: a.value,
        });
    }
    let cpf = &snapshot.profile.cpf;
    for (account, balance) in [("CPF OA", cpf.oa), ("CPF SA", cpf.sa), ("CPF MA", cpf.ma)] {
        if balance > 0.0 {
            lines.push(SheetLine {
                section: "CPF",
                name: account.to_string(),
                detail: String::new(),
                amount: balance,
            });
        }
    }
    for l in &snapshot.liabilities {
        lines.push(SheetLine {
            section: "Liability",
            name: l.name.clone(),
            detail: format!("{} @ {}", l.kind.as_str(), percent(l.interest_rate)),
            amount: -l.balance,
        });
    }
    for i in &snapshot.incomes {
        lines.push(SheetLine {
            section: "Income",
            name: i.name.clone(),
            detail: i.frequency.as_str().to_string(),
            amount: i.amount,
        });
    }
    for e in &snapshot.expenses {
        lines.push(SheetLine {
            section: "Expense",
            name: e.name.clone(),
            detail: e.frequency.as_str().to_string(),
            amount: -e.amount,
        });
    }
    lines
}

/// This year's CPF from the stored employment incomes. None without an age or a CPF salary.
fn cpf_outlook(snapshot: &FinancialSnapshot, calculator: &CpfCalculator) -> Option<AnnualCpfSummary> {
    let age = snapshot.profile.age_on(Utc::now().date_naive())?;
    let (mut salary, mut bonus) = (0.0, 0.0);
    for income in snapshot.incomes.iter().filter(|i| i.attracts_cpf()) {
        match income.frequency {
            Frequency::Monthly => salary += income.amount,
            _ => bonus += income.annual_amount(),
        }
    }
    if salary <= 0.0 {
        return None;
    }
    calculator.annual_summary(salary, bonus, age).ok()
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Enter => app.toggle_detail(),
                KeyCode::Tab => {
                    if key.modifiers.contains(KeyModifiers::SHIFT) {
                        app.previous_page();
                    } else {
                        app.next_page();
                    }
                }
                KeyCode::BackTab => app.previous_page(),
                KeyCode::Char('1') => app.current_page = Page::Projection,
                KeyCode::Char('2') => app.current_page = Page::BalanceSheet,
                KeyCode::Char('3') => app.current_page = Page::Cpf,
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => app.first(),
                KeyCode::End => app.last(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    if app.show_detail && app.current_page == Page::Projection {
        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[1]);

        render_projection(f, content_chunks[0], app);
        render_point_detail(f, content_chunks[1], app);
    } else {
        match app.current_page {
            Page::Projection => render_projection(f, chunks[1], app),
            Page::BalanceSheet => render_balance_sheet(f, chunks[1], app),
            Page::Cpf => render_cpf(f, chunks[1], app),
        }
    }

    render_status_bar(f, chunks[2], app);
}

fn amount_color(amount: f64) -> Color {
    if amount < 0.0 {
        Color::Red
    } else {
        Color::Green
    }
}

fn header_row(titles: &[&'static str]) -> Row<'static> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    });
    Row::new(cells).style(Style::default().bg(Color::DarkGray)).height(1)
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let pages = [Page::Projection, Page::BalanceSheet, Page::Cpf];

    let mut tab_spans = vec![];
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    let net_worth = app.snapshot.net_worth();
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Net worth: {}", money(net_worth)),
        Style::default().fg(amount_color(net_worth)),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("↑ {}/mo", money(app.snapshot.monthly_income())),
        Style::default().fg(Color::Green),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("↓ {}/mo", money(app.snapshot.monthly_expenses())),
        Style::default().fg(Color::Red),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn render_projection(f: &mut Frame, area: Rect, app: &mut App) {
    let header = header_row(&["Year", "Date", "Age", "Cash", "Assets", "CPF", "Liabilities", "Net Worth"]);

    let rows = app.projection.points.iter().map(|p| {
        Row::new(vec![
            Cell::from(p.year.to_string()),
            Cell::from(p.date.format("%Y-%m").to_string()),
            Cell::from(p.age.map(|a| a.to_string()).unwrap_or_default()),
            Cell::from(money(p.cash)).style(Style::default().fg(amount_color(p.cash))),
            Cell::from(money(p.assets)),
            Cell::from(money(p.cpf.total())),
            Cell::from(money(p.liabilities)).style(Style::default().fg(Color::Red)),
            Cell::from(money(p.net_worth)).style(Style::default().fg(amount_color(p.net_worth))),
        ])
        .height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(5),
            Constraint::Length(8),
            Constraint::Length(4),
            Constraint::Length(16),
            Constraint::Length(16),
            Constraint::Length(16),
            Constraint::Length(16),
            Constraint::Length(16),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(format!(" Net Worth - {} years ", app.projection.summary.years)),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.projection_state);
}

fn render_point_detail(f: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Year Details ");

    let Some(point) = app.selected_point() else {
        f.render_widget(Paragraph::new("No year selected").block(block), area);
        return;
    };

    let label = |text: &'static str| {
        Span::styled(text, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    };

    let mut content = vec![
        Line::from(""),
        Line::from(vec![label("  Date: "), Span::raw(point.date.format("%b %Y").to_string())]),
        Line::from(vec![
            label("  Net worth: "),
            Span::styled(money(point.net_worth), Style::default().fg(amount_color(point.net_worth))),
        ]),
        Line::from(""),
        Line::from(vec![label("  Income (year): "), Span::raw(money(point.income))]),
        Line::from(vec![label("  Expenses (year): "), Span::raw(money(point.expenses))]),
        Line::from(""),
        Line::from("  ─────────────────────────────────────"),
        Line::from(vec![Span::styled(
            "  CPF",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        )]),
        Line::from(vec![label("  OA: "), Span::raw(money(point.cpf.oa))]),
        Line::from(vec![label("  SA: "), Span::raw(money(point.cpf.sa))]),
        Line::from(vec![label("  MA: "), Span::raw(money(point.cpf.ma))]),
    ];

    if !app.projection.warnings.is_empty() {
        content.push(Line::from(""));
        content.push(Line::from("  ─────────────────────────────────────"));
        for warning in &app.projection.warnings {
            content.push(Line::from(Span::styled(
                format!("  ⚠ {}", warning),
                Style::default().fg(Color::Yellow),
            )));
        }
    }

    f.render_widget(Paragraph::new(content).block(block), area);
}

fn render_balance_sheet(f: &mut Frame, area: Rect, app: &mut App) {
    let header = header_row(&["Section", "Name", "Detail", "Amount"]);

    let rows = app.sheet.iter().map(|line| {
        Row::new(vec![
            Cell::from(line.section),
            Cell::from(truncate(&line.name, 30)),
            Cell::from(truncate(&line.detail, 24)),
            Cell::from(money(line.amount)).style(Style::default().fg(amount_color(line.amount))),
        ])
        .height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(10),
            Constraint::Length(32),
            Constraint::Length(26),
            Constraint::Length(18),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(format!(
                " Balance Sheet - assets {} | liabilities {} ",
                money(app.snapshot.total_assets() + app.snapshot.profile.cpf.total()),
                money(app.snapshot.total_liabilities())
            )),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.sheet_state);
}

fn render_cpf(f: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::White))
        .title(" CPF - This Year ");

    let Some(cpf) = &app.cpf else {
        let hint = Paragraph::new(vec![
            Line::from(""),
            Line::from("  No CPF outlook available."),
            Line::from("  Set a birth date on the profile and mark a monthly salary as CPF-applicable."),
        ])
        .block(block);
        f.render_widget(hint, area);
        return;
    };

    let row = |name: &'static str, amount: f64| {
        Line::from(vec![
            Span::styled(format!("  {:<16}", name), Style::default().fg(Color::Cyan)),
            Span::raw(format!("{:>16}", money(amount))),
        ])
    };

    let content = vec![
        Line::from(""),
        Line::from(Span::styled(
            format!("  Age {}", cpf.age),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        row("Gross wages", cpf.gross_wages),
        row("Employee", cpf.employee),
        row("Employer", cpf.employer),
        row("Total", cpf.total),
        row("Take-home", cpf.take_home),
        Line::from(""),
        Line::from("  ─────────────────────────────────────"),
        row("Ordinary (OA)", cpf.allocation.oa),
        row("Special (SA)", cpf.allocation.sa),
        row("MediSave (MA)", cpf.allocation.ma),
    ];

    f.render_widget(Paragraph::new(content).block(block), area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &mut App) {
    let position = match app.active_table() {
        Some((len, state)) => format!(" Row: {}/{} ", state.selected().map(|i| i + 1).unwrap_or(0), len),
        None => " ".to_string(),
    };

    let mut status_spans = vec![Span::styled(position, Style::default().fg(Color::Cyan))];

    if let Some(date) = app.projection.summary.first_negative_cash {
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled(
            format!("Cash negative from {}", date.format("%b %Y")),
            Style::default().fg(Color::Red),
        ));
    }

    status_spans.push(Span::raw(" | "));
    for (key, action) in [("Enter", " Details | "), ("Tab", " Page | "), ("↑/↓", " Nav | "), ("PgUp/PgDn", " Fast | ")] {
        status_spans.push(Span::styled(key, Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(action));
    }
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
