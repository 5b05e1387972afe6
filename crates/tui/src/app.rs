//! Terminal application: screens, key handling, and the event loop.
//!
//! All network work happens in spawned tasks; each flow lives behind a
//! `tokio::sync::Mutex` and a trigger that finds the lock held is
//! dropped rather than queued. Results come back into the event loop
//! as [`AppEvent`]s.

use std::{io, sync::Arc, thread, time::Duration};

use anyhow::{Context, Result};
use chrono::Local;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
    Frame, Terminal,
};
use tokio::{
    spawn,
    sync::{mpsc, Mutex},
};
use tracing::{error, info};

use jmart_core::{
    api::{ApiClient, CategoryCheck, LoginResponse},
    catalog::Catalog,
    config::AppConfig,
    exchange::{ExchangeOutcome, ExchangePhase, SellQuote, TokenExchange},
    models::{Category, Transaction, User, WasteItem},
    notify::BalanceNotifier,
    purchase::{clamp_quantity, CategoryPurchase, PurchaseOutcome},
    session::SessionStore,
    upload::{ItemDraft, UploadFlow, UploadOutcome, UploadPhase},
};

const TICK_RATE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Login,
    Signup,
    Shop,
    Market,
    Listings,
    History,
    Upload,
}

impl Screen {
    const TABS: [Screen; 5] = [
        Screen::Shop,
        Screen::Market,
        Screen::Listings,
        Screen::History,
        Screen::Upload,
    ];

    fn title(self) -> &'static str {
        match self {
            Screen::Login => "Login",
            Screen::Signup => "Sign up",
            Screen::Shop => "Token Shop",
            Screen::Market => "Marketplace",
            Screen::Listings => "My Listings",
            Screen::History => "History",
            Screen::Upload => "Upload",
        }
    }

    fn next(self) -> Screen {
        let idx = Self::TABS.iter().position(|tab| *tab == self).unwrap_or(0);
        Self::TABS[(idx + 1) % Self::TABS.len()]
    }

    fn previous(self) -> Screen {
        let idx = Self::TABS.iter().position(|tab| *tab == self).unwrap_or(0);
        Self::TABS[(idx + Self::TABS.len() - 1) % Self::TABS.len()]
    }
}

enum AppEvent {
    Input(Event),
    Tick,
    BalanceHint,
    SessionRefreshed,
    LoggedIn(Result<LoginResponse, String>),
    OtpSent(Result<(), String>),
    SignedUp(Result<(), String>),
    CatalogLoaded(Result<Catalog, String>),
    ListingsLoaded(Result<Vec<WasteItem>, String>),
    HistoryLoaded(Result<Vec<Transaction>, String>),
    ExchangeDone(Result<String, String>),
    PurchaseDone(Result<String, String>),
    UploadDone(UploadReport),
}

enum UploadReport {
    Done,
    /// Carries the draft that was actually verified, not whatever the
    /// form holds by the time the response arrives.
    NeedsOverride(CategoryCheck, ItemDraft),
    Blocked(String),
    Failed(String),
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginField {
    Email,
    Password,
}

#[derive(Default)]
struct LoginForm {
    email: String,
    password: String,
    focus: Option<LoginField>,
    pending: bool,
}

impl LoginForm {
    fn focused(&mut self) -> &mut String {
        match self.focus.unwrap_or(LoginField::Email) {
            LoginField::Email => &mut self.email,
            LoginField::Password => &mut self.password,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignupField {
    Username,
    Email,
    Password,
    Otp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignupStage {
    /// Collecting account details; Enter requests an OTP.
    Details,
    /// An OTP is out; Enter verifies it and creates the account.
    Otp,
}

struct SignupForm {
    username: String,
    email: String,
    password: String,
    otp: String,
    focus: SignupField,
    stage: SignupStage,
    pending: bool,
}

impl Default for SignupForm {
    fn default() -> Self {
        Self {
            username: String::new(),
            email: String::new(),
            password: String::new(),
            otp: String::new(),
            focus: SignupField::Username,
            stage: SignupStage::Details,
            pending: false,
        }
    }
}

impl SignupForm {
    fn focused(&mut self) -> &mut String {
        match self.stage {
            SignupStage::Otp => &mut self.otp,
            SignupStage::Details => match self.focus {
                SignupField::Username => &mut self.username,
                SignupField::Email => &mut self.email,
                SignupField::Password | SignupField::Otp => &mut self.password,
            },
        }
    }

    fn validate_details(&self) -> Result<(), String> {
        if self.username.trim().is_empty() {
            return Err("Username is required.".to_string());
        }
        if !self.email.contains('@') {
            return Err("Invalid email address.".to_string());
        }
        if self.password.is_empty() {
            return Err("Password is required.".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShopFocus {
    Packs,
    BuyAmount,
    SellAmount,
}

struct ShopForm {
    buy_amount: String,
    sell_amount: String,
    focus: ShopFocus,
    pack_cursor: usize,
    pending: bool,
}

impl Default for ShopForm {
    fn default() -> Self {
        Self {
            buy_amount: String::new(),
            sell_amount: String::new(),
            focus: ShopFocus::Packs,
            pack_cursor: 0,
            pending: false,
        }
    }
}

#[derive(Default)]
struct MarketForm {
    cursor: usize,
    quantity: String,
    pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadField {
    Description,
    ImageUrl,
    Category,
    Amount,
}

struct UploadForm {
    description: String,
    image_url: String,
    category_idx: usize,
    amount: String,
    focus: UploadField,
    pending: bool,
}

impl Default for UploadForm {
    fn default() -> Self {
        Self {
            description: String::new(),
            image_url: String::new(),
            category_idx: 0,
            amount: String::new(),
            focus: UploadField::Description,
            pending: false,
        }
    }
}

impl UploadForm {
    fn category(&self) -> Category {
        Category::ALL[self.category_idx % Category::ALL.len()]
    }

    fn draft(&self) -> Result<ItemDraft, String> {
        let amount_kg = self
            .amount
            .trim()
            .parse::<f64>()
            .map_err(|_| "Enter a valid weight in kilograms.".to_string())?;
        Ok(ItemDraft {
            description: self.description.clone(),
            image_url: self.image_url.clone(),
            category: self.category(),
            amount_kg,
        })
    }
}

struct SellModal {
    quote: SellQuote,
    agreed: bool,
}

struct OverrideModal {
    check: CategoryCheck,
    draft: ItemDraft,
}

/// Terminal frontend for the marketplace client.
pub struct JmartApp {
    config: AppConfig,
    api: ApiClient,
    session: Arc<SessionStore>,
    notifier: BalanceNotifier,
    exchange: Arc<Mutex<TokenExchange>>,
    purchase: Arc<Mutex<CategoryPurchase>>,
    upload_flow: Arc<Mutex<UploadFlow>>,
    screen: Screen,
    status: String,
    should_quit: bool,
    event_tx: Option<mpsc::Sender<AppEvent>>,
    login: LoginForm,
    signup: SignupForm,
    shop: ShopForm,
    market: MarketForm,
    upload: UploadForm,
    catalog: Option<Catalog>,
    listings: Vec<WasteItem>,
    history: Vec<Transaction>,
    sell_modal: Option<SellModal>,
    override_modal: Option<OverrideModal>,
}

impl JmartApp {
    /// Assemble the application around an already-initialized session.
    pub fn new(
        config: AppConfig,
        api: ApiClient,
        session: SessionStore,
        notifier: BalanceNotifier,
    ) -> Self {
        let exchange = Arc::new(Mutex::new(TokenExchange::new(
            config.clone(),
            notifier.clone(),
        )));
        let purchase = Arc::new(Mutex::new(CategoryPurchase::new(notifier.clone())));
        let upload_flow = Arc::new(Mutex::new(UploadFlow::new(config.clone())));
        let screen = if session.current().is_some() {
            Screen::Shop
        } else {
            Screen::Login
        };
        Self {
            config,
            api,
            session: Arc::new(session),
            notifier,
            exchange,
            purchase,
            upload_flow,
            screen,
            status: "Ready".to_string(),
            should_quit: false,
            event_tx: None,
            login: LoginForm::default(),
            signup: SignupForm::default(),
            shop: ShopForm::default(),
            market: MarketForm::default(),
            upload: UploadForm::default(),
            catalog: None,
            listings: Vec::new(),
            history: Vec::new(),
            sell_modal: None,
            override_modal: None,
        }
    }

    /// Run the terminal UI until the user quits.
    pub async fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode().context("failed to enter raw mode")?;
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).context("failed to create terminal")?;
        terminal.hide_cursor()?;
        terminal.clear()?;

        let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(128);
        spawn_input_thread(event_tx.clone());
        spawn_balance_listener(self.notifier.clone(), event_tx.clone());
        self.event_tx = Some(event_tx);

        if self.session.current().is_some() {
            self.dispatch_session_refresh();
            self.dispatch_catalog_load();
        }

        loop {
            terminal.draw(|frame| self.draw(frame))?;
            if self.should_quit {
                break;
            }
            let maybe_event = event_rx.recv().await;
            if !self.process_app_event(maybe_event) {
                break;
            }
            if self.should_quit {
                // Draw once more is pointless; tear down immediately.
                break;
            }
        }

        restore_terminal(&mut terminal)?;
        self.event_tx = None;
        Ok(())
    }

    fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    fn event_tx(&self) -> mpsc::Sender<AppEvent> {
        self.event_tx
            .clone()
            .unwrap_or_else(|| mpsc::channel(1).0)
    }

    /// Apply one event to the app state. Returns `false` when every
    /// sender is gone and the loop should end.
    fn process_app_event(&mut self, maybe_event: Option<AppEvent>) -> bool {
        match maybe_event {
            Some(AppEvent::Input(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                self.handle_key(key);
                true
            }
            Some(AppEvent::Input(_) | AppEvent::Tick | AppEvent::SessionRefreshed) => true,
            Some(AppEvent::BalanceHint) => {
                self.dispatch_session_refresh();
                true
            }
            Some(AppEvent::LoggedIn(result)) => {
                self.login.pending = false;
                match result {
                    Ok(response) => self.adopt_login(response),
                    Err(message) => self.set_status(message),
                }
                true
            }
            Some(AppEvent::OtpSent(result)) => {
                self.signup.pending = false;
                match result {
                    Ok(()) => {
                        self.signup.stage = SignupStage::Otp;
                        self.signup.focus = SignupField::Otp;
                        self.set_status(format!("OTP sent to {}.", self.signup.email.trim()));
                    }
                    Err(message) => self.set_status(message),
                }
                true
            }
            Some(AppEvent::SignedUp(result)) => {
                self.signup.pending = false;
                match result {
                    Ok(()) => {
                        self.login.email = self.signup.email.trim().to_string();
                        self.signup = SignupForm::default();
                        self.screen = Screen::Login;
                        self.set_status("Account created. Please log in.");
                    }
                    Err(message) => self.set_status(message),
                }
                true
            }
            Some(AppEvent::CatalogLoaded(result)) => {
                match result {
                    Ok(catalog) => {
                        if self.market.cursor >= catalog.groups.len() {
                            self.market.cursor = catalog.groups.len().saturating_sub(1);
                        }
                        self.catalog = Some(catalog);
                    }
                    Err(message) => self.set_status(message),
                }
                true
            }
            Some(AppEvent::ListingsLoaded(result)) => {
                match result {
                    Ok(items) => self.listings = items,
                    Err(message) => self.set_status(message),
                }
                true
            }
            Some(AppEvent::HistoryLoaded(result)) => {
                match result {
                    Ok(transactions) => self.history = transactions,
                    Err(message) => self.set_status(message),
                }
                true
            }
            Some(AppEvent::ExchangeDone(result)) => {
                self.shop.pending = false;
                match result {
                    Ok(summary) => {
                        if !summary.is_empty() {
                            self.set_status(summary);
                        }
                        self.shop.buy_amount.clear();
                        self.shop.sell_amount.clear();
                        self.sell_modal = None;
                    }
                    Err(message) => self.set_status(message),
                }
                true
            }
            Some(AppEvent::PurchaseDone(result)) => {
                self.market.pending = false;
                match result {
                    Ok(message) => {
                        self.set_status(message);
                        self.market.quantity.clear();
                        // Concurrent buyers may have changed availability;
                        // re-derive the catalog instead of patching it.
                        self.dispatch_catalog_load();
                    }
                    Err(message) => self.set_status(message),
                }
                true
            }
            Some(AppEvent::UploadDone(report)) => {
                self.upload.pending = false;
                match report {
                    UploadReport::Done => {
                        self.set_status("Waste item uploaded successfully!");
                        self.upload = UploadForm::default();
                        self.override_modal = None;
                    }
                    UploadReport::NeedsOverride(check, draft) => {
                        self.override_modal = Some(OverrideModal { check, draft });
                    }
                    UploadReport::Blocked(message) | UploadReport::Failed(message) => {
                        self.override_modal = None;
                        self.set_status(message);
                    }
                    UploadReport::Ignored => {}
                }
                true
            }
            None => false,
        }
    }

    fn adopt_login(&mut self, response: LoginResponse) {
        let username = response.user.username.clone();
        if let Err(err) = self.session.login(response.user, response.access_token) {
            error!("failed to persist session: {err}");
            self.set_status(format!("Login failed: {err}"));
            return;
        }
        info!(user = %username, "logged in");
        self.set_status(format!("Welcome, {username}"));
        self.login = LoginForm::default();
        self.screen = Screen::Shop;
        self.dispatch_catalog_load();
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Char('q') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return;
        }
        if self.sell_modal.is_some() {
            self.handle_sell_modal_key(key);
            return;
        }
        if self.override_modal.is_some() {
            self.handle_override_modal_key(key);
            return;
        }
        match self.screen {
            Screen::Login => self.handle_login_key(key),
            Screen::Signup => self.handle_signup_key(key),
            Screen::Shop => self.handle_shop_key(key),
            Screen::Market => self.handle_market_key(key),
            Screen::Listings | Screen::History => self.handle_list_key(key),
            Screen::Upload => self.handle_upload_key(key),
        }
    }

    fn switch_screen(&mut self, screen: Screen) {
        self.screen = screen;
        match screen {
            Screen::Market => self.dispatch_catalog_load(),
            Screen::Listings => self.dispatch_listings_load(),
            Screen::History => self.dispatch_history_load(),
            _ => {}
        }
    }

    fn handle_global_nav(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Tab => {
                self.switch_screen(self.screen.next());
                true
            }
            KeyCode::BackTab => {
                self.switch_screen(self.screen.previous());
                true
            }
            KeyCode::Char('l') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                if let Err(err) = self.session.logout() {
                    self.set_status(format!("Logout failed: {err}"));
                } else {
                    self.set_status("Logged out.");
                    self.screen = Screen::Login;
                }
                true
            }
            KeyCode::Esc => {
                self.should_quit = true;
                true
            }
            _ => false,
        }
    }

    fn handle_login_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            if key.code == KeyCode::Char('s') {
                self.screen = Screen::Signup;
            }
            return;
        }
        match key.code {
            KeyCode::Esc => self.should_quit = true,
            KeyCode::Tab | KeyCode::Down => {
                self.login.focus = Some(match self.login.focus {
                    Some(LoginField::Email) => LoginField::Password,
                    _ => LoginField::Email,
                });
            }
            KeyCode::Up => {
                self.login.focus = Some(match self.login.focus {
                    Some(LoginField::Password) => LoginField::Email,
                    _ => LoginField::Password,
                });
            }
            KeyCode::Enter => self.dispatch_login(),
            KeyCode::Backspace => {
                self.login.focused().pop();
            }
            KeyCode::Char(c) => {
                self.login.focused().push(c);
            }
            _ => {}
        }
    }

    fn handle_signup_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.signup = SignupForm::default();
                self.screen = Screen::Login;
            }
            KeyCode::Tab | KeyCode::Down if self.signup.stage == SignupStage::Details => {
                self.signup.focus = match self.signup.focus {
                    SignupField::Username => SignupField::Email,
                    SignupField::Email => SignupField::Password,
                    SignupField::Password | SignupField::Otp => SignupField::Username,
                };
            }
            KeyCode::Up if self.signup.stage == SignupStage::Details => {
                self.signup.focus = match self.signup.focus {
                    SignupField::Username => SignupField::Password,
                    SignupField::Email => SignupField::Username,
                    SignupField::Password | SignupField::Otp => SignupField::Email,
                };
            }
            KeyCode::Enter => match self.signup.stage {
                SignupStage::Details => self.dispatch_send_otp(),
                SignupStage::Otp => self.dispatch_complete_signup(),
            },
            KeyCode::Backspace => {
                self.signup.focused().pop();
            }
            KeyCode::Char(c) => {
                self.signup.focused().push(c);
            }
            _ => {}
        }
    }

    fn handle_shop_key(&mut self, key: KeyEvent) {
        if self.handle_global_nav(key) {
            return;
        }
        match key.code {
            KeyCode::Down => {
                self.shop.focus = match self.shop.focus {
                    ShopFocus::Packs => ShopFocus::BuyAmount,
                    ShopFocus::BuyAmount => ShopFocus::SellAmount,
                    ShopFocus::SellAmount => ShopFocus::Packs,
                };
            }
            KeyCode::Up => {
                self.shop.focus = match self.shop.focus {
                    ShopFocus::Packs => ShopFocus::SellAmount,
                    ShopFocus::BuyAmount => ShopFocus::Packs,
                    ShopFocus::SellAmount => ShopFocus::BuyAmount,
                };
            }
            KeyCode::Left if self.shop.focus == ShopFocus::Packs => {
                self.shop.pack_cursor = self.shop.pack_cursor.saturating_sub(1);
            }
            KeyCode::Right if self.shop.focus == ShopFocus::Packs => {
                let last = self.config.token_packs.len().saturating_sub(1);
                self.shop.pack_cursor = (self.shop.pack_cursor + 1).min(last);
            }
            KeyCode::Enter => match self.shop.focus {
                ShopFocus::Packs => self.dispatch_buy_pack(),
                ShopFocus::BuyAmount => self.dispatch_buy(),
                ShopFocus::SellAmount => self.open_sell_modal(),
            },
            KeyCode::Backspace => {
                match self.shop.focus {
                    ShopFocus::BuyAmount => self.shop.buy_amount.pop(),
                    ShopFocus::SellAmount => self.shop.sell_amount.pop(),
                    ShopFocus::Packs => None,
                };
            }
            KeyCode::Char(c) if c.is_ascii_digit() || c == '.' => match self.shop.focus {
                ShopFocus::BuyAmount => self.shop.buy_amount.push(c),
                ShopFocus::SellAmount => self.shop.sell_amount.push(c),
                ShopFocus::Packs => {}
            },
            _ => {}
        }
    }

    fn handle_market_key(&mut self, key: KeyEvent) {
        if self.handle_global_nav(key) {
            return;
        }
        let group_count = self.catalog.as_ref().map_or(0, |c| c.groups.len());
        match key.code {
            KeyCode::Down if group_count > 0 => {
                self.market.cursor = (self.market.cursor + 1).min(group_count - 1);
            }
            KeyCode::Up => {
                self.market.cursor = self.market.cursor.saturating_sub(1);
            }
            KeyCode::Char('r') => self.dispatch_catalog_load(),
            KeyCode::Enter => self.dispatch_purchase(),
            KeyCode::Backspace => {
                self.market.quantity.pop();
                self.clamp_market_quantity();
            }
            KeyCode::Char(c) if c.is_ascii_digit() || c == '.' => {
                self.market.quantity.push(c);
                self.clamp_market_quantity();
            }
            _ => {}
        }
    }

    fn handle_list_key(&mut self, key: KeyEvent) {
        if self.handle_global_nav(key) {
            return;
        }
        if key.code == KeyCode::Char('r') {
            match self.screen {
                Screen::Listings => self.dispatch_listings_load(),
                Screen::History => self.dispatch_history_load(),
                _ => {}
            }
        }
    }

    fn handle_upload_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            let _ = self.handle_global_nav(key);
            return;
        }
        if key.code == KeyCode::Enter {
            self.dispatch_upload();
            return;
        }
        match key.code {
            KeyCode::Down => {
                self.upload.focus = match self.upload.focus {
                    UploadField::Description => UploadField::ImageUrl,
                    UploadField::ImageUrl => UploadField::Category,
                    UploadField::Category => UploadField::Amount,
                    UploadField::Amount => UploadField::Description,
                };
            }
            KeyCode::Up => {
                self.upload.focus = match self.upload.focus {
                    UploadField::Description => UploadField::Amount,
                    UploadField::ImageUrl => UploadField::Description,
                    UploadField::Category => UploadField::ImageUrl,
                    UploadField::Amount => UploadField::Category,
                };
            }
            KeyCode::Left if self.upload.focus == UploadField::Category => {
                self.upload.category_idx =
                    (self.upload.category_idx + Category::ALL.len() - 1) % Category::ALL.len();
            }
            KeyCode::Right if self.upload.focus == UploadField::Category => {
                self.upload.category_idx = (self.upload.category_idx + 1) % Category::ALL.len();
            }
            KeyCode::Backspace => {
                match self.upload.focus {
                    UploadField::Description => self.upload.description.pop(),
                    UploadField::ImageUrl => self.upload.image_url.pop(),
                    UploadField::Amount => self.upload.amount.pop(),
                    UploadField::Category => None,
                };
            }
            KeyCode::Char(c) => match self.upload.focus {
                UploadField::Description => self.upload.description.push(c),
                UploadField::ImageUrl => self.upload.image_url.push(c),
                UploadField::Amount => {
                    if c.is_ascii_digit() || c == '.' {
                        self.upload.amount.push(c);
                    }
                }
                UploadField::Category => {
                    // Text keys fall back to navigation on this field.
                    let _ = self.handle_global_nav(key);
                }
            },
            _ => {
                let _ = self.handle_global_nav(key);
            }
        }
    }

    fn handle_sell_modal_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                if let Ok(mut flow) = self.exchange.try_lock() {
                    flow.cancel_sell();
                }
                self.sell_modal = None;
            }
            KeyCode::Char('a') => {
                if let Some(modal) = self.sell_modal.as_mut() {
                    modal.agreed = !modal.agreed;
                }
            }
            KeyCode::Enter => self.dispatch_confirm_sell(),
            _ => {}
        }
    }

    fn handle_override_modal_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc | KeyCode::Char('c') => {
                if let Ok(mut flow) = self.upload_flow.try_lock() {
                    flow.cancel_override();
                }
                self.override_modal = None;
                self.set_status("Upload cancelled.");
            }
            KeyCode::Enter | KeyCode::Char('p') => self.dispatch_confirm_override(),
            _ => {}
        }
    }

    /// Keep the quantity input inside `[1, available]` on every change.
    fn clamp_market_quantity(&mut self) {
        let Some(available) = self.selected_group_available() else {
            return;
        };
        if let Ok(value) = self.market.quantity.trim().parse::<f64>() {
            let clamped = clamp_quantity(value, available);
            if clamped != value {
                self.market.quantity = format_quantity(clamped);
            }
        }
    }

    fn selected_group_available(&self) -> Option<f64> {
        self.catalog
            .as_ref()
            .and_then(|catalog| catalog.groups.get(self.market.cursor))
            .map(|group| group.available_kg)
    }

    fn current_user(&mut self) -> Option<User> {
        let user = self.session.user();
        if user.is_none() {
            self.set_status("Please log in first.");
            self.screen = Screen::Login;
        }
        user
    }

    // --- async dispatches -------------------------------------------------

    fn dispatch_login(&mut self) {
        if self.login.pending {
            return;
        }
        let email = self.login.email.trim().to_string();
        let password = self.login.password.clone();
        if !email.contains('@') {
            self.set_status("Invalid email address.");
            return;
        }
        if password.is_empty() {
            self.set_status("Password is required.");
            return;
        }
        self.login.pending = true;
        self.set_status("Logging in");
        let api = self.api.clone();
        let tx = self.event_tx();
        spawn(async move {
            let result = api
                .login(&email, &password)
                .await
                .map_err(|err| format!("Login failed: {err}"));
            let _ = tx.send(AppEvent::LoggedIn(result)).await;
        });
    }

    fn dispatch_send_otp(&mut self) {
        if self.signup.pending {
            return;
        }
        if let Err(message) = self.signup.validate_details() {
            self.set_status(message);
            return;
        }
        let email = self.signup.email.trim().to_string();
        let username = self.signup.username.trim().to_string();
        self.signup.pending = true;
        self.set_status("Sending OTP");
        let api = self.api.clone();
        let tx = self.event_tx();
        spawn(async move {
            let result = api
                .send_otp(&email, &username)
                .await
                .map_err(|err| err.to_string());
            let _ = tx.send(AppEvent::OtpSent(result)).await;
        });
    }

    fn dispatch_complete_signup(&mut self) {
        if self.signup.pending {
            return;
        }
        let otp = self.signup.otp.trim().to_string();
        if otp.is_empty() {
            self.set_status("Enter the OTP from your email.");
            return;
        }
        let username = self.signup.username.trim().to_string();
        let email = self.signup.email.trim().to_string();
        let password = self.signup.password.clone();
        self.signup.pending = true;
        self.set_status("Verifying OTP");
        let api = self.api.clone();
        let tx = self.event_tx();
        spawn(async move {
            let result = async {
                api.verify_otp(&email, &otp).await?;
                api.signup(&username, &email, &password).await
            }
            .await
            .map_err(|err| err.to_string());
            let _ = tx.send(AppEvent::SignedUp(result)).await;
        });
    }

    fn dispatch_session_refresh(&mut self) {
        let session = Arc::clone(&self.session);
        let api = self.api.clone();
        let tx = self.event_tx();
        spawn(async move {
            session.refresh_user(&api).await;
            let _ = tx.send(AppEvent::SessionRefreshed).await;
        });
    }

    fn dispatch_catalog_load(&mut self) {
        let api = self.api.clone();
        let tx = self.event_tx();
        spawn(async move {
            let result = Catalog::load(&api)
                .await
                .map_err(|err| format!("Failed to load marketplace: {err}"));
            let _ = tx.send(AppEvent::CatalogLoaded(result)).await;
        });
    }

    fn dispatch_listings_load(&mut self) {
        let Some(user) = self.current_user() else {
            return;
        };
        let api = self.api.clone();
        let tx = self.event_tx();
        spawn(async move {
            let result = api
                .listings(user.id)
                .await
                .map_err(|err| format!("Failed to load listings: {err}"));
            let _ = tx.send(AppEvent::ListingsLoaded(result)).await;
        });
    }

    fn dispatch_history_load(&mut self) {
        let Some(user) = self.current_user() else {
            return;
        };
        let api = self.api.clone();
        let tx = self.event_tx();
        spawn(async move {
            let result = api
                .transaction_history(user.id)
                .await
                .map_err(|err| format!("Failed to load history: {err}"));
            let _ = tx.send(AppEvent::HistoryLoaded(result)).await;
        });
    }

    fn dispatch_buy(&mut self) {
        let Some(user) = self.current_user() else {
            return;
        };
        // A held lock means a request is in flight; the trigger is
        // dropped, not queued.
        let Ok(mut flow) = Arc::clone(&self.exchange).try_lock_owned() else {
            return;
        };
        let input = self.shop.buy_amount.clone();
        let api = self.api.clone();
        let tx = self.event_tx();
        self.shop.pending = true;
        spawn(async move {
            let result = match flow.buy(&api, user.id, &input).await {
                Ok(ExchangeOutcome::Settled) => Ok(settled_summary(flow.phase())),
                Ok(ExchangeOutcome::Ignored) => Ok(String::new()),
                Err(err) => Err(err.to_string()),
            };
            let _ = tx.send(AppEvent::ExchangeDone(result)).await;
        });
    }

    fn dispatch_buy_pack(&mut self) {
        let Some(user) = self.current_user() else {
            return;
        };
        let Some(pack) = self.config.token_packs.get(self.shop.pack_cursor).copied() else {
            return;
        };
        let Ok(mut flow) = Arc::clone(&self.exchange).try_lock_owned() else {
            return;
        };
        let api = self.api.clone();
        let tx = self.event_tx();
        self.shop.pending = true;
        spawn(async move {
            let result = match flow.buy_pack(&api, user.id, pack).await {
                Ok(ExchangeOutcome::Settled) => Ok(settled_summary(flow.phase())),
                Ok(ExchangeOutcome::Ignored) => Ok(String::new()),
                Err(err) => Err(err.to_string()),
            };
            let _ = tx.send(AppEvent::ExchangeDone(result)).await;
        });
    }

    fn open_sell_modal(&mut self) {
        let Some(user) = self.current_user() else {
            return;
        };
        let Ok(mut flow) = self.exchange.try_lock() else {
            return;
        };
        match flow.quote_sell(&self.shop.sell_amount, user.tokens) {
            Ok(Some(quote)) => {
                self.sell_modal = Some(SellModal {
                    quote,
                    agreed: false,
                });
            }
            Ok(None) => {}
            Err(err) => self.status = err.to_string(),
        }
    }

    fn dispatch_confirm_sell(&mut self) {
        let Some(user) = self.current_user() else {
            return;
        };
        let agreed = self.sell_modal.as_ref().is_some_and(|modal| modal.agreed);
        let Ok(mut flow) = Arc::clone(&self.exchange).try_lock_owned() else {
            return;
        };
        let api = self.api.clone();
        let tx = self.event_tx();
        self.shop.pending = true;
        spawn(async move {
            let result = match flow.confirm_sell(&api, user.id, agreed).await {
                Ok(ExchangeOutcome::Settled) => Ok(settled_summary(flow.phase())),
                Ok(ExchangeOutcome::Ignored) => Ok(String::new()),
                Err(err) => Err(err.to_string()),
            };
            let _ = tx.send(AppEvent::ExchangeDone(result)).await;
        });
    }

    fn dispatch_purchase(&mut self) {
        let Some(user) = self.current_user() else {
            return;
        };
        let Some(group) = self
            .catalog
            .as_ref()
            .and_then(|catalog| catalog.groups.get(self.market.cursor))
        else {
            self.set_status("No category selected.");
            return;
        };
        let category = group.category;
        let available = group.available_kg;
        let Ok(quantity) = self.market.quantity.trim().parse::<f64>() else {
            self.set_status("Enter a quantity in kilograms.");
            return;
        };
        let Ok(mut flow) = Arc::clone(&self.purchase).try_lock_owned() else {
            return;
        };
        let api = self.api.clone();
        let tx = self.event_tx();
        self.market.pending = true;
        spawn(async move {
            let result = match flow
                .submit(&api, user.id, category, quantity, available)
                .await
            {
                Ok(PurchaseOutcome::Settled(msg)) => Ok(msg),
                Ok(PurchaseOutcome::Ignored) => Ok(String::new()),
                Err(err) => Err(err.to_string()),
            };
            let _ = tx.send(AppEvent::PurchaseDone(result)).await;
        });
    }

    fn dispatch_upload(&mut self) {
        let Some(user) = self.current_user() else {
            return;
        };
        let draft = match self.upload.draft() {
            Ok(draft) => draft,
            Err(message) => {
                self.set_status(message);
                return;
            }
        };
        let Ok(mut flow) = Arc::clone(&self.upload_flow).try_lock_owned() else {
            return;
        };
        let api = self.api.clone();
        let tx = self.event_tx();
        self.upload.pending = true;
        self.set_status("Checking category");
        spawn(async move {
            let report = match flow.submit(&api, &user, &draft).await {
                Ok(UploadOutcome::Done) => UploadReport::Done,
                Ok(UploadOutcome::NeedsOverride(check)) => {
                    UploadReport::NeedsOverride(check, draft)
                }
                Ok(UploadOutcome::Blocked(_)) => UploadReport::Blocked(failed_summary(&flow)),
                Ok(UploadOutcome::Ignored) => UploadReport::Ignored,
                Err(err) => UploadReport::Failed(err.to_string()),
            };
            let _ = tx.send(AppEvent::UploadDone(report)).await;
        });
    }

    fn dispatch_confirm_override(&mut self) {
        let Some(user) = self.current_user() else {
            return;
        };
        let Some(draft) = self
            .override_modal
            .as_ref()
            .map(|modal| modal.draft.clone())
        else {
            return;
        };
        let Ok(mut flow) = Arc::clone(&self.upload_flow).try_lock_owned() else {
            return;
        };
        let api = self.api.clone();
        let tx = self.event_tx();
        self.upload.pending = true;
        spawn(async move {
            let report = match flow.confirm_override(&api, &user, &draft).await {
                Ok(UploadOutcome::Done) => UploadReport::Done,
                Ok(UploadOutcome::Ignored) => UploadReport::Ignored,
                Ok(_) => UploadReport::Failed("Unexpected upload state.".to_string()),
                Err(err) => UploadReport::Failed(err.to_string()),
            };
            let _ = tx.send(AppEvent::UploadDone(report)).await;
        });
    }

    // --- rendering --------------------------------------------------------

    fn draw(&mut self, frame: &mut Frame) {
        let area = frame.size();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(5),
                Constraint::Length(3),
            ])
            .split(area);

        self.render_header(frame, chunks[0]);
        match self.screen {
            Screen::Login => self.render_login(frame, chunks[1]),
            Screen::Signup => self.render_signup(frame, chunks[1]),
            Screen::Shop => self.render_shop(frame, chunks[1]),
            Screen::Market => self.render_market(frame, chunks[1]),
            Screen::Listings => self.render_listings(frame, chunks[1]),
            Screen::History => self.render_history(frame, chunks[1]),
            Screen::Upload => self.render_upload(frame, chunks[1]),
        }
        self.render_status(frame, chunks[2]);

        if let Some(modal) = &self.sell_modal {
            render_sell_modal(frame, modal);
        }
        if let Some(modal) = &self.override_modal {
            render_override_modal(frame, modal);
        }
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let mut spans = vec![Span::styled(
            "JMART",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )];
        if !matches!(self.screen, Screen::Login | Screen::Signup) {
            for tab in Screen::TABS {
                spans.push(Span::raw("  "));
                let style = if tab == self.screen {
                    Style::default()
                        .fg(Color::Black)
                        .bg(Color::Green)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::Gray)
                };
                spans.push(Span::styled(format!(" {} ", tab.title()), style));
            }
        }
        if let Some(user) = self.session.user() {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(
                format!("{} · {} tokens", user.username, user.tokens),
                Style::default().fg(Color::Yellow),
            ));
        }
        let header = Paragraph::new(Line::from(spans))
            .block(Block::default().borders(Borders::ALL))
            .alignment(Alignment::Left);
        frame.render_widget(header, area);
    }

    fn render_status(&self, frame: &mut Frame, area: Rect) {
        let pending = self.login.pending
            || self.signup.pending
            || self.shop.pending
            || self.market.pending
            || self.upload.pending;
        let text = if pending {
            format!("{}...", self.status)
        } else {
            self.status.clone()
        };
        let hint = match self.screen {
            Screen::Login => "Enter: log in | Tab: switch field | Ctrl-S: sign up | Esc: quit",
            Screen::Signup => "Enter: continue | Tab: switch field | Esc: back to login",
            Screen::Shop => "Up/Down: focus | Left/Right: pack | Enter: buy/sell | Tab: next screen",
            Screen::Market => "Up/Down: category | digits: quantity | Enter: buy | r: reload",
            Screen::Listings | Screen::History => "r: reload | Tab: next screen",
            Screen::Upload => "Up/Down: field | Left/Right: category | Enter: submit",
        };
        let status = Paragraph::new(vec![Line::from(vec![
            Span::styled(text, Style::default().fg(Color::White)),
            Span::raw("   "),
            Span::styled(hint, Style::default().fg(Color::DarkGray)),
        ])])
        .block(Block::default().borders(Borders::ALL))
        .wrap(Wrap { trim: true });
        frame.render_widget(status, area);
    }

    fn render_login(&self, frame: &mut Frame, area: Rect) {
        let form_area = centered_rect(48, 8, area);
        let focus = self.login.focus.unwrap_or(LoginField::Email);
        let lines = vec![
            field_line("Email", &self.login.email, focus == LoginField::Email),
            field_line(
                "Password",
                &"*".repeat(self.login.password.len()),
                focus == LoginField::Password,
            ),
        ];
        let form = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("Sign in"))
            .alignment(Alignment::Left);
        frame.render_widget(form, form_area);
    }

    fn render_signup(&self, frame: &mut Frame, area: Rect) {
        let form_area = centered_rect(48, 9, area);
        let lines = match self.signup.stage {
            SignupStage::Details => vec![
                field_line(
                    "Username",
                    &self.signup.username,
                    self.signup.focus == SignupField::Username,
                ),
                field_line(
                    "Email",
                    &self.signup.email,
                    self.signup.focus == SignupField::Email,
                ),
                field_line(
                    "Password",
                    &"*".repeat(self.signup.password.len()),
                    self.signup.focus == SignupField::Password,
                ),
            ],
            SignupStage::Otp => vec![
                Line::from(format!("An OTP was sent to {}.", self.signup.email.trim())),
                Line::from(""),
                field_line("OTP", &self.signup.otp, true),
            ],
        };
        let title = match self.signup.stage {
            SignupStage::Details => "Create account",
            SignupStage::Otp => "Verify email",
        };
        let form = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title(title))
            .alignment(Alignment::Left);
        frame.render_widget(form, form_area);
    }

    fn render_shop(&self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Min(0),
            ])
            .split(area);

        let packs: Vec<Span> = self
            .config
            .token_packs
            .iter()
            .enumerate()
            .flat_map(|(idx, pack)| {
                let style =
                    if self.shop.focus == ShopFocus::Packs && idx == self.shop.pack_cursor {
                        Style::default()
                            .fg(Color::Black)
                            .bg(Color::Yellow)
                            .add_modifier(Modifier::BOLD)
                    } else {
                        Style::default().fg(Color::Yellow)
                    };
                [
                    Span::styled(format!(" {} for ${:.2} ", pack.tokens, pack.price), style),
                    Span::raw("  "),
                ]
            })
            .collect();
        let pack_widget = Paragraph::new(vec![Line::from(packs)])
            .block(Block::default().borders(Borders::ALL).title("Token packs"));
        frame.render_widget(pack_widget, chunks[0]);

        let buy = Paragraph::new(field_line(
            &format!(
                "Amount in dollars (1 token = ${:.2})",
                self.config.token_price
            ),
            &self.shop.buy_amount,
            self.shop.focus == ShopFocus::BuyAmount,
        ))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Buy custom amount"),
        );
        frame.render_widget(buy, chunks[1]);

        let per_token = self.config.token_price * (1.0 - self.config.sell_fee_rate);
        let sell = Paragraph::new(field_line(
            &format!(
                "Tokens to sell (fee {:.0}%, you get ${per_token:.2}/token)",
                self.config.sell_fee_rate * 100.0
            ),
            &self.shop.sell_amount,
            self.shop.focus == ShopFocus::SellAmount,
        ))
        .block(Block::default().borders(Borders::ALL).title("Sell tokens"));
        frame.render_widget(sell, chunks[2]);
    }

    fn render_market(&self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(4), Constraint::Length(3)])
            .split(area);

        let items: Vec<ListItem> = match &self.catalog {
            Some(catalog) if !catalog.groups.is_empty() => catalog
                .groups
                .iter()
                .enumerate()
                .map(|(idx, group)| {
                    let marker = if idx == self.market.cursor { "> " } else { "  " };
                    let line = format!(
                        "{marker}{} -- {:.1} kg available ({} listings)",
                        group.category,
                        group.available_kg,
                        group.items.len()
                    );
                    let style = if idx == self.market.cursor {
                        Style::default()
                            .fg(Color::Green)
                            .add_modifier(Modifier::BOLD)
                    } else {
                        Style::default()
                    };
                    ListItem::new(Line::from(Span::styled(line, style)))
                })
                .collect(),
            Some(_) => vec![ListItem::new("No waste items found.")],
            None => vec![ListItem::new("Loading marketplace...")],
        };
        let list = List::new(items).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Marketplace by category"),
        );
        frame.render_widget(list, chunks[0]);

        let bounds = self
            .selected_group_available()
            .map_or(String::new(), |available| {
                format!(" (1 - {available:.1} kg)")
            });
        let quantity = Paragraph::new(field_line(
            &format!("Quantity in kg{bounds}"),
            &self.market.quantity,
            true,
        ))
        .block(Block::default().borders(Borders::ALL).title("Buy"));
        frame.render_widget(quantity, chunks[1]);
    }

    fn render_listings(&self, frame: &mut Frame, area: Rect) {
        let items: Vec<ListItem> = if self.listings.is_empty() {
            vec![ListItem::new("No uploads yet. Press r to reload.")]
        } else {
            self.listings
                .iter()
                .map(|item| {
                    let verified = if item.verified { "[v]" } else { "[ ]" };
                    ListItem::new(format!(
                        "{verified} {} -- {:.1} kg -- {}",
                        item.category, item.amount_kg, item.description
                    ))
                })
                .collect()
        };
        let list =
            List::new(items).block(Block::default().borders(Borders::ALL).title("My listings"));
        frame.render_widget(list, area);
    }

    fn render_history(&self, frame: &mut Frame, area: Rect) {
        let items: Vec<ListItem> = if self.history.is_empty() {
            vec![ListItem::new("No transactions yet. Press r to reload.")]
        } else {
            self.history
                .iter()
                .map(|entry| {
                    let when = entry
                        .timestamp
                        .with_timezone(&Local)
                        .format("%Y-%m-%d %H:%M");
                    ListItem::new(format!(
                        "{when} -- {} -- {:.1} kg -- {} tokens",
                        entry.category, entry.amount_kg, entry.tokens
                    ))
                })
                .collect()
        };
        let list = List::new(items).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Transaction history"),
        );
        frame.render_widget(list, area);
    }

    fn render_upload(&self, frame: &mut Frame, area: Rect) {
        let focus = self.upload.focus;
        let lines = vec![
            field_line(
                "Description",
                &self.upload.description,
                focus == UploadField::Description,
            ),
            field_line(
                "Image URL",
                &self.upload.image_url,
                focus == UploadField::ImageUrl,
            ),
            field_line(
                "Category (Left/Right)",
                self.upload.category().label(),
                focus == UploadField::Category,
            ),
            field_line(
                "Weight (kg)",
                &self.upload.amount,
                focus == UploadField::Amount,
            ),
        ];
        let form = Paragraph::new(lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Upload waste item"),
            )
            .wrap(Wrap { trim: false });
        frame.render_widget(form, area);
    }
}

fn settled_summary(phase: &ExchangePhase) -> String {
    match phase {
        ExchangePhase::Settled(summary) => summary.clone(),
        _ => String::new(),
    }
}

fn failed_summary(flow: &UploadFlow) -> String {
    match flow.phase() {
        UploadPhase::Failed(message) => message.clone(),
        _ => "Upload blocked.".to_string(),
    }
}

fn field_line<'a>(label: &str, value: &str, focused: bool) -> Line<'a> {
    let cursor = if focused { "_" } else { "" };
    let style = if focused {
        Style::default()
            .fg(Color::Green)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    };
    Line::from(vec![
        Span::styled(format!("{label}: "), style),
        Span::raw(format!("{value}{cursor}")),
    ])
}

fn render_sell_modal(frame: &mut Frame, modal: &SellModal) {
    let area = centered_rect(52, 12, frame.size());
    frame.render_widget(Clear, area);
    let quote = &modal.quote;
    let agree_marker = if modal.agreed { "[x]" } else { "[ ]" };
    let lines = vec![
        Line::from(format!("Tokens to sell:   {}", quote.tokens)),
        Line::from(format!("Token value:      ${:.2}", quote.value)),
        Line::from(format!(
            "Sell fee ({:.0}%):    -${:.2}",
            quote.fee_rate * 100.0,
            quote.fee
        )),
        Line::from(Span::styled(
            format!("You will receive: ${:.2}", quote.payout),
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from("The sale is final once confirmed and the fee is"),
        Line::from("non-refundable."),
        Line::from(format!(
            "{agree_marker} I agree to the terms and conditions (a)"
        )),
        Line::from(Span::styled(
            "Enter: confirm sale | Esc: cancel",
            Style::default().fg(Color::DarkGray),
        )),
    ];
    let modal_widget = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Sell token calculation"),
        )
        .wrap(Wrap { trim: true });
    frame.render_widget(modal_widget, area);
}

fn render_override_modal(frame: &mut Frame, modal: &OverrideModal) {
    let area = centered_rect(56, 10, frame.size());
    frame.render_widget(Clear, area);
    let predicted = modal
        .check
        .predicted_category
        .map_or_else(|| "another category".to_string(), |c| c.to_string());
    let lines = vec![
        Line::from(format!(
            "You declared {}, but this looks like {predicted}",
            modal.draft.category
        )),
        Line::from(format!(
            "(model confidence {:.0}%).",
            modal.check.confidence * 100.0
        )),
        Line::from(""),
        Line::from("Proceed anyway? The item will be listed as"),
        Line::from("unverified."),
        Line::from(""),
        Line::from(Span::styled(
            "Enter/p: proceed unverified | Esc/c: cancel",
            Style::default().fg(Color::DarkGray),
        )),
    ];
    let modal_widget = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Category mismatch"),
        )
        .wrap(Wrap { trim: true });
    frame.render_widget(modal_widget, area);
}

fn format_quantity(value: f64) -> String {
    if (value - value.trunc()).abs() < f64::EPSILON {
        format!("{}", value.trunc() as i64)
    } else {
        format!("{value:.1}")
    }
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor()?;
    Ok(())
}

/// Read crossterm events on a dedicated blocking thread, forwarding
/// them into the async event loop. Quiet polls turn into ticks.
fn spawn_input_thread(sender: mpsc::Sender<AppEvent>) {
    thread::spawn(move || loop {
        match event::poll(TICK_RATE) {
            Ok(true) => match event::read() {
                Ok(evt) => {
                    if sender.blocking_send(AppEvent::Input(evt)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
            Ok(false) => {
                if sender.blocking_send(AppEvent::Tick).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    });
}

/// Forward balance-changed signals into the event loop so the header
/// refreshes without waiting for the next poll.
fn spawn_balance_listener(notifier: BalanceNotifier, sender: mpsc::Sender<AppEvent>) {
    let mut rx = notifier.subscribe();
    spawn(async move {
        while rx.recv().await.is_ok() {
            if sender.send(AppEvent::BalanceHint).await.is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_cycle_covers_every_tab() {
        let mut screen = Screen::Shop;
        for _ in 0..Screen::TABS.len() {
            screen = screen.next();
        }
        assert_eq!(screen, Screen::Shop);
        assert_eq!(Screen::Shop.previous(), Screen::Upload);
    }

    #[test]
    fn quantities_render_without_noise() {
        assert_eq!(format_quantity(1.0), "1");
        assert_eq!(format_quantity(40.0), "40");
        assert_eq!(format_quantity(12.5), "12.5");
    }

    fn test_app() -> JmartApp {
        JmartApp::new(
            AppConfig::default(),
            ApiClient::new("http://127.0.0.1:1"),
            SessionStore::new(std::env::temp_dir().join("jmart-app-tests")),
            BalanceNotifier::new(),
        )
    }

    #[test]
    fn signup_details_validate_before_any_otp_request() {
        let mut form = SignupForm::default();
        assert!(form.validate_details().is_err());

        form.username = "asha".to_string();
        form.email = "asha@example.com".to_string();
        form.password = "hunter2".to_string();
        assert!(form.validate_details().is_ok());

        form.email = "not-an-email".to_string();
        assert!(form.validate_details().is_err());
    }

    #[test]
    fn override_modal_keeps_the_draft_that_was_verified() {
        let mut app = test_app();
        // The form moved on while the verification was in flight.
        app.upload.description = "edited afterwards".to_string();

        let check = CategoryCheck {
            verified: false,
            confidence: 0.8,
            predicted_category: Some(Category::Metal),
        };
        let draft = ItemDraft {
            description: "as submitted".to_string(),
            image_url: "https://img.example/pipes.jpg".to_string(),
            category: Category::Plastic,
            amount_kg: 2.0,
        };
        app.process_app_event(Some(AppEvent::UploadDone(UploadReport::NeedsOverride(
            check, draft,
        ))));

        let modal = app.override_modal.as_ref().expect("override modal");
        assert_eq!(modal.draft.description, "as submitted");
        assert_eq!(modal.draft.category, Category::Plastic);
        assert_eq!(modal.draft.amount_kg, 2.0);
    }

    #[test]
    fn upload_form_rejects_garbage_weight() {
        let mut form = UploadForm::default();
        form.description = "old jars".to_string();
        form.image_url = "https://img.example/jars.jpg".to_string();
        form.amount = "abc".to_string();
        assert!(form.draft().is_err());
        form.amount = "2.5".to_string();
        assert_eq!(form.draft().expect("draft").amount_kg, 2.5);
    }
}
