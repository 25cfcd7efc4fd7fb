//! Numbered option menu.
//!
//! Asking the bot "what can you do?" lists the configured options as a
//! numbered attachment and asks for a number. A number naming an option
//! hands the conversation to that option; anything else repeats the
//! question without re-sending the list.
//!
//! ```text
//! Idle -> Listing -> AwaitingSelection -> Dispatched
//!                        ^      |
//!                        |      v
//!                        Repeating
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::session::{Conversation, ReplyMatcher, Session, Turn};
use crate::transport::{Attachment, IncomingMessage, Scope};

/// Listener pattern that opens the menu.
pub const MENU_TRIGGER: &str = r"(?i)what can you do\??";

/// Title of the option list attachment.
pub const LIST_TITLE: &str = "I can do the following";

/// Sidebar color of the option list attachment.
pub const LIST_COLOR: &str = "#F35A00";

/// Question asked after the list.
pub const SELECTION_PROMPT: &str = "Type a number to find out more about the plugin.";

/// Replies matching this go through number parsing; everything else repeats.
pub const NUMERIC_PATTERN: &str = "[0-9]";

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// An entry in the menu.
#[async_trait]
pub trait MenuOption: Send + Sync {
    /// Name shown in the numbered list.
    fn display_name(&self) -> &str;

    /// Take over the conversation after the user picked this option.
    async fn on_selected(&self, reply: IncomingMessage, convo: Conversation) -> anyhow::Result<()>;
}

/// Ordered, immutable option list.
#[derive(Clone)]
pub struct MenuOptions(Arc<[Arc<dyn MenuOption>]>);

impl Default for MenuOptions {
    fn default() -> Self {
        Self::from(Vec::new())
    }
}

impl MenuOptions {
    /// Number of options.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when there are no options.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Option at zero-based `index`.
    pub fn get(&self, index: usize) -> Option<&Arc<dyn MenuOption>> {
        self.0.get(index)
    }

    /// Options in menu order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn MenuOption>> {
        self.0.iter()
    }
}

impl std::fmt::Debug for MenuOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|o| o.display_name()))
            .finish()
    }
}

impl From<Vec<Arc<dyn MenuOption>>> for MenuOptions {
    fn from(options: Vec<Arc<dyn MenuOption>>) -> Self {
        Self(Arc::from(options))
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Where a menu conversation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuState {
    /// Created, nothing sent.
    Idle,
    /// The option list was produced.
    Listing,
    /// The selection question is out.
    AwaitingSelection,
    /// An option took over. Terminal.
    Dispatched,
    /// The last reply was rejected and the question is being repeated.
    Repeating,
}

/// Outcome of a reply to the selection question.
#[derive(Clone)]
pub enum Selection {
    /// Hand the conversation to `option`.
    Dispatch {
        /// Zero-based position in the list.
        index: usize,
        /// The chosen option.
        option: Arc<dyn MenuOption>,
    },
    /// Ask again.
    Repeat,
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dispatch { index, option } => f
                .debug_struct("Dispatch")
                .field("index", index)
                .field("option", &option.display_name())
                .finish(),
            Self::Repeat => f.write_str("Repeat"),
        }
    }
}

/// One user's pass through the menu.
///
/// Holds the option snapshot the list was rendered from, so replies are
/// bounds-checked against exactly what the user saw.
#[derive(Debug)]
pub struct MenuSession {
    options: MenuOptions,
    state: MenuState,
}

impl MenuSession {
    /// Start a session over `options`.
    pub fn new(options: MenuOptions) -> Self {
        Self {
            options,
            state: MenuState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> MenuState {
        self.state
    }

    /// Produce the option list attachment and move to [`MenuState::Listing`].
    pub fn list(&mut self) -> Attachment {
        self.state = MenuState::Listing;
        Attachment {
            title: LIST_TITLE.to_owned(),
            text: self.listing_text(),
            color: Some(LIST_COLOR.to_owned()),
        }
    }

    /// The numbered list, one ` {n}. {name}\n` line per option.
    pub fn listing_text(&self) -> String {
        (1usize..)
            .zip(self.options.iter())
            .map(|(n, option)| format!(" {n}. {}\n", option.display_name()))
            .collect()
    }

    /// Record that the selection question went out.
    pub fn prompt_sent(&mut self) {
        if self.state != MenuState::Dispatched {
            self.state = MenuState::AwaitingSelection;
        }
    }

    /// Resolve a numeric reply.
    pub fn select(&mut self, reply: &str) -> Selection {
        if self.state == MenuState::Dispatched {
            return Selection::Repeat;
        }
        let chosen = parse_selection(reply)
            .and_then(to_index)
            .and_then(|index| self.options.get(index).map(|o| (index, Arc::clone(o))));
        match chosen {
            Some((index, option)) => {
                self.state = MenuState::Dispatched;
                Selection::Dispatch { index, option }
            }
            None => self.reject(),
        }
    }

    /// Reject a reply that is not a valid selection.
    pub fn reject(&mut self) -> Selection {
        self.state = MenuState::Repeating;
        Selection::Repeat
    }
}

/// Parse a reply the way a lenient integer parser would: skip leading
/// whitespace, accept an optional sign, then read the leading run of
/// digits. `"2abc"` is 2; `"abc2"` and `""` are `None`.
pub fn parse_selection(text: &str) -> Option<i64> {
    let text = text.trim_start();
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let value: i64 = rest.get(..end)?.parse().ok()?;
    if negative {
        value.checked_neg()
    } else {
        Some(value)
    }
}

fn to_index(number: i64) -> Option<usize> {
    usize::try_from(number.checked_sub(1)?).ok()
}

// ---------------------------------------------------------------------------
// Conversation wiring
// ---------------------------------------------------------------------------

/// The menu listener.
#[derive(Debug, Clone, Default)]
pub struct Menu {
    options: MenuOptions,
}

impl Menu {
    /// A menu over `options`, in the given order.
    pub fn new(options: MenuOptions) -> Self {
        Self { options }
    }

    /// The listed options.
    pub fn options(&self) -> &MenuOptions {
        &self.options
    }

    /// Listen for the trigger phrase on direct mentions and DMs.
    ///
    /// # Errors
    ///
    /// Returns an error if the trigger pattern fails to compile.
    pub fn register(&self, session: &Session) -> Result<(), regex::Error> {
        let options = self.options.clone();
        session.hears(
            &[MENU_TRIGGER],
            Scope::DIRECT,
            move |session: Session, message: IncomingMessage| {
                let options = options.clone();
                async move {
                    session
                        .start_conversation(&message, |_, convo| open(options, convo))
                        .await
                }
            },
        )
    }
}

/// Send the option list and ask for a selection.
///
/// # Errors
///
/// Returns an error if sending fails.
pub async fn open(options: MenuOptions, convo: Conversation) -> anyhow::Result<()> {
    let menu = Arc::new(Mutex::new(MenuSession::new(options)));

    let listing = lock(&menu).list();
    convo.say_attachments(vec![listing]).await?;

    let numeric = {
        let menu = Arc::clone(&menu);
        ReplyMatcher::pattern(NUMERIC_PATTERN, move |reply: IncomingMessage, convo| {
            let menu = Arc::clone(&menu);
            async move {
                let selection = lock(&menu).select(&reply.text);
                match selection {
                    Selection::Dispatch { option, .. } => {
                        option.on_selected(reply, convo).await?;
                        Ok::<Turn, anyhow::Error>(Turn::Done)
                    }
                    Selection::Repeat => {
                        lock(&menu).prompt_sent();
                        Ok(Turn::Repeat)
                    }
                }
            }
        })?
    };

    let fallback = {
        let menu = Arc::clone(&menu);
        ReplyMatcher::fallback(move |_reply: IncomingMessage, _convo| {
            let menu = Arc::clone(&menu);
            async move {
                let mut session = lock(&menu);
                session.reject();
                session.prompt_sent();
                drop(session);
                Ok::<Turn, anyhow::Error>(Turn::Repeat)
            }
        })
    };

    convo
        .ask(SELECTION_PROMPT, vec![numeric, fallback])
        .await?;
    lock(&menu).prompt_sent();
    Ok(())
}

fn lock(menu: &Mutex<MenuSession>) -> MutexGuard<'_, MenuSession> {
    menu.lock().unwrap_or_else(PoisonError::into_inner)
}
