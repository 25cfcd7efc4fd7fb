//! The menu state machine without a transport.

use std::sync::Arc;

use async_trait::async_trait;

use ribcage::menu::{
    MenuOption, MenuOptions, MenuSession, MenuState, Selection, LIST_COLOR, LIST_TITLE,
};
use ribcage::session::Conversation;
use ribcage::transport::IncomingMessage;

struct Named(&'static str);

#[async_trait]
impl MenuOption for Named {
    fn display_name(&self) -> &str {
        self.0
    }

    async fn on_selected(&self, _reply: IncomingMessage, _convo: Conversation) -> anyhow::Result<()> {
        Ok(())
    }
}

fn options(names: &[&'static str]) -> MenuOptions {
    MenuOptions::from(
        names
            .iter()
            .map(|&n| Arc::new(Named(n)) as Arc<dyn MenuOption>)
            .collect::<Vec<_>>(),
    )
}

#[test]
fn listing_numbers_options_from_one() {
    let mut menu = MenuSession::new(options(&["gobot", "awesome", "thirBot"]));
    assert_eq!(menu.state(), MenuState::Idle);

    let listing = menu.list();
    assert_eq!(menu.state(), MenuState::Listing);
    assert_eq!(listing.title, LIST_TITLE);
    assert_eq!(listing.color.as_deref(), Some(LIST_COLOR));
    assert_eq!(listing.text, " 1. gobot\n 2. awesome\n 3. thirBot\n");
}

#[test]
fn empty_menu_lists_nothing_and_rejects_everything() {
    let mut menu = MenuSession::new(MenuOptions::default());
    assert_eq!(menu.list().text, "");
    menu.prompt_sent();
    assert!(matches!(menu.select("1"), Selection::Repeat));
    assert_eq!(menu.state(), MenuState::Repeating);
}

#[test]
fn valid_selection_dispatches() {
    let mut menu = MenuSession::new(options(&["a", "b"]));
    menu.list();
    menu.prompt_sent();
    assert_eq!(menu.state(), MenuState::AwaitingSelection);

    match menu.select("2") {
        Selection::Dispatch { index, option } => {
            assert_eq!(index, 1);
            assert_eq!(option.display_name(), "b");
        }
        Selection::Repeat => panic!("2 should select the second option"),
    }
    assert_eq!(menu.state(), MenuState::Dispatched);
}

#[test]
fn out_of_range_repeats() {
    let mut menu = MenuSession::new(options(&["a", "b"]));
    menu.list();
    menu.prompt_sent();

    for reply in ["0", "3", "-1", "abc2"] {
        assert!(matches!(menu.select(reply), Selection::Repeat), "{reply}");
        assert_eq!(menu.state(), MenuState::Repeating);
        menu.prompt_sent();
        assert_eq!(menu.state(), MenuState::AwaitingSelection);
    }
}

#[test]
fn reject_moves_to_repeating() {
    let mut menu = MenuSession::new(options(&["a"]));
    menu.list();
    menu.prompt_sent();
    assert!(matches!(menu.reject(), Selection::Repeat));
    assert_eq!(menu.state(), MenuState::Repeating);
}

#[test]
fn dispatched_is_terminal() {
    let mut menu = MenuSession::new(options(&["a"]));
    menu.list();
    menu.prompt_sent();
    assert!(matches!(menu.select("1"), Selection::Dispatch { .. }));

    assert!(matches!(menu.select("1"), Selection::Repeat));
    menu.prompt_sent();
    assert_eq!(menu.state(), MenuState::Dispatched);
}
