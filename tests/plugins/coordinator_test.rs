//! Plugin initialization ordering, the once-only gate, and failures.

use std::sync::{Arc, Mutex};

use ribcage::plugins::{Coordinator, InitError, Plugin, PluginHelp, Plugins};

use crate::support::{identity, session, RecordingPlugin};

fn log() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn coordinator(list: Vec<RecordingPlugin>) -> Coordinator {
    Coordinator::new(Plugins::from(
        list.into_iter()
            .map(|p| Arc::new(p) as Arc<dyn Plugin>)
            .collect::<Vec<_>>(),
    ))
}

#[test]
fn plugins_initialize_in_configured_order() {
    let (session, _transport) = session();
    let log = log();
    let coordinator = coordinator(vec![
        RecordingPlugin::new("first", &log),
        RecordingPlugin::new("second", &log),
        RecordingPlugin::new("third", &log),
    ]);

    let ran = coordinator
        .initialize_all(&session, &identity(), None)
        .expect("init should succeed");

    assert!(ran);
    assert!(coordinator.is_initialized());
    assert_eq!(*log.lock().expect("lock"), vec!["first", "second", "third"]);
}

#[test]
fn second_call_is_a_no_op() {
    let (session, _transport) = session();
    let log = log();
    let coordinator = coordinator(vec![
        RecordingPlugin::new("only", &log).with_help(PluginHelp::new("only", "text"))
    ]);

    assert!(coordinator
        .initialize_all(&session, &identity(), None)
        .expect("init should succeed"));
    let listeners = session.listener_count();

    assert!(!coordinator
        .initialize_all(&session, &identity(), None)
        .expect("second init should be a no-op"));
    assert_eq!(*log.lock().expect("lock"), vec!["only"]);
    assert_eq!(session.listener_count(), listeners);
}

#[test]
fn help_listeners_are_registered_after_plugins() {
    let (session, _transport) = session();
    let log = log();
    let coordinator = coordinator(vec![
        RecordingPlugin::new("a", &log).with_help(PluginHelp::new("a", "A.")),
        RecordingPlugin::new("b", &log),
    ]);

    coordinator
        .initialize_all(&session, &identity(), None)
        .expect("init should succeed");

    // `help a` and the bare `help` summary.
    assert_eq!(session.listener_count(), 2);
}

#[test]
fn single_plugin_normalizes_to_a_list() {
    let log = log();
    let plugin: Arc<dyn Plugin> = Arc::new(RecordingPlugin::new("solo", &log));
    let plugins = Plugins::from(plugin);
    assert_eq!(plugins.len(), 1);
    assert_eq!(plugins.names(), vec!["solo"]);
}

#[test]
fn failing_plugin_stops_initialization() {
    let (session, _transport) = session();
    let log = log();
    let coordinator = coordinator(vec![
        RecordingPlugin::new("good", &log),
        RecordingPlugin::new("broken", &log).failing(),
        RecordingPlugin::new("never", &log),
    ]);

    let err = match coordinator.initialize_all(&session, &identity(), None) {
        Ok(ran) => panic!("init should fail, got {ran}"),
        Err(err) => err,
    };

    match &err {
        InitError::Plugin { plugin, reason } => {
            assert_eq!(plugin, "broken");
            assert!(reason.to_string().contains("refused to start"));
        }
        other => panic!("expected plugin failure, got {other:?}"),
    }
    assert_eq!(*log.lock().expect("lock"), vec!["good", "broken"]);
    assert_eq!(session.listener_count(), 0);
}
