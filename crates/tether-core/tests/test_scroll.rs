mod common;

use common::drain;
use std::sync::Arc;
use std::time::Duration;
use tether_common::{traits::TerminalWidget, types::Size};
use tether_core::events::{Event, EventBus};
use tether_core::scroll::{spawn_scroll_monitor, ScrollFollowController};
use tether_core::{HeadlessTerminal, SharedWidget};
use tokio::sync::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;

fn filled_terminal(lines: usize) -> Arc<Mutex<HeadlessTerminal>> {
    let mut term = HeadlessTerminal::new(Size::new(40, 10));
    for i in 0..lines {
        term.write(format!("output {i}\r\n").as_bytes());
    }
    Arc::new(Mutex::new(term))
}

fn scroll_events(events: &[Event]) -> Vec<bool> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::ScrollChanged { user_scrolled } => Some(*user_scrolled),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_manual_scroll_is_tracked_and_respected() {
    let term = filled_terminal(100);
    term.lock().await.scroll_lines(-20);

    let widget: SharedWidget = term.clone();
    let controller = Arc::new(Mutex::new(ScrollFollowController::new(Duration::from_millis(150))));
    let bus = EventBus::new();
    let mut events = bus.subscribe();
    let cancel = CancellationToken::new();
    let monitor = spawn_scroll_monitor(
        controller.clone(),
        widget,
        Duration::from_millis(100),
        bus,
        cancel.clone(),
    );

    time::sleep(Duration::from_millis(100)).await;
    assert!(!controller.lock().await.is_user_scrolled(), "flip before debounce");

    time::sleep(Duration::from_millis(300)).await;
    assert!(controller.lock().await.is_user_scrolled());
    assert_eq!(scroll_events(&drain(&mut events)), vec![true]);

    {
        let mut term = term.lock().await;
        let before = term.metrics().unwrap().viewport_y;
        term.write(b"fresh output\r\n");
        assert!(!controller.lock().await.on_output(&mut *term));
        assert_eq!(term.metrics().unwrap().viewport_y, before);
    }

    {
        let mut term = term.lock().await;
        controller.lock().await.follow(&mut *term);
        assert!(term.metrics().unwrap().is_at_bottom());
    }
    time::sleep(Duration::from_millis(500)).await;
    assert!(!controller.lock().await.is_user_scrolled());
    assert!(scroll_events(&drain(&mut events)).is_empty());

    cancel.cancel();
    monitor.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_scrolling_back_down_resumes_following() {
    let term = filled_terminal(50);
    term.lock().await.scroll_lines(-5);

    let widget: SharedWidget = term.clone();
    let controller = Arc::new(Mutex::new(ScrollFollowController::new(Duration::from_millis(150))));
    let bus = EventBus::new();
    let mut events = bus.subscribe();
    let cancel = CancellationToken::new();
    spawn_scroll_monitor(
        controller.clone(),
        widget,
        Duration::from_millis(100),
        bus,
        cancel.clone(),
    );
    time::sleep(Duration::from_millis(400)).await;

    term.lock().await.scroll_lines(5);
    time::sleep(Duration::from_millis(400)).await;
    assert_eq!(scroll_events(&drain(&mut events)), vec![true, false]);

    {
        let mut term = term.lock().await;
        term.write(b"tail\r\n");
        assert!(controller.lock().await.on_output(&mut *term));
        assert!(term.metrics().unwrap().is_at_bottom());
    }
    cancel.cancel();
}
