use super::*;
use tether_cdp::MessageId;
use uuid::Uuid;

fn command(method: &str, priority: Priority) -> QueuedCommand {
    QueuedCommand {
        connection_id: Uuid::new_v4(),
        message_id: MessageId::Number(1),
        method: method.to_string(),
        raw: format!(r#"{{"id":1,"method":"{method}"}}"#),
        priority,
        queued_at: Instant::now(),
    }
}

#[test]
fn test_priority_for_method() {
    assert_eq!(Priority::for_method("Runtime.evaluate"), Priority::High);
    assert_eq!(Priority::for_method("Page.navigate"), Priority::High);
    assert_eq!(Priority::for_method("Target.activateTarget"), Priority::High);
    assert_eq!(Priority::for_method("Log.enable"), Priority::Low);
    assert_eq!(Priority::for_method("Runtime.enable"), Priority::Low);
    assert_eq!(Priority::for_method("Page.enable"), Priority::Low);
    assert_eq!(Priority::for_method("Network.enable"), Priority::Normal);
    assert_eq!(Priority::for_method("DOM.getDocument"), Priority::Normal);
}

#[test]
fn test_pop_orders_by_priority() {
    let mut queue = CommandQueue::new(10);
    queue.push(command("Log.enable", Priority::Low)).unwrap();
    queue.push(command("DOM.getDocument", Priority::Normal)).unwrap();
    queue.push(command("Page.navigate", Priority::High)).unwrap();
    assert_eq!(queue.pop().unwrap().method, "Page.navigate");
    assert_eq!(queue.pop().unwrap().method, "DOM.getDocument");
    assert_eq!(queue.pop().unwrap().method, "Log.enable");
    assert!(queue.pop().is_none());
}

#[test]
fn test_fifo_within_priority() {
    let mut queue = CommandQueue::new(10);
    for i in 0..3 {
        let mut cmd = command("Network.enable", Priority::Normal);
        cmd.method = format!("Network.enable#{i}");
        queue.push(cmd).unwrap();
    }
    assert_eq!(queue.pop().unwrap().method, "Network.enable#0");
    assert_eq!(queue.pop().unwrap().method, "Network.enable#1");
    assert_eq!(queue.pop().unwrap().method, "Network.enable#2");
}

#[test]
fn test_push_at_capacity_rejects_without_evicting() {
    let mut queue = CommandQueue::new(2);
    queue.push(command("A.a", Priority::Normal)).unwrap();
    queue.push(command("B.b", Priority::Normal)).unwrap();
    let rejected = queue.push(command("C.c", Priority::High)).unwrap_err();
    assert_eq!(rejected.method, "C.c");
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.pop().unwrap().method, "A.a");
}

#[test]
fn test_drain_returns_dispatch_order() {
    let mut queue = CommandQueue::new(10);
    queue.push(command("Log.enable", Priority::Low)).unwrap();
    queue.push(command("Runtime.evaluate", Priority::High)).unwrap();
    queue.push(command("Network.enable", Priority::Normal)).unwrap();
    let drained = queue.drain();
    assert!(queue.is_empty());
    let methods: Vec<_> = drained.iter().map(|c| c.method.as_str()).collect();
    assert_eq!(methods, ["Runtime.evaluate", "Network.enable", "Log.enable"]);
}
