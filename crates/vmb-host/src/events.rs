use vmb_types::{DiscardReason, Event};

/// Status event emitted after a kept execution.
pub const EVENT_KEEP: &str = "vm.keep";
/// Diagnostic event emitted after a discarded execution.
pub const EVENT_DISCARD: &str = "vm.discard";

/// Receives the events a transaction produces, in emission order.
pub trait EventSink: Send {
    fn emit(&mut self, event: Event);
}

impl EventSink for Vec<Event> {
    fn emit(&mut self, event: Event) {
        self.push(event);
    }
}

/// Collects a transaction's events.
#[derive(Debug, Clone, Default)]
pub struct EventManager {
    events: Vec<Event>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn take(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn of_type<'a>(&'a self, ty: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.events.iter().filter(move |e| e.ty == ty)
    }
}

impl EventSink for EventManager {
    fn emit(&mut self, event: Event) {
        self.events.push(event);
    }
}

pub fn keep_event(gas_used: u64) -> Event {
    Event::new(EVENT_KEEP).with_attribute("gas_used", gas_used)
}

pub fn discard_event(gas_used: u64, reason: &DiscardReason) -> Event {
    let mut event = Event::new(EVENT_DISCARD)
        .with_attribute("gas_used", gas_used)
        .with_attribute("major_status", reason.major_status);
    if let Some(sub) = reason.sub_status {
        event = event.with_attribute("sub_status", sub);
    }
    if let Some(message) = &reason.message {
        event = event.with_attribute("message", message);
    }
    event
}
