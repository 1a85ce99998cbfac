// Window notifications and the handler table
//
// winit events are narrowed to the few notifications the engine cares
// about. Handlers run in registration order; the engine's own handlers are
// registered first, so they always see an event before the application.

use winit::event::{ElementState, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

use crate::error::{RenderError, RenderResult};

pub const MAX_EVENT_HANDLERS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    CloseRequested,
    Resized { width: u32, height: u32 },
    KeyPressed(KeyCode),
    KeyReleased(KeyCode),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CloseRequested,
    Resized,
    KeyPressed,
    KeyReleased,
    Quit,
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::CloseRequested => EventKind::CloseRequested,
            EngineEvent::Resized { .. } => EventKind::Resized,
            EngineEvent::KeyPressed(_) => EventKind::KeyPressed,
            EngineEvent::KeyReleased(_) => EventKind::KeyReleased,
            EngineEvent::Quit => EventKind::Quit,
        }
    }

    /// `None` for everything the engine ignores.
    pub fn from_window_event(event: &WindowEvent) -> Option<Self> {
        match event {
            WindowEvent::CloseRequested => Some(EngineEvent::CloseRequested),
            WindowEvent::Destroyed => Some(EngineEvent::Quit),
            WindowEvent::Resized(size) => Some(EngineEvent::Resized {
                width: size.width,
                height: size.height,
            }),
            WindowEvent::KeyboardInput { event, .. } if !event.repeat => match event.physical_key {
                PhysicalKey::Code(code) => Some(match event.state {
                    ElementState::Pressed => EngineEvent::KeyPressed(code),
                    ElementState::Released => EngineEvent::KeyReleased(code),
                }),
                PhysicalKey::Unidentified(_) => None,
            },
            _ => None,
        }
    }
}

/// What handlers may change about the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineControl {
    pub running: bool,
    pub resize_pending: bool,
}

impl Default for EngineControl {
    fn default() -> Self {
        Self {
            running: true,
            resize_pending: false,
        }
    }
}

pub type EventHandler = Box<dyn FnMut(&EngineEvent, &mut EngineControl)>;

#[derive(Default)]
pub struct EventHandlers {
    handlers: Vec<(EventKind, EventHandler)>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The table with the engine's own close, quit and resize handlers.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        let defaults: [(EventKind, EventHandler); 3] = [
            (
                EventKind::CloseRequested,
                Box::new(|_: &EngineEvent, control: &mut EngineControl| {
                    log::info!("Close requested, stopping");
                    control.running = false;
                }),
            ),
            (
                EventKind::Quit,
                Box::new(|_: &EngineEvent, control: &mut EngineControl| {
                    log::info!("Quit received, stopping");
                    control.running = false;
                }),
            ),
            (
                EventKind::Resized,
                Box::new(|event: &EngineEvent, control: &mut EngineControl| {
                    if let EngineEvent::Resized { width, height } = event {
                        log::debug!("Window resized to {}x{}", width, height);
                    }
                    control.resize_pending = true;
                }),
            ),
        ];

        for (kind, handler) in defaults {
            table.handlers.push((kind, handler));
        }
        table
    }

    pub fn add(&mut self, kind: EventKind, handler: EventHandler) -> RenderResult<()> {
        if self.handlers.len() >= MAX_EVENT_HANDLERS {
            log::warn!("Event handler table full, {:?} handler rejected", kind);
            return Err(RenderError::CapacityExceeded {
                what: "event handler table",
                capacity: MAX_EVENT_HANDLERS,
            });
        }
        self.handlers.push((kind, handler));
        Ok(())
    }

    pub fn dispatch(&mut self, event: &EngineEvent, control: &mut EngineControl) {
        let kind = event.kind();
        for (_, handler) in self.handlers.iter_mut().filter(|(k, _)| *k == kind) {
            handler(event, control);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn defaults_stop_on_close_and_quit() {
        let mut table = EventHandlers::with_defaults();

        for event in [EngineEvent::CloseRequested, EngineEvent::Quit] {
            let mut control = EngineControl::default();
            table.dispatch(&event, &mut control);
            assert!(!control.running);
        }
    }

    #[test]
    fn default_resize_marks_recreation() {
        let mut table = EventHandlers::with_defaults();
        let mut control = EngineControl::default();

        table.dispatch(&EngineEvent::Resized { width: 640, height: 480 }, &mut control);
        assert!(control.resize_pending);
        assert!(control.running);
    }

    #[test]
    fn engine_handlers_run_before_application_handlers() {
        let mut table = EventHandlers::with_defaults();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let record = seen.clone();
        table
            .add(
                EventKind::CloseRequested,
                Box::new(move |_: &EngineEvent, control: &mut EngineControl| {
                    record.borrow_mut().push(control.running)
                }),
            )
            .unwrap();

        let mut control = EngineControl::default();
        table.dispatch(&EngineEvent::CloseRequested, &mut control);

        // The default handler already cleared `running`.
        assert_eq!(*seen.borrow(), vec![false]);
    }

    #[test]
    fn only_matching_kind_is_dispatched() {
        let mut table = EventHandlers::new();
        let count = Rc::new(RefCell::new(0));

        let c = count.clone();
        table
            .add(EventKind::KeyPressed, Box::new(move |_, _| *c.borrow_mut() += 1))
            .unwrap();

        let mut control = EngineControl::default();
        table.dispatch(&EngineEvent::KeyReleased(KeyCode::Space), &mut control);
        table.dispatch(&EngineEvent::KeyPressed(KeyCode::Space), &mut control);
        table.dispatch(&EngineEvent::KeyPressed(KeyCode::Escape), &mut control);

        assert_eq!(*count.borrow(), 2);
    }

    #[test]
    fn table_is_bounded() {
        let mut table = EventHandlers::with_defaults();
        while table.len() < MAX_EVENT_HANDLERS {
            table.add(EventKind::KeyPressed, Box::new(|_, _| {})).unwrap();
        }

        let err = table.add(EventKind::KeyPressed, Box::new(|_, _| {})).unwrap_err();
        assert!(matches!(err, RenderError::CapacityExceeded { capacity: 64, .. }));
        assert_eq!(table.len(), MAX_EVENT_HANDLERS);
    }
}
