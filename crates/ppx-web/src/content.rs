#![forbid(unsafe_code)]

//! Page-side runtime facade.
//!
//! [`ContentRuntime`] answers host messages by invoking store actions and
//! mirrors geometry changes of the active image into an outbox of
//! `updateImageState` messages that the host adapter drains.
//!
//! # Invariants
//!
//! 1. Every decodable message gets a reply; unknown actions get
//!    `unknown_action` and change nothing.
//! 2. Switching the active image never emits `updateImageState`; only a
//!    geometry change of the same image does.
//! 3. Consecutive outbox entries for one image coalesce (latest wins).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use ppx_runtime::logging::LOG_TARGET;
use ppx_runtime::{ActiveGeometry, OverlayStore, Subscription};
use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::{Message, ProtocolError, Response};

#[derive(Debug, Default)]
struct Outbox {
    queue: VecDeque<Message>,
    last: Option<ActiveGeometry>,
}

impl Outbox {
    fn observe(&mut self, active: Option<ActiveGeometry>) {
        let previous = std::mem::replace(&mut self.last, active);
        let (Some(prev), Some(now)) = (previous, active) else {
            return;
        };
        if prev.id != now.id || prev.geometry == now.geometry {
            return;
        }
        let message = Message::UpdateImageState {
            image_id: now.id,
            position: now.geometry.position,
            size: now.geometry.size,
        };
        if let Some(Message::UpdateImageState { image_id, .. }) = self.queue.back()
            && *image_id == now.id
        {
            self.queue.pop_back();
        }
        self.queue.push_back(message);
    }
}

/// Message handling and outbound mirroring for one page.
pub struct ContentRuntime {
    store: Rc<OverlayStore>,
    outbox: Rc<RefCell<Outbox>>,
    _watch: Subscription,
}

impl ContentRuntime {
    pub fn new(store: Rc<OverlayStore>) -> Self {
        let outbox = Rc::new(RefCell::new(Outbox {
            queue: VecDeque::new(),
            last: store.active_geometry(),
        }));
        let watch = {
            let outbox = Rc::clone(&outbox);
            store.subscribe_active_geometry(move |active| {
                outbox.borrow_mut().observe(*active);
            })
        };
        Self {
            store,
            outbox,
            _watch: watch,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Rc<OverlayStore> {
        &self.store
    }

    /// Apply one decoded host message.
    pub fn handle_message(&self, message: &Message) -> Response {
        debug!(target: LOG_TARGET, action = message.action(), "message received");
        match message {
            Message::Ping => return Response::Pong,
            Message::ToggleMainMenu => {
                self.store.toggle_main_menu();
            }
            Message::OpenImagePanel => {
                self.store.set_main_menu_visible(true);
            }
            Message::ShowOverlay {
                image_id,
                position,
                size,
                ..
            } => {
                let known = self
                    .store
                    .with_saved_images(|images| images.contains(image_id));
                if known {
                    self.store.set_active_image(Some(*image_id));
                    if let Some(position) = position {
                        self.store.update_image_position(*image_id, *position);
                    }
                    if let Some(size) = size {
                        self.store.update_image_size(*image_id, *size);
                    }
                }
            }
            Message::HideOverlay => {
                self.store.hide_overlay();
            }
            Message::UpdateImageState { .. } => return Response::UnknownAction,
        }
        Response::Success
    }

    /// Decode and apply a raw message.
    pub fn handle_value(&self, value: &Value) -> Response {
        match Message::from_value(value) {
            Ok(message) => self.handle_message(&message),
            Err(ProtocolError::UnknownAction(action)) => {
                debug!(target: LOG_TARGET, %action, "unknown action");
                Response::UnknownAction
            }
            Err(e) => {
                warn!(target: LOG_TARGET, error = %e, "dropping undecodable message");
                Response::UnknownAction
            }
        }
    }

    #[must_use]
    pub fn pending_outbound(&self) -> usize {
        self.outbox.borrow().queue.len()
    }

    /// Take every queued outbound message.
    pub fn drain_outbox(&self) -> Vec<Message> {
        self.outbox.borrow_mut().queue.drain(..).collect()
    }
}

impl std::fmt::Debug for ContentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentRuntime")
            .field("pending_outbound", &self.pending_outbound())
            .finish()
    }
}
