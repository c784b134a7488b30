#![forbid(unsafe_code)]

//! `wasm-bindgen` exports for the extension's two contexts.
//!
//! - [`PixelPerfect`]: the page runtime (store, persistence over
//!   `chrome.storage.local`, pointer routing, message handling).
//! - [`HostBackground`]: the background worker's capability check and
//!   retry-once-after-inject delivery over `chrome.tabs`/`chrome.scripting`.
//!
//! Only compiled on `wasm32` targets.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use js_sys::{Array, Function, JSON, Object, Promise, Reflect};
use serde_json::{Value, json};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{JsFuture, future_to_promise};

use ppx_core::{
    CaptureHost, CaptureRequest, Clock, Corner, Direction, DisplayMetrics, HitTarget,
    PointerEvent, PointerKind, PointerPhase, PointerPosition, Size, SystemClock, Viewport,
};
use ppx_runtime::{
    ImageId, OverlayConfig, OverlayController, OverlayStore, PersistenceSync, PointerDispatch,
    StorageError, StorageGateway,
};

use crate::capability::{InjectionProbe, TabId, TabInfo, can_use_extension};
use crate::content::ContentRuntime;
use crate::host::{HostBridge, MessagingError, MessagingGateway};
use crate::protocol::{Message, Response};
use crate::upload::{BytesImageReader, ImageBlob, ingest};

/// Script file the background worker injects into tabs.
const CONTENT_SCRIPT: &str = "src/content.js";

fn console_error(msg: &str) {
    let global = js_sys::global();
    let Ok(console) = Reflect::get(&global, &"console".into()) else {
        return;
    };
    let Ok(error) = Reflect::get(&console, &"error".into()) else {
        return;
    };
    let Ok(error_fn) = error.dyn_into::<Function>() else {
        return;
    };
    let _ = error_fn.call1(&console, &JsValue::from_str(msg));
}

fn install_panic_hook() {
    use std::sync::Once;

    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        std::panic::set_hook(Box::new(|info| {
            let msg = match info.location() {
                Some(loc) => format!(
                    "[pixel_perfect] panic at {}:{}:{}: {info}",
                    loc.file(),
                    loc.line(),
                    loc.column()
                ),
                None => format!("[pixel_perfect] panic: {info}"),
            };
            console_error(&msg);
        }));
    });
}

fn js_err(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn describe(e: &JsValue) -> String {
    e.as_string().unwrap_or_else(|| format!("{e:?}"))
}

/// Walk `root.a.b.c`, failing on a missing link.
fn get_path(root: &JsValue, path: &[&str]) -> Result<JsValue, JsValue> {
    let mut current = root.clone();
    for key in path {
        current = Reflect::get(&current, &JsValue::from_str(key))?;
        if current.is_undefined() || current.is_null() {
            return Err(JsValue::from_str(&format!("{} is not available", path.join("."))));
        }
    }
    Ok(current)
}

/// Call a promise-returning method and await it.
async fn call_promise(target: &JsValue, method: &str, args: &[JsValue]) -> Result<JsValue, JsValue> {
    let function: Function = Reflect::get(target, &JsValue::from_str(method))?.dyn_into()?;
    let array = Array::new();
    for arg in args {
        array.push(arg);
    }
    let promise: Promise = function.apply(target, &array)?.dyn_into()?;
    JsFuture::from(promise).await
}

fn to_js(value: &Value) -> Result<JsValue, JsValue> {
    JSON::parse(&value.to_string())
}

fn from_js(value: &JsValue) -> Result<Option<Value>, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(None);
    }
    let text: String = JSON::stringify(value)?.into();
    serde_json::from_str(&text).map(Some).map_err(js_err)
}

fn set_key(obj: &Object, key: &str, value: &JsValue) -> Result<(), JsValue> {
    Reflect::set(obj, &JsValue::from_str(key), value).map(|_| ())
}

// =========================================================================
// Page runtime
// =========================================================================

/// `chrome.storage.local` as a [`StorageGateway`].
struct ChromeStorage;

impl ChromeStorage {
    fn area() -> Result<JsValue, StorageError> {
        get_path(&js_sys::global(), &["chrome", "storage", "local"])
            .map_err(|e| StorageError::Unavailable(describe(&e)))
    }
}

impl StorageGateway for ChromeStorage {
    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let area = Self::area()?;
        let backend = |e: JsValue| StorageError::Backend(describe(&e));
        let result = call_promise(&area, "get", &[JsValue::from_str(key)])
            .await
            .map_err(backend)?;
        let value = Reflect::get(&result, &JsValue::from_str(key)).map_err(backend)?;
        from_js(&value).map_err(backend)
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let area = Self::area()?;
        let backend = |e: JsValue| StorageError::Backend(describe(&e));
        let items = Object::new();
        set_key(&items, key, &to_js(&value).map_err(backend)?).map_err(backend)?;
        call_promise(&area, "set", &[items.into()])
            .await
            .map(|_| ())
            .map_err(backend)
    }
}

/// Gesture capture through inline styles on the page body.
struct BodyStyleCapture;

impl BodyStyleCapture {
    fn apply(request: CaptureRequest, on: bool) {
        let Some(body) = web_sys::window()
            .and_then(|w| w.document())
            .and_then(|d| d.body())
        else {
            return;
        };
        let style = body.style();
        let toggle = |property: &str| {
            let _ = if on {
                style.set_property(property, "none")
            } else {
                style.remove_property(property).map(|_| ())
            };
        };
        if request.suppress_selection {
            toggle("user-select");
        }
        if request.suppress_touch_scroll {
            toggle("touch-action");
        }
        if request.block_page_pointer_events {
            toggle("pointer-events");
        }
    }
}

impl CaptureHost for BodyStyleCapture {
    fn acquire(&self, request: CaptureRequest) {
        Self::apply(request, true);
    }

    fn release(&self, request: CaptureRequest) {
        Self::apply(request, false);
    }
}

fn display_metrics() -> DisplayMetrics {
    let window = web_sys::window();
    let px = |v: Option<JsValue>| v.and_then(|v| v.as_f64()).unwrap_or(0.0).max(0.0) as u32;
    let (screen_width, screen_height) = window
        .as_ref()
        .and_then(|w| w.screen().ok())
        .map(|s| {
            (
                s.width().unwrap_or(0).max(0) as u32,
                s.height().unwrap_or(0).max(0) as u32,
            )
        })
        .unwrap_or((0, 0));
    DisplayMetrics {
        screen_width,
        screen_height,
        device_pixel_ratio: window.as_ref().map_or(1.0, web_sys::Window::device_pixel_ratio),
        viewport: Viewport::new(
            px(window.as_ref().and_then(|w| w.inner_width().ok())),
            px(window.as_ref().and_then(|w| w.inner_height().ok())),
        ),
    }
}

fn hit_target(code: Option<u8>) -> Option<HitTarget> {
    match code? {
        0 => Some(HitTarget::Body),
        1 => Some(HitTarget::Handle(Corner::TopLeft)),
        2 => Some(HitTarget::Handle(Corner::TopRight)),
        3 => Some(HitTarget::Handle(Corner::BottomRight)),
        4 => Some(HitTarget::Handle(Corner::BottomLeft)),
        _ => None,
    }
}

fn dispatch_label(dispatch: PointerDispatch) -> String {
    match dispatch {
        PointerDispatch::Started(kind) => format!("started:{kind}"),
        PointerDispatch::Committed(_) => "committed".to_owned(),
        PointerDispatch::Ended(kind) => format!("ended:{kind}"),
        PointerDispatch::Ignored(reason) => format!("ignored:{reason:?}"),
    }
}

struct PageInner {
    store: Rc<OverlayStore>,
    sync: PersistenceSync<ChromeStorage>,
    content: ContentRuntime,
    overlay: RefCell<OverlayController<BodyStyleCapture>>,
}

/// Page runtime handle.
#[wasm_bindgen]
pub struct PixelPerfect {
    inner: Rc<PageInner>,
}

#[wasm_bindgen]
impl PixelPerfect {
    /// `config` is an optional JSON string of [`OverlayConfig`] overrides.
    #[wasm_bindgen(constructor)]
    pub fn new(config: Option<String>) -> Result<PixelPerfect, JsValue> {
        install_panic_hook();
        let config = match config {
            Some(json) => OverlayConfig::from_json_str(&json).map_err(js_err)?,
            None => OverlayConfig::default(),
        };
        let clock: Rc<dyn Clock> = Rc::new(SystemClock::new());
        let store = Rc::new(OverlayStore::new(config, Rc::clone(&clock)));
        store.set_viewport(display_metrics().viewport);
        let inner = PageInner {
            sync: PersistenceSync::new(Rc::clone(&store), ChromeStorage, clock),
            content: ContentRuntime::new(Rc::clone(&store)),
            overlay: RefCell::new(OverlayController::new(
                Rc::clone(&store),
                Rc::new(BodyStyleCapture),
            )),
            store,
        };
        Ok(Self {
            inner: Rc::new(inner),
        })
    }

    /// Load saved images. Resolves to the number loaded.
    pub fn initialize(&self) -> Promise {
        let inner = Rc::clone(&self.inner);
        future_to_promise(async move {
            let count = inner.sync.initialize().await.map_err(js_err)?;
            Ok(JsValue::from_f64(count as f64))
        })
    }

    /// Reply to a `chrome.runtime.onMessage` request.
    #[wasm_bindgen(js_name = handleMessage)]
    pub fn handle_message(&self, message: JsValue) -> Result<JsValue, JsValue> {
        let response = match from_js(&message)? {
            Some(value) => self.inner.content.handle_value(&value),
            None => Response::UnknownAction,
        };
        to_js(&serde_json::to_value(response).map_err(js_err)?)
    }

    /// Feed a `chrome.storage.onChanged` new value for the images key.
    #[wasm_bindgen(js_name = storageChanged)]
    pub fn storage_changed(&self, new_value: JsValue) -> Result<bool, JsValue> {
        let value = from_js(&new_value)?;
        Ok(self.inner.sync.apply_external_change(value.as_ref()))
    }

    /// Route one pointer event.
    ///
    /// `kind`: 0 mouse, 1 touch. `phase`: 0 down, 1 move, 2 up, 3 cancel.
    /// `target` (down only): 0 body, 1..=4 corners clockwise from top-left.
    pub fn pointer(
        &self,
        kind: u8,
        phase: u8,
        x: Option<f64>,
        y: Option<f64>,
        target: Option<u8>,
    ) -> String {
        let phase = match phase {
            0 => PointerPhase::Down,
            1 => PointerPhase::Move,
            2 => PointerPhase::Up,
            _ => PointerPhase::Cancel,
        };
        let position = x.zip(y).map(|(x, y)| PointerPosition::new(x, y));
        let event = PointerEvent {
            kind: if kind == 1 {
                PointerKind::Touch
            } else {
                PointerKind::Mouse
            },
            phase,
            position,
        };
        let dispatch = self
            .inner
            .overlay
            .borrow_mut()
            .handle_pointer(event, hit_target(target));
        dispatch_label(dispatch)
    }

    /// The overlay's `<img>` finished loading.
    #[wasm_bindgen(js_name = setNaturalSize)]
    pub fn set_natural_size(&self, width: u32, height: u32) {
        self.inner
            .overlay
            .borrow_mut()
            .set_natural_size(Some(Size::new(width, height)));
    }

    /// Window `resize` handler.
    #[wasm_bindgen(js_name = viewportChanged)]
    pub fn viewport_changed(&self) {
        self.inner.store.set_viewport(display_metrics().viewport);
    }

    /// Run deferred store work and any due write. Call once per turn.
    pub fn tick(&self) -> Promise {
        let inner = Rc::clone(&self.inner);
        future_to_promise(async move {
            inner.store.run_deferred();
            let wrote = inner.sync.flush_due().await.map_err(js_err)?;
            Ok(JsValue::from_bool(wrote))
        })
    }

    /// Write pending changes immediately (`pagehide`).
    #[wasm_bindgen(js_name = flushNow)]
    pub fn flush_now(&self) -> Promise {
        let inner = Rc::clone(&self.inner);
        future_to_promise(async move {
            let wrote = inner.sync.flush_now().await.map_err(js_err)?;
            Ok(JsValue::from_bool(wrote))
        })
    }

    /// Queued `updateImageState` messages for the host.
    #[wasm_bindgen(js_name = drainOutbox)]
    pub fn drain_outbox(&self) -> Result<JsValue, JsValue> {
        let messages: Vec<Value> = self
            .inner
            .content
            .drain_outbox()
            .iter()
            .map(Message::to_value)
            .collect();
        to_js(&Value::Array(messages))
    }

    /// Paste or upload an image. Resolves to the new image id.
    pub fn paste(&self, mime: String, bytes: Vec<u8>) -> Promise {
        let inner = Rc::clone(&self.inner);
        future_to_promise(async move {
            let items = [ImageBlob::new(mime, bytes)];
            let id = ingest(&inner.store, &BytesImageReader, &items, &display_metrics())
                .await
                .map_err(js_err)?;
            Ok(JsValue::from_str(&id.to_string()))
        })
    }

    /// Invoke a named store action from the view.
    pub fn command(&self, name: &str, arg: JsValue) -> Result<bool, JsValue> {
        let store = &self.inner.store;
        let number = || arg.as_f64().ok_or_else(|| js_err(format!("{name} needs a number")));
        let id = || {
            arg.as_string()
                .and_then(|s| ImageId::parse(&s))
                .ok_or_else(|| js_err(format!("{name} needs an image id")))
        };
        Ok(match name {
            "toggleMainMenu" => store.toggle_main_menu(),
            "closeMainMenu" => store.close_main_menu(),
            "toggleImagePanel" => store.toggle_image_panel(),
            "toggleOpacity" => store.toggle_opacity(),
            "setOpacity" => store.set_opacity(number()?.clamp(0.0, 100.0).round() as u8),
            "toggleLock" => store.toggle_lock(),
            "toggleDiff" => store.toggle_diff(),
            "toggleCenter" => store.toggle_center(),
            "move" => {
                let direction: Direction = serde_json::from_value(
                    from_js(&arg)?.unwrap_or(Value::Null),
                )
                .map_err(js_err)?;
                store.move_overlay(direction)
            }
            "editX" => store.edit_position_x(number()?.round() as i32),
            "editY" => store.edit_position_y(number()?.round() as i32),
            "resetPosition" => store.reset_position(),
            "showOverlay" => store.show_overlay(id()?),
            "hideOverlay" => store.hide_overlay(),
            "deleteImage" => store.delete_image(id()?),
            other => return Err(js_err(format!("unknown command: {other}"))),
        })
    }

    /// Snapshot of everything the view renders.
    pub fn state(&self) -> Result<JsValue, JsValue> {
        let store = &self.inner.store;
        let images: Vec<Value> = store.with_saved_images(|images| {
            images
                .newest_first()
                .into_iter()
                .map(|img| json!({ "id": img.id, "created": img.created, "dataUrl": &*img.data_url }))
                .collect()
        });
        let snapshot = json!({
            "activeImageId": store.active_image_id(),
            "src": store.image_src().as_deref(),
            "position": store.position(),
            "size": store.size(),
            "opacity": store.opacity(),
            "isLocked": store.is_locked(),
            "isDiffMode": store.is_diff_mode(),
            "isCentered": store.is_centered(),
            "isMainMenuVisible": store.is_main_menu_visible(),
            "isImagePanelVisible": store.is_image_panel_visible(),
            "images": images,
        });
        to_js(&snapshot)
    }
}

// =========================================================================
// Background worker
// =========================================================================

/// `chrome.tabs` / `chrome.scripting` as a [`MessagingGateway`].
struct ChromeTabs;

impl MessagingGateway for ChromeTabs {
    async fn send(&self, tab: TabId, message: &Message) -> Result<Response, MessagingError> {
        let unreachable = |e: JsValue| MessagingError::Unreachable(describe(&e));
        let tabs = get_path(&js_sys::global(), &["chrome", "tabs"]).map_err(unreachable)?;
        let payload = to_js(&message.to_value()).map_err(unreachable)?;
        let reply = call_promise(&tabs, "sendMessage", &[JsValue::from(tab.0), payload])
            .await
            .map_err(unreachable)?;
        let value = from_js(&reply)
            .map_err(unreachable)?
            .ok_or_else(|| MessagingError::Unreachable("empty reply".to_owned()))?;
        serde_json::from_value(value).map_err(|e| MessagingError::Unreachable(e.to_string()))
    }

    async fn inject(&self, tab: TabId) -> Result<(), MessagingError> {
        let refused = |e: JsValue| MessagingError::Injection(describe(&e));
        let scripting =
            get_path(&js_sys::global(), &["chrome", "scripting"]).map_err(refused)?;
        let details = to_js(&json!({
            "target": { "tabId": tab.0 },
            "files": [CONTENT_SCRIPT],
        }))
        .map_err(refused)?;
        call_promise(&scripting, "executeScript", &[details])
            .await
            .map(|_| ())
            .map_err(refused)
    }

    async fn sleep(&self, duration: Duration) {
        let ms = i32::try_from(duration.as_millis()).unwrap_or(i32::MAX);
        let promise = Promise::new(&mut |resolve, _reject| {
            let global = js_sys::global();
            if let Ok(set_timeout) = Reflect::get(&global, &"setTimeout".into())
                .and_then(|f| f.dyn_into::<Function>().map_err(JsValue::from))
            {
                let _ = set_timeout.call2(&global, &resolve, &JsValue::from(ms));
            } else {
                let _ = resolve.call0(&JsValue::UNDEFINED);
            }
        });
        let _ = JsFuture::from(promise).await;
    }
}

impl InjectionProbe for ChromeTabs {
    async fn can_inject(&self, tab: TabId, _url: &str) -> bool {
        let Ok(scripting) = get_path(&js_sys::global(), &["chrome", "scripting"]) else {
            return false;
        };
        let details = Object::new();
        let target = Object::new();
        let built = set_key(&target, "tabId", &JsValue::from(tab.0))
            .and_then(|()| set_key(&details, "target", &target))
            .and_then(|()| set_key(&details, "func", &Function::new_no_args("return true")));
        if built.is_err() {
            return false;
        }
        call_promise(&scripting, "executeScript", &[details.into()])
            .await
            .is_ok()
    }
}

/// Background worker handle.
#[wasm_bindgen]
pub struct HostBackground {
    bridge: Rc<HostBridge<ChromeTabs>>,
}

#[wasm_bindgen]
impl HostBackground {
    #[wasm_bindgen(constructor)]
    pub fn new(settle_ms: Option<u32>) -> HostBackground {
        install_panic_hook();
        let settle = settle_ms.map_or_else(
            || OverlayConfig::default().inject_settle(),
            |ms| Duration::from_millis(u64::from(ms)),
        );
        Self {
            bridge: Rc::new(HostBridge::new(ChromeTabs, settle)),
        }
    }

    /// Resolves to whether the overlay may run on the tab.
    #[wasm_bindgen(js_name = canUse)]
    pub fn can_use(
        &self,
        tab_id: Option<i32>,
        url: Option<String>,
        status: Option<String>,
    ) -> Promise {
        let bridge = Rc::clone(&self.bridge);
        future_to_promise(async move {
            let tab = TabInfo {
                id: tab_id.map(TabId),
                url,
                status,
            };
            Ok(JsValue::from_bool(
                can_use_extension(&tab, bridge.gateway()).await,
            ))
        })
    }

    /// Toolbar click: toggle the main menu, injecting the runtime if needed.
    #[wasm_bindgen(js_name = openMenu)]
    pub fn open_menu(&self, tab_id: i32) -> Promise {
        let bridge = Rc::clone(&self.bridge);
        future_to_promise(async move {
            bridge
                .toggle_main_menu(TabId(tab_id))
                .await
                .map(|_| JsValue::TRUE)
                .map_err(js_err)
        })
    }
}
