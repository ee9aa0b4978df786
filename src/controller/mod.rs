//! The controller: the single main-thread object that owns every runner,
//! the shared kernel memory, the network relay, and the persistence store
//! (spec.md §3 "controller", §4, §9 "a single explicitly-constructed
//! context object, not scattered module-level statics").
//!
//! A runner never talks to another runner directly. It posts a
//! [`ControllerMessage`] or arms a [`crate::bridge::Messenger`] and posts a
//! [`crate::bridge::HostCallRequest`]; the controller is the only party
//! that mutates the runner table, spawns Workers, and owns the relay/
//! persistence handles these calls are backed by.

mod console;
mod message;
mod runners;

pub use console::{ConsoleBridge, ReadOutcome};
pub use message::{ControllerMessage, TaskCreateParams};
pub use runners::{MessengerTrio, RunnerRecord, RunnerTable, RunnerTableError};

use std::cell::RefCell;
use std::rc::Rc;

use crate::bridge::{CallFamily, ConsoleCall, HostCall, HostCallRequest, Messenger, NetworkCall, PersistenceCall, StatusCode};
use crate::config::Config;
use crate::memory::{KernelMemory, LinearMemory};
use crate::persistence::{PersistenceStore, RecordMeta};
use crate::relay::{RelayClient, RelayConfig};
use crate::runner::LockBlock;
use crate::task::{RunnerId, RunnerKind, TaskId};

#[cfg(not(target_arch = "wasm32"))]
use crate::bridge::NativeSlots;
#[cfg(not(target_arch = "wasm32"))]
use crate::runner::NativeLockSlots;

/// Everything the controller holds. Wrapped in `Rc<RefCell<_>>` (the same
/// interior-mutability shape [`crate::relay::RelayClient`] already uses for
/// its `Inner`) so async completions — relay callbacks, persistence
/// futures — can complete a runner's messenger without borrowing a `&mut
/// Controller` across an await point.
struct ControllerState<M: LinearMemory> {
    config: Config,
    runners: RunnerTable,
    kernel_memory: Option<Rc<KernelMemory<M>>>,
    /// Stashed from [`Controller::boot_primary`] so a later secondary/task
    /// spawn can hand the same kernel module bytes to its Worker without
    /// the caller having to keep them around (spec.md §4.1 "every runner
    /// instantiates the guest kernel module").
    kernel_module_bytes: Option<Rc<Vec<u8>>>,
    relay: Option<RelayClient>,
    persistence: Option<PersistenceStore>,
    console: ConsoleBridge,
    primary: Option<RunnerId>,
    log_sink: Box<dyn Fn(&str)>,
    console_writer: Box<dyn Fn(&str)>,
}

/// The host-side runtime's single entry point to the embedding page
/// (spec.md §6 "controller API"). Cheap to clone — every clone shares the
/// same underlying state, which is how async completions reach back in.
pub struct Controller<M: LinearMemory> {
    inner: Rc<RefCell<ControllerState<M>>>,
}

impl<M: LinearMemory> Clone for Controller<M> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<M: LinearMemory + 'static> Controller<M> {
    /// Construct a controller. `log_sink` receives host-side diagnostics
    /// (protocol errors, panics); `console_writer` receives the guest's
    /// actual stdout (spec.md §6 "a log sink and a console writer").
    pub fn new(config: Config, log_sink: impl Fn(&str) + 'static, console_writer: impl Fn(&str) + 'static) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ControllerState {
                config,
                runners: RunnerTable::new(),
                kernel_memory: None,
                kernel_module_bytes: None,
                relay: None,
                persistence: None,
                console: ConsoleBridge::new(),
                primary: None,
                log_sink: Box::new(log_sink),
                console_writer: Box::new(console_writer),
            })),
        }
    }

    pub fn attach_kernel_memory(&self, memory: KernelMemory<M>) {
        self.inner.borrow_mut().kernel_memory = Some(Rc::new(memory));
    }

    pub fn configure_relay(&self, config: RelayConfig) {
        self.inner.borrow_mut().relay = Some(RelayClient::new(config));
    }

    pub fn attach_persistence(&self, store: PersistenceStore) {
        self.inner.borrow_mut().persistence = Some(store);
    }

    pub fn runner_count(&self) -> usize {
        self.inner.borrow().runners.len()
    }

    pub fn runner_kind(&self, id: RunnerId) -> Option<RunnerKind> {
        self.inner.borrow().runners.get(id).map(|r| r.kind)
    }

    pub fn is_dormant(&self, id: RunnerId) -> Option<bool> {
        self.inner.borrow().runners.get(id).map(|r| r.dormant)
    }

    pub fn task_runner(&self, task: TaskId) -> Option<RunnerId> {
        self.inner.borrow().runners.find_by_task(task)
    }

    fn log(&self, msg: &str) {
        (self.inner.borrow().log_sink)(msg);
    }

    /// Log, prefixed with the reporting runner's kind and id (spec.md
    /// ambient-stack "each runner additionally prefixes log lines with its
    /// runner kind and id (`[primary]`, `[secondary 2]`, `[task 7]`)").
    fn log_for(&self, runner: RunnerId, msg: &str) {
        let prefix = self.runner_log_prefix(runner);
        self.log(&format!("{prefix} {msg}"));
    }

    fn runner_log_prefix(&self, runner: RunnerId) -> String {
        match self.inner.borrow().runners.get(runner) {
            Some(record) => match record.kind {
                RunnerKind::Primary => "[primary]".to_string(),
                RunnerKind::Secondary => format!("[secondary {}]", runner.0),
                RunnerKind::Task => match record.current_task {
                    Some(task) => format!("[task {}]", task.0),
                    None => format!("[task {}]", runner.0),
                },
            },
            None => format!("[runner {}]", runner.0),
        }
    }

    fn write_console(&self, text: &str) {
        (self.inner.borrow().console_writer)(text);
    }

    /// Register a new runner record with a fresh lock block and messenger
    /// trio. Real slot allocation (a `SharedArrayBuffer` on `wasm32`, plain
    /// cells off it) happens in [`alloc_runner_slots`].
    fn register_runner(&self, kind: RunnerKind) -> (RunnerId, RunnerSlotsBundle) {
        let slots = alloc_runner_slots();
        let record = RunnerRecord::new(kind, slots.lock, slots.messengers);
        let mut state = self.inner.borrow_mut();
        let id = state.runners.insert(record);
        if kind == RunnerKind::Primary {
            state.primary = Some(id);
        }
        (id, slots.residue)
    }

    /// Boot the primary CPU runner (spec.md §8 scenario 1 "boot-to-init").
    /// On `wasm32` this also spawns the backing Worker; off it, the runner
    /// record exists but nothing actually executes, which is enough for
    /// dispatch-level tests.
    pub fn boot_primary(&self, params: crate::runner::PrimaryBootParams, runner_program_url: &str) -> RunnerId {
        let (id, _residue) = self.register_runner(RunnerKind::Primary);
        self.inner.borrow_mut().kernel_module_bytes = Some(Rc::new(params.kernel_module.clone()));
        #[cfg(target_arch = "wasm32")]
        wasm_impl::spawn_primary(self, id, params, runner_program_url, _residue);
        #[cfg(not(target_arch = "wasm32"))]
        let _ = (params, runner_program_url);
        id
    }

    pub fn boot_secondary(&self, params: crate::runner::SecondaryBootParams, runner_program_url: &str) -> RunnerId {
        let (id, _residue) = self.register_runner(RunnerKind::Secondary);
        #[cfg(target_arch = "wasm32")]
        {
            let kernel_module_bytes = self.inner.borrow().kernel_module_bytes.clone();
            wasm_impl::spawn_secondary(self, id, params, runner_program_url, _residue, kernel_module_bytes.as_deref());
        }
        #[cfg(not(target_arch = "wasm32"))]
        let _ = (params, runner_program_url);
        id
    }

    fn boot_task(&self, params: TaskCreateParams, runner_program_url: &str) -> RunnerId {
        let (id, _residue) = self.register_runner(RunnerKind::Task);
        self.inner.borrow_mut().runners.get_mut(id).unwrap().current_task = Some(params.new_task);
        #[cfg(target_arch = "wasm32")]
        {
            let kernel_module_bytes = self.inner.borrow().kernel_module_bytes.clone();
            wasm_impl::spawn_task(self, id, params, runner_program_url, _residue, kernel_module_bytes.as_deref());
        }
        #[cfg(not(target_arch = "wasm32"))]
        let _ = (params, runner_program_url);
        id
    }

    pub fn release_runner(&self, id: RunnerId) -> Result<(), RunnerTableError> {
        self.inner.borrow_mut().runners.release(id).map(|_| ())
    }

    /// Page-facing key-input injection (spec.md §6). Satisfies the oldest
    /// queued console read(s), in FIFO order, with whatever is now
    /// available.
    pub fn inject_console_input(&self, bytes: &[u8]) {
        let completions = self.inner.borrow_mut().console.push_input(bytes);
        for (runner, buf_offset, data) in completions {
            self.complete_console_read(runner, buf_offset, data);
        }
    }

    fn complete_console_read(&self, runner: RunnerId, buf_offset: u32, data: Vec<u8>) {
        let km = self.inner.borrow().kernel_memory.clone();
        let Some(km) = km else {
            self.complete(runner, CallFamily::Console, StatusCode::Error, 0);
            return;
        };
        match km.write(buf_offset, &data) {
            Ok(()) => self.complete(runner, CallFamily::Console, StatusCode::Success, data.len() as i32),
            Err(_) => self.complete(runner, CallFamily::Console, StatusCode::Error, 0),
        }
    }

    fn complete(&self, runner: RunnerId, family: CallFamily, status: StatusCode, payload: i32) {
        let state = self.inner.borrow();
        let Some(record) = state.runners.get(runner) else { return };
        let messenger: &Messenger<_> = match family {
            CallFamily::Console => &record.messengers.console,
            CallFamily::Network => &record.messengers.network,
            CallFamily::Persistence => &record.messengers.persistence,
        };
        messenger.complete(status, payload);
    }

    /// Dispatch a message posted by `origin` (spec.md §4.1, §9).
    pub fn handle_message(&self, origin: RunnerId, msg: ControllerMessage) {
        match msg {
            ControllerMessage::StartPrimary { init_task } => {
                if let Some(record) = self.inner.borrow_mut().runners.get_mut(origin) {
                    record.current_task = Some(init_task);
                }
            }
            ControllerMessage::StartSecondary { cpu, idle_task } => {
                let runner_program_url = self.inner.borrow().config.runner_program_url.clone();
                self.boot_secondary(crate::runner::SecondaryBootParams { cpu, idle_task }, &runner_program_url);
            }
            ControllerMessage::CreateAndRunTask(params) => {
                let runner_program_url = self.inner.borrow().config.runner_program_url.clone();
                self.boot_task(params, &runner_program_url);
            }
            ControllerMessage::Serialize { from, wake } => {
                let target = self.inner.borrow().runners.find_by_task(wake);
                if let Some(target_id) = target {
                    if let Some(record) = self.inner.borrow().runners.get(target_id) {
                        record.lock.wake(from);
                    }
                } else {
                    self.log_for(origin, &format!("serialize: no runner hosts task {wake}"));
                }
            }
            ControllerMessage::TaskRelease { task } => {
                if let Some(id) = self.inner.borrow().runners.find_by_task(task) {
                    let _ = self.inner.borrow_mut().runners.release(id);
                }
            }
            ControllerMessage::Panic { message } => {
                self.log_for(origin, &format!("panic: {message}"));
                if let Some(record) = self.inner.borrow_mut().runners.get_mut(origin) {
                    record.dormant = true;
                }
            }
            ControllerMessage::HostCall(request) => self.dispatch_host_call(origin, request),
        }
    }

    fn dispatch_host_call(&self, origin: RunnerId, request: HostCallRequest) {
        match request.call {
            HostCall::Console(call) => self.handle_console_call(origin, call),
            HostCall::Network(call) => self.handle_network_call(origin, call),
            HostCall::Persistence(call) => self.handle_persistence_call(origin, call),
        }
    }

    fn handle_console_call(&self, origin: RunnerId, call: ConsoleCall) {
        match call {
            ConsoleCall::Write { buf_offset, len } => {
                let km = self.inner.borrow().kernel_memory.clone();
                let Some(km) = km else {
                    self.complete(origin, CallFamily::Console, StatusCode::Error, 0);
                    return;
                };
                let mut buf = vec![0u8; len as usize];
                match km.read(buf_offset, &mut buf) {
                    Ok(()) => {
                        self.write_console(&String::from_utf8_lossy(&buf));
                        self.complete(origin, CallFamily::Console, StatusCode::Success, len as i32);
                    }
                    Err(_) => self.complete(origin, CallFamily::Console, StatusCode::Error, 0),
                }
            }
            ConsoleCall::Read { buf_offset, len } => {
                let outcome = self.inner.borrow_mut().console.read(origin, buf_offset, len);
                if let ReadOutcome::Ready { bytes } = outcome {
                    self.complete_console_read(origin, buf_offset, bytes);
                }
                // Queued: completion arrives later via `inject_console_input`.
            }
        }
    }

    fn handle_network_call(&self, origin: RunnerId, call: NetworkCall) {
        let configured = self.inner.borrow().relay.is_some();
        if !configured {
            self.complete(origin, CallFamily::Network, StatusCode::Error, 0);
            return;
        }
        match call {
            NetworkCall::Open { host, port } => self.network_open(origin, host, port),
            NetworkCall::Write { id, buf_offset, len } => self.network_write(origin, id, buf_offset, len),
            NetworkCall::Read { id, buf_offset, count } => self.network_read(origin, id, buf_offset, count),
            NetworkCall::Poll { id } => self.network_poll(origin, id),
            NetworkCall::Close { id } => self.network_close(origin, id),
        }
    }

    fn network_read(&self, origin: RunnerId, id: crate::task::ConnectionId, buf_offset: u32, count: u32) {
        let (relay, km) = {
            let state = self.inner.borrow();
            (state.relay.clone(), state.kernel_memory.clone())
        };
        let (Some(relay), Some(km)) = (relay, km) else {
            self.complete(origin, CallFamily::Network, StatusCode::Error, 0);
            return;
        };
        let mut data = relay.take_buffered(id);
        data.truncate(count as usize);
        match km.write(buf_offset, &data) {
            Ok(()) => self.complete(origin, CallFamily::Network, StatusCode::Success, data.len() as i32),
            Err(_) => self.complete(origin, CallFamily::Network, StatusCode::Error, 0),
        }
    }

    fn network_poll(&self, origin: RunnerId, id: crate::task::ConnectionId) {
        let relay = self.inner.borrow().relay.clone();
        let status = match relay {
            Some(relay) if relay.is_closed(id) => StatusCode::RemoteClosed,
            Some(_) => StatusCode::Success,
            None => StatusCode::Error,
        };
        self.complete(origin, CallFamily::Network, status, 0);
    }

    #[cfg(target_arch = "wasm32")]
    fn network_open(&self, origin: RunnerId, host: String, port: u16) {
        let relay = self.inner.borrow().relay.clone().expect("checked by caller");
        let this = self.clone();
        relay.open(host, port, move |result| {
            let (status, payload) = match result {
                Ok(id) => (StatusCode::Success, id.0 as i32),
                Err(_) => (StatusCode::Error, 0),
            };
            this.complete(origin, CallFamily::Network, status, payload);
        });
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn network_open(&self, origin: RunnerId, _host: String, _port: u16) {
        // Opening a real socket only exists on wasm32; off it (native
        // tests) this call has nothing to drive and always fails.
        self.complete(origin, CallFamily::Network, StatusCode::Error, 0);
    }

    #[cfg(target_arch = "wasm32")]
    fn network_write(&self, origin: RunnerId, id: crate::task::ConnectionId, buf_offset: u32, len: u32) {
        let (relay, km) = {
            let state = self.inner.borrow();
            (state.relay.clone(), state.kernel_memory.clone())
        };
        let (Some(relay), Some(km)) = (relay, km) else {
            self.complete(origin, CallFamily::Network, StatusCode::Error, 0);
            return;
        };
        let mut buf = vec![0u8; len as usize];
        let (status, payload) = match km.read(buf_offset, &mut buf) {
            Ok(()) => match relay.write(id, &buf) {
                Ok(()) => (StatusCode::Success, len as i32),
                Err(_) => (StatusCode::Error, 0),
            },
            Err(_) => (StatusCode::Error, 0),
        };
        self.complete(origin, CallFamily::Network, status, payload);
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn network_write(&self, origin: RunnerId, _id: crate::task::ConnectionId, _buf_offset: u32, _len: u32) {
        self.complete(origin, CallFamily::Network, StatusCode::Error, 0);
    }

    #[cfg(target_arch = "wasm32")]
    fn network_close(&self, origin: RunnerId, id: crate::task::ConnectionId) {
        if let Some(relay) = self.inner.borrow().relay.clone() {
            relay.close(id);
        }
        self.complete(origin, CallFamily::Network, StatusCode::Success, 0);
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn network_close(&self, origin: RunnerId, _id: crate::task::ConnectionId) {
        self.complete(origin, CallFamily::Network, StatusCode::Success, 0);
    }

    fn handle_persistence_call(&self, origin: RunnerId, call: PersistenceCall) {
        let (persistence, kernel_memory) = {
            let state = self.inner.borrow();
            (state.persistence.clone(), state.kernel_memory.clone())
        };
        let (Some(store), Some(km)) = (persistence, kernel_memory) else {
            self.complete(origin, CallFamily::Persistence, StatusCode::Error, 0);
            return;
        };
        let this = self.clone();
        spawn_async(async move {
            let (status, payload) = run_persistence_call(&store, &*km, call).await;
            this.complete(origin, CallFamily::Persistence, status, payload);
        });
    }
}

/// One runner's allocated blocking slots, plus whatever the target needs to
/// actually share them with a Worker (the `SharedArrayBuffer` on `wasm32`;
/// nothing off it).
struct RunnerSlotsBundle {
    lock: LockBlock<crate::bridge::DynSlots>,
    messengers: MessengerTrio,
    residue: RunnerSlotsResidue,
}

#[cfg(target_arch = "wasm32")]
type RunnerSlotsResidue = js_sys::SharedArrayBuffer;
#[cfg(not(target_arch = "wasm32"))]
type RunnerSlotsResidue = ();

#[cfg(not(target_arch = "wasm32"))]
fn alloc_runner_slots() -> RunnerSlotsBundle {
    let lock = LockBlock::new(Box::new(NativeLockSlots::new()));
    let messengers = MessengerTrio {
        console: Messenger::new(Box::new(NativeSlots::new())),
        network: Messenger::new(Box::new(NativeSlots::new())),
        persistence: Messenger::new(Box::new(NativeSlots::new())),
    };
    RunnerSlotsBundle { lock, messengers, residue: () }
}

/// Layout within the per-runner `SharedArrayBuffer` (8 `i32` slots): `[0,1]`
/// the lock block, `[2,3]` console, `[4,5]` network, `[6,7]` persistence
/// (spec.md §3 "runner record", §5).
#[cfg(target_arch = "wasm32")]
fn alloc_runner_slots() -> RunnerSlotsBundle {
    use crate::bridge::{DynSlots, WasmSlots};

    const SLOT_COUNT: u32 = 8;
    let buffer = js_sys::SharedArrayBuffer::new(SLOT_COUNT * 4);
    let array = js_sys::Int32Array::new(&buffer);

    let lock = LockBlock::new(Box::new(WasmSlots::new(array.clone(), 0)) as DynSlots);
    let messengers = MessengerTrio {
        console: Messenger::new(Box::new(WasmSlots::new(array.clone(), 2)) as DynSlots),
        network: Messenger::new(Box::new(WasmSlots::new(array.clone(), 4)) as DynSlots),
        persistence: Messenger::new(Box::new(WasmSlots::new(array.clone(), 6)) as DynSlots),
    };
    RunnerSlotsBundle { lock, messengers, residue: buffer }
}

async fn run_persistence_call<M: LinearMemory>(
    store: &PersistenceStore,
    km: &KernelMemory<M>,
    call: PersistenceCall,
) -> (StatusCode, i32) {
    match call {
        PersistenceCall::Save { path, buf_offset, len, mode } => {
            let mut buf = vec![0u8; len as usize];
            if km.read(buf_offset, &mut buf).is_err() {
                return (StatusCode::Error, 0);
            }
            let meta = RecordMeta { mode, owner: 0, group: 0, mtime_ms: 0.0 };
            match store.save(&path, &buf, meta).await {
                Ok(()) => (StatusCode::Success, len as i32),
                Err(_) => (StatusCode::Error, 0),
            }
        }
        PersistenceCall::Load { path, buf_offset, count } => match store.load(&path).await {
            Ok(Some(record)) => {
                let mut data = record.data;
                data.truncate(count as usize);
                match km.write(buf_offset, &data) {
                    Ok(()) => (StatusCode::Success, data.len() as i32),
                    Err(_) => (StatusCode::Error, 0),
                }
            }
            Ok(None) => (StatusCode::NotFound, 0),
            Err(_) => (StatusCode::Error, 0),
        },
        PersistenceCall::Delete { path } => match store.delete(&path).await {
            Ok(()) => (StatusCode::Success, 0),
            Err(_) => (StatusCode::Error, 0),
        },
        PersistenceCall::List { prefix, buf_offset, count } => match store.list(&prefix).await {
            Ok(paths) => {
                let mut bytes = paths.join("\n").into_bytes();
                bytes.truncate(count as usize);
                let n = bytes.len();
                match km.write(buf_offset, &bytes) {
                    Ok(()) => (StatusCode::Success, n as i32),
                    Err(_) => (StatusCode::Error, 0),
                }
            }
            Err(_) => (StatusCode::Error, 0),
        },
    }
}

#[cfg(target_arch = "wasm32")]
fn spawn_async(fut: impl std::future::Future<Output = ()> + 'static) {
    wasm_bindgen_futures::spawn_local(fut);
}

#[cfg(not(target_arch = "wasm32"))]
fn spawn_async(fut: impl std::future::Future<Output = ()>) {
    futures::executor::block_on(fut);
}

/// Worker-spawning wiring. Only meaningful on `wasm32`; off it the
/// controller's bookkeeping is exercised directly without a real Worker.
#[cfg(target_arch = "wasm32")]
mod wasm_impl {
    use super::*;
    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::{JsCast, JsValue};
    use web_sys::{MessageEvent, Worker, WorkerOptions, WorkerType};

    fn spawn_worker<M: LinearMemory + 'static>(controller: &Controller<M>, id: RunnerId, runner_program_url: &str) -> Option<Worker> {
        let mut opts = WorkerOptions::new();
        opts.type_(WorkerType::Module);
        let worker = Worker::new_with_options(runner_program_url, &opts).ok()?;
        bind_onmessage(controller, id, &worker);
        Some(worker)
    }

    /// Decode the JSON [`ControllerMessage`] a runner's Worker posts back and
    /// dispatch it through the controller (spec.md §4.1, §9). This is the
    /// other half of the postMessage channel `post_boot_payload` opens.
    fn bind_onmessage<M: LinearMemory + 'static>(controller: &Controller<M>, id: RunnerId, worker: &Worker) {
        let controller = controller.clone();
        let closure = Closure::wrap(Box::new(move |event: MessageEvent| {
            let Some(text) = event.data().as_string() else {
                controller.log_for(id, "received a non-string postMessage, ignoring");
                return;
            };
            match ControllerMessage::from_json(&text) {
                Ok(msg) => controller.handle_message(id, msg),
                Err(e) => controller.log_for(id, &format!("malformed controller message: {e}")),
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        worker.set_onmessage(Some(closure.as_ref().unchecked_ref()));
        // The Worker owns the closure for its own lifetime; it is only ever
        // dropped by releasing the runner, at which point the Worker itself
        // (and its onmessage handler) is torn down too.
        closure.forget();
    }

    /// Post the boot payload a freshly spawned Worker needs to bootstrap
    /// itself (spec.md §4.1, §6): which runner id it is, its slot buffer,
    /// and whichever boot-kind payload applies. The receiving end is
    /// [`crate::runner::install_runner_entry_point`], installed by the
    /// worker's own entry script.
    fn post_boot_payload(worker: &Worker, id: RunnerId, buffer: &js_sys::SharedArrayBuffer, kind: &str, extra: &JsValue) {
        let payload = js_sys::Object::new();
        let _ = js_sys::Reflect::set(&payload, &"runnerId".into(), &(id.0 as f64).into());
        let _ = js_sys::Reflect::set(&payload, &"slots".into(), buffer);
        let _ = js_sys::Reflect::set(&payload, &"kind".into(), &kind.into());
        let _ = js_sys::Reflect::set(&payload, &"params".into(), extra);
        let _ = worker.post_message(&payload);
    }

    pub(super) fn spawn_primary<M: LinearMemory + 'static>(
        controller: &Controller<M>,
        id: RunnerId,
        params: crate::runner::PrimaryBootParams,
        runner_program_url: &str,
        buffer: js_sys::SharedArrayBuffer,
    ) {
        let Some(worker) = spawn_worker(controller, id, runner_program_url) else {
            controller.log_for(id, "failed to spawn primary runner worker");
            return;
        };
        let extra = js_sys::Object::new();
        let _ = js_sys::Reflect::set(&extra, &"cmdline".into(), &params.cmdline.into());
        let _ = js_sys::Reflect::set(&extra, &"kernelModule".into(), &js_sys::Uint8Array::from(params.kernel_module.as_slice()));
        let _ = js_sys::Reflect::set(&extra, &"initrd".into(), &js_sys::Uint8Array::from(params.initrd.as_slice()));
        post_boot_payload(&worker, id, &buffer, "primary", &extra);
    }

    pub(super) fn spawn_secondary<M: LinearMemory + 'static>(
        controller: &Controller<M>,
        id: RunnerId,
        params: crate::runner::SecondaryBootParams,
        runner_program_url: &str,
        buffer: js_sys::SharedArrayBuffer,
        kernel_module_bytes: Option<&Vec<u8>>,
    ) {
        let Some(worker) = spawn_worker(controller, id, runner_program_url) else {
            controller.log_for(id, "failed to spawn secondary runner worker");
            return;
        };
        let extra = js_sys::Object::new();
        let _ = js_sys::Reflect::set(&extra, &"cpu".into(), &(params.cpu.0 as f64).into());
        let _ = js_sys::Reflect::set(&extra, &"idleTask".into(), &(params.idle_task.0 as f64).into());
        if let Some(bytes) = kernel_module_bytes {
            let _ = js_sys::Reflect::set(&extra, &"kernelModule".into(), &js_sys::Uint8Array::from(bytes.as_slice()));
        }
        post_boot_payload(&worker, id, &buffer, "secondary", &extra);
    }

    pub(super) fn spawn_task<M: LinearMemory + 'static>(
        controller: &Controller<M>,
        id: RunnerId,
        params: TaskCreateParams,
        runner_program_url: &str,
        buffer: js_sys::SharedArrayBuffer,
        kernel_module_bytes: Option<&Vec<u8>>,
    ) {
        let Some(worker) = spawn_worker(controller, id, runner_program_url) else {
            controller.log_for(id, "failed to spawn task runner worker");
            return;
        };
        let extra = js_sys::Object::new();
        let _ = js_sys::Reflect::set(&extra, &"newTask".into(), &(params.new_task.0 as f64).into());
        if let Some(bytes) = kernel_module_bytes {
            let _ = js_sys::Reflect::set(&extra, &"kernelModule".into(), &js_sys::Uint8Array::from(bytes.as_slice()));
        }
        if let Some(user_module) = &params.user_module {
            let um = js_sys::Object::new();
            let _ = js_sys::Reflect::set(&um, &"bytesStart".into(), &(user_module.bytes_start as f64).into());
            let _ = js_sys::Reflect::set(&um, &"bytesEnd".into(), &(user_module.bytes_end as f64).into());
            let _ = js_sys::Reflect::set(&um, &"dataBase".into(), &(user_module.data_base as f64).into());
            let _ = js_sys::Reflect::set(&um, &"tableBase".into(), &(user_module.table_base as f64).into());
            let _ = js_sys::Reflect::set(&extra, &"userModule".into(), &um);
        }
        let mode = match params.mode {
            crate::runner::TaskRunMode::KthreadReturnedToInit => "kthreadReturnedToInit",
            crate::runner::TaskRunMode::CloneCallback => "cloneCallback",
        };
        let _ = js_sys::Reflect::set(&extra, &"mode".into(), &mode.into());
        post_boot_payload(&worker, id, &buffer, "task", &extra);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::NativeMemory;
    use crate::runner::PrimaryBootParams;

    fn test_controller() -> Controller<NativeMemory> {
        let controller = Controller::new(Config::new(), |_msg| {}, |_msg| {});
        controller.attach_kernel_memory(KernelMemory::new(NativeMemory::new(1)));
        controller
    }

    #[test]
    fn boot_primary_registers_a_runner() {
        let controller = test_controller();
        let id = controller.boot_primary(
            PrimaryBootParams { kernel_module: vec![], cmdline: String::new(), initrd: vec![] },
            "",
        );
        assert_eq!(controller.runner_kind(id), Some(RunnerKind::Primary));
        assert_eq!(controller.runner_count(), 1);
    }

    #[test]
    fn start_primary_records_the_init_task() {
        let controller = test_controller();
        let id = controller.boot_primary(
            PrimaryBootParams { kernel_module: vec![], cmdline: String::new(), initrd: vec![] },
            "",
        );
        controller.handle_message(id, ControllerMessage::StartPrimary { init_task: TaskId(1) });
        assert_eq!(controller.task_runner(TaskId(1)), Some(id));
    }

    #[test]
    fn create_and_run_task_spawns_a_task_runner() {
        let controller = test_controller();
        controller.handle_message(
            RunnerId(0),
            ControllerMessage::CreateAndRunTask(TaskCreateParams {
                new_task: TaskId(42),
                user_module: None,
                mode: crate::runner::TaskRunMode::KthreadReturnedToInit,
            }),
        );
        assert_eq!(controller.task_runner(TaskId(42)), Some(RunnerId(0)));
        assert_eq!(controller.runner_kind(RunnerId(0)), Some(RunnerKind::Task));
    }

    #[test]
    fn serialize_wakes_the_runner_hosting_the_target_task() {
        let controller = test_controller();
        let id = controller.boot_primary(
            PrimaryBootParams { kernel_module: vec![], cmdline: String::new(), initrd: vec![] },
            "",
        );
        controller.handle_message(id, ControllerMessage::StartPrimary { init_task: TaskId(9) });
        controller.inner.borrow().runners.get(id).unwrap().lock.go_idle();

        controller.handle_message(id, ControllerMessage::Serialize { from: TaskId(1), wake: TaskId(9) });

        let from = controller.inner.borrow().runners.get(id).unwrap().lock.park();
        assert_eq!(from, TaskId(1));
    }

    #[test]
    fn task_release_removes_the_runner() {
        let controller = test_controller();
        controller.handle_message(
            RunnerId(0),
            ControllerMessage::CreateAndRunTask(TaskCreateParams {
                new_task: TaskId(5),
                user_module: None,
                mode: crate::runner::TaskRunMode::KthreadReturnedToInit,
            }),
        );
        controller.handle_message(RunnerId(0), ControllerMessage::TaskRelease { task: TaskId(5) });
        assert_eq!(controller.runner_count(), 0);
    }

    #[test]
    fn panic_marks_the_runner_dormant_without_releasing_it() {
        let controller = test_controller();
        let id = controller.boot_primary(
            PrimaryBootParams { kernel_module: vec![], cmdline: String::new(), initrd: vec![] },
            "",
        );
        controller.handle_message(id, ControllerMessage::Panic { message: "oops".into() });
        assert_eq!(controller.is_dormant(id), Some(true));
        assert_eq!(controller.runner_count(), 1);
    }

    #[test]
    fn console_write_goes_through_the_writer_and_completes_success() {
        let written = Rc::new(RefCell::new(String::new()));
        let written_clone = written.clone();
        let controller = Controller::<NativeMemory>::new(Config::new(), |_| {}, move |s| written_clone.borrow_mut().push_str(s));
        controller.attach_kernel_memory(KernelMemory::new(NativeMemory::new(1)));
        let id = controller.boot_primary(
            PrimaryBootParams { kernel_module: vec![], cmdline: String::new(), initrd: vec![] },
            "",
        );
        controller.inner.borrow().kernel_memory.as_ref().unwrap().write(0, b"hi").unwrap();
        controller.handle_message(
            id,
            ControllerMessage::HostCall(HostCallRequest {
                call: HostCall::Console(ConsoleCall::Write { buf_offset: 0, len: 2 }),
            }),
        );
        assert_eq!(*written.borrow(), "hi");
        let (status, payload) = controller.inner.borrow().runners.get(id).unwrap().messengers.console.wait_for_result();
        assert_eq!(status, StatusCode::Success);
        assert_eq!(payload, 2);
    }

    #[test]
    fn console_input_injection_completes_a_queued_read() {
        let controller = test_controller();
        let id = controller.boot_primary(
            PrimaryBootParams { kernel_module: vec![], cmdline: String::new(), initrd: vec![] },
            "",
        );
        controller.inner.borrow().runners.get(id).unwrap().messengers.console.begin();
        controller.handle_message(
            id,
            ControllerMessage::HostCall(HostCallRequest {
                call: HostCall::Console(ConsoleCall::Read { buf_offset: 0x1000, len: 4 }),
            }),
        );
        controller.inject_console_input(b"hey");
        let (status, payload) = controller.inner.borrow().runners.get(id).unwrap().messengers.console.wait_for_result();
        assert_eq!(status, StatusCode::Success);
        assert_eq!(payload, 3);
        let mut buf = [0u8; 3];
        controller.inner.borrow().kernel_memory.as_ref().unwrap().read(0x1000, &mut buf).unwrap();
        assert_eq!(&buf, b"hey");
    }

    #[test]
    fn network_call_without_relay_configured_fails_immediately() {
        let controller = test_controller();
        let id = controller.boot_primary(
            PrimaryBootParams { kernel_module: vec![], cmdline: String::new(), initrd: vec![] },
            "",
        );
        controller.inner.borrow().runners.get(id).unwrap().messengers.network.begin();
        controller.handle_message(
            id,
            ControllerMessage::HostCall(HostCallRequest {
                call: HostCall::Network(NetworkCall::Open { host: "example.com".into(), port: 80 }),
            }),
        );
        let (status, _) = controller.inner.borrow().runners.get(id).unwrap().messengers.network.wait_for_result();
        assert_eq!(status, StatusCode::Error);
    }

    #[test]
    fn persistence_save_without_a_store_fails_immediately() {
        let controller = test_controller();
        let id = controller.boot_primary(
            PrimaryBootParams { kernel_module: vec![], cmdline: String::new(), initrd: vec![] },
            "",
        );
        controller.inner.borrow().runners.get(id).unwrap().messengers.persistence.begin();
        controller.handle_message(
            id,
            ControllerMessage::HostCall(HostCallRequest {
                call: HostCall::Persistence(PersistenceCall::Save { path: "/a".into(), buf_offset: 0, len: 0, mode: 0o644 }),
            }),
        );
        let (status, _) = controller.inner.borrow().runners.get(id).unwrap().messengers.persistence.wait_for_result();
        assert_eq!(status, StatusCode::Error);
    }

    #[test]
    fn persistence_load_against_the_native_stub_store_reports_not_found() {
        let controller = test_controller();
        // Off wasm32 there is no real IndexedDB; `PersistenceStore` is a
        // zero-sized stub whose `load` always reports a miss, which is
        // exactly the path this test exercises.
        controller.attach_persistence(PersistenceStore);
        let id = controller.boot_primary(
            PrimaryBootParams { kernel_module: vec![], cmdline: String::new(), initrd: vec![] },
            "",
        );
        controller.inner.borrow().runners.get(id).unwrap().messengers.persistence.begin();
        controller.handle_message(
            id,
            ControllerMessage::HostCall(HostCallRequest {
                call: HostCall::Persistence(PersistenceCall::Load { path: "/missing".into(), buf_offset: 0, count: 16 }),
            }),
        );
        let (status, _) = controller.inner.borrow().runners.get(id).unwrap().messengers.persistence.wait_for_result();
        assert_eq!(status, StatusCode::NotFound);
    }
}
