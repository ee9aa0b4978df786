//! Worker-side bootstrap (spec.md §4.1, §6): the entry point a spawned
//! runner's Worker module calls into. Installed as the Worker's own
//! `onmessage`, the same way a worker-pool's thread entry point waits for
//! its one-shot startup message (see DESIGN.md) rather than taking
//! arguments directly — a Worker's module script has no argv, only
//! whatever its spawner posts to it.
//!
//! This is the other end of [`crate::controller`]'s `spawn_primary`/
//! `spawn_secondary`/`spawn_task`: it decodes the boot payload, builds the
//! lock block and messenger trio over the shared slot buffer, assembles
//! the kernel's host-callback import object, and runs the named runner
//! body for the rest of the Worker's life.

#![cfg(target_arch = "wasm32")]

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Function, Object, Reflect, SharedArrayBuffer, Uint8Array, WebAssembly};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::wasm_bindgen;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{DedicatedWorkerGlobalScope, MessageEvent, WorkerGlobalScope};

use crate::bridge::{CallFamily, ConsoleCall, HostCall, HostCallRequest, Messenger, NetworkCall, PersistenceCall, StatusCode, WasmSlots};
use crate::controller::{ControllerMessage, TaskCreateParams};
use crate::memory::{KernelMemory, LinearMemory, WasmMemory};
use crate::task::{ConnectionId, CpuId, RunnerId, TaskId};
use crate::wasm_host::abi::{kernel_imports, syscall_import_name, MAX_SYSCALL_ARITY};
use crate::wasm_host::imports::{bind_unimplemented_stubs, build_env_object};
use crate::wasm_host::loader::{unsatisfied_syscall_imports, ImportDescriptor, UNIMPLEMENTED_SYSCALL_RESULT};

use super::entry::{run_primary, run_secondary, run_task, PrimaryBootParams, SecondaryBootParams, TaskParams, TaskRunMode, UserModuleParams};
use super::lock::LockBlock;
use super::tail::{TailCode, UserModeTail};

/// Negative errno-shaped sentinels returned to the guest when a host call
/// fails in a way that is not simply "no backend configured" (spec.md §4.3
/// call families all map their controller-side [`StatusCode`] down to one
/// of these before the return value crosses back into guest code).
const ERRNO_NOT_FOUND: i32 = -2;
const ERRNO_IO: i32 = -5;

/// Installed as a freshly spawned Worker's module entry point. The
/// controller posts exactly one boot payload per Worker (spec.md §4.1 "a
/// Worker hosts exactly one runner body for its lifetime"), so the handler
/// disarms itself after its first call.
#[wasm_bindgen]
pub fn install_runner_entry_point() {
    let scope: DedicatedWorkerGlobalScope = js_sys::global().unchecked_into();
    let handler_scope = scope.clone();
    let closure = Closure::once(Box::new(move |event: MessageEvent| {
        wasm_bindgen_futures::spawn_local(run_boot_payload(handler_scope.clone(), event.data()));
    }) as Box<dyn FnOnce(MessageEvent)>);
    scope.set_onmessage(Some(closure.as_ref().unchecked_ref()));
    closure.forget();
}

/// Everything one runner body needs for the lifetime of its Worker: the
/// blocking channels back to the controller, plus (primary only, for now)
/// a handle onto the kernel's own linear memory for callbacks that read
/// guest buffers directly (`panic`, `stack_trace_dump`).
struct RunnerContext {
    scope: DedicatedWorkerGlobalScope,
    runner_id: RunnerId,
    lock: LockBlock<WasmSlots>,
    console: Messenger<WasmSlots>,
    network: Messenger<WasmSlots>,
    persistence: Messenger<WasmSlots>,
    tail: RefCell<UserModeTail>,
    kernel_memory: Option<Rc<KernelMemory<WasmMemory>>>,
}

impl RunnerContext {
    fn messenger(&self, family: CallFamily) -> &Messenger<WasmSlots> {
        match family {
            CallFamily::Console => &self.console,
            CallFamily::Network => &self.network,
            CallFamily::Persistence => &self.persistence,
        }
    }

    /// Post a [`ControllerMessage`] and forget it; used for every
    /// controller-bound message except a blocking host call's own
    /// completion, which instead waits on a [`Messenger`].
    fn post(&self, msg: &ControllerMessage) {
        if let Ok(json) = msg.to_json() {
            let _ = self.scope.post_message(&JsValue::from_str(&json));
        }
    }

    /// Arm the messenger for `call`'s family, post it to the controller,
    /// and block until the controller completes it (spec.md §4.3).
    fn blocking_host_call(&self, call: HostCall) -> (StatusCode, i32) {
        let messenger = self.messenger(call.family());
        messenger.begin();
        self.post(&ControllerMessage::HostCall(HostCallRequest { call }));
        messenger.wait_for_result()
    }

    fn host_call_retval(&self, call: HostCall) -> i32 {
        let (status, payload) = self.blocking_host_call(call);
        match status {
            StatusCode::Success => payload,
            StatusCode::NotFound => ERRNO_NOT_FOUND,
            StatusCode::RemoteClosed => 0,
            StatusCode::Error => ERRNO_IO,
        }
    }
}

async fn run_boot_payload(scope: DedicatedWorkerGlobalScope, data: JsValue) {
    let payload: Object = match data.dyn_into() {
        Ok(obj) => obj,
        Err(_) => return,
    };
    let runner_id = RunnerId(field_f64(&payload, "runnerId").unwrap_or(0.0) as usize);
    let kind = field_string(&payload, "kind").unwrap_or_default();
    let Ok(slots) = Reflect::get(&payload, &"slots".into()).and_then(|v| v.dyn_into::<SharedArrayBuffer>()) else {
        return;
    };
    let params: Object = Reflect::get(&payload, &"params".into()).ok().and_then(|v| v.dyn_into().ok()).unwrap_or_else(Object::new);

    let array = js_sys::Int32Array::new(&slots);
    let ctx = Rc::new(RunnerContext {
        scope,
        runner_id,
        lock: LockBlock::new(WasmSlots::new(array.clone(), 0)),
        console: Messenger::new(WasmSlots::new(array.clone(), 2)),
        network: Messenger::new(WasmSlots::new(array.clone(), 4)),
        persistence: Messenger::new(WasmSlots::new(array.clone(), 6)),
        tail: RefCell::new(UserModeTail::new()),
        kernel_memory: if kind == "primary" { Some(Rc::new(KernelMemory::new(WasmMemory::new(fresh_memory())))) } else { None },
    });

    let outcome = match kind.as_str() {
        "primary" => run_primary_worker(ctx.clone(), &params).await,
        "secondary" => run_secondary_worker(ctx.clone(), &params).await,
        "task" => run_task_worker(ctx.clone(), &params).await,
        other => Err(format!("unknown runner kind {other:?}")),
    };

    if let Err(message) = outcome {
        ctx.post(&ControllerMessage::Panic { message });
    }
}

/// A non-shared `WebAssembly.Memory` for a kernel module instance that has
/// no reason to alias another runner's memory (spec.md's shared-kernel-
/// memory requirement applies to the primary runner, which the controller
/// attaches via `attach_kernel_memory`; secondary/task runners in this
/// bootstrap instantiate their own — see DESIGN.md "kernel memory sharing"
/// for the follow-up this leaves open).
fn fresh_memory() -> WebAssembly::Memory {
    WasmMemory::create(16, 4096, true).map(|m| m.js_memory().clone()).unwrap_or_else(|_| {
        let descriptor = Object::new();
        let _ = Reflect::set(&descriptor, &"initial".into(), &16.into());
        WebAssembly::Memory::new(&descriptor).expect("fallback private memory")
    })
}

async fn run_primary_worker(ctx: Rc<RunnerContext>, params: &Object) -> Result<(), String> {
    let cmdline = field_string(params, "cmdline").unwrap_or_default();
    let kernel_module = field_bytes(params, "kernelModule").ok_or("boot payload missing kernelModule")?;
    let initrd = field_bytes(params, "initrd").unwrap_or_default();
    let kernel_memory = ctx.kernel_memory.clone().expect("primary context always carries kernel memory");

    let env = build_kernel_env(&ctx, kernel_memory.backing().js_memory(), &kernel_module)?;
    let boot_params = PrimaryBootParams { kernel_module, cmdline, initrd };
    run_primary(&boot_params, &kernel_memory, &env).await.map_err(|e| e.to_string())
}

async fn run_secondary_worker(ctx: Rc<RunnerContext>, params: &Object) -> Result<(), String> {
    let cpu = CpuId(field_f64(params, "cpu").unwrap_or(0.0) as u32);
    let idle_task = TaskId(field_f64(params, "idleTask").unwrap_or(0.0) as u64);
    let kernel_module = field_bytes(params, "kernelModule").ok_or("boot payload missing kernelModule")?;

    let memory = fresh_memory();
    let env = build_kernel_env(&ctx, &memory, &kernel_module)?;
    let boot_params = SecondaryBootParams { cpu, idle_task };
    run_secondary(&boot_params, &env, &kernel_module).await.map_err(|e| e.to_string())
}

async fn run_task_worker(ctx: Rc<RunnerContext>, params: &Object) -> Result<(), String> {
    let new_task = TaskId(field_f64(params, "newTask").unwrap_or(0.0) as u64);
    let kernel_module = field_bytes(params, "kernelModule").ok_or("boot payload missing kernelModule")?;
    let mode = match field_string(params, "mode").as_deref() {
        Some("cloneCallback") => TaskRunMode::CloneCallback,
        _ => TaskRunMode::KthreadReturnedToInit,
    };

    let memory = fresh_memory();
    let env = build_kernel_env(&ctx, &memory, &kernel_module)?;

    let user_module_obj = Reflect::get(params, &"userModule".into()).ok().filter(|v| !v.is_undefined());
    let user_module = user_module_obj.and_then(|v| v.dyn_into::<Object>().ok()).map(|um| UserModuleParams {
        bytes_start: field_f64(&um, "bytesStart").unwrap_or(0.0) as u32,
        bytes_end: field_f64(&um, "bytesEnd").unwrap_or(0.0) as u32,
        data_base: field_f64(&um, "dataBase").unwrap_or(0.0) as u32,
        table_base: field_f64(&um, "tableBase").unwrap_or(0.0) as u32,
    });
    let task_params = TaskParams { previous: TaskId(0), new_task, user_module, mode };

    // The kernel's task-create host callback already named the user module's
    // bytes as an offset into kernel memory; this bootstrap does not yet
    // slice them back out into their own buffer (see DESIGN.md), so a task
    // with a user module runs its kernel-side return-from-fork path only.
    run_task(&task_params, &env, &kernel_module, None, None).await.map_err(|e| e.to_string())
}

/// Assemble the kernel's `env` import object: the shared memory, every
/// host callback [`kernel_imports`] names, and a uniform ENOSYS stub for
/// every numbered syscall arity (spec.md §4.2) — full syscall dispatch is
/// future work tracked in DESIGN.md, so every arity currently resolves to
/// the same unimplemented stub `build_env_object` would otherwise leave
/// unbound.
fn build_kernel_env(ctx: &Rc<RunnerContext>, memory: &WebAssembly::Memory, kernel_module: &[u8]) -> Result<Object, String> {
    let host_callbacks = host_callback_table(ctx);
    let stub = enosys_stub();
    let wrapped_syscalls: Vec<Function> = (0..=MAX_SYSCALL_ARITY).map(|_| stub.clone()).collect();

    let env = build_env_object(memory, &host_callbacks, &wrapped_syscalls).map_err(|_| "failed to build env object".to_string())?;

    let satisfied: Vec<String> = (0..=MAX_SYSCALL_ARITY).map(syscall_import_name).collect();
    let declared = declared_imports(kernel_module)?;
    let unsatisfied = unsatisfied_syscall_imports(crate::wasm_host::abi::HOST_NAMESPACE, &declared, &satisfied);
    bind_unimplemented_stubs(&env, &unsatisfied, &stub).map_err(|_| "failed to bind unimplemented stubs".to_string())?;
    Ok(env)
}

fn declared_imports(bytes: &[u8]) -> Result<Vec<ImportDescriptor>, String> {
    let module = WebAssembly::Module::new(&Uint8Array::from(bytes)).map_err(|_| "failed to compile module for import inspection".to_string())?;
    let entries = WebAssembly::Module::imports(&module);
    let mut out = Vec::with_capacity(entries.length() as usize);
    for entry in entries.iter() {
        let obj: Object = entry.unchecked_into();
        let module = field_string(&obj, "module").unwrap_or_default();
        let name = field_string(&obj, "name").unwrap_or_default();
        let kind = field_string(&obj, "kind").unwrap_or_default();
        out.push(ImportDescriptor { module, name, kind });
    }
    Ok(out)
}

fn enosys_stub() -> Function {
    let closure = Closure::wrap(Box::new(|| UNIMPLEMENTED_SYSCALL_RESULT) as Box<dyn FnMut() -> i32>);
    let f: Function = closure.as_ref().clone().unchecked_into();
    closure.forget();
    f
}

/// Build the 22 kernel host-callback [`Function`]s (spec.md §6), each a
/// [`Closure`] capturing this runner's context. Control callbacks
/// (`cpu_start`..`user_exec_load`) either post a [`ControllerMessage`] or
/// act purely locally; I/O callbacks (`console_*`/`network_*`/
/// `persistence_*`) go through [`RunnerContext::blocking_host_call`], the
/// same messenger protocol [`crate::bridge`] already implements and tests.
fn host_callback_table(ctx: &Rc<RunnerContext>) -> Vec<(&'static str, Function)> {
    vec![
        (kernel_imports::CPU_START, wrap2(ctx, |ctx, cpu: i32, idle_task: i32| {
            ctx.post(&ControllerMessage::StartSecondary { cpu: CpuId(cpu as u32), idle_task: TaskId(idle_task as u64) });
            0
        })),
        (kernel_imports::CPU_STOP, wrap1(ctx, |_ctx, _cpu: i32| 0)),
        (
            kernel_imports::TASK_CREATE,
            wrap7(ctx, |ctx, new_task: i32, has_user_module: i32, bytes_start: i32, bytes_end: i32, data_base: i32, table_base: i32, mode: i32| {
                let user_module = (has_user_module != 0).then_some(UserModuleParams {
                    bytes_start: bytes_start as u32,
                    bytes_end: bytes_end as u32,
                    data_base: data_base as u32,
                    table_base: table_base as u32,
                });
                let mode = if mode == 0 { TaskRunMode::KthreadReturnedToInit } else { TaskRunMode::CloneCallback };
                ctx.post(&ControllerMessage::CreateAndRunTask(TaskCreateParams { new_task: TaskId(new_task as u64), user_module, mode }));
                0
            }),
        ),
        (kernel_imports::TASK_RUN, wrap1(ctx, |_ctx, _task: i32| 0)),
        (kernel_imports::TASK_RELEASE, wrap1(ctx, |ctx, task: i32| {
            ctx.post(&ControllerMessage::TaskRelease { task: TaskId(task as u64) });
            0
        })),
        (kernel_imports::SERIALIZE, wrap2(ctx, |ctx, from: i32, wake: i32| {
            ctx.lock.go_idle();
            ctx.post(&ControllerMessage::Serialize { from: TaskId(from as u64), wake: TaskId(wake as u64) });
            ctx.lock.park().0 as i32
        })),
        (kernel_imports::PANIC, wrap2(ctx, |ctx, ptr: i32, len: i32| {
            let message = read_kernel_string(ctx, ptr as u32, len as u32).unwrap_or_else(|| format!("panic at {ptr:#x} ({len} bytes)"));
            ctx.post(&ControllerMessage::Panic { message });
            0
        })),
        (kernel_imports::STACK_TRACE_DUMP, wrap2(ctx, |ctx, ptr: i32, len: i32| {
            ctx.host_call_retval(HostCall::Console(ConsoleCall::Write { buf_offset: ptr as u32, len: len as u32 }))
        })),
        (kernel_imports::USER_TAIL_SELECT, wrap1(ctx, |ctx, code: i32| {
            let Some(tail_code) = TailCode::from_i32(code) else { return -1 };
            ctx.tail.borrow_mut().apply(tail_code) as i32
        })),
        (kernel_imports::CLOCK_MONOTONIC, wrap0_f64(ctx, |ctx| {
            ctx.scope.performance().map(|p| p.now()).unwrap_or(0.0)
        })),
        (kernel_imports::CONSOLE_PUT, wrap2(ctx, |ctx, buf_offset: i32, len: i32| {
            ctx.host_call_retval(HostCall::Console(ConsoleCall::Write { buf_offset: buf_offset as u32, len: len as u32 }))
        })),
        (kernel_imports::CONSOLE_GET, wrap2(ctx, |ctx, buf_offset: i32, len: i32| {
            ctx.host_call_retval(HostCall::Console(ConsoleCall::Read { buf_offset: buf_offset as u32, len: len as u32 }))
        })),
        (kernel_imports::NETWORK_OPEN, wrap2(ctx, |ctx, host_ptr: i32, port: i32| {
            let host = read_kernel_string(ctx, host_ptr as u32, 256).unwrap_or_default();
            ctx.host_call_retval(HostCall::Network(NetworkCall::Open { host, port: port as u16 }))
        })),
        (kernel_imports::NETWORK_WRITE, wrap3(ctx, |ctx, id: i32, buf_offset: i32, len: i32| {
            ctx.host_call_retval(HostCall::Network(NetworkCall::Write { id: ConnectionId(id as u32), buf_offset: buf_offset as u32, len: len as u32 }))
        })),
        (kernel_imports::NETWORK_READ, wrap3(ctx, |ctx, id: i32, buf_offset: i32, count: i32| {
            ctx.host_call_retval(HostCall::Network(NetworkCall::Read { id: ConnectionId(id as u32), buf_offset: buf_offset as u32, count: count as u32 }))
        })),
        (kernel_imports::NETWORK_POLL, wrap1(ctx, |ctx, id: i32| {
            ctx.host_call_retval(HostCall::Network(NetworkCall::Poll { id: ConnectionId(id as u32) }))
        })),
        (kernel_imports::NETWORK_CLOSE, wrap1(ctx, |ctx, id: i32| {
            ctx.host_call_retval(HostCall::Network(NetworkCall::Close { id: ConnectionId(id as u32) }))
        })),
        (kernel_imports::PERSISTENCE_SAVE, wrap5(ctx, |ctx, path_ptr: i32, buf_offset: i32, len: i32, mode: i32, path_len: i32| {
            let path = read_kernel_string(ctx, path_ptr as u32, path_len.max(1) as u32).unwrap_or_default();
            ctx.host_call_retval(HostCall::Persistence(PersistenceCall::Save { path, buf_offset: buf_offset as u32, len: len as u32, mode: mode as u32 }))
        })),
        (kernel_imports::PERSISTENCE_LOAD, wrap4(ctx, |ctx, path_ptr: i32, path_len: i32, buf_offset: i32, count: i32| {
            let path = read_kernel_string(ctx, path_ptr as u32, path_len.max(1) as u32).unwrap_or_default();
            ctx.host_call_retval(HostCall::Persistence(PersistenceCall::Load { path, buf_offset: buf_offset as u32, count: count as u32 }))
        })),
        (kernel_imports::PERSISTENCE_DELETE, wrap2(ctx, |ctx, path_ptr: i32, path_len: i32| {
            let path = read_kernel_string(ctx, path_ptr as u32, path_len.max(1) as u32).unwrap_or_default();
            ctx.host_call_retval(HostCall::Persistence(PersistenceCall::Delete { path }))
        })),
        (kernel_imports::PERSISTENCE_LIST, wrap4(ctx, |ctx, prefix_ptr: i32, prefix_len: i32, buf_offset: i32, count: i32| {
            let prefix = read_kernel_string(ctx, prefix_ptr as u32, prefix_len.max(1) as u32).unwrap_or_default();
            ctx.host_call_retval(HostCall::Persistence(PersistenceCall::List { prefix, buf_offset: buf_offset as u32, count: count as u32 }))
        })),
        // Re-instantiation of the newly exec'd module happens on the
        // `AboutToExec` transition `USER_TAIL_SELECT` already drives; this
        // callback only needs to acknowledge the load request itself.
        (kernel_imports::USER_EXEC_LOAD, wrap1(ctx, |_ctx, _module_ptr: i32| 0)),
    ]
}

/// Read a string out of the primary runner's kernel memory, if this
/// runner has a handle onto it (spec.md §4.2). Secondary/task runners do
/// not yet carry one (see DESIGN.md), so callbacks that need guest bytes
/// fall back to a placeholder on them.
fn read_kernel_string(ctx: &RunnerContext, ptr: u32, max_len: u32) -> Option<String> {
    let km = ctx.kernel_memory.as_ref()?;
    let bytes = km.backing().read_cstr(ptr, max_len).ok().flatten()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn field_f64(obj: &Object, name: &str) -> Option<f64> {
    Reflect::get(obj, &name.into()).ok().and_then(|v| v.as_f64())
}

fn field_string(obj: &Object, name: &str) -> Option<String> {
    Reflect::get(obj, &name.into()).ok().and_then(|v| v.as_string())
}

fn field_bytes(obj: &Object, name: &str) -> Option<Vec<u8>> {
    Reflect::get(obj, &name.into()).ok().and_then(|v| v.dyn_into::<Uint8Array>().ok()).map(|arr| arr.to_vec())
}

// -- Closure-building helpers ------------------------------------------------
//
// `wasm_bindgen::Closure` needs a concrete `Fn`/`FnMut` signature per
// callback, so these thin wrappers exist purely to avoid repeating the
// `Closure::wrap(Box::new(...) as Box<dyn FnMut(...) -> i32>)` boilerplate
// at each of the 22 call sites above.

fn wrap0_f64(ctx: &Rc<RunnerContext>, f: impl Fn(&RunnerContext) -> f64 + 'static) -> Function {
    let ctx = ctx.clone();
    let closure = Closure::wrap(Box::new(move || f(&ctx)) as Box<dyn FnMut() -> f64>);
    finish(closure)
}

fn wrap1(ctx: &Rc<RunnerContext>, f: impl Fn(&RunnerContext, i32) -> i32 + 'static) -> Function {
    let ctx = ctx.clone();
    let closure = Closure::wrap(Box::new(move |a: i32| f(&ctx, a)) as Box<dyn FnMut(i32) -> i32>);
    finish(closure)
}

fn wrap2(ctx: &Rc<RunnerContext>, f: impl Fn(&RunnerContext, i32, i32) -> i32 + 'static) -> Function {
    let ctx = ctx.clone();
    let closure = Closure::wrap(Box::new(move |a: i32, b: i32| f(&ctx, a, b)) as Box<dyn FnMut(i32, i32) -> i32>);
    finish(closure)
}

fn wrap3(ctx: &Rc<RunnerContext>, f: impl Fn(&RunnerContext, i32, i32, i32) -> i32 + 'static) -> Function {
    let ctx = ctx.clone();
    let closure = Closure::wrap(Box::new(move |a: i32, b: i32, c: i32| f(&ctx, a, b, c)) as Box<dyn FnMut(i32, i32, i32) -> i32>);
    finish(closure)
}

fn wrap4(ctx: &Rc<RunnerContext>, f: impl Fn(&RunnerContext, i32, i32, i32, i32) -> i32 + 'static) -> Function {
    let ctx = ctx.clone();
    let closure = Closure::wrap(Box::new(move |a: i32, b: i32, c: i32, d: i32| f(&ctx, a, b, c, d)) as Box<dyn FnMut(i32, i32, i32, i32) -> i32>);
    finish(closure)
}

fn wrap5(ctx: &Rc<RunnerContext>, f: impl Fn(&RunnerContext, i32, i32, i32, i32, i32) -> i32 + 'static) -> Function {
    let ctx = ctx.clone();
    let closure = Closure::wrap(Box::new(move |a: i32, b: i32, c: i32, d: i32, e: i32| f(&ctx, a, b, c, d, e)) as Box<dyn FnMut(i32, i32, i32, i32, i32) -> i32>);
    finish(closure)
}

fn wrap7(
    ctx: &Rc<RunnerContext>,
    f: impl Fn(&RunnerContext, i32, i32, i32, i32, i32, i32, i32) -> i32 + 'static,
) -> Function {
    let ctx = ctx.clone();
    let closure = Closure::wrap(Box::new(move |a: i32, b: i32, c: i32, d: i32, e: i32, g: i32, h: i32| f(&ctx, a, b, c, d, e, g, h))
        as Box<dyn FnMut(i32, i32, i32, i32, i32, i32, i32) -> i32>);
    finish(closure)
}

/// Leak a [`Closure`] into a [`Function`] the kernel module's import table
/// can hold onto for as long as the Worker lives — there is no earlier
/// point at which it would be safe to drop (spec.md §4.1 "a Worker hosts
/// exactly one runner body for its lifetime").
fn finish<T: ?Sized>(closure: Closure<T>) -> Function {
    let f: Function = closure.as_ref().clone().unchecked_into();
    closure.forget();
    f
}
