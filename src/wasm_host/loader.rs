//! Instantiates guest WebAssembly modules — the kernel module once at boot,
//! and one user-executable module per process (spec.md §4.1, §6).
//!
//! The host is itself compiled to WebAssembly, so it cannot hand the guest a
//! native function pointer or alias its linear memory directly; instantiation
//! goes through the browser's own `WebAssembly` object, the same way every
//! host-in-wasm runtime in this space does it (there is no wasmi/wasmtime
//! embedding available from inside wasm32 itself).

use std::fmt;

use super::abi::{is_syscall_import, ENOSYS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    Compile,
    Instantiate,
    MissingExport(String),
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderError::Compile => write!(f, "failed to compile wasm module"),
            LoaderError::Instantiate => write!(f, "failed to instantiate wasm module"),
            LoaderError::MissingExport(name) => write!(f, "module has no export named {name:?}"),
        }
    }
}

/// One entry of `WebAssembly.Module.imports(module)`: which (module, name,
/// kind) triples the guest declared. Used, off `wasm32`, to unit-test the
/// unimplemented-syscall-binding logic without a browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDescriptor {
    pub module: String,
    pub name: String,
    pub kind: String,
}

/// Given the full set of imports a guest module declared and the set of
/// names the host already satisfies (host callbacks plus arities the kernel
/// actually wired up), return the names that need an ENOSYS-returning
/// syscall stub (spec.md §4.2 "unimplemented syscalls").
pub fn unsatisfied_syscall_imports<'a>(
    host_namespace: &str,
    declared: &'a [ImportDescriptor],
    satisfied: &[String],
) -> Vec<&'a str> {
    declared
        .iter()
        .filter(|d| d.module == host_namespace && d.kind == "function")
        .filter(|d| is_syscall_import(&d.name))
        .filter(|d| !satisfied.iter().any(|s| s == &d.name))
        .map(|d| d.name.as_str())
        .collect()
}

/// The integer every unimplemented syscall stub returns, regardless of how
/// many arguments the import declared (spec.md §4.2).
pub const UNIMPLEMENTED_SYSCALL_RESULT: i32 = ENOSYS;

#[cfg(target_arch = "wasm32")]
pub use wasm_impl::{instantiate, instantiate_sync, HostModule};

#[cfg(target_arch = "wasm32")]
mod wasm_impl {
    use super::{ImportDescriptor, LoaderError};
    use js_sys::{Array, Function, Object, Reflect, WebAssembly};
    use wasm_bindgen::{JsCast, JsValue};
    use wasm_bindgen_futures::JsFuture;

    /// A compiled-and-instantiated guest module plus its exports object,
    /// kept around so callers can look up exports by name repeatedly
    /// (kernel boot entries, user `_start`, clone callback, ...).
    pub struct HostModule {
        pub module: WebAssembly::Module,
        pub instance: WebAssembly::Instance,
    }

    impl HostModule {
        pub fn exports(&self) -> Object {
            self.instance.exports()
        }

        pub fn export_function(&self, name: &str) -> Result<Function, LoaderError> {
            let value = Reflect::get(&self.exports().into(), &name.into())
                .map_err(|_| LoaderError::MissingExport(name.to_string()))?;
            value
                .dyn_into::<Function>()
                .map_err(|_| LoaderError::MissingExport(name.to_string()))
        }

        /// Enumerate this module's declared imports, for
        /// [`super::unsatisfied_syscall_imports`].
        pub fn declared_imports(&self) -> Vec<ImportDescriptor> {
            let entries = WebAssembly::Module::imports(&self.module);
            let mut out = Vec::with_capacity(entries.length() as usize);
            for entry in entries.iter() {
                let obj: Object = entry.unchecked_into();
                let module = Reflect::get(&obj, &"module".into())
                    .ok()
                    .and_then(|v| v.as_string())
                    .unwrap_or_default();
                let name = Reflect::get(&obj, &"name".into())
                    .ok()
                    .and_then(|v| v.as_string())
                    .unwrap_or_default();
                let kind = Reflect::get(&obj, &"kind".into())
                    .ok()
                    .and_then(|v| v.as_string())
                    .unwrap_or_default();
                out.push(ImportDescriptor { module, name, kind });
            }
            out
        }
    }

    /// Compile and instantiate `bytes` synchronously, via the `new
    /// WebAssembly.Module`/`new WebAssembly.Instance` constructors rather
    /// than the promise-based `instantiate_buffer` helper. Needed wherever a
    /// guest module is (re-)instantiated from inside a host callback that
    /// the guest is calling synchronously (spec.md §4.1 exec re-entry) —
    /// such a callback cannot `.await` a `Promise`.
    pub fn instantiate_sync(bytes: &[u8], import_object: &Object) -> Result<HostModule, LoaderError> {
        let module = WebAssembly::Module::new(&js_sys::Uint8Array::from(bytes)).map_err(|_| LoaderError::Compile)?;
        let instance =
            WebAssembly::Instance::new(&module, import_object).map_err(|_| LoaderError::Instantiate)?;
        Ok(HostModule { module, instance })
    }

    /// Compile and instantiate `bytes` against `import_object`. Mirrors
    /// `WebAssembly.instantiate`'s two-step (compile, then link) behavior via
    /// the combined JS entry point.
    pub async fn instantiate(bytes: &[u8], import_object: &Object) -> Result<HostModule, LoaderError> {
        let array = Array::new();
        array.push(&js_sys::Uint8Array::from(bytes).into());
        let buffer = array.get(0);

        let promise = WebAssembly::instantiate_buffer(&buffer.dyn_into::<js_sys::Uint8Array>().unwrap(), import_object);
        let result = JsFuture::from(promise).await.map_err(|_| LoaderError::Instantiate)?;

        let instance = Reflect::get(&result, &"instance".into())
            .map_err(|_| LoaderError::Instantiate)?
            .dyn_into::<WebAssembly::Instance>()
            .map_err(|_| LoaderError::Instantiate)?;
        let module = Reflect::get(&result, &"module".into())
            .map_err(|_| LoaderError::Instantiate)?
            .dyn_into::<WebAssembly::Module>()
            .map_err(|_| LoaderError::Instantiate)?;

        Ok(HostModule { module, instance })
    }

    #[allow(dead_code)]
    fn cast_js_value(v: JsValue) -> JsValue {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(module: &str, name: &str, kind: &str) -> ImportDescriptor {
        ImportDescriptor { module: module.into(), name: name.into(), kind: kind.into() }
    }

    #[test]
    fn unsatisfied_syscalls_excludes_host_callbacks() {
        let declared = vec![
            descriptor("env", "syscall0", "function"),
            descriptor("env", "syscall3", "function"),
            descriptor("env", "console_put", "function"),
            descriptor("env", "memory", "memory"),
        ];
        let satisfied = vec!["syscall0".to_string()];
        let unsatisfied = unsatisfied_syscall_imports("env", &declared, &satisfied);
        assert_eq!(unsatisfied, vec!["syscall3"]);
    }

    #[test]
    fn unimplemented_stub_returns_guest_enosys() {
        assert_eq!(UNIMPLEMENTED_SYSCALL_RESULT, -38);
    }
}
