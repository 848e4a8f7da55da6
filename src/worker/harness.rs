//! Source generation for the executable that runs one group of calls.
//!
//! The declaring source is embedded in `__precomp_decl`, next to a driver that
//! runs every call through `__precomp_rt::run`. The runtime module reports
//! each outcome on stdout as a tab separated marker line:
//!
//! ```text
//! @@precomp <id> <ok|error|timeout> <millis> <bytes> <Debug-escaped payload>
//! ```

use anyhow::{Context, Result, anyhow, bail};
use proc_macro2::TokenStream;
use quote::quote;

use crate::execute::protocol::WorkerItem;

pub const MARKER: &str = "@@precomp";

const RUNTIME: &str = r#"
mod __precomp_rt {
    use ::std::alloc::{GlobalAlloc, Layout, System};
    use ::std::sync::atomic::{AtomicU64, Ordering};
    use ::std::sync::mpsc;
    use ::std::time::{Duration, Instant};

    pub struct Counting;

    pub static ALLOCATED: AtomicU64 = AtomicU64::new(0);

    unsafe impl GlobalAlloc for Counting {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            ALLOCATED.fetch_add(layout.size() as u64, Ordering::Relaxed);
            unsafe { System.alloc(layout) }
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            unsafe { System.dealloc(ptr, layout) }
        }

        unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
            if new_size > layout.size() {
                ALLOCATED.fetch_add((new_size - layout.size()) as u64, Ordering::Relaxed);
            }
            unsafe { System.realloc(ptr, layout, new_size) }
        }
    }

    #[global_allocator]
    static GLOBAL: Counting = Counting;

    pub fn install() {
        ::std::panic::set_hook(Box::new(|_| {}));
    }

    pub fn block_on<F: ::std::future::Future>(future: F) -> F::Output {
        use ::std::future::Future;
        use ::std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

        fn noop_raw() -> RawWaker {
            fn clone(_: *const ()) -> RawWaker {
                noop_raw()
            }
            fn noop(_: *const ()) {}
            static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
            RawWaker::new(::std::ptr::null(), &VTABLE)
        }

        let waker = unsafe { Waker::from_raw(noop_raw()) };
        let mut cx = Context::from_waker(&waker);
        let mut future = Box::pin(future);
        loop {
            if let Poll::Ready(value) = future.as_mut().poll(&mut cx) {
                return value;
            }
            ::std::thread::yield_now();
        }
    }

    fn panic_message(payload: Box<dyn ::std::any::Any + Send>) -> String {
        if let Some(text) = payload.downcast_ref::<&str>() {
            return text.to_string();
        }
        if let Some(text) = payload.downcast_ref::<String>() {
            return text.clone();
        }
        "panicked with a non-string payload".to_string()
    }

    fn report(id: &str, status: &str, millis: u128, bytes: u64, payload: &str) {
        println!("\n@@precomp\t{}\t{}\t{}\t{}\t{:?}", id, status, millis, bytes, payload);
    }

    pub fn run<T, F>(id: &str, timeout_ms: u64, call: F)
    where
        T: ::std::fmt::Debug + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let before = ALLOCATED.load(Ordering::Relaxed);
        let started = Instant::now();
        let spawned = ::std::thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(move || {
                let outcome = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(call))
                    .map(|value| format!("{:?}", value))
                    .map_err(panic_message);
                let _ = tx.send(outcome);
            });
        if let Err(err) = spawned {
            report(id, "error", 0, 0, &format!("failed to spawn thread: {}", err));
            return;
        }
        let outcome = rx.recv_timeout(Duration::from_millis(timeout_ms));
        let millis = started.elapsed().as_millis();
        match outcome {
            Ok(Ok(text)) => {
                let bytes = ALLOCATED.load(Ordering::Relaxed).saturating_sub(before);
                report(id, "ok", millis, bytes, &text)
            }
            Ok(Err(message)) => report(id, "error", millis, 0, &message),
            Err(mpsc::RecvTimeoutError::Timeout) => report(
                id,
                "timeout",
                millis,
                0,
                &format!("execution exceeded {} ms", timeout_ms),
            ),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                report(id, "error", millis, 0, "thread exited without a result")
            }
        }
    }
}
"#;

/// Driver statement for one item.
pub fn driver_call(item: &WorkerItem) -> Result<TokenStream> {
    if item.parameter_type_names.len() != item.parameter_values.len() {
        bail!(
            "{} parameter types but {} values",
            item.parameter_type_names.len(),
            item.parameter_values.len()
        );
    }
    let path: syn::Path = syn::parse_str(&item.call_path())
        .with_context(|| format!("invalid function path `{}`", item.call_path()))?;
    let args = item
        .parameter_type_names
        .iter()
        .zip(&item.parameter_values)
        .map(|(ty, value)| -> Result<TokenStream> {
            let expr: syn::Expr = syn::parse_str(value)
                .with_context(|| format!("invalid literal argument `{value}`"))?;
            Ok(if ty == "String" {
                quote!(::std::string::String::from(#expr))
            } else {
                quote!(#expr)
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut call = quote!(#path(#(#args),*));
    if item.is_async {
        call = quote!(crate::__precomp_rt::block_on(#call));
    }
    let id = item.invocation_id.as_str();
    let timeout = item.timeout_ms;
    Ok(quote! {
        crate::__precomp_rt::run(#id, #timeout, move || #call);
    })
}

/// Complete harness crate for calls that share `source_text`.
pub fn render(source_text: &str, calls: &[TokenStream]) -> Result<String> {
    let source: TokenStream = source_text
        .parse()
        .map_err(|err| anyhow!("declaring source does not tokenize: {err}"))?;
    let runtime: TokenStream = RUNTIME
        .parse()
        .map_err(|err| anyhow!("runtime does not tokenize: {err}"))?;

    Ok(quote! {
        #![allow(warnings)]

        mod __precomp_decl {
            #source

            pub(crate) fn __precomp_main() {
                crate::__precomp_rt::install();
                #(#calls)*
            }
        }

        #runtime

        fn main() {
            __precomp_decl::__precomp_main();
            ::std::process::exit(0);
        }
    }
    .to_string())
}

/// Outcome parsed from one marker line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub invocation_id: String,
    pub status: String,
    pub millis: u64,
    pub bytes: u64,
    pub payload: String,
}

/// Output the function printed without a trailing newline may precede the marker.
pub fn parse_marker(line: &str) -> Option<Marker> {
    let start = line.find(&format!("{MARKER}\t"))?;
    let mut fields = line[start..].trim_end_matches(['\r', '\n']).splitn(6, '\t');
    if fields.next()? != MARKER {
        return None;
    }
    let invocation_id = fields.next()?.to_string();
    let status = fields.next()?.to_string();
    let millis = fields.next()?.parse().ok()?;
    let bytes = fields.next()?.parse().ok()?;
    let payload = syn::parse_str::<syn::LitStr>(fields.next()?).ok()?.value();
    Some(Marker {
        invocation_id,
        status,
        millis,
        bytes,
        payload,
    })
}
