//! Ambient correlation context for the current unit of work.
//!
//! Each unit of work (an async task inside [`scope`], or a plain thread
//! otherwise) owns three independent slots: the inbound request, the
//! authenticated user and the background job. Hooks fill the slots at the
//! edges of the system; the record serializer snapshots them at emit time
//! so every log line carries its correlation fields without any call-site
//! plumbing.

use std::cell::RefCell;
use std::future::Future;

use serde::Serialize;

/// Identity of the inbound request handled by the current unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestInfo {
    /// Correlation id, inbound or freshly minted.
    pub id: String,
    /// HTTP method, e.g. `GET`.
    pub method: String,
    /// Request path, e.g. `/orders/42`.
    pub path: String,
}

/// Principal attached to the current request, if authentication ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub is_authenticated: bool,
}

/// Identity of the background job executing on the current unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Default)]
struct ContextSlots {
    request: Option<RequestInfo>,
    user: Option<UserInfo>,
    job: Option<JobInfo>,
}

tokio::task_local! {
    static TASK_SLOTS: RefCell<ContextSlots>;
}

thread_local! {
    static THREAD_SLOTS: RefCell<ContextSlots> = RefCell::new(ContextSlots::default());
}

/// Run `f` against the slots of the current unit of work: the active task
/// scope when inside [`scope`] or [`sync_scope`], the calling thread's own
/// slots otherwise.
fn with_slots<T>(f: impl FnOnce(&mut ContextSlots) -> T) -> T {
    let mut f = Some(f);
    let from_task = TASK_SLOTS.try_with(|cell| {
        let f = f.take().expect("slot closure consumed twice");
        f(&mut cell.borrow_mut())
    });
    match from_task {
        Ok(value) => value,
        // Not inside a task scope; try_with never ran the closure.
        Err(_) => THREAD_SLOTS.with(|cell| {
            let f = f.take().expect("slot closure consumed twice");
            f(&mut cell.borrow_mut())
        }),
    }
}

/// Run `fut` with a fresh, empty context.
///
/// Every scope owns its own slots: nothing set inside leaks to the
/// spawning task, to sibling scopes, or to the thread the executor happens
/// to poll the future on.
pub async fn scope<F: Future>(fut: F) -> F::Output {
    TASK_SLOTS.scope(RefCell::new(ContextSlots::default()), fut).await
}

/// Synchronous variant of [`scope`] for thread-based hosts, e.g. one job
/// executing on a reused worker thread.
pub fn sync_scope<T>(f: impl FnOnce() -> T) -> T {
    TASK_SLOTS.sync_scope(RefCell::new(ContextSlots::default()), f)
}

/// Store the request identity for the current unit of work, replacing any
/// previous value.
pub fn set_request_info(info: RequestInfo) {
    with_slots(|slots| slots.request = Some(info));
}

/// Snapshot of the current request identity, if one is set. Later writes
/// do not affect the returned value.
pub fn get_request_info() -> Option<RequestInfo> {
    with_slots(|slots| slots.request.clone())
}

/// Remove the request identity. Clearing an unset slot is a no-op.
pub fn clear_request_info() {
    with_slots(|slots| slots.request = None);
}

pub fn set_user_info(info: UserInfo) {
    with_slots(|slots| slots.user = Some(info));
}

pub fn get_user_info() -> Option<UserInfo> {
    with_slots(|slots| slots.user.clone())
}

pub fn clear_user_info() {
    with_slots(|slots| slots.user = None);
}

pub fn set_job_info(info: JobInfo) {
    with_slots(|slots| slots.job = Some(info));
}

pub fn get_job_info() -> Option<JobInfo> {
    with_slots(|slots| slots.job.clone())
}

pub fn clear_job_info() {
    with_slots(|slots| slots.job = None);
}
