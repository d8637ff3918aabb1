//! Scoped database overrides.
//!
//! A *frame* maps scope keys to database indices and lives in a tokio
//! task-local, so it follows the task across worker threads and is never seen
//! by other tasks. Every entry point installs a fresh frame (a copy of the
//! enclosing one plus the new override) for the duration of the work; the
//! task-local guard drops it on return, error, panic and cancellation, which
//! restores the enclosing state without any cleanup code that could fail.
//!
//! Prefer passing the database explicitly (`handle_for(name, Some(index))`).
//! These helpers exist for code that goes through a [`DynamicHandle`].

use crate::db::helper::DynamicHandle;
use crate::error::{KvError, KvResult};
use crate::models::DbIndex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;

/// Which handles an override applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    /// Every dynamic handle without an override of its own.
    Ambient,
    /// Dynamic handles of one data source.
    Source(String),
}

#[derive(Debug, Clone, Default)]
struct ScopeFrame {
    overrides: HashMap<ScopeKey, DbIndex>,
}

tokio::task_local! {
    static SCOPED_DATABASES: RefCell<ScopeFrame>;
}

fn enclosing_frame() -> ScopeFrame {
    SCOPED_DATABASES
        .try_with(|frame| frame.borrow().clone())
        .unwrap_or_default()
}

fn frame_with(key: ScopeKey, database: DbIndex) -> RefCell<ScopeFrame> {
    let mut frame = enclosing_frame();
    frame.overrides.insert(key, database);
    RefCell::new(frame)
}

/// Run `work` with `database` as the ambient current database.
///
/// Returns whatever `work` returns; errors pass through untouched.
pub async fn run_scoped<F>(database: DbIndex, work: F) -> F::Output
where
    F: Future,
{
    SCOPED_DATABASES
        .scope(frame_with(ScopeKey::Ambient, database), work)
        .await
}

/// Run `work` with `database` selected for `target`'s data source only.
pub async fn run_scoped_on<F, Fut>(database: DbIndex, target: &DynamicHandle, work: F) -> Fut::Output
where
    F: FnOnce(DynamicHandle) -> Fut,
    Fut: Future,
{
    let frame = frame_with(ScopeKey::Source(target.source().to_string()), database);
    SCOPED_DATABASES.scope(frame, work(target.clone())).await
}

/// Synchronous form of [`run_scoped`].
pub fn run_scoped_sync<F, R>(database: DbIndex, work: F) -> R
where
    F: FnOnce() -> R,
{
    SCOPED_DATABASES.sync_scope(frame_with(ScopeKey::Ambient, database), work)
}

/// Synchronous form of [`run_scoped_on`].
pub fn run_scoped_on_sync<F, R>(database: DbIndex, target: &DynamicHandle, work: F) -> R
where
    F: FnOnce(DynamicHandle) -> R,
{
    let frame = frame_with(ScopeKey::Source(target.source().to_string()), database);
    SCOPED_DATABASES.sync_scope(frame, || work(target.clone()))
}

/// Run `work` inside its own frame without overriding anything.
///
/// Needed for the explicit set/clear calls on [`DynamicHandle`]; whatever they
/// set is discarded when `work` finishes.
pub async fn with_scope<F>(work: F) -> F::Output
where
    F: Future,
{
    SCOPED_DATABASES
        .scope(RefCell::new(enclosing_frame()), work)
        .await
}

/// Override visible to the current task for exactly `key`.
pub fn current_override(key: &ScopeKey) -> Option<DbIndex> {
    SCOPED_DATABASES
        .try_with(|frame| frame.borrow().overrides.get(key).copied())
        .ok()
        .flatten()
}

/// Override that applies to `source`: its own first, then the ambient one.
pub(crate) fn override_for(source: &str) -> Option<DbIndex> {
    SCOPED_DATABASES
        .try_with(|frame| {
            let frame = frame.borrow();
            frame
                .overrides
                .get(&ScopeKey::Source(source.to_string()))
                .or_else(|| frame.overrides.get(&ScopeKey::Ambient))
                .copied()
        })
        .ok()
        .flatten()
}

fn no_scope() -> KvError {
    KvError::scope("no database scope is active; run the work inside with_scope")
}

pub(crate) fn set_override(key: ScopeKey, database: DbIndex) -> KvResult<()> {
    SCOPED_DATABASES
        .try_with(|frame| {
            frame.borrow_mut().overrides.insert(key, database);
        })
        .map_err(|_| no_scope())
}

pub(crate) fn clear_override(key: &ScopeKey) -> KvResult<()> {
    SCOPED_DATABASES
        .try_with(|frame| {
            frame.borrow_mut().overrides.remove(key);
        })
        .map_err(|_| no_scope())
}
