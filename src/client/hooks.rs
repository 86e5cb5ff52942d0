//! Hook engine.
//!
//! Polls watched keys on a fixed tick and dispatches callbacks when the raw
//! value changes. Hooks exist because the broker emits no change
//! notification for `SET` (only `PUB` broadcasts), so reacting to keystore
//! state means re-reading it.
use super::ClientInner;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::{interval, Duration};

/// How often every watched key is re-read.
pub(crate) const HOOK_TICK: Duration = Duration::from_millis(10);

/// Poll loop; one task per client, alive while the client is running.
pub(crate) async fn run(inner: Arc<ClientInner>) {
    // Most recently observed raw value per hook, keyed by hook index. The
    // hooks list is append-only, so indexes are stable. `None` means the key
    // was last seen absent (also the starting state).
    let mut memos: HashMap<usize, Option<String>> = HashMap::new();
    let mut tick = interval(HOOK_TICK);

    loop {
        tick.tick().await;
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        let core = match inner.core_handle() {
            Some(core) => core,
            None => continue,
        };
        let hooks = inner.hooks.read().clone();

        for (index, hook) in hooks.iter().enumerate() {
            let current = match core.get(&hook.key).await {
                Ok(value) => value,
                Err(e) => {
                    // skip the tick without touching the memo
                    inner.note_error("hook poll", &hook.key, &e);
                    continue;
                }
            };
            inner.liveness.mark_alive();

            let memo = memos.entry(index).or_insert(None);
            if *memo == current {
                continue;
            }

            match &current {
                Some(raw) => {
                    // an undecodable or differently-typed value updates the
                    // memo without firing, so the failure does not recur
                    // every tick
                    if let Some(sendable) = inner.decode_typed(raw, &hook.did) {
                        (hook.callback)(&hook.key, Some(sendable));
                    }
                }
                None => (hook.callback)(&hook.key, None),
            }
            *memo = current;
        }
    }
}
