//! Event bus - broadcasts named events from producers to subscribed plugins

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::application::errors::PluginResult;

/// Emitted after a plugin finishes loading: `{ "plugin", "version" }`
pub const PLUGIN_LOADED: &str = "plugin.loaded";
/// Emitted after a plugin is unloaded: `{ "plugin" }`
pub const PLUGIN_UNLOADED: &str = "plugin.unloaded";
/// Emitted after the command tree is published: `{ "commands" }`
pub const COMMANDS_PUBLISHED: &str = "commands.published";

pub type HookFuture = BoxFuture<'static, PluginResult<()>>;

/// Handler invoked with the event payload
pub type HookHandler = Arc<dyn Fn(serde_json::Value) -> HookFuture + Send + Sync>;

struct Subscription {
    plugin: String,
    handler: HookHandler,
}

/// Per-plugin failure during one broadcast
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HookFailure {
    pub plugin: String,
    pub error: String,
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryReport {
    pub event: String,
    pub core_handlers: usize,
    pub delivered: Vec<String>,
    pub failed: Vec<HookFailure>,
    /// Subscribed but disabled at emission time; never replayed
    pub skipped: Vec<String>,
}

/// Broadcast hub between event producers and plugin hooks
pub struct EventBus {
    core_handlers: RwLock<HashMap<String, Vec<HookHandler>>>,
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    enabled: RwLock<HashSet<String>>,
    hook_timeout: Duration,
}

impl EventBus {
    pub fn new(hook_timeout: Duration) -> Self {
        Self {
            core_handlers: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            enabled: RwLock::new(HashSet::new()),
            hook_timeout,
        }
    }

    /// Expose a named core hook point and attach a core-side handler to it
    pub fn register_core_handler<F, Fut>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<()>> + Send + 'static,
    {
        let event = event.into();
        let handler: HookHandler = Arc::new(move |payload| handler(payload).boxed());
        if let Ok(mut core) = self.core_handlers.write() {
            tracing::debug!(event = %event, "Registered core hook point");
            core.entry(event).or_default().push(handler);
        }
    }

    /// Names of all hook points the core exposes
    pub fn hook_points(&self) -> Vec<String> {
        let mut points: Vec<String> = self
            .core_handlers
            .read()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default();
        points.sort();
        points
    }

    /// Attach a plugin hook. A second subscription by the same plugin to the
    /// same event replaces the first, so delivery stays at-most-once.
    pub(crate) fn subscribe(&self, plugin: &str, event: &str, handler: HookHandler) {
        let Ok(mut subs) = self.subscriptions.write() else {
            return;
        };
        let list = subs.entry(event.to_string()).or_default();
        if let Some(existing) = list.iter_mut().find(|s| s.plugin == plugin) {
            tracing::debug!(plugin = %plugin, event = %event, "Replacing existing hook");
            existing.handler = handler;
        } else {
            list.push(Subscription {
                plugin: plugin.to_string(),
                handler,
            });
        }
    }

    /// Drop every hook a plugin registered
    pub(crate) fn unsubscribe_plugin(&self, plugin: &str) {
        if let Ok(mut subs) = self.subscriptions.write() {
            for list in subs.values_mut() {
                list.retain(|s| s.plugin != plugin);
            }
            subs.retain(|_, list| !list.is_empty());
        }
        self.set_enabled(plugin, false);
    }

    pub(crate) fn set_enabled(&self, plugin: &str, enabled: bool) {
        if let Ok(mut set) = self.enabled.write() {
            if enabled {
                set.insert(plugin.to_string());
            } else {
                set.remove(plugin);
            }
        }
    }

    /// Plugins subscribed to `event`, enabled or not
    pub fn subscribers(&self, event: &str) -> Vec<String> {
        self.subscriptions
            .read()
            .ok()
            .and_then(|s| s.get(event).map(|l| l.iter().map(|s| s.plugin.clone()).collect()))
            .unwrap_or_default()
    }

    /// Run core handlers for `event`, then broadcast to plugins
    pub async fn emit(&self, event: &str, payload: serde_json::Value) -> DeliveryReport {
        let core: Vec<HookHandler> = self
            .core_handlers
            .read()
            .ok()
            .and_then(|c| c.get(event).cloned())
            .unwrap_or_default();

        for handler in &core {
            if let Err(e) = self.invoke(handler, payload.clone()).await {
                tracing::warn!(event = %event, error = %e, "Core hook failed");
            }
        }

        let mut report = self.emit_to_plugins(event, payload).await;
        report.core_handlers = core.len();
        report
    }

    /// Deliver `payload` to every enabled plugin subscribed to `event`.
    ///
    /// A failing hook is logged and recorded; the others still receive the event.
    pub async fn emit_to_plugins(&self, event: &str, payload: serde_json::Value) -> DeliveryReport {
        let mut report = DeliveryReport {
            event: event.to_string(),
            ..Default::default()
        };

        let targets: Vec<(String, HookHandler)> = {
            let enabled = self.enabled.read().map(|e| e.clone()).unwrap_or_default();
            let subs = match self.subscriptions.read() {
                Ok(s) => s,
                Err(_) => return report,
            };
            let Some(list) = subs.get(event) else {
                tracing::debug!(event = %event, "No subscribers");
                return report;
            };
            list.iter()
                .filter_map(|s| {
                    if enabled.contains(&s.plugin) {
                        Some((s.plugin.clone(), s.handler.clone()))
                    } else {
                        report.skipped.push(s.plugin.clone());
                        None
                    }
                })
                .collect()
        };

        let deliveries = targets.iter().map(|(plugin, handler)| {
            let payload = payload.clone();
            async move { (plugin.clone(), self.invoke(handler, payload).await) }
        });

        for (plugin, result) in join_all(deliveries).await {
            match result {
                Ok(()) => report.delivered.push(plugin),
                Err(error) => {
                    tracing::warn!(plugin = %plugin, event = %event, error = %error, "Hook delivery failed");
                    report.failed.push(HookFailure { plugin, error });
                }
            }
        }

        tracing::debug!(
            event = %event,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Event broadcast"
        );
        report
    }

    /// Fire-and-forget broadcast on a background task
    pub fn spawn_emit(self: &Arc<Self>, event: impl Into<String>, payload: serde_json::Value) -> JoinHandle<DeliveryReport> {
        let bus = Arc::clone(self);
        let event = event.into();
        tokio::spawn(async move { bus.emit(&event, payload).await })
    }

    async fn invoke(&self, handler: &HookHandler, payload: serde_json::Value) -> Result<(), String> {
        let call = AssertUnwindSafe(handler(payload)).catch_unwind();
        match tokio::time::timeout(self.hook_timeout, call).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(_)) => Err("hook panicked".to_string()),
            Err(_) => Err(format!("hook timed out after {:?}", self.hook_timeout)),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::errors::PluginError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: Arc<AtomicUsize>) -> HookHandler {
        Arc::new(move |_payload: serde_json::Value| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), PluginError>(())
            }
            .boxed()
        })
    }

    fn failing() -> HookHandler {
        Arc::new(|_payload: serde_json::Value| {
            async { Err::<(), _>(PluginError::handler("boom")) }.boxed()
        })
    }

    fn panicking() -> HookHandler {
        Arc::new(|_payload: serde_json::Value| {
            async {
                if true {
                    panic!("hook bug");
                }
                Ok::<(), PluginError>(())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_block_others() {
        let bus = EventBus::default();
        let a = Arc::new(AtomicUsize::new(0));
        let c = Arc::new(AtomicUsize::new(0));

        bus.subscribe("a", "networkScan", counting(a.clone()));
        bus.subscribe("b", "networkScan", failing());
        bus.subscribe("c", "networkScan", counting(c.clone()));
        for p in ["a", "b", "c"] {
            bus.set_enabled(p, true);
        }

        let report = bus
            .emit_to_plugins("networkScan", serde_json::json!({"devices": 3}))
            .await;

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(c.load(Ordering::SeqCst), 1);
        assert_eq!(report.delivered.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].plugin, "b");
    }

    #[tokio::test]
    async fn test_panicking_hook_is_contained() {
        let bus = EventBus::default();
        let ok = Arc::new(AtomicUsize::new(0));
        bus.subscribe("panics", "tick", panicking());
        bus.subscribe("fine", "tick", counting(ok.clone()));
        bus.set_enabled("panics", true);
        bus.set_enabled("fine", true);

        let report = bus.emit_to_plugins("tick", serde_json::Value::Null).await;
        assert_eq!(ok.load(Ordering::SeqCst), 1);
        assert_eq!(report.failed[0].error, "hook panicked");
    }

    #[tokio::test]
    async fn test_disabled_plugin_is_skipped_without_replay() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe("a", "tick", counting(count.clone()));

        let report = bus.emit_to_plugins("tick", serde_json::Value::Null).await;
        assert_eq!(report.skipped, vec!["a".to_string()]);

        bus.set_enabled("a", true);
        bus.emit_to_plugins("other", serde_json::Value::Null).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        bus.emit_to_plugins("tick", serde_json::Value::Null).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resubscribe_keeps_delivery_at_most_once() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe("a", "tick", counting(count.clone()));
        bus.subscribe("a", "tick", counting(count.clone()));
        bus.set_enabled("a", true);

        bus.emit_to_plugins("tick", serde_json::Value::Null).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_plugin() {
        let bus = EventBus::default();
        bus.subscribe("a", "tick", failing());
        bus.set_enabled("a", true);
        bus.unsubscribe_plugin("a");
        assert!(bus.subscribers("tick").is_empty());
    }

    #[tokio::test]
    async fn test_core_handler_runs_before_plugins() {
        let bus = EventBus::default();
        let core = Arc::new(AtomicUsize::new(0));
        let seen = core.clone();
        bus.register_core_handler("networkScan", move |_payload| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok::<(), PluginError>(())
            }
        });
        assert_eq!(bus.hook_points(), vec!["networkScan".to_string()]);

        let report = bus.emit("networkScan", serde_json::Value::Null).await;
        assert_eq!(core.load(Ordering::SeqCst), 1);
        assert_eq!(report.core_handlers, 1);
    }
}
