//! Tool execution: routing, host invocation, outcome folding.
//!
//! [`ToolExecutor`] drains the execution queue on a fixed cadence with
//! strictly one request in flight. Each request is routed through the
//! static [`RoutingTable`] to a host command, invoked through the
//! breaker-guarded [`CommandPort`], and folded into a structured
//! [`ToolResponse`] no matter how it fails. The consumer loop never
//! dies.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `port` | Host command channel (trait + cross-frame RPC) |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::breaker::CircuitBreaker;
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::protocol::{ToolRequest, ToolResponse};
use crate::queue::{ExecutionQueue, QueuedToolRequest};
use crate::schema::Capability;

// ============================================================================
// Submodules
// ============================================================================

/// Host command channel.
pub mod port;

pub use port::{CommandPort, FrameChannelPort, PortReply};

// ============================================================================
// Routing
// ============================================================================

/// How a route derives its host resource string.
#[derive(Debug, Clone, Copy)]
enum ResourceSpec {
    /// The resource is a fixed name.
    Fixed(&'static str),
    /// The resource is scoped by one request argument, e.g.
    /// `dataContext[Tasks].item`.
    Scoped {
        prefix: &'static str,
        arg: &'static str,
        suffix: &'static str,
    },
}

/// One tool's mapping onto the host command surface.
#[derive(Clone, Copy)]
pub struct Route {
    /// Capability this tool requires.
    pub capability: Capability,
    /// Host verb.
    pub action: &'static str,
    resource: ResourceSpec,
    shape: fn(&Map<String, Value>) -> Value,
}

impl Route {
    /// Resolves the resource string for a request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Routing`] when a scoping argument is missing.
    /// The parser enforces required arguments, so this only fires for
    /// unknown tools admitted in passthrough mode.
    pub fn resource(&self, request: &ToolRequest) -> Result<String> {
        match self.resource {
            ResourceSpec::Fixed(name) => Ok(name.to_string()),
            ResourceSpec::Scoped {
                prefix,
                arg,
                suffix,
            } => {
                let value = request.get_string(arg).ok_or_else(|| {
                    Error::routing(format!("{}: missing scoping argument {arg}", request.tool))
                })?;
                Ok(format!("{prefix}{value}{suffix}"))
            }
        }
    }

    /// Builds the host payload from the request arguments.
    #[must_use]
    pub fn values(&self, request: &ToolRequest) -> Value {
        (self.shape)(&request.args)
    }
}

/// Static tool-to-command mapping.
///
/// Built once from the known tool surface; tests assert it stays in
/// lockstep with the schema registry.
pub struct RoutingTable {
    routes: FxHashMap<&'static str, Route>,
}

impl RoutingTable {
    /// Routing for the builtin tool surface.
    #[must_use]
    pub fn builtin() -> Self {
        let mut routes = FxHashMap::default();

        routes.insert(
            "create_data_context",
            Route {
                capability: Capability::Data,
                action: "create",
                resource: ResourceSpec::Fixed("dataContext"),
                shape: |args| Value::Object(args.clone()),
            },
        );
        routes.insert(
            "get_data_contexts",
            Route {
                capability: Capability::Data,
                action: "get",
                resource: ResourceSpec::Fixed("dataContextList"),
                shape: |_| Value::Null,
            },
        );
        routes.insert(
            "create_items",
            Route {
                capability: Capability::Data,
                action: "create",
                resource: ResourceSpec::Scoped {
                    prefix: "dataContext[",
                    arg: "data_context",
                    suffix: "].item",
                },
                shape: |args| args.get("items").cloned().unwrap_or(Value::Null),
            },
        );
        routes.insert(
            "get_items",
            Route {
                capability: Capability::Data,
                action: "get",
                resource: ResourceSpec::Scoped {
                    prefix: "dataContext[",
                    arg: "data_context",
                    suffix: "].item",
                },
                shape: |args| match args.get("limit") {
                    Some(limit) => json!({ "limit": limit }),
                    None => Value::Null,
                },
            },
        );
        routes.insert(
            "select_cases",
            Route {
                capability: Capability::Data,
                action: "create",
                resource: ResourceSpec::Scoped {
                    prefix: "dataContext[",
                    arg: "data_context",
                    suffix: "].selectionList",
                },
                shape: |args| args.get("case_ids").cloned().unwrap_or(Value::Null),
            },
        );
        routes.insert(
            "create_table",
            Route {
                capability: Capability::Data,
                action: "create",
                resource: ResourceSpec::Fixed("component"),
                shape: |args| {
                    json!({
                        "type": "caseTable",
                        "dataContext": args.get("data_context").cloned().unwrap_or(Value::Null),
                        "name": args.get("name").cloned().unwrap_or(Value::Null),
                    })
                },
            },
        );
        routes.insert(
            "update_interactive_state",
            Route {
                capability: Capability::Interactive,
                action: "update",
                resource: ResourceSpec::Fixed("interactiveState"),
                shape: |args| args.get("state").cloned().unwrap_or(Value::Null),
            },
        );
        routes.insert(
            "resize_plugin",
            Route {
                capability: Capability::Interactive,
                action: "update",
                resource: ResourceSpec::Fixed("interactiveFrame"),
                shape: |args| {
                    json!({
                        "dimensions": {
                            "width": args.get("width").cloned().unwrap_or(Value::Null),
                            "height": args.get("height").cloned().unwrap_or(Value::Null),
                        }
                    })
                },
            },
        );
        routes.insert(
            "notify_user",
            Route {
                capability: Capability::Interactive,
                action: "notify",
                resource: ResourceSpec::Fixed("logMessage"),
                shape: |args| {
                    json!({
                        "formatStr": args.get("message").cloned().unwrap_or(Value::Null),
                        "level": args.get("level").cloned().unwrap_or(json!("info")),
                    })
                },
            },
        );

        Self { routes }
    }

    /// Looks up the route for a tool.
    #[must_use]
    pub fn get(&self, tool: &str) -> Option<&Route> {
        self.routes.get(tool)
    }

    /// Names of all routed tools.
    pub fn tool_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.routes.keys().copied()
    }

    /// Number of routed tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::builtin()
    }
}

// ============================================================================
// ToolExecutor
// ============================================================================

/// Serialized consumer of the execution queue.
pub struct ToolExecutor {
    config: Arc<WorkerConfig>,
    queue: Arc<ExecutionQueue>,
    port: Arc<dyn CommandPort>,
    breaker: Arc<CircuitBreaker>,
    routes: Arc<RoutingTable>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ToolExecutor {
    /// Creates an executor over the given queue and port.
    #[must_use]
    pub fn new(
        config: Arc<WorkerConfig>,
        queue: Arc<ExecutionQueue>,
        port: Arc<dyn CommandPort>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            config,
            queue,
            port,
            breaker,
            routes: Arc::new(RoutingTable::builtin()),
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Returns whether the consumer loop is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the consumer loop. No-op if already running.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(tick_ms = self.config.executor_tick.as_millis() as u64, "Executor started");

        let config = Arc::clone(&self.config);
        let queue = Arc::clone(&self.queue);
        let port = Arc::clone(&self.port);
        let breaker = Arc::clone(&self.breaker);
        let routes = Arc::clone(&self.routes);
        let running = Arc::clone(&self.running);

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(config.executor_tick);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tick.tick().await;
                if !running.load(Ordering::SeqCst) {
                    return;
                }

                // Drain what is ready; awaiting each item keeps
                // execution strictly serialized.
                while let Some(item) = queue.dequeue() {
                    Self::execute_item(&config, &queue, &port, &breaker, &routes, item).await;
                    if !running.load(Ordering::SeqCst) {
                        return;
                    }
                }
            }
        });
        *self.task.lock() = Some(handle);
    }

    /// Stops the consumer loop. Pending items stay queued.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        debug!("Executor stopped");
    }

    /// Executes one item and always responds.
    async fn execute_item(
        config: &WorkerConfig,
        queue: &ExecutionQueue,
        port: &Arc<dyn CommandPort>,
        breaker: &CircuitBreaker,
        routes: &RoutingTable,
        item: QueuedToolRequest,
    ) {
        let started = Instant::now();
        let request = &item.request;

        trace!(id = %request.id, tool = %request.tool, "Executing");

        let result = Self::execute_request(config, port, breaker, routes, request).await;
        let duration = started.elapsed();
        let duration_ms = duration.as_millis() as u64;

        let response = match result {
            Ok(value) => {
                queue.record_success(duration);
                ToolResponse::success(request.id.clone(), value, duration_ms)
            }
            Err(e) => {
                warn!(id = %request.id, tool = %request.tool, error = %e, "Execution failed");
                queue.record_failure(duration);
                ToolResponse::from_error(request.id.clone(), &e, duration_ms)
            }
        };

        item.respond(Ok(response));
    }

    /// Routes and invokes one request against the host.
    async fn execute_request(
        config: &WorkerConfig,
        port: &Arc<dyn CommandPort>,
        breaker: &CircuitBreaker,
        routes: &RoutingTable,
        request: &ToolRequest,
    ) -> Result<Value> {
        let Some(route) = routes.get(&request.tool) else {
            return Err(Error::tool_not_found(request.tool.clone()));
        };

        if !config.capability_enabled(route.capability) {
            return Err(Error::tool_not_found(format!(
                "{} (capability {} disabled)",
                request.tool, route.capability
            )));
        }

        let resource = route.resource(request)?;
        let values = route.values(request);

        let reply = breaker
            .execute(|| port.call(route.action, &resource, values))
            .await?;
        reply.into_result()
    }
}

// ============================================================================
// Tests
// ============================================================================
