//! Script Execution Sandbox.
//!
//! Each task gets a fresh rhai `Engine` with the host API registered against
//! that task's host, the configured resource ceilings, and a progress hook
//! that observes the cancellation token and the wall-clock limit. Nothing
//! script-visible is shared between sandboxes.

mod api;
mod bindings;
mod host;
mod scope_dump;

pub use api::{HostApi, LogLevel, TextMatch, HOST_API_VERSION};
pub use host::{HostServices, TaskHost};

use std::cell::{Cell, Ref, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rhai::{Dynamic, Engine, EvalAltResult, Scope};

use crate::cancel::CancellationToken;
use crate::config::SandboxConfig;
use crate::params::ParamValue;
use bindings::{param_to_dynamic, register_host_api, CANCELED_TAG, TIMEOUT_TAG};

/// How often (in interpreter operations) the wall clock is consulted.
const CLOCK_CHECK_OPS: u64 = 1024;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Task canceled")]
    Canceled,
    /// Parse error, runtime error or exceeded limit. `scope` is the script's
    /// global scope at the time of a runtime failure.
    #[error("{message}")]
    Script {
        message: String,
        scope: Option<serde_json::Value>,
    },
}

pub struct Sandbox<H: HostApi + 'static> {
    engine: Engine,
    host: Rc<RefCell<H>>,
    cancel: CancellationToken,
    deadline: Rc<Cell<Option<Instant>>>,
    timeout: Option<Duration>,
}

impl<H: HostApi + 'static> Sandbox<H> {
    pub fn new(host: H, cancel: CancellationToken, limits: &SandboxConfig) -> Self {
        let host = Rc::new(RefCell::new(host));
        let deadline: Rc<Cell<Option<Instant>>> = Rc::new(Cell::new(None));

        let mut engine = Engine::new();
        engine.set_max_operations(limits.max_operations);
        engine.set_max_call_levels(limits.max_call_levels);
        engine.set_max_string_size(limits.max_string_size);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_map_size(limits.max_map_size);
        engine.disable_symbol("eval");

        let token = cancel.clone();
        let clock = Rc::clone(&deadline);
        engine.on_progress(move |ops| {
            if token.is_canceled() {
                return Some(Dynamic::from(CANCELED_TAG.to_string()));
            }
            if ops % CLOCK_CHECK_OPS == 0 {
                if let Some(at) = clock.get() {
                    if Instant::now() >= at {
                        return Some(Dynamic::from(TIMEOUT_TAG.to_string()));
                    }
                }
            }
            None
        });

        register_host_api(&mut engine, &host);

        Self {
            engine,
            host,
            cancel,
            deadline,
            timeout: limits.timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn host(&self) -> Ref<'_, H> {
        self.host.borrow()
    }

    /// Compile and run `script` with `params` (and `base_url`, unless a
    /// parameter of that name exists) bound as constants.
    pub fn run(
        &self,
        script: &str,
        params: &BTreeMap<String, ParamValue>,
        base_url: Option<&str>,
    ) -> Result<(), SandboxError> {
        let ast = self.engine.compile(script).map_err(|e| SandboxError::Script {
            message: format!("parse error: {}", e),
            scope: None,
        })?;

        let mut scope = Scope::new();
        for (key, value) in params {
            scope.push_constant_dynamic(key.as_str(), param_to_dynamic(value));
        }
        if let Some(base) = base_url {
            if !params.contains_key("base_url") {
                scope.push_constant("base_url", base.to_string());
            }
        }

        self.deadline.set(self.timeout.map(|t| Instant::now() + t));
        let result = self.engine.run_ast_with_scope(&mut scope, &ast);
        self.deadline.set(None);

        result.map_err(|err| self.classify(*err, &scope))
    }

    fn classify(&self, err: EvalAltResult, scope: &Scope) -> SandboxError {
        if self.cancel.is_canceled() {
            return SandboxError::Canceled;
        }
        if let EvalAltResult::ErrorTerminated(tag, _) = root_cause(&err) {
            if tag.to_string() == TIMEOUT_TAG {
                let limit = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
                return SandboxError::Script {
                    message: format!("script exceeded its time limit of {}s", limit),
                    scope: Some(scope_dump::dump(scope)),
                };
            }
            return SandboxError::Canceled;
        }
        SandboxError::Script {
            message: err.to_string(),
            scope: Some(scope_dump::dump(scope)),
        }
    }
}

/// Strip function-call and module wrappers.
fn root_cause(err: &EvalAltResult) -> &EvalAltResult {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _)
        | EvalAltResult::ErrorInModule(_, inner, _) => root_cause(inner),
        other => other,
    }
}
