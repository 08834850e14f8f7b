// Handler chain assembly and execution

use crate::application::Application;
use crate::error::{DispatchError, Error, Result};
use crate::http::{Request, Response};
use crate::logging::{debug, trace};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use trellis_config::{ConfigError, ObjectRef};

/// System stages, in their fixed order
pub const SYSTEM_HANDLERS: [&str; 8] = [
    "exc",
    "static_files",
    "tweaker",
    "notifier",
    "resource_finder",
    "csrf",
    "cors",
    "main",
];

const HANDLERS_KEY: &str = "tangled.app.handlers";

/// What a stage decided on the way in
pub enum Outcome {
    /// Pass the request to the next stage
    Continue,
    /// Stop here with this response
    Halt(Response),
    /// Stop here with this failure
    Fail(Error),
}

impl Outcome {
    /// `Continue` on success, `Fail` otherwise
    pub fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => Outcome::Continue,
            Err(error) => Outcome::Fail(error),
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Continue => f.write_str("Continue"),
            Outcome::Halt(response) => f.debug_tuple("Halt").field(&response.status).finish(),
            Outcome::Fail(error) => f.debug_tuple("Fail").field(error).finish(),
        }
    }
}

/// One stage of the chain.
///
/// `handle` runs on the way in. Stages that continued are unwound in
/// reverse: `on_response` when downstream produced a response,
/// `on_failure` when it failed.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, app: &Application, request: &mut Request) -> Outcome;

    async fn on_response(&self, _app: &Application, _request: &mut Request, response: Response) -> Result<Response> {
        Ok(response)
    }

    async fn on_failure(&self, _app: &Application, _request: &mut Request, error: Error) -> Result<Response> {
        Err(error)
    }
}

/// Where an application handler goes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Placement {
    /// After `main` and every handler placed before it
    #[default]
    Default,
    Before(String),
    After(String),
}

/// An application handler waiting to be placed
#[derive(Clone)]
pub struct HandlerSpec {
    pub name: String,
    pub reference: String,
    pub handler: Arc<dyn Handler>,
    pub placement: Placement,
}

impl fmt::Debug for HandlerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSpec")
            .field("name", &self.name)
            .field("reference", &self.reference)
            .field("placement", &self.placement)
            .finish()
    }
}

/// One line of `tangled.app.handlers`:
/// `reference [before=<name> | after=<name>] [name=<name>]`
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerLine {
    pub reference: ObjectRef,
    pub placement: Placement,
    pub name: Option<String>,
}

impl HandlerLine {
    pub fn parse(line: &str) -> std::result::Result<Self, ConfigError> {
        let bad = || ConfigError::invalid(HANDLERS_KEY, "`reference [before=|after=<name>] [name=<name>]`", line);

        let mut parts = line.split_whitespace();
        let reference = ObjectRef::parse(parts.next().ok_or_else(bad)?)?;
        let mut placement = Placement::Default;
        let mut name = None;

        for part in parts {
            let (key, value) = part.split_once('=').ok_or_else(bad)?;
            if value.is_empty() {
                return Err(bad());
            }
            match key {
                "before" | "after" if placement != Placement::Default => return Err(bad()),
                "before" => placement = Placement::Before(value.to_string()),
                "after" => placement = Placement::After(value.to_string()),
                "name" if name.is_none() => name = Some(value.to_string()),
                _ => return Err(bad()),
            }
        }

        Ok(Self {
            reference,
            placement,
            name,
        })
    }

    /// Explicit name, or the reference's last attribute segment
    pub fn stage_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.reference.short_name().to_string())
    }
}

#[derive(Clone)]
struct Stage {
    name: String,
    handler: Arc<dyn Handler>,
    system: bool,
    placement: Placement,
}

/// The ordered, frozen stage list
#[derive(Clone)]
pub struct Chain {
    stages: Vec<Stage>,
}

impl Chain {
    /// Lay out the system stages, then place application handlers in
    /// declaration order
    pub fn assemble(system: [Arc<dyn Handler>; 8], app_handlers: Vec<HandlerSpec>) -> Result<Self> {
        let mut stages: Vec<Stage> = SYSTEM_HANDLERS
            .iter()
            .zip(system)
            .map(|(name, handler)| Stage {
                name: name.to_string(),
                handler,
                system: true,
                placement: Placement::Default,
            })
            .collect();

        for spec in app_handlers {
            let invalid = |expected: &'static str, value: &str| {
                Error::startup(
                    HANDLERS_KEY,
                    spec.reference.clone(),
                    ConfigError::invalid(HANDLERS_KEY, expected, value),
                )
            };

            if stages.iter().any(|s| s.name == spec.name) {
                return Err(invalid("unique handler name", &spec.name));
            }
            let position = |anchor: &str| {
                stages
                    .iter()
                    .position(|s| s.name == anchor)
                    .ok_or_else(|| invalid("known handler anchor", anchor))
            };

            let index = match &spec.placement {
                Placement::Default => stages.len(),
                Placement::Before(anchor) if anchor == SYSTEM_HANDLERS[0] => {
                    return Err(invalid("anchor other than before=exc", anchor));
                }
                Placement::Before(anchor) => position(anchor)?,
                Placement::After(anchor) => {
                    // Earlier handlers anchored after the same stage, and
                    // anything anchored on them, stay first
                    let start = position(anchor)? + 1;
                    Self::placed_group(&stages, &spec.placement)
                        .into_iter()
                        .map(|i| i + 1)
                        .fold(start, usize::max)
                }
            };

            debug!(
                handler = %spec.name,
                reference = %spec.reference,
                placement = ?spec.placement,
                index,
                "Placed application handler"
            );
            stages.insert(
                index,
                Stage {
                    name: spec.name,
                    handler: spec.handler,
                    system: false,
                    placement: spec.placement,
                },
            );
        }

        Ok(Self { stages })
    }

    /// Indices of the stages placed with `placement`, plus every stage
    /// anchored on one of them, directly or through other anchors
    fn placed_group(stages: &[Stage], placement: &Placement) -> Vec<usize> {
        let mut members: Vec<usize> = stages
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.system && s.placement == *placement)
            .map(|(i, _)| i)
            .collect();

        loop {
            let before = members.len();
            for (i, stage) in stages.iter().enumerate() {
                if stage.system || members.contains(&i) {
                    continue;
                }
                let anchor = match &stage.placement {
                    Placement::Before(anchor) | Placement::After(anchor) => anchor,
                    Placement::Default => continue,
                };
                if members.iter().any(|&m| stages[m].name == *anchor) {
                    members.push(i);
                }
            }
            if members.len() == before {
                return members;
            }
        }
    }

    /// Stage names in execution order
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Names of the application handlers only
    pub fn app_handler_names(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| !s.system)
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Handler>> {
        self.stages
            .iter()
            .find(|s| s.name == name)
            .map(|s| &s.handler)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run `request` through every stage.
    ///
    /// When all stages continue, the response stored on the request by
    /// `main` (or a later stage) is the result.
    pub async fn run(&self, app: &Application, request: &mut Request) -> Result<Response> {
        let mut entered: Vec<&Stage> = Vec::with_capacity(self.stages.len());
        let mut outcome = None;

        for stage in &self.stages {
            trace!(stage = %stage.name, request_id = request.request_id(), "Entering stage");
            match stage.handler.handle(app, request).await {
                Outcome::Continue => entered.push(stage),
                Outcome::Halt(response) => {
                    debug!(stage = %stage.name, status = response.status, "Stage halted the chain");
                    outcome = Some(Ok(response));
                    break;
                }
                Outcome::Fail(error) => {
                    debug!(stage = %stage.name, error = %error, "Stage failed");
                    outcome = Some(Err(error));
                    break;
                }
            }
        }

        let mut result = match outcome {
            Some(result) => result,
            None => request
                .take_response()
                .ok_or(Error::Dispatch(DispatchError::NoResponse)),
        };

        for stage in entered.into_iter().rev() {
            trace!(stage = %stage.name, ok = result.is_ok(), "Unwinding stage");
            result = match result {
                Ok(response) => stage.handler.on_response(app, request, response).await,
                Err(error) => stage.handler.on_failure(app, request, error).await,
            };
        }

        result
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
