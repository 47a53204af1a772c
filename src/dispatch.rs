//! Routing of named requests to typed backend operations.

use std::os::raw::c_int;

use hal_ml_derive::FromParams;
use itertools::Itertools;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap as HashMap;

use crate::{
    error::HalError,
    hal::HalMl,
    param::{ParamSet, ParamValue},
};

/// Typed arguments extracted from a [`ParamSet`]. Derived with `#[derive(FromParams)]`.
pub(crate) trait FromParams<'a>: Sized {
    fn from_params(params: &ParamSet<'a>) -> Result<Self, HalError>;
}

/// A named request bound to one backend operation.
pub(crate) trait Request {
    /// The request name, matched case-insensitively.
    const NAME: &'static str;
    type Args<'a>: FromParams<'a>;

    fn call(hal: &HalMl, args: Self::Args<'_>) -> Result<(), HalError>;
}

type RequestFn = for<'a, 'b, 'c> fn(&'a HalMl, &'b ParamSet<'c>) -> Result<(), HalError>;
type RequestVTable = HashMap<String, RequestFn>;

/// All arguments are extracted before the backend is called.
fn call_request<'p, R: Request>(hal: &HalMl, params: &ParamSet<'p>) -> Result<(), HalError> {
    let args = <R::Args<'p> as FromParams<'p>>::from_params(params)?;
    R::call(hal, args)
}

#[derive(Debug, FromParams)]
pub(crate) struct ConfigureInstanceArgs<'a> {
    #[param(key = "properties")]
    prop: ParamValue<'a>,
}

pub(crate) struct ConfigureInstance;

impl Request for ConfigureInstance {
    const NAME: &'static str = "configure_instance";
    type Args<'a> = ConfigureInstanceArgs<'a>;

    fn call(hal: &HalMl, args: Self::Args<'_>) -> Result<(), HalError> {
        hal.configure_instance(args.prop)
    }
}

#[derive(Debug, FromParams)]
pub(crate) struct InvokeArgs<'a> {
    input: ParamValue<'a>,
    output: ParamValue<'a>,
}

pub(crate) struct Invoke;

impl Request for Invoke {
    const NAME: &'static str = "invoke";
    type Args<'a> = InvokeArgs<'a>;

    fn call(hal: &HalMl, args: Self::Args<'_>) -> Result<(), HalError> {
        hal.invoke(args.input, args.output)
    }
}

#[derive(Debug, FromParams)]
pub(crate) struct InvokeDynamicArgs<'a> {
    #[param(key = "properties")]
    prop: ParamValue<'a>,
    input: ParamValue<'a>,
    output: ParamValue<'a>,
}

pub(crate) struct InvokeDynamic;

impl Request for InvokeDynamic {
    const NAME: &'static str = "invoke_dynamic";
    type Args<'a> = InvokeDynamicArgs<'a>;

    fn call(hal: &HalMl, args: Self::Args<'_>) -> Result<(), HalError> {
        hal.invoke_dynamic(args.prop, args.input, args.output)
    }
}

#[derive(Debug, FromParams)]
pub(crate) struct GetFrameworkInfoArgs<'a> {
    framework_info: ParamValue<'a>,
}

pub(crate) struct GetFrameworkInfo;

impl Request for GetFrameworkInfo {
    const NAME: &'static str = "get_framework_info";
    type Args<'a> = GetFrameworkInfoArgs<'a>;

    fn call(hal: &HalMl, args: Self::Args<'_>) -> Result<(), HalError> {
        hal.get_framework_info(args.framework_info)
    }
}

#[derive(Debug, FromParams)]
pub(crate) struct GetModelInfoArgs<'a> {
    ops: c_int,
    in_info: ParamValue<'a>,
    out_info: ParamValue<'a>,
}

pub(crate) struct GetModelInfo;

impl Request for GetModelInfo {
    const NAME: &'static str = "get_model_info";
    type Args<'a> = GetModelInfoArgs<'a>;

    fn call(hal: &HalMl, args: Self::Args<'_>) -> Result<(), HalError> {
        hal.get_model_info(args.ops, args.in_info, args.out_info)
    }
}

#[derive(Debug, FromParams)]
pub(crate) struct EventHandlerArgs<'a> {
    ops: c_int,
    data: ParamValue<'a>,
}

pub(crate) struct EventHandler;

impl Request for EventHandler {
    const NAME: &'static str = "eventHandler";
    type Args<'a> = EventHandlerArgs<'a>;

    fn call(hal: &HalMl, args: Self::Args<'_>) -> Result<(), HalError> {
        hal.event_handler(args.ops, args.data)
    }
}

#[derive(Default, Clone)]
pub(crate) struct DispatcherBuilder {
    requests: RequestVTable,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_request<R: Request>(mut self) -> Self {
        let f = call_request::<R> as RequestFn;
        self.requests.insert(R::NAME.to_ascii_lowercase(), f);
        self
    }

    pub fn add_default_requests(self) -> Self {
        self.add_request::<ConfigureInstance>()
            .add_request::<Invoke>()
            .add_request::<InvokeDynamic>()
            .add_request::<GetFrameworkInfo>()
            .add_request::<GetModelInfo>()
            .add_request::<EventHandler>()
    }

    pub fn build(self) -> Dispatcher {
        let requests = self.requests;
        Dispatcher { requests }
    }
}

/// Table from request names to backend operations.
pub struct Dispatcher {
    requests: RequestVTable,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("requests", &self.names().collect_vec())
            .finish()
    }
}

impl Dispatcher {
    /// The dispatcher holding the built-in requests.
    pub fn global() -> &'static Self {
        static GLOBAL: Lazy<Dispatcher> =
            Lazy::new(|| DispatcherBuilder::new().add_default_requests().build());
        &GLOBAL
    }

    /// Lower-cased names of the registered requests, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.requests.keys().map(String::as_str).sorted()
    }

    /// Routes the request `name` to its backend operation.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all, fields(name = %name)))]
    pub fn dispatch(&self, hal: &HalMl, name: &str, params: &ParamSet<'_>) -> Result<(), HalError> {
        match self.requests.get(&name.to_ascii_lowercase()) {
            Some(f) => f(hal, params),
            None => {
                log::error!("invalid request name {name}");
                Err(HalError::invalid(format!("unknown request `{name}`")))
            }
        }
    }
}
