use crate::{
    collection::RecordCollection,
    dispatch::{DispatchError, Payload},
    error::InternalError,
    obs::sink::{self, MetricsEvent},
};
use std::{fmt, sync::Arc};

///
/// MethodFn
///
/// One link of an override chain. `next` forwards to the link registered
/// before this one, with whatever receiver and arguments the link chooses.
///

pub type MethodFn = Arc<
    dyn Fn(&RecordCollection, &Next<'_>, Vec<Payload>) -> Result<Payload, InternalError>
        + Send
        + Sync,
>;

///
/// MethodImpl
///

#[derive(Clone)]
pub struct MethodImpl {
    module: String,
    func: MethodFn,
}

impl MethodImpl {
    pub(crate) fn new(module: &str, func: MethodFn) -> Self {
        Self {
            module: module.to_string(),
            func,
        }
    }

    /// Module that contributed this link.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }
}

impl fmt::Debug for MethodImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodImpl")
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

///
/// MethodChain
///
/// Ordered implementations of one method on one model, most recently
/// registered first. Frozen once the registry is finalized.
///

#[derive(Clone, Debug)]
pub struct MethodChain {
    name: String,
    links: Vec<MethodImpl>,
}

impl MethodChain {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            links: Vec::new(),
        }
    }

    /// Put `link` on top of the chain.
    pub(crate) fn push_override(&mut self, link: MethodImpl) {
        self.links.insert(0, link);
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn links(&self) -> &[MethodImpl] {
        &self.links
    }

    /// Contributing modules in dispatch order.
    #[must_use]
    pub fn modules(&self) -> Vec<&str> {
        self.links.iter().map(MethodImpl::module).collect()
    }

    /// Run the topmost link.
    pub fn invoke(&self, rs: &RecordCollection, args: Vec<Payload>) -> Result<Payload, InternalError> {
        let next = Next {
            method: &self.name,
            links: &self.links,
            depth: 0,
        };

        next.call(rs, args)
    }
}

///
/// Next
///
/// Handle to the remainder of a chain, handed to each link.
///

pub struct Next<'a> {
    method: &'a str,
    links: &'a [MethodImpl],
    depth: u64,
}

impl Next<'_> {
    /// Whether a further implementation exists below the current link.
    #[must_use]
    pub const fn has_next(&self) -> bool {
        !self.links.is_empty()
    }

    /// Forward to the next implementation and return its result.
    pub fn call(&self, rs: &RecordCollection, args: Vec<Payload>) -> Result<Payload, InternalError> {
        let Some((link, rest)) = self.links.split_first() else {
            return Err(DispatchError::ChainExhausted {
                model: rs.model().name().to_string(),
                method: self.method.to_string(),
            }
            .into());
        };

        sink::record(MetricsEvent::Dispatch {
            model: rs.model().name(),
            method: self.method,
            depth: self.depth,
        });
        tracing::trace!(
            model = rs.model().name(),
            method = self.method,
            module = link.module(),
            depth = self.depth,
            "dispatch"
        );

        let next = Next {
            method: self.method,
            links: rest,
            depth: self.depth + 1,
        };

        (link.func)(rs, &next, args)
    }
}
