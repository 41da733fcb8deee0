use crate::error::{ErrorClass, ErrorDetail, ErrorOrigin, InternalError};
use derive_more::Display;
use thiserror::Error as ThisError;

///
/// AccessOp
///

#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum AccessOp {
    #[display("read")]
    Read,
    #[display("write")]
    Write,
    #[display("create")]
    Create,
    #[display("unlink")]
    Unlink,
}

///
/// AccessError
///

#[derive(Debug, ThisError)]
pub enum AccessError {
    #[error("principal {principal} may not {op} records of model '{model}'")]
    SecurityDenied {
        principal: u64,
        model: String,
        op: AccessOp,
    },
}

impl From<AccessError> for InternalError {
    fn from(err: AccessError) -> Self {
        Self::with_detail(ErrorClass::Forbidden, ErrorOrigin::Access, ErrorDetail::Access(err))
    }
}

///
/// AccessPolicy
///
/// Access-control collaborator consulted before every read, write, create
/// and unlink. The superuser is never checked.
///

pub trait AccessPolicy: Send + Sync {
    fn check(&self, principal: u64, model: &str, op: AccessOp) -> Result<(), AccessError>;
}

///
/// AllowAll
///

#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn check(&self, _: u64, _: &str, _: AccessOp) -> Result<(), AccessError> {
        Ok(())
    }
}

impl<F> AccessPolicy for F
where
    F: Fn(u64, &str, AccessOp) -> bool + Send + Sync,
{
    fn check(&self, principal: u64, model: &str, op: AccessOp) -> Result<(), AccessError> {
        if self(principal, model, op) {
            Ok(())
        } else {
            Err(AccessError::SecurityDenied {
                principal,
                model: model.to_string(),
                op,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_policy_denies_with_security_denied() {
        let policy = |principal: u64, _: &str, op: AccessOp| principal == 1 || op == AccessOp::Read;

        assert!(policy.check(2, "User", AccessOp::Read).is_ok());

        let err: InternalError = policy
            .check(2, "User", AccessOp::Write)
            .expect_err("write should be denied")
            .into();
        assert!(err.is_security_denied());
        assert_eq!(err.class, ErrorClass::Forbidden);
    }
}
