//! Typed authenticated caller.
//!
//! The gateway validates credentials and hands the core a [`Caller`]; the
//! core never sees or parses tokens. Operations that depend on ownership
//! (wizard creation, transaction history) take one of these by value.

/// The verified identity of the user driving a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: i64,
}

impl Caller {
    pub fn new(user_id: i64) -> Self {
        Self { user_id }
    }
}
