//! Error types for fact logic

/// Errors raised while parsing or evaluating fact logic
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LogicError {
    /// Source did not parse
    #[error("syntax error at byte {position}: {message}")]
    Syntax { position: usize, message: String },

    /// Name not bound in any scope
    #[error("unknown name '{0}'")]
    UnknownName(String),

    /// Call to something outside the allow-list
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// Data primitive called from logic that may not perform queries
    #[error("data primitive '{0}' is not available in expressions")]
    PrimitiveNotAllowed(String),

    /// Operand of the wrong kind
    #[error("type error: {0}")]
    Type(String),

    /// Division or remainder by zero
    #[error("division by zero")]
    DivisionByZero,

    /// Index outside a sequence, or missing mapping key
    #[error("index error: {0}")]
    Index(String),

    /// Arithmetic overflow
    #[error("arithmetic overflow")]
    Overflow,

    /// Step budget used up
    #[error("step budget of {0} exhausted")]
    StepBudgetExhausted(u64),

    /// A size or depth limit was hit
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// An allow-listed data primitive reported failure
    #[error("primitive '{name}' failed: {message}")]
    Primitive { name: String, message: String },

    /// Evaluation was cancelled by its supervisor
    #[error("evaluation cancelled")]
    Cancelled,

    /// Procedure body ended without `return`
    #[error("procedure finished without returning a value")]
    NoReturn,
}

impl LogicError {
    /// Create a syntax error
    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            position,
            message: message.into(),
        }
    }

    /// Create a type error
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    /// Whether the error was detected before evaluation started
    #[inline]
    #[must_use]
    pub fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax { .. })
    }
}
