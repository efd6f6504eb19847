use smelt_ir::Loc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LowerError {
    /// Umbrella lowering failure; always carries the source location of the
    /// offending instruction.
    #[error("{msg}\n{loc}")]
    Lowering { msg: String, loc: Loc },

    /// Source construct disallowed at this stage by policy, not merely
    /// unimplemented.
    #[error("{msg}\n{loc}")]
    ForbiddenConstruct { msg: String, loc: Loc },

    /// Instruction or expression shape with no lowering; a defect in
    /// upstream IR generation or a genuinely unsupported feature.
    #[error("{0}")]
    Unimplemented(String),

    /// Internal consistency violation (storage type stability, predicate
    /// width, missing typing entries). Aborts this function's compilation.
    #[error("{0}")]
    Consistency(String),

    #[error("{0}")]
    Backend(String),
}

impl LowerError {
    /// Whether this failure already carries precise location context and
    /// must be propagated unchanged by the per-block driver.
    pub fn is_located(&self) -> bool {
        matches!(
            self,
            LowerError::Lowering { .. } | LowerError::ForbiddenConstruct { .. }
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            LowerError::Lowering { .. } => "Lowering",
            LowerError::ForbiddenConstruct { .. } => "ForbiddenConstruct",
            LowerError::Unimplemented(_) => "Unimplemented",
            LowerError::Consistency(_) => "Consistency",
            LowerError::Backend(_) => "Backend",
        }
    }
}

pub type Result<T> = std::result::Result<T, LowerError>;
