//! Integer variables and their Boolean encodings.
pub mod domains;
pub mod encoding;

/// A bounded integer variable.
///
/// Ids start at 1; id 0 is reserved. Each integer variable owns (or, for views, borrows) a unary
/// encoding made of order literals `[x >= k]` and equality literals `[x == k]`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct IntVar {
    id: u32,
}

impl IntVar {
    /// Creates an integer variable from its id.
    pub fn from_id(id: usize) -> IntVar {
        debug_assert!(id > 0);
        IntVar { id: id as u32 }
    }

    /// The id of this variable.
    pub fn id(self) -> usize {
        self.id as usize
    }
}

/// The domain operation a bound or equality literal stands for.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DomainOp {
    Equal,
    NotEqual,
    GreaterEqual,
    LessEqual,
}

/// What a Boolean literal says about an integer variable.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct LitInfo {
    pub var: IntVar,
    pub op: DomainOp,
    pub rhs: i64,
}
