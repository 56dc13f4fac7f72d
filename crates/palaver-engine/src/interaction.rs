//! User interaction types exchanged across the resolver's single
//! suspension point.
//!
//! When resolution needs the user, `step` returns an
//! [`InteractionRequest`]; the host obtains an answer however it likes
//! and calls `step` again with an [`Interaction`] pairing the request
//! with the answer. The machine resumes exactly where it paused.

/// Identity of a node within a tree, as the child-index path from the
/// root. Paths stay valid while the machine is suspended because only
/// the resolver mutates the tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodePath(pub Vec<usize>);

impl NodePath {
    pub fn new(indices: Vec<usize>) -> Self {
        NodePath(indices)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }
}

impl std::fmt::Display for NodePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/")?;
        for (i, index) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{index}")?;
        }
        Ok(())
    }
}

/// A prompt for user interaction raised during resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionRequest {
    /// The question or message to show the user.
    pub message: String,
    /// Expected scalar type of the answer (currently always "str").
    pub expected_type: String,
    /// The slot being clarified, when resolution is inside one.
    pub slot_name: Option<String>,
    /// The node that raised the request.
    pub requester: NodePath,
}

/// The user's answer to an interaction request.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionAnswer {
    pub content: String,
    /// Set once the requesting node has taken the answer; an answer is
    /// consumed at most once.
    pub consumed: bool,
}

impl InteractionAnswer {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            consumed: false,
        }
    }
}

/// A request paired with its answer, handed back into `step`.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub request: InteractionRequest,
    pub answer: InteractionAnswer,
}

impl Interaction {
    pub fn new(request: InteractionRequest, answer: impl Into<String>) -> Self {
        Self {
            request,
            answer: InteractionAnswer::new(answer),
        }
    }
}
