//! Filepath: src/serialize.rs
//!
//! Whitespace-delimited text form of a built tree, and the reverse reader.
//!
//! The format is pre-order, one node per line:
//!
//! ```text
//! <child_count> <leaves_below> <centroid components...>
//! ```
//!
//! followed by each child recursively. Leaves carry `child_count = 0`. The
//! vector width is recovered on load by counting the first line's tokens
//! and subtracting two; the branching factor is not recorded and comes
//! from the caller.
//!
//! Components print in Rust's shortest round-trip `f32` form, so a
//! well-formed file reloaded and re-emitted is byte-identical.

use std::fmt;
use std::io::{self, BufRead, Write};

use crate::arena::Arena;
use crate::node::Node;
use crate::tree::Tree;
use crate::vector::Vector;

// ============================================================================
//  TreeParseError
// ============================================================================

/// Failures while reading a serialized tree.
#[derive(Debug)]
pub enum TreeParseError {
    /// Underlying reader failure.
    Io(io::Error),

    /// The input held no tokens at all.
    Empty,

    /// The first line is too short to hold a child count, a leaf count,
    /// and at least one centroid component.
    HeaderTooShort {
        /// Tokens found on the first line.
        tokens: usize,
    },

    /// The input ended while a node or centroid was still owed tokens.
    UnexpectedEof,

    /// A token that should have been numeric was not.
    InvalidToken {
        /// The offending token.
        token: String,
    },

    /// A node declared more children than the tree order allows.
    FanoutExceedsOrder {
        /// Children declared on the node line.
        declared: usize,
        /// The tree's branching factor.
        order: usize,
    },

    /// Tokens remained after the root's subtree was fully read.
    TrailingContent,
}

impl fmt::Display for TreeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(error) => write!(f, "i/o error reading serialized tree: {error}"),

            Self::Empty => write!(f, "serialized tree is empty"),

            Self::HeaderTooShort { tokens } => write!(
                f,
                "first line has {tokens} token(s); expected child count, leaf count, and at least one component"
            ),

            Self::UnexpectedEof => write!(f, "unexpected end of serialized tree"),

            Self::InvalidToken { token } => write!(f, "invalid numeric token '{token}'"),

            Self::FanoutExceedsOrder { declared, order } => write!(
                f,
                "node declares {declared} children but the tree order is {order}"
            ),

            Self::TrailingContent => write!(f, "trailing content after the serialized tree"),
        }
    }
}

impl std::error::Error for TreeParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for TreeParseError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

// ============================================================================
//  Serialization
// ============================================================================

impl Node {
    /// Write this subtree in pre-order.
    pub(crate) fn serialize_into<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(
            out,
            "{} {} {}",
            self.visible_child_count(),
            self.leaves_below(),
            self.centroid()
        )?;

        for child in self.children() {
            child.serialize_into(out)?;
        }
        Ok(())
    }
}

impl Tree<'_> {
    /// Serialize the tree as whitespace-delimited text. An empty tree
    /// writes nothing.
    ///
    /// # Errors
    /// Propagates writer failures.
    pub fn serialize<W: Write>(&self, out: &mut W) -> io::Result<()> {
        match self.root() {
            Some(root) => root.serialize_into(out),
            None => Ok(()),
        }
    }
}

// ============================================================================
//  Deserialization
// ============================================================================

/// Whitespace tokenizer with typed parses.
struct Tokens<'s> {
    iter: std::str::SplitAsciiWhitespace<'s>,
}

impl<'s> Tokens<'s> {
    fn new(text: &'s str) -> Self {
        Self {
            iter: text.split_ascii_whitespace(),
        }
    }

    fn next(&mut self) -> Result<&'s str, TreeParseError> {
        self.iter.next().ok_or(TreeParseError::UnexpectedEof)
    }

    fn next_usize(&mut self) -> Result<usize, TreeParseError> {
        let token = self.next()?;
        token.parse().map_err(|_| TreeParseError::InvalidToken {
            token: token.to_owned(),
        })
    }

    fn next_f32(&mut self) -> Result<f32, TreeParseError> {
        let token = self.next()?;
        token.parse().map_err(|_| TreeParseError::InvalidToken {
            token: token.to_owned(),
        })
    }

    fn is_exhausted(&mut self) -> bool {
        self.iter.next().is_none()
    }
}

impl<'a> Tree<'a> {
    /// Rebuild a tree from its serialized text form.
    ///
    /// `order` must match the branching factor the tree was built with
    /// (the text form does not record it); the vector width is inferred
    /// from the first line. Nodes are placed in `arena`.
    ///
    /// # Errors
    /// Any malformed input — empty file, non-numeric token, declared
    /// children missing, fanout above `order` — is rejected.
    pub fn deserialize<R: BufRead>(
        arena: &'a Arena,
        order: usize,
        mut reader: R,
    ) -> Result<Self, TreeParseError> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;

        let first_line = text.lines().next().unwrap_or("");
        let header_tokens = first_line.split_ascii_whitespace().count();
        if header_tokens == 0 {
            return Err(TreeParseError::Empty);
        }
        if header_tokens < 3 {
            return Err(TreeParseError::HeaderTooShort {
                tokens: header_tokens,
            });
        }
        let dims = header_tokens - 2;

        let mut tree = Tree::new(arena, order, dims);
        let mut tokens = Tokens::new(&text);
        let root = read_node(tree.template(), arena, &mut tokens, dims, order)?;

        if !tokens.is_exhausted() {
            return Err(TreeParseError::TrailingContent);
        }

        tree.set_root(root);
        Ok(tree)
    }
}

/// Read one node line plus its subtree.
fn read_node(
    template: &Node,
    arena: &Arena,
    tokens: &mut Tokens<'_>,
    dims: usize,
    order: usize,
) -> Result<*mut Node, TreeParseError> {
    let child_count = tokens.next_usize()?;
    let leaves_below = tokens.next_usize()?;

    let centroid = Vector::zeroed_in(arena, dims);
    for component in centroid.as_mut_slice() {
        *component = tokens.next_f32()?;
    }

    if child_count == 0 {
        let leaf = template.new_leaf(arena, centroid);
        // SAFETY: leaf is fresh and thread-local.
        unsafe { (*leaf).set_leaves_below(leaves_below) };
        return Ok(leaf);
    }

    if child_count > order {
        return Err(TreeParseError::FanoutExceedsOrder {
            declared: child_count,
            order,
        });
    }

    let node = template.new_internal(arena);
    // SAFETY: node is fresh and thread-local until returned.
    unsafe {
        (*node).centroid().copy_from(centroid);
        (*node).set_leaves_below(leaves_below);
        for _ in 0..child_count {
            (*node).push_child(read_node(template, arena, tokens, dims, order)?);
        }
    }
    Ok(node)
}

// ============================================================================
//  Tests
// ============================================================================
