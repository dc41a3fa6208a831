//! Symbolic return-oriented programs.
//!
//! A program is a tree of [`Item`]s whose leaves are operation symbols
//! (resolved to gadget addresses at assembly time) or literal 32-bit
//! words. Nesting exists only for the author's convenience; assembly
//! sees the leaves in depth-first order.

use crate::pattern::Operation;
use crate::types::VirtAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    /// Resolved through the gadget catalog.
    Op(Operation),
    /// Emitted as-is.
    Word(u32),
    Seq(Vec<Item>),
}

/// A flattened leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leaf<'a> {
    Op(&'a Operation),
    Word(u32),
}

impl Item {
    pub fn op(text: impl Into<String>) -> Item {
        Item::Op(Operation::new(text))
    }

    pub fn seq(items: impl IntoIterator<Item = Item>) -> Item {
        Item::Seq(items.into_iter().collect())
    }
}

impl From<&str> for Item {
    fn from(text: &str) -> Self {
        Item::op(text)
    }
}

impl From<String> for Item {
    fn from(text: String) -> Self {
        Item::op(text)
    }
}

impl From<Operation> for Item {
    fn from(op: Operation) -> Self {
        Item::Op(op)
    }
}

impl From<u32> for Item {
    fn from(word: u32) -> Self {
        Item::Word(word)
    }
}

impl From<VirtAddr> for Item {
    fn from(addr: VirtAddr) -> Self {
        Item::Word(addr.addr())
    }
}

impl From<Vec<Item>> for Item {
    fn from(items: Vec<Item>) -> Self {
        Item::Seq(items)
    }
}

/// Leaves of `program` in depth-first order.
pub fn flatten(program: &[Item]) -> Vec<Leaf<'_>> {
    let mut leaves = Vec::new();
    // Explicit stack so arbitrarily deep nesting cannot overflow.
    let mut stack: Vec<std::slice::Iter<'_, Item>> = vec![program.iter()];
    while let Some(top) = stack.last_mut() {
        match top.next() {
            Some(Item::Op(op)) => leaves.push(Leaf::Op(op)),
            Some(Item::Word(w)) => leaves.push(Leaf::Word(*w)),
            Some(Item::Seq(items)) => stack.push(items.iter()),
            None => {
                stack.pop();
            }
        }
    }
    leaves
}
