//! Runtime Library (rtl)
//!
//! - **AVL table**: ordered generic table with caller-supplied element storage
//! - **String**: path collation, prefix and subtree helpers

pub mod avl;
pub mod string;

pub use avl::{AvlTable, ElementStorage};
