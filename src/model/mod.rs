// File: ./src/model/mod.rs
pub mod item;
pub mod parser;

pub use item::{BranchListEntry, Item, ItemType, new_item_id};
